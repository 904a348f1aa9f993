//! Terminal output.
//!
//! - `ConsoleObserver` - progress bar plus colored build messages
//! - `Table` - auto-sizing table with box-drawing borders, used by `inoc boards`

use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use std::cmp;

use crate::build::BuildObserver;

/// Prints build events above an `indicatif` progress bar.
pub struct ConsoleObserver {
    pb: ProgressBar,
}

impl ConsoleObserver {
    pub fn new() -> Self {
        let pb = ProgressBar::new(100);
        if let Ok(style) = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] {bar:40.cyan/blue} {pos:>3}% {msg}")
        {
            pb.set_style(style.progress_chars("#>-"));
        }
        Self { pb }
    }

    pub fn finish(&self) {
        self.pb.finish_and_clear();
    }
}

impl Default for ConsoleObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl BuildObserver for ConsoleObserver {
    fn progress(&self, percent: u8, message: &str) {
        self.pb.set_position(percent.into());
        self.pb.set_message(message.to_string());
    }

    fn diagnostic(&self, line: &str) {
        if line.contains("error:") {
            self.pb.println(line.red().to_string());
        } else if line.contains("warning:") {
            self.pb.println(line.yellow().to_string());
        } else {
            self.pb.println(line);
        }
    }

    fn info(&self, message: &str) {
        self.pb.println(message);
    }

    fn warn(&self, message: &str) {
        self.pb.println(format!("{} {}", "!".yellow(), message));
    }
}

pub struct Table {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

impl Table {
    pub fn new(headers: &[&str]) -> Self {
        Self {
            headers: headers.iter().map(|s| s.to_string()).collect(),
            rows: Vec::new(),
        }
    }

    pub fn add_row(&mut self, row: Vec<String>) {
        if row.len() == self.headers.len() {
            self.rows.push(row);
        }
    }

    pub fn print(&self) {
        let (_, term_width) = console::Term::stdout().size();
        for line in self.render(term_width as usize) {
            println!("{line}");
        }
    }

    /// Lines of the table, squeezed to fit `max_width` columns.
    pub fn render(&self, max_width: usize) -> Vec<String> {
        if self.headers.is_empty() {
            return Vec::new();
        }
        let col_widths = self.column_widths(max_width);

        let make_sep = |left: &str, mid: &str, right: &str| -> String {
            let cells: Vec<String> = col_widths.iter().map(|w| "─".repeat(w + 2)).collect();
            format!("  {left}{}{right}", cells.join(mid))
        };
        let make_row = |cells: &[String], bold: bool| -> String {
            let mut s = String::from("  │");
            for (cell, &width) in cells.iter().zip(&col_widths) {
                let clean = sanitize_content(cell);
                let truncated = console::truncate_str(&clean, width, "...").to_string();
                let padding = width.saturating_sub(console::measure_text_width(&truncated));
                let shown = if bold {
                    truncated.bold().to_string()
                } else {
                    truncated
                };
                s.push_str(&format!(" {shown} {}│", " ".repeat(padding)));
            }
            s
        };

        let mut lines = vec![make_sep("┌", "┬", "┐"), make_row(&self.headers, true)];
        lines.push(make_sep("├", "┼", "┤"));
        lines.extend(self.rows.iter().map(|row| make_row(row, false)));
        lines.push(make_sep("└", "┴", "┘"));
        lines
    }

    fn column_widths(&self, max_width: usize) -> Vec<usize> {
        let mut col_widths: Vec<usize> = self.headers.iter().map(|h| h.chars().count()).collect();
        for row in &self.rows {
            for (i, cell) in row.iter().enumerate() {
                let len = console::measure_text_width(&sanitize_content(cell));
                col_widths[i] = cmp::max(col_widths[i], len);
            }
        }

        let overhead = 3 + 3 * self.headers.len();
        let available = max_width.saturating_sub(overhead);
        let mut current: usize = col_widths.iter().sum();

        // shave the widest column until it fits, never below 8
        while current > available {
            let Some((idx, &widest)) = col_widths.iter().enumerate().max_by_key(|(_, w)| **w) else {
                break;
            };
            if widest <= 8 {
                break;
            }
            col_widths[idx] -= 1;
            current -= 1;
        }
        col_widths
    }
}

fn sanitize_content(s: &str) -> String {
    s.chars()
        .map(|c| match c {
            '\n' | '\r' | '\t' => ' ',
            _ => c,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn boards() -> Table {
        let mut table = Table::new(&["FQBN", "Name"]);
        table.add_row(vec!["arduino:avr:uno".to_string(), "Arduino Uno".to_string()]);
        table.add_row(vec!["only one cell".to_string()]);
        table
    }

    #[test]
    fn test_rows_with_wrong_arity_are_dropped() {
        let lines = boards().render(200);
        // top, header, separator, one row, bottom
        assert_eq!(lines.len(), 5);
        assert!(lines[3].contains("arduino:avr:uno"));
    }

    #[test]
    fn test_narrow_terminal_truncates() {
        let mut table = Table::new(&["FQBN", "Name"]);
        table.add_row(vec![
            "arduino:avr:diecimila:cpu=atmega168".to_string(),
            "Arduino Duemilanove or Diecimila".to_string(),
        ]);
        let lines = table.render(40);
        assert!(lines[3].contains("..."));
        assert!(console::measure_text_width(&lines[0]) <= 40);
    }
}
