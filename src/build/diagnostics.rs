//! Compiler diagnostic remapping.
//!
//! Sketch tabs are compiled as one concatenated unit, so the compiler reports
//! `Blink.cpp:57` for what the user wrote in `motors.ino:12`. The remapper
//! translates such lines back using the offsets recorded while concatenating,
//! strips the build folder from paths and swaps a few historic messages for
//! friendlier advice.

use regex::Regex;
use std::fmt;
use std::path::{MAIN_SEPARATOR, Path};
use std::sync::LazyLock;

use super::feedback::FeedbackAnalyzer;

static ERROR_FORMAT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(.+\.\w+):(\d+)(:\d+)*:\s*error:\s*(.*)\s*").expect("valid regex")
});

/// Where one tab landed inside the concatenated unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TabSpan {
    pub file_name: String,
    /// Name shown to the user: `.ino`/`.pde` tabs drop their extension.
    pub display_name: String,
    /// Lines of the unit before this tab's first line.
    pub offset: usize,
}

/// Layout of the concatenated unit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceMap {
    pub unit_name: String,
    /// Concatenated tabs, in unit order.
    pub tabs: Vec<TabSpan>,
    /// Tabs copied verbatim; their line numbers need no translation.
    pub copied: Vec<TabSpan>,
}

impl SourceMap {
    /// Tab and 1-based tab line for a 1-based line in `file`.
    pub fn locate(&self, file: &str, line: usize) -> Option<(&TabSpan, usize)> {
        let name = Path::new(file)
            .file_name()
            .map(|n| n.to_string_lossy().to_string())?;

        if name == self.unit_name {
            return self
                .tabs
                .iter()
                .rev()
                .find(|t| t.offset < line)
                .map(|t| (t, line - t.offset));
        }
        self.tabs
            .iter()
            .chain(self.copied.iter())
            .find(|t| t.file_name == name)
            .map(|t| (t, line))
    }
}

/// The first error a build reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileDiagnostic {
    /// File as reported, or the tab file name once placed.
    pub file: Option<String>,
    pub line: Option<usize>,
    pub message: String,
    /// Set when the error was traced back to a sketch tab.
    pub tab: Option<String>,
}

impl fmt::Display for CompileDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.file, self.line) {
            (Some(file), Some(line)) => write!(f, "{file}:{line}: error: {}", self.message),
            _ => f.write_str(&self.message),
        }
    }
}

#[derive(Debug)]
pub struct DiagnosticRemapper {
    build_prefix: String,
    verbose: bool,
    source_map: SourceMap,
    sketch_stage: bool,
    first_error: Option<CompileDiagnostic>,
}

impl DiagnosticRemapper {
    pub fn new(build_path: &Path, verbose: bool) -> Self {
        Self {
            build_prefix: format!("{}{}", build_path.display(), MAIN_SEPARATOR),
            verbose,
            source_map: SourceMap::default(),
            sketch_stage: false,
            first_error: None,
        }
    }

    pub fn set_source_map(&mut self, map: SourceMap) {
        self.source_map = map;
    }

    /// Errors are only placed into tabs while the sketch itself compiles;
    /// a library may well contain a file named like a tab.
    pub fn set_sketch_stage(&mut self, active: bool) {
        self.sketch_stage = active;
    }

    pub fn first_error(&self) -> Option<&CompileDiagnostic> {
        self.first_error.as_ref()
    }

    /// Rewrite one output line and remember the first error in it.
    ///
    /// Verbose mode returns the line untouched, but the remembered error is
    /// placed and renamed either way.
    pub fn process(&mut self, raw: &str) -> String {
        let mut line = if self.verbose {
            raw.to_string()
        } else {
            raw.replace(&self.build_prefix, "")
        };

        if let Some(caps) = ERROR_FORMAT.captures(&line) {
            let file = caps[1].to_string();
            let line_no: usize = caps[2].parse().unwrap_or(0);
            let reported = caps[4].trim().to_string();

            let (message, detail) = match FeedbackAnalyzer::rename(&reported) {
                Some(r) => (r.headline.to_string(), r.detail),
                None => (reported, ""),
            };

            let placed = if self.sketch_stage {
                self.source_map
                    .locate(&file, line_no)
                    .map(|(tab, l)| (tab.file_name.clone(), tab.display_name.clone(), l))
            } else {
                None
            };

            let diagnostic = match &placed {
                Some((tab, _, tab_line)) => CompileDiagnostic {
                    file: Some(tab.clone()),
                    line: Some(*tab_line),
                    message: message.clone(),
                    tab: Some(tab.clone()),
                },
                None => CompileDiagnostic {
                    file: Some(file),
                    line: Some(line_no),
                    message: message.clone(),
                    tab: None,
                },
            };

            if let Some((_, display, tab_line)) = &placed
                && !self.verbose
            {
                line = format!("{display}:{tab_line}: error: {message}{detail}");
            }
            if self.first_error.is_none() {
                self.first_error = Some(diagnostic);
            }
        }

        if let Some(hint) = FeedbackAnalyzer::link_hint(&line)
            && self.first_error.is_none()
        {
            self.first_error = Some(CompileDiagnostic {
                file: None,
                line: None,
                message: hint.to_string(),
                tab: None,
            });
        }

        line
    }
}
