//! Program size check against the board's flash and RAM ceilings.

use regex::Regex;

use crate::error::{BuildError, Result};
use crate::prefs::PreferencesMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeReport {
    pub text: u64,
    pub data: Option<u64>,
    pub eeprom: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeLimits {
    pub max_text: u64,
    pub max_data: Option<u64>,
    pub warn_data_percentage: u64,
}

impl SizeLimits {
    /// `None` when the board declares no program size ceiling.
    pub fn from_prefs(prefs: &PreferencesMap) -> Result<Option<SizeLimits>> {
        let Some(max_text) = prefs.get("upload.maximum_size").filter(|v| !v.is_empty()) else {
            return Ok(None);
        };
        let max_text = parse_number("upload.maximum_size", max_text)?;
        let max_data = match prefs.get("upload.maximum_data_size").filter(|v| !v.is_empty()) {
            Some(v) => Some(parse_number("upload.maximum_data_size", v)?),
            None => None,
        };
        let warn_data_percentage = parse_number(
            "build.warn_data_percentage",
            prefs.get_or("build.warn_data_percentage", "75"),
        )?;
        Ok(Some(SizeLimits {
            max_text,
            max_data,
            warn_data_percentage,
        }))
    }
}

fn parse_number(key: &str, value: &str) -> Result<u64> {
    value
        .trim()
        .parse()
        .map_err(|_| BuildError::config(format!("{key} is not a number: '{value}'")))
}

/// Sum group 1 of every line matching each size regex.
pub fn parse_size_output(output: &str, prefs: &PreferencesMap) -> Result<SizeReport> {
    let text_re = compile(prefs.get_or_err("recipe.size.regex")?)?;
    let data_re = optional_regex(prefs, "recipe.size.regex.data")?;
    let eeprom_re = optional_regex(prefs, "recipe.size.regex.eeprom")?;

    let mut text = 0;
    let mut data = data_re.as_ref().map(|_| 0);
    let mut eeprom = eeprom_re.as_ref().map(|_| 0);

    for line in output.lines() {
        text += capture(&text_re, line);
        if let (Some(re), Some(total)) = (&data_re, data.as_mut()) {
            *total += capture(re, line);
        }
        if let (Some(re), Some(total)) = (&eeprom_re, eeprom.as_mut()) {
            *total += capture(re, line);
        }
    }
    Ok(SizeReport { text, data, eeprom })
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern)
        .map_err(|e| BuildError::config(format!("invalid size regex '{pattern}': {e}")))
}

fn optional_regex(prefs: &PreferencesMap, key: &str) -> Result<Option<Regex>> {
    match prefs.get(key).filter(|p| !p.is_empty()) {
        Some(pattern) => compile(pattern).map(Some),
        None => Ok(None),
    }
}

fn capture(re: &Regex, line: &str) -> u64 {
    re.captures(line)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().trim().parse().ok())
        .unwrap_or(0)
}

/// "Sketch uses ..." lines for the console.
pub fn usage(report: &SizeReport, limits: &SizeLimits) -> Vec<String> {
    let mut lines = vec![format!(
        "Sketch uses {} bytes ({}%) of program storage space. Maximum is {} bytes.",
        report.text,
        percent(report.text, limits.max_text),
        limits.max_text
    )];
    if let (Some(data), Some(max_data)) = (report.data, limits.max_data) {
        lines.push(format!(
            "Global variables use {} bytes ({}%) of dynamic memory, leaving {} bytes for local variables. Maximum is {} bytes.",
            data,
            percent(data, max_data),
            max_data.saturating_sub(data),
            max_data
        ));
    }
    lines
}

/// Fail when a ceiling is exceeded; a passing check may still carry a
/// low-memory warning.
pub fn check(report: &SizeReport, limits: &SizeLimits) -> Result<Option<String>> {
    if report.text > limits.max_text {
        return Err(BuildError::SizeLimit {
            detail: "Sketch too big; see http://www.arduino.cc/en/Guide/Troubleshooting#size for tips on reducing it.".to_string(),
        });
    }

    let (Some(data), Some(max_data)) = (report.data, limits.max_data) else {
        return Ok(None);
    };
    if data > max_data {
        return Err(BuildError::SizeLimit {
            detail: "Not enough memory; see http://www.arduino.cc/en/Guide/Troubleshooting#size for tips on reducing your footprint.".to_string(),
        });
    }
    if data * 100 > max_data * limits.warn_data_percentage {
        return Ok(Some(
            "Low memory available, stability problems may occur.".to_string(),
        ));
    }
    Ok(None)
}

fn percent(value: u64, max: u64) -> u64 {
    if max == 0 { 0 } else { value * 100 / max }
}
