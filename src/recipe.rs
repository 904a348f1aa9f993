//! Recipe expansion.
//!
//! A recipe is a command template from `platform.txt`:
//!
//! ```text
//! recipe.c.o.pattern="{compiler.path}{compiler.c.cmd}" {compiler.c.flags} "-I{build.core.path}" "{source_file}" -o "{object_file}"
//! ```
//!
//! ## Placeholders
//!
//! - `{name}` - required, a missing key is an error
//! - `{name?}` - optional, empty when missing
//! - `{name?then|else}` - `then` when `name` is true, otherwise `else`
//!
//! Values may themselves contain placeholders, so substitution repeats until
//! nothing changes. The text is then split on whitespace, keeping
//! double-quoted spans together.

use regex::{Captures, Regex};
use std::sync::LazyLock;

use crate::error::{BuildError, Result};
use crate::prefs::{PreferencesMap, is_truthy};

const MAX_PASSES: usize = 10;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{([A-Za-z0-9_.\-]+)(\?([^{}|]*)(?:\|([^{}]*))?)?\}").expect("valid regex")
});

/// Substitute placeholders without splitting.
pub fn replace_from_mapping(template: &str, prefs: &PreferencesMap) -> Result<String> {
    let mut current = template.to_string();

    for _ in 0..MAX_PASSES {
        let next = substitute_once(&current, prefs);
        if next == current {
            break;
        }
        current = next;
    }

    if let Some(caps) = PLACEHOLDER.captures(&current) {
        let name = &caps[1];
        if caps.get(2).is_none() {
            let detail = if prefs.contains_key(name) {
                format!("recipe placeholder '{{{name}}}' expands recursively")
            } else {
                format!("recipe uses undefined key '{{{name}}}' in: {template}")
            };
            return Err(BuildError::config(detail));
        }
    }
    Ok(current)
}

fn substitute_once(text: &str, prefs: &PreferencesMap) -> String {
    PLACEHOLDER
        .replace_all(text, |caps: &Captures| {
            let name = &caps[1];
            let value = prefs.get(name);
            match caps.get(2) {
                None => value.map_or_else(|| caps[0].to_string(), str::to_string),
                Some(_) => {
                    let then = caps.get(3).map_or("", |m| m.as_str());
                    match caps.get(4) {
                        None if then.is_empty() => value.unwrap_or("").to_string(),
                        otherwise => {
                            if value.is_some_and(is_truthy) {
                                then.to_string()
                            } else {
                                otherwise.map_or("", |m| m.as_str()).to_string()
                            }
                        }
                    }
                }
            }
        })
        .into_owned()
}

/// Split on whitespace outside double quotes and strip the quotes.
pub fn split_quoted(text: &str) -> Result<Vec<String>> {
    let mut args = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for c in text.chars() {
        match c {
            '"' => in_quotes = !in_quotes,
            c if c.is_whitespace() && !in_quotes => {
                if !current.is_empty() {
                    args.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }

    if in_quotes {
        return Err(BuildError::config(format!(
            "unterminated quote in command: {text}"
        )));
    }
    if !current.is_empty() {
        args.push(current);
    }
    Ok(args)
}

/// Expand a recipe template into an argument vector.
pub fn expand(template: &str, prefs: &PreferencesMap) -> Result<Vec<String>> {
    let text = replace_from_mapping(template, prefs)?;
    split_quoted(&text)
}

/// Look up `recipe` in `prefs` and expand it.
pub fn expand_key(recipe: &str, prefs: &PreferencesMap) -> Result<Vec<String>> {
    let template = prefs.get_or_err(recipe)?;
    expand(template, prefs)
}
