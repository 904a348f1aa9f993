//! Dotted-key preference maps.
//!
//! Every layer of build configuration (global defaults, `platform.txt`,
//! `boards.txt` fragments, menu options) is a [`PreferencesMap`]. Layers are
//! merged right-biased with [`PreferencesMap::put_all`].
//!
//! ## File format
//!
//! ```text
//! # comment
//! uno.name=Arduino Uno
//! uno.build.mcu=atmega328p
//! tools.avrdude.cmd.path.linux={runtime.tools.avrdude.path}/bin/avrdude
//! ```
//!
//! Keys suffixed with `.linux`, `.windows` or `.macosx` only apply on the
//! matching host and replace the un-suffixed key there.

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::BuildError;
use crate::platform::HostPlatform;

const OS_SUFFIXES: [&str; 3] = [".linux", ".windows", ".macosx"];

fn host_suffix() -> String {
    format!(".{}", HostPlatform::current().key_suffix())
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PreferencesMap {
    map: BTreeMap<String, String>,
}

impl PreferencesMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse definition-file text, applying host OS overrides.
    pub fn parse(text: &str) -> Self {
        let mut prefs = Self::new();
        let mut os_overrides = Vec::new();
        let host = host_suffix();

        for raw in text.lines() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let key = key.trim();
            let value = value.trim();

            if let Some(suffix) = OS_SUFFIXES.iter().find(|s| key.ends_with(*s)) {
                if *suffix == host {
                    let base = &key[..key.len() - suffix.len()];
                    os_overrides.push((base.to_string(), value.to_string()));
                }
                continue;
            }
            prefs.put(key, value);
        }

        // host-specific values win regardless of their position in the file
        for (key, value) in os_overrides {
            prefs.map.insert(key, value);
        }
        prefs
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Ok(Self::parse(&text))
    }

    pub fn put(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.map.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.map.get(key).map(String::as_str)
    }

    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    /// Required lookup used by recipe consumers.
    pub fn get_or_err(&self, key: &str) -> Result<&str, BuildError> {
        self.get(key).ok_or_else(|| BuildError::Configuration {
            detail: format!("missing required preference '{key}'"),
        })
    }

    pub fn get_bool(&self, key: &str) -> bool {
        self.get(key).is_some_and(is_truthy)
    }

    /// A non-empty value interpreted as a filesystem path.
    pub fn get_path(&self, key: &str) -> Option<PathBuf> {
        self.get(key).filter(|v| !v.is_empty()).map(PathBuf::from)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.map.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.map.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.map.keys().map(String::as_str)
    }

    /// Merge `other` on top of `self`; colliding keys take `other`'s value.
    pub fn put_all(&mut self, other: &PreferencesMap) {
        for (k, v) in &other.map {
            self.map.insert(k.clone(), v.clone());
        }
    }

    /// Keys under `prefix.` with the prefix stripped.
    pub fn sub_tree(&self, prefix: &str) -> PreferencesMap {
        let dotted = format!("{prefix}.");
        let map = self
            .map
            .iter()
            .filter_map(|(k, v)| {
                k.strip_prefix(&dotted)
                    .map(|rest| (rest.to_string(), v.clone()))
            })
            .collect();
        PreferencesMap { map }
    }

    /// Split `a.b.c=v` entries into `{a: {b.c=v}}`. Keys without a dot are
    /// dropped.
    pub fn first_level_map(&self) -> BTreeMap<String, PreferencesMap> {
        let mut out: BTreeMap<String, PreferencesMap> = BTreeMap::new();
        for (k, v) in &self.map {
            if let Some((head, rest)) = k.split_once('.') {
                out.entry(head.to_string())
                    .or_default()
                    .put(rest.to_string(), v.clone());
            }
        }
        out
    }

    pub fn keys_with_prefix<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = &'a str> {
        self.map
            .keys()
            .map(String::as_str)
            .filter(move |k| k.starts_with(prefix))
    }
}

impl FromIterator<(String, String)> for PreferencesMap {
    fn from_iter<I: IntoIterator<Item = (String, String)>>(iter: I) -> Self {
        Self {
            map: iter.into_iter().collect(),
        }
    }
}

pub fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "yes" | "1" | "on"
    )
}

/// Top-level ids in the order they first appear in definition-file text.
///
/// `boards.txt` declares boards and menus in a meaningful order that a
/// sorted map loses, so the catalog recovers it from the raw text.
pub fn declaration_order(text: &str) -> Vec<String> {
    let mut seen = Vec::new();
    for raw in text.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, _)) = line.split_once('=') else {
            continue;
        };
        if let Some((head, _)) = key.trim().split_once('.')
            && !seen.iter().any(|s: &String| s == head)
        {
            seen.push(head.to_string());
        }
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_skips_comments_and_blank_lines() {
        let prefs = PreferencesMap::parse("# header\n\nname = Uno \nbroken line\nbuild.mcu=atmega328p\n");
        assert_eq!(prefs.len(), 2);
        assert_eq!(prefs.get("name"), Some("Uno"));
        assert_eq!(prefs.get("build.mcu"), Some("atmega328p"));
    }

    #[test]
    fn test_value_may_contain_equals() {
        let prefs = PreferencesMap::parse("compiler.c.flags=-DFOO=1 -Os");
        assert_eq!(prefs.get("compiler.c.flags"), Some("-DFOO=1 -Os"));
    }

    #[test]
    fn test_os_suffix_overrides_base_key() {
        let text = format!("tool.cmd{}=host\ntool.cmd=generic\ntool.other.nonexistent_os=x", host_suffix());
        let prefs = PreferencesMap::parse(&text);
        assert_eq!(prefs.get("tool.cmd"), Some("host"));

        let foreign = OS_SUFFIXES.iter().find(|s| **s != host_suffix()).unwrap();
        let prefs = PreferencesMap::parse(&format!("tool.cmd=generic\ntool.cmd{foreign}=foreign"));
        assert_eq!(prefs.get("tool.cmd"), Some("generic"));
        assert_eq!(prefs.len(), 1);
    }

    #[test]
    fn test_merge_is_right_biased() {
        let mut l1 = PreferencesMap::parse("k=one\nonly.left=a");
        let l2 = PreferencesMap::parse("k=two\nonly.right=b");
        l1.put_all(&l2);
        assert_eq!(l1.get("k"), Some("two"));
        assert_eq!(l1.get("only.left"), Some("a"));
        assert_eq!(l1.get("only.right"), Some("b"));
    }

    #[test]
    fn test_sub_tree_and_first_level_map() {
        let prefs = PreferencesMap::parse(
            "uno.name=Uno\nuno.build.mcu=atmega328p\nmega.name=Mega\nmenu.cpu=Processor",
        );
        let uno = prefs.sub_tree("uno");
        assert_eq!(uno.get("build.mcu"), Some("atmega328p"));
        assert!(uno.get("uno.name").is_none());

        let levels = prefs.first_level_map();
        assert_eq!(levels.len(), 3);
        assert_eq!(levels["mega"].get("name"), Some("Mega"));
        assert_eq!(levels["menu"].get("cpu"), Some("Processor"));
    }

    #[test]
    fn test_declaration_order_keeps_file_order() {
        let order = declaration_order("menu.cpu=CPU\nzeta.name=Z\nalpha.name=A\nzeta.build.mcu=x");
        assert_eq!(order, vec!["menu", "zeta", "alpha"]);
    }

    #[test]
    fn test_get_bool() {
        let prefs = PreferencesMap::parse("a=true\nb=no\nc=1");
        assert!(prefs.get_bool("a"));
        assert!(!prefs.get_bool("b"));
        assert!(prefs.get_bool("c"));
        assert!(!prefs.get_bool("missing"));
    }
}
