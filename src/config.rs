//! Project configuration.
//!
//! `inoc.toml` sits next to the sketch; an optional `settings.toml` in the
//! host settings folder supplies defaults. Tables are merged key by key with
//! the sketch file winning.
//!
//! ```toml
//! [board]
//! fqbn = "arduino:avr:diecimila:cpu=atmega168"
//!
//! [paths]
//! hardware = ["/opt/arduino/hardware"]
//! libraries = ["~/Arduino/libraries"]
//!
//! [build]
//! verbose = false
//! warning_level = "default"
//!
//! [preferences]
//! "build.warn_data_percentage" = "80"
//! ```

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::platform::HostPlatform;

pub const CONFIG_FILE: &str = "inoc.toml";
pub const SETTINGS_FILE: &str = "settings.toml";

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(default)]
pub struct InocConfig {
    pub board: BoardConfig,
    pub paths: PathsConfig,
    pub build: BuildConfig,
    /// Extra global defaults, lowest priority.
    pub preferences: BTreeMap<String, String>,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(default)]
pub struct BoardConfig {
    pub fqbn: Option<String>,
    pub package: Option<String>,
    pub platform: Option<String>,
    pub board: Option<String>,
    pub menus: BTreeMap<String, String>,
}

#[derive(Deserialize, Debug, Default, Clone)]
#[serde(default)]
pub struct PathsConfig {
    pub hardware: Vec<PathBuf>,
    pub packages: Vec<PathBuf>,
    pub libraries: Vec<PathBuf>,
    pub build: Option<PathBuf>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct BuildConfig {
    pub verbose: bool,
    pub warning_level: String,
    pub parallel: bool,
    pub export: bool,
    pub fingerprint_prefixes: Vec<String>,
    pub line_timeout_ms: u64,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            verbose: false,
            warning_level: "none".to_string(),
            parallel: false,
            export: false,
            fingerprint_prefixes: default_fingerprint_prefixes(),
            line_timeout_ms: 100,
        }
    }
}

pub fn default_fingerprint_prefixes() -> Vec<String> {
    ["build.", "compiler.", "recipe."]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// A resolved board choice: `package:arch:board` plus menu selections.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardSelection {
    pub package: String,
    pub arch: String,
    pub board: String,
    pub menus: Vec<(String, String)>,
}

impl BoardSelection {
    /// Parse `package:arch:board[:menu=option,...]`.
    pub fn parse_fqbn(fqbn: &str) -> Result<BoardSelection> {
        let parts: Vec<&str> = fqbn.trim().splitn(4, ':').collect();
        if parts.len() < 3 || parts[..3].iter().any(|p| p.is_empty()) {
            bail!("Invalid board name '{fqbn}', expected package:arch:board[:menu=option,...]");
        }
        let mut menus = Vec::new();
        if let Some(options) = parts.get(3) {
            for pair in options.split(',').filter(|p| !p.trim().is_empty()) {
                let Some((menu, option)) = pair.split_once('=') else {
                    bail!("Invalid menu selection '{pair}' in '{fqbn}'");
                };
                menus.push((menu.trim().to_string(), option.trim().to_string()));
            }
        }
        Ok(BoardSelection {
            package: parts[0].to_string(),
            arch: parts[1].to_string(),
            board: parts[2].to_string(),
            menus,
        })
    }

    pub fn fqbn(&self) -> String {
        let base = format!("{}:{}:{}", self.package, self.arch, self.board);
        if self.menus.is_empty() {
            return base;
        }
        let menus: Vec<String> = self.menus.iter().map(|(m, o)| format!("{m}={o}")).collect();
        format!("{base}:{}", menus.join(","))
    }

    /// Set or replace a menu selection.
    pub fn select(&mut self, menu: &str, option: &str) {
        match self.menus.iter_mut().find(|(m, _)| m == menu) {
            Some(entry) => entry.1 = option.to_string(),
            None => self.menus.push((menu.to_string(), option.to_string())),
        }
    }
}

impl InocConfig {
    /// The board this project builds for, if one is configured.
    pub fn board_selection(&self) -> Result<Option<BoardSelection>> {
        let b = &self.board;
        let mut selection = match (&b.fqbn, &b.package, &b.platform, &b.board) {
            (Some(fqbn), ..) => BoardSelection::parse_fqbn(fqbn)?,
            (None, Some(package), Some(arch), Some(board)) => BoardSelection {
                package: package.clone(),
                arch: arch.clone(),
                board: board.clone(),
                menus: Vec::new(),
            },
            (None, None, None, None) => return Ok(None),
            _ => bail!("[board] needs either `fqbn` or all of `package`, `platform` and `board`"),
        };
        for (menu, option) in &b.menus {
            selection.select(menu, option);
        }
        Ok(Some(selection))
    }

    /// Build folder for `sketch_folder`: configured, or a stable temp folder.
    pub fn build_path(&self, sketch_folder: &Path) -> PathBuf {
        match &self.paths.build {
            Some(path) => path.clone(),
            None => default_build_path(sketch_folder),
        }
    }

    fn resolve_relative(&mut self, base: &Path) {
        let fix = |p: &mut PathBuf| {
            let from_home = p
                .to_str()
                .and_then(|s| s.strip_prefix("~/"))
                .and_then(|rest| dirs::home_dir().map(|h| h.join(rest)));
            if let Some(expanded) = from_home {
                *p = expanded;
            } else if p.is_relative() {
                *p = base.join(&*p);
            }
        };
        self.paths.hardware.iter_mut().for_each(fix);
        self.paths.packages.iter_mut().for_each(fix);
        self.paths.libraries.iter_mut().for_each(fix);
        if let Some(build) = self.paths.build.as_mut() {
            fix(build);
        }
    }
}

pub fn default_build_path(sketch_folder: &Path) -> PathBuf {
    let digest = Sha256::digest(sketch_folder.to_string_lossy().as_bytes());
    let hex: String = digest.iter().map(|b| format!("{b:02x}")).collect();
    std::env::temp_dir().join(format!("inoc-build-{}", &hex[..16]))
}

/// Load `settings.toml` (if any) and the sketch's `inoc.toml` (if any).
pub fn load_config(sketch_folder: &Path, host: HostPlatform) -> Result<InocConfig> {
    let mut merged = toml::Table::new();

    if let Some(settings) = host.settings_folder().map(|d| d.join(SETTINGS_FILE)) {
        merge_tables(&mut merged, read_table(&settings)?);
    }
    merge_tables(&mut merged, read_table(&sketch_folder.join(CONFIG_FILE))?);

    let mut config: InocConfig = toml::Value::Table(merged)
        .try_into()
        .context("Failed to parse configuration")?;
    config.resolve_relative(sketch_folder);
    Ok(config)
}

pub fn parse_config(text: &str) -> Result<InocConfig> {
    toml::from_str(text).context("Failed to parse inoc.toml")
}

fn read_table(path: &Path) -> Result<toml::Table> {
    if !path.exists() {
        return Ok(toml::Table::new());
    }
    let text = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    toml::from_str::<toml::Table>(&text)
        .with_context(|| format!("Failed to parse {}", path.display()))
}

fn merge_tables(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                merge_tables(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_fqbn_with_menus() {
        let sel = BoardSelection::parse_fqbn("arduino:avr:diecimila:cpu=atmega168,speed=16").unwrap();
        assert_eq!(sel.package, "arduino");
        assert_eq!(sel.arch, "avr");
        assert_eq!(sel.board, "diecimila");
        assert_eq!(
            sel.menus,
            vec![
                ("cpu".to_string(), "atmega168".to_string()),
                ("speed".to_string(), "16".to_string())
            ]
        );
        assert_eq!(sel.fqbn(), "arduino:avr:diecimila:cpu=atmega168,speed=16");
    }

    #[test]
    fn test_parse_fqbn_rejects_short_names() {
        assert!(BoardSelection::parse_fqbn("arduino:avr").is_err());
        assert!(BoardSelection::parse_fqbn("arduino::uno").is_err());
        assert!(BoardSelection::parse_fqbn("a:b:c:cpu").is_err());
    }

    #[test]
    fn test_defaults() {
        let config = parse_config("").unwrap();
        assert!(!config.build.verbose);
        assert_eq!(config.build.warning_level, "none");
        assert_eq!(config.build.fingerprint_prefixes, vec!["build.", "compiler.", "recipe."]);
        assert!(config.board_selection().unwrap().is_none());
    }

    #[test]
    fn test_explicit_board_fields_and_menu_table() {
        let config = parse_config(
            r#"
[board]
package = "arduino"
platform = "avr"
board = "diecimila"
menus = { cpu = "atmega328" }
"#,
        )
        .unwrap();
        let sel = config.board_selection().unwrap().unwrap();
        assert_eq!(sel.fqbn(), "arduino:avr:diecimila:cpu=atmega328");
    }

    #[test]
    fn test_menu_table_overrides_fqbn_option() {
        let config = parse_config(
            "[board]\nfqbn = \"arduino:avr:diecimila:cpu=atmega168\"\nmenus = { cpu = \"atmega328\" }\n",
        )
        .unwrap();
        let sel = config.board_selection().unwrap().unwrap();
        assert_eq!(sel.menus, vec![("cpu".to_string(), "atmega328".to_string())]);
    }

    #[test]
    fn test_partial_board_is_an_error() {
        let config = parse_config("[board]\npackage = \"arduino\"\n").unwrap();
        assert!(config.board_selection().is_err());
    }

    #[test]
    fn test_merge_tables_is_deep() {
        let mut base: toml::Table =
            toml::from_str("[build]\nverbose = true\nparallel = true\n").unwrap();
        let overlay: toml::Table = toml::from_str("[build]\nverbose = false\n").unwrap();
        merge_tables(&mut base, overlay);
        let config: InocConfig = toml::Value::Table(base).try_into().unwrap();
        assert!(!config.build.verbose);
        assert!(config.build.parallel);
    }

    #[test]
    fn test_load_resolves_relative_paths() {
        let tmp = tempfile::TempDir::new().unwrap();
        fs::write(
            tmp.path().join(CONFIG_FILE),
            "[paths]\nhardware = [\"hw\"]\nbuild = \"out\"\n",
        )
        .unwrap();
        let config = load_config(tmp.path(), HostPlatform::current()).unwrap();
        assert_eq!(config.paths.hardware, vec![tmp.path().join("hw")]);
        assert_eq!(config.build_path(tmp.path()), tmp.path().join("out"));
    }

    #[test]
    fn test_default_build_path_is_stable() {
        let a = default_build_path(Path::new("/sketches/Blink"));
        let b = default_build_path(Path::new("/sketches/Blink"));
        let c = default_build_path(Path::new("/sketches/Fade"));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.file_name().unwrap().to_string_lossy().starts_with("inoc-build-"));
    }
}
