//! Preference resolution: merges every configuration layer for one board
//! into a single flat map.
//!
//! Priority, lowest first:
//!
//! 1. global defaults (built-ins, tool paths, `[preferences]`)
//! 2. the core platform, when `build.core` names another package
//! 3. the board's own platform
//! 4. the board
//! 5. selected menu options, in menu declaration order
//!
//! Derived keys (`build.core.path`, `build.variant.path`, ...) are added last.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::BoardSelection;
use crate::error::{BuildError, Result};
use crate::hardware::{BoardId, Catalog, PlatformId};
use crate::prefs::PreferencesMap;

pub const IDE_VERSION: &str = "10800";

/// Keys a recipe may reference even when no layer defines them.
const OPTIONAL_KEYS: [&str; 11] = [
    "build.extra_flags",
    "build.variant.path",
    "compiler.path",
    "compiler.warning_flags",
    "compiler.c.extra_flags",
    "compiler.cpp.extra_flags",
    "compiler.S.extra_flags",
    "compiler.c.elf.extra_flags",
    "compiler.ar.extra_flags",
    "compiler.objcopy.eep.extra_flags",
    "compiler.elf2hex.extra_flags",
];

/// Built-in defaults, overridable by anything else.
pub fn default_preferences() -> PreferencesMap {
    let mut p = PreferencesMap::new();
    p.put("build.warn_data_percentage", "75");
    p.put("build.sketch_prelude", "#include <Arduino.h>");
    p.put("runtime.ide.version", IDE_VERSION);
    p.put("compiler.warning_flags.none", "-w");
    p.put("compiler.warning_flags.default", "");
    p.put("compiler.warning_flags.more", "-Wall");
    p.put("compiler.warning_flags.all", "-Wall -Wextra");
    p
}

/// The merged configuration plus anything worth telling the user.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub board: BoardId,
    pub platform: PlatformId,
    pub preferences: PreferencesMap,
    pub warnings: Vec<String>,
}

pub fn resolve(
    catalog: &Catalog,
    selection: Option<&BoardSelection>,
    globals: &PreferencesMap,
    build_path: &Path,
    sketch_folder: &Path,
) -> Result<Resolved> {
    let selection = selection.ok_or_else(|| {
        BuildError::config("No board selected; please choose a board (set [board] in inoc.toml or pass --fqbn)")
    })?;
    let board_id = catalog
        .find_board(&selection.package, &selection.arch, &selection.board)
        .ok_or_else(|| {
            BuildError::config(format!(
                "Board {}:{}:{} is not installed",
                selection.package, selection.arch, selection.board
            ))
        })?;
    let board = catalog.board(board_id);
    let platform_id = board.platform;
    let platform = catalog.platform(platform_id);
    let mut warnings = Vec::new();

    let board_prefs = board_with_menus(catalog, board_id, selection)?;

    // build.core may be "otherpkg:core"
    let core_spec = board_prefs.get_or("build.core", "arduino").to_string();
    let (core_platform, core) = match core_spec.split_once(':') {
        Some((pkg, core)) => {
            let id = catalog.find_platform(pkg, &platform.id).ok_or_else(|| {
                BuildError::config(format!(
                    "Selected board depends on '{pkg}' core (not installed)."
                ))
            })?;
            (Some(id), core.to_string())
        }
        None => (None, core_spec.clone()),
    };

    let mut p = globals.clone();
    if let Some(id) = core_platform {
        p.put_all(&catalog.platform(id).preferences);
    }
    p.put_all(&platform.preferences);
    p.put_all(&board_prefs);

    let core_folder = core_platform
        .map(|id| catalog.platform(id).folder.clone())
        .unwrap_or_else(|| platform.folder.clone());
    let hardware_folder = catalog.package(platform.package).folder.clone();

    p.put("build.path", path_str(build_path));
    p.put("build.project_name", format!("{}.cpp", sketch_name(sketch_folder)));
    p.put("build.source.path", path_str(sketch_folder));
    p.put("build.arch", platform.id.to_uppercase());
    p.put("build.core", core.as_str());
    p.put(
        "build.core.path",
        path_str(&core_folder.join("cores").join(&core)),
    );
    p.put("build.system.path", path_str(&core_folder.join("system")));
    p.put("runtime.platform.path", path_str(&platform.folder));
    p.put("runtime.hardware.path", path_str(&hardware_folder));
    if !p.contains_key("runtime.ide.version") {
        p.put("runtime.ide.version", IDE_VERSION);
    }

    let variant = p.get_or("build.variant", "").to_string();
    let variant_path = if variant.is_empty() {
        String::new()
    } else {
        let (folder, name) = match variant.split_once(':') {
            Some((pkg, name)) => {
                let id = catalog.find_platform(pkg, &platform.id).ok_or_else(|| {
                    BuildError::config(format!(
                        "Selected board depends on '{pkg}' core (not installed)."
                    ))
                })?;
                (catalog.platform(id).folder.clone(), name.to_string())
            }
            None => (platform.folder.clone(), variant.clone()),
        };
        path_str(&folder.join("variants").join(name))
    };
    p.put("build.variant.path", variant_path);

    put_time_keys(&mut p);

    if !p.contains_key("compiler.path") {
        warnings.push(
            "Third-party platform.txt does not define compiler.path. Please report this to the third-party hardware maintainer."
                .to_string(),
        );
    }
    for key in OPTIONAL_KEYS {
        if !p.contains_key(key) {
            p.put(key, "");
        }
    }

    Ok(Resolved {
        board: board_id,
        platform: platform_id,
        preferences: p,
        warnings,
    })
}

/// Board fragment with the selected menu options applied and `name`
/// extended with their labels.
fn board_with_menus(
    catalog: &Catalog,
    board_id: BoardId,
    selection: &BoardSelection,
) -> Result<PreferencesMap> {
    let board = catalog.board(board_id);
    let platform = catalog.platform(board.platform);
    let mut prefs = board.preferences.clone();
    let mut name = board.name().to_string();

    for (menu, option) in &selection.menus {
        if !board.has_menu(menu) {
            return Err(BuildError::config(format!(
                "Board {} has no menu '{menu}'",
                catalog.fqbn(board_id)
            )));
        }
        if board.menu_option(menu, option).is_none() {
            return Err(BuildError::config(format!(
                "Board {} has no option '{option}' in menu '{menu}'",
                catalog.fqbn(board_id)
            )));
        }
    }

    // platform declaration order first, then menus only the board knows
    let mut menu_ids: Vec<&str> = platform
        .menus
        .iter()
        .map(|(id, _)| id.as_str())
        .filter(|id| board.has_menu(id))
        .collect();
    for id in board.menu_options.keys() {
        if !menu_ids.contains(&id.as_str()) {
            menu_ids.push(id);
        }
    }

    for menu_id in menu_ids {
        let Some((_, option_id)) = selection.menus.iter().find(|(m, _)| m == menu_id) else {
            continue;
        };
        if let Some(option) = board.menu_option(menu_id, option_id) {
            prefs.put_all(&option.preferences);
            name.push_str(", ");
            name.push_str(&option.label);
        }
    }
    prefs.put("name", name);
    Ok(prefs)
}

fn put_time_keys(p: &mut PreferencesMap) {
    let utc = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0);
    let zone: i64 = p.get("extra.time.zone").and_then(|z| z.parse().ok()).unwrap_or(0);
    let dst: i64 = p.get("extra.time.dst").and_then(|d| d.parse().ok()).unwrap_or(0);
    p.put("extra.time.utc", utc.to_string());
    p.put("extra.time.local", (utc + zone + dst).to_string());
    p.put("extra.time.zone", zone.to_string());
    p.put("extra.time.dst", dst.to_string());
}

fn path_str(path: &Path) -> String {
    path.to_string_lossy().to_string()
}

fn sketch_name(folder: &Path) -> String {
    folder
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn write(path: PathBuf, text: &str) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, text).unwrap();
    }

    fn fixture() -> (TempDir, Catalog) {
        let tmp = TempDir::new().unwrap();
        let hw = tmp.path().join("hardware");
        write(
            hw.join("arduino/avr/boards.txt"),
            "menu.cpu=Processor\n\
             uno.name=Arduino Uno\n\
             uno.build.mcu=atmega328p\n\
             uno.build.variant=standard\n\
             uno.upload.maximum_size=32256\n\
             diecimila.name=Arduino Diecimila\n\
             diecimila.build.variant=standard\n\
             diecimila.menu.cpu.atmega328=ATmega328P\n\
             diecimila.menu.cpu.atmega328.build.mcu=atmega328p\n\
             diecimila.menu.cpu.atmega168=ATmega168\n\
             diecimila.menu.cpu.atmega168.build.mcu=atmega168\n",
        );
        write(
            hw.join("arduino/avr/platform.txt"),
            "compiler.path=/usr/bin/\ncompiler.c.flags=-Os\nbuild.mcu=platform-default\n",
        );
        write(
            hw.join("thirdparty/avr/boards.txt"),
            "myboard.name=My Board\nmyboard.build.core=arduino:arduino\nmyboard.build.variant=arduino:standard\n",
        );
        write(hw.join("thirdparty/avr/platform.txt"), "compiler.c.flags=-O2\n");
        write(hw.join("orphan/avr/boards.txt"), "lost.name=Lost\nlost.build.core=nobody:core\n");
        let catalog = Catalog::load(&[hw], &[]);
        (tmp, catalog)
    }

    fn select(fqbn: &str) -> BoardSelection {
        BoardSelection::parse_fqbn(fqbn).unwrap()
    }

    #[test]
    fn test_board_overrides_platform_and_derives_paths() {
        let (tmp, catalog) = fixture();
        let r = resolve(
            &catalog,
            Some(&select("arduino:avr:uno")),
            &default_preferences(),
            Path::new("/tmp/build"),
            Path::new("/sketches/Blink"),
        )
        .unwrap();
        let p = &r.preferences;
        assert_eq!(p.get("build.mcu"), Some("atmega328p"));
        assert_eq!(p.get("build.arch"), Some("AVR"));
        assert_eq!(p.get("build.core"), Some("arduino"));
        assert_eq!(p.get("build.project_name"), Some("Blink.cpp"));
        let avr = tmp.path().join("hardware/arduino/avr");
        assert_eq!(p.get_path("build.core.path"), Some(avr.join("cores/arduino")));
        assert_eq!(p.get_path("build.variant.path"), Some(avr.join("variants/standard")));
        assert_eq!(p.get("build.extra_flags"), Some(""));
        assert!(p.contains_key("extra.time.utc"));
        assert!(r.warnings.is_empty());
    }

    #[test]
    fn test_menu_option_wins_and_extends_name() {
        let (_tmp, catalog) = fixture();
        let r = resolve(
            &catalog,
            Some(&select("arduino:avr:diecimila:cpu=atmega168")),
            &default_preferences(),
            Path::new("/b"),
            Path::new("/s/Blink"),
        )
        .unwrap();
        assert_eq!(r.preferences.get("build.mcu"), Some("atmega168"));
        assert_eq!(r.preferences.get("name"), Some("Arduino Diecimila, ATmega168"));
    }

    #[test]
    fn test_board_menu_without_platform_label_is_applied() {
        let tmp = TempDir::new().unwrap();
        write(
            tmp.path().join("hw/p/avr/boards.txt"),
            "b.name=B\n\
             b.build.mcu=base\n\
             b.menu.cpu.fast=Fast\n\
             b.menu.cpu.fast.build.mcu=fastmcu\n\
             b.menu.cpu.slow=Slow\n\
             b.menu.cpu.slow.build.mcu=slowmcu\n",
        );
        let catalog = Catalog::load(&[tmp.path().join("hw")], &[]);
        let r = resolve(
            &catalog,
            Some(&select("p:avr:b:cpu=fast")),
            &PreferencesMap::new(),
            Path::new("/b"),
            Path::new("/s/x"),
        )
        .unwrap();
        assert_eq!(r.preferences.get("build.mcu"), Some("fastmcu"));
        assert_eq!(r.preferences.get("name"), Some("B, Fast"));
    }

    #[test]
    fn test_unknown_menu_option_is_configuration_error() {
        let (_tmp, catalog) = fixture();
        let err = resolve(
            &catalog,
            Some(&select("arduino:avr:diecimila:cpu=atmega2560")),
            &default_preferences(),
            Path::new("/b"),
            Path::new("/s/Blink"),
        )
        .unwrap_err();
        assert!(matches!(err, BuildError::Configuration { .. }));
    }

    #[test]
    fn test_referenced_core_platform_is_lowest_priority() {
        let (tmp, catalog) = fixture();
        let r = resolve(
            &catalog,
            Some(&select("thirdparty:avr:myboard")),
            &default_preferences(),
            Path::new("/b"),
            Path::new("/s/Blink"),
        )
        .unwrap();
        let p = &r.preferences;
        // own platform beats the referenced core platform
        assert_eq!(p.get("compiler.c.flags"), Some("-O2"));
        // inherited from the core platform
        assert_eq!(p.get("compiler.path"), Some("/usr/bin/"));
        let avr = tmp.path().join("hardware/arduino/avr");
        assert_eq!(p.get_path("build.core.path"), Some(avr.join("cores/arduino")));
        assert_eq!(p.get_path("build.variant.path"), Some(avr.join("variants/standard")));
    }

    #[test]
    fn test_missing_core_package_and_missing_board() {
        let (_tmp, catalog) = fixture();
        let globals = default_preferences();
        let err = resolve(&catalog, Some(&select("orphan:avr:lost")), &globals, Path::new("/b"), Path::new("/s/x"))
            .unwrap_err();
        assert!(err.to_string().contains("nobody"));

        assert!(resolve(&catalog, Some(&select("arduino:avr:mega")), &globals, Path::new("/b"), Path::new("/s/x")).is_err());
        assert!(resolve(&catalog, None, &globals, Path::new("/b"), Path::new("/s/x")).is_err());
    }

    #[test]
    fn test_missing_compiler_path_warns() {
        let tmp = TempDir::new().unwrap();
        write(tmp.path().join("hw/p/arm/boards.txt"), "b.name=B\n");
        let catalog = Catalog::load(&[tmp.path().join("hw")], &[]);
        let r = resolve(&catalog, Some(&select("p:arm:b")), &PreferencesMap::new(), Path::new("/b"), Path::new("/s/x"))
            .unwrap();
        assert_eq!(r.warnings.len(), 1);
        assert_eq!(r.preferences.get("compiler.path"), Some(""));
        assert_eq!(r.preferences.get("build.variant.path"), Some(""));
    }
}
