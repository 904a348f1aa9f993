//! Hardware catalog: packages, platforms, boards, menus and programmers.
//!
//! Two folder layouts are understood:
//!
//! - legacy: `<hardware>/<package>/<arch>/boards.txt`
//! - contributed: `<packages>/<package>/hardware/<arch>/<version>/boards.txt`
//!   (highest version wins), with tools under
//!   `<packages>/<package>/tools/<tool>/<version>/`
//!
//! Everything lives in one [`Catalog`] arena. Boards point at their platform
//! and platforms at their package through ids, never through references.

use anyhow::{Context, Result, bail};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::prefs::{PreferencesMap, declaration_order};

const BOARDS_FILE: &str = "boards.txt";
const PLATFORM_FILE: &str = "platform.txt";
const PLATFORM_LOCAL_FILE: &str = "platform.local.txt";
const PROGRAMMERS_FILE: &str = "programmers.txt";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PackageId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlatformId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BoardId(usize);

#[derive(Debug, Clone)]
pub struct Package {
    pub id: String,
    pub folder: PathBuf,
    pub legacy: bool,
    pub platforms: Vec<PlatformId>,
}

#[derive(Debug, Clone)]
pub struct Platform {
    /// Architecture name, e.g. `avr`.
    pub id: String,
    pub package: PackageId,
    pub folder: PathBuf,
    pub legacy: bool,
    pub version: Option<String>,
    /// `platform.txt` with `platform.local.txt` applied on top.
    pub preferences: PreferencesMap,
    /// Menu id to label, in declaration order.
    pub menus: Vec<(String, String)>,
    pub programmers: BTreeMap<String, PreferencesMap>,
    pub boards: Vec<BoardId>,
}

#[derive(Debug, Clone)]
pub struct MenuOption {
    pub id: String,
    pub label: String,
    pub preferences: PreferencesMap,
}

#[derive(Debug, Clone)]
pub struct Board {
    pub id: String,
    pub platform: PlatformId,
    /// The board fragment without its `menu.*` entries.
    pub preferences: PreferencesMap,
    /// Menu id to the options this board offers for it.
    pub menu_options: BTreeMap<String, Vec<MenuOption>>,
}

impl Board {
    pub fn name(&self) -> &str {
        self.preferences.get_or("name", &self.id)
    }

    pub fn has_menu(&self, menu_id: &str) -> bool {
        self.menu_options.contains_key(menu_id)
    }

    pub fn menu_option(&self, menu_id: &str, option_id: &str) -> Option<&MenuOption> {
        self.menu_options
            .get(menu_id)?
            .iter()
            .find(|o| o.id == option_id)
    }
}

#[derive(Debug, Default)]
pub struct Catalog {
    packages: Vec<Package>,
    platforms: Vec<Platform>,
    boards: Vec<Board>,
    /// `runtime.tools.*` paths discovered in contributed package folders.
    pub tool_preferences: PreferencesMap,
    /// Folders that could not be loaded.
    pub warnings: Vec<String>,
}

struct LoadedPlatform {
    folder: PathBuf,
    legacy: bool,
    version: Option<String>,
    preferences: PreferencesMap,
    menus: Vec<(String, String)>,
    programmers: BTreeMap<String, PreferencesMap>,
    boards: Vec<(String, PreferencesMap, BTreeMap<String, Vec<MenuOption>>)>,
}

#[derive(Default)]
struct LoadedPackage {
    folder: PathBuf,
    legacy: bool,
    platforms: BTreeMap<String, LoadedPlatform>,
}

impl Catalog {
    /// Scan hardware folders (legacy layout) and package folders
    /// (contributed layout). Later folders override earlier ones for the same
    /// package/architecture pair.
    pub fn load(hardware_folders: &[PathBuf], package_folders: &[PathBuf]) -> Catalog {
        let mut staged: BTreeMap<String, LoadedPackage> = BTreeMap::new();
        let mut catalog = Catalog::default();

        for folder in package_folders {
            catalog.scan_contributed(folder, &mut staged);
        }
        for folder in hardware_folders {
            catalog.scan_legacy(folder, &mut staged);
        }

        for (package_id, loaded) in staged {
            let pkg_id = PackageId(catalog.packages.len());
            let mut platform_ids = Vec::new();

            for (arch, platform) in loaded.platforms {
                let plat_id = PlatformId(catalog.platforms.len());
                let mut board_ids = Vec::new();
                for (board_id, prefs, menu_options) in platform.boards {
                    board_ids.push(BoardId(catalog.boards.len()));
                    catalog.boards.push(Board {
                        id: board_id,
                        platform: plat_id,
                        preferences: prefs,
                        menu_options,
                    });
                }
                catalog.platforms.push(Platform {
                    id: arch,
                    package: pkg_id,
                    folder: platform.folder,
                    legacy: platform.legacy,
                    version: platform.version,
                    preferences: platform.preferences,
                    menus: platform.menus,
                    programmers: platform.programmers,
                    boards: board_ids,
                });
                platform_ids.push(plat_id);
            }

            catalog.packages.push(Package {
                id: package_id,
                folder: loaded.folder,
                legacy: loaded.legacy,
                platforms: platform_ids,
            });
        }
        catalog
    }

    fn scan_legacy(&mut self, folder: &Path, staged: &mut BTreeMap<String, LoadedPackage>) {
        for package_dir in sorted_subdirs(folder) {
            let name = dir_name(&package_dir);
            // reserved for toolchains
            if name == "tools" {
                continue;
            }
            for arch_dir in sorted_subdirs(&package_dir) {
                let arch = dir_name(&arch_dir);
                match load_platform(&arch_dir, true, None) {
                    Ok(platform) => {
                        let pkg = staged.entry(name.clone()).or_default();
                        pkg.folder = package_dir.clone();
                        pkg.legacy = true;
                        pkg.platforms.insert(arch, platform);
                    }
                    Err(e) => self.warnings.push(format!(
                        "Error loading hardware folder {}: {e:#}",
                        arch_dir.display()
                    )),
                }
            }
        }
    }

    fn scan_contributed(&mut self, folder: &Path, staged: &mut BTreeMap<String, LoadedPackage>) {
        for package_dir in sorted_subdirs(folder) {
            let name = dir_name(&package_dir);

            for arch_dir in sorted_subdirs(&package_dir.join("hardware")) {
                let Some(version_dir) = latest_version(&arch_dir) else {
                    continue;
                };
                let version = dir_name(&version_dir);
                match load_platform(&version_dir, false, Some(version)) {
                    Ok(platform) => {
                        let pkg = staged.entry(name.clone()).or_default();
                        pkg.folder = package_dir.clone();
                        pkg.platforms.insert(dir_name(&arch_dir), platform);
                    }
                    Err(e) => self.warnings.push(format!(
                        "Error loading hardware folder {}: {e:#}",
                        version_dir.display()
                    )),
                }
            }

            for tool_dir in sorted_subdirs(&package_dir.join("tools")) {
                let tool = dir_name(&tool_dir);
                for version_dir in sorted_subdirs(&tool_dir) {
                    let path = version_dir.to_string_lossy().to_string();
                    self.tool_preferences.put(
                        format!("runtime.tools.{tool}-{}.path", dir_name(&version_dir)),
                        path,
                    );
                }
                if let Some(latest) = latest_version(&tool_dir) {
                    self.tool_preferences.put(
                        format!("runtime.tools.{tool}.path"),
                        latest.to_string_lossy().to_string(),
                    );
                }
            }
        }
    }

    pub fn packages(&self) -> &[Package] {
        &self.packages
    }

    pub fn package(&self, id: PackageId) -> &Package {
        &self.packages[id.0]
    }

    pub fn platform(&self, id: PlatformId) -> &Platform {
        &self.platforms[id.0]
    }

    pub fn board(&self, id: BoardId) -> &Board {
        &self.boards[id.0]
    }

    pub fn find_package(&self, package: &str) -> Option<PackageId> {
        self.packages
            .iter()
            .position(|p| p.id == package)
            .map(PackageId)
    }

    pub fn find_platform(&self, package: &str, arch: &str) -> Option<PlatformId> {
        let pkg = self.package(self.find_package(package)?);
        pkg.platforms
            .iter()
            .copied()
            .find(|id| self.platform(*id).id == arch)
    }

    pub fn find_board(&self, package: &str, arch: &str, board: &str) -> Option<BoardId> {
        let platform = self.platform(self.find_platform(package, arch)?);
        platform
            .boards
            .iter()
            .copied()
            .find(|id| self.board(*id).id == board)
    }

    /// Fully qualified board name `package:arch:board`.
    pub fn fqbn(&self, id: BoardId) -> String {
        let board = self.board(id);
        let platform = self.platform(board.platform);
        let package = self.package(platform.package);
        format!("{}:{}:{}", package.id, platform.id, board.id)
    }
}

fn load_platform(folder: &Path, legacy: bool, version: Option<String>) -> Result<LoadedPlatform> {
    let boards_file = folder.join(BOARDS_FILE);
    if !boards_file.exists() {
        bail!("{} not found", boards_file.display());
    }
    let boards_text = fs::read_to_string(&boards_file)
        .with_context(|| format!("Failed to read {}", boards_file.display()))?;
    let (menus, boards) = parse_boards(&boards_text);

    let mut preferences = PreferencesMap::new();
    let platform_file = folder.join(PLATFORM_FILE);
    if platform_file.exists() {
        preferences.put_all(&PreferencesMap::load(&platform_file)?);
    }
    let local_file = folder.join(PLATFORM_LOCAL_FILE);
    if local_file.exists() {
        preferences.put_all(&PreferencesMap::load(&local_file)?);
    }

    let programmers_file = folder.join(PROGRAMMERS_FILE);
    let programmers = if programmers_file.exists() {
        PreferencesMap::load(&programmers_file)?.first_level_map()
    } else {
        BTreeMap::new()
    };

    Ok(LoadedPlatform {
        folder: folder.to_path_buf(),
        legacy,
        version,
        preferences,
        menus,
        programmers,
        boards,
    })
}

type ParsedBoard = (String, PreferencesMap, BTreeMap<String, Vec<MenuOption>>);

/// Split `boards.txt` into the platform menu declarations and the boards.
fn parse_boards(text: &str) -> (Vec<(String, String)>, Vec<ParsedBoard>) {
    let all = PreferencesMap::parse(text);

    let mut menus = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        if let Some((key, label)) = line.split_once('=')
            && let Some(menu_id) = key.trim().strip_prefix("menu.")
            && !menu_id.contains('.')
            && !menus.iter().any(|(id, _): &(String, String)| id == menu_id)
        {
            menus.push((menu_id.to_string(), label.trim().to_string()));
        }
    }

    let mut boards = Vec::new();
    for board_id in declaration_order(text) {
        if board_id == "menu" {
            continue;
        }
        let fragment = all.sub_tree(&board_id);
        let own: PreferencesMap = fragment
            .iter()
            .filter(|(k, _)| !k.starts_with("menu."))
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        let mut menu_options = BTreeMap::new();
        for (menu_id, entries) in fragment.sub_tree("menu").first_level_map() {
            // `<option>=Label` entries carry no dot after the first level
            let labels: Vec<(String, String)> = entries
                .iter()
                .filter(|(k, _)| !k.contains('.'))
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect();
            let options = labels
                .into_iter()
                .map(|(id, label)| MenuOption {
                    preferences: entries.sub_tree(&id),
                    id,
                    label,
                })
                .collect();
            menu_options.insert(menu_id, options);
        }

        boards.push((board_id, own, menu_options));
    }
    (menus, boards)
}

fn sorted_subdirs(folder: &Path) -> Vec<PathBuf> {
    let Ok(entries) = fs::read_dir(folder) else {
        return Vec::new();
    };
    let mut dirs: Vec<PathBuf> = entries
        .flatten()
        .map(|e| e.path())
        .filter(|p| p.is_dir() && !crate::sketch::is_hidden_or_scm(p))
        .collect();
    dirs.sort_by_key(|p| dir_name(p).to_lowercase());
    dirs
}

fn dir_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// Highest semver-named subfolder, falling back to the last one by name.
fn latest_version(folder: &Path) -> Option<PathBuf> {
    let dirs = sorted_subdirs(folder);
    let best_semver = dirs
        .iter()
        .filter_map(|d| semver::Version::parse(&dir_name(d)).ok().map(|v| (v, d)))
        .max_by(|a, b| a.0.cmp(&b.0))
        .map(|(_, d)| d.clone());
    best_semver.or_else(|| dirs.last().cloned())
}
