//! Library discovery and `#include` resolution.
//!
//! Two layouts exist:
//!
//! - modern: `library.properties` plus a `src/` folder, compiled recursively
//! - legacy: sources in the library root with an optional `utility/` folder

use anyhow::Result;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::prefs::PreferencesMap;
use crate::sketch::is_hidden_or_scm;

const PROPERTIES_FILE: &str = "library.properties";
const HEADER_EXTENSIONS: [&str; 2] = ["h", "hpp"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Library {
    pub name: String,
    /// Where the library is installed.
    pub folder: PathBuf,
    /// Where its sources and public headers live.
    pub src_folder: PathBuf,
    /// Declared architectures; `*` means any.
    pub architectures: Vec<String>,
    pub legacy: bool,
}

impl Library {
    pub fn load(folder: &Path) -> Result<Library> {
        let dir_name = folder
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();

        let properties_file = folder.join(PROPERTIES_FILE);
        let src = folder.join("src");
        if properties_file.exists() && src.is_dir() {
            let props = PreferencesMap::load(&properties_file)?;
            let architectures = props
                .get_or("architectures", "*")
                .split(',')
                .map(|a| a.trim().to_string())
                .filter(|a| !a.is_empty())
                .collect();
            return Ok(Library {
                name: props.get_or("name", &dir_name).to_string(),
                folder: folder.to_path_buf(),
                src_folder: src,
                architectures,
                legacy: false,
            });
        }

        Ok(Library {
            name: dir_name,
            folder: folder.to_path_buf(),
            src_folder: folder.to_path_buf(),
            architectures: vec!["*".to_string()],
            legacy: true,
        })
    }

    /// Modern libraries compile their whole `src/` tree.
    pub fn use_recursion(&self) -> bool {
        !self.legacy
    }

    pub fn supports_architecture(&self, archs: &[String]) -> bool {
        self.architectures
            .iter()
            .any(|a| a == "*" || archs.iter().any(|x| x.eq_ignore_ascii_case(a)))
    }

    /// Public headers in the source root.
    pub fn headers(&self) -> Vec<String> {
        let Ok(entries) = fs::read_dir(&self.src_folder) else {
            return Vec::new();
        };
        let mut headers: Vec<String> = entries
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.is_file() && !is_hidden_or_scm(p))
            .filter(|p| {
                p.extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| HEADER_EXTENSIONS.contains(&e))
            })
            .filter_map(|p| p.file_name().map(|n| n.to_string_lossy().to_string()))
            .collect();
        headers.sort();
        headers
    }
}

/// Maps an `#include` name to the libraries that provide it.
pub trait LibraryResolver: Send + Sync {
    /// Candidates for `header`, preferred first. Empty when nothing matches.
    fn candidates(&self, header: &str) -> Vec<Library>;
}

/// In-memory index of library folders.
#[derive(Debug, Default, Clone)]
pub struct LibraryIndex {
    libraries: Vec<Library>,
    by_header: BTreeMap<String, Vec<usize>>,
}

impl LibraryIndex {
    /// Scan folders in priority order: a library in a later folder replaces
    /// one with the same name from an earlier folder, and wins header lookups.
    pub fn scan(folders: &[PathBuf]) -> LibraryIndex {
        let mut by_name: BTreeMap<String, (usize, Library)> = BTreeMap::new();
        let mut rank = 0;

        for folder in folders {
            let Ok(entries) = fs::read_dir(folder) else {
                continue;
            };
            let mut dirs: Vec<PathBuf> = entries
                .flatten()
                .map(|e| e.path())
                .filter(|p| p.is_dir() && !is_hidden_or_scm(p))
                .collect();
            dirs.sort();
            for dir in dirs {
                if let Ok(lib) = Library::load(&dir) {
                    rank += 1;
                    by_name.insert(lib.name.clone(), (rank, lib));
                }
            }
        }

        let mut ranked: Vec<(usize, Library)> = by_name.into_values().collect();
        // highest priority first
        ranked.sort_by(|a, b| b.0.cmp(&a.0));
        LibraryIndex::from_libraries(ranked.into_iter().map(|(_, l)| l).collect())
    }

    /// Index libraries given in preference order.
    pub fn from_libraries(libraries: Vec<Library>) -> LibraryIndex {
        let mut by_header: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for (i, lib) in libraries.iter().enumerate() {
            for header in lib.headers() {
                by_header.entry(header).or_default().push(i);
            }
        }
        LibraryIndex {
            libraries,
            by_header,
        }
    }

    pub fn libraries(&self) -> &[Library] {
        &self.libraries
    }
}

impl LibraryResolver for LibraryIndex {
    fn candidates(&self, header: &str) -> Vec<Library> {
        self.by_header
            .get(header)
            .map(|ids| ids.iter().map(|i| self.libraries[*i].clone()).collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn modern(root: &Path, dir: &str, name: &str, archs: &str) -> PathBuf {
        let folder = root.join(dir);
        fs::create_dir_all(folder.join("src")).unwrap();
        fs::write(
            folder.join(PROPERTIES_FILE),
            format!("name={name}\nversion=1.0.0\narchitectures={archs}\n"),
        )
        .unwrap();
        fs::write(folder.join("src").join(format!("{name}.h")), "").unwrap();
        folder
    }

    #[test]
    fn test_modern_and_legacy_layouts() {
        let tmp = TempDir::new().unwrap();
        let servo = Library::load(&modern(tmp.path(), "Servo", "Servo", "avr, sam")).unwrap();
        assert!(!servo.legacy);
        assert!(servo.use_recursion());
        assert_eq!(servo.architectures, vec!["avr", "sam"]);
        assert!(servo.supports_architecture(&["AVR".to_string()]));
        assert!(!servo.supports_architecture(&["esp8266".to_string()]));

        let legacy_dir = tmp.path().join("OldLib");
        fs::create_dir_all(legacy_dir.join("utility")).unwrap();
        fs::write(legacy_dir.join("OldLib.h"), "").unwrap();
        let old = Library::load(&legacy_dir).unwrap();
        assert!(old.legacy);
        assert_eq!(old.src_folder, legacy_dir);
        assert_eq!(old.headers(), vec!["OldLib.h"]);
        assert!(old.supports_architecture(&["anything".to_string()]));
    }

    #[test]
    fn test_later_folder_wins() {
        let tmp = TempDir::new().unwrap();
        let ide = tmp.path().join("ide");
        let user = tmp.path().join("user");
        modern(&ide, "Servo", "Servo", "*");
        modern(&user, "Servo", "Servo", "*");
        modern(&user, "ServoFork", "Servo", "*");

        let index = LibraryIndex::scan(&[ide, user.clone()]);
        let cands = index.candidates("Servo.h");
        // ServoFork declares the same library name, so it replaces Servo
        assert_eq!(cands.len(), 1);
        assert!(cands[0].folder.starts_with(&user));
        assert!(index.candidates("Missing.h").is_empty());
    }

    #[test]
    fn test_duplicate_header_candidates_in_priority_order() {
        let tmp = TempDir::new().unwrap();
        let ide = tmp.path().join("ide");
        let user = tmp.path().join("user");
        modern(&ide, "SD", "SD", "*");
        let fat = modern(&user, "SdFat", "SdFat", "*");
        fs::write(fat.join("src").join("SD.h"), "").unwrap();

        let index = LibraryIndex::scan(&[ide, user]);
        let cands = index.candidates("SD.h");
        assert_eq!(cands.len(), 2);
        assert_eq!(cands[0].name, "SdFat");
        assert_eq!(cands[1].name, "SD");
    }
}
