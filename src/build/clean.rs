//! Build folder housekeeping.
//!
//! - `inoc clean` removes the whole build folder
//! - before every build, a changed preference fingerprint wipes the folder;
//!   otherwise only sketch copies that no longer belong to the sketch go

use anyhow::{Context, Result as AnyResult};
use colored::*;
use std::fs;
use std::path::Path;

use crate::error::{IoContext, Result};
use crate::prefs::PreferencesMap;

pub const BUILD_PREFS_FILE: &str = "buildprefs.txt";

const SKETCH_COPY_EXTENSIONS: [&str; 4] = ["c", "cpp", "s", "S"];

pub fn clean(build_path: &Path) -> AnyResult<()> {
    if build_path.exists() {
        fs::remove_dir_all(build_path)
            .with_context(|| format!("Failed to remove {}", build_path.display()))?;
        println!("{} Removed {}", "✓".green(), build_path.display());
    } else {
        println!("{} Nothing to clean", "!".yellow());
    }
    Ok(())
}

/// Sorted `key = value` lines for every key under one of `prefixes`.
pub fn fingerprint(prefs: &PreferencesMap, prefixes: &[String]) -> String {
    let mut out = String::new();
    for (key, value) in prefs.iter() {
        if prefixes.iter().any(|p| key.starts_with(p.as_str())) {
            out.push_str(key);
            out.push_str(" = ");
            out.push_str(value);
            out.push('\n');
        }
    }
    out
}

/// Compare the stored fingerprint with `current`, clean accordingly and
/// store `current`. Returns true when the folder was wiped.
pub fn prepare_build_folder(build_path: &Path, current: &str, keep: &[String]) -> Result<bool> {
    let stored = build_path.join(BUILD_PREFS_FILE);
    let changed = match fs::read_to_string(&stored) {
        Ok(previous) => previous != current,
        Err(_) => true,
    };

    if changed {
        remove_descendants(build_path)?;
    } else {
        remove_stale_sources(build_path, keep)?;
    }

    fs::create_dir_all(build_path).at(build_path)?;
    fs::write(&stored, current).at(&stored)?;
    Ok(changed)
}

/// Empty the folder but keep the folder itself.
pub fn remove_descendants(folder: &Path) -> Result<()> {
    let Ok(entries) = fs::read_dir(folder) else {
        return Ok(());
    };
    for entry in entries {
        let path = entry.at(folder)?.path();
        if path.is_dir() {
            fs::remove_dir_all(&path).at(&path)?;
        } else {
            fs::remove_file(&path).at(&path)?;
        }
    }
    Ok(())
}

/// Delete top-level source copies whose name is not in `keep`.
pub fn remove_stale_sources(folder: &Path, keep: &[String]) -> Result<()> {
    let Ok(entries) = fs::read_dir(folder) else {
        return Ok(());
    };
    for entry in entries {
        let path = entry.at(folder)?.path();
        if !path.is_file() {
            continue;
        }
        let is_copy = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| SKETCH_COPY_EXTENSIONS.contains(&e));
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        if is_copy && !keep.contains(&name) {
            fs::remove_file(&path).at(&path)?;
        }
    }
    Ok(())
}
