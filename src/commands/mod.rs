//! CLI command handlers
//!
//! Everything that needs a loaded sketch goes through [`Session`].

pub mod boards;
pub mod prefs;

use anyhow::{Context, Result};
use colored::*;
use std::fs;
use std::path::{Path, PathBuf};

use crate::build::{BuildContext, BuildOptions};
use crate::config::{BoardSelection, InocConfig, load_config};
use crate::hardware::Catalog;
use crate::library::LibraryIndex;
use crate::platform::HostPlatform;
use crate::prefs::PreferencesMap;
use crate::resolver::default_preferences;
use crate::sketch::{FolderSketchSource, SketchSource};

/// A sketch folder with its configuration and the installed hardware.
pub struct Session {
    pub host: HostPlatform,
    pub sketch_folder: PathBuf,
    pub config: InocConfig,
    pub catalog: Catalog,
}

impl Session {
    pub fn open(sketch_folder: &Path) -> Result<Session> {
        let sketch_folder = fs::canonicalize(sketch_folder)
            .with_context(|| format!("Sketch folder {} not found", sketch_folder.display()))?;
        let host = HostPlatform::current();
        let config = load_config(&sketch_folder, host)?;

        let mut hardware = Vec::new();
        if let Some(sketchbook) = host.default_sketchbook_folder() {
            hardware.push(sketchbook.join("hardware"));
        }
        hardware.extend(config.paths.hardware.iter().cloned());
        let catalog = Catalog::load(&hardware, &config.paths.packages);
        for warning in &catalog.warnings {
            println!("{} {}", "!".yellow(), warning);
        }

        Ok(Session {
            host,
            sketch_folder,
            config,
            catalog,
        })
    }

    pub fn build_path(&self) -> PathBuf {
        self.config.build_path(&self.sketch_folder)
    }

    /// Defaults, discovered tool paths, then `[preferences]`.
    pub fn globals(&self) -> PreferencesMap {
        let mut globals = default_preferences();
        globals.put_all(&self.catalog.tool_preferences);
        for (key, value) in &self.config.preferences {
            globals.put(key.as_str(), value.as_str());
        }
        globals
    }

    /// `--fqbn` beats `[board]`.
    pub fn selection(&self, fqbn: Option<&str>) -> Result<Option<BoardSelection>> {
        match fqbn {
            Some(fqbn) => BoardSelection::parse_fqbn(fqbn).map(Some),
            None => self.config.board_selection(),
        }
    }

    /// Resolve the board and load the sketch, ready to build.
    pub fn context(
        &self,
        fqbn: Option<&str>,
        options: BuildOptions,
    ) -> Result<(BuildContext, LibraryIndex)> {
        let selection = self.selection(fqbn)?;
        let sketch = FolderSketchSource.load_sketch(&self.sketch_folder)?;
        let (ctx, warnings) = BuildContext::resolve(
            &self.catalog,
            selection.as_ref(),
            &self.globals(),
            sketch,
            self.build_path(),
            options,
        )?;
        for warning in warnings {
            println!("{} {}", "!".yellow(), warning);
        }

        let libraries = LibraryIndex::scan(&self.library_folders(&ctx));
        Ok((ctx, libraries))
    }

    /// Lowest priority first: platform bundled, configured, sketchbook.
    fn library_folders(&self, ctx: &BuildContext) -> Vec<PathBuf> {
        let mut folders = Vec::new();
        if let Some(platform) = ctx.prefs.get_path("runtime.platform.path") {
            folders.push(platform.join("libraries"));
        }
        folders.extend(self.config.paths.libraries.iter().cloned());
        if let Some(sketchbook) = self.host.default_sketchbook_folder() {
            folders.push(sketchbook.join("libraries"));
        }
        folders
    }
}
