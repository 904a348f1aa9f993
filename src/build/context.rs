use std::path::PathBuf;
use std::time::Duration;

use crate::config::{BoardSelection, BuildConfig, default_fingerprint_prefixes};
use crate::error::Result;
use crate::hardware::Catalog;
use crate::prefs::PreferencesMap;
use crate::resolver;
use crate::sketch::Sketch;

#[derive(Debug, Clone)]
pub struct BuildOptions {
    pub verbose: bool,
    pub parallel: bool,
    /// Copy the final image next to the sketch.
    pub export: bool,
    /// Selects `compiler.warning_flags.<level>`.
    pub warning_level: String,
    pub fingerprint_prefixes: Vec<String>,
    pub line_timeout: Duration,
}

impl Default for BuildOptions {
    fn default() -> Self {
        Self::from(&BuildConfig::default())
    }
}

impl From<&BuildConfig> for BuildOptions {
    fn from(config: &BuildConfig) -> Self {
        let fingerprint_prefixes = if config.fingerprint_prefixes.is_empty() {
            default_fingerprint_prefixes()
        } else {
            config.fingerprint_prefixes.clone()
        };
        Self {
            verbose: config.verbose,
            parallel: config.parallel,
            export: config.export,
            warning_level: config.warning_level.clone(),
            fingerprint_prefixes,
            line_timeout: Duration::from_millis(config.line_timeout_ms),
        }
    }
}

/// Everything one build needs. Immutable once created.
#[derive(Debug, Clone)]
pub struct BuildContext {
    pub prefs: PreferencesMap,
    pub sketch: Sketch,
    pub build_path: PathBuf,
    /// Platform architecture, e.g. `avr`.
    pub arch: String,
    pub options: BuildOptions,
}

impl BuildContext {
    /// Resolve preferences for `selection` and bundle them with the sketch.
    /// Resolver warnings are returned alongside.
    pub fn resolve(
        catalog: &Catalog,
        selection: Option<&BoardSelection>,
        globals: &PreferencesMap,
        sketch: Sketch,
        build_path: PathBuf,
        options: BuildOptions,
    ) -> Result<(BuildContext, Vec<String>)> {
        let resolved = resolver::resolve(catalog, selection, globals, &build_path, sketch.folder())?;
        let arch = catalog.platform(resolved.platform).id.clone();
        let ctx = BuildContext {
            prefs: resolved.preferences,
            sketch,
            build_path,
            arch,
            options,
        };
        Ok((ctx, resolved.warnings))
    }
}
