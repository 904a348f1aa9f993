//! Sketch loading.
//!
//! A sketch is a folder `Blink/` holding a primary tab `Blink.ino` plus any
//! number of extra tabs. `.ino`/`.pde` tabs are concatenated into one unit
//! before compiling; other allowed files are copied to the build folder as-is.

use anyhow::{Context, Result, bail};
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

/// Tabs that get concatenated into the main unit.
pub const SKETCH_EXTENSIONS: [&str; 2] = ["ino", "pde"];

/// Tabs copied verbatim into the build folder.
pub const OTHER_EXTENSIONS: [&str; 6] = ["c", "cpp", "h", "hpp", "S", "s"];

const SCM_FOLDERS: [&str; 7] = ["CVS", "RCS", "SCCS", ".git", ".svn", ".hg", ".bzr"];

static INCLUDE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?m)^\s*#\s*include\s*[<"]\s*([^>"\s]+)\s*[>"]"#).expect("valid regex")
});

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SketchCode {
    pub path: PathBuf,
    pub text: String,
    pub modified: bool,
}

impl SketchCode {
    pub fn new(path: impl Into<PathBuf>, text: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            text: text.into(),
            modified: false,
        }
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }

    /// File name without extension, as shown on the editor tab.
    pub fn pretty_name(&self) -> String {
        self.path
            .file_stem()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }

    pub fn extension(&self) -> &str {
        self.path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
    }

    pub fn is_sketch_tab(&self) -> bool {
        SKETCH_EXTENSIONS.contains(&self.extension())
    }

    /// Lines this tab occupies once written with a trailing newline.
    pub fn line_count(&self) -> usize {
        self.text.matches('\n').count() + 1
    }
}

#[derive(Debug, Clone)]
pub struct Sketch {
    folder: PathBuf,
    name: String,
    codes: Vec<SketchCode>,
}

impl Sketch {
    /// Build a sketch from tabs. The tab whose stem matches the folder name
    /// becomes the primary tab; the rest are sorted by file name.
    pub fn from_codes(folder: impl Into<PathBuf>, mut codes: Vec<SketchCode>) -> Result<Self> {
        let folder = folder.into();
        let name = folder
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .context("sketch folder has no name")?;

        let primary = codes
            .iter()
            .position(|c| c.is_sketch_tab() && c.pretty_name() == name)
            .with_context(|| {
                format!(
                    "Bad sketch primary file or bad sketch directory structure: expected {}/{}.ino",
                    folder.display(),
                    name
                )
            })?;
        let primary = codes.remove(primary);
        codes.sort_by_key(|c| c.file_name());
        codes.insert(0, primary);

        Ok(Self {
            folder,
            name,
            codes,
        })
    }

    pub fn folder(&self) -> &Path {
        &self.folder
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn codes(&self) -> &[SketchCode] {
        &self.codes
    }

    pub fn has_tab(&self, file_name: &str) -> bool {
        self.codes.iter().any(|c| c.file_name() == file_name)
    }

    /// Header names referenced by `#include` across all tabs, first use first.
    pub fn includes(&self) -> Vec<String> {
        let mut out: Vec<String> = Vec::new();
        for code in &self.codes {
            for name in scan_includes(&code.text) {
                if !out.contains(&name) {
                    out.push(name);
                }
            }
        }
        out
    }
}

pub fn scan_includes(text: &str) -> Vec<String> {
    INCLUDE
        .captures_iter(text)
        .map(|c| c[1].to_string())
        .collect()
}

/// Supplies the tabs of a sketch.
pub trait SketchSource {
    fn load_sketch(&self, folder: &Path) -> Result<Sketch>;
}

/// Reads tabs straight from the sketch folder.
#[derive(Debug, Default, Clone, Copy)]
pub struct FolderSketchSource;

impl SketchSource for FolderSketchSource {
    fn load_sketch(&self, folder: &Path) -> Result<Sketch> {
        if !folder.is_dir() {
            bail!("Sketch folder {} does not exist", folder.display());
        }
        let folder = fs::canonicalize(folder)
            .with_context(|| format!("Failed to resolve {}", folder.display()))?;

        let mut codes = Vec::new();
        for entry in fs::read_dir(&folder)? {
            let path = entry?.path();
            if !path.is_file() || is_hidden_or_scm(&path) {
                continue;
            }
            let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
            if SKETCH_EXTENSIONS.contains(&ext) || OTHER_EXTENSIONS.contains(&ext) {
                let text = fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                codes.push(SketchCode::new(path, text));
            }
        }
        Sketch::from_codes(folder, codes)
    }
}

/// Hidden files and version-control folders never take part in a build.
pub fn is_hidden_or_scm(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.') || SCM_FOLDERS.contains(&n))
}
