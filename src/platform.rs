//! Host operating system capabilities.
//!
//! The engine never branches on the OS itself. Whatever differs between
//! hosts (opening folders, where settings live) goes through [`HostPlatform`],
//! picked once at startup.

use anyhow::{Context, Result, bail};
use std::path::{Path, PathBuf};
use std::process::Command;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostPlatform {
    Linux,
    MacOs,
    Windows,
}

impl HostPlatform {
    pub fn current() -> Self {
        if cfg!(target_os = "windows") {
            HostPlatform::Windows
        } else if cfg!(target_os = "macos") {
            HostPlatform::MacOs
        } else {
            HostPlatform::Linux
        }
    }

    /// Suffix used by OS-specific definition keys (`tools.avrdude.cmd.windows`).
    pub fn key_suffix(self) -> &'static str {
        match self {
            HostPlatform::Linux => "linux",
            HostPlatform::MacOs => "macosx",
            HostPlatform::Windows => "windows",
        }
    }

    fn opener(self) -> &'static str {
        match self {
            HostPlatform::Linux => "xdg-open",
            HostPlatform::MacOs => "open",
            HostPlatform::Windows => "explorer",
        }
    }

    pub fn open_folder(self, folder: &Path) -> Result<()> {
        if !folder.is_dir() {
            bail!("{} is not a folder", folder.display());
        }
        self.launch(&folder.to_string_lossy())
    }

    fn launch(self, target: &str) -> Result<()> {
        Command::new(self.opener())
            .arg(target)
            .spawn()
            .with_context(|| format!("Failed to run {} {}", self.opener(), target))?;
        Ok(())
    }

    /// Where `settings.toml` lives.
    pub fn settings_folder(self) -> Option<PathBuf> {
        match self {
            HostPlatform::Linux => dirs::home_dir().map(|h| h.join(".inoc")),
            HostPlatform::MacOs => {
                dirs::home_dir().map(|h| h.join("Library").join("inoc"))
            }
            HostPlatform::Windows => dirs::data_local_dir().map(|d| d.join("inoc")),
        }
    }

    pub fn default_sketchbook_folder(self) -> Option<PathBuf> {
        match self {
            HostPlatform::Linux => dirs::home_dir().map(|h| h.join("Arduino")),
            HostPlatform::MacOs | HostPlatform::Windows => dirs::document_dir()
                .or_else(dirs::home_dir)
                .map(|d| d.join("Arduino")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_matches_target() {
        let host = HostPlatform::current();
        if cfg!(target_os = "linux") {
            assert_eq!(host, HostPlatform::Linux);
            assert_eq!(host.key_suffix(), "linux");
        }
    }

    #[test]
    fn test_open_folder_rejects_missing_path() {
        let host = HostPlatform::current();
        assert!(host.open_folder(Path::new("/definitely/not/here")).is_err());
    }

    #[test]
    fn test_settings_folder_named_after_tool() {
        if let Some(folder) = HostPlatform::Linux.settings_folder() {
            assert!(folder.ends_with(".inoc"));
        }
    }
}
