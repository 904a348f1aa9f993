//! Build error taxonomy.

use std::path::PathBuf;

use crate::build::diagnostics::CompileDiagnostic;

/// Errors that stop a build.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// Missing board or platform, unresolved recipe key, malformed recipe.
    #[error("{detail}")]
    Configuration {
        /// What is wrong with the configuration.
        detail: String,
    },

    /// The tool could not be started at all.
    #[error("cannot run {program}: {source}")]
    ToolLaunch {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// Non-zero exit with no mappable diagnostic.
    #[error("{program} exited with status {code}{}", format_tail(.stderr_tail))]
    ToolExit {
        program: String,
        code: i32,
        /// Last lines written to stderr.
        stderr_tail: Vec<String>,
    },

    /// The first `file:line: error:` reported during the build.
    #[error("{0}")]
    CompileDiagnostic(CompileDiagnostic),

    /// Flash or RAM ceiling exceeded after a successful link.
    #[error("{detail}")]
    SizeLimit { detail: String },

    /// Build directory I/O.
    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl BuildError {
    pub fn config(detail: impl Into<String>) -> Self {
        BuildError::Configuration {
            detail: detail.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        BuildError::Io {
            path: path.into(),
            source,
        }
    }
}

fn format_tail(tail: &[String]) -> String {
    if tail.is_empty() {
        String::new()
    } else {
        format!("\n{}", tail.join("\n"))
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, BuildError>;

/// Attach a path to an `io::Result`.
pub trait IoContext<T> {
    fn at(self, path: &std::path::Path) -> Result<T>;
}

impl<T> IoContext<T> for std::io::Result<T> {
    fn at(self, path: &std::path::Path) -> Result<T> {
        self.map_err(|e| BuildError::io(path, e))
    }
}
