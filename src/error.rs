//! Error taxonomy for environment and config management.

use std::path::PathBuf;
use std::process::ExitStatus;
use std::time::Duration;

/// Errors surfaced by the harness.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A build or install step exited non-zero.
    #[error("build step `{step}` failed ({status})\n{output}")]
    Build {
        step: String,
        status: String,
        output: String,
    },

    #[error("daemon under {} not ready after {timeout:?}", prefix.display())]
    StartupTimeout { timeout: Duration, prefix: PathBuf },

    #[error("daemon exited before becoming ready ({status})")]
    DaemonExited { status: ExitStatus },

    #[error("daemon already running (pid={pid})")]
    AlreadyRunning { pid: u32 },

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("{}:{line}: {message}", path.display())]
    Parse {
        path: PathBuf,
        line: usize,
        message: String,
    },

    #[error("key not found: [{section}] {key}")]
    KeyNotFound { section: String, key: String },

    #[error("not found: {}", .0.display())]
    NotFound(PathBuf),

    /// The daemon was expected to be alive but is gone. This is a failure of
    /// the system under test, not of the test logic.
    #[error("daemon under {} died during the test run", prefix.display())]
    DaemonDied { prefix: PathBuf },

    #[error("endpoint: {0}")]
    Endpoint(String),

    #[error("settings: {0}")]
    Settings(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn parse(path: impl Into<PathBuf>, line: usize, message: impl Into<String>) -> Self {
        Error::Parse {
            path: path.into(),
            line,
            message: message.into(),
        }
    }

    pub(crate) fn key_not_found(section: &str, key: &str) -> Self {
        Error::KeyNotFound {
            section: section.to_string(),
            key: key.to_string(),
        }
    }

    /// True for errors that indicate the system under test failed rather than
    /// the test or harness.
    pub fn is_environment_failure(&self) -> bool {
        matches!(
            self,
            Error::DaemonDied { .. } | Error::DaemonExited { .. } | Error::StartupTimeout { .. }
        )
    }
}
