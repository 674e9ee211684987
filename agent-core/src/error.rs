//! Error types for agent-core.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading the layered instance configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A config layer exists but could not be read.
    #[error("I/O error reading config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A config layer is malformed. Fatal at startup.
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: ini::ParseError,
    },
}

/// Errors raised by external command execution.
#[derive(Debug, Error)]
pub enum CommandError {
    /// The program could not be spawned (not installed, permission denied, ...).
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The program ran and exited unsuccessfully.
    #[error("`{command}` exited with status {status}: {stderr}")]
    Failed {
        command: String,
        status: String,
        stderr: String,
    },

    /// The root context was cancelled while the program was running.
    #[error("`{command}` cancelled")]
    Cancelled { command: String },
}

impl CommandError {
    /// The rendered command line this error refers to.
    pub fn command(&self) -> &str {
        match self {
            CommandError::Spawn { command, .. }
            | CommandError::Failed { command, .. }
            | CommandError::Cancelled { command } => command,
        }
    }
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> ConfigError {
    ConfigError::Io {
        path: path.into(),
        source,
    }
}
