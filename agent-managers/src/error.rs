//! Error types for agent-managers.

use std::path::PathBuf;

use thiserror::Error;

use agent_core::CommandError;

/// Everything a manager's `set` can fail with. Never escapes the pass that
/// produced it; the orchestrator logs it and moves on.
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error(transparent)]
    Command(#[from] CommandError),

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid {key} attribute: {source}")]
    InvalidAttribute {
        key: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// A path the agent writes as root turned out to be a symlink.
    #[error("refusing to follow symlink at {path}")]
    Symlink { path: PathBuf },

    #[error("no network interface with MAC {mac}")]
    UnknownInterface { mac: String },

    #[error("wsfc agent failed to listen on port {port}: {source}")]
    Listen {
        port: u16,
        #[source]
        source: std::io::Error,
    },

    /// Several independent steps failed; each was still attempted.
    #[error("{} step(s) failed: {}", .0.len(), join(.0))]
    Partial(Vec<ManagerError>),
}

impl ManagerError {
    /// `Ok` when `errors` is empty, a single error as-is, otherwise [`Partial`].
    ///
    /// [`Partial`]: ManagerError::Partial
    pub fn collect(mut errors: Vec<ManagerError>) -> Result<(), ManagerError> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ManagerError::Partial(errors)),
        }
    }
}

fn join(errors: &[ManagerError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Convenience constructor for [`ManagerError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> ManagerError {
    ManagerError::Io {
        path: path.into(),
        source,
    }
}
