//! Error types for agent-daemon.

use std::path::PathBuf;

use thiserror::Error;

use agent_core::ConfigError;
use agent_events::EventError;
use agent_metadata::MetadataError;
use agent_service::ServiceError;

/// Fatal agent errors. Anything that reaches the top of [`run`] ends the
/// process with a non-zero status.
///
/// [`run`]: crate::run
#[derive(Debug, Error)]
pub enum AgentError {
    #[error("error initializing logger: {0}")]
    Logging(String),

    #[error("error parsing config: {0}")]
    Config(#[from] ConfigError),

    #[error("error creating metadata client: {0}")]
    Metadata(#[from] MetadataError),

    #[error("error initializing event manager: {0}")]
    Event(#[from] EventError),

    #[error("could not register into system's service manager: {0}")]
    Register(#[source] ServiceError),

    #[error("failed to set service state to running: {0}")]
    SetRunning(#[source] ServiceError),

    #[error("failed to set service state to stopped: {0}")]
    SetStopped(#[source] ServiceError),

    #[error("failed to install signal handlers: {0}")]
    Signals(#[source] ServiceError),

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{task} task join failure: {reason}")]
    Join { task: &'static str, reason: String },
}

/// Convenience constructor for [`AgentError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> AgentError {
    AgentError::Io {
        path: path.into(),
        source,
    }
}
