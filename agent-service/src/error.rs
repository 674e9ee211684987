use thiserror::Error;

use agent_core::CommandError;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("unknown service state: {0}")]
    UnknownState(u32),

    #[error("systemd notification failed: {0}")]
    Notify(#[from] CommandError),

    #[error("failed to register windows service: {0}")]
    Register(String),

    #[error("service control manager channel closed")]
    StatusClosed,

    #[error("signal handler setup failed: {0}")]
    Signal(#[source] std::io::Error),
}
