use std::path::PathBuf;

use thiserror::Error;

use agent_metadata::MetadataError;

/// Event manager construction failures.
#[derive(Debug, Error)]
pub enum EventError {
    #[error("no watchers configured")]
    NoWatchers,

    #[error("unknown watcher '{0}'")]
    UnknownWatcher(String),

    #[error("watcher '{0}' configured more than once")]
    DuplicateWatcher(String),
}

/// Failure reported by a watcher for one run. Delivered to subscribers in
/// [`EventData::error`](crate::EventData::error).
#[derive(Debug, Error)]
pub enum WatchError {
    #[error("metadata watch failed: {0}")]
    Metadata(#[from] MetadataError),

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("watcher '{0}' is not supported on this platform")]
    Unsupported(&'static str),
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> WatchError {
    WatchError::Io {
        path: path.into(),
        source,
    }
}
