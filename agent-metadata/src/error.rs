use thiserror::Error;

/// Errors talking to the metadata server.
#[derive(Debug, Error)]
pub enum MetadataError {
    #[error("metadata request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("metadata server returned {status} for {url}")]
    Status { url: String, status: u16 },

    #[error("metadata response is not a valid descriptor: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("metadata request cancelled")]
    Cancelled,
}
