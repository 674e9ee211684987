//! Metadata service client.
//!
//! [`MetadataClient`] is the seam the rest of the agent depends on;
//! [`HttpClient`] talks to the real metadata server.

mod client;
mod error;
#[cfg(any(test, feature = "test-support"))]
pub mod fake;

use async_trait::async_trait;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use agent_core::Descriptor;

pub use client::{HttpClient, DEFAULT_BASE_URL, LONGPOLL_TIMEOUT_SECS};
pub use error::MetadataError;

/// Result of a long-poll: the new snapshot and the ETag identifying it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Watched {
    pub descriptor: Descriptor,
    pub etag: String,
}

/// Agent and OS identity reported by the telemetry job.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Telemetry {
    pub agent_name: String,
    pub agent_version: String,
    pub agent_arch: String,
    pub os: String,
    pub os_version: String,
    pub kernel_release: String,
}

#[async_trait]
pub trait MetadataClient: Send + Sync {
    /// Fetch the full recursive descriptor once.
    async fn get(&self, cancel: &CancellationToken) -> Result<Descriptor, MetadataError>;

    /// Block until the descriptor's ETag differs from `etag` (or the server
    /// long-poll times out). `None` returns immediately.
    async fn watch(
        &self,
        cancel: &CancellationToken,
        etag: Option<&str>,
    ) -> Result<Watched, MetadataError>;

    /// Fetch a single key relative to the metadata root, e.g.
    /// `oslogin/certificates`.
    async fn get_key(&self, cancel: &CancellationToken, key: &str) -> Result<String, MetadataError>;

    async fn send_telemetry(
        &self,
        cancel: &CancellationToken,
        telemetry: &Telemetry,
    ) -> Result<(), MetadataError>;
}
