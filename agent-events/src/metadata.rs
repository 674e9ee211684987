//! Metadata long-poll watcher.
//!
//! Each run blocks on the metadata server until the descriptor's ETag moves
//! past the last one seen, then hands the new snapshot to subscribers. The
//! very first run has no ETag and returns the current snapshot immediately.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use agent_metadata::{MetadataClient, MetadataError};

use crate::event::EventPayload;
use crate::watcher::{WatchOutcome, Watcher};

pub const WATCHER_ID: &str = "metadata-watcher";
pub const LONGPOLL_EVENT: &str = "metadata-watcher,longpoll";

/// Delay before retrying after consecutive failures: `initial`, doubling,
/// never above `max`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub initial: Duration,
    pub max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(60),
        }
    }
}

impl Backoff {
    pub fn delay(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let factor = 1u32.checked_shl(failures - 1).unwrap_or(u32::MAX);
        self.initial.saturating_mul(factor).min(self.max)
    }
}

#[derive(Debug, Default)]
struct PollState {
    etag: Option<String>,
    failures: u32,
}

pub struct MetadataWatcher {
    client: Arc<dyn MetadataClient>,
    backoff: Backoff,
    state: Mutex<PollState>,
}

impl MetadataWatcher {
    pub fn new(client: Arc<dyn MetadataClient>) -> Self {
        Self::with_backoff(client, Backoff::default())
    }

    pub fn with_backoff(client: Arc<dyn MetadataClient>, backoff: Backoff) -> Self {
        Self {
            client,
            backoff,
            state: Mutex::new(PollState::default()),
        }
    }
}

#[async_trait]
impl Watcher for MetadataWatcher {
    fn id(&self) -> &'static str {
        WATCHER_ID
    }

    fn events(&self) -> Vec<&'static str> {
        vec![LONGPOLL_EVENT]
    }

    async fn run(&self, cancel: &CancellationToken, _event_type: &str) -> WatchOutcome {
        let mut state = self.state.lock().await;

        let delay = self.backoff.delay(state.failures);
        if !delay.is_zero() {
            tracing::debug!(delay_ms = delay.as_millis() as u64, "backing off before long-poll");
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return WatchOutcome::stop(),
                _ = tokio::time::sleep(delay) => {}
            }
        }

        match self.client.watch(cancel, state.etag.as_deref()).await {
            Ok(watched) => {
                state.failures = 0;
                if !watched.etag.is_empty() && state.etag.as_deref() == Some(watched.etag.as_str()) {
                    return WatchOutcome::unchanged();
                }
                state.etag = Some(watched.etag);
                WatchOutcome::data(EventPayload::Metadata(Arc::new(watched.descriptor)))
            }
            Err(MetadataError::Cancelled) => WatchOutcome::stop(),
            Err(err) => {
                state.failures = state.failures.saturating_add(1);
                WatchOutcome::failed(err.into())
            }
        }
    }
}
