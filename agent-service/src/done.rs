use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

/// One-shot shutdown trigger shared by the signal listener and the service
/// handlers. Only the first [`fire`](DoneSignal::fire) has any effect.
#[derive(Debug, Clone, Default)]
pub struct DoneSignal {
    token: CancellationToken,
    fired: Arc<AtomicBool>,
}

impl DoneSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` for the call that actually fired the signal.
    pub fn fire(&self) -> bool {
        if self.fired.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.token.cancel();
        true
    }

    pub fn is_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }

    pub async fn wait(&self) {
        self.token.cancelled().await;
    }
}
