use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::WatchError;
use crate::event::EventPayload;

/// Result of one watcher run.
#[derive(Debug)]
pub struct WatchOutcome {
    /// `false` ends this watcher's loop for the event type.
    pub renew: bool,
    pub data: Option<EventPayload>,
    pub error: Option<WatchError>,
}

impl WatchOutcome {
    pub fn data(data: EventPayload) -> Self {
        Self {
            renew: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn unchanged() -> Self {
        Self {
            renew: true,
            data: None,
            error: None,
        }
    }

    pub fn failed(error: WatchError) -> Self {
        Self {
            renew: true,
            data: None,
            error: Some(error),
        }
    }

    pub fn stop() -> Self {
        Self {
            renew: false,
            data: None,
            error: None,
        }
    }
}

#[async_trait]
pub trait Watcher: Send + Sync {
    /// Stable identifier used in [`Config::watchers`](crate::Config).
    fn id(&self) -> &'static str;

    /// Event types this watcher produces.
    fn events(&self) -> Vec<&'static str>;

    /// Block until there is something to report for `event_type`.
    async fn run(&self, cancel: &CancellationToken, event_type: &str) -> WatchOutcome;
}

/// Every watcher the process knows how to build, keyed by ID.
#[derive(Default, Clone)]
pub struct WatcherRegistry {
    watchers: BTreeMap<&'static str, Arc<dyn Watcher>>,
}

impl WatcherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, watcher: Arc<dyn Watcher>) -> &mut Self {
        self.watchers.insert(watcher.id(), watcher);
        self
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Watcher>> {
        self.watchers.get(id).cloned()
    }

    pub fn ids(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.watchers.keys().copied()
    }
}
