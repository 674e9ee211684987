use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::error::EventError;
use crate::event::EventData;
use crate::watcher::{Watcher, WatcherRegistry};

/// Which watchers are active for this run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    pub watchers: Vec<String>,
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Handle one event. Returning `false` drops the subscription.
    async fn handle(&self, event_type: &str, data: &EventData) -> bool;
}

#[derive(Clone)]
struct Subscription {
    key: String,
    handler: Arc<dyn EventHandler>,
}

#[derive(Clone, Default)]
struct Subscribers {
    inner: Arc<Mutex<HashMap<String, Vec<Subscription>>>>,
}

impl Subscribers {
    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Vec<Subscription>>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn add(&self, event_type: &str, key: &str, handler: Arc<dyn EventHandler>) {
        let mut map = self.lock();
        let subs = map.entry(event_type.to_string()).or_default();
        let sub = Subscription {
            key: key.to_string(),
            handler,
        };
        match subs.iter_mut().find(|s| s.key == key) {
            Some(existing) => *existing = sub,
            None => subs.push(sub),
        }
    }

    fn remove(&self, event_type: &str, key: &str) -> bool {
        let mut map = self.lock();
        let Some(subs) = map.get_mut(event_type) else {
            return false;
        };
        let before = subs.len();
        subs.retain(|s| s.key != key);
        before != subs.len()
    }

    fn snapshot(&self, event_type: &str) -> Vec<Subscription> {
        self.lock().get(event_type).cloned().unwrap_or_default()
    }

    fn count(&self, event_type: &str) -> usize {
        self.lock().get(event_type).map_or(0, Vec::len)
    }
}

/// Runs the configured watchers and delivers their events to subscribers.
pub struct EventManager {
    watchers: Vec<Arc<dyn Watcher>>,
    subscribers: Subscribers,
}

impl EventManager {
    /// Resolve `config.watchers` against `registry`. Unknown or repeated IDs
    /// and an empty list are rejected.
    pub fn new(config: &Config, registry: &WatcherRegistry) -> Result<Self, EventError> {
        if config.watchers.is_empty() {
            return Err(EventError::NoWatchers);
        }
        let mut seen = BTreeSet::new();
        let mut watchers = Vec::with_capacity(config.watchers.len());
        for id in &config.watchers {
            if !seen.insert(id.as_str()) {
                return Err(EventError::DuplicateWatcher(id.clone()));
            }
            let watcher = registry
                .get(id)
                .ok_or_else(|| EventError::UnknownWatcher(id.clone()))?;
            watchers.push(watcher);
        }
        Ok(Self {
            watchers,
            subscribers: Subscribers::default(),
        })
    }

    pub fn watcher_ids(&self) -> Vec<&'static str> {
        self.watchers.iter().map(|w| w.id()).collect()
    }

    /// Register `handler` under `key`. A second subscription with the same
    /// key replaces the first.
    pub fn subscribe(&self, event_type: &str, key: &str, handler: Arc<dyn EventHandler>) {
        tracing::debug!(event = event_type, key = key, "subscribing");
        self.subscribers.add(event_type, key, handler);
    }

    pub fn unsubscribe(&self, event_type: &str, key: &str) -> bool {
        self.subscribers.remove(event_type, key)
    }

    pub fn subscriber_count(&self, event_type: &str) -> usize {
        self.subscribers.count(event_type)
    }

    /// Drive every (watcher, event type) loop until `cancel` fires or all
    /// loops have ended.
    pub async fn run(&self, cancel: &CancellationToken) {
        let mut loops = JoinSet::new();
        for watcher in &self.watchers {
            for event_type in watcher.events() {
                loops.spawn(event_loop(
                    watcher.clone(),
                    event_type,
                    self.subscribers.clone(),
                    cancel.clone(),
                ));
            }
        }

        while let Some(joined) = loops.join_next().await {
            if let Err(err) = joined {
                tracing::error!(error = %err, "event loop task failed");
            }
        }
        tracing::info!("event manager stopped");
    }
}

async fn event_loop(
    watcher: Arc<dyn Watcher>,
    event_type: &'static str,
    subscribers: Subscribers,
    cancel: CancellationToken,
) {
    let id = watcher.id();
    tracing::debug!(watcher = id, event = event_type, "event loop started");

    loop {
        if subscribers.count(event_type) == 0 {
            tracing::info!(watcher = id, event = event_type, "no subscribers left, stopping watcher");
            break;
        }

        let outcome = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            outcome = watcher.run(&cancel, event_type) => outcome,
        };
        let renew = outcome.renew;
        let data = EventData {
            data: outcome.data,
            error: outcome.error,
        };

        for sub in subscribers.snapshot(event_type) {
            if !sub.handler.handle(event_type, &data).await {
                tracing::debug!(event = event_type, key = %sub.key, "subscriber detached");
                subscribers.remove(event_type, &sub.key);
            }
        }

        if !renew {
            tracing::debug!(watcher = id, event = event_type, "watcher did not renew");
            break;
        }
        if cancel.is_cancelled() {
            break;
        }
    }
}
