//! Scripted [`MetadataClient`] for tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use agent_core::Descriptor;

use crate::{MetadataClient, MetadataError, Telemetry, Watched};

/// `get` and `watch` pop from scripted queues. An empty `get` queue fails
/// like an unreachable server; an empty `watch` queue blocks until cancelled.
#[derive(Debug, Default)]
pub struct FakeMetadataClient {
    gets: Mutex<VecDeque<Option<Descriptor>>>,
    watches: Mutex<VecDeque<Option<Watched>>>,
    keys: Mutex<HashMap<String, String>>,
    telemetry: Mutex<Vec<Telemetry>>,
}

fn unavailable() -> MetadataError {
    MetadataError::Status {
        url: "fake://metadata".to_string(),
        status: 503,
    }
}

impl FakeMetadataClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a `get` result; `None` queues a failure.
    pub fn push_get(&self, descriptor: Option<Descriptor>) {
        self.gets.lock().unwrap_or_else(|e| e.into_inner()).push_back(descriptor);
    }

    /// Queue a `watch` result; `None` queues a failure.
    pub fn push_watch(&self, watched: Option<Watched>) {
        self.watches
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(watched);
    }

    pub fn set_key(&self, key: &str, value: &str) {
        self.keys
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), value.to_string());
    }

    pub fn telemetry_sent(&self) -> Vec<Telemetry> {
        self.telemetry.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl MetadataClient for FakeMetadataClient {
    async fn get(&self, _cancel: &CancellationToken) -> Result<Descriptor, MetadataError> {
        let next = self.gets.lock().unwrap_or_else(|e| e.into_inner()).pop_front();
        next.flatten().ok_or_else(unavailable)
    }

    async fn watch(
        &self,
        cancel: &CancellationToken,
        _etag: Option<&str>,
    ) -> Result<Watched, MetadataError> {
        let next = self
            .watches
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        match next {
            Some(Some(watched)) => Ok(watched),
            Some(None) => Err(unavailable()),
            None => {
                cancel.cancelled().await;
                Err(MetadataError::Cancelled)
            }
        }
    }

    async fn get_key(&self, _cancel: &CancellationToken, key: &str) -> Result<String, MetadataError> {
        self.keys
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
            .ok_or_else(unavailable)
    }

    async fn send_telemetry(
        &self,
        _cancel: &CancellationToken,
        telemetry: &Telemetry,
    ) -> Result<(), MetadataError> {
        self.telemetry
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(telemetry.clone());
        Ok(())
    }
}
