//! On-demand diagnostics collection.
//!
//! Writing a request into the `diagnostics` instance attribute asks the
//! agent to run the collector, which uploads its archive to the signed URL.
//! Only one collection runs at a time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use agent_core::types::parse_bool;
use agent_core::{CommandRunner, Config, Descriptor, Platform};

use crate::error::ManagerError;
use crate::ssh_keys::parse_expiry;
use crate::{Manager, Snapshots};

pub const COLLECTOR: &str = r"C:\Program Files\Google\Compute Engine\diagnostics\diagnostics.exe";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticsRequest {
    pub signed_url: String,
    pub expire_on: String,
    #[serde(default)]
    pub trace: bool,
}

pub struct DiagnosticsManager {
    config: Arc<Config>,
    runner: Arc<dyn CommandRunner>,
    running: Arc<AtomicBool>,
    collector: Mutex<Option<JoinHandle<()>>>,
}

impl DiagnosticsManager {
    pub fn new(config: Arc<Config>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            config,
            runner,
            running: Arc::new(AtomicBool::new(false)),
            collector: Mutex::new(None),
        }
    }

    fn enabled(&self, descriptor: &Descriptor) -> bool {
        self.config
            .get("diagnostics", "enable")
            .and_then(parse_bool)
            .or_else(|| descriptor.flag(|a| a.enable_diagnostics))
            .unwrap_or(false)
    }

    #[cfg(test)]
    async fn join_collector(&self) {
        let handle = self.collector.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(handle) = handle {
            handle.await.expect("collector task");
        }
    }
}

#[async_trait]
impl Manager for DiagnosticsManager {
    fn name(&self) -> &'static str {
        "diagnostics"
    }

    fn disabled(&self, platform: Platform) -> bool {
        !platform.is_windows()
    }

    fn diff(&self, snapshots: &Snapshots) -> bool {
        snapshots.old.instance.attributes.diagnostics != snapshots.new.instance.attributes.diagnostics
    }

    fn timeout(&self) -> bool {
        false
    }

    async fn set(&self, snapshots: &Snapshots, cancel: &CancellationToken) -> Result<(), ManagerError> {
        if !self.enabled(&snapshots.new) {
            tracing::debug!("diagnostics collection is disabled");
            return Ok(());
        }
        let Some(raw) = snapshots.new.instance.attributes.diagnostics.as_deref() else {
            return Ok(());
        };
        if raw.trim().is_empty() {
            return Ok(());
        }
        let request: DiagnosticsRequest = serde_json::from_str(raw)
            .map_err(|source| ManagerError::InvalidAttribute { key: "diagnostics", source })?;

        if parse_expiry(&request.expire_on).map_or(true, |at| at < Utc::now()) {
            tracing::info!(expire_on = %request.expire_on, "ignoring expired diagnostics request");
            return Ok(());
        }
        if self.running.swap(true, Ordering::SeqCst) {
            tracing::info!("diagnostics collection already running, ignoring request");
            return Ok(());
        }

        let mut args = vec!["-signedUrl".to_string(), request.signed_url];
        if request.trace {
            args.push("-trace".to_string());
        }
        let runner = self.runner.clone();
        let running = self.running.clone();
        let cancel = cancel.clone();
        tracing::info!(trace = request.trace, "collecting diagnostics");
        let handle = tokio::spawn(async move {
            let args: Vec<&str> = args.iter().map(String::as_str).collect();
            match runner.run(&cancel, COLLECTOR, &args).await {
                Ok(_) => tracing::info!("diagnostics collection finished"),
                Err(err) => tracing::error!(error = %err, "diagnostics collection failed"),
            }
            running.store(false, Ordering::SeqCst);
        });
        *self.collector.lock().unwrap_or_else(|e| e.into_inner()) = Some(handle);
        Ok(())
    }
}
