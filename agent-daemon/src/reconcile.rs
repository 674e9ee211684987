//! Reconciliation passes.
//!
//! A pass hands the same immutable [`Snapshots`] pair to every manager,
//! runs the eligible ones concurrently and joins them all. Passes are
//! serialized: the last-applied snapshot is held under an async mutex for
//! the whole pass and only advances once every manager has finished, so a
//! manager never diffs against a half-applied `old`.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use agent_core::{Descriptor, Platform};
use agent_events::{EventData, EventHandler};
use agent_managers::{Manager, Snapshots};

/// What happened to one manager in a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Disabled,
    NoDiff,
    Applied,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerReport {
    pub name: &'static str,
    pub outcome: Outcome,
}

/// Per-manager results of a pass, in manager-list order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    pub managers: Vec<ManagerReport>,
}

impl PassReport {
    pub fn applied(&self) -> Vec<&'static str> {
        self.with(|o| *o == Outcome::Applied)
    }

    pub fn failed(&self) -> Vec<&'static str> {
        self.with(|o| matches!(o, Outcome::Failed(_)))
    }

    pub fn skipped(&self) -> Vec<&'static str> {
        self.with(|o| matches!(o, Outcome::Disabled | Outcome::NoDiff))
    }

    fn with(&self, pick: impl Fn(&Outcome) -> bool) -> Vec<&'static str> {
        self.managers
            .iter()
            .filter(|r| pick(&r.outcome))
            .map(|r| r.name)
            .collect()
    }
}

async fn dispatch(
    platform: Platform,
    manager: Arc<dyn Manager>,
    snapshots: Snapshots,
    cancel: CancellationToken,
) -> Outcome {
    let name = manager.name();
    if manager.disabled(platform) {
        tracing::debug!(manager = name, "manager disabled, skipping");
        return Outcome::Disabled;
    }
    if !manager.timeout() && !manager.diff(&snapshots) {
        tracing::debug!(manager = name, "manager reports no diff");
        return Outcome::NoDiff;
    }
    tracing::debug!(manager = name, "running manager");
    match manager.set(&snapshots, &cancel).await {
        Ok(()) => Outcome::Applied,
        Err(err) => {
            tracing::error!(manager = name, error = %err, "error running manager");
            Outcome::Failed(err.to_string())
        }
    }
}

/// Run one pass over `managers`: one task each, all joined before
/// returning. A failing or panicking manager does not affect its siblings.
pub async fn run_update(
    platform: Platform,
    managers: &[Arc<dyn Manager>],
    snapshots: &Snapshots,
    cancel: &CancellationToken,
) -> PassReport {
    let mut tasks = JoinSet::new();
    for (idx, manager) in managers.iter().enumerate() {
        let fut = dispatch(platform, manager.clone(), snapshots.clone(), cancel.clone());
        tasks.spawn(async move { (idx, fut.await) });
    }

    let mut outcomes: Vec<Outcome> = vec![Outcome::Failed("task did not report".to_string()); managers.len()];
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((idx, outcome)) => outcomes[idx] = outcome,
            Err(err) => tracing::error!(error = %err, "manager task failed"),
        }
    }

    let report = PassReport {
        managers: managers
            .iter()
            .zip(outcomes)
            .map(|(m, outcome)| ManagerReport { name: m.name(), outcome })
            .collect(),
    };
    tracing::debug!(
        applied = ?report.applied(),
        failed = ?report.failed(),
        "reconciliation pass finished",
    );
    report
}

/// Owns the snapshot pair and turns long-poll events into passes.
pub struct Reconciler {
    platform: Platform,
    managers: Vec<Arc<dyn Manager>>,
    cancel: CancellationToken,
    applied: Mutex<Arc<Descriptor>>,
}

impl Reconciler {
    /// Nothing has been applied yet, so the first pass diffs against an
    /// empty descriptor, even when a startup snapshot was fetched.
    pub fn new(platform: Platform, managers: Vec<Arc<dyn Manager>>, cancel: CancellationToken) -> Self {
        Self {
            platform,
            managers,
            cancel,
            applied: Mutex::new(Arc::new(Descriptor::default())),
        }
    }

    /// Snapshot the last completed pass applied.
    pub async fn last_applied(&self) -> Arc<Descriptor> {
        self.applied.lock().await.clone()
    }

    pub async fn reconcile(&self, new: Arc<Descriptor>) -> PassReport {
        let mut applied = self.applied.lock().await;
        let snapshots = Snapshots {
            old: applied.clone(),
            new: new.clone(),
        };
        let report = run_update(self.platform, &self.managers, &snapshots, &self.cancel).await;
        *applied = new;
        report
    }
}

#[async_trait]
impl EventHandler for Reconciler {
    async fn handle(&self, event_type: &str, data: &EventData) -> bool {
        tracing::debug!(event = event_type, "handling metadata event");
        if let Some(err) = &data.error {
            tracing::info!(error = %err, "metadata event watcher failed, ignoring");
            return true;
        }
        let Some(descriptor) = data.metadata() else {
            tracing::info!("metadata event watcher didn't pass in the metadata, ignoring");
            return true;
        };
        self.reconcile(descriptor.clone()).await;
        true
    }
}
