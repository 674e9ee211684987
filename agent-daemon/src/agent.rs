//! The agent's main sequence: bring up logging and config, report Running,
//! wire the watchers to the reconciler and block in the event loop until
//! the root token is cancelled.

use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use agent_core::os_info::{self, OsInfo};
use agent_core::{CommandRunner, Config, Descriptor, Platform, TokioRunner};
use agent_events::metadata::{self as metadata_watcher, MetadataWatcher, LONGPOLL_EVENT};
use agent_events::trusted_ca::{self, TrustedCaWatcher, DEFAULT_PIPE_PATH};
use agent_events::{Config as EventsConfig, EventManager, WatcherRegistry};
use agent_managers::{for_platform, HostPaths, ManagerDeps};
use agent_metadata::{HttpClient, MetadataClient};
use agent_service::{ServiceManager, ServiceState};

use crate::agent_init::agent_init;
use crate::error::AgentError;
use crate::logging::{self, LogOptions};
use crate::paths::{config_path, HOSTS_PATH, PROGRAM_NAME, VERSION};
use crate::reconcile::Reconciler;
use crate::scheduler::{schedule_jobs, Job};
use crate::sshca;
use crate::telemetry::TelemetryJob;

/// Subscriber key for the reconciler on the long-poll event.
pub const RECONCILER_KEY: &str = "reconciler";

/// Where the agent reads and writes on the host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentOptions {
    pub platform: Platform,
    pub config_path: PathBuf,
    pub hosts_path: PathBuf,
    pub trusted_ca_path: PathBuf,
    pub log: LogOptions,
}

impl AgentOptions {
    /// Real host locations for `platform`, with an optional config override.
    pub fn for_platform(platform: Platform, config_override: Option<PathBuf>) -> Self {
        Self {
            platform,
            config_path: config_override.unwrap_or_else(|| config_path(platform)),
            hosts_path: PathBuf::from(HOSTS_PATH),
            trusted_ca_path: PathBuf::from(DEFAULT_PIPE_PATH),
            log: LogOptions::from_env(platform),
        }
    }
}

/// Collaborators the agent talks to.
#[derive(Clone)]
pub struct AgentDeps {
    pub client: Arc<dyn MetadataClient>,
    pub runner: Arc<dyn CommandRunner>,
    pub host_paths: HostPaths,
    pub os_info: OsInfo,
}

impl AgentDeps {
    /// The real metadata server, process runner and host paths.
    pub fn host() -> Result<Self, AgentError> {
        Ok(Self {
            client: Arc::new(HttpClient::new()?),
            runner: Arc::new(TokioRunner),
            host_paths: HostPaths::default(),
            os_info: os_info::detect(),
        })
    }
}

/// What a completed run looked like.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentSummary {
    /// Watchers the event manager ran with.
    pub watchers: Vec<String>,
    /// Project id from the startup snapshot, when it could be fetched.
    pub startup_project: Option<String>,
}

/// Active watcher set. The trusted CA pipe watcher is only included when
/// OS Login is enabled in the startup snapshot; the choice is not revisited
/// for the rest of the run.
pub fn watcher_ids(snapshot: Option<&Descriptor>) -> Vec<String> {
    let mut ids = vec![metadata_watcher::WATCHER_ID.to_string()];
    if snapshot.is_some_and(|d| d.os_login().enabled) {
        ids.push(trusted_ca::WATCHER_ID.to_string());
    }
    ids
}

pub async fn run_agent(
    root: &CancellationToken,
    svc: &ServiceManager,
    opts: &AgentOptions,
    deps: AgentDeps,
) -> Result<AgentSummary, AgentError> {
    logging::init(&opts.log)?;
    tracing::info!(version = VERSION, "GCE Agent Started");

    let config = Arc::new(Config::load_layered(&opts.config_path)?);
    tracing::debug!(sources = ?config.sources(), "loaded configuration");

    let client = deps.client;
    agent_init(opts.platform, &deps.os_info, &opts.hosts_path);

    if root.is_cancelled() || svc.done().is_fired() {
        tracing::info!("shutdown requested before startup finished");
        return Ok(AgentSummary {
            watchers: Vec::new(),
            startup_project: None,
        });
    }
    svc.set_state(root, ServiceState::Running)
        .await
        .map_err(AgentError::SetRunning)?;

    // Routes set up by agent_init may only now have made the server reachable.
    let snapshot = match client.get(root).await {
        Ok(descriptor) => Some(Arc::new(descriptor)),
        Err(err) => {
            tracing::warn!(error = %err, "error getting metadata");
            None
        }
    };
    let startup_project = snapshot
        .as_deref()
        .and_then(Descriptor::project_id)
        .map(str::to_string);
    if let Some(project) = &startup_project {
        if let Err(err) = logging::reinit_with_project(project) {
            tracing::error!(error = %err, "error re-initializing logger");
        }
    }

    let jobs: Vec<Arc<dyn Job>> = vec![Arc::new(TelemetryJob::new(
        client.clone(),
        config.clone(),
        snapshot.as_deref(),
        &deps.os_info,
        PROGRAM_NAME,
        VERSION,
    ))];
    schedule_jobs(root, jobs);

    let watchers = watcher_ids(snapshot.as_deref());
    tracing::info!(watchers = ?watchers, "starting event watchers");
    let mut registry = WatcherRegistry::new();
    registry
        .register(Arc::new(MetadataWatcher::new(client.clone())))
        .register(Arc::new(TrustedCaWatcher::new(opts.trusted_ca_path.clone())));
    let events = EventManager::new(
        &EventsConfig {
            watchers: watchers.clone(),
        },
        &registry,
    )?;

    sshca::init(&events, client.clone(), root.clone());

    let managers = for_platform(
        opts.platform,
        &ManagerDeps {
            config,
            runner: deps.runner,
            paths: deps.host_paths,
        },
    );
    for manager in &managers {
        let status = if manager.disabled(opts.platform) { "disabled" } else { "enabled" };
        tracing::info!(manager = manager.name(), status = status, "GCE manager status");
    }
    let reconciler = Arc::new(Reconciler::new(opts.platform, managers, root.clone()));
    events.subscribe(LONGPOLL_EVENT, RECONCILER_KEY, reconciler);

    events.run(root).await;
    tracing::info!("GCE Agent Stopped");

    Ok(AgentSummary {
        watchers,
        startup_project,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trusted_ca_watcher_follows_startup_oslogin() {
        assert_eq!(watcher_ids(None), vec!["metadata-watcher"]);

        let mut d = Descriptor::default();
        assert_eq!(watcher_ids(Some(&d)), vec!["metadata-watcher"]);

        d.instance.attributes.enable_oslogin = Some(true);
        assert_eq!(
            watcher_ids(Some(&d)),
            vec!["metadata-watcher", "ssh-trusted-ca-pipe-watcher"]
        );
    }

    #[test]
    fn options_default_to_host_paths() {
        let opts = AgentOptions::for_platform(Platform::Linux, None);
        assert_eq!(opts.config_path, PathBuf::from("/etc/default/instance_configs.cfg"));
        assert_eq!(opts.hosts_path, PathBuf::from("/etc/hosts"));

        let custom = AgentOptions::for_platform(Platform::Linux, Some(PathBuf::from("/tmp/x.cfg")));
        assert_eq!(custom.config_path, PathBuf::from("/tmp/x.cfg"));
    }
}
