use std::fs;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use agent_core::os_info::OsInfo;
use agent_core::run::fake::FakeRunner;
use agent_core::{Descriptor, Platform};
use agent_daemon::logging::LogOptions;
use agent_daemon::{run, run_agent, AgentDeps, AgentError, AgentOptions};
use agent_managers::{AccountPaths, HostPaths};
use agent_metadata::fake::FakeMetadataClient;
use agent_metadata::Watched;
use agent_service::{DoneSignal, ServiceError, ServiceHandler, ServiceManager, ServiceState};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// Records reported states; optionally refuses to report Stopped or is slow
/// to register.
#[derive(Default, Clone)]
struct Journal {
    states: Arc<Mutex<Vec<ServiceState>>>,
    fail_stopped: bool,
    register_delay: Duration,
}

impl Journal {
    fn states(&self) -> Vec<ServiceState> {
        self.states.lock().unwrap().clone()
    }
}

#[async_trait]
impl ServiceHandler for Journal {
    fn name(&self) -> &'static str {
        "journal"
    }

    async fn register(&self, _cancel: &CancellationToken) -> Result<(), ServiceError> {
        tokio::time::sleep(self.register_delay).await;
        Ok(())
    }

    async fn set_state(
        &self,
        _cancel: &CancellationToken,
        state: ServiceState,
    ) -> Result<(), ServiceError> {
        self.states.lock().unwrap().push(state);
        if self.fail_stopped && state == ServiceState::Stopped {
            return Err(ServiceError::StatusClosed);
        }
        Ok(())
    }
}

struct Host {
    dir: TempDir,
    opts: AgentOptions,
    client: Arc<FakeMetadataClient>,
    runner: Arc<FakeRunner>,
}

impl Host {
    fn new() -> Self {
        let dir = TempDir::new().expect("tempdir");
        let root = dir.path();
        let config = root.join("instance_configs.cfg");
        fs::write(&config, "[Daemons]\nclock_skew_daemon = false\n").expect("config");
        fs::write(root.join("hosts"), "127.0.0.1 localhost\n").expect("hosts");
        fs::write(root.join("passwd"), "root:x:0:0:root:/root:/bin/bash\n").expect("passwd");
        fs::write(root.join("group"), "root:x:0:\n").expect("group");

        let opts = AgentOptions {
            platform: Platform::Linux,
            config_path: config,
            hosts_path: root.join("hosts"),
            trusted_ca_path: root.join("oslogin_trustedca.pub"),
            log: LogOptions {
                platform: Platform::Linux,
                debug: true,
            },
        };
        Self {
            dir,
            opts,
            client: Arc::new(FakeMetadataClient::new()),
            runner: Arc::new(FakeRunner::new()),
        }
    }

    fn deps(&self) -> AgentDeps {
        let root = self.dir.path();
        AgentDeps {
            client: self.client.clone(),
            runner: self.runner.clone(),
            host_paths: HostPaths {
                sys_class_net: root.join("net"),
                accounts: AccountPaths {
                    passwd: root.join("passwd"),
                    group: root.join("group"),
                    home_root: root.join("home"),
                    users_file: root.join("google_users"),
                },
            },
            os_info: OsInfo {
                os: "linux".into(),
                arch: "x86_64".into(),
                id: "debian".into(),
                version_id: "12".into(),
                pretty_name: "Debian GNU/Linux 12".into(),
                kernel_release: "6.1.0".into(),
            },
        }
    }
}

async fn wait_for(what: &str, mut check: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(10), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {what}"));
}

fn snapshot(project: &str, oslogin: bool) -> Descriptor {
    let mut d = Descriptor::default();
    d.project.project_id = project.to_string();
    d.instance.attributes.enable_oslogin = Some(oslogin);
    d
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn unreachable_metadata_still_reports_running_and_stops_on_cancel() {
    let host = Host::new();
    let journal = Journal::default();
    let svc = Arc::new(ServiceManager::new(DoneSignal::new(), Box::new(journal.clone())));
    let root = CancellationToken::new();

    let task = tokio::spawn({
        let (root, svc, opts, deps) = (root.clone(), svc.clone(), host.opts.clone(), host.deps());
        async move { run_agent(&root, &svc, &opts, deps).await }
    });

    wait_for("running", || journal.states() == vec![ServiceState::Running]).await;
    root.cancel();

    let summary = task.await.expect("join").expect("run_agent");
    assert_eq!(summary.watchers, vec!["metadata-watcher"]);
    assert_eq!(summary.startup_project, None);

    let hosts = fs::read_to_string(&host.opts.hosts_path).expect("hosts");
    assert!(hosts.contains("169.254.169.254 metadata.google.internal"));
}

#[tokio::test]
async fn metadata_change_runs_a_reconcile_pass() {
    let host = Host::new();
    host.client.push_get(Some(snapshot("my-project", false)));
    host.client.push_watch(Some(Watched {
        descriptor: snapshot("my-project", true),
        etag: "1".to_string(),
    }));
    let journal = Journal::default();
    let svc = Arc::new(ServiceManager::new(DoneSignal::new(), Box::new(journal.clone())));
    let root = CancellationToken::new();

    let task = tokio::spawn({
        let (root, svc, opts, deps) = (root.clone(), svc.clone(), host.opts.clone(), host.deps());
        async move { run_agent(&root, &svc, &opts, deps).await }
    });

    let runner = host.runner.clone();
    wait_for("oslogin pass", || {
        runner
            .calls()
            .iter()
            .any(|c| c == "google_oslogin_control activate")
    })
    .await;
    root.cancel();

    let summary = task.await.expect("join").expect("run_agent");
    // OS Login was off at startup, so the CA pipe watcher stays off.
    assert_eq!(summary.watchers, vec!["metadata-watcher"]);
    assert_eq!(summary.startup_project.as_deref(), Some("my-project"));
    assert!(!host.runner.calls().iter().any(|c| c.starts_with("hwclock")));
    assert_eq!(host.client.telemetry_sent().len(), 1);
}

#[tokio::test]
async fn done_signal_reports_stopped_and_unwinds() {
    let host = Host::new();
    let journal = Journal::default();
    let svc = ServiceManager::new(DoneSignal::new(), Box::new(journal.clone()));
    let done = svc.done().clone();

    let task = tokio::spawn(run(host.opts.clone(), host.deps(), svc));

    wait_for("running", || journal.states() == vec![ServiceState::Running]).await;
    assert!(done.fire());

    task.await.expect("join").expect("run");
    assert_eq!(
        journal.states(),
        vec![ServiceState::Running, ServiceState::Stopped]
    );
    assert!(!done.fire(), "done fires once");
}

#[tokio::test]
async fn failing_to_report_stopped_is_an_error_but_still_unwinds() {
    let host = Host::new();
    let journal = Journal {
        fail_stopped: true,
        ..Journal::default()
    };
    let svc = ServiceManager::new(DoneSignal::new(), Box::new(journal.clone()));
    let done = svc.done().clone();

    let task = tokio::spawn(run(host.opts.clone(), host.deps(), svc));

    wait_for("running", || journal.states() == vec![ServiceState::Running]).await;
    done.fire();

    let err = tokio::time::timeout(Duration::from_secs(10), task)
        .await
        .expect("run returns")
        .expect("join")
        .unwrap_err();
    assert!(matches!(err, AgentError::SetStopped(_)), "{err:?}");
}

#[tokio::test]
async fn stop_during_startup_never_reports_running() {
    let host = Host::new();
    let journal = Journal {
        register_delay: Duration::from_millis(50),
        ..Journal::default()
    };
    let svc = ServiceManager::new(DoneSignal::new(), Box::new(journal.clone()));
    assert!(svc.done().fire());

    let summary = tokio::time::timeout(Duration::from_secs(10), run(host.opts.clone(), host.deps(), svc))
        .await
        .expect("run returns")
        .expect("run");

    assert_eq!(journal.states(), vec![ServiceState::Stopped]);
    assert!(summary.watchers.is_empty());
}
