use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use agent_core::{CommandRunner, Platform};

use crate::error::ManagerError;
use crate::{Manager, Snapshots};

const CONTROL: &str = "google_oslogin_control";

/// Switches the OS Login NSS/PAM/sshd integration on and off.
pub struct OsLoginManager {
    runner: Arc<dyn CommandRunner>,
}

impl OsLoginManager {
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl Manager for OsLoginManager {
    fn name(&self) -> &'static str {
        "oslogin"
    }

    fn disabled(&self, platform: Platform) -> bool {
        platform.is_windows()
    }

    fn diff(&self, snapshots: &Snapshots) -> bool {
        snapshots.old.os_login() != snapshots.new.os_login()
    }

    fn timeout(&self) -> bool {
        false
    }

    async fn set(&self, snapshots: &Snapshots, cancel: &CancellationToken) -> Result<(), ManagerError> {
        let flags = snapshots.new.os_login();
        let mut args = vec![if flags.enabled { "activate" } else { "deactivate" }];
        if flags.two_factor {
            args.push("--twofactor");
        }
        tracing::info!(
            enabled = flags.enabled,
            two_factor = flags.two_factor,
            "updating OS Login configuration",
        );
        self.runner.run(cancel, CONTROL, &args).await?;
        Ok(())
    }
}
