//! Daily agent telemetry.
//!
//! Reports agent and OS identity to the metadata server. Turned off by
//! `[Telemetry] disable` in the config or by the `disable-guest-telemetry`
//! attribute in the startup snapshot.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use agent_core::os_info::OsInfo;
use agent_core::{Config, Descriptor};
use agent_metadata::{MetadataClient, Telemetry};

use crate::scheduler::Job;

pub const JOB_ID: &str = "telemetryJobID";
pub const INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

pub struct TelemetryJob {
    client: Arc<dyn MetadataClient>,
    config: Arc<Config>,
    disabled_by_metadata: bool,
    report: Telemetry,
}

impl TelemetryJob {
    pub fn new(
        client: Arc<dyn MetadataClient>,
        config: Arc<Config>,
        snapshot: Option<&Descriptor>,
        os: &OsInfo,
        agent_name: &str,
        agent_version: &str,
    ) -> Self {
        Self {
            client,
            config,
            disabled_by_metadata: snapshot
                .and_then(|d| d.flag(|a| a.disable_guest_telemetry))
                .unwrap_or(false),
            report: Telemetry {
                agent_name: agent_name.to_string(),
                agent_version: agent_version.to_string(),
                agent_arch: os.arch.clone(),
                os: os.os.clone(),
                os_version: if os.version_id.is_empty() {
                    os.pretty_name.clone()
                } else {
                    format!("{} {}", os.id, os.version_id)
                },
                kernel_release: os.kernel_release.clone(),
            },
        }
    }
}

#[async_trait]
impl Job for TelemetryJob {
    fn id(&self) -> &str {
        JOB_ID
    }

    fn interval(&self) -> Duration {
        INTERVAL
    }

    fn should_enable(&self) -> bool {
        !self.config.get_bool("Telemetry", "disable", false) && !self.disabled_by_metadata
    }

    async fn run(&self, cancel: &CancellationToken) -> bool {
        if let Err(err) = self.client.send_telemetry(cancel, &self.report).await {
            tracing::debug!(error = %err, "failed to send telemetry");
        }
        true
    }
}
