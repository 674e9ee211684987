//! Clock skew correction after live migration.
//!
//! The metadata server bumps `virtualClock.driftToken` whenever the guest
//! clock may have drifted; the system clock is then reloaded from the
//! hardware clock. The reload is also re-asserted once an hour.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use agent_core::{CommandRunner, Config, Platform};

use crate::error::ManagerError;
use crate::{Manager, Snapshots};

pub const REASSERT_AFTER: Duration = Duration::from_secs(60 * 60);

pub struct ClockSkewManager {
    config: Arc<Config>,
    runner: Arc<dyn CommandRunner>,
    last_success: Mutex<Option<Instant>>,
}

impl ClockSkewManager {
    pub fn new(config: Arc<Config>, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            config,
            runner,
            last_success: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Manager for ClockSkewManager {
    fn name(&self) -> &'static str {
        "clock-skew"
    }

    fn disabled(&self, platform: Platform) -> bool {
        platform.is_windows() || !self.config.get_bool("Daemons", "clock_skew_daemon", true)
    }

    fn diff(&self, snapshots: &Snapshots) -> bool {
        snapshots.old.instance.virtual_clock.drift_token
            != snapshots.new.instance.virtual_clock.drift_token
    }

    fn timeout(&self) -> bool {
        match *self.last_success.lock().unwrap_or_else(|e| e.into_inner()) {
            None => true,
            Some(at) => at.elapsed() >= REASSERT_AFTER,
        }
    }

    async fn set(&self, snapshots: &Snapshots, cancel: &CancellationToken) -> Result<(), ManagerError> {
        tracing::info!(
            drift_token = %snapshots.new.instance.virtual_clock.drift_token,
            "syncing system clock from hardware clock",
        );
        self.runner
            .run(cancel, "hwclock", &["--hctosys", "-u", "--noadjfile"])
            .await?;
        *self.last_success.lock().unwrap_or_else(|e| e.into_inner()) = Some(Instant::now());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use agent_core::run::fake::FakeRunner;
    use agent_core::Descriptor;

    use super::*;

    fn snapshots(old: &str, new: &str) -> Snapshots {
        let mut o = Descriptor::default();
        o.instance.virtual_clock.drift_token = old.to_string();
        let mut n = Descriptor::default();
        n.instance.virtual_clock.drift_token = new.to_string();
        Snapshots {
            old: Arc::new(o),
            new: Arc::new(n),
        }
    }

    #[test]
    fn diff_tracks_drift_token() {
        let m = ClockSkewManager::new(Arc::new(Config::default()), Arc::new(FakeRunner::new()));
        assert!(m.diff(&snapshots("1", "2")));
        assert!(!m.diff(&snapshots("2", "2")));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_until_success_then_hourly() {
        let runner = Arc::new(FakeRunner::new());
        let m = ClockSkewManager::new(Arc::new(Config::default()), runner.clone());
        assert!(m.timeout(), "never synced");

        m.set(&snapshots("", ""), &CancellationToken::new())
            .await
            .expect("set");
        assert!(!m.timeout());
        assert_eq!(runner.calls(), vec!["hwclock --hctosys -u --noadjfile"]);

        tokio::time::advance(REASSERT_AFTER).await;
        assert!(m.timeout());
    }

    #[tokio::test]
    async fn failed_sync_keeps_requesting() {
        let runner = Arc::new(FakeRunner::new());
        runner.fail("hwclock", "no rtc");
        let m = ClockSkewManager::new(Arc::new(Config::default()), runner);
        assert!(m.set(&snapshots("1", "2"), &CancellationToken::new()).await.is_err());
        assert!(m.timeout());
    }

    #[test]
    fn config_switch_disables() {
        let cfg = Config::parse("[Daemons]\nclock_skew_daemon = false\n", std::path::Path::new("t"))
            .expect("cfg");
        let m = ClockSkewManager::new(Arc::new(cfg), Arc::new(FakeRunner::new()));
        assert!(m.disabled(Platform::Linux));
    }
}
