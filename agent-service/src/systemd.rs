//! systemd notify handler.
//!
//! Talks to systemd through `systemd-notify`. Outside a systemd unit
//! (`NOTIFY_SOCKET` unset) every call is a successful no-op.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use agent_core::run::quiet;
use agent_core::CommandRunner;

use crate::error::ServiceError;
use crate::state::ServiceState;
use crate::ServiceHandler;

pub const NOTIFY_SOCKET_ENV: &str = "NOTIFY_SOCKET";
const NOTIFY: &str = "systemd-notify";

pub struct SystemdService {
    systemd_context: bool,
    runner: Arc<dyn CommandRunner>,
}

impl SystemdService {
    /// Detect systemd from the environment.
    pub fn new(runner: Arc<dyn CommandRunner>) -> Self {
        let systemd_context = std::env::var_os(NOTIFY_SOCKET_ENV).is_some_and(|v| !v.is_empty());
        Self::with_context(systemd_context, runner)
    }

    pub fn with_context(systemd_context: bool, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            systemd_context,
            runner,
        }
    }

    pub fn in_systemd(&self) -> bool {
        self.systemd_context
    }
}

#[async_trait]
impl ServiceHandler for SystemdService {
    fn name(&self) -> &'static str {
        "systemd"
    }

    async fn register(&self, cancel: &CancellationToken) -> Result<(), ServiceError> {
        if !self.systemd_context {
            return Ok(());
        }
        tracing::debug!("registering service with systemd service manager");
        quiet(
            self.runner.as_ref(),
            cancel,
            NOTIFY,
            &["--status=Initializing service..."],
        )
        .await?;
        Ok(())
    }

    async fn set_state(
        &self,
        cancel: &CancellationToken,
        state: ServiceState,
    ) -> Result<(), ServiceError> {
        if !self.systemd_context {
            return Ok(());
        }
        let args: &[&str] = match state {
            ServiceState::Running => &["--ready", "--status=Running service..."],
            ServiceState::Stopped => &["--status=Stopping service...", "STOPPING=1"],
        };
        quiet(self.runner.as_ref(), cancel, NOTIFY, args).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use agent_core::run::fake::FakeRunner;

    use super::*;

    #[tokio::test]
    async fn notifies_systemd_through_lifecycle() {
        let runner = Arc::new(FakeRunner::new());
        let service = SystemdService::with_context(true, runner.clone());
        let cancel = CancellationToken::new();

        service.register(&cancel).await.expect("register");
        service
            .set_state(&cancel, ServiceState::Running)
            .await
            .expect("running");
        service
            .set_state(&cancel, ServiceState::Stopped)
            .await
            .expect("stopped");

        assert_eq!(
            runner.calls(),
            vec![
                "systemd-notify --status=Initializing service...",
                "systemd-notify --ready --status=Running service...",
                "systemd-notify --status=Stopping service... STOPPING=1",
            ]
        );
    }

    #[tokio::test]
    async fn standalone_is_a_no_op() {
        let runner = Arc::new(FakeRunner::new());
        let service = SystemdService::with_context(false, runner.clone());
        let cancel = CancellationToken::new();

        service.register(&cancel).await.expect("register");
        // Stopped before Running is accepted.
        service
            .set_state(&cancel, ServiceState::Stopped)
            .await
            .expect("stopped");
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn notify_failure_surfaces() {
        let runner = Arc::new(FakeRunner::new());
        runner.fail("systemd-notify --ready", "no socket");
        let service = SystemdService::with_context(true, runner);
        let err = service
            .set_state(&CancellationToken::new(), ServiceState::Running)
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Notify(_)));
    }
}
