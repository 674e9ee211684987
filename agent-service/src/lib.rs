//! Service lifecycle: registration and state reporting with the host
//! service manager, plus the one-shot done signal that starts shutdown.
//!
//! Both handlers are always compiled; [`ServiceManager::for_platform`] picks
//! one at startup.

mod done;
mod error;
#[cfg(windows)]
mod scm;
pub mod signals;
mod state;
pub mod systemd;
pub mod windows;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use agent_core::{CommandRunner, Platform};

pub use done::DoneSignal;
pub use error::ServiceError;
pub use signals::forward_signals;
pub use state::ServiceState;
pub use systemd::SystemdService;
pub use windows::{ScmCommand, ScmConnector, ScmSession, ScmStatus, Standalone, WindowsService};

#[async_trait]
pub trait ServiceHandler: Send + Sync {
    fn name(&self) -> &'static str;

    /// Announce the process to the service manager. A no-op success when
    /// the process was not launched by one.
    async fn register(&self, cancel: &CancellationToken) -> Result<(), ServiceError>;

    async fn set_state(
        &self,
        cancel: &CancellationToken,
        state: ServiceState,
    ) -> Result<(), ServiceError>;
}

/// Front door used by the agent: the selected handler plus the done signal.
///
/// Reports are serialized, and once Stopped has been reported a later
/// Running is dropped.
pub struct ServiceManager {
    done: DoneSignal,
    handler: Box<dyn ServiceHandler>,
    reported: Mutex<Option<ServiceState>>,
}

impl ServiceManager {
    pub fn new(done: DoneSignal, handler: Box<dyn ServiceHandler>) -> Self {
        Self {
            done,
            handler,
            reported: Mutex::new(None),
        }
    }

    /// SCM handler on Windows, systemd everywhere else.
    pub fn for_platform(platform: Platform, runner: Arc<dyn CommandRunner>) -> Self {
        let done = DoneSignal::new();
        let handler: Box<dyn ServiceHandler> = if platform.is_windows() {
            Box::new(WindowsService::new(done.clone(), scm_connector()))
        } else {
            Box::new(SystemdService::new(runner))
        };
        Self::new(done, handler)
    }

    pub fn done(&self) -> &DoneSignal {
        &self.done
    }

    pub fn handler_name(&self) -> &'static str {
        self.handler.name()
    }

    pub async fn register(&self, cancel: &CancellationToken) -> Result<(), ServiceError> {
        self.handler.register(cancel).await
    }

    pub async fn set_state(
        &self,
        cancel: &CancellationToken,
        state: ServiceState,
    ) -> Result<(), ServiceError> {
        let mut reported = self.reported.lock().await;
        if state == ServiceState::Running && *reported == Some(ServiceState::Stopped) {
            tracing::debug!(handler = self.handler.name(), "already stopped, not reporting running");
            return Ok(());
        }
        tracing::debug!(state = %state, handler = self.handler.name(), "setting service state");
        let result = self.handler.set_state(cancel, state).await;
        if result.is_ok() || state == ServiceState::Stopped {
            *reported = Some(state);
        }
        result
    }

    /// Last state reported. A Stopped attempt counts even if it failed.
    pub async fn reported(&self) -> Option<ServiceState> {
        *self.reported.lock().await
    }
}

#[cfg(windows)]
fn scm_connector() -> Arc<dyn ScmConnector> {
    Arc::new(scm::WindowsScmConnector)
}

#[cfg(not(windows))]
fn scm_connector() -> Arc<dyn ScmConnector> {
    Arc::new(Standalone)
}
