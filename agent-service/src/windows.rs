//! Windows Service Control Manager handler.
//!
//! The SCM conversation is reduced to three channels, which keeps the
//! handler logic platform-neutral and testable:
//!
//! * interrogate requests, answered by re-reporting the last status;
//! * control requests (stop, shutdown, anything else);
//! * status reports flowing back to the SCM.
//!
//! An [`ScmConnector`] produces those channels. On Windows that is the real
//! service dispatcher (see `scm.rs`); tests plug in their own.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::done::DoneSignal;
use crate::error::ServiceError;
use crate::state::ServiceState;
use crate::ServiceHandler;

pub const SERVICE_NAME: &str = "google_guest_agent";

/// Status values reported to the SCM.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScmStatus {
    StartPending,
    /// Running, accepting stop and shutdown.
    Running,
    StopPending,
}

/// Control requests other than interrogate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScmCommand {
    Stop,
    Shutdown,
    Other(String),
}

/// Channels for one service-mode execution.
#[derive(Debug)]
pub struct ScmSession {
    pub interrogate: mpsc::UnboundedReceiver<()>,
    pub control: mpsc::UnboundedReceiver<ScmCommand>,
    pub status: mpsc::UnboundedSender<ScmStatus>,
}

#[async_trait]
pub trait ScmConnector: Send + Sync {
    /// Start talking to the SCM. `None` means the process was not launched
    /// as a service.
    async fn connect(&self, service_name: &str) -> Result<Option<ScmSession>, ServiceError>;
}

/// Connector for processes that are never under the SCM.
#[derive(Debug, Default, Clone, Copy)]
pub struct Standalone;

#[async_trait]
impl ScmConnector for Standalone {
    async fn connect(&self, _service_name: &str) -> Result<Option<ScmSession>, ServiceError> {
        Ok(None)
    }
}

#[derive(Debug, Clone)]
struct Reporter {
    status: mpsc::UnboundedSender<ScmStatus>,
    last: Arc<Mutex<ScmStatus>>,
}

impl Reporter {
    fn report(&self, status: ScmStatus) -> Result<(), ServiceError> {
        *self.last.lock().unwrap_or_else(|e| e.into_inner()) = status;
        self.status
            .send(status)
            .map_err(|_| ServiceError::StatusClosed)
    }

    fn last(&self) -> ScmStatus {
        *self.last.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[derive(Debug)]
enum Registration {
    Unregistered,
    Standalone,
    Service(Reporter),
}

pub struct WindowsService {
    done: DoneSignal,
    connector: Arc<dyn ScmConnector>,
    registration: tokio::sync::Mutex<Registration>,
}

impl WindowsService {
    pub fn new(done: DoneSignal, connector: Arc<dyn ScmConnector>) -> Self {
        Self {
            done,
            connector,
            registration: tokio::sync::Mutex::new(Registration::Unregistered),
        }
    }
}

#[async_trait]
impl ServiceHandler for WindowsService {
    fn name(&self) -> &'static str {
        "windows-scm"
    }

    /// Idempotent: only the first call talks to the SCM.
    async fn register(&self, _cancel: &CancellationToken) -> Result<(), ServiceError> {
        let mut registration = self.registration.lock().await;
        if !matches!(*registration, Registration::Unregistered) {
            return Ok(());
        }

        tracing::debug!("registering service with windows service manager");
        let Some(session) = self.connector.connect(SERVICE_NAME).await? else {
            tracing::debug!("not launched by the service control manager");
            *registration = Registration::Standalone;
            return Ok(());
        };

        let reporter = Reporter {
            status: session.status,
            last: Arc::new(Mutex::new(ScmStatus::StartPending)),
        };
        tracing::info!("setting windows service status to StartPending");
        reporter.report(ScmStatus::StartPending)?;

        tokio::spawn(interrogate_listener(
            self.done.clone(),
            session.interrogate,
            reporter.clone(),
        ));
        tokio::spawn(termination_listener(self.done.clone(), session.control));

        *registration = Registration::Service(reporter);
        Ok(())
    }

    async fn set_state(
        &self,
        _cancel: &CancellationToken,
        state: ServiceState,
    ) -> Result<(), ServiceError> {
        let registration = self.registration.lock().await;
        let Registration::Service(reporter) = &*registration else {
            return Ok(());
        };
        match state {
            ServiceState::Running => reporter.report(ScmStatus::Running),
            ServiceState::Stopped => reporter.report(ScmStatus::StopPending),
        }
    }
}

async fn interrogate_listener(
    done: DoneSignal,
    mut requests: mpsc::UnboundedReceiver<()>,
    reporter: Reporter,
) {
    loop {
        tokio::select! {
            _ = done.wait() => break,
            request = requests.recv() => {
                if request.is_none() {
                    break;
                }
                let status = reporter.last();
                tracing::debug!(status = ?status, "interrogate request, reporting last status");
                if reporter.status.send(status).is_err() {
                    break;
                }
            }
        }
    }
}

async fn termination_listener(done: DoneSignal, mut requests: mpsc::UnboundedReceiver<ScmCommand>) {
    loop {
        tokio::select! {
            _ = done.wait() => {
                tracing::debug!("done signal received, leaving termination listener");
                break;
            }
            request = requests.recv() => match request {
                None => break,
                Some(ScmCommand::Stop | ScmCommand::Shutdown) => {
                    tracing::debug!("stop or shutdown request from windows service manager");
                    done.fire();
                    break;
                }
                Some(ScmCommand::Other(command)) => {
                    tracing::debug!(command = %command, "ignoring service control request");
                }
            },
        }
    }
}
