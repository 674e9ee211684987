//! Service dispatcher glue for the real Windows SCM.
//!
//! `service_dispatcher::start` blocks its thread for the life of the
//! service, and the SCM calls back into `service_main` on a thread of its
//! own. The channels for that callback are parked in a process-wide slot
//! before the dispatcher starts.

use std::ffi::OsString;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use windows_service::service::{
    ServiceControl, ServiceControlAccept, ServiceExitCode, ServiceState as WinState,
    ServiceStatus, ServiceType,
};
use windows_service::service_control_handler::{self, ServiceControlHandlerResult};
use windows_service::{define_windows_service, service_dispatcher};

use crate::error::ServiceError;
use crate::windows::{ScmCommand, ScmConnector, ScmSession, ScmStatus};

/// Win32 `ERROR_FAILED_SERVICE_CONTROLLER_CONNECT`: not started by the SCM.
const NOT_A_SERVICE: i32 = 1063;

type Ready = Arc<Mutex<Option<oneshot::Sender<Result<bool, String>>>>>;

struct Pending {
    name: String,
    interrogate: mpsc::UnboundedSender<()>,
    control: mpsc::UnboundedSender<ScmCommand>,
    status: mpsc::UnboundedReceiver<ScmStatus>,
    ready: Ready,
}

static PENDING: OnceLock<Mutex<Option<Pending>>> = OnceLock::new();

fn pending() -> &'static Mutex<Option<Pending>> {
    PENDING.get_or_init(|| Mutex::new(None))
}

fn signal_ready(ready: &Ready, outcome: Result<bool, String>) {
    if let Some(tx) = ready.lock().unwrap_or_else(|e| e.into_inner()).take() {
        let _ = tx.send(outcome);
    }
}

define_windows_service!(ffi_service_main, service_main);

fn service_main(_arguments: Vec<OsString>) {
    let Some(Pending {
        name,
        interrogate,
        control,
        mut status,
        ready,
    }) = pending().lock().unwrap_or_else(|e| e.into_inner()).take()
    else {
        return;
    };

    let handler = move |event| match event {
        ServiceControl::Interrogate => {
            let _ = interrogate.send(());
            ServiceControlHandlerResult::NoError
        }
        ServiceControl::Stop => {
            let _ = control.send(ScmCommand::Stop);
            ServiceControlHandlerResult::NoError
        }
        ServiceControl::Shutdown => {
            let _ = control.send(ScmCommand::Shutdown);
            ServiceControlHandlerResult::NoError
        }
        other => {
            let _ = control.send(ScmCommand::Other(format!("{other:?}")));
            ServiceControlHandlerResult::NotImplemented
        }
    };

    let status_handle = match service_control_handler::register(&name, handler) {
        Ok(handle) => handle,
        Err(err) => {
            signal_ready(&ready, Err(err.to_string()));
            return;
        }
    };
    signal_ready(&ready, Ok(true));

    while let Some(next) = status.blocking_recv() {
        let (state, accepted) = match next {
            ScmStatus::StartPending => (WinState::StartPending, ServiceControlAccept::empty()),
            ScmStatus::Running => (
                WinState::Running,
                ServiceControlAccept::STOP | ServiceControlAccept::SHUTDOWN,
            ),
            ScmStatus::StopPending => (WinState::StopPending, ServiceControlAccept::empty()),
        };
        if let Err(err) = status_handle.set_service_status(service_status(state, accepted)) {
            tracing::error!(error = %err, "failed to report service status");
        }
    }

    // The agent dropped its handler: it is exiting.
    let _ = status_handle.set_service_status(service_status(
        WinState::Stopped,
        ServiceControlAccept::empty(),
    ));
}

fn service_status(state: WinState, controls_accepted: ServiceControlAccept) -> ServiceStatus {
    ServiceStatus {
        service_type: ServiceType::OWN_PROCESS,
        current_state: state,
        controls_accepted,
        exit_code: ServiceExitCode::Win32(0),
        checkpoint: 0,
        wait_hint: Duration::default(),
        process_id: None,
    }
}

/// [`ScmConnector`] backed by the Windows service dispatcher.
#[derive(Debug, Default, Clone, Copy)]
pub struct WindowsScmConnector;

#[async_trait]
impl ScmConnector for WindowsScmConnector {
    async fn connect(&self, service_name: &str) -> Result<Option<ScmSession>, ServiceError> {
        let (interrogate_tx, interrogate) = mpsc::unbounded_channel();
        let (control_tx, control) = mpsc::unbounded_channel();
        let (status, status_rx) = mpsc::unbounded_channel();
        let (ready_tx, ready_rx) = oneshot::channel();
        let ready: Ready = Arc::new(Mutex::new(Some(ready_tx)));

        *pending().lock().unwrap_or_else(|e| e.into_inner()) = Some(Pending {
            name: service_name.to_string(),
            interrogate: interrogate_tx,
            control: control_tx,
            status: status_rx,
            ready: ready.clone(),
        });

        let name = service_name.to_string();
        std::thread::Builder::new()
            .name("scm-dispatcher".to_string())
            .spawn(move || match service_dispatcher::start(&name, ffi_service_main) {
                Ok(()) => {}
                Err(windows_service::Error::Winapi(err))
                    if err.raw_os_error() == Some(NOT_A_SERVICE) =>
                {
                    signal_ready(&ready, Ok(false));
                }
                Err(err) => signal_ready(&ready, Err(err.to_string())),
            })
            .map_err(|err| ServiceError::Register(err.to_string()))?;

        match ready_rx.await {
            Ok(Ok(true)) => Ok(Some(ScmSession {
                interrogate,
                control,
                status,
            })),
            Ok(Ok(false)) => {
                pending().lock().unwrap_or_else(|e| e.into_inner()).take();
                Ok(None)
            }
            Ok(Err(err)) => Err(ServiceError::Register(err)),
            Err(_) => Err(ServiceError::Register(
                "service dispatcher exited before registering".to_string(),
            )),
        }
    }
}
