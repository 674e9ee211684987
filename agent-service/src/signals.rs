//! OS signal forwarding onto the done signal.

use tokio::task::JoinHandle;

use crate::done::DoneSignal;
use crate::error::ServiceError;

/// Install handlers for the termination signals and spawn a task that fires
/// `done` on the first one. The task also ends if `done` fires for another
/// reason. Handlers are installed before this returns.
#[cfg(unix)]
pub fn forward_signals(done: DoneSignal) -> Result<JoinHandle<()>, ServiceError> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = signal(SignalKind::terminate()).map_err(ServiceError::Signal)?;
    let mut int = signal(SignalKind::interrupt()).map_err(ServiceError::Signal)?;
    let mut quit = signal(SignalKind::quit()).map_err(ServiceError::Signal)?;
    let mut hup = signal(SignalKind::hangup()).map_err(ServiceError::Signal)?;

    Ok(tokio::spawn(async move {
        let name = tokio::select! {
            _ = done.wait() => return,
            _ = term.recv() => "SIGTERM",
            _ = int.recv() => "SIGINT",
            _ = quit.recv() => "SIGQUIT",
            _ = hup.recv() => "SIGHUP",
        };
        tracing::info!(signal = name, "guest agent got signal, leaving");
        done.fire();
    }))
}

#[cfg(windows)]
pub fn forward_signals(done: DoneSignal) -> Result<JoinHandle<()>, ServiceError> {
    use tokio::signal::windows::{ctrl_break, ctrl_c, ctrl_close, ctrl_shutdown};

    let mut c = ctrl_c().map_err(ServiceError::Signal)?;
    let mut brk = ctrl_break().map_err(ServiceError::Signal)?;
    let mut close = ctrl_close().map_err(ServiceError::Signal)?;
    let mut shutdown = ctrl_shutdown().map_err(ServiceError::Signal)?;

    Ok(tokio::spawn(async move {
        let name = tokio::select! {
            _ = done.wait() => return,
            _ = c.recv() => "CTRL_C",
            _ = brk.recv() => "CTRL_BREAK",
            _ = close.recv() => "CTRL_CLOSE",
            _ = shutdown.recv() => "CTRL_SHUTDOWN",
        };
        tracing::info!(signal = name, "guest agent got signal, leaving");
        done.fire();
    }))
}
