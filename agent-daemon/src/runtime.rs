use std::sync::Arc;

use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;

use agent_service::{forward_signals, ServiceManager, ServiceState};

use crate::agent::{run_agent, AgentDeps, AgentOptions, AgentSummary};
use crate::error::{io_err, AgentError};
use crate::paths::SHUTDOWN_GRACE;

/// Build the runtime, run the agent against the real host and block the
/// current thread until it exits.
pub fn start_blocking(opts: AgentOptions) -> Result<(), AgentError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;

    let result = runtime.block_on(async {
        let deps = AgentDeps::host()?;
        let svc = ServiceManager::for_platform(opts.platform, deps.runner.clone());
        run(opts, deps, svc).await.map(|_| ())
    });
    runtime.shutdown_timeout(SHUTDOWN_GRACE);
    result
}

/// Register with the service manager, run the agent, and shut down once
/// the done signal fires: report Stopped, then cancel the root token so the
/// event loop unwinds.
pub async fn run(
    opts: AgentOptions,
    deps: AgentDeps,
    svc: ServiceManager,
) -> Result<AgentSummary, AgentError> {
    let root = CancellationToken::new();
    let svc = Arc::new(svc);

    let signals = forward_signals(svc.done().clone()).map_err(AgentError::Signals)?;
    let shutdown = tokio::spawn(shutdown_on_done(svc.clone(), root.clone()));

    if let Err(err) = svc.register(&root).await {
        let err = AgentError::Register(err);
        tracing::error!(error = %err, "fatal");
        shutdown.abort();
        signals.abort();
        return Err(err);
    }

    let summary = match run_agent(&root, &svc, &opts, deps).await {
        Ok(summary) => summary,
        Err(err) => {
            tracing::error!(error = %err, "failed to run agent");
            shutdown.abort();
            signals.abort();
            return Err(err);
        }
    };

    // Every watcher loop ended without a shutdown request; still report
    // Stopped before leaving.
    if !root.is_cancelled() {
        tracing::info!("event loop finished, shutting down");
        svc.done().fire();
    }
    signals.abort();
    handle_join("shutdown", shutdown.await)?;
    Ok(summary)
}

async fn shutdown_on_done(svc: Arc<ServiceManager>, root: CancellationToken) -> Result<(), AgentError> {
    svc.done().wait().await;
    let result = svc
        .set_state(&root, ServiceState::Stopped)
        .await
        .map_err(AgentError::SetStopped);
    if let Err(err) = &result {
        tracing::error!(error = %err, "fatal");
    }
    root.cancel();
    result
}

fn handle_join(
    task: &'static str,
    result: Result<Result<(), AgentError>, JoinError>,
) -> Result<(), AgentError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(AgentError::Join {
            task,
            reason: err.to_string(),
        }),
    }
}
