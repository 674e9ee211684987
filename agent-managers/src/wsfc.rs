//! Windows Server Failover Clustering health agent.
//!
//! The internal load balancer probes each cluster node over TCP with an IP
//! address. The node answers `1` when that address is currently assigned to
//! one of its interfaces and `0` otherwise, which lets the balancer follow
//! the active cluster role.

use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use agent_core::types::parse_bool;
use agent_core::{Config, Descriptor, Platform};

use crate::error::ManagerError;
use crate::{Manager, Snapshots};

pub const DEFAULT_PORT: u16 = 59998;

/// Effective health agent settings for one snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WsfcSettings {
    pub enabled: bool,
    pub port: u16,
}

impl WsfcSettings {
    /// Local config wins, then instance metadata, then project metadata.
    pub fn resolve(config: &Config, descriptor: &Descriptor) -> Self {
        let addrs_set = config.get("wsfc", "addresses").is_some()
            || descriptor.value(|a| a.wsfc_addrs.as_ref()).is_some_and(|v| !v.trim().is_empty());
        let enabled = config
            .get("wsfc", "enable")
            .and_then(parse_bool)
            .or_else(|| descriptor.flag(|a| a.enable_wsfc))
            .unwrap_or(addrs_set);
        let port = config
            .get_u16("wsfc", "port")
            .or_else(|| {
                descriptor
                    .value(|a| a.wsfc_agent_port.as_ref())
                    .and_then(|p| p.trim().parse().ok())
            })
            .unwrap_or(DEFAULT_PORT);
        Self { enabled, port }
    }
}

struct RunningAgent {
    port: u16,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

pub struct WsfcManager {
    config: Arc<Config>,
    agent: Mutex<Option<RunningAgent>>,
}

impl WsfcManager {
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            config,
            agent: Mutex::new(None),
        }
    }

    /// Port the health agent is bound to, when running.
    pub async fn agent_port(&self) -> Option<u16> {
        self.agent.lock().await.as_ref().map(|a| a.port)
    }

    async fn stop(agent: RunningAgent) {
        tracing::info!(port = agent.port, "stopping wsfc health agent");
        agent.cancel.cancel();
        let _ = agent.handle.await;
    }
}

#[async_trait]
impl Manager for WsfcManager {
    fn name(&self) -> &'static str {
        "wsfc"
    }

    fn disabled(&self, platform: Platform) -> bool {
        !platform.is_windows()
    }

    fn diff(&self, snapshots: &Snapshots) -> bool {
        WsfcSettings::resolve(&self.config, &snapshots.old)
            != WsfcSettings::resolve(&self.config, &snapshots.new)
    }

    fn timeout(&self) -> bool {
        false
    }

    async fn set(&self, snapshots: &Snapshots, cancel: &CancellationToken) -> Result<(), ManagerError> {
        let want = WsfcSettings::resolve(&self.config, &snapshots.new);
        let mut slot = self.agent.lock().await;

        if let Some(running) = slot.take() {
            if want.enabled && (want.port == running.port || want.port == 0) {
                *slot = Some(running);
                return Ok(());
            }
            Self::stop(running).await;
        }
        if !want.enabled {
            return Ok(());
        }

        let listener = TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], want.port)))
            .await
            .map_err(|source| ManagerError::Listen {
                port: want.port,
                source,
            })?;
        let port = listener
            .local_addr()
            .map_err(|source| ManagerError::Listen {
                port: want.port,
                source,
            })?
            .port();
        tracing::info!(port = port, "starting wsfc health agent");

        let token = cancel.child_token();
        let handle = tokio::spawn(serve(listener, token.clone()));
        *slot = Some(RunningAgent {
            port,
            cancel: token,
            handle,
        });
        Ok(())
    }
}

/// Accept health probes until cancelled.
pub async fn serve(listener: TcpListener, cancel: CancellationToken) {
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tokio::spawn(async move {
                        if let Err(err) = answer(stream).await {
                            tracing::debug!(peer = %peer, error = %err, "wsfc probe failed");
                        }
                    });
                }
                Err(err) => tracing::warn!(error = %err, "wsfc accept failed"),
            },
        }
    }
}

async fn answer(mut stream: TcpStream) -> std::io::Result<()> {
    let mut buf = [0u8; 256];
    let n = stream.read(&mut buf).await?;
    let query = String::from_utf8_lossy(&buf[..n]);
    let reply = if is_local_address(query.trim()) { b"1" } else { b"0" };
    stream.write_all(reply).await?;
    stream.shutdown().await
}

/// Binding succeeds only for addresses assigned to this host.
fn is_local_address(raw: &str) -> bool {
    raw.parse::<IpAddr>()
        .map(|ip| UdpSocket::bind((ip, 0)).is_ok())
        .unwrap_or(false)
}
