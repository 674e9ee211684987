//! # agent-managers
//!
//! OS configuration units driven by metadata.
//!
//! Every unit implements [`Manager`]. The reconciler asks each one whether it
//! applies to this platform, whether the metadata change concerns it, and
//! whether its own freshness window has lapsed; then calls [`Manager::set`]
//! with the old and new snapshots. [`for_platform`] returns the fixed list
//! of managers for a platform.

pub mod accounts;
pub mod address;
pub mod clock_skew;
pub mod diagnostics;
pub mod error;
pub mod oslogin;
pub mod ssh_keys;
pub mod win_accounts;
pub mod writer;
pub mod wsfc;

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use agent_core::{CommandRunner, Config, Descriptor, Platform};

pub use accounts::{AccountPaths, AccountsManager};
pub use address::AddressManager;
pub use clock_skew::ClockSkewManager;
pub use diagnostics::DiagnosticsManager;
pub use error::ManagerError;
pub use oslogin::OsLoginManager;
pub use win_accounts::WindowsAccountsManager;
pub use writer::{read_or_empty, write_if_changed, WriteResult};
pub use wsfc::WsfcManager;

// ---------------------------------------------------------------------------
// Contract
// ---------------------------------------------------------------------------

/// The metadata a pass reconciles from and to. Both sides are immutable for
/// the lifetime of the pass.
#[derive(Debug, Clone)]
pub struct Snapshots {
    /// Last snapshot a completed pass applied.
    pub old: Arc<Descriptor>,
    pub new: Arc<Descriptor>,
}

#[async_trait]
pub trait Manager: Send + Sync {
    /// Short stable name used in logs.
    fn name(&self) -> &'static str;

    /// `true` when this manager must not run on `platform` under the
    /// current configuration. Checked before anything else.
    fn disabled(&self, platform: Platform) -> bool;

    /// Whether the change from `old` to `new` concerns this manager.
    fn diff(&self, snapshots: &Snapshots) -> bool;

    /// Whether the manager wants to re-apply regardless of `diff`.
    fn timeout(&self) -> bool;

    /// Apply `snapshots.new` to the host.
    async fn set(&self, snapshots: &Snapshots, cancel: &CancellationToken) -> Result<(), ManagerError>;
}

// ---------------------------------------------------------------------------
// Platform lists
// ---------------------------------------------------------------------------

/// Host locations managers read and write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostPaths {
    pub sys_class_net: PathBuf,
    pub accounts: AccountPaths,
}

impl Default for HostPaths {
    fn default() -> Self {
        Self {
            sys_class_net: PathBuf::from("/sys/class/net"),
            accounts: AccountPaths::default(),
        }
    }
}

/// Shared collaborators handed to every manager.
#[derive(Clone)]
pub struct ManagerDeps {
    pub config: Arc<Config>,
    pub runner: Arc<dyn CommandRunner>,
    pub paths: HostPaths,
}

/// The fixed manager list for `platform`: one for the Windows family, one
/// for everything else. Managers that do not apply to the host still appear
/// and report themselves [`Manager::disabled`].
pub fn for_platform(platform: Platform, deps: &ManagerDeps) -> Vec<Arc<dyn Manager>> {
    let address: Arc<dyn Manager> = Arc::new(AddressManager::new(
        deps.config.clone(),
        deps.runner.clone(),
        deps.paths.sys_class_net.clone(),
    ));
    if platform.is_windows() {
        vec![
            address,
            Arc::new(WsfcManager::new(deps.config.clone())),
            Arc::new(WindowsAccountsManager::new(deps.config.clone(), deps.runner.clone())),
            Arc::new(DiagnosticsManager::new(deps.config.clone(), deps.runner.clone())),
        ]
    } else {
        vec![
            address,
            Arc::new(ClockSkewManager::new(deps.config.clone(), deps.runner.clone())),
            Arc::new(OsLoginManager::new(deps.runner.clone())),
            Arc::new(AccountsManager::new(
                deps.config.clone(),
                deps.runner.clone(),
                deps.paths.accounts.clone(),
            )),
        ]
    }
}

#[cfg(test)]
mod tests {
    use agent_core::run::fake::FakeRunner;

    use super::*;

    fn deps() -> ManagerDeps {
        ManagerDeps {
            config: Arc::new(Config::default()),
            runner: Arc::new(FakeRunner::new()),
            paths: HostPaths::default(),
        }
    }

    fn names(platform: Platform) -> Vec<&'static str> {
        for_platform(platform, &deps()).iter().map(|m| m.name()).collect()
    }

    #[test]
    fn lists_are_fixed_per_platform_family() {
        assert_eq!(names(Platform::Linux), vec!["address", "clock-skew", "oslogin", "accounts"]);
        assert_eq!(
            names(Platform::Windows),
            vec!["address", "wsfc", "windows-accounts", "diagnostics"]
        );
        assert_eq!(names(Platform::Other("freebsd")), names(Platform::Linux));
    }

    #[test]
    fn windows_only_managers_disable_elsewhere() {
        for m in for_platform(Platform::Windows, &deps()) {
            assert!(m.disabled(Platform::Linux), "{} should be off on linux", m.name());
        }
        let active: Vec<_> = for_platform(Platform::Windows, &deps())
            .into_iter()
            .filter(|m| !m.disabled(Platform::Windows))
            .map(|m| m.name())
            .collect();
        assert_eq!(active, vec!["wsfc", "windows-accounts", "diagnostics"]);
    }
}
