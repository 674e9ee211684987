//! Local Windows accounts from `windows-keys` metadata.
//!
//! Each line of `windows-keys` is a JSON request to provision an
//! administrator account. Expired requests are ignored.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use agent_core::{CommandError, CommandRunner, Config, Descriptor, Platform};

use crate::error::ManagerError;
use crate::ssh_keys::parse_expiry;
use crate::{Manager, Snapshots};

const ADMINISTRATORS: &str = "Administrators";

/// One `windows-keys` entry.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowsKey {
    pub user_name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub expire_on: String,
    #[serde(default)]
    pub modulus: String,
    #[serde(default)]
    pub exponent: String,
}

impl WindowsKey {
    fn expired(&self, now: DateTime<Utc>) -> bool {
        parse_expiry(&self.expire_on).map_or(true, |at| at < now)
    }
}

/// Live entries from a `windows-keys` value, one per user name.
pub fn active_keys(raw: &str, now: DateTime<Utc>) -> Vec<WindowsKey> {
    let mut seen = BTreeSet::new();
    let mut keys = Vec::new();
    for line in raw.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let key: WindowsKey = match serde_json::from_str(line) {
            Ok(key) => key,
            Err(err) => {
                tracing::debug!(error = %err, "skipping malformed windows-keys entry");
                continue;
            }
        };
        if key.expired(now) || !valid_username(&key.user_name) {
            continue;
        }
        if seen.insert(key.user_name.to_ascii_lowercase()) {
            keys.push(key);
        }
    }
    keys
}

/// SAM account names: at most 20 characters, none of `"/\[]:;|=,+*?<>@`.
fn valid_username(name: &str) -> bool {
    !name.is_empty()
        && name.chars().count() <= 20
        && !name.chars().any(|c| "\"/\\[]:;|=,+*?<>@".contains(c) || c.is_control())
}

pub struct WindowsAccountsManager {
    config: Arc<Config>,
    runner: Arc<dyn CommandRunner>,
}

impl WindowsAccountsManager {
    pub fn new(config: Arc<Config>, runner: Arc<dyn CommandRunner>) -> Self {
        Self { config, runner }
    }

    async fn ensure_user(&self, cancel: &CancellationToken, user: &str) -> Result<(), ManagerError> {
        match self.runner.run(cancel, "net", &["user", user]).await {
            Ok(_) => {}
            Err(CommandError::Failed { .. }) => {
                tracing::info!(user = user, "creating local user");
                self.runner
                    .run(cancel, "net", &["user", user, "/add", "/random"])
                    .await?;
            }
            Err(err) => return Err(err.into()),
        }

        let members = self
            .runner
            .run(cancel, "net", &["localgroup", ADMINISTRATORS])
            .await?;
        if !group_members(&members.stdout).contains(&user.to_ascii_lowercase()) {
            tracing::info!(user = user, "adding user to Administrators");
            self.runner
                .run(cancel, "net", &["localgroup", ADMINISTRATORS, user, "/add"])
                .await?;
        }
        Ok(())
    }
}

fn windows_keys(d: &Descriptor) -> Option<&str> {
    d.value(|a| a.windows_keys.as_ref())
}

/// Member names from `net localgroup` output, lowercased. Members sit
/// between the dashed separator and the completion line.
fn group_members(stdout: &str) -> BTreeSet<String> {
    stdout
        .lines()
        .skip_while(|l| !l.starts_with("---"))
        .skip(1)
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with("The command completed"))
        .map(str::to_ascii_lowercase)
        .collect()
}

#[async_trait]
impl Manager for WindowsAccountsManager {
    fn name(&self) -> &'static str {
        "windows-accounts"
    }

    fn disabled(&self, platform: Platform) -> bool {
        !platform.is_windows() || self.config.get_bool("accountManager", "disable", false)
    }

    fn diff(&self, snapshots: &Snapshots) -> bool {
        windows_keys(&snapshots.old) != windows_keys(&snapshots.new)
    }

    fn timeout(&self) -> bool {
        false
    }

    async fn set(&self, snapshots: &Snapshots, cancel: &CancellationToken) -> Result<(), ManagerError> {
        let Some(raw) = windows_keys(&snapshots.new) else {
            return Ok(());
        };
        let mut errors = Vec::new();
        for key in active_keys(raw, Utc::now()) {
            if let Err(err) = self.ensure_user(cancel, &key.user_name).await {
                tracing::error!(user = %key.user_name, error = %err, "failed to provision account");
                errors.push(err);
            }
        }
        ManagerError::collect(errors)
    }
}
