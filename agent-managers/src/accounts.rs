//! Local accounts and `authorized_keys` from `ssh-keys` metadata.
//!
//! Every pass re-derives the full desired set of users and keys. Agent-owned
//! keys live in `authorized_keys` behind a marker line, so keys a user added
//! by hand survive every rewrite. Users the agent manages are recorded in a
//! state file so their keys can be withdrawn once metadata drops them.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;

use agent_core::{CommandRunner, Config, Descriptor, Platform};

use crate::error::{io_err, ManagerError};
use crate::ssh_keys::{desired_keys, expired};
use crate::writer::{read_or_empty, write_if_changed};
use crate::{Manager, Snapshots};

/// Marks the following `authorized_keys` line as agent-managed.
pub const MANAGED_MARKER: &str = "# Added by Google";
pub const DEFAULT_GROUPS: &str = "adm,dip,docker,lxd,plugdev,video";

/// Host files the accounts manager reads and writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountPaths {
    pub passwd: PathBuf,
    pub group: PathBuf,
    /// Where `useradd -m` puts new home directories.
    pub home_root: PathBuf,
    /// One managed user name per line.
    pub users_file: PathBuf,
}

impl Default for AccountPaths {
    fn default() -> Self {
        Self {
            passwd: PathBuf::from("/etc/passwd"),
            group: PathBuf::from("/etc/group"),
            home_root: PathBuf::from("/home"),
            users_file: PathBuf::from("/var/lib/google/google_users"),
        }
    }
}

type KeySet = BTreeMap<String, Vec<String>>;

pub struct AccountsManager {
    config: Arc<Config>,
    runner: Arc<dyn CommandRunner>,
    paths: AccountPaths,
    applied: Mutex<KeySet>,
}

impl AccountsManager {
    pub fn new(config: Arc<Config>, runner: Arc<dyn CommandRunner>, paths: AccountPaths) -> Self {
        Self {
            config,
            runner,
            paths,
            applied: Mutex::new(KeySet::new()),
        }
    }

    fn groups(&self) -> Result<Vec<String>, ManagerError> {
        let wanted = self
            .config
            .get_list("Accounts", "groups")
            .unwrap_or_else(|| DEFAULT_GROUPS.split(',').map(str::to_string).collect());
        let existing = parse_group_names(&read_or_empty(&self.paths.group)?);
        Ok(wanted.into_iter().filter(|g| existing.contains(g)).collect())
    }

    async fn create_user(
        &self,
        cancel: &CancellationToken,
        user: &str,
        groups: &[String],
    ) -> Result<(), ManagerError> {
        tracing::info!(user = user, "creating user");
        self.runner
            .run(cancel, "useradd", &["-m", "-s", "/bin/bash", "-p", "*", user])
            .await?;
        for group in groups {
            self.runner.run(cancel, "gpasswd", &["-a", user, group]).await?;
        }
        Ok(())
    }

    async fn write_keys(
        &self,
        cancel: &CancellationToken,
        user: &str,
        home: &Path,
        keys: &[String],
    ) -> Result<(), ManagerError> {
        let ssh_dir = home.join(".ssh");
        let path = ssh_dir.join("authorized_keys");
        refuse_symlink(&ssh_dir)?;
        refuse_symlink(&path)?;
        let existing = read_or_empty(&path)?;
        if existing.is_empty() && keys.is_empty() {
            return Ok(());
        }

        let merged = merge_authorized_keys(&existing, keys);
        if !write_if_changed(&path, &merged)?.written() {
            return Ok(());
        }
        restrict_permissions(&ssh_dir, &path)?;
        let owner = format!("{user}:");
        let dir = ssh_dir.to_string_lossy();
        self.runner.run(cancel, "chown", &["-R", &owner, &dir]).await?;
        Ok(())
    }
}

#[async_trait]
impl Manager for AccountsManager {
    fn name(&self) -> &'static str {
        "accounts"
    }

    fn disabled(&self, platform: Platform) -> bool {
        platform.is_windows() || !self.config.get_bool("Daemons", "accounts_daemon", true)
    }

    fn diff(&self, snapshots: &Snapshots) -> bool {
        key_inputs(&snapshots.old) != key_inputs(&snapshots.new)
    }

    /// Re-run once a key that was handed out has expired.
    fn timeout(&self) -> bool {
        let now = Utc::now();
        self.applied
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .flatten()
            .any(|key| expired(key, now) == Some(true))
    }

    async fn set(&self, snapshots: &Snapshots, cancel: &CancellationToken) -> Result<(), ManagerError> {
        let desired = desired_keys(&snapshots.new, Utc::now());
        let homes = parse_passwd(&read_or_empty(&self.paths.passwd)?);
        let groups = self.groups()?;
        let mut errors = Vec::new();

        for (user, keys) in &desired {
            let home = match homes.get(user) {
                Some(home) => home.clone(),
                None => {
                    if let Err(err) = self.create_user(cancel, user, &groups).await {
                        tracing::error!(user = %user, error = %err, "failed to create user");
                        errors.push(err);
                        continue;
                    }
                    self.paths.home_root.join(user)
                }
            };
            if let Err(err) = self.write_keys(cancel, user, &home, keys).await {
                tracing::error!(user = %user, error = %err, "failed to update authorized_keys");
                errors.push(err);
            }
        }

        let previous = read_or_empty(&self.paths.users_file)?;
        for user in previous.lines().map(str::trim).filter(|u| !u.is_empty()) {
            if desired.contains_key(user) {
                continue;
            }
            let Some(home) = homes.get(user) else {
                continue;
            };
            tracing::info!(user = user, "removing managed keys from user no longer in metadata");
            if let Err(err) = self.write_keys(cancel, user, home, &[]).await {
                errors.push(err);
            }
        }

        let users: String = desired.keys().map(|u| format!("{u}\n")).collect();
        if !(users.is_empty() && previous.is_empty()) {
            write_if_changed(&self.paths.users_file, &users)?;
        }

        *self.applied.lock().unwrap_or_else(|e| e.into_inner()) = desired;
        ManagerError::collect(errors)
    }
}

/// Attributes that feed the desired key set.
fn key_inputs(d: &Descriptor) -> (Option<&String>, Option<&String>, Option<bool>, bool) {
    (
        d.instance.attributes.ssh_keys.as_ref(),
        d.project.attributes.ssh_keys.as_ref(),
        d.instance.attributes.block_project_ssh_keys,
        d.os_login().enabled,
    )
}

/// Drop agent-managed entries from `existing` and append `keys` as the new
/// managed block. User-added lines keep their order.
pub fn merge_authorized_keys(existing: &str, keys: &[String]) -> String {
    let mut out: Vec<&str> = Vec::new();
    let mut lines = existing.lines();
    while let Some(line) = lines.next() {
        if line.trim() == MANAGED_MARKER {
            lines.next();
            continue;
        }
        out.push(line);
    }
    for key in keys {
        out.push(MANAGED_MARKER);
        out.push(key);
    }
    if out.is_empty() {
        return String::new();
    }
    let mut merged = out.join("\n");
    merged.push('\n');
    merged
}

fn parse_passwd(contents: &str) -> HashMap<String, PathBuf> {
    contents
        .lines()
        .filter_map(|line| {
            let fields: Vec<&str> = line.split(':').collect();
            (fields.len() >= 6).then(|| (fields[0].to_string(), PathBuf::from(fields[5])))
        })
        .collect()
}

fn parse_group_names(contents: &str) -> BTreeSet<String> {
    contents
        .lines()
        .filter_map(|line| line.split(':').next())
        .filter(|name| !name.is_empty())
        .map(str::to_string)
        .collect()
}

/// Home directories are user-writable; never let a planted link redirect a
/// root write.
fn refuse_symlink(path: &Path) -> Result<(), ManagerError> {
    match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.file_type().is_symlink() => Err(ManagerError::Symlink {
            path: path.to_path_buf(),
        }),
        Ok(_) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(io_err(path, err)),
    }
}

#[cfg(unix)]
fn restrict_permissions(ssh_dir: &Path, file: &Path) -> Result<(), ManagerError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(ssh_dir, std::fs::Permissions::from_mode(0o700))
        .map_err(|e| io_err(ssh_dir, e))?;
    std::fs::set_permissions(file, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| io_err(file, e))
}

#[cfg(not(unix))]
fn restrict_permissions(_ssh_dir: &Path, _file: &Path) -> Result<(), ManagerError> {
    Ok(())
}
