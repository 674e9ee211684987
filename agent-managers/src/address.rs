//! Forwarded IP routes.
//!
//! Every forwarded IP, target instance IP and alias range on a NIC is
//! installed as a `local` route tagged `proto 66`, so routes owned by the
//! agent can be listed and removed without touching anything else.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use agent_core::{CommandRunner, Config, Descriptor, NetworkInterface, Platform};

use crate::error::{io_err, ManagerError};
use crate::{Manager, Snapshots};

/// Route protocol number marking agent-owned routes.
pub const ROUTE_PROTO: &str = "66";

pub struct AddressManager {
    config: Arc<Config>,
    runner: Arc<dyn CommandRunner>,
    sys_class_net: PathBuf,
}

impl AddressManager {
    pub fn new(config: Arc<Config>, runner: Arc<dyn CommandRunner>, sys_class_net: PathBuf) -> Self {
        Self {
            config,
            runner,
            sys_class_net,
        }
    }

    async fn current_routes(
        &self,
        cancel: &CancellationToken,
        iface: &str,
    ) -> Result<BTreeSet<String>, ManagerError> {
        let out = self
            .runner
            .run(
                cancel,
                "ip",
                &[
                    "route", "list", "table", "local", "type", "local", "scope", "host", "dev",
                    iface, "proto", ROUTE_PROTO,
                ],
            )
            .await?;
        Ok(parse_routes(&out.stdout))
    }

    async fn route(
        &self,
        cancel: &CancellationToken,
        verb: &str,
        ip: &str,
        iface: &str,
    ) -> Result<(), ManagerError> {
        self.runner
            .run(
                cancel,
                "ip",
                &[
                    "route", verb, "to", "local", ip, "scope", "host", "dev", iface, "proto",
                    ROUTE_PROTO,
                ],
            )
            .await?;
        Ok(())
    }

    async fn sync_interface(
        &self,
        cancel: &CancellationToken,
        mac: &str,
        desired: &BTreeSet<String>,
    ) -> Result<(), ManagerError> {
        let iface = interface_for_mac(&self.sys_class_net, mac)?;
        let current = self.current_routes(cancel, &iface).await?;

        let mut errors = Vec::new();
        for ip in desired.difference(&current) {
            tracing::info!(ip = %ip, iface = %iface, "adding forwarded IP route");
            if let Err(err) = self.route(cancel, "add", ip, &iface).await {
                errors.push(err);
            }
        }
        for ip in current.difference(desired) {
            tracing::info!(ip = %ip, iface = %iface, "removing forwarded IP route");
            if let Err(err) = self.route(cancel, "delete", ip, &iface).await {
                errors.push(err);
            }
        }
        ManagerError::collect(errors)
    }
}

#[async_trait]
impl Manager for AddressManager {
    fn name(&self) -> &'static str {
        "address"
    }

    fn disabled(&self, platform: Platform) -> bool {
        platform != Platform::Linux
            || !self.config.get_bool("NetworkInterfaces", "ip_forwarding", true)
            || !self.config.get_bool("Daemons", "network_daemon", true)
    }

    fn diff(&self, snapshots: &Snapshots) -> bool {
        interface_routes(&snapshots.old) != interface_routes(&snapshots.new)
    }

    fn timeout(&self) -> bool {
        false
    }

    async fn set(&self, snapshots: &Snapshots, cancel: &CancellationToken) -> Result<(), ManagerError> {
        let mut errors = Vec::new();
        let current: BTreeSet<String> = snapshots
            .new
            .instance
            .network_interfaces
            .iter()
            .map(|nic| nic.mac.to_ascii_lowercase())
            .collect();
        for nic in &snapshots.new.instance.network_interfaces {
            if let Err(err) = self.sync_interface(cancel, &nic.mac, &desired_routes(nic)).await {
                tracing::error!(mac = %nic.mac, error = %err, "failed to sync forwarded IPs");
                errors.push(err);
            }
        }

        // NICs dropped from metadata keep no agent routes.
        let empty = BTreeSet::new();
        for nic in &snapshots.old.instance.network_interfaces {
            if current.contains(&nic.mac.to_ascii_lowercase()) {
                continue;
            }
            match self.sync_interface(cancel, &nic.mac, &empty).await {
                Ok(()) => {}
                Err(ManagerError::UnknownInterface { .. }) => {
                    tracing::debug!(mac = %nic.mac, "removed NIC is gone from the host");
                }
                Err(err) => {
                    tracing::error!(mac = %nic.mac, error = %err, "failed to withdraw forwarded IPs");
                    errors.push(err);
                }
            }
        }
        ManagerError::collect(errors)
    }
}

fn desired_routes(nic: &NetworkInterface) -> BTreeSet<String> {
    nic.forwarded_ips
        .iter()
        .chain(&nic.target_instance_ips)
        .chain(&nic.ip_aliases)
        .map(|ip| normalize(ip))
        .filter(|ip| !ip.is_empty())
        .collect()
}

fn interface_routes(descriptor: &Descriptor) -> Vec<(String, BTreeSet<String>)> {
    descriptor
        .instance
        .network_interfaces
        .iter()
        .map(|nic| (nic.mac.to_ascii_lowercase(), desired_routes(nic)))
        .collect()
}

/// Single addresses lose their `/32`; ranges keep their prefix.
fn normalize(ip: &str) -> String {
    ip.trim().trim_end_matches("/32").to_string()
}

/// Parse `ip route list` output into the route destinations.
fn parse_routes(stdout: &str) -> BTreeSet<String> {
    stdout
        .lines()
        .filter_map(|line| {
            let mut tokens = line.split_whitespace();
            let first = tokens.next()?;
            let dest = if first == "local" { tokens.next()? } else { first };
            Some(normalize(dest))
        })
        .collect()
}

/// Find the kernel interface name whose `address` matches `mac`.
fn interface_for_mac(sys_class_net: &Path, mac: &str) -> Result<String, ManagerError> {
    let wanted = mac.trim().to_ascii_lowercase();
    let entries = std::fs::read_dir(sys_class_net).map_err(|e| io_err(sys_class_net, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| io_err(sys_class_net, e))?;
        let address = entry.path().join("address");
        let Ok(found) = std::fs::read_to_string(&address) else {
            continue;
        };
        if found.trim().to_ascii_lowercase() == wanted {
            return Ok(entry.file_name().to_string_lossy().into_owned());
        }
    }
    Err(ManagerError::UnknownInterface { mac: mac.to_string() })
}

#[cfg(test)]
mod tests {
    use agent_core::run::fake::FakeRunner;
    use tempfile::TempDir;

    use super::*;

    fn sysfs(ifaces: &[(&str, &str)]) -> TempDir {
        let dir = TempDir::new().expect("tempdir");
        for (name, mac) in ifaces {
            let iface = dir.path().join(name);
            std::fs::create_dir_all(&iface).expect("iface dir");
            std::fs::write(iface.join("address"), format!("{mac}\n")).expect("address");
        }
        dir
    }

    fn descriptor(mac: &str, forwarded: &[&str], aliases: &[&str]) -> Arc<Descriptor> {
        let mut d = Descriptor::default();
        d.instance.network_interfaces.push(NetworkInterface {
            mac: mac.to_string(),
            forwarded_ips: forwarded.iter().map(|s| s.to_string()).collect(),
            target_instance_ips: Vec::new(),
            ip_aliases: aliases.iter().map(|s| s.to_string()).collect(),
        });
        Arc::new(d)
    }

    #[test]
    fn parses_route_listing() {
        let out = "local 10.0.0.5 dev eth0 proto 66 scope host\n10.1.0.0/24 dev eth0 proto 66 scope host\n";
        let routes = parse_routes(out);
        assert_eq!(
            routes.into_iter().collect::<Vec<_>>(),
            vec!["10.0.0.5", "10.1.0.0/24"]
        );
    }

    #[test]
    fn disabled_by_config_or_platform() {
        let runner: Arc<dyn CommandRunner> = Arc::new(FakeRunner::new());
        let on = AddressManager::new(Arc::new(Config::default()), runner.clone(), PathBuf::new());
        assert!(!on.disabled(Platform::Linux));
        assert!(on.disabled(Platform::Windows));

        let cfg = Config::parse("[NetworkInterfaces]\nip_forwarding = false\n", Path::new("t"))
            .expect("cfg");
        let off = AddressManager::new(Arc::new(cfg), runner, PathBuf::new());
        assert!(off.disabled(Platform::Linux));
    }

    #[tokio::test]
    async fn adds_missing_and_removes_stale_routes() {
        let sys = sysfs(&[("lo", "00:00:00:00:00:00"), ("eth0", "42:01:0a:00:00:02")]);
        let runner = Arc::new(FakeRunner::new());
        runner.respond("ip route list", "local 10.0.0.9 dev eth0 proto 66 scope host\nlocal 10.0.0.5 dev eth0 proto 66 scope host\n");
        let manager = AddressManager::new(
            Arc::new(Config::default()),
            runner.clone(),
            sys.path().to_path_buf(),
        );

        let snapshots = Snapshots {
            old: Arc::new(Descriptor::default()),
            new: descriptor("42:01:0A:00:00:02", &["10.0.0.5/32"], &["10.1.0.0/24"]),
        };
        assert!(manager.diff(&snapshots));
        manager
            .set(&snapshots, &CancellationToken::new())
            .await
            .expect("set");

        assert_eq!(
            runner.calls(),
            vec![
                "ip route list table local type local scope host dev eth0 proto 66",
                "ip route add to local 10.1.0.0/24 scope host dev eth0 proto 66",
                "ip route delete to local 10.0.0.9 scope host dev eth0 proto 66",
            ]
        );
    }

    #[tokio::test]
    async fn routes_of_a_nic_dropped_from_metadata_are_withdrawn() {
        let sys = sysfs(&[("eth0", "42:01:0a:00:00:02"), ("eth1", "42:01:0a:00:00:03")]);
        let runner = Arc::new(FakeRunner::new());
        runner.respond(
            "ip route list table local type local scope host dev eth1",
            "local 10.2.0.7 dev eth1 proto 66 scope host\n",
        );
        let manager = AddressManager::new(
            Arc::new(Config::default()),
            runner.clone(),
            sys.path().to_path_buf(),
        );

        let mut old = (*descriptor("42:01:0a:00:00:02", &["10.0.0.5"], &[])).clone();
        old.instance.network_interfaces.push(NetworkInterface {
            mac: "42:01:0A:00:00:03".to_string(),
            forwarded_ips: vec!["10.2.0.7".to_string()],
            target_instance_ips: Vec::new(),
            ip_aliases: Vec::new(),
        });
        let gone = NetworkInterface {
            mac: "aa:bb:cc:dd:ee:ff".to_string(),
            forwarded_ips: vec!["10.9.9.9".to_string()],
            target_instance_ips: Vec::new(),
            ip_aliases: Vec::new(),
        };
        old.instance.network_interfaces.push(gone);
        let snapshots = Snapshots {
            old: Arc::new(old),
            new: descriptor("42:01:0a:00:00:02", &["10.0.0.5"], &[]),
        };
        assert!(manager.diff(&snapshots));
        manager
            .set(&snapshots, &CancellationToken::new())
            .await
            .expect("a NIC missing from the host is not an error");

        let calls = runner.calls();
        assert!(calls.contains(
            &"ip route delete to local 10.2.0.7 scope host dev eth1 proto 66".to_string()
        ));
        assert!(!calls.iter().any(|c| c.contains("10.9.9.9")));
    }

    #[tokio::test]
    async fn unknown_mac_is_reported() {
        let sys = sysfs(&[("eth0", "42:01:0a:00:00:02")]);
        let manager = AddressManager::new(
            Arc::new(Config::default()),
            Arc::new(FakeRunner::new()),
            sys.path().to_path_buf(),
        );
        let snapshots = Snapshots {
            old: Arc::new(Descriptor::default()),
            new: descriptor("aa:bb:cc:dd:ee:ff", &["10.0.0.5"], &[]),
        };
        let err = manager
            .set(&snapshots, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ManagerError::UnknownInterface { .. }));
    }

    #[test]
    fn no_diff_when_routes_equal() {
        let sys_less = AddressManager::new(
            Arc::new(Config::default()),
            Arc::new(FakeRunner::new()),
            PathBuf::new(),
        );
        let snapshots = Snapshots {
            old: descriptor("aa", &["10.0.0.5"], &[]),
            new: descriptor("AA", &["10.0.0.5/32"], &[]),
        };
        assert!(!sys_less.diff(&snapshots));
    }
}
