//! One-time host preparation before the first metadata fetch.

use std::path::Path;

use agent_core::os_info::OsInfo;
use agent_core::Platform;
use agent_managers::{read_or_empty, write_if_changed, ManagerError, WriteResult};

pub const METADATA_IP: &str = "169.254.169.254";
pub const METADATA_HOST: &str = "metadata.google.internal";

/// Make sure `hosts` resolves the metadata server name. An existing mapping
/// for the address is left alone.
pub fn ensure_hosts_entry(hosts: &Path) -> Result<WriteResult, ManagerError> {
    let current = read_or_empty(hosts)?;
    let mapped = current.lines().any(|line| {
        let mut fields = line.split('#').next().unwrap_or("").split_whitespace();
        fields.next() == Some(METADATA_IP) && fields.any(|name| name == METADATA_HOST)
    });
    if mapped {
        return write_if_changed(hosts, &current);
    }

    let mut updated = current;
    if !updated.is_empty() && !updated.ends_with('\n') {
        updated.push('\n');
    }
    updated.push_str(&format!("{METADATA_IP} {METADATA_HOST} # Added by Google\n"));
    write_if_changed(hosts, &updated)
}

/// Log the host identity and, on Linux, fix up name resolution for the
/// metadata server. Failures are logged; startup continues.
pub fn agent_init(platform: Platform, os: &OsInfo, hosts: &Path) {
    tracing::info!(
        os = %os.os,
        arch = %os.arch,
        distro = %os.pretty_name,
        kernel = %os.kernel_release,
        "host information",
    );
    if platform != Platform::Linux {
        return;
    }
    match ensure_hosts_entry(hosts) {
        Ok(result) if result.written() => {
            tracing::info!(path = %hosts.display(), "added metadata server to hosts file");
        }
        Ok(_) => {}
        Err(err) => tracing::warn!(error = %err, "failed to update hosts file"),
    }
}
