use std::path::PathBuf;
use std::time::Duration;

use agent_core::config::{CONFIG_PATH, WIN_CONFIG_PATH};
use agent_core::Platform;

pub const PROGRAM_NAME: &str = "GCEGuestAgent";
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub const HOSTS_PATH: &str = "/etc/hosts";
pub const WINDOWS_SERIAL_PORT: &str = r"\\.\COM1";

/// How long the runtime waits for abandoned blocking work on exit.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

pub fn config_path(platform: Platform) -> PathBuf {
    if platform.is_windows() {
        PathBuf::from(WIN_CONFIG_PATH)
    } else {
        PathBuf::from(CONFIG_PATH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_path_per_platform() {
        assert_eq!(config_path(Platform::Linux), PathBuf::from("/etc/default/instance_configs.cfg"));
        assert_eq!(config_path(Platform::Other("freebsd")), config_path(Platform::Linux));
        assert!(config_path(Platform::Windows).to_string_lossy().ends_with("instance_configs.cfg"));
        assert!(config_path(Platform::Windows).to_string_lossy().starts_with(r"C:\Program Files"));
    }
}
