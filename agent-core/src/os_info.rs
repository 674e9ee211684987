//! Host OS identification from `/etc/os-release`.

use std::collections::HashMap;
use std::path::Path;

use serde::Serialize;

pub const OS_RELEASE_PATH: &str = "/etc/os-release";
pub const KERNEL_RELEASE_PATH: &str = "/proc/sys/kernel/osrelease";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct OsInfo {
    /// `std::env::consts::OS`.
    pub os: String,
    pub arch: String,
    /// os-release `ID`, e.g. `debian`.
    pub id: String,
    pub version_id: String,
    pub pretty_name: String,
    pub kernel_release: String,
}

/// Detect the running host. Missing files leave fields empty.
pub fn detect() -> OsInfo {
    detect_at(Path::new(OS_RELEASE_PATH), Path::new(KERNEL_RELEASE_PATH))
}

pub fn detect_at(os_release: &Path, kernel_release: &Path) -> OsInfo {
    let fields = std::fs::read_to_string(os_release)
        .map(|c| parse_os_release(&c))
        .unwrap_or_default();
    let field = |key: &str| fields.get(key).cloned().unwrap_or_default();

    OsInfo {
        os: std::env::consts::OS.to_string(),
        arch: std::env::consts::ARCH.to_string(),
        id: field("ID"),
        version_id: field("VERSION_ID"),
        pretty_name: field("PRETTY_NAME"),
        kernel_release: std::fs::read_to_string(kernel_release)
            .map(|s| s.trim().to_string())
            .unwrap_or_default(),
    }
}

/// Parse `KEY=value` lines, stripping optional single or double quotes.
pub fn parse_os_release(contents: &str) -> HashMap<String, String> {
    contents
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| {
            let value = value.trim();
            let value = value
                .strip_prefix('"')
                .and_then(|v| v.strip_suffix('"'))
                .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
                .unwrap_or(value);
            (key.trim().to_string(), value.to_string())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn parses_quoted_and_bare_values() {
        let fields = parse_os_release(
            "# comment\nID=debian\nVERSION_ID=\"12\"\nPRETTY_NAME='Debian GNU/Linux 12'\n",
        );
        assert_eq!(fields["ID"], "debian");
        assert_eq!(fields["VERSION_ID"], "12");
        assert_eq!(fields["PRETTY_NAME"], "Debian GNU/Linux 12");
    }

    #[test]
    fn detect_at_tolerates_missing_files() {
        let dir = TempDir::new().expect("tempdir");
        let info = detect_at(&dir.path().join("nope"), &dir.path().join("nope2"));
        assert!(info.id.is_empty());
        assert!(info.kernel_release.is_empty());
        assert_eq!(info.os, std::env::consts::OS);
    }
}
