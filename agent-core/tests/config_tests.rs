//! Layered config loading: precedence, fallbacks, missing and malformed layers.

use agent_core::{config::layer_paths, Config, ConfigError};
use assert_fs::prelude::*;
use predicates::prelude::predicate;

const BASE: &str = "instance_configs.cfg";

fn base(dir: &assert_fs::TempDir) -> std::path::PathBuf {
    dir.path().join(BASE)
}

// ---------------------------------------------------------------------------
// 1. Precedence
// ---------------------------------------------------------------------------

#[test]
fn base_wins_over_distro_wins_over_template() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    dir.child(BASE)
        .write_str("[Daemons]\nclock_skew_daemon = false\n")
        .expect("base");
    dir.child(format!("{BASE}.distro"))
        .write_str("[Daemons]\nclock_skew_daemon = true\naccounts_daemon = false\n")
        .expect("distro");
    dir.child(format!("{BASE}.template"))
        .write_str(
            "[Daemons]\nclock_skew_daemon = true\naccounts_daemon = true\nnetwork_daemon = false\n",
        )
        .expect("template");

    let cfg = Config::load_layered(&base(&dir)).expect("load");
    assert_eq!(cfg.get("Daemons", "clock_skew_daemon"), Some("false"));
    assert_eq!(cfg.get("Daemons", "accounts_daemon"), Some("false"));
    assert_eq!(cfg.get("Daemons", "network_daemon"), Some("false"));
    assert_eq!(cfg.sources().to_vec(), layer_paths(&base(&dir)).to_vec());
}

#[test]
fn template_only_is_enough() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    dir.child(format!("{BASE}.template"))
        .write_str("[Accounts]\ngroups = adm,video\n")
        .expect("template");

    let cfg = Config::load_layered(&base(&dir)).expect("load");
    assert_eq!(cfg.get("accounts", "GROUPS"), Some("adm,video"));
    assert_eq!(cfg.sources().len(), 1);
    dir.child(BASE).assert(predicate::path::missing());
}

#[test]
fn sections_merge_across_layers() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    dir.child(BASE).write_str("[wsfc]\nport = 1234\n").expect("base");
    dir.child(format!("{BASE}.distro"))
        .write_str("[diagnostics]\nenable = true\n")
        .expect("distro");

    let cfg = Config::load_layered(&base(&dir)).expect("load");
    assert_eq!(cfg.get_u16("wsfc", "port"), Some(1234));
    assert!(cfg.get_bool("diagnostics", "enable", false));
}

// ---------------------------------------------------------------------------
// 2. Missing and malformed
// ---------------------------------------------------------------------------

#[test]
fn no_layers_yields_empty_config() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    let cfg = Config::load_layered(&base(&dir)).expect("missing files are tolerated");
    assert!(cfg.is_empty());
    assert!(cfg.sources().is_empty());
    assert!(cfg.get_bool("Daemons", "accounts_daemon", true));
}

#[test]
fn malformed_layer_is_an_error_with_path() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    dir.child(BASE).write_str("[Daemons]\nok = 1\n").expect("base");
    dir.child(format!("{BASE}.distro"))
        .write_str("[Daemons\nclock_skew_daemon = true\n")
        .expect("distro");

    let err = Config::load_layered(&base(&dir)).unwrap_err();
    assert!(matches!(err, ConfigError::Parse { .. }), "got: {err}");
    assert!(err.to_string().contains(".distro"), "got: {err}");
}

#[cfg(unix)]
#[test]
fn unreadable_layer_is_io_error() {
    let dir = assert_fs::TempDir::new().expect("tempdir");
    // A directory where a file is expected cannot be read as a string.
    dir.child(BASE).create_dir_all().expect("mkdir");

    let err = Config::load_layered(&base(&dir)).unwrap_err();
    assert!(matches!(err, ConfigError::Io { .. }), "got: {err}");
}
