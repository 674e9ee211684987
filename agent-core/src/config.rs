//! Layered `instance_configs.cfg` loading.
//!
//! # Layers
//!
//! ```text
//! /etc/default/instance_configs.cfg            (operator overrides, highest priority)
//! /etc/default/instance_configs.cfg.distro     (distro packaging defaults)
//! /etc/default/instance_configs.cfg.template   (shipped template, lowest priority)
//! ```
//!
//! A key is taken from the first layer that defines it. Missing layers are
//! skipped; a malformed layer fails the whole load. Section and key names are
//! case-insensitive. Within one layer a repeated key keeps its last value, and
//! backslashes are literal (Windows paths).

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use ini::{Ini, ParseOption};

use crate::error::{io_err, ConfigError};
use crate::types::parse_bool;

/// Unix base config path.
pub const CONFIG_PATH: &str = "/etc/default/instance_configs.cfg";
/// Windows base config path.
pub const WIN_CONFIG_PATH: &str = r"C:\Program Files\Google\Compute Engine\instance_configs.cfg";

pub const DISTRO_SUFFIX: &str = ".distro";
pub const TEMPLATE_SUFFIX: &str = ".template";

type Section = BTreeMap<String, String>;

/// Merged, read-only instance configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Config {
    sections: BTreeMap<String, Section>,
    sources: Vec<PathBuf>,
}

/// `[base, base.distro, base.template]`, highest priority first.
pub fn layer_paths(base: &Path) -> [PathBuf; 3] {
    let with_suffix = |suffix: &str| {
        let mut raw = base.as_os_str().to_owned();
        raw.push(suffix);
        PathBuf::from(raw)
    };
    [
        base.to_path_buf(),
        with_suffix(DISTRO_SUFFIX),
        with_suffix(TEMPLATE_SUFFIX),
    ]
}

impl Config {
    /// Load `base` and its `.distro` / `.template` fallbacks.
    ///
    /// Returns an empty config when no layer exists.
    pub fn load_layered(base: &Path) -> Result<Self, ConfigError> {
        let mut config = Config::default();
        for path in layer_paths(base) {
            let contents = match std::fs::read_to_string(&path) {
                Ok(contents) => contents,
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => return Err(io_err(&path, err)),
            };
            let layer = Config::parse(&contents, &path)?;
            config.fill_from(layer);
            config.sources.push(path);
        }
        Ok(config)
    }

    /// Parse a single layer. `path` is used for error context only.
    pub fn parse(contents: &str, path: &Path) -> Result<Self, ConfigError> {
        let opts = ParseOption {
            enabled_escape: false,
            ..ParseOption::default()
        };
        let ini = Ini::load_from_str_opt(contents, opts).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;

        let mut sections: BTreeMap<String, Section> = BTreeMap::new();
        for (name, props) in ini.iter() {
            let section = sections
                .entry(name.unwrap_or_default().to_ascii_lowercase())
                .or_default();
            for (key, value) in props.iter() {
                section.insert(key.to_ascii_lowercase(), value.trim().to_string());
            }
        }
        Ok(Self {
            sections,
            sources: vec![path.to_path_buf()],
        })
    }

    /// Copy every key of `lower` that this config does not define yet.
    fn fill_from(&mut self, lower: Config) {
        for (name, section) in lower.sections {
            let target = self.sections.entry(name).or_default();
            for (key, value) in section {
                target.entry(key).or_insert(value);
            }
        }
    }

    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.sections
            .get(&section.to_ascii_lowercase())
            .and_then(|s| s.get(&key.to_ascii_lowercase()))
            .map(String::as_str)
    }

    /// Boolean lookup; absent or unparseable values yield `default`.
    pub fn get_bool(&self, section: &str, key: &str, default: bool) -> bool {
        self.get(section, key).and_then(parse_bool).unwrap_or(default)
    }

    pub fn get_u16(&self, section: &str, key: &str) -> Option<u16> {
        self.get(section, key).and_then(|v| v.parse().ok())
    }

    /// Comma-separated list lookup, empty entries dropped.
    pub fn get_list(&self, section: &str, key: &str) -> Option<Vec<String>> {
        self.get(section, key).map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
    }

    /// Files that contributed to this config, highest priority first.
    pub fn sources(&self) -> &[PathBuf] {
        &self.sources
    }

    pub fn is_empty(&self) -> bool {
        self.sections.values().all(BTreeMap::is_empty)
    }

    /// Iterate `(section, key, value)` in sorted order.
    pub fn entries(&self) -> impl Iterator<Item = (&str, &str, &str)> {
        self.sections.iter().flat_map(|(section, keys)| {
            keys.iter()
                .map(move |(k, v)| (section.as_str(), k.as_str(), v.as_str()))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layer_paths_append_suffixes() {
        let [base, distro, template] = layer_paths(Path::new("/etc/default/instance_configs.cfg"));
        assert_eq!(base, PathBuf::from("/etc/default/instance_configs.cfg"));
        assert_eq!(distro, PathBuf::from("/etc/default/instance_configs.cfg.distro"));
        assert_eq!(template, PathBuf::from("/etc/default/instance_configs.cfg.template"));
    }

    #[test]
    fn lookups_are_case_insensitive() {
        let cfg = Config::parse("[Daemons]\nClock_Skew_Daemon = False\n", Path::new("t.cfg"))
            .expect("parse");
        assert_eq!(cfg.get("daemons", "clock_skew_daemon"), Some("False"));
        assert!(!cfg.get_bool("DAEMONS", "CLOCK_SKEW_DAEMON", true));
    }

    #[test]
    fn get_bool_falls_back_on_garbage() {
        let cfg = Config::parse("[Daemons]\naccounts_daemon = sometimes\n", Path::new("t.cfg"))
            .expect("parse");
        assert!(cfg.get_bool("Daemons", "accounts_daemon", true));
        assert!(!cfg.get_bool("Daemons", "missing", false));
    }

    #[test]
    fn get_list_splits_and_trims() {
        let cfg = Config::parse("[Accounts]\ngroups = adm, video,,docker\n", Path::new("t.cfg"))
            .expect("parse");
        assert_eq!(
            cfg.get_list("Accounts", "groups"),
            Some(vec!["adm".to_string(), "video".to_string(), "docker".to_string()])
        );
    }

    #[test]
    fn backslashes_are_literal() {
        let cfg = Config::parse(
            "[diagnostics]\npath = C:\\temp\\new\n",
            Path::new("t.cfg"),
        )
        .expect("parse");
        assert_eq!(cfg.get("diagnostics", "path"), Some(r"C:\temp\new"));
    }

    #[test]
    fn repeated_key_in_one_layer_keeps_last() {
        let cfg = Config::parse("[Daemons]\nx = 1\nx = 2\n[daemons]\ny = a\nY = b\n", Path::new("t.cfg"))
            .expect("parse");
        assert_eq!(cfg.get("Daemons", "x"), Some("2"));
        assert_eq!(cfg.get("Daemons", "y"), Some("b"));
    }
}
