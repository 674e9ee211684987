//! `ssh-keys` metadata parsing.
//!
//! Each line is `user:public-key`. Keys added by gcloud carry a
//! `google-ssh {"userName":..,"expireOn":..}` comment; once `expireOn` has
//! passed the key is ignored.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use agent_core::Descriptor;

const GOOGLE_SSH: &str = "google-ssh";

#[derive(Debug, Deserialize)]
struct GoogleSsh {
    #[serde(rename = "expireOn")]
    expire_on: String,
}

/// Parse an `expireOn` timestamp (`2018-04-02T12:00:00+0000` or RFC 3339).
pub fn parse_expiry(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%z")
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// `Some(true)` for an expired key, `Some(false)` for a live one, `None`
/// when the `google-ssh` comment cannot be understood.
pub fn expired(key: &str, now: DateTime<Utc>) -> Option<bool> {
    let Some(idx) = key.find(GOOGLE_SSH) else {
        return Some(false);
    };
    let json = key[idx + GOOGLE_SSH.len()..].trim();
    let meta: GoogleSsh = serde_json::from_str(json).ok()?;
    parse_expiry(&meta.expire_on).map(|at| at < now)
}

/// Linux user names the agent is willing to create.
pub fn valid_username(name: &str) -> bool {
    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    name.len() <= 32
        && (first.is_ascii_alphanumeric() || first == '_' || first == '.')
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

/// Append the live, well-formed keys in `raw` to `into`.
fn collect(raw: &str, now: DateTime<Utc>, into: &mut BTreeMap<String, Vec<String>>) {
    for line in raw.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let Some((user, key)) = line.split_once(':') else {
            continue;
        };
        let (user, key) = (user.trim(), key.trim());
        if !valid_username(user) || key.is_empty() {
            tracing::debug!(user = user, "skipping malformed ssh-keys entry");
            continue;
        }
        match expired(key, now) {
            Some(false) => {}
            Some(true) => {
                tracing::debug!(user = user, "skipping expired ssh key");
                continue;
            }
            None => {
                tracing::debug!(user = user, "skipping ssh key with unreadable expiry");
                continue;
            }
        }
        let keys = into.entry(user.to_string()).or_default();
        if !keys.iter().any(|k| k == key) {
            keys.push(key.to_string());
        }
    }
}

/// Users and keys the host should have for `descriptor`. Empty when OS
/// Login is on, since OS Login owns account management then.
pub fn desired_keys(descriptor: &Descriptor, now: DateTime<Utc>) -> BTreeMap<String, Vec<String>> {
    let mut desired = BTreeMap::new();
    if descriptor.os_login().enabled {
        return desired;
    }
    let instance = &descriptor.instance.attributes;
    if let Some(raw) = &instance.ssh_keys {
        collect(raw, now, &mut desired);
    }
    if !instance.block_project_ssh_keys.unwrap_or(false) {
        if let Some(raw) = &descriptor.project.attributes.ssh_keys {
            collect(raw, now, &mut desired);
        }
    }
    desired
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use rstest::rstest;

    use super::*;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).single().expect("time")
    }

    #[rstest]
    #[case("ssh-rsa AAAA alice@host", Some(false))]
    #[case(r#"ssh-rsa AAAA google-ssh {"userName":"a@x","expireOn":"2030-01-01T00:00:00+0000"}"#, Some(false))]
    #[case(r#"ssh-rsa AAAA google-ssh {"userName":"a@x","expireOn":"2020-01-01T00:00:00+0000"}"#, Some(true))]
    #[case(r#"ssh-rsa AAAA google-ssh {"userName":"a@x","expireOn":"2030-01-01T00:00:00Z"}"#, Some(false))]
    #[case(r#"ssh-rsa AAAA google-ssh {"userName":"a@x"}"#, None)]
    #[case("ssh-rsa AAAA google-ssh not-json", None)]
    fn expiry(#[case] key: &str, #[case] want: Option<bool>) {
        assert_eq!(expired(key, now()), want);
    }

    #[rstest]
    #[case("alice", true)]
    #[case("_svc.account-1", true)]
    #[case("-bad", false)]
    #[case("", false)]
    #[case("has space", false)]
    #[case("a23456789012345678901234567890123", false)]
    fn usernames(#[case] name: &str, #[case] ok: bool) {
        assert_eq!(valid_username(name), ok);
    }

    #[test]
    fn merges_instance_and_project_keys() {
        let mut d = Descriptor::default();
        d.instance.attributes.ssh_keys = Some("alice:ssh-rsa A1 alice\nbob:ssh-ed25519 B1 bob\n".into());
        d.project.attributes.ssh_keys = Some("alice:ssh-rsa A2 alice\nalice:ssh-rsa A1 alice\nbroken-line\n".into());

        let desired = desired_keys(&d, now());
        assert_eq!(desired["alice"], vec!["ssh-rsa A1 alice", "ssh-rsa A2 alice"]);
        assert_eq!(desired["bob"], vec!["ssh-ed25519 B1 bob"]);
        assert_eq!(desired.len(), 2);
    }

    #[test]
    fn block_project_keys_and_oslogin() {
        let mut d = Descriptor::default();
        d.instance.attributes.ssh_keys = Some("alice:ssh-rsa A1".into());
        d.instance.attributes.block_project_ssh_keys = Some(true);
        d.project.attributes.ssh_keys = Some("carol:ssh-rsa C1".into());
        let desired = desired_keys(&d, now());
        assert!(desired.contains_key("alice"));
        assert!(!desired.contains_key("carol"));

        d.project.attributes.enable_oslogin = Some(true);
        assert!(desired_keys(&d, now()).is_empty());
    }
}
