//! Metadata descriptor types.
//!
//! A [`Descriptor`] is the full recursive metadata document served at
//! `computeMetadata/v1/?recursive=true&alt=json`. It is immutable once
//! fetched; the daemon shares it behind an `Arc`.
//!
//! Attribute values are strings on the wire. Boolean attributes are parsed
//! leniently; a value that does not parse behaves as if it were unset.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

// ---------------------------------------------------------------------------
// Descriptor
// ---------------------------------------------------------------------------

/// Root of the metadata document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Descriptor {
    pub instance: Instance,
    pub project: Project,
}

/// Instance-scoped metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Instance {
    pub id: u64,
    pub hostname: String,
    pub attributes: Attributes,
    pub network_interfaces: Vec<NetworkInterface>,
    pub virtual_clock: VirtualClock,
}

/// Project-scoped metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Project {
    pub project_id: String,
    pub numeric_project_id: u64,
    pub attributes: Attributes,
}

/// A virtual NIC as described by metadata.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct NetworkInterface {
    pub mac: String,
    pub forwarded_ips: Vec<String>,
    pub target_instance_ips: Vec<String>,
    pub ip_aliases: Vec<String>,
}

/// Live-migration clock drift marker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VirtualClock {
    pub drift_token: String,
}

/// Attributes understood by the agent. Unknown keys are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Attributes {
    pub ssh_keys: Option<String>,
    #[serde(deserialize_with = "de_flag")]
    pub block_project_ssh_keys: Option<bool>,
    #[serde(deserialize_with = "de_flag")]
    pub enable_oslogin: Option<bool>,
    #[serde(rename = "enable-oslogin-2fa", deserialize_with = "de_flag")]
    pub enable_oslogin_2fa: Option<bool>,
    #[serde(deserialize_with = "de_flag")]
    pub enable_oslogin_sk: Option<bool>,
    #[serde(deserialize_with = "de_flag")]
    pub enable_wsfc: Option<bool>,
    pub wsfc_addrs: Option<String>,
    pub wsfc_agent_port: Option<String>,
    #[serde(deserialize_with = "de_flag")]
    pub enable_diagnostics: Option<bool>,
    pub diagnostics: Option<String>,
    pub windows_keys: Option<String>,
    #[serde(deserialize_with = "de_flag")]
    pub disable_guest_telemetry: Option<bool>,
}

/// Effective OS Login switches, instance values overriding project values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OsLoginFlags {
    pub enabled: bool,
    pub two_factor: bool,
    pub security_key: bool,
}

impl Descriptor {
    /// Resolve a boolean attribute, preferring the instance value.
    pub fn flag(&self, pick: impl Fn(&Attributes) -> Option<bool>) -> Option<bool> {
        pick(&self.instance.attributes).or_else(|| pick(&self.project.attributes))
    }

    /// Resolve a string attribute, preferring the instance value.
    pub fn value<'a>(&'a self, pick: impl Fn(&'a Attributes) -> Option<&'a String>) -> Option<&'a str> {
        pick(&self.instance.attributes)
            .or_else(|| pick(&self.project.attributes))
            .map(String::as_str)
    }

    /// OS Login state. Two-factor and security-key only count when OS Login
    /// itself is enabled.
    pub fn os_login(&self) -> OsLoginFlags {
        let enabled = self.flag(|a| a.enable_oslogin).unwrap_or(false);
        OsLoginFlags {
            enabled,
            two_factor: enabled && self.flag(|a| a.enable_oslogin_2fa).unwrap_or(false),
            security_key: enabled && self.flag(|a| a.enable_oslogin_sk).unwrap_or(false),
        }
    }

    /// Project id, or `None` for an empty descriptor.
    pub fn project_id(&self) -> Option<&str> {
        let id = self.project.project_id.as_str();
        (!id.is_empty()).then_some(id)
    }
}

/// `oslogin/certificates` response body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustedCertificates {
    #[serde(rename = "trustedCertificateAuthorities", default)]
    pub certs: Vec<TrustedCert>,
}

/// One trusted user CA public key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustedCert {
    #[serde(rename = "publicKey")]
    pub public_key: String,
}

// ---------------------------------------------------------------------------
// Lenient boolean parsing
// ---------------------------------------------------------------------------

/// Parse a metadata or config boolean. Returns `None` for anything unrecognised.
pub fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "t" | "true" | "y" | "yes" | "on" => Some(true),
        "0" | "f" | "false" | "n" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn de_flag<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    Ok(match raw {
        Some(Value::Bool(b)) => Some(b),
        Some(Value::String(s)) => parse_bool(&s),
        _ => None,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
