//! Agent settings consumed by the bootstrap pipeline.

use std::path::PathBuf;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// How thoroughly certificate revocation is checked.
///
/// `chain` and `leaf` both make the pipeline download and persist CRLs;
/// disabling revocation suppresses all CRL I/O, network and disk alike.
/// Accepts `true`/`false` as well as the strings `"chain"` and `"leaf"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RevocationMode {
    /// Check every certificate in the chain (the default).
    #[default]
    Chain,
    /// Check only the leaf certificate.
    Leaf,
    /// No revocation checking at all.
    Disabled,
}

impl RevocationMode {
    /// Whether revocation checking is on in any form.
    pub fn enabled(self) -> bool {
        !matches!(self, RevocationMode::Disabled)
    }
}

impl<'de> Deserialize<'de> for RevocationMode {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Bool(bool),
            Str(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Bool(true) => Ok(RevocationMode::Chain),
            Raw::Bool(false) => Ok(RevocationMode::Disabled),
            Raw::Str(s) => match s.as_str() {
                "chain" => Ok(RevocationMode::Chain),
                "leaf" => Ok(RevocationMode::Leaf),
                other => Err(D::Error::custom(format!(
                    "certificate_revocation must be a boolean, \"chain\", or \"leaf\", not {other:?}"
                ))),
            },
        }
    }
}

impl Serialize for RevocationMode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            RevocationMode::Chain => serializer.serialize_str("chain"),
            RevocationMode::Leaf => serializer.serialize_str("leaf"),
            RevocationMode::Disabled => serializer.serialize_bool(false),
        }
    }
}

/// Bootstrap settings.
///
/// Deserializes from the agent's TOML configuration; every field except
/// `certname` has a default. The path override fields fall back to the
/// standard layout under `ssldir` (see [`crate::provider::SslPaths`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// The agent's canonical identifier: CSR subject CN and CA URL path
    /// component.
    pub certname: String,

    /// Base URL of the CA service.
    #[serde(default = "default_ca_server")]
    pub ca_server: String,

    /// Comma-separated subject alt names for the CSR (`TYPE:VALUE` entries,
    /// bare entries default to DNS).
    #[serde(default)]
    pub dns_alt_names: String,

    /// Path to the CSR-attributes document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub csr_attributes: Option<PathBuf>,

    /// Revocation checking mode.
    #[serde(default)]
    pub certificate_revocation: RevocationMode,

    /// Seconds to sleep between polls for a signed certificate; 0 means
    /// exit instead of polling.
    #[serde(default = "default_waitforcert")]
    pub waitforcert: u64,

    /// RSA modulus size for generated keys.
    #[serde(default = "default_keylength")]
    pub keylength: usize,

    /// Directory holding the agent's SSL state.
    #[serde(default = "default_ssldir")]
    pub ssldir: PathBuf,

    /// Override for the persisted CA chain path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub localcacert: Option<PathBuf>,

    /// Override for the persisted CRL path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostcrl: Option<PathBuf>,

    /// Override for the persisted private key path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostprivkey: Option<PathBuf>,

    /// Override for the persisted client certificate path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hostcert: Option<PathBuf>,

    /// Override for the directory holding persisted certificate requests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub requestdir: Option<PathBuf>,

    /// Per-request HTTP timeout in seconds.
    #[serde(default = "default_http_timeout")]
    pub http_timeout: u64,
}

impl Config {
    /// Settings for the given certname with every other field defaulted.
    pub fn new(certname: impl Into<String>) -> Self {
        Self {
            certname: certname.into(),
            ca_server: default_ca_server(),
            dns_alt_names: String::new(),
            csr_attributes: None,
            certificate_revocation: RevocationMode::default(),
            waitforcert: default_waitforcert(),
            keylength: default_keylength(),
            ssldir: default_ssldir(),
            localcacert: None,
            hostcrl: None,
            hostprivkey: None,
            hostcert: None,
            requestdir: None,
            http_timeout: default_http_timeout(),
        }
    }
}

fn default_ca_server() -> String {
    "https://ca.warden:8140".to_string()
}

fn default_waitforcert() -> u64 {
    120
}

fn default_keylength() -> usize {
    4096
}

fn default_ssldir() -> PathBuf {
    PathBuf::from("/etc/warden/ssl")
}

fn default_http_timeout() -> u64 {
    60
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_toml_uses_defaults() {
        let config: Config = toml::from_str("certname = \"agent.example.net\"").unwrap();
        assert_eq!(config.certname, "agent.example.net");
        assert_eq!(config.waitforcert, 120);
        assert_eq!(config.keylength, 4096);
        assert_eq!(config.certificate_revocation, RevocationMode::Chain);
        assert_eq!(config.ssldir, PathBuf::from("/etc/warden/ssl"));
    }

    #[test]
    fn revocation_accepts_booleans_and_levels() {
        for (raw, expected) in [
            ("true", RevocationMode::Chain),
            ("false", RevocationMode::Disabled),
            ("\"chain\"", RevocationMode::Chain),
            ("\"leaf\"", RevocationMode::Leaf),
        ] {
            let doc = format!("certname = \"a\"\ncertificate_revocation = {raw}");
            let config: Config = toml::from_str(&doc).unwrap();
            assert_eq!(config.certificate_revocation, expected, "raw {raw}");
        }
    }

    #[test]
    fn revocation_rejects_unknown_levels() {
        let doc = "certname = \"a\"\ncertificate_revocation = \"sometimes\"";
        assert!(toml::from_str::<Config>(doc).is_err());
    }

    #[test]
    fn unknown_fields_are_rejected() {
        let doc = "certname = \"a\"\nwait_for_cert = 5";
        assert!(toml::from_str::<Config>(doc).is_err());
    }

    #[test]
    fn disabled_revocation_reports_disabled() {
        assert!(RevocationMode::Chain.enabled());
        assert!(RevocationMode::Leaf.enabled());
        assert!(!RevocationMode::Disabled.enabled());
    }
}
