//! Configuration schema types

use crate::docker::DOCKER_SOCKET;
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

pub const DEFAULT_CA_FILE: &str = "ca.pem";
pub const DEFAULT_KEY_FILE: &str = "key.pem";
pub const DEFAULT_CERT_FILE: &str = "cert.pem";

/// Complete proxy configuration
///
/// Built once at startup, from an optional TOML file overlaid with command
/// line flags, and never modified afterwards.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Container label whose value becomes the hostname
    pub hostname_from_label: Option<String>,
    /// Regex applied to the hostname before it is used
    pub hostname_match: String,
    /// Replacement for `hostname_match`, `$1` style group references allowed
    pub hostname_replacement: String,
    /// Addresses to listen on: `tcp://host:port`, `unix:///path`, `/path` or `host:port`
    pub listen_addrs: Vec<String>,
    /// Present weave addresses in `inspect` output
    pub rewrite_inspect: bool,
    /// Do not attach containers that lack an explicit WEAVE_CIDR
    pub no_default_ipam: bool,
    /// Do not pass `--rewrite-hosts` to `weave attach`
    pub no_rewrite_hosts: bool,
    /// Accepted for compatibility, DNS integration is on unless `without_dns`
    pub with_dns: bool,
    /// Disable weaveDNS integration
    pub without_dns: bool,
    pub tls: TlsConfig,
    /// Docker engine control socket
    pub docker_socket: PathBuf,
    /// Path to the weave script
    pub weave_path: PathBuf,
    /// Name of the container the proxy itself runs in
    pub container_name: String,
    #[serde(skip)]
    pub version: String,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            hostname_from_label: None,
            hostname_match: "^(.*)$".to_string(),
            hostname_replacement: "$1".to_string(),
            listen_addrs: Vec::new(),
            rewrite_inspect: false,
            no_default_ipam: false,
            no_rewrite_hosts: false,
            with_dns: false,
            without_dns: false,
            tls: TlsConfig::default(),
            docker_socket: PathBuf::from(DOCKER_SOCKET),
            weave_path: PathBuf::from("./weave"),
            container_name: "weaveproxy".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// TLS settings for TCP listeners
///
/// Unset paths resolve to the well-known file names in the Docker
/// certificate directory.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct TlsConfig {
    pub tls: bool,
    /// Require clients to present a certificate signed by the CA
    pub tls_verify: bool,
    pub ca_cert: Option<PathBuf>,
    pub cert: Option<PathBuf>,
    pub key: Option<PathBuf>,
}

impl TlsConfig {
    pub fn enabled(&self) -> bool {
        self.tls || self.tls_verify
    }

    /// `$DOCKER_CERT_PATH`, else `~/.docker`
    pub fn cert_dir() -> PathBuf {
        if let Ok(path) = env::var("DOCKER_CERT_PATH") {
            return PathBuf::from(path);
        }
        if let Ok(home) = env::var("HOME") {
            return PathBuf::from(home).join(".docker");
        }
        PathBuf::from(".docker")
    }

    pub fn ca_cert_path(&self) -> PathBuf {
        self.ca_cert
            .clone()
            .unwrap_or_else(|| Self::cert_dir().join(DEFAULT_CA_FILE))
    }

    pub fn cert_path(&self) -> PathBuf {
        self.cert
            .clone()
            .unwrap_or_else(|| Self::cert_dir().join(DEFAULT_CERT_FILE))
    }

    pub fn key_path(&self) -> PathBuf {
        self.key
            .clone()
            .unwrap_or_else(|| Self::cert_dir().join(DEFAULT_KEY_FILE))
    }
}
