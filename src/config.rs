//! Proxy configuration.
//!
//! A plain record threaded through constructors; the core has no
//! process-global state. The shipped binary populates it from CLI
//! flags; it can also be loaded from a JSON file. Defaults mirror the
//! original deployment tool's.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ProxyError, Result};
use crate::protocol::DEFAULT_MAX_FRAME_LENGTH;

/// Full proxy configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Source cluster host, authoritative for reads.
    pub source_host: String,
    /// Source cluster port.
    pub source_port: u16,
    /// Label for the source cluster in logs and metrics.
    pub source_identifier: String,
    /// Target cluster host, receiver of the mirrored writes.
    pub target_host: String,
    /// Target cluster port.
    pub target_port: u16,
    /// Label for the target cluster in logs and metrics.
    pub target_identifier: String,
    /// Port the proxy listens on.
    pub proxy_port: u16,
    /// PEM certificate for client-facing TLS; requires `tls_key`.
    pub tls_cert: Option<PathBuf>,
    /// PEM key for client-facing TLS; requires `tls_cert`.
    pub tls_key: Option<PathBuf>,
    /// Wrap upstream connections in trust-all TLS.
    pub upstream_tls: bool,
    /// Runtime worker threads.
    pub threads: usize,
    /// Respond to the client only after both clusters responded.
    pub wait: bool,
    /// Rewrite `uuid()`/`now()` tokens before fan-out.
    pub uuid: bool,
    /// Allowed protocol versions; empty accepts whatever upstream
    /// advertises.
    pub protocol_versions: Vec<u8>,
    /// CQL versions advertised in SUPPORTED overrides; empty keeps the
    /// server's.
    pub cql_versions: Vec<String>,
    /// Emit metrics.
    pub metrics: bool,
    /// Port for the Prometheus endpoint the binary starts.
    pub metrics_port: u16,
    /// Maximum accepted frame body length.
    pub max_frame_length: u32,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            source_host: String::new(),
            source_port: 9042,
            source_identifier: "source node".to_string(),
            target_host: String::new(),
            target_port: 9042,
            target_identifier: "target node".to_string(),
            proxy_port: 29042,
            tls_cert: None,
            tls_key: None,
            upstream_tls: true,
            threads: 1,
            wait: true,
            uuid: true,
            protocol_versions: Vec::new(),
            cql_versions: Vec::new(),
            metrics: true,
            metrics_port: 28000,
            max_frame_length: DEFAULT_MAX_FRAME_LENGTH,
        }
    }
}

impl ProxyConfig {
    /// Minimal configuration for the given cluster pair.
    pub fn new(source_host: impl Into<String>, target_host: impl Into<String>) -> Self {
        Self {
            source_host: source_host.into(),
            target_host: target_host.into(),
            ..Self::default()
        }
    }

    /// Load configuration from a JSON file.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)
            .map_err(|e| ProxyError::Config(format!("parse {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Check the record for inconsistencies.
    pub fn validate(&self) -> Result<()> {
        if self.source_host.is_empty() {
            return Err(ProxyError::Config("source host is required".to_string()));
        }
        if self.target_host.is_empty() {
            return Err(ProxyError::Config("target host is required".to_string()));
        }
        if self.tls_cert.is_some() != self.tls_key.is_some() {
            return Err(ProxyError::Config(
                "Both tls_cert and tls_key need to be set for TLS".to_string(),
            ));
        }
        if self.threads == 0 {
            return Err(ProxyError::Config("threads must be at least 1".to_string()));
        }
        Ok(())
    }

    /// `host:port` for the source cluster.
    pub fn source_addr(&self) -> String {
        format!("{}:{}", self.source_host, self.source_port)
    }

    /// `host:port` for the target cluster.
    pub fn target_addr(&self) -> String {
        format!("{}:{}", self.target_host, self.target_port)
    }

    /// Whether client-facing TLS is configured.
    pub fn tls_enabled(&self) -> bool {
        self.tls_cert.is_some() && self.tls_key.is_some()
    }

    /// The configuration as name/value pairs, one per option, for the
    /// option-by-option startup log.
    pub fn options(&self) -> Vec<(&'static str, String)> {
        fn path(p: &Option<PathBuf>) -> String {
            p.as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_default()
        }

        vec![
            ("source_host", self.source_host.clone()),
            ("source_port", self.source_port.to_string()),
            ("source_identifier", self.source_identifier.clone()),
            ("target_host", self.target_host.clone()),
            ("target_port", self.target_port.to_string()),
            ("target_identifier", self.target_identifier.clone()),
            ("proxy_port", self.proxy_port.to_string()),
            ("tls_cert", path(&self.tls_cert)),
            ("tls_key", path(&self.tls_key)),
            ("upstream_tls", self.upstream_tls.to_string()),
            ("threads", self.threads.to_string()),
            ("wait", self.wait.to_string()),
            ("uuid", self.uuid.to_string()),
            ("protocol_versions", format!("{:?}", self.protocol_versions)),
            ("cql_versions", format!("{:?}", self.cql_versions)),
            ("metrics", self.metrics.to_string()),
            ("metrics_port", self.metrics_port.to_string()),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_deployment_tool() {
        let config = ProxyConfig::default();
        assert_eq!(config.source_port, 9042);
        assert_eq!(config.target_port, 9042);
        assert_eq!(config.proxy_port, 29042);
        assert_eq!(config.metrics_port, 28000);
        assert_eq!(config.source_identifier, "source node");
        assert_eq!(config.target_identifier, "target node");
        assert_eq!(config.threads, 1);
        assert!(config.wait);
        assert!(config.uuid);
        assert!(config.metrics);
        assert!(config.upstream_tls);
        assert!(config.protocol_versions.is_empty());
        assert!(config.cql_versions.is_empty());
    }

    #[test]
    fn test_validate_requires_hosts() {
        let config = ProxyConfig::default();
        assert!(config.validate().is_err());

        let config = ProxyConfig::new("src.example", "");
        assert!(config.validate().is_err());

        let config = ProxyConfig::new("src.example", "tgt.example");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_tls_both_or_neither() {
        let mut config = ProxyConfig::new("a", "b");
        config.tls_cert = Some(PathBuf::from("server.pem"));
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Both tls_cert and tls_key"));

        config.tls_key = Some(PathBuf::from("server.key"));
        assert!(config.validate().is_ok());
        assert!(config.tls_enabled());
    }

    #[test]
    fn test_validate_rejects_zero_threads() {
        let mut config = ProxyConfig::new("a", "b");
        config.threads = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_addrs() {
        let config = ProxyConfig::new("src.example", "tgt.example");
        assert_eq!(config.source_addr(), "src.example:9042");
        assert_eq!(config.target_addr(), "tgt.example:9042");
    }

    #[test]
    fn test_options_covers_every_setting() {
        let mut config = ProxyConfig::new("src.example", "tgt.example");
        config.tls_cert = Some(PathBuf::from("server.pem"));
        config.tls_key = Some(PathBuf::from("server.key"));
        config.protocol_versions = vec![4];

        let options = config.options();
        assert_eq!(options.len(), 17);

        let get = |name: &str| {
            options
                .iter()
                .find(|(n, _)| *n == name)
                .map(|(_, v)| v.clone())
                .unwrap()
        };
        assert_eq!(get("source_host"), "src.example");
        assert_eq!(get("target_port"), "9042");
        assert_eq!(get("tls_cert"), "server.pem");
        assert_eq!(get("wait"), "true");
        assert_eq!(get("protocol_versions"), "[4]");
        // Unset paths log as empty rather than a Debug None.
        assert_eq!(ProxyConfig::default().options()[7].1, "");
    }

    #[test]
    fn test_json_roundtrip_with_partial_file() {
        let raw = r#"{
            "source_host": "10.0.0.1",
            "target_host": "10.0.0.2",
            "protocol_versions": [4],
            "cql_versions": ["3.4.5"],
            "wait": false
        }"#;
        let config: ProxyConfig = serde_json::from_str(raw).unwrap();
        assert_eq!(config.source_host, "10.0.0.1");
        assert_eq!(config.protocol_versions, vec![4]);
        assert_eq!(config.cql_versions, vec!["3.4.5".to_string()]);
        assert!(!config.wait);
        // Unspecified fields take defaults.
        assert_eq!(config.proxy_port, 29042);
        assert!(config.uuid);
    }

    #[test]
    fn test_from_file() {
        let path = std::env::temp_dir().join("cql-mirror-config-test.json");
        std::fs::write(
            &path,
            r#"{"source_host": "s", "target_host": "t", "threads": 4}"#,
        )
        .unwrap();

        let config = ProxyConfig::from_file(&path).unwrap();
        assert_eq!(config.threads, 4);
        assert_eq!(config.source_host, "s");

        std::fs::remove_file(&path).ok();
    }
}
