//! Configuration schema definitions.
//!
//! All types derive Serde traits for deserialization from config files.
//! Every field has a default, so an empty file is a valid config.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Root server configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServerConfig {
    pub listener: ListenerConfig,

    /// TLS is enabled only when both file names are set.
    pub tls: TlsConfig,

    pub limits: LimitsConfig,

    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Interface to bind (e.g., "0.0.0.0").
    pub host: String,

    /// Default port when `listen` is not given one explicitly.
    pub port: PortSetting,

    /// Maximum requests dispatched concurrently (backpressure).
    pub max_concurrent_requests: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: PortSetting::Number(3000),
            max_concurrent_requests: 10_000,
        }
    }
}

/// A port written either as a number or as a numeric string.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(untagged)]
pub enum PortSetting {
    Number(i64),
    Text(String),
}

impl fmt::Display for PortSetting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PortSetting::Number(n) => write!(f, "{n}"),
            PortSetting::Text(s) => f.write_str(s),
        }
    }
}

/// TLS key/certificate pair (PEM).
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct TlsConfig {
    pub key_file_name: Option<String>,
    pub cert_file_name: Option<String>,
}

impl TlsConfig {
    /// Both files configured.
    pub fn is_enabled(&self) -> bool {
        self.key_file_name.is_some() && self.cert_file_name.is_some()
    }
}

/// Request limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum request body size in bytes.
    pub max_body_size: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_body_size: 2 * 1024 * 1024, // 2MB
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    pub log_format: LogFormat,

    /// Enable the Prometheus scrape endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config: ServerConfig = toml::from_str("").unwrap();
        assert_eq!(config.listener.host, "0.0.0.0");
        assert_eq!(config.listener.port, PortSetting::Number(3000));
        assert_eq!(config.limits.max_body_size, 2 * 1024 * 1024);
        assert_eq!(config.observability.log_format, LogFormat::Pretty);
        assert!(!config.tls.is_enabled());
    }

    #[test]
    fn port_accepts_number_or_string() {
        let config: ServerConfig = toml::from_str("[listener]\nport = 8080").unwrap();
        assert_eq!(config.listener.port, PortSetting::Number(8080));

        let config: ServerConfig = toml::from_str("[listener]\nport = \"9001\"").unwrap();
        assert_eq!(config.listener.port, PortSetting::Text("9001".to_string()));
    }

    #[test]
    fn full_document() {
        let config: ServerConfig = toml::from_str(
            r#"
            [listener]
            host = "127.0.0.1"
            port = 4000
            max_concurrent_requests = 64

            [tls]
            key_file_name = "key.pem"
            cert_file_name = "cert.pem"

            [limits]
            max_body_size = 1024

            [observability]
            log_level = "debug"
            log_format = "json"
            metrics_enabled = true
            metrics_address = "127.0.0.1:9100"
            "#,
        )
        .unwrap();

        assert_eq!(config.listener.max_concurrent_requests, 64);
        assert!(config.tls.is_enabled());
        assert_eq!(config.limits.max_body_size, 1024);
        assert_eq!(config.observability.log_format, LogFormat::Json);
        assert!(config.observability.metrics_enabled);
    }

    #[test]
    fn unknown_log_format_is_a_parse_error() {
        let result: Result<ServerConfig, _> =
            toml::from_str("[observability]\nlog_format = \"xml\"");
        assert!(result.is_err());
    }
}
