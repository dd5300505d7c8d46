//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (ports, limits)
//! - Detect half-configured TLS
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServerConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;

use crate::config::schema::{PortSetting, ServerConfig};

const LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// One semantic problem in a config file.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("listener.host must not be empty")]
    EmptyHost,

    #[error("listener.port `{0}` is not a port number")]
    InvalidPort(String),

    #[error("listener.max_concurrent_requests must be greater than zero")]
    ZeroConcurrency,

    #[error("limits.max_body_size must be greater than zero")]
    ZeroBodyLimit,

    #[error("tls requires both key_file_name and cert_file_name")]
    PartialTls,

    #[error("observability.log_level `{0}` is not one of trace, debug, info, warn, error")]
    UnknownLogLevel(String),

    #[error("observability.metrics_address `{0}` is not a socket address")]
    InvalidMetricsAddress(String),
}

/// Check a parsed config, collecting every problem.
pub fn validate_config(config: &ServerConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.listener.host.trim().is_empty() {
        errors.push(ValidationError::EmptyHost);
    }
    if !port_is_valid(&config.listener.port) {
        errors.push(ValidationError::InvalidPort(config.listener.port.to_string()));
    }
    if config.listener.max_concurrent_requests == 0 {
        errors.push(ValidationError::ZeroConcurrency);
    }
    if config.limits.max_body_size == 0 {
        errors.push(ValidationError::ZeroBodyLimit);
    }
    if config.tls.key_file_name.is_some() != config.tls.cert_file_name.is_some() {
        errors.push(ValidationError::PartialTls);
    }

    let level = config.observability.log_level.to_ascii_lowercase();
    if !LOG_LEVELS.contains(&level.as_str()) {
        errors.push(ValidationError::UnknownLogLevel(
            config.observability.log_level.clone(),
        ));
    }
    if config.observability.metrics_enabled
        && config
            .observability
            .metrics_address
            .parse::<SocketAddr>()
            .is_err()
    {
        errors.push(ValidationError::InvalidMetricsAddress(
            config.observability.metrics_address.clone(),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn port_is_valid(port: &PortSetting) -> bool {
    match port {
        PortSetting::Number(n) => u16::try_from(*n).is_ok(),
        PortSetting::Text(s) => s.trim().parse::<u16>().is_ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert_eq!(validate_config(&ServerConfig::default()), Ok(()));
    }

    #[test]
    fn collects_every_error() {
        let mut config = ServerConfig::default();
        config.listener.host = " ".to_string();
        config.listener.port = PortSetting::Text("http".to_string());
        config.limits.max_body_size = 0;
        config.tls.key_file_name = Some("key.pem".to_string());
        config.observability.log_level = "loud".to_string();

        let errors = validate_config(&config).unwrap_err();
        assert_eq!(
            errors,
            vec![
                ValidationError::EmptyHost,
                ValidationError::InvalidPort("http".to_string()),
                ValidationError::ZeroBodyLimit,
                ValidationError::PartialTls,
                ValidationError::UnknownLogLevel("loud".to_string()),
            ]
        );
    }

    #[test]
    fn port_range_is_checked() {
        let mut config = ServerConfig::default();
        config.listener.port = PortSetting::Number(70_000);
        assert!(validate_config(&config).is_err());

        config.listener.port = PortSetting::Text(" 8080 ".to_string());
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn metrics_address_only_checked_when_enabled() {
        let mut config = ServerConfig::default();
        config.observability.metrics_address = "nowhere".to_string();
        assert!(validate_config(&config).is_ok());

        config.observability.metrics_enabled = true;
        assert_eq!(
            validate_config(&config),
            Err(vec![ValidationError::InvalidMetricsAddress("nowhere".to_string())])
        );
    }
}
