//! TLS configuration and certificate loading.

use std::io;
use std::path::Path;

use axum_server::tls_rustls::RustlsConfig;

use crate::config::TlsConfig;
use crate::error::ServerError;

/// Load the configured PEM pair. `Ok(None)` when TLS is not configured.
pub async fn load_tls_config(config: &TlsConfig) -> Result<Option<RustlsConfig>, ServerError> {
    let (Some(key), Some(cert)) = (&config.key_file_name, &config.cert_file_name) else {
        return Ok(None);
    };
    let (key_path, cert_path) = (Path::new(key), Path::new(cert));

    for (what, path) in [("Certificate", cert_path), ("Private key", key_path)] {
        if !path.exists() {
            return Err(ServerError::Tls(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{what} file not found: {}", path.display()),
            )));
        }
    }

    let rustls = RustlsConfig::from_pem_file(cert_path, key_path)
        .await
        .map_err(ServerError::Tls)?;
    tracing::info!(cert = %cert_path.display(), "TLS enabled");
    Ok(Some(rustls))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_without_both_files() {
        let config = TlsConfig {
            key_file_name: Some("key.pem".to_string()),
            cert_file_name: None,
        };
        assert!(load_tls_config(&config).await.unwrap().is_none());
        assert!(load_tls_config(&TlsConfig::default()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn missing_files_are_setup_errors() {
        let config = TlsConfig {
            key_file_name: Some("/no/such/key.pem".to_string()),
            cert_file_name: Some("/no/such/cert.pem".to_string()),
        };
        let err = load_tls_config(&config).await.unwrap_err();
        assert!(matches!(err, ServerError::Tls(ref e) if e.kind() == io::ErrorKind::NotFound));
    }
}
