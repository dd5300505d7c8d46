//! TCP listener binding.
//!
//! # Responsibilities
//! - Resolve the configured host and the port passed to `listen`
//! - Bind before anything is served, so bind errors surface at setup
//! - Hand a std listener to the TLS acceptor when needed

use std::net::SocketAddr;

use tokio::net::{lookup_host, TcpListener};

use crate::error::ServerError;

/// Bind `host:port`, trying each resolved address in turn.
pub async fn bind(host: &str, port: u16) -> Result<TcpListener, ServerError> {
    let address = format!("{host}:{port}");
    let bind_error = |source| ServerError::Bind {
        address: address.clone(),
        source,
    };

    let candidates: Vec<SocketAddr> = lookup_host(&address).await.map_err(bind_error)?.collect();
    let mut last_error = None;
    for candidate in candidates {
        match TcpListener::bind(candidate).await {
            Ok(listener) => {
                let local_addr = listener.local_addr().map_err(bind_error)?;
                tracing::info!(address = %local_addr, "Listener bound");
                return Ok(listener);
            }
            Err(e) => {
                tracing::debug!(address = %candidate, error = %e, "Bind attempt failed");
                last_error = Some(e);
            }
        }
    }

    Err(bind_error(last_error.unwrap_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::AddrNotAvailable, "host resolved to no address")
    })))
}

/// Convert for acceptors that drive a std listener themselves.
pub fn into_std(listener: TcpListener) -> Result<std::net::TcpListener, ServerError> {
    listener.into_std().map_err(ServerError::Serve)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn binds_ephemeral_port() {
        let listener = bind("127.0.0.1", 0).await.unwrap();
        assert_ne!(listener.local_addr().unwrap().port(), 0);
    }

    #[tokio::test]
    async fn port_in_use_is_bind_error() {
        let first = bind("127.0.0.1", 0).await.unwrap();
        let port = first.local_addr().unwrap().port();
        let err = bind("127.0.0.1", port).await.unwrap_err();
        assert!(matches!(err, ServerError::Bind { .. }));
    }
}
