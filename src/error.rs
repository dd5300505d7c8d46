//! Error types shared across the framework.

use thiserror::Error;

/// Error type returned by middlewares.
///
/// Anything a handler returns through `Err` (or a panic) is caught at the
/// dispatch boundary and turned into a 500 response.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Errors raised by the response facade.
#[derive(Debug, Error)]
pub enum ResponseError {
    /// `end` was called on a response that had already been completed.
    #[error("response already ended")]
    AlreadyEnded,

    /// A JSON payload could not be serialized.
    #[error("failed to serialize response body: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Setup-time errors raised while building or starting a server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The listen port was not numeric or out of range.
    #[error("invalid port: {0}")]
    InvalidPort(String),

    /// A route pattern cannot be bound by the engine.
    #[error("invalid route pattern {path:?}: {reason}")]
    InvalidRoute { path: String, reason: &'static str },

    /// Binding the listener failed.
    #[error("failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// TLS material could not be loaded.
    #[error("TLS setup failed: {0}")]
    Tls(std::io::Error),

    /// The accept loop terminated with an error.
    #[error("server error: {0}")]
    Serve(#[from] std::io::Error),
}
