//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Server::listen(port)
//!     → listener.rs (resolve host, bind TCP)
//!     → tls.rs (optional PEM pair → rustls acceptor)
//!     → engine adapter serves the bound socket
//! ```
//!
//! # Design Decisions
//! - Binding happens before serving: bind/TLS errors are setup-time errors
//! - TLS is optional and selected by config alone

pub mod listener;
pub mod tls;
