//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! dispatch chain, engine adapter, websocket sessions produce:
//!     → logging.rs (structured log events, per-request spans)
//!     → metrics.rs (counters, histograms)
//!
//! Consumers:
//!     → Log aggregation (stdout, pretty or JSON)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Request ID (UUID v4) attached to every dispatch span
//! - Metrics are cheap (atomic increments)

pub mod logging;
pub mod metrics;
