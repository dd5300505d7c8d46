//! Routing subsystem.
//!
//! # Data Flow
//! ```text
//! Registration (setup):
//!     Server::get/post/…/ws or Server::route(descriptors)
//!     → descriptor.rs (method, path, middlewares | behavior)
//!     → path.rs (validate, compile to engine syntax)
//!     → engine adapter route table (immutable once listening)
//!
//! Per request:
//!     engine matches path and method → route's chain, or the 404 chain
//! ```
//!
//! # Design Decisions
//! - Path matching is delegated to the engine; this module only shapes input
//! - Each (method, path) pair owns an independent chain
//! - First registration of a (method, path) pair wins

pub mod descriptor;
pub mod path;

pub use descriptor::{HttpRoute, Route, RouteMethod, UnknownMethod, WsRoute};
pub use path::{compile, CompiledPath};
