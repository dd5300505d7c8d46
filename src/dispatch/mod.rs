//! Middleware dispatch subsystem.
//!
//! # Data Flow
//! ```text
//! engine adapter (matched route, raw request/response, abort signal)
//!     → Request / Response facades
//!     → chain.rs (cursor over the route's middlewares)
//!     → handler.rs (uniform call shape for every middleware)
//!     → response finished exactly once
//! ```
//!
//! Unmatched requests run the [`not_found`] chain.

pub mod chain;
pub mod handler;
pub mod not_found;

pub use chain::{dispatch, Next};
pub use handler::{
    sync, BoxFuture, BoxMiddleware, HandlerResult, IntoHandlerResult, IntoMiddleware,
    IsMiddleware, Middleware, SyncFn,
};
pub use not_found::not_found;
