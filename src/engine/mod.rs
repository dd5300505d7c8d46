//! Socket engine seam.
//!
//! # Data Flow
//! ```text
//! engine accepts connection, matches route
//!     → RawRequest + RawResponse + BodyStream + AbortSignal
//!     → dispatch (facades, middleware chain)
//!     → RawResponse::write / RawResponse::end
//! ```
//!
//! The facades only ever talk to the engine through the traits below, so the
//! dispatch core can run on top of the axum adapter in [`adapter`] or the
//! recording engine in [`mock`].

pub mod abort;
pub mod adapter;
pub mod mock;

use axum::body::Bytes;
use futures_util::stream::BoxStream;

use crate::error::BoxError;

pub use abort::{abort_pair, AbortGuard, AbortHandle, AbortSignal};

/// Request body as delivered by the engine, in arrival order.
///
/// The end of the stream is the "last chunk" signal. The stream is consumed
/// destructively and cannot be replayed.
pub type BodyStream = BoxStream<'static, Result<Bytes, BoxError>>;

/// Read accessors over the engine's inbound request handle.
pub trait RawRequest {
    /// Request path, without the query string.
    fn url(&self) -> &str;

    /// Method as sent by the client.
    fn method(&self) -> &str;

    /// Raw query string (no leading `?`), if any.
    fn query(&self) -> Option<&str>;

    /// Visit every header once, in the order the engine exposes them.
    fn for_each_header(&self, f: &mut dyn FnMut(&str, &str));

    /// Look up a single header by name.
    fn header(&self, name: &str) -> Option<&str>;

    /// Positional route parameter, in match order.
    fn parameter(&self, index: usize) -> Option<&str>;

    /// Name of the positional route parameter, when the engine knows it.
    fn parameter_name(&self, _index: usize) -> Option<&str> {
        None
    }
}

/// Write primitives over the engine's outbound response handle.
pub trait RawResponse: Send + 'static {
    /// Stage the status line.
    fn write_status(&mut self, status: u16);

    /// Stage a header. An empty value clears the header.
    fn write_header(&mut self, name: &str, value: &str);

    /// Stream a body chunk without finishing the response.
    fn write(&mut self, chunk: Bytes) -> bool;

    /// Write the final chunk and finish the response.
    fn end(&mut self, chunk: Bytes) -> bool;

    /// Peer address as text.
    fn remote_address(&self) -> String;
}
