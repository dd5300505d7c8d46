//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! engine (matched route, raw handles)
//!     → request.rs (eager snapshot, lazy body via body.rs)
//!     → [dispatch chain runs the route's middlewares]
//!     → response.rs (staged status/headers, single terminal write)
//!     → engine writes to the socket
//!
//! server.rs owns setup and serving; websocket.rs owns upgraded sockets.
//! ```

pub mod body;
pub mod mime;
pub mod request;
pub mod response;
pub mod server;
pub mod websocket;

pub use body::{Body, Fields};
pub use request::Request;
pub use response::{FileOptions, Response, ResponseState};
pub use server::{IntoPort, RunningServer, Server};
pub use websocket::{Message, PubSub, Socket, SocketId, WebSocketBehavior};
