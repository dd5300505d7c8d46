//! Middleware dispatch layer for HTTP and WebSocket servers.
//!
//! Routes bind ordered chains of middlewares. Every matched request gets a
//! [`Request`] and a [`Response`] facade, the chain runs against them, and the
//! response is finished exactly once whether handlers return, fail, panic or
//! the peer disconnects.
//!
//! ```no_run
//! use froovo::{Request, Response, Server, ServerConfig};
//!
//! # async fn run() -> Result<(), froovo::ServerError> {
//! let mut server = Server::new(ServerConfig::default());
//! server.get("/hello/:name", |req: Request, res: Response| async move {
//!     let name = req.param(0).unwrap_or("world").to_string();
//!     res.end(format!("Hello {name}"))?;
//!     Ok::<_, froovo::BoxError>(())
//! });
//! let running = server.listen(3000).await?;
//! running.wait().await
//! # }
//! ```

// Core
pub mod dispatch;
pub mod engine;
pub mod http;
pub mod routing;

// Setup and serving
pub mod config;
pub mod lifecycle;
pub mod net;

// Cross-cutting concerns
pub mod error;
pub mod observability;

pub use config::ServerConfig;
pub use dispatch::{not_found, sync, IntoMiddleware, Middleware, Next};
pub use error::{BoxError, ResponseError, ServerError};
pub use http::{
    Body, FileOptions, Message, Request, Response, RunningServer, Server, Socket,
    WebSocketBehavior,
};
pub use lifecycle::Shutdown;
pub use routing::{Route, RouteMethod};
