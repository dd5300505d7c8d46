//! Server setup and lifecycle.
//!
//! # Responsibilities
//! - Collect route registrations (convenience methods and descriptors)
//! - Validate the listen port before anything binds
//! - Select plain HTTP or TLS from the config
//! - Serve until closed, draining in-flight requests
//!
//! # Design Decisions
//! - `listen` consumes the server: the route table is immutable once serving
//! - Registration errors are kept and reported by `listen`, so chained
//!   registration stays infallible
//! - The pub/sub hub is shared by the server before and after listen

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::config::{PortSetting, ServerConfig};
use crate::dispatch::{BoxMiddleware, IntoMiddleware};
use crate::engine::adapter::RouteTable;
use crate::error::ServerError;
use crate::http::websocket::{Message, PubSub, WebSocketBehavior};
use crate::lifecycle::Shutdown;
use crate::net;
use crate::routing::{Route, RouteMethod};

/// Grace period for TLS connections once shutdown is triggered.
const TLS_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Anything accepted as a listen port.
pub trait IntoPort {
    fn into_port(self) -> Result<u16, ServerError>;
}

macro_rules! impl_into_port_for_int {
    ($($ty:ty),*) => {
        $(
            impl IntoPort for $ty {
                fn into_port(self) -> Result<u16, ServerError> {
                    u16::try_from(self).map_err(|_| ServerError::InvalidPort(self.to_string()))
                }
            }
        )*
    };
}

impl_into_port_for_int!(u16, u32, i32, i64, usize);

impl IntoPort for &str {
    fn into_port(self) -> Result<u16, ServerError> {
        self.trim()
            .parse()
            .map_err(|_| ServerError::InvalidPort(self.to_string()))
    }
}

impl IntoPort for String {
    fn into_port(self) -> Result<u16, ServerError> {
        self.as_str().into_port()
    }
}

impl IntoPort for PortSetting {
    fn into_port(self) -> Result<u16, ServerError> {
        match self {
            PortSetting::Number(n) => n.into_port(),
            PortSetting::Text(s) => s.into_port(),
        }
    }
}

/// A server under construction.
pub struct Server {
    config: ServerConfig,
    routes: RouteTable,
    hub: PubSub,
    errors: Vec<ServerError>,
}

impl Server {
    pub fn new(config: ServerConfig) -> Self {
        Self {
            config,
            routes: RouteTable::new(),
            hub: PubSub::new(),
            errors: Vec::new(),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn get<M>(&mut self, path: &str, handler: impl IntoMiddleware<M>) -> &mut Self {
        self.chain(RouteMethod::Get, path, vec![handler.into_middleware()])
    }

    pub fn post<M>(&mut self, path: &str, handler: impl IntoMiddleware<M>) -> &mut Self {
        self.chain(RouteMethod::Post, path, vec![handler.into_middleware()])
    }

    pub fn put<M>(&mut self, path: &str, handler: impl IntoMiddleware<M>) -> &mut Self {
        self.chain(RouteMethod::Put, path, vec![handler.into_middleware()])
    }

    pub fn delete<M>(&mut self, path: &str, handler: impl IntoMiddleware<M>) -> &mut Self {
        self.chain(RouteMethod::Delete, path, vec![handler.into_middleware()])
    }

    pub fn patch<M>(&mut self, path: &str, handler: impl IntoMiddleware<M>) -> &mut Self {
        self.chain(RouteMethod::Patch, path, vec![handler.into_middleware()])
    }

    pub fn options<M>(&mut self, path: &str, handler: impl IntoMiddleware<M>) -> &mut Self {
        self.chain(RouteMethod::Options, path, vec![handler.into_middleware()])
    }

    pub fn any<M>(&mut self, path: &str, handler: impl IntoMiddleware<M>) -> &mut Self {
        self.chain(RouteMethod::Any, path, vec![handler.into_middleware()])
    }

    pub fn ws(&mut self, path: &str, behavior: impl WebSocketBehavior) -> &mut Self {
        self.socket(path, Arc::new(behavior))
    }

    /// Register descriptors. Each one is bound independently.
    pub fn route<I>(&mut self, routes: I) -> &mut Self
    where
        I: IntoIterator,
        I::Item: Into<Route>,
    {
        for route in routes {
            match route.into() {
                Route::Http(route) => {
                    self.chain(route.method, &route.path, route.middlewares);
                }
                Route::Ws(route) => {
                    self.socket(&route.path, route.behavior);
                }
            }
        }
        self
    }

    /// Publish to every websocket subscribed to `topic`.
    pub fn publish(&self, topic: &str, message: impl Into<Message>) -> bool {
        self.hub.publish(topic, message)
    }

    pub fn num_subscribers(&self, topic: &str) -> usize {
        self.hub.num_subscribers(topic)
    }

    fn chain(&mut self, method: RouteMethod, path: &str, middlewares: Vec<BoxMiddleware>) -> &mut Self {
        if let Err(e) = self.routes.insert_chain(method, path, middlewares) {
            tracing::error!(%method, path, error = %e, "Route rejected");
            self.errors.push(e);
        }
        self
    }

    fn socket(&mut self, path: &str, behavior: Arc<dyn WebSocketBehavior>) -> &mut Self {
        if let Err(e) = self.routes.insert_ws(path, behavior) {
            tracing::error!(path, error = %e, "WebSocket route rejected");
            self.errors.push(e);
        }
        self
    }

    /// Listen on the configured port.
    pub async fn listen_default(self) -> Result<RunningServer, ServerError> {
        let port = self.config.listener.port.clone();
        self.listen(port).await
    }

    /// Bind and start serving.
    ///
    /// Fails before binding on an invalid port, a rejected route, or
    /// unreadable TLS material.
    pub async fn listen(self, port: impl IntoPort) -> Result<RunningServer, ServerError> {
        let port = port.into_port()?;
        if let Some(e) = self.errors.into_iter().next() {
            return Err(e);
        }

        let tls = net::tls::load_tls_config(&self.config.tls).await?;
        let route_count = self.routes.len();
        let router = self.routes.into_router(self.hub.clone(), &self.config)?;
        let listener = net::listener::bind(&self.config.listener.host, port).await?;
        let local_addr = listener.local_addr()?;
        let app = router.into_make_service_with_connect_info::<SocketAddr>();
        let shutdown = Shutdown::new();
        let drained = shutdown.signalled();

        let task = match tls {
            None => {
                tracing::info!(address = %local_addr, routes = route_count, "HTTP server starting");
                tokio::spawn(async move {
                    axum::serve(listener, app)
                        .with_graceful_shutdown(drained)
                        .await
                })
            }
            Some(rustls) => {
                tracing::info!(address = %local_addr, routes = route_count, "HTTPS server starting");
                let handle = axum_server::Handle::new();
                let trigger = handle.clone();
                tokio::spawn(async move {
                    drained.await;
                    trigger.graceful_shutdown(Some(TLS_DRAIN_TIMEOUT));
                });
                let listener = net::listener::into_std(listener)?;
                tokio::spawn(async move {
                    axum_server::from_tcp_rustls(listener, rustls)
                        .handle(handle)
                        .serve(app)
                        .await
                })
            }
        };

        Ok(RunningServer {
            local_addr,
            hub: self.hub,
            shutdown,
            task,
        })
    }
}

impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("routes", &self.routes.len())
            .field("hub", &self.hub)
            .finish()
    }
}

/// A bound, serving server.
#[derive(Debug)]
pub struct RunningServer {
    local_addr: SocketAddr,
    hub: PubSub,
    shutdown: Shutdown,
    task: JoinHandle<io::Result<()>>,
}

impl RunningServer {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn publish(&self, topic: &str, message: impl Into<Message>) -> bool {
        self.hub.publish(topic, message)
    }

    pub fn num_subscribers(&self, topic: &str) -> usize {
        self.hub.num_subscribers(topic)
    }

    /// Trigger that stops this server; hand it to signal listeners.
    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Stop accepting, drain in-flight requests, and wait for the listener.
    pub async fn close(self) -> Result<(), ServerError> {
        self.shutdown.trigger();
        self.wait().await
    }

    /// Wait until the server stops.
    pub async fn wait(self) -> Result<(), ServerError> {
        let result = match self.task.await {
            Ok(result) => result.map_err(ServerError::Serve),
            Err(e) => Err(ServerError::Serve(io::Error::other(e))),
        };
        tracing::info!(address = %self.local_addr, "Server stopped");
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ports_from_numbers_and_strings() {
        assert_eq!(8080u16.into_port().unwrap(), 8080);
        assert_eq!(3000i32.into_port().unwrap(), 3000);
        assert_eq!("9001".into_port().unwrap(), 9001);
        assert_eq!(String::from(" 80 ").into_port().unwrap(), 80);
        assert_eq!(PortSetting::Text("81".to_string()).into_port().unwrap(), 81);
    }

    #[test]
    fn non_numeric_ports_are_rejected() {
        assert!(matches!("http".into_port(), Err(ServerError::InvalidPort(p)) if p == "http"));
        assert!(matches!(70_000i64.into_port(), Err(ServerError::InvalidPort(_))));
        assert!(matches!((-1i32).into_port(), Err(ServerError::InvalidPort(_))));
    }

    #[tokio::test]
    async fn invalid_port_fails_before_binding() {
        let err = Server::new(ServerConfig::default())
            .listen("not-a-port")
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::InvalidPort(_)));
    }

    #[tokio::test]
    async fn rejected_route_is_reported_by_listen() {
        let mut server = Server::new(ServerConfig::default());
        server.get("no-slash", || async {});
        let err = server.listen(0).await.unwrap_err();
        assert!(matches!(err, ServerError::InvalidRoute { .. }));
    }

    #[test]
    fn publish_before_listen_reaches_nobody() {
        let server = Server::new(ServerConfig::default());
        assert!(!server.publish("news", "hello"));
        assert_eq!(server.num_subscribers("news"), 0);
    }
}
