//! Route descriptors.
//!
//! A descriptor is plain data handed to [`Server::route`](crate::Server::route):
//! `{method, path, middlewares}` for HTTP or `{ws, path, behavior}` for
//! websockets. It is consumed once at registration and not retained.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::dispatch::{BoxMiddleware, IntoMiddleware};
use crate::http::websocket::WebSocketBehavior;

/// HTTP method a chain is bound to. `Any` matches every method without a
/// more specific binding on the same path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RouteMethod {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Options,
    Any,
}

impl RouteMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteMethod::Get => "get",
            RouteMethod::Post => "post",
            RouteMethod::Put => "put",
            RouteMethod::Delete => "delete",
            RouteMethod::Patch => "patch",
            RouteMethod::Options => "options",
            RouteMethod::Any => "any",
        }
    }
}

impl fmt::Display for RouteMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Returned when a method name is not one of the routable methods.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown route method `{0}`")]
pub struct UnknownMethod(pub String);

impl FromStr for RouteMethod {
    type Err = UnknownMethod;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "get" => Ok(RouteMethod::Get),
            "post" => Ok(RouteMethod::Post),
            "put" => Ok(RouteMethod::Put),
            "delete" | "del" => Ok(RouteMethod::Delete),
            "patch" => Ok(RouteMethod::Patch),
            "options" => Ok(RouteMethod::Options),
            "any" => Ok(RouteMethod::Any),
            _ => Err(UnknownMethod(s.to_string())),
        }
    }
}

/// `{method, path, middlewares}`.
pub struct HttpRoute {
    pub method: RouteMethod,
    pub path: String,
    pub middlewares: Vec<BoxMiddleware>,
}

impl HttpRoute {
    pub fn new(method: RouteMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            middlewares: Vec::new(),
        }
    }

    /// Append a middleware to the chain.
    pub fn handler<M>(mut self, middleware: impl IntoMiddleware<M>) -> Self {
        self.middlewares.push(middleware.into_middleware());
        self
    }
}

impl fmt::Debug for HttpRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpRoute")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("middlewares", &self.middlewares.len())
            .finish()
    }
}

/// `{ws, path, behavior}`.
pub struct WsRoute {
    pub path: String,
    pub behavior: Arc<dyn WebSocketBehavior>,
}

impl fmt::Debug for WsRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WsRoute").field("path", &self.path).finish()
    }
}

/// Any route descriptor.
#[derive(Debug)]
pub enum Route {
    Http(HttpRoute),
    Ws(WsRoute),
}

impl Route {
    pub fn get(path: impl Into<String>) -> HttpRoute {
        HttpRoute::new(RouteMethod::Get, path)
    }

    pub fn post(path: impl Into<String>) -> HttpRoute {
        HttpRoute::new(RouteMethod::Post, path)
    }

    pub fn put(path: impl Into<String>) -> HttpRoute {
        HttpRoute::new(RouteMethod::Put, path)
    }

    pub fn delete(path: impl Into<String>) -> HttpRoute {
        HttpRoute::new(RouteMethod::Delete, path)
    }

    pub fn patch(path: impl Into<String>) -> HttpRoute {
        HttpRoute::new(RouteMethod::Patch, path)
    }

    pub fn options(path: impl Into<String>) -> HttpRoute {
        HttpRoute::new(RouteMethod::Options, path)
    }

    pub fn any(path: impl Into<String>) -> HttpRoute {
        HttpRoute::new(RouteMethod::Any, path)
    }

    pub fn ws(path: impl Into<String>, behavior: impl WebSocketBehavior) -> Route {
        Route::Ws(WsRoute {
            path: path.into(),
            behavior: Arc::new(behavior),
        })
    }

    pub fn path(&self) -> &str {
        match self {
            Route::Http(route) => &route.path,
            Route::Ws(route) => &route.path,
        }
    }
}

impl From<HttpRoute> for Route {
    fn from(route: HttpRoute) -> Self {
        Route::Http(route)
    }
}

impl From<WsRoute> for Route {
    fn from(route: WsRoute) -> Self {
        Route::Ws(route)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::Request;

    struct Silent;
    impl WebSocketBehavior for Silent {}

    #[test]
    fn method_names_round_trip() {
        for method in [
            RouteMethod::Get,
            RouteMethod::Post,
            RouteMethod::Put,
            RouteMethod::Delete,
            RouteMethod::Patch,
            RouteMethod::Options,
            RouteMethod::Any,
        ] {
            assert_eq!(method.as_str().parse::<RouteMethod>(), Ok(method));
        }
        assert_eq!("DEL".parse::<RouteMethod>(), Ok(RouteMethod::Delete));
        assert!("trace".parse::<RouteMethod>().is_err());
    }

    #[test]
    fn builder_collects_middlewares_in_order() {
        let route = Route::post("/users")
            .handler(|| async {})
            .handler(|_req: Request| async {});
        assert_eq!(route.method, RouteMethod::Post);
        assert_eq!(route.middlewares.len(), 2);
    }

    #[test]
    fn mixed_descriptor_lists() {
        let routes: Vec<Route> = vec![
            Route::get("/").handler(|| async {}).into(),
            Route::ws("/ws", Silent),
        ];
        assert_eq!(routes[0].path(), "/");
        assert!(matches!(routes[1], Route::Ws(_)));
    }
}
