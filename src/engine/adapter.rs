//! Engine implementation over axum.
//!
//! # Responsibilities
//! - Build the immutable axum route table from registered chains
//! - Expose each matched request through [`RawRequest`]
//! - Stage status and headers, then deliver the head either with a fixed
//!   body (`end` without writes) or as a chunked stream (first `write`)
//! - Turn peer disconnects into the request's abort signal
//!
//! # Request Flow
//! ```text
//! axum handler future (holds AbortGuard)
//!     → spawn dispatch task (Request, Response, AbortSignal)
//!     → await response head from EngineResponse
//!     → disarm guard, return head to hyper
//! peer gone before head      → handler future dropped → guard aborts
//! peer gone while streaming  → chunk send fails       → abort
//! ```
//!
//! # Design Decisions
//! - The chain runs in its own task: a disconnect never cancels handler code
//! - Within one path, specific methods win and `any` is the method fallback;
//!   with no `any`, unmatched methods get the 404 chain instead of a 405

use std::collections::BTreeMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use axum::body::{Body, Bytes};
use axum::extract::{ConnectInfo, FromRequestParts, RawPathParams, Request as AxumRequest};
use axum::http::{request::Parts, HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response as AxumResponse};
use axum::routing::{MethodFilter, MethodRouter};
use axum::Router;
use futures_util::stream::{self, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tower::limit::GlobalConcurrencyLimitLayer;
use tower::ServiceBuilder;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;

use super::{abort_pair, AbortGuard, AbortHandle, BodyStream, RawRequest, RawResponse};
use crate::config::ServerConfig;
use crate::dispatch::{dispatch, not_found, BoxMiddleware};
use crate::error::{BoxError, ServerError};
use crate::http::websocket::{self, PubSub, WebSocketBehavior};
use crate::http::{Request, Response};
use crate::routing::path::{self, WILDCARD_CAPTURE};
use crate::routing::RouteMethod;

/// Inbound request as seen by the facades.
#[derive(Debug)]
pub struct EngineRequest {
    parts: Parts,
    params: Vec<(String, String)>,
}

impl EngineRequest {
    async fn from_parts(mut parts: Parts) -> Self {
        let params = match RawPathParams::from_request_parts(&mut parts, &()).await {
            Ok(raw) => raw
                .iter()
                .filter(|(name, _)| *name != WILDCARD_CAPTURE)
                .map(|(name, value)| (name.to_string(), value.to_string()))
                .collect(),
            Err(_) => Vec::new(),
        };
        Self { parts, params }
    }
}

impl RawRequest for EngineRequest {
    fn url(&self) -> &str {
        self.parts.uri.path()
    }

    fn method(&self) -> &str {
        self.parts.method.as_str()
    }

    fn query(&self) -> Option<&str> {
        self.parts.uri.query()
    }

    fn for_each_header(&self, f: &mut dyn FnMut(&str, &str)) {
        for (name, value) in &self.parts.headers {
            f(name.as_str(), &String::from_utf8_lossy(value.as_bytes()));
        }
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.parts.headers.get(name).and_then(|v| v.to_str().ok())
    }

    fn parameter(&self, index: usize) -> Option<&str> {
        self.params.get(index).map(|(_, value)| value.as_str())
    }

    fn parameter_name(&self, index: usize) -> Option<&str> {
        self.params.get(index).map(|(name, _)| name.as_str())
    }
}

enum Delivery {
    /// Head not sent yet; status and headers still mutable.
    Pending(oneshot::Sender<AxumResponse>),
    /// Head sent with a chunked body fed from this channel.
    Streaming(mpsc::UnboundedSender<Bytes>),
    Done,
}

/// Outbound handle feeding hyper.
pub struct EngineResponse {
    status: StatusCode,
    headers: HeaderMap,
    delivery: Delivery,
    abort: AbortHandle,
    remote_address: String,
}

impl EngineResponse {
    fn new(head: oneshot::Sender<AxumResponse>, abort: AbortHandle, remote_address: String) -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            delivery: Delivery::Pending(head),
            abort,
            remote_address,
        }
    }

    fn head(&mut self, body: Body) -> AxumResponse {
        let mut response = AxumResponse::new(body);
        *response.status_mut() = self.status;
        *response.headers_mut() = std::mem::take(&mut self.headers);
        response
    }

    fn peer_gone(&mut self) {
        self.delivery = Delivery::Done;
        self.abort.abort();
    }

    fn start_streaming(&mut self) -> bool {
        let head = match std::mem::replace(&mut self.delivery, Delivery::Done) {
            Delivery::Pending(head) => head,
            other => {
                self.delivery = other;
                return matches!(self.delivery, Delivery::Streaming(_));
            }
        };

        let (tx, rx) = mpsc::unbounded_channel::<Bytes>();
        let chunks = stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|chunk| (Ok::<_, Infallible>(chunk), rx))
        });
        let response = self.head(Body::from_stream(chunks));
        if head.send(response).is_err() {
            self.peer_gone();
            return false;
        }
        self.delivery = Delivery::Streaming(tx);
        true
    }
}

impl RawResponse for EngineResponse {
    fn write_status(&mut self, status: u16) {
        if !matches!(self.delivery, Delivery::Pending(_)) {
            tracing::debug!(status, "Status change after head was sent ignored");
            return;
        }
        match StatusCode::from_u16(status) {
            Ok(code) => self.status = code,
            Err(_) => tracing::warn!(status, "Invalid status code ignored"),
        }
    }

    fn write_header(&mut self, name: &str, value: &str) {
        if !matches!(self.delivery, Delivery::Pending(_)) {
            tracing::debug!(header = name, "Header change after head was sent ignored");
            return;
        }
        let Ok(name) = HeaderName::from_bytes(name.as_bytes()) else {
            tracing::warn!(header = name, "Invalid header name ignored");
            return;
        };
        if value.is_empty() {
            self.headers.remove(&name);
            return;
        }
        match HeaderValue::from_str(value) {
            Ok(value) => {
                self.headers.insert(name, value);
            }
            Err(_) => tracing::warn!(header = %name, "Invalid header value ignored"),
        }
    }

    fn write(&mut self, chunk: Bytes) -> bool {
        if matches!(self.delivery, Delivery::Pending(_)) && !self.start_streaming() {
            return false;
        }
        let sent = match &self.delivery {
            Delivery::Streaming(tx) => tx.send(chunk).is_ok(),
            _ => return false,
        };
        if !sent {
            self.peer_gone();
        }
        sent
    }

    fn end(&mut self, chunk: Bytes) -> bool {
        let delivered = match std::mem::replace(&mut self.delivery, Delivery::Done) {
            Delivery::Pending(head) => {
                let response = self.head(Body::from(chunk));
                head.send(response).is_ok()
            }
            // Dropping the sender ends the chunked body.
            Delivery::Streaming(tx) => chunk.is_empty() || tx.send(chunk).is_ok(),
            Delivery::Done => return false,
        };
        if !delivered {
            self.abort.abort();
        }
        delivered
    }

    fn remote_address(&self) -> String {
        self.remote_address.clone()
    }
}

fn remote_address(parts: &Parts) -> String {
    parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_default()
}

/// axum handler body for every HTTP chain, including the 404 fallback.
async fn serve_chain(chain: Arc<[BoxMiddleware]>, request: AxumRequest) -> AxumResponse {
    let (parts, body) = request.into_parts();
    let remote = remote_address(&parts);
    let raw_request = EngineRequest::from_parts(parts).await;
    let body: BodyStream = body
        .into_data_stream()
        .map(|chunk| chunk.map_err(|e| Box::new(e) as BoxError))
        .boxed();

    let (handle, signal) = abort_pair();
    let (head_tx, head_rx) = oneshot::channel();
    let raw_response = EngineResponse::new(head_tx, handle.clone(), remote);
    let request = Request::from_raw(&raw_request, body, raw_response.remote_address());
    let response = Response::new(raw_response, signal.clone());

    let mut guard = AbortGuard::new(handle);
    tokio::spawn(dispatch(chain, request, response, signal));

    let head = head_rx.await;
    guard.disarm();
    match head {
        Ok(head) => head,
        Err(_) => {
            tracing::error!("Dispatch finished without delivering a response");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[derive(Clone)]
enum Endpoint {
    Chain(Arc<[BoxMiddleware]>),
    Socket(Arc<dyn WebSocketBehavior>),
}

/// Route table under construction. Frozen into an axum [`Router`] at listen.
#[derive(Default)]
pub struct RouteTable {
    paths: BTreeMap<String, BTreeMap<RouteMethod, Endpoint>>,
    /// Bare prefixes of trailing-wildcard routes; bound only where free.
    implicit: Vec<(String, RouteMethod, Endpoint)>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_chain(
        &mut self,
        method: RouteMethod,
        path: &str,
        middlewares: Vec<BoxMiddleware>,
    ) -> Result<(), ServerError> {
        self.insert(method, path, Endpoint::Chain(middlewares.into()))
    }

    /// Websocket upgrades are bound to GET.
    pub fn insert_ws(
        &mut self,
        path: &str,
        behavior: Arc<dyn WebSocketBehavior>,
    ) -> Result<(), ServerError> {
        self.insert(RouteMethod::Get, path, Endpoint::Socket(behavior))
    }

    pub fn len(&self) -> usize {
        self.paths.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    fn insert(&mut self, method: RouteMethod, path: &str, endpoint: Endpoint) -> Result<(), ServerError> {
        let compiled = path::compile(path)?;
        let slots = self.paths.entry(compiled.pattern).or_default();
        if slots.contains_key(&method) {
            tracing::warn!(%method, path, "Duplicate route ignored; first registration wins");
            return Ok(());
        }
        slots.insert(method, endpoint.clone());
        if let Some(prefix) = compiled.prefix {
            self.implicit.push((prefix, method, endpoint));
        }
        tracing::debug!(%method, path, "Route registered");
        Ok(())
    }

    /// Build the axum router, with `hub` shared by every websocket route.
    pub fn into_router(mut self, hub: PubSub, config: &ServerConfig) -> Result<Router, ServerError> {
        for (prefix, method, endpoint) in std::mem::take(&mut self.implicit) {
            self.paths
                .entry(prefix)
                .or_default()
                .entry(method)
                .or_insert(endpoint);
        }

        let fallback: Arc<[BoxMiddleware]> = Arc::from(vec![not_found()]);
        let mut router = Router::new();

        for (pattern, slots) in self.paths {
            let method_router = method_router(slots, &hub, &fallback);
            // axum panics on patterns its matcher cannot hold alongside earlier ones.
            let attempt = std::panic::catch_unwind(AssertUnwindSafe(|| {
                router.clone().route(&pattern, method_router)
            }));
            router = attempt.map_err(|_| ServerError::InvalidRoute {
                path: pattern.clone(),
                reason: "conflicts with a previously registered route",
            })?;
        }

        let fallback_router = router.fallback(move |request: AxumRequest| {
            serve_chain(Arc::clone(&fallback), request)
        });

        // Router::layer wraps every route separately; the global limit shares one semaphore.
        Ok(fallback_router.layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(GlobalConcurrencyLimitLayer::new(
                    config.listener.max_concurrent_requests,
                ))
                .layer(RequestBodyLimitLayer::new(config.limits.max_body_size)),
        ))
    }
}

fn method_filter(method: RouteMethod) -> Option<MethodFilter> {
    match method {
        RouteMethod::Get => Some(MethodFilter::GET),
        RouteMethod::Post => Some(MethodFilter::POST),
        RouteMethod::Put => Some(MethodFilter::PUT),
        RouteMethod::Delete => Some(MethodFilter::DELETE),
        RouteMethod::Patch => Some(MethodFilter::PATCH),
        RouteMethod::Options => Some(MethodFilter::OPTIONS),
        RouteMethod::Any => None,
    }
}

fn method_router(
    slots: BTreeMap<RouteMethod, Endpoint>,
    hub: &PubSub,
    not_found_chain: &Arc<[BoxMiddleware]>,
) -> MethodRouter {
    let mut router = MethodRouter::new();
    let mut method_fallback = Arc::clone(not_found_chain);

    for (method, endpoint) in slots {
        match (method_filter(method), endpoint) {
            (Some(filter), Endpoint::Chain(chain)) => {
                router = router.on(filter, move |request: AxumRequest| {
                    serve_chain(Arc::clone(&chain), request)
                });
            }
            (Some(filter), Endpoint::Socket(behavior)) => {
                let hub = hub.clone();
                router = router.on(filter, move |request: AxumRequest| {
                    websocket::upgrade(Arc::clone(&behavior), hub.clone(), request)
                });
            }
            (None, Endpoint::Chain(chain)) => method_fallback = chain,
            (None, Endpoint::Socket(_)) => {
                tracing::warn!("Websocket route without a method ignored");
            }
        }
    }

    router.fallback(move |request: AxumRequest| serve_chain(Arc::clone(&method_fallback), request))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::IntoMiddleware;

    fn noop() -> Vec<BoxMiddleware> {
        vec![(|| async {}).into_middleware()]
    }

    #[test]
    fn duplicates_keep_first() {
        let mut table = RouteTable::new();
        table.insert_chain(RouteMethod::Get, "/a", noop()).unwrap();
        table.insert_chain(RouteMethod::Get, "/a", noop()).unwrap();
        table.insert_chain(RouteMethod::Post, "/a", noop()).unwrap();
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn invalid_patterns_fail_registration() {
        let mut table = RouteTable::new();
        let err = table.insert_chain(RouteMethod::Get, "nope", noop()).unwrap_err();
        assert!(matches!(err, ServerError::InvalidRoute { .. }));
        assert!(table.is_empty());
    }

    #[test]
    fn conflicting_patterns_fail_at_build() {
        let mut table = RouteTable::new();
        table.insert_chain(RouteMethod::Get, "/users/:id", noop()).unwrap();
        table.insert_chain(RouteMethod::Get, "/users/:name", noop()).unwrap();
        let err = table
            .into_router(PubSub::new(), &ServerConfig::default())
            .unwrap_err();
        assert!(matches!(err, ServerError::InvalidRoute { .. }));
    }

    #[test]
    fn engine_request_exposes_parts() {
        let request = axum::http::Request::builder()
            .method("POST")
            .uri("/items/7?sort=desc")
            .header("X-Trace", "abc")
            .body(())
            .unwrap();
        let (parts, ()) = request.into_parts();
        let raw = EngineRequest {
            parts,
            params: vec![("id".to_string(), "7".to_string())],
        };

        assert_eq!(raw.url(), "/items/7");
        assert_eq!(raw.method(), "POST");
        assert_eq!(raw.query(), Some("sort=desc"));
        assert_eq!(raw.header("x-trace"), Some("abc"));
        assert_eq!(raw.parameter(0), Some("7"));
        assert_eq!(raw.parameter_name(0), Some("id"));
        assert_eq!(raw.parameter(1), None);
    }

    #[tokio::test]
    async fn end_without_writes_sends_fixed_body() {
        let (handle, signal) = abort_pair();
        let (tx, rx) = oneshot::channel();
        let mut raw = EngineResponse::new(tx, handle, "10.0.0.1".to_string());
        raw.write_status(201);
        raw.write_header("X-A", "1");
        raw.write_header("X-B", "2");
        raw.write_header("X-B", "");
        assert!(raw.end(Bytes::from_static(b"done")));
        assert!(!raw.end(Bytes::new()));

        let head = rx.await.unwrap();
        assert_eq!(head.status(), StatusCode::CREATED);
        assert_eq!(head.headers()["x-a"], "1");
        assert!(head.headers().get("x-b").is_none());
        let body = axum::body::to_bytes(head.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"done");
        assert!(!signal.is_aborted());
    }

    #[tokio::test]
    async fn first_write_switches_to_streaming() {
        let (handle, _signal) = abort_pair();
        let (tx, rx) = oneshot::channel();
        let mut raw = EngineResponse::new(tx, handle, String::new());
        raw.write_header("Content-Type", "text/plain");
        assert!(raw.write(Bytes::from_static(b"a")));
        raw.write_header("X-Late", "1");
        assert!(raw.write(Bytes::from_static(b"b")));
        assert!(raw.end(Bytes::from_static(b"c")));

        let head = rx.await.unwrap();
        assert_eq!(head.headers()["content-type"], "text/plain");
        assert!(head.headers().get("x-late").is_none());
        let body = axum::body::to_bytes(head.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&body[..], b"abc");
    }

    #[tokio::test]
    async fn dropped_receiver_raises_abort() {
        let (handle, signal) = abort_pair();
        let (tx, rx) = oneshot::channel();
        drop(rx);
        let mut raw = EngineResponse::new(tx, handle, String::new());
        assert!(!raw.write(Bytes::from_static(b"x")));
        assert!(signal.is_aborted());
        assert!(!raw.end(Bytes::new()));
    }

    #[tokio::test]
    async fn dropped_guard_ends_the_response_facade() {
        let (handle, signal) = abort_pair();
        let (tx, _rx) = oneshot::channel();
        let guard = AbortGuard::new(handle.clone());
        let response = Response::new(EngineResponse::new(tx, handle, String::new()), signal);
        assert!(!response.is_ended());
        drop(guard);
        assert!(response.is_ended());
        assert!(!response.end("late").unwrap());
    }
}
