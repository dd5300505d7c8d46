//! WebSocket sessions and topic pub/sub.
//!
//! # Responsibilities
//! - Complete the upgrade handshake for `ws` routes
//! - Drive one session per socket, calling the route's [`WebSocketBehavior`]
//! - Fan published messages out to subscribed sockets
//!
//! # Data Flow
//! ```text
//! client frames → session reader → behavior.message(&socket, msg)
//! socket.send_* / hub.publish → outbound channel → session writer → client
//! ```
//!
//! # Design Decisions
//! - Behaviors are synchronous: every socket operation is a channel send
//! - One outbound channel per socket; the hub stores a sender per subscription
//! - Ping/pong handled transparently by the engine
//! - A socket never receives its own publications

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use axum::body::Bytes;
use axum::extract::ws::{self, CloseFrame, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, FromRequestParts};
use axum::response::{IntoResponse, Response as AxumResponse};
use dashmap::DashMap;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

/// Unique identifier for a websocket session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SocketId(u64);

impl SocketId {
    fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SocketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ws-{}", self.0)
    }
}

/// Application-level websocket message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Text(String),
    Binary(Bytes),
}

impl From<&str> for Message {
    fn from(text: &str) -> Self {
        Message::Text(text.to_string())
    }
}

impl From<String> for Message {
    fn from(text: String) -> Self {
        Message::Text(text)
    }
}

impl From<Bytes> for Message {
    fn from(data: Bytes) -> Self {
        Message::Binary(data)
    }
}

impl From<Message> for ws::Message {
    fn from(message: Message) -> Self {
        match message {
            Message::Text(text) => ws::Message::Text(text.into()),
            Message::Binary(data) => ws::Message::Binary(data),
        }
    }
}

#[derive(Debug)]
enum Outbound {
    Frame(Message),
    Close(u16, String),
}

/// Per-route websocket callbacks. Every hook defaults to a no-op.
pub trait WebSocketBehavior: Send + Sync + 'static {
    fn open(&self, _socket: &Socket) {}

    fn message(&self, _socket: &Socket, _message: Message) {}

    /// Called once, after the session ended and all subscriptions were dropped.
    fn close(&self, _socket: &Socket, _code: u16, _reason: &str) {}
}

/// Topic registry shared by every socket of a server.
#[derive(Clone, Default)]
pub struct PubSub {
    topics: Arc<DashMap<String, HashMap<SocketId, mpsc::UnboundedSender<Outbound>>>>,
}

impl PubSub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Send to every subscriber of `topic`. Returns whether anyone received it.
    pub fn publish(&self, topic: &str, message: impl Into<Message>) -> bool {
        self.publish_from(None, topic, message.into())
    }

    pub fn num_subscribers(&self, topic: &str) -> usize {
        self.topics.get(topic).map(|subs| subs.len()).unwrap_or(0)
    }

    fn publish_from(&self, from: Option<SocketId>, topic: &str, message: Message) -> bool {
        let Some(subscribers) = self.topics.get(topic) else {
            return false;
        };
        let mut delivered = 0usize;
        for (id, tx) in subscribers.iter() {
            if Some(*id) == from {
                continue;
            }
            if tx.send(Outbound::Frame(message.clone())).is_ok() {
                delivered += 1;
            }
        }
        tracing::trace!(topic, delivered, "Published");
        delivered > 0
    }

    fn subscribe(&self, topic: &str, id: SocketId, tx: mpsc::UnboundedSender<Outbound>) -> bool {
        self.topics
            .entry(topic.to_string())
            .or_default()
            .insert(id, tx)
            .is_none()
    }

    fn unsubscribe(&self, topic: &str, id: SocketId) -> bool {
        let removed = self
            .topics
            .get_mut(topic)
            .map(|mut subs| subs.remove(&id).is_some())
            .unwrap_or(false);
        self.topics.remove_if(topic, |_, subs| subs.is_empty());
        removed
    }
}

impl fmt::Debug for PubSub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PubSub")
            .field("topics", &self.topics.len())
            .finish()
    }
}

/// Handle to one websocket session, passed to every behavior hook.
#[derive(Clone)]
pub struct Socket {
    id: SocketId,
    outbound: mpsc::UnboundedSender<Outbound>,
    hub: PubSub,
    topics: Arc<Mutex<HashSet<String>>>,
    remote_address: String,
}

impl Socket {
    fn new(hub: PubSub, outbound: mpsc::UnboundedSender<Outbound>, remote_address: String) -> Self {
        Self {
            id: SocketId::next(),
            outbound,
            hub,
            topics: Arc::default(),
            remote_address,
        }
    }

    pub fn id(&self) -> SocketId {
        self.id
    }

    pub fn remote_address(&self) -> &str {
        &self.remote_address
    }

    /// Queue a text frame. `false` once the session is gone.
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.send(Message::Text(text.into()))
    }

    pub fn send_binary(&self, data: impl Into<Bytes>) -> bool {
        self.send(Message::Binary(data.into()))
    }

    pub fn send(&self, message: Message) -> bool {
        self.outbound.send(Outbound::Frame(message)).is_ok()
    }

    /// Returns `false` if already subscribed.
    pub fn subscribe(&self, topic: &str) -> bool {
        self.topics().insert(topic.to_string());
        self.hub.subscribe(topic, self.id, self.outbound.clone())
    }

    pub fn unsubscribe(&self, topic: &str) -> bool {
        self.topics().remove(topic);
        self.hub.unsubscribe(topic, self.id)
    }

    pub fn is_subscribed(&self, topic: &str) -> bool {
        self.topics().contains(topic)
    }

    /// Publish to every other subscriber of `topic`.
    pub fn publish(&self, topic: &str, message: impl Into<Message>) -> bool {
        self.hub.publish_from(Some(self.id), topic, message.into())
    }

    /// Close the session with a normal close frame.
    pub fn end(&self, code: u16, reason: &str) {
        let _ = self.outbound.send(Outbound::Close(code, reason.to_string()));
    }

    fn topics(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.topics.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn unsubscribe_all(&self) {
        let topics: Vec<String> = self.topics().drain().collect();
        for topic in topics {
            self.hub.unsubscribe(&topic, self.id);
        }
    }
}

impl fmt::Debug for Socket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Socket")
            .field("id", &self.id)
            .field("remote_address", &self.remote_address)
            .finish()
    }
}

/// Engine entry point for a `ws` route.
pub(crate) async fn upgrade(
    behavior: Arc<dyn WebSocketBehavior>,
    hub: PubSub,
    request: axum::extract::Request,
) -> AxumResponse {
    let (mut parts, _body) = request.into_parts();
    let remote_address = parts
        .extensions
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_default();

    match WebSocketUpgrade::from_request_parts(&mut parts, &()).await {
        Ok(upgrade) => upgrade
            .on_upgrade(move |socket| session(socket, behavior, hub, remote_address))
            .into_response(),
        Err(rejection) => {
            tracing::debug!(uri = %parts.uri, error = %rejection, "Not a websocket upgrade");
            rejection.into_response()
        }
    }
}

async fn session(
    socket: WebSocket,
    behavior: Arc<dyn WebSocketBehavior>,
    hub: PubSub,
    remote_address: String,
) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<Outbound>();
    let handle = Socket::new(hub, tx, remote_address);
    tracing::debug!(socket = %handle.id(), remote = %handle.remote_address(), "WebSocket opened");

    let writer = tokio::spawn(async move {
        while let Some(outbound) = rx.recv().await {
            let (frame, closing) = match outbound {
                Outbound::Frame(message) => (ws::Message::from(message), false),
                Outbound::Close(code, reason) => (
                    ws::Message::Close(Some(CloseFrame {
                        code,
                        reason: reason.into(),
                    })),
                    true,
                ),
            };
            if sink.send(frame).await.is_err() || closing {
                break;
            }
        }
    });

    behavior.open(&handle);

    let (mut code, mut reason) = (1005u16, String::new());
    while let Some(frame) = stream.next().await {
        match frame {
            Ok(ws::Message::Text(text)) => {
                behavior.message(&handle, Message::Text(text.as_str().to_string()))
            }
            Ok(ws::Message::Binary(data)) => behavior.message(&handle, Message::Binary(data)),
            Ok(ws::Message::Close(frame)) => {
                if let Some(frame) = frame {
                    code = frame.code;
                    reason = frame.reason.as_str().to_string();
                }
                break;
            }
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(socket = %handle.id(), error = %e, "WebSocket read failed");
                code = 1006;
                break;
            }
        }
    }

    handle.unsubscribe_all();
    behavior.close(&handle, code, &reason);
    writer.abort();
    tracing::debug!(socket = %handle.id(), code, "WebSocket closed");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn socket(hub: &PubSub) -> (Socket, mpsc::UnboundedReceiver<Outbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Socket::new(hub.clone(), tx, "127.0.0.1".to_string()), rx)
    }

    fn next_text(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> Option<String> {
        match rx.try_recv().ok()? {
            Outbound::Frame(Message::Text(text)) => Some(text),
            _ => None,
        }
    }

    #[test]
    fn socket_ids_are_unique() {
        let hub = PubSub::new();
        let (a, _) = socket(&hub);
        let (b, _) = socket(&hub);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn publish_reaches_subscribers_only() {
        let hub = PubSub::new();
        let (a, mut rx_a) = socket(&hub);
        let (_b, mut rx_b) = socket(&hub);

        assert!(a.subscribe("news"));
        assert!(!a.subscribe("news"));
        assert_eq!(hub.num_subscribers("news"), 1);

        assert!(hub.publish("news", "hello"));
        assert_eq!(next_text(&mut rx_a).as_deref(), Some("hello"));
        assert!(next_text(&mut rx_b).is_none());
    }

    #[test]
    fn socket_publish_skips_sender() {
        let hub = PubSub::new();
        let (a, mut rx_a) = socket(&hub);
        let (b, mut rx_b) = socket(&hub);
        a.subscribe("room");
        b.subscribe("room");

        assert!(a.publish("room", "from a"));
        assert!(next_text(&mut rx_a).is_none());
        assert_eq!(next_text(&mut rx_b).as_deref(), Some("from a"));

        b.unsubscribe("room");
        assert!(!a.publish("room", "alone"));
    }

    #[test]
    fn unsubscribe_prunes_empty_topics() {
        let hub = PubSub::new();
        let (a, _rx) = socket(&hub);
        a.subscribe("t");
        assert!(a.is_subscribed("t"));
        assert!(a.unsubscribe("t"));
        assert!(!a.is_subscribed("t"));
        assert!(!a.unsubscribe("t"));
        assert_eq!(hub.num_subscribers("t"), 0);
        assert!(!hub.publish("t", "nobody"));
    }

    #[test]
    fn unsubscribe_all_leaves_no_trace() {
        let hub = PubSub::new();
        let (a, _rx) = socket(&hub);
        a.subscribe("x");
        a.subscribe("y");
        a.unsubscribe_all();
        assert_eq!(hub.num_subscribers("x"), 0);
        assert_eq!(hub.num_subscribers("y"), 0);
    }

    #[test]
    fn sends_fail_after_session_gone() {
        let hub = PubSub::new();
        let (a, rx) = socket(&hub);
        drop(rx);
        assert!(!a.send_text("late"));
        assert!(!a.send_binary(Bytes::from_static(b"late")));
    }
}
