//! In-memory engine used by tests.
//!
//! [`MockRequest`] is a plain description of an inbound request and
//! [`MockResponse`] records every primitive call into a shared [`Recording`].

use std::sync::{Arc, Mutex, PoisonError};

use axum::body::Bytes;
use futures_util::stream::{self, StreamExt};

use super::{BodyStream, RawRequest, RawResponse};
use crate::error::BoxError;

/// Inbound request description.
#[derive(Debug, Clone, Default)]
pub struct MockRequest {
    method: String,
    url: String,
    query: Option<String>,
    headers: Vec<(String, String)>,
    params: Vec<(String, String)>,
}

impl MockRequest {
    /// `target` may carry a query string (`/path?a=1`).
    pub fn new(method: &str, target: &str) -> Self {
        let (url, query) = match target.split_once('?') {
            Some((url, query)) => (url.to_string(), Some(query.to_string())),
            None => (target.to_string(), None),
        };
        Self {
            method: method.to_string(),
            url,
            query,
            ..Self::default()
        }
    }

    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    pub fn param(mut self, name: &str, value: &str) -> Self {
        self.params.push((name.to_string(), value.to_string()));
        self
    }
}

impl RawRequest for MockRequest {
    fn url(&self) -> &str {
        &self.url
    }

    fn method(&self) -> &str {
        &self.method
    }

    fn query(&self) -> Option<&str> {
        self.query.as_deref()
    }

    fn for_each_header(&self, f: &mut dyn FnMut(&str, &str)) {
        for (name, value) in &self.headers {
            f(name, value);
        }
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .rev()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    fn parameter(&self, index: usize) -> Option<&str> {
        self.params.get(index).map(|(_, v)| v.as_str())
    }

    fn parameter_name(&self, index: usize) -> Option<&str> {
        self.params.get(index).map(|(n, _)| n.as_str())
    }
}

/// Everything written to a [`MockResponse`].
#[derive(Debug, Clone, Default)]
pub struct Recorded {
    pub status: Option<u16>,
    pub headers: Vec<(String, String)>,
    pub chunks: Vec<Bytes>,
    pub end_calls: usize,
}

impl Recorded {
    /// Last value written for `name`; `None` if never written or cleared.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .rev()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
            .filter(|v| !v.is_empty())
    }

    pub fn body(&self) -> String {
        let bytes: Vec<u8> = self.chunks.iter().flat_map(|c| c.iter().copied()).collect();
        String::from_utf8_lossy(&bytes).into_owned()
    }

    pub fn ended(&self) -> bool {
        self.end_calls > 0
    }
}

/// Shared view of a mock response's writes.
#[derive(Debug, Clone, Default)]
pub struct Recording {
    inner: Arc<Mutex<Recorded>>,
}

impl Recording {
    pub fn snapshot(&self) -> Recorded {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Outbound handle that records instead of writing to a socket.
#[derive(Debug)]
pub struct MockResponse {
    recording: Recording,
    remote: String,
    fail_writes: bool,
}

impl MockResponse {
    pub fn new() -> (Self, Recording) {
        let recording = Recording::default();
        let response = Self {
            recording: recording.clone(),
            remote: "127.0.0.1".to_string(),
            fail_writes: false,
        };
        (response, recording)
    }

    /// Make every write/end report failure, as a closed socket would.
    pub fn failing(mut self) -> Self {
        self.fail_writes = true;
        self
    }

    pub fn remote(mut self, address: &str) -> Self {
        self.remote = address.to_string();
        self
    }

    fn with<R>(&self, f: impl FnOnce(&mut Recorded) -> R) -> R {
        let mut recorded = self
            .recording
            .inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        f(&mut recorded)
    }
}

impl RawResponse for MockResponse {
    fn write_status(&mut self, status: u16) {
        self.with(|r| r.status = Some(status));
    }

    fn write_header(&mut self, name: &str, value: &str) {
        self.with(|r| r.headers.push((name.to_string(), value.to_string())));
    }

    fn write(&mut self, chunk: Bytes) -> bool {
        self.with(|r| r.chunks.push(chunk));
        !self.fail_writes
    }

    fn end(&mut self, chunk: Bytes) -> bool {
        self.with(|r| {
            if !chunk.is_empty() {
                r.chunks.push(chunk);
            }
            r.end_calls += 1;
        });
        !self.fail_writes
    }

    fn remote_address(&self) -> String {
        self.remote.clone()
    }
}

/// Body stream delivering `chunks` in order.
pub fn body_stream<I>(chunks: I) -> BodyStream
where
    I: IntoIterator,
    I::Item: Into<Bytes>,
{
    let chunks: Vec<Result<Bytes, BoxError>> = chunks.into_iter().map(|c| Ok(c.into())).collect();
    stream::iter(chunks).boxed()
}

/// Body stream that fails after delivering `chunks`.
pub fn failing_body_stream<I>(chunks: I) -> BodyStream
where
    I: IntoIterator,
    I::Item: Into<Bytes>,
{
    let mut items: Vec<Result<Bytes, BoxError>> = chunks.into_iter().map(|c| Ok(c.into())).collect();
    items.push(Err("connection reset".into()));
    stream::iter(items).boxed()
}
