//! Request facade.
//!
//! # Responsibilities
//! - Capture url, method, headers, query, cookies and route params once,
//!   at construction, from the engine's raw handle
//! - Decode the body lazily on first access, exactly once
//!
//! # Design Decisions
//! - Everything except the body is parsed eagerly: the raw handle is only
//!   valid while the engine callback runs
//! - The body cell coalesces concurrent readers; the stream is consumed by
//!   the first reader and the decoded value is shared afterwards
//! - Cheap to clone: every middleware gets its own handle to one shared state

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use percent_encoding::percent_decode_str;
use tokio::sync::OnceCell;

use crate::engine::{BodyStream, RawRequest};
use crate::http::body::{self, Body};

/// Inbound request handed to every middleware.
#[derive(Clone)]
pub struct Request {
    inner: Arc<Inner>,
}

struct Inner {
    url: String,
    method: String,
    headers: HashMap<String, String>,
    query: HashMap<String, String>,
    cookies: HashMap<String, String>,
    params: Vec<Param>,
    remote_address: String,
    body_stream: Mutex<Option<BodyStream>>,
    body: OnceCell<Body>,
}

struct Param {
    name: Option<String>,
    value: String,
}

impl Request {
    /// Snapshot the raw request. `body` is read on the first call to [`Request::body`].
    pub fn from_raw(raw: &dyn RawRequest, body: BodyStream, remote_address: String) -> Self {
        let mut headers = HashMap::new();
        raw.for_each_header(&mut |name, value| {
            headers.insert(name.to_ascii_lowercase(), value.to_string());
        });

        let query = raw.query().map(body::parse_urlencoded).unwrap_or_default();
        let cookies = headers
            .get("cookie")
            .map(|c| parse_cookies(c))
            .unwrap_or_default();

        let params = (0..)
            .map_while(|index| {
                raw.parameter(index).map(|value| Param {
                    name: raw.parameter_name(index).map(str::to_string),
                    value: value.to_string(),
                })
            })
            .collect();

        Self {
            inner: Arc::new(Inner {
                url: raw.url().to_string(),
                method: raw.method().to_ascii_lowercase(),
                headers,
                query,
                cookies,
                params,
                remote_address,
                body_stream: Mutex::new(Some(body)),
                body: OnceCell::new(),
            }),
        }
    }

    /// Request path, without the query string.
    pub fn url(&self) -> &str {
        &self.inner.url
    }

    /// Lower-cased method (`get`, `post`, …).
    pub fn method(&self) -> &str {
        &self.inner.method
    }

    /// All headers, keyed by lower-cased name.
    pub fn headers(&self) -> &HashMap<String, String> {
        &self.inner.headers
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.inner
            .headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn has_header(&self, name: &str) -> bool {
        self.header(name).is_some()
    }

    /// `Content-Type`, or an empty string.
    pub fn content_type(&self) -> &str {
        self.header("content-type").unwrap_or_default()
    }

    /// `User-Agent`, or an empty string.
    pub fn user_agent(&self) -> &str {
        self.header("user-agent").unwrap_or_default()
    }

    /// Peer address as reported by the engine.
    pub fn ip(&self) -> &str {
        &self.inner.remote_address
    }

    pub fn query(&self) -> &HashMap<String, String> {
        &self.inner.query
    }

    pub fn cookies(&self) -> &HashMap<String, String> {
        &self.inner.cookies
    }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.inner.cookies.get(name).map(String::as_str)
    }

    /// Positional route parameter.
    pub fn param(&self, index: usize) -> Option<&str> {
        self.inner.params.get(index).map(|p| p.value.as_str())
    }

    /// Route parameter by pattern name (`/users/:id` → `"id"`).
    pub fn param_named(&self, name: &str) -> Option<&str> {
        self.inner
            .params
            .iter()
            .find(|p| p.name.as_deref() == Some(name))
            .map(|p| p.value.as_str())
    }

    /// Route parameters keyed `param0`, `param1`, … in match order.
    pub fn params(&self) -> HashMap<String, String> {
        self.inner
            .params
            .iter()
            .enumerate()
            .map(|(i, p)| (format!("param{i}"), p.value.clone()))
            .collect()
    }

    /// Decoded body. Reads the stream on first call; later calls return the cached value.
    pub async fn body(&self) -> &Body {
        self.inner
            .body
            .get_or_init(|| async {
                let Some(stream) = self.take_body_stream() else {
                    return Body::Empty;
                };
                match body::collect(stream).await {
                    Ok(raw) => body::decode(self.content_type(), &raw),
                    Err(e) => {
                        tracing::warn!(url = %self.url(), error = %e, "Failed to read request body");
                        Body::Empty
                    }
                }
            })
            .await
    }

    fn take_body_stream(&self) -> Option<BodyStream> {
        self.inner
            .body_stream
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.inner.method)
            .field("url", &self.inner.url)
            .field("headers", &self.inner.headers)
            .field("body", &self.inner.body.get())
            .finish()
    }
}

/// `a=1; b=2` pairs. Split on the first `=`, values percent-decoded,
/// pairs without `=` ignored.
pub fn parse_cookies(header: &str) -> HashMap<String, String> {
    header
        .split(';')
        .filter_map(|pair| pair.split_once('='))
        .map(|(key, value)| (key.trim(), value.trim()))
        .filter(|(key, _)| !key.is_empty())
        .map(|(key, value)| {
            let value = percent_decode_str(value).decode_utf8_lossy().into_owned();
            (key.to_string(), value)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::mock::{body_stream, failing_body_stream, MockRequest};
    use serde_json::json;

    fn request(raw: MockRequest) -> Request {
        Request::from_raw(&raw, body_stream(Vec::<&'static str>::new()), "10.0.0.1".into())
    }

    #[test]
    fn url_and_method() {
        let req = request(MockRequest::new("POST", "/users?page=2"));
        assert_eq!(req.url(), "/users");
        assert_eq!(req.method(), "post");
        assert_eq!(req.ip(), "10.0.0.1");
    }

    #[test]
    fn headers_are_lower_cased_last_wins() {
        let req = request(
            MockRequest::new("GET", "/")
                .header("X-Trace", "one")
                .header("x-trace", "two")
                .header("User-Agent", "curl/8"),
        );
        assert_eq!(req.header("X-TRACE"), Some("two"));
        assert_eq!(req.headers().get("user-agent").map(String::as_str), Some("curl/8"));
        assert_eq!(req.user_agent(), "curl/8");
        assert_eq!(req.content_type(), "");
        assert!(!req.has_header("cookie"));
    }

    #[test]
    fn query_last_duplicate_wins() {
        let req = request(MockRequest::new("GET", "/search?q=rust&q=axum&lang=en%20us"));
        assert_eq!(req.query().get("q").map(String::as_str), Some("axum"));
        assert_eq!(req.query().get("lang").map(String::as_str), Some("en us"));
        assert!(request(MockRequest::new("GET", "/")).query().is_empty());
    }

    #[test]
    fn cookies_parsing() {
        let cookies = parse_cookies("sid=abc%20def; theme = dark ;broken; token=a=b; =x");
        assert_eq!(cookies.len(), 3);
        assert_eq!(cookies["sid"], "abc def");
        assert_eq!(cookies["theme"], "dark");
        assert_eq!(cookies["token"], "a=b");
        assert!(!cookies.contains_key("broken"));
    }

    #[test]
    fn cookies_from_header() {
        let req = request(MockRequest::new("GET", "/").header("Cookie", "a=1; b=2"));
        assert_eq!(req.cookie("a"), Some("1"));
        assert_eq!(req.cookies().len(), 2);
    }

    #[test]
    fn positional_params() {
        let req = request(
            MockRequest::new("GET", "/users/7/posts/9")
                .param("user", "7")
                .param("post", "9"),
        );
        let params = req.params();
        assert_eq!(params.len(), 2);
        assert_eq!(params["param0"], "7");
        assert_eq!(params["param1"], "9");
        assert_eq!(req.param(1), Some("9"));
        assert_eq!(req.param_named("user"), Some("7"));
        assert_eq!(req.param(2), None);
        assert!(request(MockRequest::new("GET", "/")).params().is_empty());
    }

    #[tokio::test]
    async fn body_is_decoded_once_and_cached() {
        let raw = MockRequest::new("POST", "/").header("Content-Type", "application/json");
        let req = Request::from_raw(&raw, body_stream([r#"{"a""#, ":1}"]), String::new());

        let first = req.body().await.clone();
        assert_eq!(first, Body::Json(json!({"a": 1})));
        // The stream is gone; the cached value must still be served.
        assert!(req.take_body_stream().is_none());
        assert_eq!(req.body().await, &first);
        assert_eq!(req.clone().body().await, &first);
    }

    #[tokio::test]
    async fn concurrent_readers_share_one_decode() {
        let raw = MockRequest::new("POST", "/").header("Content-Type", "text/plain");
        let req = Request::from_raw(&raw, body_stream(["hel", "lo"]), String::new());
        let (a, b) = tokio::join!(req.body(), req.body());
        assert_eq!(a.as_text(), Some("hello"));
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn broken_stream_decodes_to_empty() {
        let raw = MockRequest::new("POST", "/").header("Content-Type", "text/plain");
        let req = Request::from_raw(&raw, failing_body_stream(["partial"]), String::new());
        assert_eq!(req.body().await, &Body::Empty);
    }
}
