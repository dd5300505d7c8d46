//! Response facade.
//!
//! # Responsibilities
//! - Single point of mutation for the outbound response
//! - Stage status/header changes on the engine's write path
//! - Enforce at-most-once completion
//!
//! # States
//! ```text
//! Open → Ended    first terminal write
//! Open → Aborted  peer went away (observed from the abort signal)
//! ```
//! Mutators are no-ops outside `Open`. `end` in `Ended` is an error,
//! because it means two middlewares both tried to finish the response.

use std::fmt;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use axum::body::Bytes;
use serde::Serialize;

use crate::engine::{AbortSignal, RawResponse};
use crate::error::ResponseError;
use crate::http::mime;

/// Lifecycle of a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseState {
    Open,
    Ended,
    Aborted,
}

/// Options for [`Response::file`] and [`Response::download`].
#[derive(Debug, Clone, Default)]
pub struct FileOptions {
    /// Overrides the extension-based content type.
    pub content_type: Option<String>,
}

impl FileOptions {
    pub fn content_type(content_type: impl Into<String>) -> Self {
        Self {
            content_type: Some(content_type.into()),
        }
    }
}

/// Outbound response handed to every middleware.
#[derive(Clone)]
pub struct Response {
    inner: Arc<Mutex<Inner>>,
    abort: AbortSignal,
}

struct Inner {
    state: ResponseState,
    status: u16,
    raw: Box<dyn RawResponse>,
}

impl Response {
    pub fn new(raw: impl RawResponse, abort: AbortSignal) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                state: ResponseState::Open,
                status: 200,
                raw: Box::new(raw),
            })),
            abort,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        if inner.state == ResponseState::Open && self.abort.is_aborted() {
            inner.state = ResponseState::Aborted;
        }
        inner
    }

    pub fn state(&self) -> ResponseState {
        self.lock().state
    }

    /// True once the response was finished or the peer went away.
    pub fn is_ended(&self) -> bool {
        self.state() != ResponseState::Open
    }

    /// Last staged status code (200 unless changed).
    pub fn status_code(&self) -> u16 {
        self.lock().status
    }

    /// Record that the connection is gone. Nothing is written.
    pub(crate) fn mark_aborted(&self) {
        let mut inner = self.lock();
        if inner.state == ResponseState::Open {
            inner.state = ResponseState::Aborted;
        }
    }

    pub fn status(&self, code: u16) -> &Self {
        let mut inner = self.lock();
        if inner.state == ResponseState::Open {
            inner.status = code;
            inner.raw.write_status(code);
        }
        self
    }

    pub fn set_header(&self, name: &str, value: &str) -> &Self {
        let mut inner = self.lock();
        if inner.state == ResponseState::Open {
            inner.raw.write_header(name, value);
        }
        self
    }

    /// Clears a staged header by writing an empty value.
    pub fn remove_header(&self, name: &str) -> &Self {
        self.set_header(name, "")
    }

    /// Stream a chunk without finishing the response.
    pub fn write(&self, data: impl Into<Bytes>) -> &Self {
        let mut inner = self.lock();
        if inner.state == ResponseState::Open && !inner.raw.write(data.into()) {
            tracing::debug!("Streaming write not accepted by engine");
        }
        self
    }

    /// Finish the response.
    ///
    /// Returns whether the engine accepted the final write. Ending a response
    /// twice is a [`ResponseError::AlreadyEnded`]; ending after the peer
    /// aborted is a silent no-op.
    pub fn end(&self, data: impl Into<Bytes>) -> Result<bool, ResponseError> {
        let mut inner = self.lock();
        let state = inner.state;
        match state {
            ResponseState::Ended => Err(ResponseError::AlreadyEnded),
            ResponseState::Aborted => Ok(false),
            ResponseState::Open => {
                inner.state = ResponseState::Ended;
                Ok(inner.raw.end(data.into()))
            }
        }
    }

    /// Stage headers and end under one lock; `Ok(false)` if already finished.
    fn finish_with(&self, stage: impl FnOnce(&mut Inner), body: Bytes) -> bool {
        let mut inner = self.lock();
        if inner.state != ResponseState::Open {
            return false;
        }
        stage(&mut *inner);
        inner.state = ResponseState::Ended;
        inner.raw.end(body)
    }

    /// Send `value` as `application/json`.
    pub fn json<T: Serialize + ?Sized>(&self, value: &T) -> Result<bool, ResponseError> {
        if self.is_ended() {
            return Ok(false);
        }
        let body = serde_json::to_vec(value)?;
        Ok(self.finish_with(
            |inner| inner.raw.write_header("Content-Type", "application/json"),
            body.into(),
        ))
    }

    /// 302 to `url` with a short text body.
    pub fn redirect(&self, url: &str) -> Result<bool, ResponseError> {
        Ok(self.finish_with(
            |inner| {
                inner.status = 302;
                inner.raw.write_status(302);
                inner.raw.write_header("Location", url);
            },
            Bytes::from(format!("Redirecting to {url}")),
        ))
    }

    /// Send a file from disk. A missing or unreadable file becomes a 404.
    pub fn file(&self, path: impl AsRef<Path>, options: FileOptions) -> Result<bool, ResponseError> {
        if self.is_ended() {
            return Ok(false);
        }
        let path = path.as_ref();

        match std::fs::read(path) {
            Ok(data) => {
                let content_type = options
                    .content_type
                    .unwrap_or_else(|| mime::content_type_for(path).to_string());
                Ok(self.finish_with(
                    |inner| inner.raw.write_header("Content-Type", &content_type),
                    data.into(),
                ))
            }
            Err(e) => {
                tracing::debug!(path = %path.display(), error = %e, "File not served");
                Ok(self.finish_with(
                    |inner| {
                        inner.status = 404;
                        inner.raw.write_status(404);
                    },
                    Bytes::from_static(b"File not found"),
                ))
            }
        }
    }

    /// Like [`Response::file`], with `Content-Disposition: attachment`.
    pub fn download(
        &self,
        path: impl AsRef<Path>,
        filename: &str,
        options: FileOptions,
    ) -> Result<bool, ResponseError> {
        self.set_header(
            "Content-Disposition",
            &format!("attachment; filename=\"{filename}\""),
        );
        self.file(path, options)
    }

    /// Allow any origin, method and header; credentials disabled.
    pub fn enable_public_cors(&self) -> &Self {
        self.set_header("Access-Control-Allow-Origin", "*")
            .set_header("Access-Control-Allow-Methods", "*")
            .set_header("Access-Control-Allow-Headers", "*")
            .set_header("Access-Control-Allow-Credentials", "false")
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("Response")
            .field("state", &inner.state)
            .field("status", &inner.status)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::abort_pair;
    use crate::engine::mock::{MockResponse, Recording};
    use serde_json::json;

    fn response() -> (Response, Recording) {
        let (raw, recording) = MockResponse::new();
        (Response::new(raw, AbortSignal::never()), recording)
    }

    fn temp_file(name: &str, contents: &[u8]) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("froovo-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn status_and_headers_are_staged() {
        let (res, rec) = response();
        res.status(201).set_header("X-A", "1").remove_header("X-B");
        assert_eq!(res.status_code(), 201);
        assert!(res.end("done").unwrap());

        let out = rec.snapshot();
        assert_eq!(out.status, Some(201));
        assert_eq!(out.header("x-a"), Some("1"));
        assert_eq!(out.headers.last().unwrap(), &("X-B".to_string(), String::new()));
        assert_eq!(out.body(), "done");
        assert_eq!(out.end_calls, 1);
    }

    #[test]
    fn double_end_is_an_error_and_writes_nothing() {
        let (res, rec) = response();
        assert!(res.end("first").unwrap());
        assert!(matches!(res.end("second"), Err(ResponseError::AlreadyEnded)));

        let out = rec.snapshot();
        assert_eq!(out.end_calls, 1);
        assert_eq!(out.body(), "first");
    }

    #[test]
    fn mutators_after_end_are_ignored() {
        let (res, rec) = response();
        res.end("").unwrap();
        res.status(500).set_header("X-Late", "1").write("late");

        let out = rec.snapshot();
        assert_eq!(out.status, None);
        assert!(out.headers.is_empty());
        assert_eq!(out.body(), "");
        assert_eq!(res.status_code(), 200);
    }

    #[test]
    fn streaming_writes_then_end() {
        let (res, rec) = response();
        res.write("a").write("b");
        assert!(!res.is_ended());
        res.end("c").unwrap();
        assert_eq!(rec.snapshot().body(), "abc");
    }

    #[test]
    fn abort_silences_everything() {
        let (raw, rec) = MockResponse::new();
        let (handle, signal) = abort_pair();
        let res = Response::new(raw, signal);
        handle.abort();

        assert_eq!(res.state(), ResponseState::Aborted);
        assert!(res.is_ended());
        res.status(404).write("x");
        assert!(!res.end("y").unwrap());
        assert!(!res.json(&json!({})).unwrap());

        let out = rec.snapshot();
        assert_eq!(out.status, None);
        assert!(out.chunks.is_empty());
        assert_eq!(out.end_calls, 0);
    }

    #[test]
    fn mark_aborted_keeps_ended_state() {
        let (res, _) = response();
        res.mark_aborted();
        assert_eq!(res.state(), ResponseState::Aborted);

        let (res, _) = response();
        res.end("").unwrap();
        res.mark_aborted();
        assert_eq!(res.state(), ResponseState::Ended);
    }

    #[test]
    fn json_sets_content_type() {
        let (res, rec) = response();
        assert!(res.json(&json!({"ok": true})).unwrap());
        let out = rec.snapshot();
        assert_eq!(out.header("content-type"), Some("application/json"));
        assert_eq!(out.body(), r#"{"ok":true}"#);

        assert!(!res.json(&json!({"again": 1})).unwrap());
        assert_eq!(rec.snapshot().end_calls, 1);
    }

    #[test]
    fn redirect_sets_location() {
        let (res, rec) = response();
        assert!(res.redirect("/login").unwrap());
        let out = rec.snapshot();
        assert_eq!(out.status, Some(302));
        assert_eq!(out.header("Location"), Some("/login"));
        assert_eq!(out.body(), "Redirecting to /login");
    }

    #[test]
    fn file_infers_content_type() {
        let path = temp_file("page.html", b"<p>hi</p>");
        let (res, rec) = response();
        assert!(res.file(&path, FileOptions::default()).unwrap());
        let out = rec.snapshot();
        assert_eq!(out.header("Content-Type"), Some("text/html"));
        assert_eq!(out.body(), "<p>hi</p>");
    }

    #[test]
    fn file_explicit_content_type_wins() {
        let path = temp_file("data.bin", b"\x00\x01");
        let (res, rec) = response();
        res.file(&path, FileOptions::content_type("application/x-custom"))
            .unwrap();
        assert_eq!(
            rec.snapshot().header("Content-Type"),
            Some("application/x-custom")
        );
    }

    #[test]
    fn missing_file_is_404() {
        let (res, rec) = response();
        res.file("/definitely/not/here.txt", FileOptions::default())
            .unwrap();
        let out = rec.snapshot();
        assert_eq!(out.status, Some(404));
        assert_eq!(out.body(), "File not found");
        assert!(res.is_ended());
    }

    #[test]
    fn download_sets_disposition() {
        let path = temp_file("report.pdf", b"%PDF");
        let (res, rec) = response();
        res.download(&path, "q3.pdf", FileOptions::default()).unwrap();
        let out = rec.snapshot();
        assert_eq!(
            out.header("Content-Disposition"),
            Some("attachment; filename=\"q3.pdf\"")
        );
        assert_eq!(out.header("Content-Type"), Some("application/pdf"));
    }

    #[test]
    fn public_cors_bundle() {
        let (res, rec) = response();
        res.enable_public_cors();
        res.end("").unwrap();
        let out = rec.snapshot();
        assert_eq!(out.header("Access-Control-Allow-Origin"), Some("*"));
        assert_eq!(out.header("Access-Control-Allow-Methods"), Some("*"));
        assert_eq!(out.header("Access-Control-Allow-Headers"), Some("*"));
        assert_eq!(out.header("Access-Control-Allow-Credentials"), Some("false"));
    }
}
