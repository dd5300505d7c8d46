//! Per-request middleware chain.
//!
//! # Dispatch step
//! ```text
//! aborted or ended?          → stop
//! cursor past last handler?  → end("") and stop
//! call handler[cursor++] with (req, res, next)
//!     Err / panic            → log, 500 if still open, stop
//!     settled, still open,
//!     cursor not moved       → step again (auto-advance)
//! ```
//!
//! # Design Decisions
//! - One cursor per request; `next` and auto-advance both move it, so a
//!   handler that called `next` is never followed by a second advance
//! - Abort is checked before every step, never forced into running handlers
//! - The chain always leaves the response ended (or aborted)

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

use futures_util::FutureExt;
use tracing::Instrument;
use uuid::Uuid;

use crate::dispatch::handler::{BoxFuture, BoxMiddleware};
use crate::engine::AbortSignal;
use crate::error::ResponseError;
use crate::http::{Request, Response};
use crate::observability::metrics;

/// Continuation handed to every middleware.
///
/// Consumed by [`Next::run`], so a middleware can advance the chain at most once.
pub struct Next {
    chain: Arc<Chain>,
}

impl Next {
    /// Run the rest of the chain. Resolves once downstream handlers have settled.
    pub fn run(self) -> BoxFuture<'static, ()> {
        self.chain.step()
    }
}

impl std::fmt::Debug for Next {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Next")
            .field("cursor", &self.chain.cursor.load(Ordering::SeqCst))
            .field("len", &self.chain.middlewares.len())
            .finish()
    }
}

struct Chain {
    middlewares: Arc<[BoxMiddleware]>,
    cursor: AtomicUsize,
    request: Request,
    response: Response,
    abort: AbortSignal,
}

impl Chain {
    fn halted(&self) -> bool {
        if self.abort.is_aborted() {
            self.response.mark_aborted();
            return true;
        }
        self.response.is_ended()
    }

    fn step(self: Arc<Self>) -> BoxFuture<'static, ()> {
        Box::pin(async move {
            if self.halted() {
                return;
            }

            let index = self.cursor.fetch_add(1, Ordering::SeqCst);
            let Some(middleware) = self.middlewares.get(index).cloned() else {
                if let Err(e) = self.response.end("") {
                    tracing::trace!(error = %e, "Chain exhausted after response ended");
                }
                return;
            };

            let next = Next {
                chain: Arc::clone(&self),
            };
            let req = self.request.clone();
            let res = self.response.clone();
            let outcome = AssertUnwindSafe(async move { middleware.call(req, res, next).await })
                .catch_unwind()
                .await;

            let failure = match outcome {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(describe_error(e.as_ref())),
                Err(panic) => Some(format!("panicked: {}", panic_message(panic.as_ref()))),
            };

            if let Some(failure) = failure {
                tracing::error!(index, error = %failure, "Middleware failed");
                metrics::record_middleware_error();
                if !self.response.is_ended() {
                    let _ = self.response.status(500).end("");
                }
                return;
            }

            // `next` already moved the cursor: that handler owned advancement.
            if self.cursor.load(Ordering::SeqCst) == index + 1 {
                self.step().await;
            }
        })
    }
}

fn describe_error(e: &(dyn std::error::Error + Send + Sync + 'static)) -> String {
    match e.downcast_ref::<ResponseError>() {
        Some(ResponseError::AlreadyEnded) => {
            "response ended twice (a middleware finished an already finished response)".to_string()
        }
        _ => e.to_string(),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    panic
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| panic.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

/// Drive `middlewares` for one request until the response is finished.
///
/// Never fails: middleware errors become 500s, abort ends the chain quietly,
/// and an exhausted chain ends the response with an empty body.
pub async fn dispatch(
    middlewares: Arc<[BoxMiddleware]>,
    request: Request,
    response: Response,
    abort: AbortSignal,
) {
    let start = Instant::now();
    let request_id = Uuid::new_v4();
    let span = tracing::info_span!(
        "request",
        request_id = %request_id,
        method = %request.method(),
        url = %request.url(),
    );

    let chain = Arc::new(Chain {
        middlewares,
        cursor: AtomicUsize::new(0),
        request: request.clone(),
        response: response.clone(),
        abort: abort.clone(),
    });

    async move {
        chain.step().await;

        if abort.is_aborted() {
            response.mark_aborted();
            metrics::record_aborted(request.method());
            tracing::debug!("Request aborted by peer");
            return;
        }
        if !response.is_ended() {
            let _ = response.end("");
        }

        let status = response.status_code();
        metrics::record_request(request.method(), status, start);
        tracing::debug!(status, elapsed_ms = start.elapsed().as_millis() as u64, "Request finished");
    }
    .instrument(span)
    .await
}
