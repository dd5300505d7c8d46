//! Peer abort notification.
//!
//! The engine owns an [`AbortHandle`]; the dispatch chain and the response
//! facade hold [`AbortSignal`] clones and check them at every step. Abort is
//! level-triggered: once raised it never resets.

use std::sync::Arc;
use tokio::sync::watch;

/// Create a linked handle/signal pair for one request.
pub fn abort_pair() -> (AbortHandle, AbortSignal) {
    let (tx, rx) = watch::channel(false);
    (AbortHandle { tx: Arc::new(tx) }, AbortSignal { rx })
}

/// Engine side: raises the abort flag.
#[derive(Debug, Clone)]
pub struct AbortHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl AbortHandle {
    /// Mark the connection as gone.
    pub fn abort(&self) {
        if !self.tx.send_replace(true) {
            tracing::debug!("Connection aborted by peer");
        }
    }

    pub fn is_aborted(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Dispatch side: observes the abort flag.
#[derive(Debug, Clone)]
pub struct AbortSignal {
    rx: watch::Receiver<bool>,
}

impl AbortSignal {
    /// A signal that is never raised.
    pub fn never() -> Self {
        let (_, signal) = abort_pair();
        signal
    }

    /// Whether the peer has gone away.
    pub fn is_aborted(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once the peer has gone away.
    ///
    /// Pends forever if the handle is dropped without aborting.
    pub async fn aborted(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|aborted| *aborted).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

/// Raises abort on drop unless disarmed.
///
/// Held by the engine future that waits for the response head: if the peer
/// disconnects, the server drops that future and the chain observes abort.
#[derive(Debug)]
pub struct AbortGuard {
    handle: Option<AbortHandle>,
}

impl AbortGuard {
    pub fn new(handle: AbortHandle) -> Self {
        Self {
            handle: Some(handle),
        }
    }

    /// The response was delivered; dropping no longer means abort.
    pub fn disarm(&mut self) {
        self.handle = None;
    }
}

impl Drop for AbortGuard {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}
