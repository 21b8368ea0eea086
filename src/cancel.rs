//! Process-wide cancellation signalling.
//!
//! A single `CancelHandle` is held by the top-level controller (interrupt
//! handler or budget enforcement); `CancelToken` clones are passed to every
//! long-running operation and observed at each suspension point via
//! `tokio::select!`.

use std::time::Duration;
use tokio::sync::watch;

/// Sending half of the cancellation signal.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    /// Trigger cancellation. All outstanding tokens wake up.
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    /// Check whether cancellation has been triggered.
    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Receiving half of the cancellation signal.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    /// Check whether cancellation has been triggered.
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve when cancellation is triggered.
    ///
    /// If the handle is dropped without cancelling, this future never
    /// resolves, so `select!` arms waiting on it simply stay pending.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow() {
                return;
            }
            if rx.changed().await.is_err() {
                futures::future::pending::<()>().await;
            }
        }
    }

    /// A token that can never be cancelled, for tests and standalone use.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        // Leak the sender so the channel stays open forever.
        std::mem::forget(_tx);
        Self { rx }
    }
}

/// Create a connected handle/token pair.
pub fn cancel_pair() -> (CancelHandle, CancelToken) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx }, CancelToken { rx })
}

/// Sleep for `duration` unless cancelled first.
///
/// Returns `true` if the full duration elapsed, `false` on cancellation.
pub async fn sleep_cancellable(duration: Duration, cancel: &CancelToken) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => true,
        _ = cancel.cancelled() => false,
    }
}
