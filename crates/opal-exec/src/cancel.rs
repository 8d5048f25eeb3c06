// SPDX-License-Identifier: MIT OR Apache-2.0
//! Cancellation primitives for plan execution.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;

/// A cloneable, cheaply-shareable token used to signal cancellation.
///
/// All clones share the same underlying state; cancelling one
/// immediately makes every clone observe `is_cancelled() == true`.
/// Child tokens (see [`child`](Self::child)) cancel when their parent
/// cancels, but cancelling a child never reaches the parent — that is
/// what `@timeout` scopes rely on.
#[derive(Clone)]
pub struct CancellationToken {
    inner: Arc<TokenInner>,
}

struct TokenInner {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancellationToken {
    /// Create a new token that is **not** cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TokenInner {
                cancelled: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    /// Signal cancellation. Idempotent.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.notify.notify_waiters();
    }

    /// Returns `true` if [`cancel`](Self::cancel) has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Returns a future that completes when the token is cancelled.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        loop {
            self.inner.notify.notified().await;
            if self.is_cancelled() {
                return;
            }
        }
    }

    /// Create a child token: cancelled when this token cancels, but
    /// cancellable on its own without affecting the parent.
    ///
    /// Requires a tokio runtime (a forwarding task watches the parent).
    #[must_use]
    pub fn child(&self) -> CancellationToken {
        let child = CancellationToken::new();
        let parent = self.clone();
        let forward = child.clone();
        tokio::spawn(async move {
            parent.cancelled().await;
            forward.cancel();
        });
        child
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

/// Install SIGINT/SIGTERM handlers that cancel `token`.
///
/// Returns after spawning the listener; call once from the binary.
pub fn cancel_on_signals(token: CancellationToken) {
    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();
        let mut term =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("SIGTERM handler installs");
        tokio::select! {
            _ = ctrl_c => tracing::debug!("SIGINT received, cancelling root context"),
            _ = term.recv() => tracing::debug!("SIGTERM received, cancelling root context"),
        }
        token.cancel();
    });
}
