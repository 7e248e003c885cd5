//! Cancellation and deadline propagation.
//!
//! Every [`ContainerManager`](crate::manager::ContainerManager) operation takes
//! a [`Context`]. A context is a cancellation token plus an optional deadline;
//! derived contexts are cancelled with their parent but never cancel it.
//!
//! The per-action timeout is expressed purely as a deadline on the context
//! handed to the wait operations. Expiry never kills anything by itself.
//!
//! ```rust,ignore
//! let ctx = Context::background();
//! let action_ctx = ctx.with_timeout(Duration::from_secs(600));
//! tokio::select! {
//!     code = task_exit => { /* ... */ }
//!     err = action_ctx.done() => { /* Canceled or DeadlineExceeded */ }
//! }
//! ```

use crate::error::Error;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Cancellation token with an optional deadline.
#[derive(Debug, Clone)]
pub struct Context {
    token: CancellationToken,
    deadline: Option<Instant>,
}

impl Context {
    /// Returns a root context that is never cancelled on its own.
    pub fn background() -> Self {
        Self {
            token: CancellationToken::new(),
            deadline: None,
        }
    }

    /// Derives a context that expires after `timeout`.
    ///
    /// The derived deadline never extends the parent's. A zero timeout, or
    /// one too large to represent as an instant, derives a context without
    /// an additional deadline.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let candidate = if timeout.is_zero() {
            None
        } else {
            Instant::now().checked_add(timeout)
        };
        let deadline = match (self.deadline, candidate) {
            (Some(parent), Some(candidate)) => Some(parent.min(candidate)),
            (parent, None) => parent,
            (None, candidate) => candidate,
        };

        Self {
            token: self.token.child_token(),
            deadline,
        }
    }

    /// Derives a context that can be cancelled independently of this one.
    pub fn with_cancel(&self) -> Self {
        Self {
            token: self.token.child_token(),
            deadline: self.deadline,
        }
    }

    /// Cancels this context and every context derived from it.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Returns the deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Returns why the context is done, or `None` while it is still live.
    pub fn err(&self) -> Option<Error> {
        if self.token.is_cancelled() {
            return Some(Error::Canceled);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(Error::DeadlineExceeded),
            _ => None,
        }
    }

    /// Resolves once the context is cancelled or its deadline passes.
    pub async fn done(&self) -> Error {
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.token.cancelled() => Error::Canceled,
                    _ = tokio::time::sleep_until(deadline) => Error::DeadlineExceeded,
                }
            }
            None => {
                self.token.cancelled().await;
                Error::Canceled
            }
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}
