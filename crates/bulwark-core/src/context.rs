//! Cancellable context passed to every operation.
//!
//! A `Context` carries a cancellation signal and an optional deadline.
//! Clones share the same signal; children derived with [`Context::child`]
//! are cancelled whenever their parent is.

use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;

use crate::error::ContextError;

struct Inner {
    token: CancellationToken,
    deadline: Option<Instant>,
    cause: OnceLock<ContextError>,
    parent: Option<Context>,
}

/// Cancellation signal and deadline for one logical call tree.
#[derive(Clone)]
pub struct Context {
    inner: Arc<Inner>,
}

impl Context {
    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self::build(CancellationToken::new(), None, None)
    }

    /// A context whose deadline is `timeout` from now.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    /// A context that expires at `deadline`.
    pub fn with_deadline(deadline: Instant) -> Self {
        Self::build(CancellationToken::new(), Some(deadline), None)
    }

    /// A child context, cancelled together with this one.
    pub fn child(&self) -> Self {
        Self::build(
            self.inner.token.child_token(),
            self.inner.deadline,
            Some(self.clone()),
        )
    }

    /// A child context whose deadline is the earlier of the parent's and
    /// `timeout` from now.
    pub fn child_with_timeout(&self, timeout: Duration) -> Self {
        let own = Instant::now() + timeout;
        let deadline = match self.inner.deadline {
            Some(parent) => parent.min(own),
            None => own,
        };
        Self::build(self.inner.token.child_token(), Some(deadline), Some(self.clone()))
    }

    fn build(token: CancellationToken, deadline: Option<Instant>, parent: Option<Context>) -> Self {
        Self {
            inner: Arc::new(Inner {
                token,
                deadline,
                cause: OnceLock::new(),
                parent,
            }),
        }
    }

    /// Cancel this context and every context derived from it.
    ///
    /// Has no effect on the recorded cause if the context is already done.
    pub fn cancel(&self) {
        if self.err().is_none() {
            let _ = self.inner.cause.set(ContextError::Cancelled);
        }
        self.inner.token.cancel();
    }

    /// Why the context is done, or `None` while it is still live.
    pub fn err(&self) -> Option<ContextError> {
        if let Some(cause) = self.inner.cause.get() {
            return Some(*cause);
        }

        if let Some(cause) = self.inner.parent.as_ref().and_then(Context::err) {
            return Some(cause);
        }

        match self.inner.deadline {
            Some(deadline) if Instant::now() >= deadline => {
                Some(*self.inner.cause.get_or_init(|| ContextError::DeadlineExceeded))
            }
            _ => None,
        }
    }

    /// Whether the context has been cancelled or has expired.
    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }

    /// The deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    /// Wait until the context is done and return why.
    pub async fn done(&self) -> ContextError {
        match self.inner.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = self.inner.token.cancelled() => {}
                    _ = sleep_until(deadline) => {}
                }
            }
            None => self.inner.token.cancelled().await,
        }

        self.err().unwrap_or(ContextError::Cancelled)
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("deadline", &self.inner.deadline)
            .field("err", &self.err())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_background_is_never_done() {
        let ctx = Context::background();
        assert!(!ctx.is_done());
        assert!(ctx.deadline().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_expires() {
        let ctx = Context::with_timeout(Duration::from_millis(100));
        assert_eq!(ctx.err(), None);

        let cause = ctx.done().await;
        assert_eq!(cause, ContextError::DeadlineExceeded);
        assert_eq!(ctx.err(), Some(ContextError::DeadlineExceeded));
    }

    #[tokio::test(start_paused = true)]
    async fn test_first_cause_sticks() {
        let ctx = Context::with_timeout(Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(20)).await;

        ctx.cancel();
        assert_eq!(ctx.err(), Some(ContextError::DeadlineExceeded));
    }

    #[tokio::test]
    async fn test_cancel_propagates_to_children() {
        let parent = Context::background();
        let child = parent.child();

        parent.cancel();

        assert_eq!(child.done().await, ContextError::Cancelled);
        assert_eq!(child.err(), Some(ContextError::Cancelled));
    }

    #[tokio::test]
    async fn test_child_cancel_leaves_parent_alive() {
        let parent = Context::background();
        let child = parent.child();

        child.cancel();

        assert!(child.is_done());
        assert!(!parent.is_done());
    }

    #[tokio::test(start_paused = true)]
    async fn test_child_deadline_is_capped_by_parent() {
        let parent = Context::with_timeout(Duration::from_millis(50));
        let child = parent.child_with_timeout(Duration::from_secs(10));

        assert_eq!(child.deadline(), parent.deadline());
        assert_eq!(child.done().await, ContextError::DeadlineExceeded);
    }
}
