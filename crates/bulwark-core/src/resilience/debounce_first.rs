//! Leading-edge debounce.
//!
//! The first call runs the operation; every call in the following `window`
//! gets that same result back, errors included. The window is measured
//! from when the real call completed and is only extended by calls that
//! do real work.

use async_trait::async_trait;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::context::Context;
use crate::error::Error;
use crate::operation::Operation;

struct Cached<V> {
    threshold: Instant,
    result: Result<V, Error>,
}

/// Caches the first result of each window.
pub struct DebounceFirst<O: Operation> {
    inner: O,
    window: Duration,
    // Held across the upstream call so one window sees one invocation.
    state: Mutex<Option<Cached<O::Output>>>,
}

impl<O> DebounceFirst<O>
where
    O: Operation,
    O::Output: Clone,
{
    /// Serve the first result to every call for `window` after it.
    pub fn new(inner: O, window: Duration) -> Self {
        Self {
            inner,
            window,
            state: Mutex::new(None),
        }
    }
}

#[async_trait]
impl<O> Operation for DebounceFirst<O>
where
    O: Operation,
    O::Output: Clone,
{
    type Output = O::Output;

    async fn call(&self, ctx: &Context) -> Result<Self::Output, Error> {
        let mut state = self.state.lock().await;

        if let Some(cached) = state.as_ref() {
            if Instant::now() < cached.threshold {
                return cached.result.clone();
            }
        }

        let result = self.inner.call(ctx).await;
        *state = Some(Cached {
            threshold: Instant::now() + self.window,
            result: result.clone(),
        });
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::operation_fn;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn ticking() -> (Arc<AtomicU32>, impl Operation<Output = u32>) {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let op = operation_fn(move |_ctx| {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            async move { Ok(n) }
        });
        (calls, op)
    }

    #[tokio::test(start_paused = true)]
    async fn test_window_serves_cached_result() {
        let (calls, op) = ticking();
        let debounced = DebounceFirst::new(op, Duration::from_millis(1000));
        let ctx = Context::background();

        let first = debounced.call(&ctx).await.unwrap();

        tokio::time::sleep(Duration::from_millis(800)).await;
        let second = debounced.call(&ctx).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        tokio::time::sleep(Duration::from_millis(300)).await;
        let third = debounced.call(&ctx).await.unwrap();
        assert_ne!(first, third);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cached_calls_do_not_extend_window() {
        let (calls, op) = ticking();
        let debounced = DebounceFirst::new(op, Duration::from_millis(500));
        let ctx = Context::background();

        debounced.call(&ctx).await.unwrap();
        for _ in 0..4 {
            tokio::time::sleep(Duration::from_millis(200)).await;
            debounced.call(&ctx).await.unwrap();
        }

        // Only the call at 600ms fell outside the first window.
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_errors_are_cached_too() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let op = operation_fn(move |_ctx| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(Error::msg("upstream down")) }
        });
        let debounced = DebounceFirst::new(op, Duration::from_secs(1));
        let ctx = Context::background();

        let a = debounced.call(&ctx).await.unwrap_err();
        let b = debounced.call(&ctx).await.unwrap_err();

        assert!(a.same_as(&b));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_share_one_invocation() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let op = operation_fn(move |_ctx| {
            let counter = counter.clone();
            async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                Ok(counter.fetch_add(1, Ordering::SeqCst))
            }
        });
        let debounced = Arc::new(DebounceFirst::new(op, Duration::from_secs(1)));

        let results = futures::future::join_all((0..8).map(|_| {
            let debounced = debounced.clone();
            async move { debounced.call(&Context::background()).await.unwrap() }
        }))
        .await;

        assert!(results.iter().all(|r| *r == 0));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
