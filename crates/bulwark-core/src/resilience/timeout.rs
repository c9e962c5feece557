//! Deadline race for context-unaware functions.
//!
//! The wrapped function knows nothing about cancellation. Each call runs it
//! on its own task and waits for whichever comes first: its result or the
//! caller's context being done. A function that loses the race is left to
//! finish on its own; its result is discarded.

use std::future::Future;
use std::sync::Arc;

use crate::context::Context;
use crate::error::Error;

/// Races a slow function against the caller's context.
pub struct Timeout<F> {
    f: Arc<F>,
}

impl<F> Clone for Timeout<F> {
    fn clone(&self) -> Self {
        Self { f: self.f.clone() }
    }
}

impl<F> Timeout<F> {
    /// Wrap an async function. It runs as a detached task per call.
    pub fn new<I, Fut, V>(f: F) -> Self
    where
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V, Error>> + Send + 'static,
        V: Send + 'static,
    {
        Self { f: Arc::new(f) }
    }

    /// Run the function with `input`, giving up when `ctx` is done.
    pub async fn call<I, Fut, V>(&self, ctx: &Context, input: I) -> Result<V, Error>
    where
        F: Fn(I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V, Error>> + Send + 'static,
        V: Send + 'static,
    {
        let execution = tokio::spawn((self.f)(input));
        race(ctx, execution).await
    }
}

/// Wrapper for blocking functions, run on the blocking thread pool.
pub struct BlockingTimeout<F> {
    f: Arc<F>,
}

impl<F> Clone for BlockingTimeout<F> {
    fn clone(&self) -> Self {
        Self { f: self.f.clone() }
    }
}

impl<F> Timeout<F> {
    /// Wrap a blocking function (disk I/O, a synchronous client call).
    pub fn blocking<I, V>(f: F) -> BlockingTimeout<F>
    where
        F: Fn(I) -> Result<V, Error> + Send + Sync + 'static,
        I: Send + 'static,
        V: Send + 'static,
    {
        BlockingTimeout { f: Arc::new(f) }
    }
}

impl<F> BlockingTimeout<F> {
    /// Run the function with `input`, giving up when `ctx` is done.
    pub async fn call<I, V>(&self, ctx: &Context, input: I) -> Result<V, Error>
    where
        F: Fn(I) -> Result<V, Error> + Send + Sync + 'static,
        I: Send + 'static,
        V: Send + 'static,
    {
        let f = self.f.clone();
        let execution = tokio::task::spawn_blocking(move || f(input));
        race(ctx, execution).await
    }
}

async fn race<V>(
    ctx: &Context,
    execution: tokio::task::JoinHandle<Result<V, Error>>,
) -> Result<V, Error> {
    tokio::select! {
        biased;
        joined = execution => match joined {
            Ok(result) => result,
            Err(join_err) => Err(Error::upstream(join_err)),
        },
        cause = ctx.done() => {
            tracing::debug!(cause = %cause, "Timed out waiting for slow function, abandoning it");
            Err(cause.into())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ContextError;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_fast_function_result_passes_through() {
        let timeout =
            Timeout::new(|input: String| async move { Ok(format!("result for {}", input)) });
        let ctx = Context::with_timeout(Duration::from_secs(1));

        let res = timeout.call(&ctx, "some input".to_string()).await.unwrap();
        assert_eq!(res, "result for some input");
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_function_error_passes_through() {
        let timeout = Timeout::new(|_: ()| async { Err::<(), _>(Error::msg("bad input")) });
        let ctx = Context::with_timeout(Duration::from_secs(1));

        let err = timeout.call(&ctx, ()).await.unwrap_err();
        assert_eq!(err.to_string(), "bad input");
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_function_hits_deadline_and_is_abandoned() {
        let finished = Arc::new(AtomicBool::new(false));
        let flag = finished.clone();
        let timeout = Timeout::new(move |_: &'static str| {
            let flag = flag.clone();
            async move {
                tokio::time::sleep(Duration::from_secs(100)).await;
                flag.store(true, Ordering::SeqCst);
                Ok("result")
            }
        });
        let ctx = Context::with_timeout(Duration::from_secs(1));

        let err = timeout.call(&ctx, "some input").await.unwrap_err();
        assert_eq!(err.context_error(), Some(ContextError::DeadlineExceeded));

        // Not aborted: it still runs to completion in the background
        tokio::time::sleep(Duration::from_secs(100)).await;
        assert!(finished.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_explicit_cancel_wins_race() {
        let timeout = Timeout::new(|_: ()| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        });
        let ctx = Context::background();
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            canceller.cancel();
        });

        let err = timeout.call(&ctx, ()).await.unwrap_err();
        assert_eq!(err.context_error(), Some(ContextError::Cancelled));
    }

    #[tokio::test]
    async fn test_blocking_function_hits_deadline() {
        let timeout = Timeout::blocking(|ms: u64| {
            std::thread::sleep(Duration::from_millis(ms));
            Ok(ms)
        });

        let ctx = Context::with_timeout(Duration::from_millis(500));
        assert_eq!(timeout.call(&ctx, 5).await.unwrap(), 5);

        let ctx = Context::with_timeout(Duration::from_millis(20));
        let err = timeout.call(&ctx, 200).await.unwrap_err();
        assert_eq!(err.context_error(), Some(ContextError::DeadlineExceeded));
    }
}
