//! The operation abstraction every combinator consumes and produces.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::{BreakerConfig, DebounceConfig, RetryConfig, ThrottleConfig};
use crate::context::Context;
use crate::error::Error;
use crate::resilience::{Breaker, DebounceFirst, DebounceLast, Retry, Throttle};

/// A cancellable, fallible unit of remote work.
///
/// Implementations may be invoked repeatedly and concurrently. The context
/// must be passed through to any nested operation unchanged.
#[async_trait]
pub trait Operation: Send + Sync {
    /// Value produced on success.
    type Output: Send + 'static;

    /// Run the operation once.
    async fn call(&self, ctx: &Context) -> Result<Self::Output, Error>;
}

#[async_trait]
impl<O> Operation for Arc<O>
where
    O: Operation + ?Sized,
{
    type Output = O::Output;

    async fn call(&self, ctx: &Context) -> Result<Self::Output, Error> {
        (**self).call(ctx).await
    }
}

#[async_trait]
impl<O> Operation for Box<O>
where
    O: Operation + ?Sized,
{
    type Output = O::Output;

    async fn call(&self, ctx: &Context) -> Result<Self::Output, Error> {
        (**self).call(ctx).await
    }
}

/// An operation backed by an async closure. See [`operation_fn`].
#[derive(Clone)]
pub struct OperationFn<F> {
    f: F,
}

/// Turn an async closure taking a [`Context`] into an [`Operation`].
///
/// ```rust,ignore
/// let op = operation_fn(|_ctx| async { Ok::<_, Error>("response") });
/// ```
pub fn operation_fn<F, Fut, T>(f: F) -> OperationFn<F>
where
    F: Fn(Context) -> Fut + Send + Sync,
    Fut: Future<Output = Result<T, Error>> + Send + 'static,
    T: Send + 'static,
{
    OperationFn { f }
}

#[async_trait]
impl<F, Fut, T> Operation for OperationFn<F>
where
    F: Fn(Context) -> Fut + Send + Sync,
    Fut: Future<Output = Result<T, Error>> + Send + 'static,
    T: Send + 'static,
{
    type Output = T;

    async fn call(&self, ctx: &Context) -> Result<T, Error> {
        (self.f)(ctx.clone()).await
    }
}

/// Builder-style wrapping. Each method nests `self` inside a combinator.
pub trait OperationExt: Operation + Sized {
    /// Wrap in a circuit breaker.
    fn with_breaker(self, config: BreakerConfig) -> Breaker<Self> {
        Breaker::with_config(self, config)
    }

    /// Wrap in a bounded retry with fixed delay.
    fn with_retry(self, max_retries: u32, delay: Duration) -> Retry<Self> {
        Retry::with_config(self, RetryConfig { max_retries, delay })
    }

    /// Wrap in a token-bucket throttle.
    fn with_throttle(self, config: ThrottleConfig) -> Throttle<Self> {
        Throttle::with_config(self, config)
    }

    /// Serve the first result for `window` after each real call.
    fn debounce_first(self, window: Duration) -> DebounceFirst<Self>
    where
        Self::Output: Clone,
    {
        DebounceFirst::new(self, window)
    }

    /// Coalesce bursts into one call after activity stops.
    fn debounce_last(self, config: DebounceConfig) -> DebounceLast<Self>
    where
        Self: 'static,
        Self::Output: Clone,
    {
        DebounceLast::with_config(self, config)
    }
}

impl<O: Operation> OperationExt for O {}
