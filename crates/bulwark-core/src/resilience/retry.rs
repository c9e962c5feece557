//! Bounded retry with a fixed, cancellable delay.

use async_trait::async_trait;
use std::time::Duration;

use crate::config::RetryConfig;
use crate::context::Context;
use crate::error::Error;
use crate::operation::Operation;

/// Re-invokes a failing operation until the attempt count exceeds
/// `max_retries`.
///
/// The count starts at zero for the first call, so an always-failing
/// upstream is invoked `max_retries + 2` times before its last error is
/// returned.
///
/// If the caller's context is done while waiting between attempts, the
/// last attempt's own error is returned rather than a cancellation error.
pub struct Retry<O> {
    inner: O,
    config: RetryConfig,
}

impl<O: Operation> Retry<O> {
    /// Retry `inner` with a fixed `delay` between attempts.
    pub fn new(inner: O, max_retries: u32, delay: Duration) -> Self {
        Self::with_config(inner, RetryConfig { max_retries, delay })
    }

    /// Build from a loaded [`RetryConfig`].
    pub fn with_config(inner: O, config: RetryConfig) -> Self {
        Self { inner, config }
    }
}

#[async_trait]
impl<O: Operation> Operation for Retry<O> {
    type Output = O::Output;

    async fn call(&self, ctx: &Context) -> Result<Self::Output, Error> {
        let mut attempt: u32 = 0;

        loop {
            let err = match self.inner.call(ctx).await {
                Ok(value) => return Ok(value),
                Err(err) if attempt > self.config.max_retries => return Err(err),
                Err(err) => err,
            };
            attempt += 1;

            tracing::warn!(
                attempt,
                delay = ?self.config.delay,
                error = %err,
                "Attempt failed, retrying"
            );

            tokio::select! {
                _ = tokio::time::sleep(self.config.delay) => {}
                _ = ctx.done() => return Err(err),
            }
        }
    }
}
