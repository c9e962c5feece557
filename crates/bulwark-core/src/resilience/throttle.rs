//! Token-bucket throttle with periodic refill.
//!
//! The bucket starts full. Each admitted call takes one token; a call that
//! finds the bucket empty fails with [`Error::TooManyCalls`] without
//! reaching the upstream. A background task adds `refill` tokens every
//! `period`, never exceeding `max`.
//!
//! The refill task is started by the first call and is bound to that
//! call's context: once it is cancelled the task exits for good and the
//! bucket is never refilled again. Dropping the throttle also stops it.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::ThrottleConfig;
use crate::context::Context;
use crate::error::Error;
use crate::operation::Operation;

/// Lifecycle of the refill task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefillState {
    /// No call has been made yet
    Idle,

    /// Refilling every period
    Running,

    /// The bound context was cancelled; the bucket will not refill
    Stopped,
}

#[derive(Debug)]
struct Bucket {
    tokens: u32,
    refill_state: RefillState,
}

impl Bucket {
    fn refill(&mut self, amount: u32, max: u32) {
        self.tokens = self.tokens.saturating_add(amount).min(max);
    }
}

/// Rate limiter admitting at most `max` calls per burst.
pub struct Throttle<O> {
    inner: O,
    config: ThrottleConfig,
    bucket: Arc<Mutex<Bucket>>,
    shutdown: CancellationToken,
}

impl<O: Operation> Throttle<O> {
    /// Bucket of `max` tokens, topped up by `refill` every `period`.
    ///
    /// # Panics
    ///
    /// Panics if `max` is zero or `period` is zero.
    pub fn new(inner: O, max: u32, refill: u32, period: Duration) -> Self {
        Self::with_config(inner, ThrottleConfig { max, refill, period })
    }

    /// Create a throttle from a config.
    ///
    /// # Panics
    ///
    /// Panics if `config.max` is zero or `config.period` is zero.
    pub fn with_config(inner: O, config: ThrottleConfig) -> Self {
        assert!(config.max > 0, "throttle bucket size must be greater than zero");
        assert!(!config.period.is_zero(), "throttle refill period must be greater than zero");

        Self {
            inner,
            bucket: Arc::new(Mutex::new(Bucket {
                tokens: config.max,
                refill_state: RefillState::Idle,
            })),
            config,
            shutdown: CancellationToken::new(),
        }
    }

    /// Tokens currently in the bucket.
    pub fn available_tokens(&self) -> u32 {
        self.bucket.lock().tokens
    }

    /// Whether the refill task has started or stopped.
    pub fn refill_state(&self) -> RefillState {
        self.bucket.lock().refill_state
    }

    /// Start the refill task if nothing has started it yet.
    ///
    /// Must be called with the bucket lock held so concurrent first calls
    /// cannot both start a task.
    fn ensure_refill(&self, bucket: &mut Bucket, ctx: &Context) {
        if bucket.refill_state != RefillState::Idle {
            return;
        }
        bucket.refill_state = RefillState::Running;

        let shared = self.bucket.clone();
        let shutdown = self.shutdown.clone();
        let ctx = ctx.clone();
        let (max, refill, period) = (self.config.max, self.config.refill, self.config.period);

        tokio::spawn(async move {
            tracing::debug!(max, refill, period = ?period, "Throttle refill task started");

            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    cause = ctx.done() => {
                        shared.lock().refill_state = RefillState::Stopped;
                        tracing::debug!(cause = %cause, "Throttle refill task stopped by context");
                        return;
                    }
                    _ = shutdown.cancelled() => {
                        tracing::debug!("Throttle refill task stopped by drop");
                        return;
                    }
                    _ = ticker.tick() => {
                        shared.lock().refill(refill, max);
                    }
                }
            }
        });
    }
}

impl<O> Drop for Throttle<O> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[async_trait]
impl<O: Operation> Operation for Throttle<O> {
    type Output = O::Output;

    async fn call(&self, ctx: &Context) -> Result<Self::Output, Error> {
        if let Some(cause) = ctx.err() {
            return Err(cause.into());
        }

        {
            let mut bucket = self.bucket.lock();
            self.ensure_refill(&mut bucket, ctx);

            if bucket.tokens == 0 {
                tracing::debug!("Throttle rejected call, bucket empty");
                return Err(Error::TooManyCalls);
            }
            bucket.tokens -= 1;
        }

        self.inner.call(ctx).await
    }
}
