//! Circuit breaker with exponential backoff.
//!
//! Once `failure_threshold` consecutive calls have failed, further calls
//! fail fast with [`Error::ServiceUnreachable`] until the backoff window
//! since the last attempt has passed. The window starts at `base_backoff`
//! and doubles for every failure beyond the threshold. A single success
//! closes the circuit.
//!
//! The admission check only takes the read lock. Two callers admitted as
//! half-open trials at the same time may both reach the upstream.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::time::Duration;
use tokio::time::Instant;

use crate::config::BreakerConfig;
use crate::context::Context;
use crate::error::Error;
use crate::operation::Operation;

/// Observable state of a breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls pass through
    Closed { failures: u32 },

    /// Calls fail fast until `retry_at`
    Open { retry_at: Instant },

    /// The backoff has elapsed; the next call is a trial
    HalfOpen,
}

#[derive(Debug)]
struct FailureState {
    consecutive_failures: u32,
    last_attempt: Instant,
}

/// Failure-counting gate around an operation.
pub struct Breaker<O> {
    inner: O,
    config: BreakerConfig,
    state: RwLock<FailureState>,
}

impl<O: Operation> Breaker<O> {
    /// Open after `failure_threshold` consecutive failures, with the
    /// default two second base backoff.
    pub fn new(inner: O, failure_threshold: u32) -> Self {
        Self::with_config(
            inner,
            BreakerConfig {
                failure_threshold,
                ..Default::default()
            },
        )
    }

    /// Create a breaker from a full config.
    pub fn with_config(inner: O, config: BreakerConfig) -> Self {
        Self {
            inner,
            config,
            state: RwLock::new(FailureState {
                consecutive_failures: 0,
                last_attempt: Instant::now(),
            }),
        }
    }

    /// Current state as seen by the next caller.
    pub fn state(&self) -> CircuitState {
        let state = self.state.read();
        match self.retry_at(&state) {
            Some(retry_at) if Instant::now() <= retry_at => CircuitState::Open { retry_at },
            Some(_) => CircuitState::HalfOpen,
            None => CircuitState::Closed {
                failures: state.consecutive_failures,
            },
        }
    }

    /// Failures since the last success.
    pub fn consecutive_failures(&self) -> u32 {
        self.state.read().consecutive_failures
    }

    /// When the breaker will admit a trial, if it is past its threshold.
    fn retry_at(&self, state: &FailureState) -> Option<Instant> {
        let excess = state
            .consecutive_failures
            .checked_sub(self.config.failure_threshold)?;
        let backoff = backoff_window(self.config.base_backoff, excess, self.config.max_backoff);
        Some(
            state
                .last_attempt
                .checked_add(backoff)
                .unwrap_or_else(far_future),
        )
    }

    fn record(&self, succeeded: bool) {
        let mut state = self.state.write();
        state.last_attempt = Instant::now();

        if succeeded {
            if state.consecutive_failures >= self.config.failure_threshold {
                tracing::info!(
                    failures = state.consecutive_failures,
                    "Circuit closed after successful trial"
                );
            }
            state.consecutive_failures = 0;
            return;
        }

        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        if state.consecutive_failures >= self.config.failure_threshold {
            let excess = state.consecutive_failures - self.config.failure_threshold;
            let backoff =
                backoff_window(self.config.base_backoff, excess, self.config.max_backoff);
            tracing::warn!(
                failures = state.consecutive_failures,
                backoff = ?backoff,
                "Circuit open after repeated failures"
            );
        }
    }
}

#[async_trait]
impl<O: Operation> Operation for Breaker<O> {
    type Output = O::Output;

    async fn call(&self, ctx: &Context) -> Result<Self::Output, Error> {
        {
            let state = self.state.read();
            if let Some(retry_at) = self.retry_at(&state) {
                if Instant::now() <= retry_at {
                    return Err(Error::ServiceUnreachable);
                }
                tracing::debug!(
                    failures = state.consecutive_failures,
                    "Circuit half-open, admitting trial call"
                );
            }
        }

        let result = self.inner.call(ctx).await;
        self.record(result.is_ok());
        result
    }
}

/// Backoff after `excess` failures beyond the threshold: `base * 2^excess`,
/// saturating rather than overflowing, optionally capped.
pub fn backoff_window(base: Duration, excess: u32, cap: Option<Duration>) -> Duration {
    let factor = 1u32.checked_shl(excess).unwrap_or(u32::MAX);
    let window = base.saturating_mul(factor);
    match cap {
        Some(cap) => window.min(cap),
        None => window,
    }
}

// About thirty years out; far enough to be "never" for a breaker.
fn far_future() -> Instant {
    Instant::now() + Duration::from_secs(86_400 * 365 * 30)
}
