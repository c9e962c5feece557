//! Trailing-edge debounce.
//!
//! Every call pushes the quiet-period deadline to `now + window` and
//! returns whatever result is currently cached (`None` until the first
//! delayed call completes). A single poller task watches the deadline and,
//! once calls have stopped for a full window, runs the operation once and
//! caches the outcome.
//!
//! # Poller lifecycle
//!
//! ```text
//! Idle --call--> Armed --quiet--> Firing --done--> Idle
//!                  |                 |
//!                  |                 +--call while firing--> Armed
//!                  +--ctx done--> Idle (ctx error cached, no upstream call)
//! ```
//!
//! All transitions and the deadline live under one lock, so a tick can
//! never miss or double-fire against a concurrent call.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::DebounceConfig;
use crate::context::Context;
use crate::error::Error;
use crate::operation::Operation;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Armed,
    Firing { rearm: bool },
}

struct State<V> {
    threshold: Instant,
    result: Option<Result<V, Error>>,
    phase: Phase,
}

struct Shared<O: Operation> {
    inner: O,
    state: Mutex<State<O::Output>>,
}

/// Coalesces bursts of calls into one delayed call.
pub struct DebounceLast<O: Operation> {
    shared: Arc<Shared<O>>,
    config: DebounceConfig,
    shutdown: CancellationToken,
}

impl<O> DebounceLast<O>
where
    O: Operation + 'static,
    O::Output: Clone,
{
    /// Fire once calls have been quiet for `window`.
    pub fn new(inner: O, window: Duration) -> Self {
        Self::with_config(inner, DebounceConfig::window(window))
    }

    /// # Panics
    ///
    /// Panics if `config.poll_interval` is zero.
    pub fn with_config(inner: O, config: DebounceConfig) -> Self {
        assert!(
            !config.poll_interval.is_zero(),
            "debounce poll interval must be greater than zero"
        );

        Self {
            shared: Arc::new(Shared {
                inner,
                state: Mutex::new(State {
                    threshold: Instant::now(),
                    result: None,
                    phase: Phase::Idle,
                }),
            }),
            config,
            shutdown: CancellationToken::new(),
        }
    }

    /// Whether a delayed call is pending or running.
    pub fn is_armed(&self) -> bool {
        self.shared.state.lock().phase != Phase::Idle
    }

    fn spawn_poller(&self, ctx: Context) {
        let shared = self.shared.clone();
        let shutdown = self.shutdown.clone();
        let poll = self.config.poll_interval;

        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + poll, poll);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    cause = ctx.done() => {
                        let mut state = shared.state.lock();
                        state.result = Some(Err(cause.into()));
                        state.phase = Phase::Idle;
                        tracing::debug!(cause = %cause, "Debounce poller cancelled before firing");
                        return;
                    }
                    _ = shutdown.cancelled() => return,
                    _ = ticker.tick() => {
                        {
                            let mut state = shared.state.lock();
                            if Instant::now() <= state.threshold {
                                continue;
                            }
                            state.phase = Phase::Firing { rearm: false };
                        }

                        tracing::debug!("Debounce quiet period elapsed, firing");
                        let result = shared.inner.call(&ctx).await;

                        let mut state = shared.state.lock();
                        state.result = Some(result);
                        match state.phase {
                            Phase::Firing { rearm: true } => state.phase = Phase::Armed,
                            _ => {
                                state.phase = Phase::Idle;
                                return;
                            }
                        }
                    }
                }
            }
        });
    }
}

impl<O: Operation> Drop for DebounceLast<O> {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

#[async_trait]
impl<O> Operation for DebounceLast<O>
where
    O: Operation + 'static,
    O::Output: Clone,
{
    type Output = Option<O::Output>;

    async fn call(&self, ctx: &Context) -> Result<Self::Output, Error> {
        let (current, start) = {
            let mut state = self.shared.state.lock();
            state.threshold = Instant::now() + self.config.window;

            let start = match state.phase {
                Phase::Idle => {
                    state.phase = Phase::Armed;
                    true
                }
                Phase::Firing { .. } => {
                    state.phase = Phase::Firing { rearm: true };
                    false
                }
                Phase::Armed => false,
            };

            (state.result.clone(), start)
        };

        if start {
            tracing::debug!(window = ?self.config.window, "Debounce poller armed");
            self.spawn_poller(ctx.clone());
        }

        current.transpose()
    }
}
