//! Resilience combinators.
//!
//! This module provides:
//! - Circuit breaker with exponential backoff
//! - Token-bucket throttle with background refill
//! - Leading-edge and trailing-edge debounce
//! - Bounded retry with cancellable delay
//! - Deadline race for context-unaware functions
//!
//! Each combinator owns its state and, where it needs one, its background
//! task. Combinators never call each other; they compose by nesting.

mod circuit_breaker;
mod debounce_first;
mod debounce_last;
mod retry;
mod throttle;
mod timeout;

pub use circuit_breaker::{backoff_window, Breaker, CircuitState};
pub use debounce_first::DebounceFirst;
pub use debounce_last::DebounceLast;
pub use retry::Retry;
pub use throttle::{RefillState, Throttle};
pub use timeout::{BlockingTimeout, Timeout};
