//! # bulwark-core
//!
//! Resilience combinators for calls to unreliable downstream services.
//!
//! Every combinator takes an [`Operation`] and returns a new `Operation`
//! with one fixed fault-tolerance policy added:
//!
//! 1. **Breaker**: fail fast after repeated failures, with exponential backoff
//! 2. **Throttle**: token bucket refilled on a fixed period
//! 3. **DebounceFirst**: serve the first result for a window
//! 4. **DebounceLast**: coalesce a burst into one delayed call
//! 5. **Retry**: bounded re-invocation with a fixed, cancellable delay
//! 6. **Timeout**: race a context-unaware function against a deadline
//!
//! Combinators compose by nesting one inside another's constructor.
//!
//! ## Example
//!
//! ```rust,ignore
//! use bulwark_core::{operation_fn, Breaker, Context, Error, Operation, Retry};
//! use std::time::Duration;
//!
//! let fetch = operation_fn(|ctx: Context| async move { call_downstream(ctx).await });
//! let guarded = Breaker::new(Retry::new(fetch, 2, Duration::from_millis(200)), 5);
//!
//! match guarded.call(&Context::with_timeout(Duration::from_secs(3))).await {
//!     Ok(body) => println!("{}", body),
//!     Err(Error::ServiceUnreachable) => println!("circuit open"),
//!     Err(e) => println!("failed: {}", e),
//! }
//! ```

pub mod config;
pub mod context;
pub mod error;
pub mod operation;
pub mod resilience;

// Re-export main types at crate root
pub use config::{
    BreakerConfig, DebounceConfig, ResilienceConfig, RetryConfig, ThrottleConfig, TimeoutConfig,
};
pub use context::Context;
pub use error::{ConfigError, ContextError, Error};
pub use operation::{operation_fn, Operation, OperationExt, OperationFn};
pub use resilience::{
    BlockingTimeout, Breaker, CircuitState, DebounceFirst, DebounceLast, RefillState, Retry,
    Throttle, Timeout,
};
