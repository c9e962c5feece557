//! Error taxonomy shared by every combinator.
//!
//! Errors are cheap to clone so that a cached outcome (debounce) can be
//! handed to many callers while still pointing at the same upstream error.

use std::sync::Arc;
use thiserror::Error;

/// Why a [`Context`](crate::Context) is done.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextError {
    #[error("context canceled")]
    Cancelled,

    #[error("context deadline exceeded")]
    DeadlineExceeded,
}

/// Errors produced by an operation or synthesized by a combinator.
#[derive(Error, Debug, Clone)]
pub enum Error {
    /// Whatever the wrapped operation returned, passed through verbatim.
    #[error("{0}")]
    Upstream(Arc<anyhow::Error>),

    /// The circuit breaker refused the call during its backoff window.
    #[error("service unreachable")]
    ServiceUnreachable,

    /// The throttle has no tokens left in the current period.
    #[error("too many calls")]
    TooManyCalls,

    /// The caller's context was cancelled or its deadline passed.
    #[error(transparent)]
    Context(#[from] ContextError),
}

impl Error {
    /// Wrap an upstream error.
    pub fn upstream(err: impl Into<anyhow::Error>) -> Self {
        Self::Upstream(Arc::new(err.into()))
    }

    /// Create an upstream error from a message.
    pub fn msg<M>(message: M) -> Self
    where
        M: std::fmt::Display + std::fmt::Debug + Send + Sync + 'static,
    {
        Self::Upstream(Arc::new(anyhow::Error::msg(message)))
    }

    /// True for errors surfaced from the caller's context.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Context(_))
    }

    /// True for errors returned by the wrapped operation itself.
    pub fn is_upstream(&self) -> bool {
        matches!(self, Self::Upstream(_))
    }

    /// The context error, if this is one.
    pub fn context_error(&self) -> Option<ContextError> {
        match self {
            Self::Context(e) => Some(*e),
            _ => None,
        }
    }

    /// Whether both errors are the same outcome.
    ///
    /// Upstream errors compare by identity, so two clones of one cached
    /// failure are the same while two independent failures with equal
    /// messages are not.
    pub fn same_as(&self, other: &Error) -> bool {
        match (self, other) {
            (Self::Upstream(a), Self::Upstream(b)) => Arc::ptr_eq(a, b),
            (Self::ServiceUnreachable, Self::ServiceUnreachable) => true,
            (Self::TooManyCalls, Self::TooManyCalls) => true,
            (Self::Context(a), Self::Context(b)) => a == b,
            _ => false,
        }
    }
}

/// Errors from loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Failed to parse JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {}", .0.join(", "))]
    Invalid(Vec<String>),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_match_wire_text() {
        assert_eq!(Error::ServiceUnreachable.to_string(), "service unreachable");
        assert_eq!(Error::TooManyCalls.to_string(), "too many calls");
        assert_eq!(
            Error::from(ContextError::DeadlineExceeded).to_string(),
            "context deadline exceeded"
        );
        assert_eq!(Error::msg("forced error").to_string(), "forced error");
    }

    #[test]
    fn test_same_as_uses_identity_for_upstream() {
        let a = Error::msg("boom");
        let b = Error::msg("boom");

        assert!(a.same_as(&a.clone()));
        assert!(!a.same_as(&b));
        assert!(Error::TooManyCalls.same_as(&Error::TooManyCalls));
        assert!(!Error::TooManyCalls.same_as(&Error::ServiceUnreachable));
    }

    #[test]
    fn test_invalid_config_lists_every_problem() {
        let err = ConfigError::Invalid(vec!["a".into(), "b".into()]);
        assert_eq!(err.to_string(), "Invalid configuration: a, b");
    }
}
