use core::time::Duration;

/// Result of an operation that may be deferred by the rate limiter.
///
/// Running out of quota is not an error: callers receive [`Outcome::RetryAfter`] and are
/// expected to hand the whole unit of work back to whatever schedules it.
#[must_use]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T> {
    /// The operation ran to completion
    Complete(T),

    /// Quota is exhausted; resume no earlier than the given delay
    RetryAfter(Duration),
}

impl<T> Outcome<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U> {
        match self {
            Self::Complete(value) => Outcome::Complete(f(value)),
            Self::RetryAfter(delay) => Outcome::RetryAfter(delay),
        }
    }

    #[must_use]
    pub const fn is_complete(&self) -> bool {
        matches!(self, Self::Complete(_))
    }

    #[must_use]
    pub const fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::Complete(_) => None,
            Self::RetryAfter(delay) => Some(*delay),
        }
    }

    /// Extract the completed value, if any
    #[must_use]
    pub fn complete(self) -> Option<T> {
        match self {
            Self::Complete(value) => Some(value),
            Self::RetryAfter(_) => None,
        }
    }
}

/// Unwrap `Outcome::Complete` or return `Ok(Outcome::RetryAfter(..))` from the enclosing function
#[macro_export]
macro_rules! try_outcome {
    ($expr:expr) => {
        match $expr {
            $crate::Outcome::Complete(value) => value,
            $crate::Outcome::RetryAfter(delay) => return Ok($crate::Outcome::RetryAfter(delay)),
        }
    };
}
