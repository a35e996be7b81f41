use crate::Error;

/// The settled (or not yet settled) result of a deferred computation.
#[derive(Debug, Clone)]
pub enum Outcome<T> {
    Value(T),
    Exception(Error),
    Cancelled {
        message: Option<String>,
        cause: Option<Error>,
    },
    /// Ask again later. Never stored as the final outcome of a promise.
    NotReady,
}

/// Lifecycle of a promise, derived from its slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PromiseStatus {
    NotStarted,
    Pending,
    /// Resolved with a value or an exception.
    Completed,
    /// Resolved with a cancellation.
    Aborted,
}

impl<T> Outcome<T> {
    pub fn cancelled(message: impl Into<String>) -> Self {
        Outcome::Cancelled {
            message: Some(message.into()),
            cause: None,
        }
    }

    pub fn cancelled_with(message: impl Into<String>, cause: Error) -> Self {
        Outcome::Cancelled {
            message: Some(message.into()),
            cause: Some(cause),
        }
    }

    pub fn is_value(&self) -> bool {
        matches!(self, Outcome::Value(_))
    }

    pub fn is_exception(&self) -> bool {
        matches!(self, Outcome::Exception(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Outcome::Cancelled { .. })
    }

    pub fn is_ready(&self) -> bool {
        !matches!(self, Outcome::NotReady)
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Outcome::Value(v) => Some(v),
            _ => None,
        }
    }

    /// The exception, or the cause of a cancellation.
    pub fn error(&self) -> Option<&Error> {
        match self {
            Outcome::Exception(e) => Some(e),
            Outcome::Cancelled { cause, .. } => cause.as_ref(),
            _ => None,
        }
    }

    pub fn message(&self) -> Option<&str> {
        match self {
            Outcome::Cancelled { message, .. } => message.as_deref(),
            _ => None,
        }
    }

    /// The status a promise holding this outcome reports.
    pub fn status(&self) -> PromiseStatus {
        match self {
            Outcome::Value(_) | Outcome::Exception(_) => PromiseStatus::Completed,
            Outcome::Cancelled { .. } => PromiseStatus::Aborted,
            Outcome::NotReady => PromiseStatus::Pending,
        }
    }

    pub fn map<R>(self, f: impl FnOnce(T) -> R) -> Outcome<R> {
        match self {
            Outcome::Value(v) => Outcome::Value(f(v)),
            other => other.cast(),
        }
    }

    /// Re-types a non-value outcome.
    ///
    /// A `Value` cannot change type here; it is reported as an illegal state.
    pub(crate) fn cast<R>(self) -> Outcome<R> {
        match self {
            Outcome::Value(_) => Outcome::Exception(Error::IllegalState(
                "a value cannot be re-typed without a mapper".into(),
            )),
            Outcome::Exception(e) => Outcome::Exception(e),
            Outcome::Cancelled { message, cause } => Outcome::Cancelled { message, cause },
            Outcome::NotReady => Outcome::NotReady,
        }
    }

    pub fn into_result(self) -> Result<T, Error> {
        match self {
            Outcome::Value(v) => Ok(v),
            Outcome::Exception(e) => Err(e),
            Outcome::Cancelled { message, .. } => Err(Error::Cancelled(message)),
            Outcome::NotReady => Err(Error::NotReady),
        }
    }
}

impl<T> From<Result<T, Error>> for Outcome<T> {
    fn from(result: Result<T, Error>) -> Self {
        match result {
            Ok(v) => Outcome::Value(v),
            Err(e) => Outcome::Exception(e),
        }
    }
}
