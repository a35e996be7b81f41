use std::fmt;
use std::sync::Arc;

/// Errors carried by [`Outcome::Exception`](crate::Outcome::Exception) and
/// [`Outcome::Cancelled`](crate::Outcome::Cancelled).
///
/// Every variant is cheap to clone because one outcome is handed to every
/// listener of a promise.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Failed(Arc<dyn std::error::Error + Send + Sync + 'static>),
    #[error("{0}")]
    Message(String),
    #[error("panicked: {0}")]
    Panicked(String),
    #[error("cancelled: {}", .0.as_deref().unwrap_or("no message"))]
    Cancelled(Option<String>),
    #[error("result is not ready")]
    NotReady,
    #[error("illegal state: {0}")]
    IllegalState(String),
    /// One child of a fan-in failed.
    #[error("Promise#{index} of {total} failed: {source}")]
    Combine {
        index: usize,
        total: usize,
        #[source]
        source: Box<Error>,
    },
    #[error("the producer was dropped before resolving")]
    ProducerDropped,
}

impl Error {
    /// Wraps any error produced by a computation.
    pub fn failed<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Error::Failed(Arc::new(error))
    }

    pub fn msg(message: impl fmt::Display) -> Self {
        Error::Message(message.to_string())
    }

    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        Error::Panicked(panic_message(payload.as_ref()))
    }

    /// For a fan-in failure, the index of the child that failed.
    pub fn failed_index(&self) -> Option<(usize, usize)> {
        match self {
            Error::Combine { index, total, .. } => Some((*index, *total)),
            _ => None,
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Configuration could not be loaded.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}
