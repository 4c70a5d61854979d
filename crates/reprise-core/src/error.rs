use std::path::PathBuf;

use uuid::Uuid;

use crate::message::LockToken;

/// Invalid strategy parameters, handler options or configuration files.
/// Raised at construction or registration time, never while a message is
/// being processed.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("invalid handler option `{option}`: {reason}")]
    InvalidHandlerOption {
        option: &'static str,
        reason: &'static str,
    },

    #[error("error reading {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("error parsing {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

impl ConfigError {
    pub(crate) fn parameter(name: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }
}

/// Errors returned by a [`DelayStrategy`](crate::delay::DelayStrategy) when
/// it is asked about an attempt it cannot answer for.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum DelayError {
    #[error("attempt {attempt} out of range: should be between 1 and {max_attempts}")]
    AttemptOutOfRange { attempt: u32, max_attempts: u32 },

    #[error("attempt must be greater or equal to 1")]
    ZeroAttempt,

    #[error("delay strategy does not support computing a delay")]
    Unsupported,

    #[error("computed delay for attempt {attempt} does not fit in a duration")]
    Overflow { attempt: u32 },
}

/// Error type returned by a user handler. The variant decides what happens
/// to the delivery: retryable failures are rescheduled with a delay, anything
/// else is reported to the exception callback and abandoned.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error("retryable failure: {reason}")]
    Retryable {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error(transparent)]
    Permanent(Box<dyn std::error::Error + Send + Sync>),
}

impl HandlerError {
    /// A transient failure: the message should be tried again later.
    pub fn retryable(reason: impl Into<String>) -> Self {
        HandlerError::Retryable {
            reason: reason.into(),
            source: None,
        }
    }

    /// A transient failure caused by another error.
    pub fn retryable_from(
        reason: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        HandlerError::Retryable {
            reason: reason.into(),
            source: Some(source.into()),
        }
    }

    /// Any failure that should not be retried with a delay.
    pub fn permanent(source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        HandlerError::Permanent(source.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, HandlerError::Retryable { .. })
    }
}

/// Failures of the queue backend itself. These are never intercepted by the
/// reprocessor: they propagate to the backend's own fault handling, which
/// typically lets the lock expire and redelivers the message.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    #[error("lock lost or not found: {0}")]
    LockLost(LockToken),

    #[error("delivered message {0} carries no lock token")]
    MissingLockToken(Uuid),

    #[error("a message handler is already registered")]
    HandlerAlreadyRegistered,

    #[error("transaction aborted: {0}")]
    TransactionAborted(String),

    #[error("backend closed")]
    Closed,

    #[error("backend unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Strategy(#[from] DelayError),
}

/// Errors returned when registering a message handler.
#[derive(Debug, thiserror::Error)]
pub enum RegisterError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;
pub type DelayResult<T> = std::result::Result<T, DelayError>;
pub type BackendResult<T> = std::result::Result<T, BackendError>;
