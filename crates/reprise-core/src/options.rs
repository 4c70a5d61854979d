use std::fmt;
use std::sync::Arc;

use uuid::Uuid;

use crate::error::{ConfigError, ConfigResult, HandlerError};

/// What the backend was doing when the error surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionAction {
    /// The user handler failed.
    UserCallback,
}

/// Context handed to the exception callback when a handler fails permanently.
#[derive(Debug)]
pub struct ExceptionReceived<'a> {
    pub error: &'a HandlerError,
    pub action: ExceptionAction,
    pub endpoint: &'a str,
    pub entity_path: &'a str,
    pub client_id: &'a str,
    pub message_id: Uuid,
}

pub type ExceptionCallback = Arc<dyn Fn(&ExceptionReceived<'_>) + Send + Sync>;

/// Options fixed at handler registration.
#[derive(Clone)]
pub struct HandlerOptions {
    /// Complete every delivery as soon as the handler returns `Ok`. Must stay
    /// `false` for reprocessing: the outcome has to be classified first.
    pub auto_ack: bool,
    /// Must be `1` for reprocessing so that attempt bookkeeping, completion
    /// and rescheduling of one delivery never interleave with another.
    pub max_concurrent_handlers: usize,
    pub exception_callback: Option<ExceptionCallback>,
}

impl HandlerOptions {
    pub fn new(exception_callback: ExceptionCallback) -> Self {
        Self {
            exception_callback: Some(exception_callback),
            ..Self::default()
        }
    }

    /// Reject options that break reprocessing, naming the offending option.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.auto_ack {
            return Err(ConfigError::InvalidHandlerOption {
                option: "auto_ack",
                reason: "should be set to false",
            });
        }
        if self.max_concurrent_handlers != 1 {
            return Err(ConfigError::InvalidHandlerOption {
                option: "max_concurrent_handlers",
                reason: "should be set to 1",
            });
        }
        Ok(())
    }

    pub(crate) fn notify_exception(&self, args: &ExceptionReceived<'_>) {
        if let Some(callback) = &self.exception_callback {
            callback(args);
        }
    }
}

impl Default for HandlerOptions {
    fn default() -> Self {
        Self {
            auto_ack: false,
            max_concurrent_handlers: 1,
            exception_callback: None,
        }
    }
}

impl fmt::Debug for HandlerOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerOptions")
            .field("auto_ack", &self.auto_ack)
            .field("max_concurrent_handlers", &self.max_concurrent_handlers)
            .field(
                "exception_callback",
                &self.exception_callback.as_ref().map(|_| "<callback>"),
            )
            .finish()
    }
}
