pub mod attempt;
pub mod backend;
pub mod clock;
pub mod config;
pub mod delay;
pub mod error;
pub mod handler;
pub mod memory;
pub mod message;
pub mod metrics;
pub mod options;
pub mod reprocessor;
pub mod settings;
pub mod telemetry;

pub use attempt::{AttemptTracker, HeaderAttemptTracker};
pub use backend::{BackendOp, DeliveryHandler, QueueBackend, ScheduledId};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{load_config, DelayStrategyConfig, ReprocessorConfig};
pub use delay::{
    ConstantDelayStrategy, DelayStrategy, ExponentialDelayStrategy,
    ExponentialWithJitterDelayStrategy, LinearDelayStrategy, NoDelayStrategy,
};
pub use error::{BackendError, ConfigError, DelayError, HandlerError, RegisterError};
pub use handler::{handler_fn, MessageHandler};
pub use memory::{DeadLetter, InMemoryQueue};
pub use message::{LockToken, Message};
pub use options::{ExceptionAction, ExceptionCallback, ExceptionReceived, HandlerOptions};
pub use reprocessor::{Outcome, Reprocessor, EXCEEDED_RETRY_ATTEMPTS_REASON};
pub use settings::RetrySettings;
