use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::attempt::{AttemptTracker, HeaderAttemptTracker};
use crate::backend::{self, BackendOp, DeliveryHandler, QueueBackend, ScheduledId};
use crate::clock::{Clock, SystemClock};
use crate::error::{BackendResult, HandlerError, RegisterError};
use crate::handler::MessageHandler;
use crate::message::{LockToken, Message};
use crate::metrics::Metrics;
use crate::options::{ExceptionAction, ExceptionCallback, ExceptionReceived, HandlerOptions};
use crate::settings::RetrySettings;

/// Dead-letter reason used when a retryable message runs out of attempts.
pub const EXCEEDED_RETRY_ATTEMPTS_REASON: &str = "Exceed retry attempts.";

/// How a single delivery was settled.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Completed,
    Abandoned,
    DeadLettered,
    /// A copy was scheduled for `visible_at_ns` and the original completed.
    Rescheduled {
        attempt: u32,
        delay: Duration,
        visible_at_ns: u64,
        clone_id: Uuid,
    },
}

/// Decorates a queue backend so that handlers can ask for delayed
/// redelivery by failing with [`HandlerError::Retryable`].
///
/// Every delivery ends in exactly one of complete, abandon, dead-letter or
/// reschedule. Rescheduling submits a copy of the message carrying an
/// incremented attempt count for delayed delivery and completes the original,
/// both through a single [`QueueBackend::commit`].
pub struct Reprocessor<B: QueueBackend + ?Sized> {
    core: Core<B>,
}

struct Core<B: ?Sized> {
    backend: Arc<B>,
    settings: RetrySettings,
    tracker: Arc<dyn AttemptTracker>,
    clock: Arc<dyn Clock>,
    metrics: Arc<Metrics>,
}

impl<B: ?Sized> Clone for Core<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
            settings: self.settings.clone(),
            tracker: Arc::clone(&self.tracker),
            clock: Arc::clone(&self.clock),
            metrics: Arc::clone(&self.metrics),
        }
    }
}

impl<B: QueueBackend + ?Sized + 'static> Reprocessor<B> {
    pub fn new(backend: Arc<B>, settings: RetrySettings) -> Self {
        Self {
            core: Core {
                backend,
                settings,
                tracker: Arc::new(HeaderAttemptTracker),
                clock: Arc::new(SystemClock),
                metrics: Arc::new(Metrics::new()),
            },
        }
    }

    pub fn with_attempt_tracker(mut self, tracker: Arc<dyn AttemptTracker>) -> Self {
        self.core.tracker = tracker;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.core.clock = clock;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.core.metrics = metrics;
        self
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.core.backend
    }

    pub fn entity_path(&self) -> &str {
        self.core.backend.entity_path()
    }

    pub fn client_id(&self) -> &str {
        self.core.backend.client_id()
    }

    pub fn endpoint(&self) -> &str {
        self.core.backend.endpoint()
    }

    /// Register `handler` with the backend. `None` options register with the
    /// defaults (no auto-ack, one handler at a time, no exception callback).
    ///
    /// Fails without touching the backend if the options allow auto-ack or
    /// more than one concurrent handler.
    #[tracing::instrument(skip_all, fields(entity = %self.entity_path()))]
    pub async fn register_handler(
        &self,
        handler: Arc<dyn MessageHandler>,
        options: Option<HandlerOptions>,
    ) -> Result<(), RegisterError> {
        let options = options.unwrap_or_default();
        options.validate()?;

        let delivery = Arc::new(RetryingHandler {
            core: self.core.clone(),
            handler,
            options: options.clone(),
        });
        self.core
            .backend
            .register_message_handler(delivery, options)
            .await?;

        info!("message handler registered");
        Ok(())
    }

    /// Register with default options and the given exception callback.
    pub async fn register_handler_with_callback(
        &self,
        handler: Arc<dyn MessageHandler>,
        callback: ExceptionCallback,
    ) -> Result<(), RegisterError> {
        self.register_handler(handler, Some(HandlerOptions::new(callback)))
            .await
    }

    /// Run `handler` against one delivered message and settle the delivery.
    /// Used by registered handlers; also usable directly by pull consumers.
    pub async fn process(
        &self,
        handler: &dyn MessageHandler,
        options: &HandlerOptions,
        message: Message,
        cancel: CancellationToken,
    ) -> BackendResult<Outcome> {
        self.core.process(handler, options, message, cancel).await
    }

    pub async fn unregister(&self, drain_timeout: Duration) -> BackendResult<()> {
        self.core
            .backend
            .unregister_message_handler(drain_timeout)
            .await
    }

    pub async fn complete(&self, lock_token: LockToken) -> BackendResult<()> {
        self.core.backend.complete(lock_token).await
    }

    pub async fn abandon(
        &self,
        lock_token: LockToken,
        properties_to_modify: Option<HashMap<String, String>>,
    ) -> BackendResult<()> {
        self.core
            .backend
            .abandon(lock_token, properties_to_modify)
            .await
    }

    pub async fn dead_letter(
        &self,
        lock_token: LockToken,
        reason: &str,
        description: Option<&str>,
    ) -> BackendResult<()> {
        self.core
            .backend
            .dead_letter(lock_token, reason, description)
            .await
    }

    pub async fn send(&self, message: Message) -> BackendResult<()> {
        self.core.backend.send(message).await
    }

    pub async fn schedule(
        &self,
        message: Message,
        visible_at_ns: u64,
    ) -> BackendResult<ScheduledId> {
        self.core.backend.schedule(message, visible_at_ns).await
    }

    pub async fn close(&self) -> BackendResult<()> {
        self.core.backend.close().await
    }
}

impl<B: QueueBackend + ?Sized> Core<B> {
    #[tracing::instrument(
        skip_all,
        fields(entity = %self.backend.entity_path(), message_id = %message.id)
    )]
    async fn process(
        &self,
        handler: &dyn MessageHandler,
        options: &HandlerOptions,
        message: Message,
        cancel: CancellationToken,
    ) -> BackendResult<Outcome> {
        let lock_token = backend::lock_token(&message)?;
        let entity = self.backend.entity_path();

        match handler.handle(&message, cancel).await {
            Ok(()) => {
                self.backend.complete(lock_token).await?;
                self.metrics.record_complete(entity);
                debug!("message completed");
                Ok(Outcome::Completed)
            }
            Err(error @ HandlerError::Retryable { .. }) => {
                debug!(%error, "retryable failure");
                self.delay(&message, lock_token).await
            }
            Err(error) => {
                options.notify_exception(&ExceptionReceived {
                    error: &error,
                    action: ExceptionAction::UserCallback,
                    endpoint: self.backend.endpoint(),
                    entity_path: entity,
                    client_id: self.backend.client_id(),
                    message_id: message.id,
                });
                self.backend.abandon(lock_token, None).await?;
                self.metrics.record_abandon(entity);
                debug!(%error, "message abandoned");
                Ok(Outcome::Abandoned)
            }
        }
    }

    async fn delay(&self, message: &Message, lock_token: LockToken) -> BackendResult<Outcome> {
        let entity = self.backend.entity_path();
        let strategy = self.settings.strategy();
        let attempt = self.tracker.get_attempt(message).saturating_add(1);

        if !strategy.can_delay(attempt)? {
            self.backend
                .dead_letter(lock_token, EXCEEDED_RETRY_ATTEMPTS_REASON, None)
                .await?;
            self.metrics.record_dead_letter(entity);
            warn!(attempt, "retry attempts exhausted, message dead-lettered");
            return Ok(Outcome::DeadLettered);
        }

        let delay = strategy.get_delay(attempt)?;
        let delay_ns = u64::try_from(delay.as_nanos()).unwrap_or(u64::MAX);
        let visible_at_ns = self.clock.now_ns().saturating_add(delay_ns);

        // Fresh identity so duplicate detection does not swallow the copy.
        let mut copy = message.clone_for_redelivery();
        self.tracker.set_attempt(&mut copy, attempt);
        copy.scheduled_enqueue_time_ns = Some(visible_at_ns);
        let clone_id = copy.id;

        // Schedule first: if the batch is applied non-atomically and stops
        // halfway, the original is still outstanding and nothing is lost.
        self.backend
            .commit(vec![
                BackendOp::Schedule {
                    message: copy,
                    visible_at_ns,
                },
                BackendOp::Complete { lock_token },
            ])
            .await?;

        self.metrics.record_reschedule(entity, attempt);
        debug!(
            attempt,
            delay_ms = delay.as_millis() as u64,
            %clone_id,
            "message rescheduled"
        );
        Ok(Outcome::Rescheduled {
            attempt,
            delay,
            visible_at_ns,
            clone_id,
        })
    }
}

/// The handler actually registered with the backend.
struct RetryingHandler<B: ?Sized> {
    core: Core<B>,
    handler: Arc<dyn MessageHandler>,
    options: HandlerOptions,
}

#[async_trait]
impl<B: QueueBackend + ?Sized + 'static> DeliveryHandler for RetryingHandler<B> {
    async fn on_message(&self, message: Message, cancel: CancellationToken) -> BackendResult<()> {
        self.core
            .process(self.handler.as_ref(), &self.options, message, cancel)
            .await
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests;
