use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::{BackendError, BackendResult};
use crate::message::{LockToken, Message};
use crate::options::HandlerOptions;

/// Backend-assigned identifier of a scheduled message.
pub type ScheduledId = u64;

/// A single operation in an atomic backend batch.
#[derive(Debug, Clone, PartialEq)]
pub enum BackendOp {
    Schedule { message: Message, visible_at_ns: u64 },
    Complete { lock_token: LockToken },
}

/// Callback the backend invokes for every delivered message. Errors are
/// backend failures raised while settling the delivery; the backend handles
/// them the way it handles any faulted delivery.
#[async_trait]
pub trait DeliveryHandler: Send + Sync {
    async fn on_message(&self, message: Message, cancel: CancellationToken) -> BackendResult<()>;
}

/// The narrow slice of a queue client that reprocessing needs.
#[async_trait]
pub trait QueueBackend: Send + Sync {
    /// Queue name, used for logging, metrics and exception context.
    fn entity_path(&self) -> &str;

    fn client_id(&self) -> &str;

    /// Host of the broker or namespace the backend is connected to.
    fn endpoint(&self) -> &str;

    async fn register_message_handler(
        &self,
        handler: Arc<dyn DeliveryHandler>,
        options: HandlerOptions,
    ) -> BackendResult<()>;

    /// Stop delivering and give in-flight handlers up to `drain_timeout` to
    /// finish.
    async fn unregister_message_handler(&self, drain_timeout: Duration) -> BackendResult<()>;

    async fn complete(&self, lock_token: LockToken) -> BackendResult<()>;

    async fn abandon(
        &self,
        lock_token: LockToken,
        properties_to_modify: Option<HashMap<String, String>>,
    ) -> BackendResult<()>;

    async fn dead_letter(
        &self,
        lock_token: LockToken,
        reason: &str,
        description: Option<&str>,
    ) -> BackendResult<()>;

    /// Enqueue `message` so it only becomes visible at `visible_at_ns`.
    async fn schedule(&self, message: Message, visible_at_ns: u64) -> BackendResult<ScheduledId>;

    async fn send(&self, message: Message) -> BackendResult<()>;

    async fn close(&self) -> BackendResult<()>;

    /// Apply a batch of operations as one unit.
    ///
    /// Backends with transactions must override this to be all-or-nothing.
    /// The default applies the operations one by one in order and stops at
    /// the first failure, leaving earlier operations applied.
    async fn commit(&self, ops: Vec<BackendOp>) -> BackendResult<()> {
        apply_in_order(self, ops).await
    }
}

/// Apply `ops` one by one, stopping at the first failure. Operations applied
/// before the failure stay applied.
pub async fn apply_in_order<B: QueueBackend + ?Sized>(
    backend: &B,
    ops: Vec<BackendOp>,
) -> BackendResult<()> {
    for op in ops {
        match op {
            BackendOp::Schedule {
                message,
                visible_at_ns,
            } => {
                backend.schedule(message, visible_at_ns).await?;
            }
            BackendOp::Complete { lock_token } => backend.complete(lock_token).await?,
        }
    }
    Ok(())
}

/// Lock token of a delivered message.
pub fn lock_token(message: &Message) -> BackendResult<LockToken> {
    message
        .lock_token
        .ok_or(BackendError::MissingLockToken(message.id))
}
