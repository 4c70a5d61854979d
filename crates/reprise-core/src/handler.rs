use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::HandlerError;
use crate::message::Message;

/// User message handler. Return [`HandlerError::Retryable`] to have the
/// message redelivered later; any other error abandons the delivery.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &Message, cancel: CancellationToken)
        -> Result<(), HandlerError>;
}

/// Adapter turning an async closure into a [`MessageHandler`].
pub struct HandlerFn<F>(F);

/// Wrap `f` as a shareable handler. The closure receives an owned copy of
/// the message.
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn MessageHandler>
where
    F: Fn(Message, CancellationToken) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
{
    Arc::new(HandlerFn(f))
}

#[async_trait]
impl<F, Fut> MessageHandler for HandlerFn<F>
where
    F: Fn(Message, CancellationToken) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send,
{
    async fn handle(
        &self,
        message: &Message,
        cancel: CancellationToken,
    ) -> Result<(), HandlerError> {
        (self.0)(message.clone(), cancel).await
    }
}
