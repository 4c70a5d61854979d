#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use reprise_core::{
    AttemptTracker, ConstantDelayStrategy, HandlerError, HeaderAttemptTracker, InMemoryQueue,
    Message, MessageHandler, Reprocessor, RetrySettings,
};
use tokio_util::sync::CancellationToken;

/// What a handler saw on one invocation.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub message: Message,
    pub attempt: u32,
    pub at: Instant,
}

/// Shared log of handler invocations.
#[derive(Clone, Default)]
pub struct Deliveries(Arc<Mutex<Vec<Delivery>>>);

impl Deliveries {
    pub fn record(&self, message: &Message) -> usize {
        let mut log = self.0.lock().unwrap();
        log.push(Delivery {
            message: message.clone(),
            attempt: HeaderAttemptTracker.get_attempt(message),
            at: Instant::now(),
        });
        log.len()
    }

    pub fn len(&self) -> usize {
        self.0.lock().unwrap().len()
    }

    pub fn attempts(&self) -> Vec<u32> {
        self.0.lock().unwrap().iter().map(|d| d.attempt).collect()
    }

    pub fn all(&self) -> Vec<Delivery> {
        self.0.lock().unwrap().clone()
    }
}

/// Handler that records every delivery and fails with a retryable error
/// for the first `failures` invocations.
pub fn flaky(deliveries: &Deliveries, failures: usize) -> Arc<dyn MessageHandler> {
    let deliveries = deliveries.clone();
    reprise_core::handler_fn(move |message: Message, _cancel: CancellationToken| {
        let invocation = deliveries.record(&message);
        async move {
            if invocation <= failures {
                Err(HandlerError::retryable("downstream busy"))
            } else {
                Ok(())
            }
        }
    })
}

/// Handler that records every delivery and always fails permanently.
pub fn poison(deliveries: &Deliveries) -> Arc<dyn MessageHandler> {
    let deliveries = deliveries.clone();
    reprise_core::handler_fn(move |message: Message, _cancel: CancellationToken| {
        deliveries.record(&message);
        async move { Err::<(), _>(HandlerError::permanent("malformed order")) }
    })
}

pub fn constant(max_attempts: u32, delay: Duration) -> RetrySettings {
    RetrySettings::new(ConstantDelayStrategy::new(max_attempts, delay).unwrap())
}

pub fn setup(
    queue: InMemoryQueue,
    settings: RetrySettings,
) -> (Arc<InMemoryQueue>, Reprocessor<InMemoryQueue>) {
    let queue = Arc::new(queue);
    let reprocessor = Reprocessor::new(Arc::clone(&queue), settings);
    (queue, reprocessor)
}

/// Poll `condition` until it holds, panicking after `timeout`.
pub async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + timeout;
    while !condition() {
        assert!(Instant::now() < deadline, "condition not met within {timeout:?}");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

pub const WAIT: Duration = Duration::from_secs(5);
