use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::backend::{BackendOp, DeliveryHandler, QueueBackend, ScheduledId};
use crate::clock::{Clock, SystemClock};
use crate::error::{BackendError, BackendResult};
use crate::message::{LockToken, Message};
use crate::options::HandlerOptions;

/// Dead-letter reason used when a message is abandoned too many times.
pub const MAX_DELIVERY_COUNT_EXCEEDED: &str = "MaxDeliveryCountExceeded";

/// Upper bound on how long the delivery loop sleeps without re-checking
/// scheduled messages and lock expiry.
const IDLE_POLL: Duration = Duration::from_millis(50);

/// A message parked in the dead-letter sub-queue.
#[derive(Debug, Clone, PartialEq)]
pub struct DeadLetter {
    pub message: Message,
    pub reason: String,
    pub description: Option<String>,
}

/// In-process queue with peek-lock delivery, scheduled messages, duplicate
/// detection, a dead-letter sub-queue and transactional batches.
///
/// Messages are delivered either to a registered handler (push) or through
/// [`InMemoryQueue::try_receive`] (pull). Each delivery gets a fresh lock
/// token; abandoning or letting the lock expire makes the message visible
/// again until `max_delivery_count` is reached.
pub struct InMemoryQueue {
    endpoint: String,
    entity_path: String,
    client_id: String,
    max_delivery_count: u32,
    lock_duration: Duration,
    clock: Arc<dyn Clock>,
    shared: Arc<Shared>,
    registration: Mutex<Option<Registration>>,
}

struct Shared {
    state: Mutex<QueueState>,
    notify: Notify,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

struct Registration {
    /// Stops the delivery loop from taking new messages.
    receive: CancellationToken,
    /// Handed to handlers; cancelled once the drain period is over.
    handlers: CancellationToken,
    permits: Arc<Semaphore>,
    max_concurrent: u32,
    task: JoinHandle<()>,
}

struct Locked {
    message: Message,
    locked_until_ns: u64,
}

#[derive(Default)]
struct QueueState {
    active: VecDeque<Message>,
    /// Keyed by (visible-at, scheduled id) so equal times keep send order.
    scheduled: BTreeMap<(u64, ScheduledId), Message>,
    locked: HashMap<LockToken, Locked>,
    dead_letters: Vec<DeadLetter>,
    seen_ids: HashSet<Uuid>,
    completed: u64,
    next_scheduled_id: ScheduledId,
    fail_next_commit: Option<String>,
    closed: bool,
}

impl QueueState {
    /// Record `id` for duplicate detection. Returns false for a duplicate.
    fn accept(&mut self, id: Uuid) -> bool {
        self.seen_ids.insert(id)
    }

    fn enqueue_scheduled(&mut self, mut message: Message, visible_at_ns: u64) -> ScheduledId {
        self.next_scheduled_id += 1;
        let id = self.next_scheduled_id;
        if !self.accept(message.id) {
            debug!(message_id = %message.id, "duplicate message dropped");
            return id;
        }
        message.scheduled_enqueue_time_ns = Some(visible_at_ns);
        self.scheduled.insert((visible_at_ns, id), message);
        id
    }

    /// Make due scheduled messages visible and release expired locks.
    fn tick(&mut self, now_ns: u64, max_delivery_count: u32) {
        while let Some((&(visible_at_ns, _), _)) = self.scheduled.first_key_value() {
            if visible_at_ns > now_ns {
                break;
            }
            if let Some((_, message)) = self.scheduled.pop_first() {
                self.active.push_back(message);
            }
        }

        let expired: Vec<LockToken> = self
            .locked
            .iter()
            .filter(|(_, locked)| locked.locked_until_ns <= now_ns)
            .map(|(token, _)| *token)
            .collect();
        for token in expired {
            debug!(%token, "lock expired");
            let _ = self.release(token, None, max_delivery_count);
        }
    }

    fn next_wakeup(&self) -> Option<u64> {
        let scheduled = self.scheduled.keys().next().map(|(at, _)| *at);
        let lock_expiry = self.locked.values().map(|l| l.locked_until_ns).min();
        match (scheduled, lock_expiry) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    fn lock_next(&mut self, locked_until_ns: u64) -> Option<Message> {
        let mut message = self.active.pop_front()?;
        let token = LockToken::new();
        message.delivery_count += 1;
        message.lock_token = Some(token);
        self.locked.insert(
            token,
            Locked {
                message: message.clone(),
                locked_until_ns,
            },
        );
        Some(message)
    }

    fn take_lock(&mut self, token: LockToken) -> BackendResult<Message> {
        self.locked
            .remove(&token)
            .map(|locked| locked.message)
            .ok_or(BackendError::LockLost(token))
    }

    fn release(
        &mut self,
        token: LockToken,
        properties: Option<HashMap<String, String>>,
        max_delivery_count: u32,
    ) -> BackendResult<()> {
        let mut message = self.take_lock(token)?;
        message.lock_token = None;
        if let Some(properties) = properties {
            message.headers.extend(properties);
        }
        if message.delivery_count >= max_delivery_count {
            debug!(message_id = %message.id, "max delivery count exceeded");
            self.dead_letters.push(DeadLetter {
                message,
                reason: MAX_DELIVERY_COUNT_EXCEEDED.to_string(),
                description: None,
            });
        } else {
            self.active.push_front(message);
        }
        Ok(())
    }
}

impl InMemoryQueue {
    /// Service Bus default for the number of deliveries before a message is
    /// dead-lettered.
    pub const DEFAULT_MAX_DELIVERY_COUNT: u32 = 10;

    pub const DEFAULT_LOCK_DURATION: Duration = Duration::from_secs(60);

    pub const DEFAULT_ENDPOINT: &'static str = "localhost";

    pub fn new(entity_path: impl Into<String>) -> Self {
        Self {
            endpoint: Self::DEFAULT_ENDPOINT.to_string(),
            entity_path: entity_path.into(),
            client_id: format!("in-memory-{}", Uuid::now_v7()),
            max_delivery_count: Self::DEFAULT_MAX_DELIVERY_COUNT,
            lock_duration: Self::DEFAULT_LOCK_DURATION,
            clock: Arc::new(SystemClock),
            shared: Arc::new(Shared {
                state: Mutex::new(QueueState::default()),
                notify: Notify::new(),
            }),
            registration: Mutex::new(None),
        }
    }

    pub fn with_max_delivery_count(mut self, max_delivery_count: u32) -> Self {
        self.max_delivery_count = max_delivery_count.max(1);
        self
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    pub fn with_lock_duration(mut self, lock_duration: Duration) -> Self {
        self.lock_duration = lock_duration;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Peek-lock the next visible message, if any.
    pub fn try_receive(&self) -> Option<Message> {
        let now_ns = self.clock.now_ns();
        let mut state = self.shared.state();
        state.tick(now_ns, self.max_delivery_count);
        state.lock_next(self.locked_until(now_ns))
    }

    /// Make the next `commit` fail without applying any of its operations.
    pub fn fail_next_commit(&self, reason: impl Into<String>) {
        self.shared.state().fail_next_commit = Some(reason.into());
    }

    pub fn active_count(&self) -> usize {
        self.shared.state().active.len()
    }

    pub fn scheduled_count(&self) -> usize {
        self.shared.state().scheduled.len()
    }

    pub fn locked_count(&self) -> usize {
        self.shared.state().locked.len()
    }

    pub fn completed_count(&self) -> u64 {
        self.shared.state().completed
    }

    /// Scheduled messages with their visible-at times, earliest first.
    pub fn scheduled(&self) -> Vec<(u64, Message)> {
        self.shared
            .state()
            .scheduled
            .iter()
            .map(|((at, _), message)| (*at, message.clone()))
            .collect()
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.shared.state().dead_letters.clone()
    }

    fn locked_until(&self, now_ns: u64) -> u64 {
        let lock_ns = u64::try_from(self.lock_duration.as_nanos()).unwrap_or(u64::MAX);
        now_ns.saturating_add(lock_ns)
    }

    fn registration(&self) -> MutexGuard<'_, Option<Registration>> {
        self.registration.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn ensure_open(state: &QueueState) -> BackendResult<()> {
        if state.closed {
            return Err(BackendError::Closed);
        }
        Ok(())
    }
}

#[async_trait]
impl QueueBackend for InMemoryQueue {
    fn entity_path(&self) -> &str {
        &self.entity_path
    }

    fn client_id(&self) -> &str {
        &self.client_id
    }

    fn endpoint(&self) -> &str {
        &self.endpoint
    }

    #[tracing::instrument(skip_all, fields(entity = %self.entity_path))]
    async fn register_message_handler(
        &self,
        handler: Arc<dyn DeliveryHandler>,
        options: HandlerOptions,
    ) -> BackendResult<()> {
        Self::ensure_open(&self.shared.state())?;
        let mut registration = self.registration();
        if registration.is_some() {
            return Err(BackendError::HandlerAlreadyRegistered);
        }

        let max_concurrent =
            u32::try_from(options.max_concurrent_handlers.max(1)).unwrap_or(u32::MAX);
        let permits = Arc::new(Semaphore::new(max_concurrent as usize));
        let receive = CancellationToken::new();
        let handlers = CancellationToken::new();

        let delivery = DeliveryLoop {
            shared: Arc::clone(&self.shared),
            clock: Arc::clone(&self.clock),
            handler,
            auto_ack: options.auto_ack,
            permits: Arc::clone(&permits),
            receive: receive.clone(),
            handlers: handlers.clone(),
            max_delivery_count: self.max_delivery_count,
            lock_duration: self.lock_duration,
        };
        let task = tokio::spawn(delivery.run());

        *registration = Some(Registration {
            receive,
            handlers,
            permits,
            max_concurrent,
            task,
        });
        debug!(max_concurrent, "delivery loop started");
        Ok(())
    }

    #[tracing::instrument(skip_all, fields(entity = %self.entity_path))]
    async fn unregister_message_handler(&self, drain_timeout: Duration) -> BackendResult<()> {
        let registration = self.registration().take();
        let Some(registration) = registration else {
            return Ok(());
        };

        registration.receive.cancel();
        let _ = registration.task.await;

        let drained = tokio::time::timeout(
            drain_timeout,
            registration.permits.acquire_many(registration.max_concurrent),
        )
        .await;
        if drained.is_err() {
            warn!(
                drain_timeout_ms = drain_timeout.as_millis() as u64,
                "in-flight handlers did not finish before the drain timeout"
            );
        }
        registration.handlers.cancel();
        debug!("delivery loop stopped");
        Ok(())
    }

    async fn complete(&self, lock_token: LockToken) -> BackendResult<()> {
        let mut state = self.shared.state();
        Self::ensure_open(&state)?;
        state.take_lock(lock_token)?;
        state.completed += 1;
        Ok(())
    }

    async fn abandon(
        &self,
        lock_token: LockToken,
        properties_to_modify: Option<HashMap<String, String>>,
    ) -> BackendResult<()> {
        let mut state = self.shared.state();
        Self::ensure_open(&state)?;
        state.release(lock_token, properties_to_modify, self.max_delivery_count)?;
        drop(state);
        self.shared.notify.notify_one();
        Ok(())
    }

    async fn dead_letter(
        &self,
        lock_token: LockToken,
        reason: &str,
        description: Option<&str>,
    ) -> BackendResult<()> {
        let mut state = self.shared.state();
        Self::ensure_open(&state)?;
        let mut message = state.take_lock(lock_token)?;
        message.lock_token = None;
        state.dead_letters.push(DeadLetter {
            message,
            reason: reason.to_string(),
            description: description.map(str::to_string),
        });
        Ok(())
    }

    async fn schedule(&self, message: Message, visible_at_ns: u64) -> BackendResult<ScheduledId> {
        let mut state = self.shared.state();
        Self::ensure_open(&state)?;
        let id = state.enqueue_scheduled(message, visible_at_ns);
        drop(state);
        self.shared.notify.notify_one();
        Ok(id)
    }

    async fn send(&self, message: Message) -> BackendResult<()> {
        let mut state = self.shared.state();
        Self::ensure_open(&state)?;
        if state.accept(message.id) {
            state.active.push_back(message);
        } else {
            debug!(message_id = %message.id, "duplicate message dropped");
        }
        drop(state);
        self.shared.notify.notify_one();
        Ok(())
    }

    async fn close(&self) -> BackendResult<()> {
        let registration = self.registration().take();
        if let Some(registration) = registration {
            registration.receive.cancel();
            registration.handlers.cancel();
            let _ = registration.task.await;
        }
        self.shared.state().closed = true;
        Ok(())
    }

    /// All-or-nothing: every lock token is validated before anything is
    /// applied.
    async fn commit(&self, ops: Vec<BackendOp>) -> BackendResult<()> {
        let mut state = self.shared.state();
        Self::ensure_open(&state)?;
        if let Some(reason) = state.fail_next_commit.take() {
            return Err(BackendError::TransactionAborted(reason));
        }

        let mut completing = HashSet::new();
        for op in &ops {
            if let BackendOp::Complete { lock_token } = op {
                if !state.locked.contains_key(lock_token) || !completing.insert(*lock_token) {
                    return Err(BackendError::TransactionAborted(format!(
                        "lock {lock_token} is not held"
                    )));
                }
            }
        }

        for op in ops {
            match op {
                BackendOp::Schedule {
                    message,
                    visible_at_ns,
                } => {
                    state.enqueue_scheduled(message, visible_at_ns);
                }
                BackendOp::Complete { lock_token } => {
                    state.take_lock(lock_token)?;
                    state.completed += 1;
                }
            }
        }
        drop(state);
        self.shared.notify.notify_one();
        Ok(())
    }
}

impl Drop for InMemoryQueue {
    fn drop(&mut self) {
        if let Some(registration) = self.registration().take() {
            registration.receive.cancel();
            registration.handlers.cancel();
        }
    }
}

/// Pushes visible messages to the registered handler, at most
/// `max_concurrent_handlers` at a time.
struct DeliveryLoop {
    shared: Arc<Shared>,
    clock: Arc<dyn Clock>,
    handler: Arc<dyn DeliveryHandler>,
    auto_ack: bool,
    permits: Arc<Semaphore>,
    receive: CancellationToken,
    handlers: CancellationToken,
    max_delivery_count: u32,
    lock_duration: Duration,
}

impl DeliveryLoop {
    async fn run(self) {
        let this = Arc::new(self);
        loop {
            let permit = tokio::select! {
                _ = this.receive.cancelled() => break,
                permit = Arc::clone(&this.permits).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let now_ns = this.clock.now_ns();
            let (next, wakeup) = {
                let mut state = this.shared.state();
                if state.closed {
                    break;
                }
                state.tick(now_ns, this.max_delivery_count);
                let lock_ns = u64::try_from(this.lock_duration.as_nanos()).unwrap_or(u64::MAX);
                let next = state.lock_next(now_ns.saturating_add(lock_ns));
                (next, state.next_wakeup())
            };

            match next {
                Some(message) => {
                    tokio::spawn(Arc::clone(&this).deliver(message, permit));
                }
                None => {
                    drop(permit);
                    let wait = wakeup
                        .map(|at| Duration::from_nanos(at.saturating_sub(now_ns)))
                        .unwrap_or(IDLE_POLL)
                        .min(IDLE_POLL);
                    tokio::select! {
                        _ = this.receive.cancelled() => break,
                        _ = this.shared.notify.notified() => {}
                        _ = tokio::time::sleep(wait) => {}
                    }
                }
            }
        }
    }

    async fn deliver(self: Arc<Self>, message: Message, _permit: OwnedSemaphorePermit) {
        let Some(lock_token) = message.lock_token else {
            return;
        };
        let message_id = message.id;

        let result = self
            .handler
            .on_message(message, self.handlers.child_token())
            .await;

        let mut state = self.shared.state();
        match result {
            Ok(()) if self.auto_ack => {
                if state.take_lock(lock_token).is_ok() {
                    state.completed += 1;
                }
            }
            Ok(()) => {}
            Err(error) => {
                warn!(%message_id, %error, "delivery faulted, abandoning");
                // The lock may already be gone if the fault came after settling.
                let _ = state.release(lock_token, None, self.max_delivery_count);
            }
        }
        drop(state);
        self.shared.notify.notify_one();
    }
}
