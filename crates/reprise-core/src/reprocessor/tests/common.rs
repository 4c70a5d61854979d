use super::*;

/// Every call the reprocessor makes against the backend, in order.
#[derive(Debug, Clone, PartialEq)]
pub(super) enum Call {
    Register {
        auto_ack: bool,
        max_concurrent_handlers: usize,
    },
    Unregister(Duration),
    Complete(LockToken),
    Abandon(LockToken, Option<HashMap<String, String>>),
    DeadLetter(LockToken, String, Option<String>),
    Schedule(Message, u64),
    Send(Message),
    Commit(Vec<BackendOp>),
    Close,
}

/// Backend operations that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum FailPoint {
    Register,
    Complete,
    Abandon,
    Schedule,
    Commit,
}

/// Mock backend recording calls. When `transactional` is set, `commit` is
/// recorded as one call; otherwise it falls back to in-order application.
pub(super) struct RecordingBackend {
    transactional: bool,
    calls: Mutex<Vec<Call>>,
    fail_on: Mutex<Option<FailPoint>>,
    handler: Mutex<Option<Arc<dyn DeliveryHandler>>>,
}

impl RecordingBackend {
    pub(super) fn transactional() -> Arc<Self> {
        Arc::new(Self::with_mode(true))
    }

    pub(super) fn sequential() -> Arc<Self> {
        Arc::new(Self::with_mode(false))
    }

    fn with_mode(transactional: bool) -> Self {
        Self {
            transactional,
            calls: Mutex::new(Vec::new()),
            fail_on: Mutex::new(None),
            handler: Mutex::new(None),
        }
    }

    pub(super) fn fail_on(&self, point: FailPoint) {
        *self.fail_on.lock().unwrap() = Some(point);
    }

    pub(super) fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub(super) fn registered_handler(&self) -> Option<Arc<dyn DeliveryHandler>> {
        self.handler.lock().unwrap().clone()
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn check(&self, point: FailPoint) -> BackendResult<()> {
        if *self.fail_on.lock().unwrap() == Some(point) {
            return Err(BackendError::Unavailable(format!("{point:?} failed")));
        }
        Ok(())
    }
}

#[async_trait]
impl QueueBackend for RecordingBackend {
    fn entity_path(&self) -> &str {
        "orders"
    }

    fn client_id(&self) -> &str {
        "client-1"
    }

    fn endpoint(&self) -> &str {
        "orders.servicebus.example.net"
    }

    async fn register_message_handler(
        &self,
        handler: Arc<dyn DeliveryHandler>,
        options: HandlerOptions,
    ) -> BackendResult<()> {
        self.check(FailPoint::Register)?;
        self.record(Call::Register {
            auto_ack: options.auto_ack,
            max_concurrent_handlers: options.max_concurrent_handlers,
        });
        *self.handler.lock().unwrap() = Some(handler);
        Ok(())
    }

    async fn unregister_message_handler(&self, drain_timeout: Duration) -> BackendResult<()> {
        self.record(Call::Unregister(drain_timeout));
        Ok(())
    }

    async fn complete(&self, lock_token: LockToken) -> BackendResult<()> {
        self.check(FailPoint::Complete)?;
        self.record(Call::Complete(lock_token));
        Ok(())
    }

    async fn abandon(
        &self,
        lock_token: LockToken,
        properties_to_modify: Option<HashMap<String, String>>,
    ) -> BackendResult<()> {
        self.check(FailPoint::Abandon)?;
        self.record(Call::Abandon(lock_token, properties_to_modify));
        Ok(())
    }

    async fn dead_letter(
        &self,
        lock_token: LockToken,
        reason: &str,
        description: Option<&str>,
    ) -> BackendResult<()> {
        self.record(Call::DeadLetter(
            lock_token,
            reason.to_string(),
            description.map(str::to_string),
        ));
        Ok(())
    }

    async fn schedule(&self, message: Message, visible_at_ns: u64) -> BackendResult<ScheduledId> {
        self.check(FailPoint::Schedule)?;
        self.record(Call::Schedule(message, visible_at_ns));
        Ok(1)
    }

    async fn send(&self, message: Message) -> BackendResult<()> {
        self.record(Call::Send(message));
        Ok(())
    }

    async fn close(&self) -> BackendResult<()> {
        self.record(Call::Close);
        Ok(())
    }

    async fn commit(&self, ops: Vec<BackendOp>) -> BackendResult<()> {
        if !self.transactional {
            return backend::apply_in_order(self, ops).await;
        }
        self.check(FailPoint::Commit)?;
        self.record(Call::Commit(ops));
        Ok(())
    }
}

pub(super) const NOW_NS: u64 = 1_700_000_000_000_000_000;

pub(super) fn reprocessor(
    backend: &Arc<RecordingBackend>,
    settings: RetrySettings,
) -> Reprocessor<RecordingBackend> {
    Reprocessor::new(Arc::clone(backend), settings).with_clock(Arc::new(ManualClock::new(NOW_NS)))
}

/// Constant 10s delay, three attempts.
pub(super) fn ten_second_settings() -> RetrySettings {
    RetrySettings::new(ConstantDelayStrategy::new(3, Duration::from_secs(10)).unwrap())
}

/// A message as the backend would deliver it, with a lock token and the
/// given number of prior attempts (`None` leaves the header absent).
pub(super) fn delivered(prior_attempts: Option<u32>) -> Message {
    let mut message = Message::new(b"order #42".to_vec()).with_header("tenant", "acme");
    if let Some(attempts) = prior_attempts {
        HeaderAttemptTracker.set_attempt(&mut message, attempts);
    }
    message.lock_token = Some(LockToken::new());
    message.delivery_count = 1;
    message
}

pub(super) fn succeeding() -> Arc<dyn MessageHandler> {
    handler_fn(|_msg, _cancel| async { Ok::<_, HandlerError>(()) })
}

pub(super) fn retrying() -> Arc<dyn MessageHandler> {
    handler_fn(|_msg, _cancel| async { Err::<(), _>(HandlerError::retryable("downstream busy")) })
}

pub(super) fn failing() -> Arc<dyn MessageHandler> {
    handler_fn(|_msg, _cancel| async {
        Err::<(), _>(HandlerError::permanent(std::io::Error::other(
            "bad payload",
        )))
    })
}
