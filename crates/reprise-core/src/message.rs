use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque handle for one specific delivery of a message. Required to
/// complete, abandon or dead-letter that delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LockToken(Uuid);

impl LockToken {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for LockToken {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for LockToken {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for LockToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Core message type exchanged with the queue backend. Body and headers are
/// opaque to the reprocessor, apart from the reserved attempt header.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: Uuid,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
    /// Set by the backend on delivery; `None` on messages that were never
    /// delivered (including redelivery clones).
    pub lock_token: Option<LockToken>,
    /// Unix timestamp (ns) before which the message must not be delivered.
    pub scheduled_enqueue_time_ns: Option<u64>,
    pub delivery_count: u32,
}

impl Message {
    /// Build a fresh, undelivered message with a new UUIDv7 identity.
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            id: Self::new_id(),
            headers: HashMap::new(),
            body: body.into(),
            lock_token: None,
            scheduled_enqueue_time_ns: None,
            delivery_count: 0,
        }
    }

    pub fn with_header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(key.into(), value.into());
        self
    }

    /// Generate a new UUIDv7 message ID.
    pub fn new_id() -> Uuid {
        Uuid::now_v7()
    }

    /// Deep copy of body and headers under a fresh identity. Delivery state
    /// (lock token, delivery count, schedule) is not carried over, so a
    /// backend with duplicate detection treats the copy as a new message.
    pub fn clone_for_redelivery(&self) -> Self {
        Self {
            id: Self::new_id(),
            headers: self.headers.clone(),
            body: self.body.clone(),
            lock_token: None,
            scheduled_enqueue_time_ns: None,
            delivery_count: 0,
        }
    }
}
