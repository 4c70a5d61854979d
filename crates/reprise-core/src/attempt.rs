use crate::message::Message;

/// Header carrying the number of prior retryable failures of a message's
/// lineage. Internal: consumers go through [`AttemptTracker`].
const RETRY_ATTEMPT_HEADER: &str = "retry-attempt";

/// Reads and writes the attempt counter carried in message metadata.
pub trait AttemptTracker: Send + Sync {
    /// Stored attempt count; `0` when the message was never rescheduled.
    fn get_attempt(&self, message: &Message) -> u32;

    fn set_attempt(&self, message: &mut Message, attempt: u32);
}

/// Default tracker storing the counter as a decimal string header.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeaderAttemptTracker;

impl AttemptTracker for HeaderAttemptTracker {
    fn get_attempt(&self, message: &Message) -> u32 {
        message
            .headers
            .get(RETRY_ATTEMPT_HEADER)
            .and_then(|value| value.parse().ok())
            .unwrap_or(0)
    }

    fn set_attempt(&self, message: &mut Message, attempt: u32) {
        message
            .headers
            .insert(RETRY_ATTEMPT_HEADER.to_string(), attempt.to_string());
    }
}
