use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use metrics::counter;

use crate::api::RelayError;

pub mod sqs;

/// A message bound for the outbound queue.
///
/// `deduplication_token` is the record's raw wire encoding exactly as
/// received: the idempotency token the queue itself deduplicates on,
/// distinct from the cache fingerprint. `group_id` selects the ordering
/// partition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboundMessage {
    pub body: String,
    pub deduplication_token: String,
    pub group_id: String,
}

#[async_trait]
pub trait QueueSink {
    async fn send(&self, message: OutboundMessage) -> Result<(), RelayError>;
}

pub struct PrintSink {}

#[async_trait]
impl QueueSink for PrintSink {
    async fn send(&self, message: OutboundMessage) -> Result<(), RelayError> {
        tracing::info!("message: {:?}", message);
        counter!("relay_records_forwarded_total").increment(1);

        Ok(())
    }
}

/// Collects messages in memory. Only useful in tests and local wiring.
#[derive(Clone, Default)]
pub struct MemorySink {
    sent: Arc<Mutex<Vec<OutboundMessage>>>,
    fail: bool,
}

impl MemorySink {
    pub fn new() -> MemorySink {
        Self::default()
    }

    /// Every submission fails, as if the queue rejected it.
    pub fn failing(mut self) -> Self {
        self.fail = true;
        self
    }

    pub fn messages(&self) -> Vec<OutboundMessage> {
        self.lock_sent().clone()
    }

    fn lock_sent(&self) -> MutexGuard<'_, Vec<OutboundMessage>> {
        match self.sent.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[async_trait]
impl QueueSink for MemorySink {
    async fn send(&self, message: OutboundMessage) -> Result<(), RelayError> {
        if self.fail {
            return Err(RelayError::RetryableSinkError);
        }

        self.lock_sent().push(message);
        counter!("relay_records_forwarded_total").increment(1);

        Ok(())
    }
}
