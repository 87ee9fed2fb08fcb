//! Message bus seam
//!
//! At-least-once pub/sub over string subjects. The bus is a delivery hint,
//! not a work queue: consumers must tolerate both redelivery and missed
//! delivery, and rely on the store poll path for recovery.
//!
//! [`InProcessBus`] is the in-process backend used by tests and
//! single-process demo deployments; broker-backed deployments implement the
//! same trait.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::broadcast;
use tracing::warn;

pub type Result<T> = std::result::Result<T, BusError>;

/// Errors from bus operations.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    #[error("bus connection closed: {0}")]
    Closed(String),
    #[error("publish failed: {0}")]
    PublishFailed(String),
}

/// Pub/sub transport over string subjects.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Publishes a payload on a subject. Delivery is best-effort; publishing
    /// with no subscribers is not an error.
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<()>;

    /// Opens a subscription on a subject. Only messages published after the
    /// subscription exists are delivered.
    async fn subscribe(&self, subject: &str) -> Result<BusSubscription>;
}

/// A live subscription handle.
pub struct BusSubscription {
    subject: String,
    rx: broadcast::Receiver<Bytes>,
}

impl BusSubscription {
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Receives the next message, or `None` when the bus shuts down.
    ///
    /// A slow consumer that lags behind the channel capacity skips the
    /// overwritten messages; the store poll path covers the gap.
    pub async fn recv(&mut self) -> Option<Bytes> {
        loop {
            match self.rx.recv().await {
                Ok(payload) => return Some(payload),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!(
                        subject = %self.subject,
                        skipped, "subscriber lagged, messages dropped"
                    );
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

const DEFAULT_SUBJECT_CAPACITY: usize = 256;

/// In-process bus: one broadcast channel per subject, created on demand.
pub struct InProcessBus {
    subjects: Mutex<HashMap<String, broadcast::Sender<Bytes>>>,
    capacity: usize,
}

impl InProcessBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_SUBJECT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            subjects: Mutex::new(HashMap::new()),
            capacity,
        }
    }

    fn sender(&self, subject: &str) -> broadcast::Sender<Bytes> {
        let mut subjects = self.subjects.lock().unwrap();
        subjects
            .entry(subject.to_string())
            .or_insert_with(|| {
                // The initial receiver is dropped; subscribers get their own
                // from the sender.
                let (tx, _) = broadcast::channel(self.capacity);
                tx
            })
            .clone()
    }
}

impl Default for InProcessBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageBus for InProcessBus {
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<()> {
        // A send error only means there are no subscribers right now.
        let _ = self.sender(subject).send(payload);
        Ok(())
    }

    async fn subscribe(&self, subject: &str) -> Result<BusSubscription> {
        Ok(BusSubscription {
            subject: subject.to_string(),
            rx: self.sender(subject).subscribe(),
        })
    }
}
