//! Upload notifications.

use tokio::sync::broadcast;
use tusk_core::UploadId;

/// Default number of events buffered per subscriber.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Published after every committed chunk.
///
/// `complete` is set once the offset reaches the declared length. A
/// zero-length upload publishes a single complete event at creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkReceived {
    pub upload_id: UploadId,
    pub offset: u64,
    /// Declared length, `None` while deferred.
    pub length: Option<u64>,
    pub complete: bool,
}

/// Broadcast channel for [`ChunkReceived`] events.
///
/// Publishing never blocks; slow subscribers lag and miss events.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ChunkReceived>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ChunkReceived> {
        self.sender.subscribe()
    }

    /// Publish an event. Returns the number of subscribers that received it.
    pub fn publish(&self, event: ChunkReceived) -> usize {
        tracing::debug!(
            upload_id = %event.upload_id,
            offset = event.offset,
            complete = event.complete,
            "chunk received"
        );
        self.sender.send(event).unwrap_or(0)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_CAPACITY)
    }
}
