//! Bounded dispatch queue between the session loop and the dispatch worker.
//!
//! The queue is the backpressure point of the client: a slow application
//! callback fills it, and once it stays full for [`DISPATCH_POST_TIMEOUT`]
//! the producer gives up on the event instead of stalling the link.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::Channel;
use embassy_time::{Duration, with_timeout};

use super::events::{SessionEpoch, SessionEvent};
use crate::error::Error;

/// Depth of the dispatch queue.
pub const DISPATCH_QUEUE_DEPTH: usize = 20;

/// How long `post` waits for room before reporting failure.
pub const DISPATCH_POST_TIMEOUT: Duration = Duration::from_secs(5);

pub type DispatchChannel = Channel<CriticalSectionRawMutex, (SessionEpoch, SessionEvent), DISPATCH_QUEUE_DEPTH>;

/// Single-consumer FIFO of [`SessionEvent`]s.
pub struct DispatchQueue {
    channel: DispatchChannel,
}

impl Default for DispatchQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl DispatchQueue {
    pub const fn new() -> Self {
        Self {
            channel: Channel::new(),
        }
    }

    /// Enqueues an event, waiting at most [`DISPATCH_POST_TIMEOUT`] for room.
    pub async fn post(&self, epoch: SessionEpoch, event: SessionEvent) -> Result<(), Error> {
        with_timeout(DISPATCH_POST_TIMEOUT, self.channel.send((epoch, event)))
            .await
            .map_err(|_| Error::DispatchQueueFull)
    }

    /// Waits for the next event in arrival order.
    pub async fn next(&self) -> (SessionEpoch, SessionEvent) {
        self.channel.receive().await
    }
}
