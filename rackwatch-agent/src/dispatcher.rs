//! Live delivery of the latest reading.

use rackwatch_common::{Payload, Reading};
use tracing::{error, info, warn};

use crate::queue::{DrainReport, PendingQueue};
use crate::transport::{DeliveryOutcome, Transport};

/// What happened to a submitted reading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The collector answered; a drain of the pending queue followed.
    /// `drain` is `None` if the store could not be read.
    Delivered {
        status: u16,
        drain: Option<DrainReport>,
    },
    /// Delivery failed and the payload was appended to the pending queue.
    Queued,
    /// Delivery failed and the payload could not be stored either.
    Dropped,
}

/// Sends readings to the collector, falling back to the pending queue.
#[derive(Debug)]
pub struct Dispatcher<T> {
    transport: T,
    queue: PendingQueue,
}

impl<T: Transport> Dispatcher<T> {
    /// Create a dispatcher over a transport and a queue.
    pub fn new(transport: T, queue: PendingQueue) -> Self {
        Self { transport, queue }
    }

    /// The pending queue.
    pub fn queue(&self) -> &PendingQueue {
        &self.queue
    }

    /// The collector transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Deliver one reading.
    ///
    /// On success the pending queue is drained through the same transport;
    /// on failure the encoded payload is appended to it.
    pub async fn submit(&self, reading: &Reading) -> DispatchOutcome {
        let payload = Payload::encode(reading);

        match self.transport.deliver(&payload).await {
            DeliveryOutcome::Delivered { status, body } => {
                info!(status, response = %body.trim(), "Server response");

                let drain = match self.queue.drain(&self.transport).await {
                    Ok(report) => Some(report),
                    Err(e) => {
                        error!(error = %e, "Failed to drain stored data");
                        None
                    }
                };

                DispatchOutcome::Delivered { status, drain }
            }
            DeliveryOutcome::TransportFailure { reason } => {
                warn!(error = %reason, "Error sending data, storing for later");

                match self.queue.append(&payload).await {
                    Ok(()) => {
                        info!(path = %self.queue.path().display(), "Failed data stored");
                        DispatchOutcome::Queued
                    }
                    Err(e) => {
                        error!(error = %e, payload = %payload, "Failed to store data, dropping it");
                        DispatchOutcome::Dropped
                    }
                }
            }
        }
    }
}
