//! Status broadcaster: event bus -> every live connection.
//!
//! [`Broadcaster`] consumes [`CoordinatorEvent`]s and fans the corresponding
//! wire message out to all connections. Delivery is best-effort and
//! at-most-once per event per connection; a missed delivery is not retried
//! (clients reconcile via the initial-sync snapshot on reconnect). Because a
//! single task serializes all events into per-connection FIFO channels,
//! transitions for one job reach each connection in production order.

use std::sync::Arc;

use fedgrid_events::CoordinatorEvent;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::protocol::{DeviceSnapshot, JobSnapshot, Outbound};
use crate::Coordinator;

/// Fans registry and job-ledger changes out to all subscribed connections.
pub struct Broadcaster {
    coordinator: Arc<Coordinator>,
}

impl Broadcaster {
    pub fn new(coordinator: Arc<Coordinator>) -> Self {
        Self { coordinator }
    }

    /// Run the fan-out loop.
    ///
    /// Subscribes to the event bus via `receiver`; exits when `cancel` fires
    /// or the channel closes. The coordinator keeps its own bus handle alive
    /// for as long as it exists, so cancellation is the shutdown signal.
    pub async fn run(
        self,
        mut receiver: broadcast::Receiver<CoordinatorEvent>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    tracing::info!("Shutdown requested, status broadcaster stopping");
                    break;
                }
                result = receiver.recv() => match result {
                    Ok(event) => {
                        if let Some(message) = Self::to_wire(&event) {
                            self.coordinator.broadcast(message).await;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(skipped = n, "Status broadcaster lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        tracing::info!("Event bus closed, status broadcaster shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Map an event to its wire message.
    ///
    /// Device events carry the registry snapshot taken at publish time, so
    /// clients observe membership changes in the order they happened. Events
    /// with undecodable payloads are logged and dropped.
    fn to_wire(event: &CoordinatorEvent) -> Option<Outbound> {
        if event.event_type.starts_with("device.") {
            match serde_json::from_value::<Vec<DeviceSnapshot>>(event.payload["devices"].clone()) {
                Ok(devices) => Some(Outbound::AllDevices { devices }),
                Err(e) => {
                    tracing::error!(
                        error = %e,
                        event_type = %event.event_type,
                        "Device event without a decodable registry snapshot"
                    );
                    None
                }
            }
        } else if event.event_type.starts_with("job.") {
            match serde_json::from_value::<JobSnapshot>(event.payload["job"].clone()) {
                Ok(job) => Some(Outbound::UploadStatus(job)),
                Err(e) => {
                    tracing::error!(
                        error = %e,
                        event_type = %event.event_type,
                        "Job event without a decodable job snapshot"
                    );
                    None
                }
            }
        } else {
            None
        }
    }
}
