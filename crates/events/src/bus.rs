//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] is the publish/subscribe hub for [`CoordinatorEvent`]s.
//! The coordinator publishes one event per registry or job-ledger change;
//! the status broadcaster and the persistence service are independent
//! subscribers. Shared via `Arc<EventBus>`.

use chrono::{DateTime, Utc};
use fedgrid_core::types::JobId;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Event type names
// ---------------------------------------------------------------------------

pub const DEVICE_REGISTERED: &str = "device.registered";
pub const DEVICE_DISCONNECTED: &str = "device.disconnected";
pub const JOB_QUEUED: &str = "job.queued";
pub const JOB_ASSIGNED: &str = "job.assigned";
pub const JOB_DONE: &str = "job.done";
pub const JOB_FAILED: &str = "job.failed";
pub const JOB_RECLAIMED: &str = "job.reclaimed";

// ---------------------------------------------------------------------------
// CoordinatorEvent
// ---------------------------------------------------------------------------

/// A registry-membership or job-state change.
///
/// Constructed via [`CoordinatorEvent::new`] and enriched with the builder
/// methods [`with_device`](CoordinatorEvent::with_device),
/// [`with_job`](CoordinatorEvent::with_job), and
/// [`with_payload`](CoordinatorEvent::with_payload).
///
/// The payload carries the full snapshot needed downstream: job events
/// embed the updated job record under `"job"`; device events embed the
/// changed device under `"device"` and the whole registry snapshot under
/// `"devices"` (the wire protocol re-sends the full device list on every
/// membership change).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorEvent {
    /// Dot-separated event name, e.g. `"job.queued"`.
    pub event_type: String,

    /// Durable UUID of the device the event concerns, if any.
    pub device_uuid: Option<Uuid>,

    /// Job the event concerns, if any.
    pub job_id: Option<JobId>,

    /// Event-specific data (record snapshots).
    pub payload: serde_json::Value,

    /// When the event was produced (UTC).
    pub timestamp: DateTime<Utc>,
}

impl CoordinatorEvent {
    /// Create a new event with only the required `event_type`.
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            device_uuid: None,
            job_id: None,
            payload: serde_json::Value::Object(Default::default()),
            timestamp: Utc::now(),
        }
    }

    /// Attach the concerned device's durable UUID.
    pub fn with_device(mut self, uuid: Uuid) -> Self {
        self.device_uuid = Some(uuid);
        self
    }

    /// Attach the concerned job id.
    pub fn with_job(mut self, job_id: JobId) -> Self {
        self.job_id = Some(job_id);
        self
    }

    /// Set the JSON payload for the event.
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out event bus.
///
/// Wraps a [`broadcast::Sender`] so that any number of subscribers can
/// independently receive every published [`CoordinatorEvent`]. Events for a
/// single job are published in transition order, so the status broadcaster
/// gets per-job FIFO delivery from channel ordering alone.
pub struct EventBus {
    sender: broadcast::Sender<CoordinatorEvent>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full, the oldest un-consumed messages are dropped
    /// and slow receivers will observe a `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    ///
    /// If there are no active subscribers the event is silently dropped.
    pub fn publish(&self, event: CoordinatorEvent) {
        // Ignore the SendError — it only means there are zero receivers.
        let _ = self.sender.send(event);
    }

    /// Subscribe to all events published on this bus.
    pub fn subscribe(&self) -> broadcast::Receiver<CoordinatorEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
