//! Coordinator facade: the single entry point the transport layer talks to.
//!
//! All mutating operations — register, disconnect, submit, completion,
//! placement, reclaim — run under one `tokio::sync::Mutex`, which linearizes
//! registry mutation, ledger mutation, and dispatcher passes relative to
//! each other. This closes the lost-update race between "device disconnects"
//! and "job completes" for the same job. Network sends go through
//! per-connection unbounded channels and never block while the lock is held.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use fedgrid_core::error::CoreError;
use fedgrid_events::{bus, CoordinatorEvent, EventBus};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::dispatcher;
use crate::ledger::Ledger;
use crate::protocol::{
    sanitize_filename, DeviceInfo, DeviceSnapshot, JobResult, JobSnapshot, Outbound, UploadStart,
};
use crate::registry::{ConnId, OutboundSender, Registry};

/// Everything behind the coordination lock.
struct CoordinatorState {
    registry: Registry,
    ledger: Ledger,
    next_job_id: i64,
}

/// The coordination domain for one server process.
///
/// Designed to be wrapped in `Arc` and shared between the websocket layer,
/// the HTTP handlers, the status broadcaster, and background tasks. Multiple
/// independent instances can coexist (nothing is process-global), which is
/// what the integration tests rely on.
pub struct Coordinator {
    state: Mutex<CoordinatorState>,
    bus: Arc<EventBus>,
}

impl Coordinator {
    /// Create a coordinator publishing on `bus`.
    ///
    /// `first_job_id` seeds the id sequence; pass `max persisted id + 1` so
    /// ids stay unique across restarts (1 for a fresh store).
    pub fn new(bus: Arc<EventBus>, first_job_id: i64) -> Self {
        Self {
            state: Mutex::new(CoordinatorState {
                registry: Registry::new(),
                ledger: Ledger::new(),
                next_job_id: first_job_id.max(1),
            }),
            bus,
        }
    }

    // -----------------------------------------------------------------------
    // Connection lifecycle
    // -----------------------------------------------------------------------

    /// Track a freshly established connection and send it the initial sync:
    /// `connect_ack`, the full device list, and the job queue.
    ///
    /// `uuid` is the durable identity carried as a connection parameter. If
    /// the device is already known, the connection is bound to it right away
    /// (reconnect-before-`device_info`), keeping the one-connected-entry-per-
    /// UUID invariant.
    pub async fn connect(&self, conn_id: ConnId, uuid: Option<Uuid>, sender: OutboundSender) {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        state.registry.add_connection(conn_id, sender);

        state
            .registry
            .send_to_conn(conn_id, Outbound::ConnectAck { status: "connected" });
        state.registry.send_to_conn(
            conn_id,
            Outbound::AllDevices {
                devices: state.registry.list(),
            },
        );
        state.registry.send_to_conn(
            conn_id,
            Outbound::TaskQueue {
                jobs: state.ledger.list_all(),
            },
        );

        // A known device reconnecting: rebind before its capability report
        // arrives so dispatch can already count it.
        if let Some(uuid) = uuid {
            if let Some(record) = state.registry.find(uuid) {
                let capabilities = record.capabilities.clone();
                let record = state.registry.register(uuid, conn_id, capabilities);
                let snapshot = record.snapshot();
                self.publish_device(&state.registry, bus::DEVICE_REGISTERED, snapshot);
                dispatcher::run_placement(&state.registry, &mut state.ledger, &self.bus);
            }
        }

        tracing::info!(conn_id = %conn_id, "Connection established");
    }

    /// Handle a `device_info` message: create or update the registry entry,
    /// acknowledge it, and re-run placement with the new capacity.
    pub async fn register_device(&self, conn_id: ConnId, info: DeviceInfo) {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        let record = state.registry.register(info.uuid, conn_id, info.capabilities);
        let snapshot = record.snapshot();
        tracing::info!(
            uuid = %info.uuid,
            conn_id = %conn_id,
            cores = snapshot.cpu_cores,
            "Device registered"
        );

        self.publish_device(&state.registry, bus::DEVICE_REGISTERED, snapshot);
        state.registry.send_to_conn(
            conn_id,
            Outbound::DeviceResponse {
                status: "success",
                message: "Device info received",
            },
        );
        dispatcher::run_placement(&state.registry, &mut state.ledger, &self.bus);
    }

    /// Handle a transport disconnect: mark the device gone, reclaim its
    /// in-flight jobs, and re-run placement. Idempotent — repeated or
    /// unknown connection ids are no-ops.
    pub async fn disconnect(&self, conn_id: ConnId) {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        let Some(uuid) = state.registry.mark_disconnected(conn_id) else {
            return;
        };
        tracing::info!(uuid = %uuid, conn_id = %conn_id, "Device disconnected");

        if let Some(record) = state.registry.find(uuid) {
            let snapshot = record.snapshot();
            self.publish_device(&state.registry, bus::DEVICE_DISCONNECTED, snapshot);
        }
        dispatcher::reclaim_device(&mut state.ledger, &self.bus, uuid);
        dispatcher::run_placement(&state.registry, &mut state.ledger, &self.bus);
    }

    // -----------------------------------------------------------------------
    // Job lifecycle
    // -----------------------------------------------------------------------

    /// Handle an `upload_start` message: record the job as `queued` and try
    /// to place it.
    ///
    /// The filename is stored path-stripped so it matches the name the
    /// multipart upload arrives under. Messages from a superseded connection
    /// are rejected with `Conflict` (the caller logs and drops them — the
    /// client never sees an error).
    pub async fn submit_upload(
        &self,
        conn_id: ConnId,
        upload: UploadStart,
    ) -> Result<JobSnapshot, CoreError> {
        let filename = sanitize_filename(&upload.filename);
        if filename.is_empty() {
            return Err(CoreError::Validation("filename must not be empty".into()));
        }

        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        if !state.registry.conn_speaks_for(conn_id, upload.uuid) {
            return Err(CoreError::Conflict(format!(
                "Connection {conn_id} was superseded for device {}",
                upload.uuid
            )));
        }

        let snapshot = self.submit_locked(state, upload.uuid, filename, upload.size);
        dispatcher::run_placement(&state.registry, &mut state.ledger, &self.bus);
        Ok(snapshot)
    }

    /// Record the arrival of uploaded file bytes.
    ///
    /// Correlates by `(uuid, filename)` against the newest non-terminal job
    /// for that device (the `upload_start` metadata is authoritative). Both
    /// sides of the match are path-stripped. A REST-only client with no
    /// matching job gets a fresh one submitted.
    pub async fn record_upload_file(
        &self,
        uuid: Uuid,
        filename: String,
        size: i64,
        stored_path: String,
    ) -> JobSnapshot {
        let filename = sanitize_filename(&filename);
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        if let Some(job_id) = state.ledger.find_correlatable(uuid, &filename) {
            // Infallible: the id was just looked up under the same lock.
            let job = state
                .ledger
                .attach_stored_path(job_id, stored_path.clone())
                .map(|j| j.snapshot());
            if let Ok(snapshot) = job {
                tracing::info!(job_id, uuid = %uuid, "Upload bytes attached to job");
                return snapshot;
            }
        }

        let snapshot = self.submit_locked(state, uuid, filename, size);
        let _ = state.ledger.attach_stored_path(snapshot.id, stored_path);
        dispatcher::run_placement(&state.registry, &mut state.ledger, &self.bus);
        snapshot
    }

    /// Handle a `job_result` completion signal from the processing device.
    ///
    /// A late completion for a job that was already reclaimed (or finished)
    /// comes back as `InvalidTransition`; the caller logs it and the client
    /// sees no error. A result from a connection that no longer speaks for
    /// the assigned device is rejected as `Conflict`.
    pub async fn job_result(&self, conn_id: ConnId, result: JobResult) -> Result<(), CoreError> {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;

        let job = state.ledger.find(result.id).ok_or(CoreError::NotFound {
            entity: "Job",
            id: result.id.to_string(),
        })?;

        if let Some(assigned) = job.assigned_device {
            if !state.registry.conn_speaks_for(conn_id, assigned) {
                return Err(CoreError::Conflict(format!(
                    "Connection {conn_id} does not speak for device {assigned}"
                )));
            }
        }

        let job = state
            .ledger
            .complete(result.id, result.status, result.result_ref)?
            .clone();
        tracing::info!(job_id = job.id, status = %job.status, "Job completed");

        let event_type = match job.status {
            fedgrid_core::status::JobStatus::Done => bus::JOB_DONE,
            _ => bus::JOB_FAILED,
        };
        dispatcher::publish_job(&self.bus, event_type, &job);

        // Completion freed a capacity unit.
        dispatcher::run_placement(&state.registry, &mut state.ledger, &self.bus);
        Ok(())
    }

    /// Reclaim jobs stuck `inprogress` longer than `timeout` (no completion
    /// and no clean disconnect), then re-run placement.
    pub async fn reap_stalled(&self, timeout: Duration) {
        let mut guard = self.state.lock().await;
        let state = &mut *guard;
        let cutoff = Utc::now()
            - chrono::Duration::from_std(timeout).unwrap_or_else(|_| chrono::Duration::seconds(0));
        dispatcher::reap_stalled(&state.registry, &mut state.ledger, &self.bus, cutoff);
    }

    // -----------------------------------------------------------------------
    // Snapshots and fan-out
    // -----------------------------------------------------------------------

    /// Registry snapshot, most recently seen first.
    pub async fn list_devices(&self) -> Vec<DeviceSnapshot> {
        self.state.lock().await.registry.list()
    }

    /// All jobs, oldest first.
    pub async fn list_jobs(&self) -> Vec<JobSnapshot> {
        self.state.lock().await.ledger.list_all()
    }

    /// Jobs submitted by one device, oldest first.
    pub async fn list_jobs_for_device(&self, uuid: Uuid) -> Vec<JobSnapshot> {
        self.state.lock().await.ledger.list_for_device(uuid)
    }

    /// Best-effort fan-out of one message to every live connection.
    pub async fn broadcast(&self, message: Outbound) {
        self.state.lock().await.registry.broadcast(&message);
    }

    /// Number of live connections.
    pub async fn connection_count(&self) -> usize {
        self.state.lock().await.registry.connection_count()
    }

    /// Close every connection's outbound channel (graceful shutdown).
    pub async fn shutdown_all(&self) {
        self.state.lock().await.registry.shutdown_all();
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn submit_locked(
        &self,
        state: &mut CoordinatorState,
        uuid: Uuid,
        filename: String,
        size: i64,
    ) -> JobSnapshot {
        let id = state.next_job_id;
        state.next_job_id += 1;
        let job = state.ledger.submit(id, uuid, filename, size);
        tracing::info!(job_id = id, uuid = %uuid, filename = %job.filename, "Job queued");
        dispatcher::publish_job(&self.bus, bus::JOB_QUEUED, job);
        job.snapshot()
    }

    /// Publish a device event carrying both the changed device and the full
    /// registry snapshot (the wire re-sends the whole list on every change).
    fn publish_device(&self, registry: &Registry, event_type: &str, snapshot: DeviceSnapshot) {
        let uuid = snapshot.uuid;
        self.bus.publish(
            CoordinatorEvent::new(event_type)
                .with_device(uuid)
                .with_payload(serde_json::json!({
                    "device": snapshot,
                    "devices": registry.list(),
                })),
        );
    }
}
