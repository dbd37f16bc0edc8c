//! Integration tests for the coordinator: registry invariants, the job
//! state machine, dispatch, reclaim, and initial-sync behaviour.
//!
//! Each test builds its own coordinator instance; nothing is process-global.

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use fedgrid_coordinator::protocol::{DeviceInfo, JobResult, Outbound, UploadStart};
use fedgrid_coordinator::{Broadcaster, ConnId, Coordinator};
use fedgrid_core::capability::{DeviceCapabilities, ReportedCores};
use fedgrid_core::error::CoreError;
use fedgrid_core::status::{DeviceState, JobStatus};
use fedgrid_events::{bus, EventBus};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn new_coordinator() -> (Arc<Coordinator>, Arc<EventBus>) {
    let bus = Arc::new(EventBus::default());
    let coordinator = Arc::new(Coordinator::new(Arc::clone(&bus), 1));
    (coordinator, bus)
}

async fn connect(
    coordinator: &Coordinator,
    uuid: Option<Uuid>,
) -> (ConnId, mpsc::UnboundedReceiver<Outbound>) {
    let conn_id = Uuid::new_v4();
    let (tx, rx) = mpsc::unbounded_channel();
    coordinator.connect(conn_id, uuid, tx).await;
    (conn_id, rx)
}

fn caps(cores: i64) -> DeviceCapabilities {
    DeviceCapabilities {
        cpu_cores: ReportedCores::Count(cores),
        ..Default::default()
    }
}

fn device_info(uuid: Uuid, cores: i64) -> DeviceInfo {
    DeviceInfo {
        sid: None,
        uuid,
        capabilities: caps(cores),
    }
}

fn upload(uuid: Uuid, filename: &str, size: i64) -> UploadStart {
    UploadStart {
        filename: filename.to_string(),
        size,
        uuid,
    }
}

/// Drain everything currently buffered on a connection channel.
fn drain(rx: &mut mpsc::UnboundedReceiver<Outbound>) -> Vec<Outbound> {
    let mut messages = Vec::new();
    while let Ok(msg) = rx.try_recv() {
        messages.push(msg);
    }
    messages
}

/// Event types currently buffered on a bus receiver.
fn drain_events(rx: &mut tokio::sync::broadcast::Receiver<fedgrid_events::CoordinatorEvent>) -> Vec<String> {
    let mut types = Vec::new();
    while let Ok(event) = rx.try_recv() {
        types.push(event.event_type);
    }
    types
}

// ---------------------------------------------------------------------------
// Test: initial sync on connect
// ---------------------------------------------------------------------------

#[tokio::test]
async fn connect_sends_ack_devices_and_task_queue() {
    let (coordinator, _bus) = new_coordinator();

    let (_conn, mut rx) = connect(&coordinator, None).await;
    let messages = drain(&mut rx);

    assert_matches!(messages[0], Outbound::ConnectAck { status: "connected" });
    assert_matches!(messages[1], Outbound::AllDevices { .. });
    assert_matches!(messages[2], Outbound::TaskQueue { .. });
}

// ---------------------------------------------------------------------------
// Test: at most one connected entry per durable UUID
// ---------------------------------------------------------------------------

#[tokio::test]
async fn reregistration_supersedes_not_duplicates() {
    let (coordinator, _bus) = new_coordinator();
    let uuid = Uuid::new_v4();

    let (conn_a, _rx_a) = connect(&coordinator, None).await;
    coordinator.register_device(conn_a, device_info(uuid, 4)).await;

    // Same durable UUID arrives on a new connection before the old one
    // disconnected (reconnect race).
    let (conn_b, _rx_b) = connect(&coordinator, None).await;
    coordinator.register_device(conn_b, device_info(uuid, 4)).await;

    let devices = coordinator.list_devices().await;
    assert_eq!(devices.len(), 1, "Superseded, not duplicated");
    assert_eq!(devices[0].status, DeviceState::Connected);
    assert_eq!(devices[0].sid, conn_b);
}

#[tokio::test]
async fn superseded_connection_messages_are_ignored() {
    let (coordinator, _bus) = new_coordinator();
    let uuid = Uuid::new_v4();

    let (conn_a, _rx_a) = connect(&coordinator, None).await;
    coordinator.register_device(conn_a, device_info(uuid, 4)).await;
    let (conn_b, _rx_b) = connect(&coordinator, None).await;
    coordinator.register_device(conn_b, device_info(uuid, 4)).await;

    // The stale connection may no longer submit for the device.
    let result = coordinator.submit_upload(conn_a, upload(uuid, "stale.csv", 10)).await;
    assert_matches!(result, Err(CoreError::Conflict(_)));

    // Nor does its disconnect take the device down.
    coordinator.disconnect(conn_a).await;
    let devices = coordinator.list_devices().await;
    assert_eq!(devices[0].status, DeviceState::Connected);
}

// ---------------------------------------------------------------------------
// Test: full lifecycle happy path
// ---------------------------------------------------------------------------

#[tokio::test]
async fn submit_assign_complete_scenario() {
    let (coordinator, bus) = new_coordinator();
    let mut events = bus.subscribe();
    let uuid = Uuid::new_v4();

    let (conn, mut rx) = connect(&coordinator, None).await;
    coordinator.register_device(conn, device_info(uuid, 8)).await;

    let snapshot = coordinator
        .submit_upload(conn, upload(uuid, "data.csv", 1024))
        .await
        .expect("submission should succeed");
    assert_eq!(snapshot.filename, "data.csv");

    // The device received the work dispatch.
    let messages = drain(&mut rx);
    let assign = messages.iter().find_map(|m| match m {
        Outbound::JobAssign { id, filename, size } => Some((*id, filename.clone(), *size)),
        _ => None,
    });
    assert_eq!(assign, Some((snapshot.id, "data.csv".to_string(), 1024)));

    // Completion signal from the processing device.
    coordinator
        .job_result(
            conn,
            JobResult {
                id: snapshot.id,
                status: JobStatus::Done,
                result_ref: Some("results/data.csv".into()),
            },
        )
        .await
        .expect("completion should be honored");

    // Observed status sequence is queued -> assigned(inprogress) -> done.
    let types = drain_events(&mut events);
    let job_events: Vec<&str> = types
        .iter()
        .filter(|t| t.starts_with("job."))
        .map(String::as_str)
        .collect();
    assert_eq!(job_events, [bus::JOB_QUEUED, bus::JOB_ASSIGNED, bus::JOB_DONE]);

    let jobs = coordinator.list_jobs().await;
    assert_eq!(jobs[0].status, JobStatus::Done);
    assert_eq!(jobs[0].download_url.as_deref(), Some("results/data.csv"));
}

// ---------------------------------------------------------------------------
// Test: malformed capability report still registers (capacity 1)
// ---------------------------------------------------------------------------

#[tokio::test]
async fn zero_core_report_registers_with_capacity_one() {
    let (coordinator, _bus) = new_coordinator();
    let uuid = Uuid::new_v4();

    let (conn, mut rx) = connect(&coordinator, None).await;
    coordinator.register_device(conn, device_info(uuid, 0)).await;

    let devices = coordinator.list_devices().await;
    assert_eq!(devices.len(), 1, "Malformed report must not block registration");
    assert_eq!(devices[0].cpu_cores, 1);

    // Effective capacity 1: first job dispatches, second stays queued.
    coordinator.submit_upload(conn, upload(uuid, "a.csv", 1)).await.unwrap();
    coordinator.submit_upload(conn, upload(uuid, "b.csv", 1)).await.unwrap();

    let assigns = drain(&mut rx)
        .into_iter()
        .filter(|m| matches!(m, Outbound::JobAssign { .. }))
        .count();
    assert_eq!(assigns, 1);

    let jobs = coordinator.list_jobs().await;
    assert_eq!(jobs[0].status, JobStatus::InProgress);
    assert_eq!(jobs[1].status, JobStatus::Queued);
}

// ---------------------------------------------------------------------------
// Test: work conservation — freed capacity drains the queue
// ---------------------------------------------------------------------------

#[tokio::test]
async fn completion_frees_capacity_and_next_job_dispatches() {
    let (coordinator, _bus) = new_coordinator();
    let uuid = Uuid::new_v4();

    let (conn, mut rx) = connect(&coordinator, None).await;
    coordinator.register_device(conn, device_info(uuid, 1)).await;

    let first = coordinator.submit_upload(conn, upload(uuid, "a.csv", 1)).await.unwrap();
    coordinator.submit_upload(conn, upload(uuid, "b.csv", 1)).await.unwrap();
    drain(&mut rx);

    coordinator
        .job_result(conn, JobResult { id: first.id, status: JobStatus::Done, result_ref: None })
        .await
        .unwrap();

    // The queued job was picked up in the same pass.
    let messages = drain(&mut rx);
    assert!(
        messages.iter().any(|m| matches!(
            m,
            Outbound::JobAssign { filename, .. } if filename == "b.csv"
        )),
        "Spare capacity plus a queued job must produce an assignment"
    );
}

// ---------------------------------------------------------------------------
// Test: placement prefers the device with the most spare capacity
// ---------------------------------------------------------------------------

#[tokio::test]
async fn placement_picks_most_spare_capacity() {
    let (coordinator, _bus) = new_coordinator();
    let uuid_small = Uuid::new_v4();
    let uuid_big = Uuid::new_v4();

    let (conn_small, mut rx_small) = connect(&coordinator, None).await;
    coordinator.register_device(conn_small, device_info(uuid_small, 2)).await;
    let (conn_big, mut rx_big) = connect(&coordinator, None).await;
    coordinator.register_device(conn_big, device_info(uuid_big, 8)).await;

    coordinator.submit_upload(conn_small, upload(uuid_small, "data.csv", 1)).await.unwrap();

    let big_got_it = drain(&mut rx_big)
        .iter()
        .any(|m| matches!(m, Outbound::JobAssign { .. }));
    let small_got_it = drain(&mut rx_small)
        .iter()
        .any(|m| matches!(m, Outbound::JobAssign { .. }));

    assert!(big_got_it, "8-core device had the most spare capacity");
    assert!(!small_got_it);
}

// ---------------------------------------------------------------------------
// Test: reclaim returns in-flight jobs to the queue
// ---------------------------------------------------------------------------

#[tokio::test]
async fn disconnect_reclaims_both_inflight_jobs() {
    let (coordinator, bus) = new_coordinator();
    let uuid = Uuid::new_v4();

    let (conn, _rx) = connect(&coordinator, None).await;
    coordinator.register_device(conn, device_info(uuid, 2)).await;
    coordinator.submit_upload(conn, upload(uuid, "a.csv", 1)).await.unwrap();
    coordinator.submit_upload(conn, upload(uuid, "b.csv", 1)).await.unwrap();

    // Both in flight on the only device.
    let jobs = coordinator.list_jobs().await;
    assert!(jobs.iter().all(|j| j.status == JobStatus::InProgress));

    let mut events = bus.subscribe();
    coordinator.disconnect(conn).await;

    let jobs = coordinator.list_jobs().await;
    assert!(jobs.iter().all(|j| j.status == JobStatus::Queued));
    assert!(jobs.iter().all(|j| j.assigned_to.is_none()), "Assignment cleared");

    let types = drain_events(&mut events);
    assert_eq!(types.iter().filter(|t| *t == bus::JOB_RECLAIMED).count(), 2);
    assert!(types.contains(&bus::DEVICE_DISCONNECTED.to_string()));

    // A different device with capacity may pick both up.
    let uuid_b = Uuid::new_v4();
    let (conn_b, mut rx_b) = connect(&coordinator, None).await;
    coordinator.register_device(conn_b, device_info(uuid_b, 4)).await;

    let assigns = drain(&mut rx_b)
        .into_iter()
        .filter(|m| matches!(m, Outbound::JobAssign { .. }))
        .count();
    assert_eq!(assigns, 2, "Reclaimed jobs are reassignable to another device");
}

// ---------------------------------------------------------------------------
// Test: disconnect is idempotent
// ---------------------------------------------------------------------------

#[tokio::test]
async fn double_disconnect_is_noop() {
    let (coordinator, bus) = new_coordinator();
    let uuid = Uuid::new_v4();

    let (conn, _rx) = connect(&coordinator, None).await;
    coordinator.register_device(conn, device_info(uuid, 4)).await;

    coordinator.disconnect(conn).await;
    let after_first = coordinator.list_devices().await;

    let mut events = bus.subscribe();
    coordinator.disconnect(conn).await;
    let after_second = coordinator.list_devices().await;

    assert_eq!(after_first[0].status, DeviceState::Disconnected);
    assert_eq!(after_second[0].status, DeviceState::Disconnected);
    assert!(
        drain_events(&mut events).is_empty(),
        "Second disconnect must not publish anything"
    );
}

// ---------------------------------------------------------------------------
// Test: late completion after reclaim is rejected
// ---------------------------------------------------------------------------

#[tokio::test]
async fn late_completion_after_reclaim_is_rejected() {
    let (coordinator, _bus) = new_coordinator();
    let uuid = Uuid::new_v4();

    let (conn, _rx) = connect(&coordinator, None).await;
    coordinator.register_device(conn, device_info(uuid, 4)).await;
    let job = coordinator.submit_upload(conn, upload(uuid, "a.csv", 1)).await.unwrap();

    coordinator.disconnect(conn).await;

    // The job went back to queued; the stale device's completion loses.
    let result = coordinator
        .job_result(conn, JobResult { id: job.id, status: JobStatus::Done, result_ref: None })
        .await;
    assert_matches!(result, Err(CoreError::InvalidTransition { .. }));

    let jobs = coordinator.list_jobs().await;
    assert_eq!(jobs[0].status, JobStatus::Queued);
}

#[tokio::test]
async fn completion_of_done_job_is_rejected() {
    let (coordinator, _bus) = new_coordinator();
    let uuid = Uuid::new_v4();

    let (conn, _rx) = connect(&coordinator, None).await;
    coordinator.register_device(conn, device_info(uuid, 4)).await;
    let job = coordinator.submit_upload(conn, upload(uuid, "a.csv", 1)).await.unwrap();

    coordinator
        .job_result(conn, JobResult { id: job.id, status: JobStatus::Done, result_ref: None })
        .await
        .unwrap();

    let again = coordinator
        .job_result(conn, JobResult { id: job.id, status: JobStatus::Failed, result_ref: None })
        .await;
    assert_matches!(again, Err(CoreError::InvalidTransition { .. }));
}

// ---------------------------------------------------------------------------
// Test: unknown job id yields NotFound
// ---------------------------------------------------------------------------

#[tokio::test]
async fn completion_for_unknown_job_is_not_found() {
    let (coordinator, _bus) = new_coordinator();
    let (conn, _rx) = connect(&coordinator, None).await;

    let result = coordinator
        .job_result(conn, JobResult { id: 999, status: JobStatus::Done, result_ref: None })
        .await;
    assert_matches!(result, Err(CoreError::NotFound { .. }));
}

// ---------------------------------------------------------------------------
// Test: stall reaper reclaims and re-dispatches
// ---------------------------------------------------------------------------

#[tokio::test]
async fn stalled_job_is_reclaimed_and_redispatched() {
    let (coordinator, bus) = new_coordinator();
    let uuid = Uuid::new_v4();

    let (conn, _rx) = connect(&coordinator, None).await;
    coordinator.register_device(conn, device_info(uuid, 4)).await;
    coordinator.submit_upload(conn, upload(uuid, "a.csv", 1)).await.unwrap();

    let mut events = bus.subscribe();
    tokio::time::sleep(Duration::from_millis(10)).await;
    coordinator.reap_stalled(Duration::from_millis(1)).await;

    // Reclaimed as device-lost, then immediately re-placed (the device is
    // still connected with spare capacity).
    let types = drain_events(&mut events);
    assert_eq!(types, [bus::JOB_RECLAIMED.to_string(), bus::JOB_ASSIGNED.to_string()]);
}

#[tokio::test]
async fn fresh_assignment_survives_the_reaper() {
    let (coordinator, bus) = new_coordinator();
    let uuid = Uuid::new_v4();

    let (conn, _rx) = connect(&coordinator, None).await;
    coordinator.register_device(conn, device_info(uuid, 4)).await;
    coordinator.submit_upload(conn, upload(uuid, "a.csv", 1)).await.unwrap();

    let mut events = bus.subscribe();
    coordinator.reap_stalled(Duration::from_secs(300)).await;

    assert!(drain_events(&mut events).is_empty(), "Within the window, nothing reclaimed");
}

// ---------------------------------------------------------------------------
// Test: upload-file correlation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn upload_file_correlates_with_existing_job() {
    let (coordinator, _bus) = new_coordinator();
    let uuid = Uuid::new_v4();

    let (conn, _rx) = connect(&coordinator, None).await;
    let job = coordinator.submit_upload(conn, upload(uuid, "data.csv", 1024)).await.unwrap();

    let attached = coordinator
        .record_upload_file(uuid, "data.csv".into(), 1024, "uploads/data.csv".into())
        .await;
    assert_eq!(attached.id, job.id, "Bytes attach to the upload_start job");

    assert_eq!(coordinator.list_jobs().await.len(), 1);
}

#[tokio::test]
async fn upload_file_correlates_when_announced_with_a_path() {
    let (coordinator, _bus) = new_coordinator();
    let uuid = Uuid::new_v4();

    // A client announcing "dir/data.csv" and then uploading bytes named
    // "data.csv" is talking about the same file.
    let (conn, _rx) = connect(&coordinator, None).await;
    let job = coordinator.submit_upload(conn, upload(uuid, "dir/data.csv", 1024)).await.unwrap();
    assert_eq!(job.filename, "data.csv", "Stored path-stripped");

    let attached = coordinator
        .record_upload_file(uuid, "data.csv".into(), 1024, "uploads/data.csv".into())
        .await;
    assert_eq!(attached.id, job.id);
    assert_eq!(coordinator.list_jobs().await.len(), 1, "No duplicate job");
}

#[tokio::test]
async fn upload_announced_as_bare_directory_is_rejected() {
    let (coordinator, _bus) = new_coordinator();
    let uuid = Uuid::new_v4();

    let (conn, _rx) = connect(&coordinator, None).await;
    let result = coordinator.submit_upload(conn, upload(uuid, "dir/", 1)).await;
    assert_matches!(result, Err(CoreError::Validation(_)));
}

#[tokio::test]
async fn upload_file_without_matching_job_submits_new_one() {
    let (coordinator, _bus) = new_coordinator();
    let uuid = Uuid::new_v4();

    let snapshot = coordinator
        .record_upload_file(uuid, "orphan.csv".into(), 64, "uploads/orphan.csv".into())
        .await;

    assert_eq!(snapshot.status, JobStatus::Queued);
    assert_eq!(coordinator.list_jobs_for_device(uuid).await.len(), 1);
}

// ---------------------------------------------------------------------------
// Test: reconnect with the connection-parameter UUID rebinds the device
// ---------------------------------------------------------------------------

#[tokio::test]
async fn reconnect_with_uuid_param_rebinds_before_device_info() {
    let (coordinator, _bus) = new_coordinator();
    let uuid = Uuid::new_v4();

    let (conn_a, _rx_a) = connect(&coordinator, None).await;
    coordinator.register_device(conn_a, device_info(uuid, 4)).await;
    coordinator.disconnect(conn_a).await;

    // Reconnect carrying only the uuid query parameter.
    let (conn_b, _rx_b) = connect(&coordinator, Some(uuid)).await;

    let devices = coordinator.list_devices().await;
    assert_eq!(devices[0].status, DeviceState::Connected);
    assert_eq!(devices[0].sid, conn_b);
    assert_eq!(devices[0].cpu_cores, 4, "Capabilities survive the reconnect");
}

// ---------------------------------------------------------------------------
// Test: broadcaster fans job transitions out to every connection
// ---------------------------------------------------------------------------

#[tokio::test]
async fn broadcaster_delivers_upload_status_to_all_connections() {
    let (coordinator, bus) = new_coordinator();
    let broadcaster = Broadcaster::new(Arc::clone(&coordinator));
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(broadcaster.run(bus.subscribe(), cancel.clone()));

    let uuid = Uuid::new_v4();
    let (conn, mut rx_device) = connect(&coordinator, None).await;
    let (_observer_conn, mut rx_observer) = connect(&coordinator, None).await;
    coordinator.register_device(conn, device_info(uuid, 8)).await;
    coordinator.submit_upload(conn, upload(uuid, "data.csv", 1024)).await.unwrap();

    // Both the submitting device and the passive observer see the queued
    // transition via broadcast.
    for rx in [&mut rx_device, &mut rx_observer] {
        let saw_status = tokio::time::timeout(Duration::from_secs(1), async {
            while let Some(msg) = rx.recv().await {
                if matches!(&msg, Outbound::UploadStatus(job) if job.filename == "data.csv") {
                    return true;
                }
            }
            false
        })
        .await
        .expect("Broadcast should arrive within the timeout");
        assert!(saw_status);
    }

    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("Broadcaster should stop once cancelled")
        .expect("Broadcaster task should not panic");
}

#[tokio::test]
async fn broadcaster_stops_on_cancellation_while_bus_is_alive() {
    let (coordinator, bus) = new_coordinator();
    let broadcaster = Broadcaster::new(Arc::clone(&coordinator));
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(broadcaster.run(bus.subscribe(), cancel.clone()));

    // The coordinator (and thus the bus sender) outlives the broadcaster, so
    // the channel never closes; the token alone must end the loop.
    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("Broadcaster should stop once cancelled")
        .expect("Broadcaster task should not panic");
    assert_eq!(coordinator.connection_count().await, 0);
}
