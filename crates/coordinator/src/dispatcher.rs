//! Dispatcher: capacity-aware placement and reclaim passes.
//!
//! Every function here runs with the coordinator lock held, so capacity
//! reads and assignment writes are atomic with respect to each other and to
//! disconnect/completion handling. The policy is greedy, non-preemptive and
//! work-conserving: queued jobs are scanned oldest-first and each goes to
//! the connected device with the most spare capacity (ties broken by
//! earliest `last_seen`). No capacity means the job simply stays queued.

use fedgrid_core::placement::{self, Candidate};
use fedgrid_core::types::Timestamp;
use fedgrid_events::{bus, CoordinatorEvent, EventBus};
use uuid::Uuid;

use crate::ledger::{Job, Ledger};
use crate::protocol::Outbound;
use crate::registry::Registry;

/// Publish a job-state event carrying the job's wire snapshot.
pub(crate) fn publish_job(bus: &EventBus, event_type: &str, job: &Job) {
    bus.publish(
        CoordinatorEvent::new(event_type)
            .with_job(job.id)
            .with_device(job.device_uuid)
            .with_payload(serde_json::json!({ "job": job.snapshot() })),
    );
}

/// One placement pass over all queued jobs.
///
/// An individual device failing to accept an assignment (closed channel)
/// requeues that one job and moves on — dispatch failure is never fatal.
pub(crate) fn run_placement(registry: &Registry, ledger: &mut Ledger, bus: &EventBus) {
    for job_id in ledger.queued_ids() {
        let connected = registry.connected();
        let candidates: Vec<Candidate> = connected
            .iter()
            .map(|d| Candidate {
                cores: d.capabilities.effective_cores(),
                active_jobs: ledger.active_count(d.uuid),
                last_seen: d.last_seen,
            })
            .collect();

        // Each job costs one capacity unit, so if nothing can take this one,
        // nothing can take the rest of the queue either.
        let Some(idx) = placement::select_device(&candidates) else {
            break;
        };
        let device_uuid = connected[idx].uuid;

        let job = match ledger.assign(job_id, device_uuid) {
            Ok(job) => job.clone(),
            Err(e) => {
                tracing::error!(job_id, error = %e, "Placement skipped unassignable job");
                continue;
            }
        };

        let delivered = registry.send_to_device(
            device_uuid,
            Outbound::JobAssign {
                id: job.id,
                filename: job.filename.clone(),
                size: job.size_bytes,
            },
        );

        if delivered {
            tracing::info!(job_id, device = %device_uuid, "Job assigned");
            publish_job(bus, bus::JOB_ASSIGNED, &job);
        } else {
            // Transport failure on this one device: undo the assignment
            // before anyone observed it and try the next queued job.
            tracing::warn!(
                job_id,
                device = %device_uuid,
                "Assignment delivery failed, job requeued"
            );
            if let Err(e) = ledger.reclaim(job_id) {
                tracing::error!(job_id, error = %e, "Failed to requeue undelivered job");
            }
        }
    }
}

/// Return every in-progress job assigned to `device` to the queue.
///
/// Runs in the same lock acquisition as the disconnect that triggered it, so
/// a completion signal can never interleave: one that arrived before the
/// disconnect was already honored, one that arrives after reclaim is
/// rejected by the ledger's state machine.
pub(crate) fn reclaim_device(ledger: &mut Ledger, bus: &EventBus, device: Uuid) {
    for job_id in ledger.inprogress_for(device) {
        match ledger.reclaim(job_id) {
            Ok(job) => {
                tracing::info!(job_id, device = %device, "Job reclaimed from lost device");
                publish_job(bus, bus::JOB_RECLAIMED, job);
            }
            Err(e) => {
                tracing::error!(job_id, error = %e, "Reclaim failed");
            }
        }
    }
}

/// Treat jobs in progress since before `cutoff` as device-lost and reclaim
/// them, then re-run placement.
///
/// Covers devices that stall without a clean disconnect event.
pub(crate) fn reap_stalled(
    registry: &Registry,
    ledger: &mut Ledger,
    bus: &EventBus,
    cutoff: Timestamp,
) {
    let stalled = ledger.stalled_ids(cutoff);
    if stalled.is_empty() {
        return;
    }
    tracing::warn!(count = stalled.len(), "Reclaiming stalled jobs");
    for job_id in stalled {
        match ledger.reclaim(job_id) {
            Ok(job) => publish_job(bus, bus::JOB_RECLAIMED, job),
            Err(e) => tracing::error!(job_id, error = %e, "Stall reclaim failed"),
        }
    }
    run_placement(registry, ledger, bus);
}
