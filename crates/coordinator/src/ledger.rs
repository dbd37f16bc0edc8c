//! Job ledger: the authoritative record of every submitted unit of work.
//!
//! The ledger exclusively owns job records. Status changes go through the
//! transition methods below, which enforce the monotonic state machine:
//! terminal states are final, and the only backward edge is the explicit
//! `inprogress -> queued` reclaim path.
//!
//! Not internally synchronized — the [`Coordinator`](crate::Coordinator)
//! serializes all access behind its single lock.

use std::collections::BTreeMap;

use chrono::Utc;
use fedgrid_core::error::CoreError;
use fedgrid_core::status::JobStatus;
use fedgrid_core::types::{JobId, Timestamp};
use uuid::Uuid;

use crate::protocol::JobSnapshot;

/// One submitted work item.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    /// Device that submitted the job (not necessarily the one processing it).
    pub device_uuid: Uuid,
    pub filename: String,
    pub size_bytes: i64,
    pub submitted_at: Timestamp,
    pub status: JobStatus,
    /// Device currently processing the job. Cleared on reclaim.
    pub assigned_device: Option<Uuid>,
    /// When the current assignment was made; drives the stall timeout.
    pub assigned_at: Option<Timestamp>,
    /// Reference to the produced result, set only when `done`.
    pub result_ref: Option<String>,
    /// Server-side path of the uploaded bytes, once the file arrived.
    pub stored_path: Option<String>,
}

impl Job {
    /// Wire-shaped view for `upload_status` / `task_queue` and persistence.
    pub fn snapshot(&self) -> JobSnapshot {
        let download_url = if self.status == JobStatus::Done {
            self.result_ref.clone().or_else(|| self.stored_path.clone())
        } else {
            None
        };
        JobSnapshot {
            id: self.id,
            uuid: self.device_uuid,
            filename: self.filename.clone(),
            size: self.size_bytes,
            timestamp: self.submitted_at,
            status: self.status,
            assigned_to: self.assigned_device,
            download_url,
        }
    }
}

/// Owns all job records, in submission order (job ids are monotonic).
#[derive(Default)]
pub struct Ledger {
    jobs: BTreeMap<JobId, Job>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a new job in `queued` state.
    pub fn submit(&mut self, id: JobId, device_uuid: Uuid, filename: String, size: i64) -> &Job {
        let job = Job {
            id,
            device_uuid,
            filename,
            size_bytes: size,
            submitted_at: Utc::now(),
            status: JobStatus::Queued,
            assigned_device: None,
            assigned_at: None,
            result_ref: None,
            stored_path: None,
        };
        self.jobs.entry(id).or_insert(job)
    }

    /// Move a queued job to `inprogress` on the given device.
    pub fn assign(&mut self, id: JobId, device: Uuid) -> Result<&Job, CoreError> {
        let job = self.get_mut(id)?;
        Self::check(job.status, JobStatus::InProgress)?;
        job.status = JobStatus::InProgress;
        job.assigned_device = Some(device);
        job.assigned_at = Some(Utc::now());
        Ok(job)
    }

    /// Move an in-progress job to `done` or `failed`.
    ///
    /// Rejects anything else — including completions for jobs that were
    /// already reclaimed back to `queued` (the caller logs those).
    pub fn complete(
        &mut self,
        id: JobId,
        outcome: JobStatus,
        result_ref: Option<String>,
    ) -> Result<&Job, CoreError> {
        if !outcome.is_terminal() {
            return Err(CoreError::Validation(format!(
                "Completion status must be done or failed, got {outcome}"
            )));
        }
        let job = self.get_mut(id)?;
        Self::check(job.status, outcome)?;
        job.status = outcome;
        if outcome == JobStatus::Done {
            job.result_ref = result_ref;
        }
        Ok(job)
    }

    /// Return an in-progress job to the queue with its assignment cleared.
    pub fn reclaim(&mut self, id: JobId) -> Result<&Job, CoreError> {
        let job = self.get_mut(id)?;
        Self::check(job.status, JobStatus::Queued)?;
        job.status = JobStatus::Queued;
        job.assigned_device = None;
        job.assigned_at = None;
        Ok(job)
    }

    /// Attach the stored-upload path to a job (no status change).
    pub fn attach_stored_path(&mut self, id: JobId, path: String) -> Result<&Job, CoreError> {
        let job = self.get_mut(id)?;
        job.stored_path = Some(path);
        Ok(job)
    }

    pub fn find(&self, id: JobId) -> Option<&Job> {
        self.jobs.get(&id)
    }

    /// All jobs, oldest first (initial-state sync for new clients).
    pub fn list_all(&self) -> Vec<JobSnapshot> {
        self.jobs.values().map(Job::snapshot).collect()
    }

    /// Jobs submitted by one device, oldest first.
    pub fn list_for_device(&self, uuid: Uuid) -> Vec<JobSnapshot> {
        self.jobs
            .values()
            .filter(|j| j.device_uuid == uuid)
            .map(Job::snapshot)
            .collect()
    }

    /// Ids of queued jobs, oldest first — the dispatcher's scan order.
    pub fn queued_ids(&self) -> Vec<JobId> {
        self.jobs
            .values()
            .filter(|j| j.status == JobStatus::Queued)
            .map(|j| j.id)
            .collect()
    }

    /// Ids of in-progress jobs assigned to the given device.
    pub fn inprogress_for(&self, device: Uuid) -> Vec<JobId> {
        self.jobs
            .values()
            .filter(|j| j.status == JobStatus::InProgress && j.assigned_device == Some(device))
            .map(|j| j.id)
            .collect()
    }

    /// Number of in-flight jobs currently committed to a device.
    pub fn active_count(&self, device: Uuid) -> u32 {
        self.inprogress_for(device).len() as u32
    }

    /// Ids of in-progress jobs whose assignment predates `cutoff`.
    pub fn stalled_ids(&self, cutoff: Timestamp) -> Vec<JobId> {
        self.jobs
            .values()
            .filter(|j| {
                j.status == JobStatus::InProgress
                    && j.assigned_at.is_some_and(|at| at < cutoff)
            })
            .map(|j| j.id)
            .collect()
    }

    /// Newest non-terminal job submitted by `uuid` with the given filename.
    ///
    /// Used to correlate the multipart upload with its `upload_start` job.
    pub fn find_correlatable(&self, uuid: Uuid, filename: &str) -> Option<JobId> {
        self.jobs
            .values()
            .rev()
            .find(|j| {
                j.device_uuid == uuid && j.filename == filename && !j.status.is_terminal()
            })
            .map(|j| j.id)
    }

    fn get_mut(&mut self, id: JobId) -> Result<&mut Job, CoreError> {
        self.jobs.get_mut(&id).ok_or(CoreError::NotFound {
            entity: "Job",
            id: id.to_string(),
        })
    }

    fn check(from: JobStatus, to: JobStatus) -> Result<(), CoreError> {
        if from.can_transition_to(to) {
            Ok(())
        } else {
            Err(CoreError::InvalidTransition { from, to })
        }
    }
}
