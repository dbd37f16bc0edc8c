//! Job and device lifecycle states.
//!
//! Wire names match the browser client: `queued`, `inprogress`, `done`,
//! `failed` for jobs; `connected`, `disconnected` for devices.

use serde::{Deserialize, Serialize};

/// Lifecycle status of a submitted job.
///
/// Transitions are monotonic along `Queued -> InProgress -> {Done, Failed}`,
/// with one explicit backward edge: `InProgress -> Queued` when the assigned
/// device is lost and the job is reclaimed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    #[serde(rename = "inprogress")]
    InProgress,
    Done,
    Failed,
}

impl JobStatus {
    /// `Done` and `Failed` are terminal: no transition leaves them.
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Done | JobStatus::Failed)
    }

    /// Whether moving from `self` to `next` is a legal transition.
    ///
    /// The only legal edges are:
    ///
    /// ```text
    /// queued --assign--> inprogress --complete--> done
    /// queued --assign--> inprogress --fail------> failed
    /// inprogress --device-lost--> queued
    /// ```
    pub fn can_transition_to(self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Queued, JobStatus::InProgress)
                | (JobStatus::InProgress, JobStatus::Done)
                | (JobStatus::InProgress, JobStatus::Failed)
                | (JobStatus::InProgress, JobStatus::Queued)
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Queued => "queued",
            JobStatus::InProgress => "inprogress",
            JobStatus::Done => "done",
            JobStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Connection state of a registered device.
///
/// Devices are never hard-deleted; a departed device is retained as
/// `Disconnected` for history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceState {
    Connected,
    Disconnected,
}
