//! Wire protocol for the per-device websocket channel.
//!
//! Messages are JSON objects tagged by a `type` field. Field names match the
//! browser client (`device_info`, `upload_start`, `all_devices`,
//! `device_response`, `upload_status`); `job_assign` / `job_result` carry the
//! server-to-device work dispatch and its completion signal.

use fedgrid_core::capability::{ClientKind, DeviceCapabilities, GpuInfo};
use fedgrid_core::status::{DeviceState, JobStatus};
use fedgrid_core::types::{JobId, Timestamp};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Inbound (client -> coordinator)
// ---------------------------------------------------------------------------

/// Capability report sent by a device right after connecting (and again
/// whenever its facts change).
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceInfo {
    /// Client-side echo of its session id; informational only, the server
    /// trusts its own connection identity.
    #[serde(default)]
    pub sid: Option<String>,
    pub uuid: Uuid,
    #[serde(flatten)]
    pub capabilities: DeviceCapabilities,
}

/// Job submission metadata. The client also spreads its capability report
/// into this message; those extra fields are ignored here.
#[derive(Debug, Clone, Deserialize)]
pub struct UploadStart {
    pub filename: String,
    pub size: i64,
    pub uuid: Uuid,
}

/// Strip path components from a client-supplied filename, keeping only the
/// final segment.
///
/// Applied to every filename entering the system — `upload_start` metadata
/// and multipart file fields alike — so a job announced as `dir/data.csv`
/// and its uploaded bytes named `data.csv` correlate as the same file.
pub fn sanitize_filename(filename: &str) -> String {
    filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or_default()
        .to_string()
}

/// Completion signal from the device a job was assigned to.
#[derive(Debug, Clone, Deserialize)]
pub struct JobResult {
    pub id: JobId,
    /// Must be `done` or `failed`; anything else is rejected.
    pub status: JobStatus,
    #[serde(default, rename = "resultRef")]
    pub result_ref: Option<String>,
}

/// All messages a client may send over the websocket.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Inbound {
    DeviceInfo(DeviceInfo),
    UploadStart(UploadStart),
    JobResult(JobResult),
}

// ---------------------------------------------------------------------------
// Outbound (coordinator -> clients)
// ---------------------------------------------------------------------------

/// Registry view of one device, as sent in `all_devices`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    pub uuid: Uuid,
    /// Volatile connection identity; changes on every reconnect.
    pub sid: Uuid,
    pub client: ClientKind,
    #[serde(rename = "userAgent")]
    pub user_agent: Option<String>,
    /// Effective logical core count (normalized, >= 1).
    #[serde(rename = "cpuCores")]
    pub cpu_cores: u32,
    pub gpu: GpuInfo,
    pub status: DeviceState,
    #[serde(rename = "lastSeen")]
    pub last_seen: Timestamp,
}

/// Ledger view of one job, as sent in `upload_status` and `task_queue`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub id: JobId,
    /// Originating device UUID.
    pub uuid: Uuid,
    pub filename: String,
    pub size: i64,
    /// Submission time.
    pub timestamp: Timestamp,
    pub status: JobStatus,
    #[serde(rename = "assignedTo")]
    pub assigned_to: Option<Uuid>,
    /// Present only once the job is `done`.
    #[serde(rename = "downloadUrl")]
    pub download_url: Option<String>,
}

/// All messages the coordinator may push to a client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Outbound {
    /// Connection-established acknowledgment.
    ConnectAck { status: &'static str },
    /// Acknowledgment of a `device_info` submission.
    DeviceResponse {
        status: &'static str,
        message: &'static str,
    },
    /// Full registry snapshot, re-sent on every membership change.
    AllDevices { devices: Vec<DeviceSnapshot> },
    /// One message per job-state transition.
    UploadStatus(JobSnapshot),
    /// Work dispatch to the one device the job was assigned to.
    JobAssign {
        id: JobId,
        filename: String,
        size: i64,
    },
    /// Full job-ledger snapshot sent to newly connecting clients.
    TaskQueue { jobs: Vec<JobSnapshot> },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_info_deserializes_from_client_shape() {
        let msg: Inbound = serde_json::from_str(
            r#"{
                "type": "device_info",
                "sid": "abc123",
                "uuid": "6f9619ff-8b86-4d01-b42d-00cf4fc964ff",
                "client": "browser",
                "userAgent": "Mozilla/5.0",
                "cpuCores": 8,
                "gpu": { "vendor": "Apple", "renderer": "Apple M2" }
            }"#,
        )
        .unwrap();

        match msg {
            Inbound::DeviceInfo(info) => {
                assert_eq!(info.capabilities.effective_cores(), 8);
                assert_eq!(info.capabilities.gpu.vendor, "Apple");
            }
            other => panic!("Expected DeviceInfo, got: {other:?}"),
        }
    }

    #[test]
    fn upload_start_ignores_spread_capability_fields() {
        // The browser spreads deviceInfo into upload_start; extra fields
        // must not break parsing.
        let msg: Inbound = serde_json::from_str(
            r#"{
                "type": "upload_start",
                "filename": "data.csv",
                "size": 1024,
                "uuid": "6f9619ff-8b86-4d01-b42d-00cf4fc964ff",
                "userAgent": "Mozilla/5.0",
                "cpuCores": "Unavailable"
            }"#,
        )
        .unwrap();

        match msg {
            Inbound::UploadStart(u) => {
                assert_eq!(u.filename, "data.csv");
                assert_eq!(u.size, 1024);
            }
            other => panic!("Expected UploadStart, got: {other:?}"),
        }
    }

    #[test]
    fn sanitize_filename_strips_path_components() {
        assert_eq!(sanitize_filename("../../etc/passwd.csv"), "passwd.csv");
        assert_eq!(sanitize_filename("C:\\data\\set.csv"), "set.csv");
        assert_eq!(sanitize_filename("plain.csv"), "plain.csv");
        assert_eq!(sanitize_filename("dir/"), "");
    }

    #[test]
    fn job_result_deserializes() {
        let msg: Inbound = serde_json::from_str(
            r#"{"type": "job_result", "id": 7, "status": "done", "resultRef": "results/7.csv"}"#,
        )
        .unwrap();

        match msg {
            Inbound::JobResult(r) => {
                assert_eq!(r.id, 7);
                assert_eq!(r.status, JobStatus::Done);
                assert_eq!(r.result_ref.as_deref(), Some("results/7.csv"));
            }
            other => panic!("Expected JobResult, got: {other:?}"),
        }
    }

    #[test]
    fn upload_status_serializes_with_tag_and_wire_names() {
        let snapshot = JobSnapshot {
            id: 3,
            uuid: Uuid::nil(),
            filename: "data.csv".into(),
            size: 1024,
            timestamp: chrono::Utc::now(),
            status: JobStatus::InProgress,
            assigned_to: None,
            download_url: None,
        };
        let value = serde_json::to_value(Outbound::UploadStatus(snapshot)).unwrap();

        assert_eq!(value["type"], "upload_status");
        assert_eq!(value["status"], "inprogress");
        assert_eq!(value["filename"], "data.csv");
        assert!(value.get("downloadUrl").is_some());
    }

    #[test]
    fn all_devices_serializes_with_tag() {
        let value = serde_json::to_value(Outbound::AllDevices { devices: vec![] }).unwrap();
        assert_eq!(value["type"], "all_devices");
        assert!(value["devices"].as_array().unwrap().is_empty());
    }
}
