//! Device entity model and the write-behind upsert DTO.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A row from the `devices` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct DeviceRow {
    pub uuid: Uuid,
    pub conn_id: Uuid,
    pub client: String,
    pub user_agent: Option<String>,
    pub cpu_cores: i32,
    pub gpu_vendor: String,
    pub gpu_renderer: String,
    pub state: String,
    pub last_seen: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// GPU fields nested inside the wire-shape device snapshot.
#[derive(Debug, Clone, Deserialize)]
pub struct GpuFields {
    pub vendor: String,
    pub renderer: String,
}

/// Decoded `"device"` payload of a `device.*` event.
///
/// Field names match the wire serialization of the coordinator's
/// `DeviceRecord` so the persistence service can deserialize the event
/// payload directly.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceUpsert {
    pub uuid: Uuid,
    /// Volatile connection id (wire name `sid`).
    pub sid: Uuid,
    pub client: String,
    #[serde(rename = "userAgent")]
    pub user_agent: Option<String>,
    #[serde(rename = "cpuCores")]
    pub cpu_cores: i32,
    pub gpu: GpuFields,
    /// `"connected"` or `"disconnected"`.
    pub status: String,
    #[serde(rename = "lastSeen")]
    pub last_seen: DateTime<Utc>,
}
