//! Job entity model and the write-behind upsert DTO.

use chrono::{DateTime, Utc};
use fedgrid_core::types::JobId;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A row from the `jobs` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct JobRow {
    pub id: JobId,
    pub device_uuid: Uuid,
    pub filename: String,
    pub size_bytes: i64,
    pub status: String,
    pub assigned_uuid: Option<Uuid>,
    pub result_ref: Option<String>,
    pub submitted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Decoded `"job"` payload of a `job.*` event.
///
/// Field names match the wire serialization of the coordinator's `Job`.
#[derive(Debug, Clone, Deserialize)]
pub struct JobUpsert {
    pub id: JobId,
    /// Originating device UUID.
    pub uuid: Uuid,
    pub filename: String,
    pub size: i64,
    pub status: String,
    #[serde(rename = "assignedTo")]
    pub assigned_to: Option<Uuid>,
    #[serde(rename = "downloadUrl")]
    pub download_url: Option<String>,
    pub timestamp: DateTime<Utc>,
}
