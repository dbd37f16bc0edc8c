//! Repository for the `devices` table.

use sqlx::PgPool;
use uuid::Uuid;

use crate::models::device::{DeviceRow, DeviceUpsert};

/// Column list for `devices` queries.
const COLUMNS: &str = "\
    uuid, conn_id, client, user_agent, cpu_cores, gpu_vendor, gpu_renderer, \
    state, last_seen, created_at, updated_at";

/// Provides persistence operations for device history.
pub struct DeviceRepo;

impl DeviceRepo {
    /// Insert or update the row for a durable device UUID.
    ///
    /// The in-memory registry is authoritative; this write mirrors its
    /// latest view of the device.
    pub async fn upsert(pool: &PgPool, device: &DeviceUpsert) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO devices \
                 (uuid, conn_id, client, user_agent, cpu_cores, gpu_vendor, \
                  gpu_renderer, state, last_seen) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             ON CONFLICT (uuid) DO UPDATE SET \
                 conn_id = EXCLUDED.conn_id, \
                 client = EXCLUDED.client, \
                 user_agent = EXCLUDED.user_agent, \
                 cpu_cores = EXCLUDED.cpu_cores, \
                 gpu_vendor = EXCLUDED.gpu_vendor, \
                 gpu_renderer = EXCLUDED.gpu_renderer, \
                 state = EXCLUDED.state, \
                 last_seen = EXCLUDED.last_seen, \
                 updated_at = NOW()",
        )
        .bind(device.uuid)
        .bind(device.sid)
        .bind(&device.client)
        .bind(&device.user_agent)
        .bind(device.cpu_cores)
        .bind(&device.gpu.vendor)
        .bind(&device.gpu.renderer)
        .bind(&device.status)
        .bind(device.last_seen)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Find a device by its durable UUID.
    pub async fn find_by_uuid(pool: &PgPool, uuid: Uuid) -> Result<Option<DeviceRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM devices WHERE uuid = $1");
        sqlx::query_as::<_, DeviceRow>(&query)
            .bind(uuid)
            .fetch_optional(pool)
            .await
    }

    /// List all known devices, most recently seen first.
    pub async fn list(pool: &PgPool) -> Result<Vec<DeviceRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM devices ORDER BY last_seen DESC");
        sqlx::query_as::<_, DeviceRow>(&query).fetch_all(pool).await
    }
}
