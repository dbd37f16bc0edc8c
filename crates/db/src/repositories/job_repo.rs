//! Repository for the `jobs` table.

use fedgrid_core::types::JobId;
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::job::{JobRow, JobUpsert};

/// Column list for `jobs` queries.
const COLUMNS: &str = "\
    id, device_uuid, filename, size_bytes, status, assigned_uuid, result_ref, \
    submitted_at, updated_at";

/// Provides persistence operations for job history.
pub struct JobRepo;

impl JobRepo {
    /// Insert or update the row for a job id.
    ///
    /// Job ids are assigned by the coordinator; every lifecycle transition
    /// overwrites the row with the ledger's latest view.
    pub async fn upsert(pool: &PgPool, job: &JobUpsert) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO jobs \
                 (id, device_uuid, filename, size_bytes, status, assigned_uuid, \
                  result_ref, submitted_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (id) DO UPDATE SET \
                 status = EXCLUDED.status, \
                 assigned_uuid = EXCLUDED.assigned_uuid, \
                 result_ref = EXCLUDED.result_ref, \
                 updated_at = NOW()",
        )
        .bind(job.id)
        .bind(job.uuid)
        .bind(&job.filename)
        .bind(job.size)
        .bind(&job.status)
        .bind(job.assigned_to)
        .bind(&job.download_url)
        .bind(job.timestamp)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Find a job by its id.
    pub async fn find_by_id(pool: &PgPool, id: JobId) -> Result<Option<JobRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM jobs WHERE id = $1");
        sqlx::query_as::<_, JobRow>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// List all jobs, newest submission first.
    pub async fn list(pool: &PgPool) -> Result<Vec<JobRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM jobs ORDER BY submitted_at DESC");
        sqlx::query_as::<_, JobRow>(&query).fetch_all(pool).await
    }

    /// List jobs submitted by one device, newest first.
    pub async fn list_for_device(pool: &PgPool, uuid: Uuid) -> Result<Vec<JobRow>, sqlx::Error> {
        let query =
            format!("SELECT {COLUMNS} FROM jobs WHERE device_uuid = $1 ORDER BY submitted_at DESC");
        sqlx::query_as::<_, JobRow>(&query)
            .bind(uuid)
            .fetch_all(pool)
            .await
    }

    /// Highest job id ever persisted, or 0 for an empty table.
    ///
    /// Used at startup to seed the coordinator's id sequence so ids stay
    /// unique across restarts.
    pub async fn max_id(pool: &PgPool) -> Result<JobId, sqlx::Error> {
        sqlx::query_scalar::<_, Option<JobId>>("SELECT MAX(id) FROM jobs")
            .fetch_one(pool)
            .await
            .map(|v| v.unwrap_or(0))
    }
}
