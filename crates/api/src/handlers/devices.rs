//! Handlers for the `/devices` resource.
//!
//! REST views read the write-behind store, so they cover devices seen in
//! previous runs as well; the WebSocket `all_devices` message is the live
//! view.

use axum::extract::{Path, State};
use axum::Json;
use fedgrid_core::error::CoreError;
use fedgrid_db::models::device::DeviceRow;
use fedgrid_db::models::job::JobRow;
use fedgrid_db::repositories::{DeviceRepo, JobRepo};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

/// GET /api/v1/devices
///
/// List all devices ever registered, most recently seen first.
pub async fn list(State(state): State<AppState>) -> AppResult<Json<DataResponse<Vec<DeviceRow>>>> {
    let devices = DeviceRepo::list(&state.pool).await?;
    Ok(Json(DataResponse { data: devices }))
}

/// GET /api/v1/devices/{uuid}
pub async fn get_by_uuid(
    State(state): State<AppState>,
    Path(uuid): Path<Uuid>,
) -> AppResult<Json<DataResponse<DeviceRow>>> {
    let device = DeviceRepo::find_by_uuid(&state.pool, uuid)
        .await?
        .ok_or(AppError::Core(CoreError::NotFound {
            entity: "Device",
            id: uuid.to_string(),
        }))?;
    Ok(Json(DataResponse { data: device }))
}

/// GET /api/v1/devices/{uuid}/jobs
///
/// Jobs submitted by one device, newest first.
pub async fn list_jobs(
    State(state): State<AppState>,
    Path(uuid): Path<Uuid>,
) -> AppResult<Json<DataResponse<Vec<JobRow>>>> {
    let jobs = JobRepo::list_for_device(&state.pool, uuid).await?;
    Ok(Json(DataResponse { data: jobs }))
}
