//! Handlers for the `/jobs` resource.

use axum::extract::{Path, State};
use axum::Json;
use fedgrid_core::error::CoreError;
use fedgrid_core::types::JobId;
use fedgrid_db::models::job::JobRow;
use fedgrid_db::repositories::JobRepo;

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

/// GET /api/v1/jobs
///
/// Full job history, newest submission first.
pub async fn list(State(state): State<AppState>) -> AppResult<Json<DataResponse<Vec<JobRow>>>> {
    let jobs = JobRepo::list(&state.pool).await?;
    Ok(Json(DataResponse { data: jobs }))
}

/// GET /api/v1/jobs/{id}
pub async fn get_by_id(
    State(state): State<AppState>,
    Path(id): Path<JobId>,
) -> AppResult<Json<DataResponse<JobRow>>> {
    let job = JobRepo::find_by_id(&state.pool, id)
        .await?
        .ok_or(AppError::Core(CoreError::NotFound {
            entity: "Job",
            id: id.to_string(),
        }))?;
    Ok(Json(DataResponse { data: job }))
}
