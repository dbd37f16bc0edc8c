//! Handler for the `/upload_file` multipart endpoint.
//!
//! Receives the actual bytes of a job file announced over the WebSocket via
//! `upload_start`. The file is stored locally and the coordinator correlates
//! it with the announcing job (or submits a fresh one for REST-only clients).

use axum::extract::{Multipart, State};
use axum::http::StatusCode;
use axum::Json;
use fedgrid_coordinator::protocol::{sanitize_filename, JobSnapshot};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

/// Supported dataset file extensions.
const SUPPORTED_EXTENSIONS: &[&str] = &["csv"];

/// POST /api/v1/upload_file
///
/// Accepts a multipart form with a required `file` field and a required
/// `uuid` field identifying the submitting device. The uploaded dataset is
/// stored locally and handed to the coordinator for dispatch.
pub async fn upload_file(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> AppResult<(StatusCode, Json<DataResponse<JobSnapshot>>)> {
    let mut file_data: Option<(String, Vec<u8>)> = None;
    let mut device_uuid: Option<Uuid> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| AppError::BadRequest(e.to_string()))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "file" => {
                let filename = field.file_name().unwrap_or("upload.csv").to_string();
                let data = field
                    .bytes()
                    .await
                    .map_err(|e| AppError::BadRequest(e.to_string()))?;
                file_data = Some((filename, data.to_vec()));
            }
            "uuid" => {
                let text = field
                    .text()
                    .await
                    .map_err(|e| AppError::BadRequest(e.to_string()))?;
                device_uuid = Some(
                    text.parse()
                        .map_err(|_| AppError::BadRequest(format!("Invalid uuid '{text}'")))?,
                );
            }
            // The browser also sends its volatile session id; the server
            // trusts the durable uuid instead.
            "sid" => {}
            _ => {} // ignore unknown fields
        }
    }

    let (filename, data) =
        file_data.ok_or_else(|| AppError::BadRequest("Missing required 'file' field".into()))?;
    let uuid =
        device_uuid.ok_or_else(|| AppError::BadRequest("Missing required 'uuid' field".into()))?;

    // Same normalization the coordinator applies to `upload_start` metadata,
    // so the stored bytes correlate with the announcing job.
    let filename = sanitize_filename(&filename);
    if filename.is_empty() {
        return Err(AppError::BadRequest("Missing file name".into()));
    }
    let ext = filename.rsplit('.').next().unwrap_or("").to_lowercase();
    if !SUPPORTED_EXTENSIONS.contains(&ext.as_str()) {
        return Err(AppError::BadRequest(format!(
            "Unsupported file format '.{ext}'. Supported: .csv"
        )));
    }

    let storage_dir = std::path::PathBuf::from(&state.config.upload_dir);
    tokio::fs::create_dir_all(&storage_dir)
        .await
        .map_err(|e| AppError::InternalError(e.to_string()))?;

    let stored_filename = format!("{uuid}_{}_{filename}", chrono::Utc::now().timestamp());
    let file_path = storage_dir.join(&stored_filename);
    tokio::fs::write(&file_path, &data)
        .await
        .map_err(|e| AppError::InternalError(e.to_string()))?;

    let size = data.len() as i64;
    tracing::info!(uuid = %uuid, filename = %filename, size, "Job file stored");

    let snapshot = state
        .coordinator
        .record_upload_file(uuid, filename, size, file_path.to_string_lossy().to_string())
        .await;

    Ok((StatusCode::CREATED, Json(DataResponse { data: snapshot })))
}
