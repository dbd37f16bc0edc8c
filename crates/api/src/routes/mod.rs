pub mod devices;
pub mod health;
pub mod jobs;
pub mod upload;

use axum::routing::get;
use axum::Router;

use crate::state::AppState;
use crate::ws;

/// Build the `/api/v1` route tree.
///
/// Route hierarchy:
///
/// ```text
/// /ws                          device/observer WebSocket (?uuid=... rebinds)
///
/// /devices                     registry snapshot (GET)
/// /devices/{uuid}              device detail (GET)
/// /devices/{uuid}/jobs         jobs submitted by one device (GET)
///
/// /jobs                        job history, newest first (GET)
/// /jobs/{id}                   job detail (GET)
///
/// /upload_file                 multipart job-file upload (POST)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        // WebSocket endpoint.
        .route("/ws", get(ws::ws_handler))
        // Device registry views.
        .nest("/devices", devices::router())
        // Job history views.
        .nest("/jobs", jobs::router())
        // Multipart upload of job file bytes.
        .nest("/upload_file", upload::router())
}
