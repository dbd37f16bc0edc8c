use axum::routing::get;
use axum::Router;

use crate::handlers;
use crate::state::AppState;

/// Mount `/devices` routes.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::devices::list))
        .route("/{uuid}", get(handlers::devices::get_by_uuid))
        .route("/{uuid}/jobs", get(handlers::devices::list_jobs))
}
