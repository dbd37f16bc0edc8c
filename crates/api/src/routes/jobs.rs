use axum::routing::get;
use axum::Router;

use crate::handlers;
use crate::state::AppState;

/// Mount `/jobs` routes.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::jobs::list))
        .route("/{id}", get(handlers::jobs::get_by_id))
}
