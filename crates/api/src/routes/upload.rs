use axum::routing::post;
use axum::Router;

use crate::handlers;
use crate::state::AppState;

/// Mount the `/upload_file` route.
pub fn router() -> Router<AppState> {
    Router::new().route("/", post(handlers::upload::upload_file))
}
