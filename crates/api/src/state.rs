use std::sync::Arc;

use fedgrid_coordinator::Coordinator;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc` or is already `Clone`).
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub pool: fedgrid_db::DbPool,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// The coordination domain: connection registry, job ledger, dispatcher.
    pub coordinator: Arc<Coordinator>,
}
