use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fedgrid_api::config::ServerConfig;
use fedgrid_api::{background, router, state};
use fedgrid_coordinator::{Broadcaster, Coordinator};
use fedgrid_db::repositories::JobRepo;

use state::AppState;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "fedgrid_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    // --- Database ---
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    let pool = fedgrid_db::create_pool(&database_url)
        .await
        .expect("Failed to connect to database");
    tracing::info!("Database connection pool created");

    fedgrid_db::health_check(&pool)
        .await
        .expect("Database health check failed");
    tracing::info!("Database health check passed");

    fedgrid_db::run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");
    tracing::info!("Database migrations applied");

    // --- Event bus ---
    let event_bus = Arc::new(fedgrid_events::EventBus::default());
    tracing::info!("Event bus created");

    // --- Coordinator ---
    // Seed the job id sequence past everything ever persisted so ids stay
    // unique across restarts.
    let max_job_id = JobRepo::max_id(&pool)
        .await
        .expect("Failed to read max job id");
    let coordinator = Arc::new(Coordinator::new(Arc::clone(&event_bus), max_job_id + 1));
    tracing::info!(first_job_id = max_job_id + 1, "Coordinator created");

    // One token stops all background services at shutdown. The coordinator
    // holds its own handle to the event bus, so the broadcast channel stays
    // open for the whole process lifetime; cancellation, not channel close,
    // is what ends the consumer loops.
    let shutdown_token = tokio_util::sync::CancellationToken::new();

    // Spawn event persistence (mirrors all events into the database).
    let persistence_handle = tokio::spawn(fedgrid_events::EventPersistence::run(
        pool.clone(),
        event_bus.subscribe(),
        shutdown_token.clone(),
    ));

    // Spawn the status broadcaster (fans events out to every connection).
    let broadcaster = Broadcaster::new(Arc::clone(&coordinator));
    let broadcaster_handle = tokio::spawn(broadcaster.run(
        event_bus.subscribe(),
        shutdown_token.clone(),
    ));

    // Spawn the stall reaper (reclaims jobs from hung devices).
    let reaper_handle = tokio::spawn(background::stall_reaper::run(
        Arc::clone(&coordinator),
        shutdown_token.clone(),
    ));

    tracing::info!("Coordinator services started (persistence, broadcaster, stall reaper)");

    // --- App state ---
    let state = AppState {
        pool,
        config: Arc::new(config.clone()),
        coordinator: Arc::clone(&coordinator),
    };

    // --- Router ---
    let app = router::build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    // Stop the background services. Persistence flushes already-buffered
    // events before exiting.
    shutdown_token.cancel();
    let _ = tokio::time::timeout(Duration::from_secs(5), reaper_handle).await;
    let _ = tokio::time::timeout(Duration::from_secs(5), persistence_handle).await;
    let _ = tokio::time::timeout(Duration::from_secs(5), broadcaster_handle).await;
    tracing::info!("Coordinator services shut down");

    let ws_count = coordinator.connection_count().await;
    tracing::info!(ws_count, "Closing remaining WebSocket connections");
    coordinator.shutdown_all().await;

    tracing::info!("Graceful shutdown complete");
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix) so the server
/// shuts down cleanly whether stopped interactively or by a process
/// manager (e.g. systemd, Docker, Kubernetes).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
