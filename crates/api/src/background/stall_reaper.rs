//! Periodic reclaim of stalled jobs.
//!
//! A job can sit `inprogress` forever if its device hangs without a clean
//! disconnect (the transport may take minutes to notice a dead peer, and a
//! wedged client never reports at all). This task periodically asks the
//! coordinator to reclaim assignments older than the stall timeout.

use std::sync::Arc;
use std::time::Duration;

use fedgrid_coordinator::Coordinator;
use tokio_util::sync::CancellationToken;

/// Default stall timeout: 5 minutes without a completion signal.
const DEFAULT_STALL_TIMEOUT_SECS: u64 = 300;

/// How often the reaper runs.
const REAP_INTERVAL: Duration = Duration::from_secs(60);

/// Run the stall reaper loop.
///
/// Reclaims jobs assigned longer ago than `JOB_STALL_TIMEOUT_SECS`
/// (defaults to 300). Runs until `cancel` is triggered.
pub async fn run(coordinator: Arc<Coordinator>, cancel: CancellationToken) {
    let timeout_secs: u64 = std::env::var("JOB_STALL_TIMEOUT_SECS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(DEFAULT_STALL_TIMEOUT_SECS);
    let timeout = Duration::from_secs(timeout_secs);

    tracing::info!(
        timeout_secs,
        interval_secs = REAP_INTERVAL.as_secs(),
        "Stall reaper started"
    );

    let mut interval = tokio::time::interval(REAP_INTERVAL);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Stall reaper stopping");
                break;
            }
            _ = interval.tick() => {
                coordinator.reap_stalled(timeout).await;
            }
        }
    }
}
