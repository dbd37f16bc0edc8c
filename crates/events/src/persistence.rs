//! Durable state capture service.
//!
//! [`EventPersistence`] subscribes to the [`EventBus`](crate::bus::EventBus)
//! broadcast channel and mirrors every received [`CoordinatorEvent`] into the
//! `devices` / `jobs` tables. It runs as a long-lived background task and
//! shuts down gracefully when its cancellation token fires (or the bus
//! sender is dropped).
//!
//! The coordinator never reads these rows on its hot path; they exist so
//! device and job history stays queryable by UUID / job id after a restart.

use fedgrid_db::models::device::DeviceUpsert;
use fedgrid_db::models::job::JobUpsert;
use fedgrid_db::repositories::{DeviceRepo, JobRepo};
use fedgrid_db::DbPool;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::bus::CoordinatorEvent;

/// Background service that persists coordinator events to the database.
pub struct EventPersistence;

impl EventPersistence {
    /// Run the persistence loop.
    ///
    /// Subscribes to the event bus via the provided `receiver` and persists
    /// every event it receives until `cancel` fires or the channel closes.
    /// The publishing side stays alive through server shutdown (the
    /// coordinator holds its own bus handle), so cancellation is the shutdown
    /// signal; events already buffered in the channel are flushed before the
    /// task exits.
    pub async fn run(
        pool: DbPool,
        mut receiver: broadcast::Receiver<CoordinatorEvent>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    while let Ok(event) = receiver.try_recv() {
                        if let Err(e) = Self::persist(&pool, &event).await {
                            tracing::error!(
                                error = %e,
                                event_type = %event.event_type,
                                "Failed to persist event"
                            );
                        }
                    }
                    tracing::info!("Shutdown requested, event persistence stopping");
                    break;
                }
                result = receiver.recv() => match result {
                    Ok(event) => {
                        if let Err(e) = Self::persist(&pool, &event).await {
                            tracing::error!(
                                error = %e,
                                event_type = %event.event_type,
                                "Failed to persist event"
                            );
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(
                            skipped = n,
                            "Event persistence lagged, some events were not persisted"
                        );
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        tracing::info!("Event bus closed, persistence shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// Mirror a single event into the store.
    ///
    /// `device.*` events carry the changed device snapshot under
    /// `payload["device"]`; `job.*` events carry the updated job under
    /// `payload["job"]`. Anything else is ignored.
    async fn persist(pool: &DbPool, event: &CoordinatorEvent) -> Result<(), sqlx::Error> {
        if event.event_type.starts_with("device.") {
            match serde_json::from_value::<DeviceUpsert>(event.payload["device"].clone()) {
                Ok(device) => DeviceRepo::upsert(pool, &device).await?,
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        event_type = %event.event_type,
                        "Device event payload missing a decodable device snapshot"
                    );
                }
            }
        } else if event.event_type.starts_with("job.") {
            match serde_json::from_value::<JobUpsert>(event.payload["job"].clone()) {
                Ok(job) => JobRepo::upsert(pool, &job).await?,
                Err(e) => {
                    tracing::warn!(
                        error = %e,
                        event_type = %event.event_type,
                        "Job event payload missing a decodable job snapshot"
                    );
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::EventBus;
    use std::time::Duration;

    #[tokio::test]
    async fn run_exits_on_cancellation_while_bus_is_alive() {
        // connect_lazy builds a pool without touching the network; nothing is
        // published, so the loop never issues a query.
        let pool = sqlx::postgres::PgPoolOptions::new()
            .connect_lazy("postgres://localhost/fedgrid")
            .expect("lazy pool");
        let bus = EventBus::default();
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(EventPersistence::run(pool, bus.subscribe(), cancel.clone()));

        // The bus outlives the cancellation, so the channel never closes;
        // the token alone must stop the loop.
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("persistence loop should stop once cancelled")
            .expect("persistence task should not panic");
        drop(bus);
    }
}
