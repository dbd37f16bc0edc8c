//! Coordinator event bus and durable state capture.
//!
//! - [`EventBus`] — in-process publish/subscribe hub backed by
//!   `tokio::sync::broadcast`.
//! - [`CoordinatorEvent`] — the canonical event envelope for registry and
//!   job-ledger changes.
//! - [`EventPersistence`] — background service that mirrors every event into
//!   the `devices`/`jobs` tables so history survives a restart.

pub mod bus;
pub mod persistence;

pub use bus::{CoordinatorEvent, EventBus};
pub use persistence::EventPersistence;
