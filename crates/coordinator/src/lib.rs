//! Device federation coordinator.
//!
//! One [`Coordinator`] instance owns the whole coordination domain for a
//! server process:
//!
//! - the **connection registry** (live sockets + durable device identities),
//! - the **job ledger** (every submitted work item and its lifecycle state),
//! - the **dispatcher** (capacity-aware placement and reclaim),
//! - the **status broadcaster** (event fan-out to every live connection).
//!
//! All mutating operations are linearized behind a single lock; see the
//! module docs on [`coordinator`].

pub mod broadcaster;
mod coordinator;
mod dispatcher;
mod ledger;
pub mod protocol;
mod registry;

pub use broadcaster::Broadcaster;
pub use coordinator::Coordinator;
pub use ledger::Job;
pub use registry::{ConnId, DeviceRecord, OutboundSender};
