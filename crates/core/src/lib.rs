//! Shared domain types for the federation coordinator.
//!
//! Everything in this crate is pure: no I/O, no async, no global state.
//! The coordinator and API crates build on these types.

pub mod capability;
pub mod error;
pub mod placement;
pub mod status;
pub mod types;
