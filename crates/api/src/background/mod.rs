//! Background tasks spawned at startup.

pub mod stall_reaper;
