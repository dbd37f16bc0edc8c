pub mod device;
pub mod job;
