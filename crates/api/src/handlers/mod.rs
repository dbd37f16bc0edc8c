pub mod devices;
pub mod jobs;
pub mod upload;
