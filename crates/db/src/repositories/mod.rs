pub mod device_repo;
pub mod job_repo;

pub use device_repo::DeviceRepo;
pub use job_repo::JobRepo;
