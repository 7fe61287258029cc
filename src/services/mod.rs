pub mod account_service;
pub mod errors;
pub mod replication_service;
pub mod task_service;
pub mod upload_service;
pub mod upload_sweeper;
pub mod worker_pool;

pub use errors::{ServiceError, ServiceResult};
