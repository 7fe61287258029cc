pub mod account_handlers;
pub mod health_handlers;
pub mod replication_handlers;
pub mod upload_handlers;
