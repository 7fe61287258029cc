//! Application state shared across handlers.

use crate::{
    backend::BackendRegistry,
    config::AppConfig,
    repositories::SqliteRepository,
    services::{
        account_service::AccountService,
        replication_service::{ReplicationConfig, ReplicationService},
        task_service::{TaskConfig, TaskService},
        upload_service::UploadService,
    },
};
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub struct AppState {
    /// Shared SQLite pool, also used by the readiness probe.
    pub db: Arc<SqlitePool>,
    pub accounts: AccountService,
    pub uploads: Arc<UploadService>,
    pub replication: ReplicationService,
    pub tasks: Arc<TaskService>,
    /// Cancelled when the process shuts down.
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Wire repositories and services over one pool and backend registry.
    pub fn new(db: Arc<SqlitePool>, registry: Arc<BackendRegistry>, cfg: &AppConfig) -> Self {
        let repo = Arc::new(SqliteRepository::new(db.clone()));
        let accounts = AccountService::new(repo.clone(), repo.clone(), registry);
        let uploads = Arc::new(UploadService::new(
            repo.clone(),
            accounts.clone(),
            cfg.max_upload_size,
        ));
        let replication = ReplicationService::new(
            accounts.clone(),
            ReplicationConfig {
                chunk_size: cfg.chunk_size,
                part_workers: cfg.part_workers,
            },
        );
        let tasks = Arc::new(TaskService::new(
            repo,
            replication.clone(),
            TaskConfig {
                workers: cfg.task_workers,
                queue_capacity: cfg.task_queue_capacity,
            },
        ));

        Self {
            db,
            accounts,
            uploads,
            replication,
            tasks,
            shutdown: CancellationToken::new(),
        }
    }
}
