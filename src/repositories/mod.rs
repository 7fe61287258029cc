//! Persistence collaborators.
//!
//! Each repository is a plain key-value style store (Add / GetByID / Update /
//! List). There is no cross-entity transaction: callers that mutate a
//! backend and then persist must tolerate the persist step failing.

pub mod sqlite;

use crate::models::{
    account::{Provider, ServiceAccount},
    task::{ReplicationTask, TaskStatus},
    upload::{Upload, UploadStatus},
};
use async_trait::async_trait;
use thiserror::Error;

pub use sqlite::SqliteRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error("corrupt record: {0}")]
    Decode(String),
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

#[async_trait]
pub trait AccountRepository: Send + Sync {
    async fn add(&self, account: &ServiceAccount) -> RepositoryResult<()>;

    async fn get_by_id(&self, id: &str) -> RepositoryResult<Option<ServiceAccount>>;

    /// Accounts of one provider in registration order.
    async fn list_by_provider(&self, provider_id: &str) -> RepositoryResult<Vec<ServiceAccount>>;

    async fn list(&self) -> RepositoryResult<Vec<ServiceAccount>>;
}

#[async_trait]
pub trait ProviderRepository: Send + Sync {
    async fn get_by_id(&self, id: &str) -> RepositoryResult<Option<Provider>>;

    async fn list(&self) -> RepositoryResult<Vec<Provider>>;
}

#[async_trait]
pub trait UploadRepository: Send + Sync {
    async fn add(&self, upload: &Upload) -> RepositoryResult<()>;

    /// Uploads are addressed by their client-facing object id.
    async fn get_by_object_id(&self, object_id: &str) -> RepositoryResult<Option<Upload>>;

    async fn update(&self, upload: &Upload) -> RepositoryResult<()>;

    async fn list_by_status(&self, status: UploadStatus) -> RepositoryResult<Vec<Upload>>;
}

#[async_trait]
pub trait TaskRepository: Send + Sync {
    async fn add(&self, task: &ReplicationTask) -> RepositoryResult<()>;

    async fn get_by_id(&self, id: &str) -> RepositoryResult<Option<ReplicationTask>>;

    async fn update(&self, task: &ReplicationTask) -> RepositoryResult<()>;

    /// Tasks in `status`, oldest first.
    async fn list_by_status(&self, status: TaskStatus) -> RepositoryResult<Vec<ReplicationTask>>;
}
