use crate::{backend::BackendError, models::upload::UploadStatus, repositories::RepositoryError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("upload of {size} bytes exceeds the maximum of {max} bytes")]
    ResourceTooBig { size: u64, max: u64 },
    #[error("wrong offset: upload is at {expected}, chunk claims {actual}")]
    WrongOffset { expected: u64, actual: u64 },
    #[error("chunk would grow the upload past its declared length")]
    UploadBig,
    #[error("upload `{0}` not found")]
    UploadNotFound(String),
    #[error("upload `{id}` is {status} and accepts no more chunks")]
    UploadNotActive { id: String, status: UploadStatus },
    #[error("object `{0}` not found")]
    ObjectNotFound(String),
    #[error("bucket `{0}` not found")]
    BucketNotFound(String),
    #[error("task `{0}` not found")]
    TaskNotFound(String),
    #[error("account `{0}` not found")]
    AccountNotFound(String),
    #[error("provider `{0}` not found")]
    ProviderNotFound(String),
    #[error("no accounts registered for provider `{0}`")]
    NoAvailableAccounts(String),
    #[error("no account can reach the requested bucket")]
    NoAvailableBuckets,
    #[error("no backend registered for provider kind `{0}`")]
    UnknownProviderKind(String),
    #[error("a backend is already registered for provider kind `{0}`")]
    ProviderKindExists(String),
    #[error("worker pool: {0}")]
    WorkerPool(String),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Persistence(#[from] RepositoryError),
}

pub type ServiceResult<T> = Result<T, ServiceError>;
