//! Object storage backends.
//!
//! Each cloud provider is reached through an [`ObjectStorageBackend`]
//! handle built by a [`BackendFactory`] from a provider catalog entry and a
//! service account. Factories are looked up by provider name in the
//! [`BackendRegistry`].
//!
//! Every call takes a [`CancellationToken`]; a cancelled call fails with
//! [`BackendError::Cancelled`].

pub mod memory;
pub mod registry;
pub mod s3;

use crate::models::{
    account::{Provider, ServiceAccount},
    bucket::Bucket,
    object::ObjectInfo,
    upload::UploadPart,
};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use std::{collections::HashMap, future::Future, io, ops::Range, sync::Arc};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub use registry::BackendRegistry;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("`{0}` not found")]
    NotFound(String),
    #[error("operation cancelled")]
    Cancelled,
    #[error("backend request failed: {0}")]
    Request(String),
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Body of a streamed download or part upload.
pub type ByteStream = BoxStream<'static, io::Result<Bytes>>;

/// Addresses one in-progress multipart upload on a backend.
#[derive(Clone, Copy, Debug)]
pub struct MultipartRef<'a> {
    pub bucket: &'a str,
    pub upload_id: &'a str,
    pub object_id: &'a str,
}

/// Capability interface every provider implementation fulfils.
///
/// Reads are retry-idempotent. Part writes are not: a retried write may leave
/// an unlisted duplicate part on the backend, which the backend owns.
#[async_trait]
pub trait ObjectStorageBackend: Send + Sync {
    /// Catalog id of the provider this handle talks to.
    fn provider_id(&self) -> &str;

    /// Start a multipart upload for `object_id`; returns the upload id.
    async fn begin_multipart(
        &self,
        bucket: &str,
        object_id: &str,
        metadata: &HashMap<String, String>,
        cancel: &CancellationToken,
    ) -> BackendResult<String>;

    /// Upload one part from memory; returns its part tag.
    async fn write_part(
        &self,
        target: MultipartRef<'_>,
        position: u32,
        data: Bytes,
        cancel: &CancellationToken,
    ) -> BackendResult<String>;

    /// Complete a multipart upload. `parts` must be in ascending order.
    async fn finish(
        &self,
        target: MultipartRef<'_>,
        parts: &[UploadPart],
        cancel: &CancellationToken,
    ) -> BackendResult<()>;

    /// Discard a multipart upload and every part written for it.
    async fn abort(&self, target: MultipartRef<'_>, cancel: &CancellationToken) -> BackendResult<()>;

    async fn list_buckets(&self, cancel: &CancellationToken) -> BackendResult<Vec<Bucket>>;

    async fn bucket_exists(&self, bucket: &str, cancel: &CancellationToken) -> BackendResult<bool>;

    /// Head an object. Fails with [`BackendError::NotFound`] if absent.
    async fn get_object(
        &self,
        bucket: &str,
        object_id: &str,
        cancel: &CancellationToken,
    ) -> BackendResult<ObjectInfo>;

    /// Stream the bytes of `range` (end exclusive) of an object.
    async fn stream_download(
        &self,
        bucket: &str,
        object_id: &str,
        range: Range<u64>,
        cancel: &CancellationToken,
    ) -> BackendResult<ByteStream>;

    /// Upload one part of exactly `length` bytes from a stream; returns its part tag.
    async fn stream_write_part(
        &self,
        target: MultipartRef<'_>,
        position: u32,
        body: ByteStream,
        length: u64,
        cancel: &CancellationToken,
    ) -> BackendResult<String>;
}

/// Builds backend handles for one provider kind.
#[async_trait]
pub trait BackendFactory: Send + Sync {
    async fn connect(
        &self,
        provider: &Provider,
        account: &ServiceAccount,
    ) -> BackendResult<Arc<dyn ObjectStorageBackend>>;
}

/// Run `fut` unless `cancel` fires first.
pub async fn cancellable<T, F>(cancel: &CancellationToken, fut: F) -> BackendResult<T>
where
    F: Future<Output = BackendResult<T>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(BackendError::Cancelled),
        res = fut => res,
    }
}
