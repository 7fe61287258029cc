//! Replication engine.
//!
//! Copies one object between two storage references by splitting it into
//! fixed-size byte ranges and copying the ranges in parallel as parts of a
//! multipart upload on the target, under the same object id.

use super::{
    account_service::AccountService,
    errors::{ServiceError, ServiceResult},
    worker_pool::{PartCopyPool, PartTask},
};
use crate::{
    backend::{BackendError, MultipartRef, ObjectStorageBackend},
    models::{
        object::ReplicatedObject, storage::StorageRef, task::ReplicationRequest,
        upload::UploadPart,
    },
};
use chrono::{DateTime, Utc};
use std::{ops::Range, sync::Arc};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Default size of one copied range (100 MiB).
pub const DEFAULT_CHUNK_SIZE: u64 = 100 * 1024 * 1024;

/// Default number of parts copied concurrently.
pub const DEFAULT_PART_WORKERS: usize = 5;

#[derive(Debug, Clone)]
pub struct ReplicationConfig {
    pub chunk_size: u64,
    pub part_workers: usize,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            part_workers: DEFAULT_PART_WORKERS,
        }
    }
}

/// Outcome of one replication run, as recorded on its task.
#[derive(Debug, Clone)]
pub struct ReplicationResult {
    pub task_id: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub error: Option<String>,
}

/// Split `[0, size)` into ranges of `chunk_size`, numbered from 1.
///
/// The last range is clipped to `size`. An empty object still yields one
/// empty range so the target upload has a part to complete with.
pub fn plan_parts(size: u64, chunk_size: u64) -> Vec<(u32, Range<u64>)> {
    let chunk_size = chunk_size.max(1);
    if size == 0 {
        return vec![(1, 0..0)];
    }

    (0..size.div_ceil(chunk_size))
        .map(|index| {
            let start = index * chunk_size;
            let end = (start + chunk_size).min(size);
            (index as u32 + 1, start..end)
        })
        .collect()
}

#[derive(Clone)]
pub struct ReplicationService {
    accounts: AccountService,
    pool: Arc<PartCopyPool>,
    chunk_size: u64,
}

impl ReplicationService {
    pub fn new(accounts: AccountService, config: ReplicationConfig) -> Self {
        Self {
            accounts,
            pool: Arc::new(PartCopyPool::new(config.part_workers)),
            chunk_size: config.chunk_size.max(1),
        }
    }

    /// Copy `object_id` from `source` to `target` and return the replica.
    pub async fn replicate_object(
        &self,
        object_id: &str,
        source: &StorageRef,
        target: &StorageRef,
        cancel: &CancellationToken,
    ) -> ServiceResult<ReplicatedObject> {
        let source_backend = self.accounts.resolve_storage(source, cancel).await?;
        let object = match source_backend
            .get_object(&source.bucket, object_id, cancel)
            .await
        {
            Ok(object) => object,
            Err(BackendError::NotFound(_)) => {
                return Err(ServiceError::ObjectNotFound(object_id.to_string()));
            }
            Err(err) => return Err(err.into()),
        };

        let target_backend = self.accounts.resolve_storage(target, cancel).await?;
        let upload_id = target_backend
            .begin_multipart(&target.bucket, object_id, &object.metadata, cancel)
            .await?;
        let multipart = MultipartRef {
            bucket: &target.bucket,
            upload_id: &upload_id,
            object_id,
        };

        let plan = plan_parts(object.size, self.chunk_size);
        info!(
            "replicating {} ({} bytes) from {} to {} in {} parts over {} workers",
            object_id,
            object.size,
            source,
            target,
            plan.len(),
            self.pool.workers()
        );

        let tasks = plan
            .into_iter()
            .map(|(part_number, range)| PartTask {
                object_id: object_id.to_string(),
                part_number,
                range,
                source: source_backend.clone(),
                source_bucket: source.bucket.clone(),
                target: target_backend.clone(),
                target_bucket: target.bucket.clone(),
                upload_id: upload_id.clone(),
            })
            .collect();

        let mut results = match self.pool.run(tasks, cancel).await {
            Ok(results) => results,
            Err(err) => {
                error!("replication of {} failed: {}", object_id, err);
                abort(target_backend.as_ref(), multipart).await;
                return Err(err);
            }
        };

        results.sort_by_key(|result| result.part_number);
        let parts: Vec<UploadPart> = results
            .into_iter()
            .map(|result| UploadPart {
                tag: result.part_tag,
                position: result.part_number,
            })
            .collect();

        if let Err(err) = target_backend.finish(multipart, &parts, cancel).await {
            error!("replication of {}: failed to complete: {}", object_id, err);
            abort(target_backend.as_ref(), multipart).await;
            return Err(err.into());
        }

        info!("replicated {} to {}", object_id, target);
        Ok(ReplicatedObject {
            id: object_id.to_string(),
            bucket: target.bucket.clone(),
        })
    }

    /// Run one queued request to completion and report the outcome.
    pub async fn run(
        &self,
        request: &ReplicationRequest,
        cancel: &CancellationToken,
    ) -> ReplicationResult {
        let start = Utc::now();
        let outcome = self
            .replicate_object(&request.object_id, &request.source, &request.target, cancel)
            .await;
        ReplicationResult {
            task_id: request.task_id.clone(),
            start,
            end: Utc::now(),
            error: outcome.err().map(|err| err.to_string()),
        }
    }
}

/// Best-effort cleanup of a target upload that will never complete. Runs
/// with its own token so it still goes out after cancellation.
async fn abort(backend: &dyn ObjectStorageBackend, multipart: MultipartRef<'_>) {
    if let Err(err) = backend.abort(multipart, &CancellationToken::new()).await {
        warn!(
            "failed to abort upload {} of {}: {}",
            multipart.upload_id, multipart.object_id, err
        );
    }
}
