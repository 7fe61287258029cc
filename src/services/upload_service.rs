//! Upload manager: the resumable upload state machine.
//!
//! Active uploads live in one in-memory index guarded by a single lock that is
//! held for the whole of a chunk write, so the offset check and the offset
//! advance are atomic per upload. Every mutation is persisted afterwards; a
//! persist failure is logged and never rolls back the backend change.

use super::{
    account_service::AccountService,
    errors::{ServiceError, ServiceResult},
};
use crate::{
    backend::MultipartRef,
    models::{
        new_id,
        upload::{Upload, UploadStatus},
    },
    repositories::UploadRepository,
};
use bytes::Bytes;
use chrono::Utc;
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub struct UploadService {
    uploads: Mutex<HashMap<String, Upload>>,
    repo: Arc<dyn UploadRepository>,
    accounts: AccountService,
    max_size: Option<u64>,
}

impl UploadService {
    pub fn new(
        repo: Arc<dyn UploadRepository>,
        accounts: AccountService,
        max_size: Option<u64>,
    ) -> Self {
        Self {
            uploads: Mutex::new(HashMap::new()),
            repo,
            accounts,
            max_size,
        }
    }

    pub fn max_size(&self) -> Option<u64> {
        self.max_size
    }

    /// Start a new upload of `size` bytes and return its object id.
    pub async fn create_upload(
        &self,
        size: u64,
        metadata: HashMap<String, String>,
        cancel: &CancellationToken,
    ) -> ServiceResult<String> {
        if let Some(max) = self.max_size {
            if size > max {
                return Err(ServiceError::ResourceTooBig { size, max });
            }
        }

        let (storage, backend) = self.accounts.choose_upload_destination(cancel).await?;
        let object_id = new_id();
        let upload_id = backend
            .begin_multipart(&storage.bucket, &object_id, &metadata, cancel)
            .await?;

        let upload = Upload::new(upload_id, object_id.clone(), size, storage, metadata);
        info!(
            "created upload {} ({} bytes) on {}",
            object_id, size, upload.storage
        );

        let mut uploads = self.uploads.lock().await;
        if let Err(err) = self.repo.add(&upload).await {
            error!("failed to save upload {}: {}", object_id, err);
        }
        uploads.insert(object_id.clone(), upload);

        Ok(object_id)
    }

    /// Apply one chunk at `offset` and return the new offset.
    pub async fn write_part(
        &self,
        object_id: &str,
        offset: u64,
        data: Bytes,
        cancel: &CancellationToken,
    ) -> ServiceResult<u64> {
        let mut uploads = self.uploads.lock().await;

        if !uploads.contains_key(object_id) {
            let stored = self
                .repo
                .get_by_object_id(object_id)
                .await?
                .ok_or_else(|| ServiceError::UploadNotFound(object_id.to_string()))?;
            if stored.status.is_terminal() {
                return Err(ServiceError::UploadNotActive {
                    id: object_id.to_string(),
                    status: stored.status,
                });
            }
            debug!("rehydrated upload {} from the repository", object_id);
            uploads.insert(object_id.to_string(), stored);
        }

        let upload = uploads
            .get_mut(object_id)
            .ok_or_else(|| ServiceError::UploadNotFound(object_id.to_string()))?;

        if offset != upload.offset {
            return Err(ServiceError::WrongOffset {
                expected: upload.offset,
                actual: offset,
            });
        }
        let len = data.len() as u64;
        if offset + len > upload.size {
            return Err(ServiceError::UploadBig);
        }
        if len == 0 && upload.size != 0 {
            return Ok(upload.offset);
        }

        let backend = self.accounts.resolve_storage(&upload.storage, cancel).await?;
        let position = upload.next_position();
        let target = MultipartRef {
            bucket: &upload.storage.bucket,
            upload_id: &upload.id,
            object_id: &upload.object_id,
        };
        let tag = match backend.write_part(target, position, data, cancel).await {
            Ok(tag) => tag,
            Err(err) => {
                warn!("upload {}: part {} failed: {}", object_id, position, err);
                return Err(err.into());
            }
        };
        upload.apply_part(tag, len);
        debug!(
            "upload {}: part {} accepted, offset {}/{}",
            object_id, position, upload.offset, upload.size
        );

        if !upload.is_finished() {
            let new_offset = upload.offset;
            self.persist(upload).await;
            return Ok(new_offset);
        }

        let target = MultipartRef {
            bucket: &upload.storage.bucket,
            upload_id: &upload.id,
            object_id: &upload.object_id,
        };
        let finished = backend.finish(target, &upload.parts, cancel).await;

        let Some(mut upload) = uploads.remove(object_id) else {
            return Err(ServiceError::UploadNotFound(object_id.to_string()));
        };
        match finished {
            Ok(()) => {
                upload.set_status(UploadStatus::Complete);
                info!("upload {} complete ({} parts)", object_id, upload.parts.len());
                self.persist(&upload).await;
                Ok(upload.offset)
            }
            Err(err) => {
                upload.set_status(UploadStatus::Failed);
                error!("upload {}: failed to complete: {}", object_id, err);
                self.persist(&upload).await;
                Err(err.into())
            }
        }
    }

    /// Snapshot of an upload, falling back to the persisted record once it
    /// has left the active index.
    pub async fn get_upload(&self, object_id: &str) -> ServiceResult<Upload> {
        if let Some(upload) = self.uploads.lock().await.get(object_id) {
            return Ok(upload.clone());
        }
        self.repo
            .get_by_object_id(object_id)
            .await?
            .ok_or_else(|| ServiceError::UploadNotFound(object_id.to_string()))
    }

    /// Copies of every active upload, oldest first.
    pub async fn list_uploads(&self) -> Vec<Upload> {
        let mut uploads: Vec<Upload> = self.uploads.lock().await.values().cloned().collect();
        uploads.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        uploads
    }

    /// Reload persisted active uploads into the index.
    pub async fn restore_uploads(&self) -> ServiceResult<usize> {
        let stored = self.repo.list_by_status(UploadStatus::Active).await?;
        let mut uploads = self.uploads.lock().await;
        let mut restored = 0;
        for upload in stored {
            if !uploads.contains_key(&upload.object_id) {
                uploads.insert(upload.object_id.clone(), upload);
                restored += 1;
            }
        }
        info!("restored {} active uploads", restored);
        Ok(restored)
    }

    /// Mark uploads idle for longer than `ttl` as expired and abort their
    /// multipart uploads. Returns how many expired.
    pub async fn expire_stale(&self, ttl: Duration, cancel: &CancellationToken) -> usize {
        let Some(cutoff) = chrono::Duration::from_std(ttl)
            .ok()
            .and_then(|ttl| Utc::now().checked_sub_signed(ttl))
        else {
            return 0;
        };
        // Persisted as expired before the index lock is released.
        let stale: Vec<Upload> = {
            let mut uploads = self.uploads.lock().await;
            let ids: Vec<String> = uploads
                .values()
                .filter(|u| u.updated_at < cutoff)
                .map(|u| u.object_id.clone())
                .collect();
            let mut stale = Vec::with_capacity(ids.len());
            for id in ids {
                if let Some(mut upload) = uploads.remove(&id) {
                    upload.set_status(UploadStatus::Expired);
                    info!("upload {} expired at offset {}", upload.object_id, upload.offset);
                    self.persist(&upload).await;
                    stale.push(upload);
                }
            }
            stale
        };

        let count = stale.len();
        for upload in stale {
            match self.accounts.resolve_storage(&upload.storage, cancel).await {
                Ok(backend) => {
                    let target = MultipartRef {
                        bucket: &upload.storage.bucket,
                        upload_id: &upload.id,
                        object_id: &upload.object_id,
                    };
                    if let Err(err) = backend.abort(target, cancel).await {
                        warn!("upload {}: abort failed: {}", upload.object_id, err);
                    }
                }
                Err(err) => warn!(
                    "upload {}: cannot reach storage to abort: {}",
                    upload.object_id, err
                ),
            }
        }
        count
    }

    async fn persist(&self, upload: &Upload) {
        if let Err(err) = self.repo.update(upload).await {
            error!("failed to update upload {}: {}", upload.object_id, err);
        }
    }
}
