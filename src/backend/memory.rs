//! In-process storage backend.
//!
//! Keeps buckets, objects and pending multipart uploads in memory. Useful for
//! local development and tests: it counts calls, records the part lists
//! passed to `finish`, and can inject per-part failures or latency.

use super::{
    BackendError, BackendFactory, BackendResult, ByteStream, MultipartRef, ObjectStorageBackend,
    cancellable,
};
use crate::models::{
    account::{Provider, ServiceAccount},
    bucket::Bucket,
    object::ObjectInfo,
    upload::UploadPart,
};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::{StreamExt, stream};
use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    ops::Range,
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};
use tokio_util::sync::CancellationToken;

/// Size of the chunks a download stream is split into.
const STREAM_CHUNK: usize = 64 * 1024;

/// Number of calls received per operation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub begin_multipart: usize,
    pub write_part: usize,
    pub finish: usize,
    pub abort: usize,
    pub list_buckets: usize,
    pub bucket_exists: usize,
    pub get_object: usize,
    pub stream_download: usize,
    pub stream_write_part: usize,
}

impl CallCounts {
    pub fn total(&self) -> usize {
        self.begin_multipart
            + self.write_part
            + self.finish
            + self.abort
            + self.list_buckets
            + self.bucket_exists
            + self.get_object
            + self.stream_download
            + self.stream_write_part
    }
}

#[derive(Clone, Copy, Debug)]
enum Fault {
    Fail,
    Delay(Duration),
}

struct StoredObject {
    data: Bytes,
    metadata: HashMap<String, String>,
}

struct PendingUpload {
    bucket: String,
    object_id: String,
    metadata: HashMap<String, String>,
    parts: BTreeMap<u32, (String, Bytes)>,
}

#[derive(Default)]
struct State {
    buckets: BTreeSet<String>,
    objects: HashMap<(String, String), StoredObject>,
    uploads: HashMap<String, PendingUpload>,
    counts: CallCounts,
    finished: Vec<Vec<u32>>,
    faults: HashMap<u32, Fault>,
    fail_finish: bool,
    abort_delay: Option<Duration>,
    unavailable: bool,
}

pub struct MemoryBackend {
    provider_id: String,
    state: Mutex<State>,
}

impl MemoryBackend {
    pub fn new(provider_id: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
            state: Mutex::new(State::default()),
        }
    }

    /// Builder-style bucket creation.
    pub fn with_bucket(self, name: &str) -> Self {
        self.create_bucket(name);
        self
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn create_bucket(&self, name: &str) {
        self.state().buckets.insert(name.to_string());
    }

    /// Store a complete object directly, bypassing multipart.
    pub fn put_object(&self, bucket: &str, object_id: &str, data: impl Into<Bytes>) {
        let mut state = self.state();
        state.buckets.insert(bucket.to_string());
        state.objects.insert(
            (bucket.to_string(), object_id.to_string()),
            StoredObject {
                data: data.into(),
                metadata: HashMap::new(),
            },
        );
    }

    pub fn object_data(&self, bucket: &str, object_id: &str) -> Option<Bytes> {
        self.state()
            .objects
            .get(&(bucket.to_string(), object_id.to_string()))
            .map(|obj| obj.data.clone())
    }

    pub fn object_metadata(&self, bucket: &str, object_id: &str) -> Option<HashMap<String, String>> {
        self.state()
            .objects
            .get(&(bucket.to_string(), object_id.to_string()))
            .map(|obj| obj.metadata.clone())
    }

    pub fn counts(&self) -> CallCounts {
        self.state().counts.clone()
    }

    /// Part positions passed to each successful or failed `finish`, in call order.
    pub fn finished_part_lists(&self) -> Vec<Vec<u32>> {
        self.state().finished.clone()
    }

    pub fn pending_uploads(&self) -> usize {
        self.state().uploads.len()
    }

    /// Make writes of part `position` fail.
    pub fn fail_part(&self, position: u32) {
        self.state().faults.insert(position, Fault::Fail);
    }

    /// Hold writes of part `position` for `delay` before accepting them.
    pub fn delay_part(&self, position: u32, delay: Duration) {
        self.state().faults.insert(position, Fault::Delay(delay));
    }

    pub fn fail_finish(&self, fail: bool) {
        self.state().fail_finish = fail;
    }

    /// Hold every `abort` for `delay` before discarding the upload.
    pub fn delay_abort(&self, delay: Duration) {
        self.state().abort_delay = Some(delay);
    }

    /// Make bucket listing and probing fail, as an unreachable endpoint would.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state().unavailable = unavailable;
    }

    fn fault_for(&self, position: u32) -> Option<Fault> {
        self.state().faults.get(&position).copied()
    }

    async fn store_part(
        &self,
        target: MultipartRef<'_>,
        position: u32,
        data: Bytes,
    ) -> BackendResult<String> {
        match self.fault_for(position) {
            Some(Fault::Fail) => {
                return Err(BackendError::Request(format!(
                    "injected failure for part {position}"
                )));
            }
            Some(Fault::Delay(delay)) => tokio::time::sleep(delay).await,
            None => {}
        }

        let tag = format!("{:x}", md5::compute(&data));
        let mut state = self.state();
        let upload = state
            .uploads
            .get_mut(target.upload_id)
            .filter(|u| u.bucket == target.bucket && u.object_id == target.object_id)
            .ok_or_else(|| BackendError::NotFound(format!("upload {}", target.upload_id)))?;
        upload.parts.insert(position, (tag.clone(), data));
        Ok(tag)
    }
}

#[async_trait]
impl ObjectStorageBackend for MemoryBackend {
    fn provider_id(&self) -> &str {
        &self.provider_id
    }

    async fn begin_multipart(
        &self,
        bucket: &str,
        object_id: &str,
        metadata: &HashMap<String, String>,
        cancel: &CancellationToken,
    ) -> BackendResult<String> {
        cancellable(cancel, async {
            let mut state = self.state();
            state.counts.begin_multipart += 1;
            if !state.buckets.contains(bucket) {
                return Err(BackendError::NotFound(format!("bucket {bucket}")));
            }
            let upload_id = crate::models::new_id();
            state.uploads.insert(
                upload_id.clone(),
                PendingUpload {
                    bucket: bucket.to_string(),
                    object_id: object_id.to_string(),
                    metadata: metadata.clone(),
                    parts: BTreeMap::new(),
                },
            );
            Ok(upload_id)
        })
        .await
    }

    async fn write_part(
        &self,
        target: MultipartRef<'_>,
        position: u32,
        data: Bytes,
        cancel: &CancellationToken,
    ) -> BackendResult<String> {
        self.state().counts.write_part += 1;
        cancellable(cancel, self.store_part(target, position, data)).await
    }

    async fn finish(
        &self,
        target: MultipartRef<'_>,
        parts: &[UploadPart],
        cancel: &CancellationToken,
    ) -> BackendResult<()> {
        cancellable(cancel, async {
            let mut state = self.state();
            state.counts.finish += 1;
            state
                .finished
                .push(parts.iter().map(|p| p.position).collect());
            if state.fail_finish {
                return Err(BackendError::Request("injected finish failure".into()));
            }
            if parts.is_empty() {
                return Err(BackendError::Request("no parts to complete".into()));
            }
            if parts.windows(2).any(|w| w[0].position >= w[1].position) {
                return Err(BackendError::Request(
                    "parts must be in ascending order".into(),
                ));
            }

            let upload = state
                .uploads
                .remove(target.upload_id)
                .ok_or_else(|| BackendError::NotFound(format!("upload {}", target.upload_id)))?;
            let mut data = BytesMut::new();
            let mut invalid = None;
            for part in parts {
                match upload.parts.get(&part.position) {
                    Some((tag, bytes)) if *tag == part.tag => data.extend_from_slice(bytes),
                    _ => {
                        invalid = Some(part.position);
                        break;
                    }
                }
            }
            if let Some(position) = invalid {
                state.uploads.insert(target.upload_id.to_string(), upload);
                return Err(BackendError::Request(format!("invalid part {position}")));
            }
            state.objects.insert(
                (upload.bucket, upload.object_id),
                StoredObject {
                    data: data.freeze(),
                    metadata: upload.metadata,
                },
            );
            Ok(())
        })
        .await
    }

    async fn abort(&self, target: MultipartRef<'_>, cancel: &CancellationToken) -> BackendResult<()> {
        cancellable(cancel, async {
            let delay = {
                let mut state = self.state();
                state.counts.abort += 1;
                state.abort_delay
            };
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }
            self.state()
                .uploads
                .remove(target.upload_id)
                .map(|_| ())
                .ok_or_else(|| BackendError::NotFound(format!("upload {}", target.upload_id)))
        })
        .await
    }

    async fn list_buckets(&self, cancel: &CancellationToken) -> BackendResult<Vec<Bucket>> {
        cancellable(cancel, async {
            let mut state = self.state();
            state.counts.list_buckets += 1;
            if state.unavailable {
                return Err(BackendError::Request("endpoint unavailable".into()));
            }
            Ok(state
                .buckets
                .iter()
                .map(|name| Bucket::new(name.clone(), self.provider_id.clone()))
                .collect())
        })
        .await
    }

    async fn bucket_exists(&self, bucket: &str, cancel: &CancellationToken) -> BackendResult<bool> {
        cancellable(cancel, async {
            let mut state = self.state();
            state.counts.bucket_exists += 1;
            if state.unavailable {
                return Err(BackendError::Request("endpoint unavailable".into()));
            }
            Ok(state.buckets.contains(bucket))
        })
        .await
    }

    async fn get_object(
        &self,
        bucket: &str,
        object_id: &str,
        cancel: &CancellationToken,
    ) -> BackendResult<ObjectInfo> {
        cancellable(cancel, async {
            let mut state = self.state();
            state.counts.get_object += 1;
            let obj = state
                .objects
                .get(&(bucket.to_string(), object_id.to_string()))
                .ok_or_else(|| BackendError::NotFound(format!("{bucket}/{object_id}")))?;
            Ok(ObjectInfo {
                id: object_id.to_string(),
                bucket: bucket.to_string(),
                size: obj.data.len() as u64,
                metadata: obj.metadata.clone(),
            })
        })
        .await
    }

    async fn stream_download(
        &self,
        bucket: &str,
        object_id: &str,
        range: Range<u64>,
        cancel: &CancellationToken,
    ) -> BackendResult<ByteStream> {
        cancellable(cancel, async {
            let mut state = self.state();
            state.counts.stream_download += 1;
            let obj = state
                .objects
                .get(&(bucket.to_string(), object_id.to_string()))
                .ok_or_else(|| BackendError::NotFound(format!("{bucket}/{object_id}")))?;
            let len = obj.data.len() as u64;
            if range.start > range.end || range.end > len {
                return Err(BackendError::Request(format!(
                    "range {}..{} outside object of {} bytes",
                    range.start, range.end, len
                )));
            }
            let data = obj.data.slice(range.start as usize..range.end as usize);
            let chunks: Vec<std::io::Result<Bytes>> = (0..data.len())
                .step_by(STREAM_CHUNK)
                .map(|start| Ok(data.slice(start..(start + STREAM_CHUNK).min(data.len()))))
                .collect();
            Ok(stream::iter(chunks).boxed())
        })
        .await
    }

    async fn stream_write_part(
        &self,
        target: MultipartRef<'_>,
        position: u32,
        mut body: ByteStream,
        length: u64,
        cancel: &CancellationToken,
    ) -> BackendResult<String> {
        self.state().counts.stream_write_part += 1;
        cancellable(cancel, async {
            let mut data = BytesMut::with_capacity(length as usize);
            while let Some(chunk) = body.next().await {
                let chunk = chunk.map_err(|err| BackendError::Request(err.to_string()))?;
                data.extend_from_slice(&chunk);
            }
            if data.len() as u64 != length {
                return Err(BackendError::Request(format!(
                    "part {position} declared {length} bytes but streamed {}",
                    data.len()
                )));
            }
            self.store_part(target, position, data.freeze()).await
        })
        .await
    }
}

/// Hands out pre-built memory backends keyed by account access key.
#[derive(Default)]
pub struct MemoryBackendFactory {
    backends: Mutex<HashMap<String, Arc<MemoryBackend>>>,
    connects: AtomicUsize,
}

impl MemoryBackendFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve `backend` to accounts whose access key is `access_key`.
    pub fn insert(&self, access_key: impl Into<String>, backend: Arc<MemoryBackend>) {
        self.backends
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(access_key.into(), backend);
    }

    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BackendFactory for MemoryBackendFactory {
    async fn connect(
        &self,
        _provider: &Provider,
        account: &ServiceAccount,
    ) -> BackendResult<Arc<dyn ObjectStorageBackend>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let backend = self
            .backends
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&account.access_key)
            .cloned()
            .ok_or_else(|| {
                BackendError::Request(format!("unknown credentials `{}`", account.access_key))
            })?;
        Ok(backend)
    }
}
