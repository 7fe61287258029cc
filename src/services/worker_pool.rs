//! Bounded worker pool for range-partitioned part copies.
//!
//! A feeder pushes [`PartTask`]s into a bounded queue; a fixed number of
//! workers pull from it, stream each byte range from the source backend into
//! the target multipart upload and report a [`PartResult`]. [`PartCopyPool::run`]
//! waits for exactly one result per task. Result order is whatever order the
//! workers finish in.

use super::errors::{ServiceError, ServiceResult};
use crate::backend::{ByteStream, MultipartRef, ObjectStorageBackend};
use futures::{StreamExt, stream};
use std::{ops::Range, sync::Arc};
use tokio::{
    sync::{Mutex, mpsc},
    task::JoinSet,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// One byte range to copy as one multipart part.
pub struct PartTask {
    pub object_id: String,
    pub part_number: u32,
    /// Byte range of the source object, end exclusive.
    pub range: Range<u64>,
    pub source: Arc<dyn ObjectStorageBackend>,
    pub source_bucket: String,
    pub target: Arc<dyn ObjectStorageBackend>,
    pub target_bucket: String,
    pub upload_id: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartResult {
    pub part_number: u32,
    pub part_tag: String,
}

pub struct PartCopyPool {
    workers: usize,
}

impl PartCopyPool {
    pub fn new(workers: usize) -> Self {
        Self {
            workers: workers.max(1),
        }
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Copy every task and return one result per task, unordered.
    ///
    /// The first failed part cancels the parts still in flight and is
    /// returned once every worker has stopped.
    pub async fn run(
        &self,
        tasks: Vec<PartTask>,
        cancel: &CancellationToken,
    ) -> ServiceResult<Vec<PartResult>> {
        let expected = tasks.len();
        if expected == 0 {
            return Ok(Vec::new());
        }

        let cancel = cancel.child_token();
        let worker_count = self.workers.min(expected);
        let (task_tx, task_rx) = mpsc::channel::<PartTask>(worker_count);
        let task_rx = Arc::new(Mutex::new(task_rx));
        let (result_tx, mut result_rx) = mpsc::channel::<ServiceResult<PartResult>>(worker_count);

        let mut workers = JoinSet::new();
        for worker in 0..worker_count {
            let task_rx = task_rx.clone();
            let result_tx = result_tx.clone();
            let cancel = cancel.clone();
            workers.spawn(async move {
                loop {
                    let next = task_rx.lock().await.recv().await;
                    let Some(task) = next else { break };
                    debug!("worker {} copying part {}", worker, task.part_number);
                    let result = copy_part(task, &cancel).await;
                    if result_tx.send(result).await.is_err() {
                        break;
                    }
                }
            });
        }
        drop(result_tx);

        let feeder_cancel = cancel.clone();
        workers.spawn(async move {
            for task in tasks {
                tokio::select! {
                    _ = feeder_cancel.cancelled() => break,
                    sent = task_tx.send(task) => {
                        if sent.is_err() {
                            break;
                        }
                    }
                }
            }
        });

        let mut results = Vec::with_capacity(expected);
        let mut failure = None;
        while results.len() < expected {
            match result_rx.recv().await {
                Some(Ok(part)) => results.push(part),
                Some(Err(err)) => {
                    failure = Some(err);
                    break;
                }
                None => {
                    failure = Some(ServiceError::WorkerPool(format!(
                        "workers stopped after {} of {} parts",
                        results.len(),
                        expected
                    )));
                    break;
                }
            }
        }

        if failure.is_some() {
            cancel.cancel();
        }
        drop(result_rx);
        while let Some(joined) = workers.join_next().await {
            if let Err(err) = joined {
                warn!("part copy worker panicked: {}", err);
                failure.get_or_insert_with(|| ServiceError::WorkerPool(err.to_string()));
            }
        }

        match failure {
            Some(err) => Err(err),
            None => Ok(results),
        }
    }
}

async fn copy_part(task: PartTask, cancel: &CancellationToken) -> ServiceResult<PartResult> {
    let length = task.range.end - task.range.start;
    let body: ByteStream = if length == 0 {
        stream::empty().boxed()
    } else {
        task.source
            .stream_download(&task.source_bucket, &task.object_id, task.range.clone(), cancel)
            .await?
    };

    let target = MultipartRef {
        bucket: &task.target_bucket,
        upload_id: &task.upload_id,
        object_id: &task.object_id,
    };
    let part_tag = match task
        .target
        .stream_write_part(target, task.part_number, body, length, cancel)
        .await
    {
        Ok(tag) => tag,
        Err(err) => {
            warn!(
                "object {}: part {} ({}..{}) failed: {}",
                task.object_id, task.part_number, task.range.start, task.range.end, err
            );
            return Err(err.into());
        }
    };

    debug!(
        "object {}: part {} copied ({} bytes)",
        task.object_id, task.part_number, length
    );
    Ok(PartResult {
        part_number: task.part_number,
        part_tag,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryBackend;
    use std::collections::HashMap;
    use std::time::Duration;

    async fn fixture(data: &'static [u8]) -> (Arc<MemoryBackend>, Arc<MemoryBackend>, String) {
        let source = Arc::new(MemoryBackend::new("1"));
        source.put_object("src", "obj", data);
        let target = Arc::new(MemoryBackend::new("2").with_bucket("dst"));
        let upload_id = target
            .begin_multipart("dst", "obj", &HashMap::new(), &CancellationToken::new())
            .await
            .unwrap();
        (source, target, upload_id)
    }

    fn task(
        source: &Arc<MemoryBackend>,
        target: &Arc<MemoryBackend>,
        upload_id: &str,
        part_number: u32,
        range: Range<u64>,
    ) -> PartTask {
        PartTask {
            object_id: "obj".into(),
            part_number,
            range,
            source: source.clone(),
            source_bucket: "src".into(),
            target: target.clone(),
            target_bucket: "dst".into(),
            upload_id: upload_id.to_string(),
        }
    }

    #[tokio::test]
    async fn returns_one_result_per_task() {
        let (source, target, upload_id) = fixture(b"abcdefghij").await;
        target.delay_part(1, Duration::from_millis(50));
        let tasks = vec![
            task(&source, &target, &upload_id, 1, 0..4),
            task(&source, &target, &upload_id, 2, 4..8),
            task(&source, &target, &upload_id, 3, 8..10),
        ];

        let mut results = PartCopyPool::new(3)
            .run(tasks, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(results.len(), 3);
        results.sort_by_key(|r| r.part_number);
        let numbers: Vec<u32> = results.iter().map(|r| r.part_number).collect();
        assert_eq!(numbers, vec![1, 2, 3]);
        assert_eq!(target.counts().stream_write_part, 3);
    }

    #[tokio::test]
    async fn first_failure_is_returned() {
        let (source, target, upload_id) = fixture(b"abcdefghij").await;
        target.fail_part(2);
        let tasks = vec![
            task(&source, &target, &upload_id, 1, 0..5),
            task(&source, &target, &upload_id, 2, 5..10),
        ];

        let err = PartCopyPool::new(2)
            .run(tasks, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Backend(_)));
    }

    #[tokio::test]
    async fn empty_range_skips_download() {
        let (source, target, upload_id) = fixture(b"").await;
        let results = PartCopyPool::new(5)
            .run(
                vec![task(&source, &target, &upload_id, 1, 0..0)],
                &CancellationToken::new(),
            )
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(source.counts().stream_download, 0);
    }
}
