//! Task tracker: asynchronous, durable replication.
//!
//! `submit` persists a `Created` task and queues it without waiting for queue
//! capacity. A fixed set of dispatch workers drains the queue through the
//! replication engine and hands every outcome to a single collector, which
//! writes the terminal status.
//!
//! Tasks that do not fit in the queue stay `Created` in the repository. A
//! backlog feeder queues them, in creation order, as capacity frees up; on
//! start it also picks up every task a previous run left `Created` (resume).
//! On shutdown workers stop taking queue entries, finish what they are
//! running, and the collector records those results before exiting.

use super::{
    errors::{ServiceError, ServiceResult},
    replication_service::{ReplicationResult, ReplicationService},
};
use crate::{
    models::{
        storage::StorageRef,
        task::{ReplicationRequest, ReplicationTask, TaskStatus},
    },
    repositories::TaskRepository,
};
use std::{collections::HashSet, sync::Arc};
use tokio::{
    sync::{Mutex, Notify, mpsc, mpsc::error::TrySendError},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub const DEFAULT_TASK_WORKERS: usize = 4;
pub const DEFAULT_TASK_QUEUE_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct TaskConfig {
    pub workers: usize,
    pub queue_capacity: usize,
}

impl Default for TaskConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_TASK_WORKERS,
            queue_capacity: DEFAULT_TASK_QUEUE_CAPACITY,
        }
    }
}

pub struct TaskService {
    repo: Arc<dyn TaskRepository>,
    replication: ReplicationService,
    queue: mpsc::Sender<ReplicationRequest>,
    receiver: Mutex<Option<mpsc::Receiver<ReplicationRequest>>>,
    /// Ids queued but not yet recorded by the collector.
    pending: Mutex<HashSet<String>>,
    /// Signalled when a task was left in the repository for the feeder.
    backlog: Notify,
    workers: usize,
}

/// Handles of the running dispatch workers, collector and backlog feeder.
pub struct TaskRunner {
    handles: Vec<JoinHandle<()>>,
}

impl TaskRunner {
    /// Wait for every spawned task to exit.
    pub async fn wait(self) {
        for handle in self.handles {
            if let Err(err) = handle.await {
                error!("task runner exited abnormally: {}", err);
            }
        }
    }
}

impl TaskService {
    pub fn new(
        repo: Arc<dyn TaskRepository>,
        replication: ReplicationService,
        config: TaskConfig,
    ) -> Self {
        let (queue, receiver) = mpsc::channel(config.queue_capacity.max(1));
        Self {
            repo,
            replication,
            queue,
            receiver: Mutex::new(Some(receiver)),
            pending: Mutex::new(HashSet::new()),
            backlog: Notify::new(),
            workers: config.workers.max(1),
        }
    }

    /// Persist and queue a replication; returns the task id immediately.
    pub async fn submit(
        &self,
        object_id: &str,
        priority: i32,
        source: StorageRef,
        target: StorageRef,
    ) -> ServiceResult<String> {
        let task = ReplicationTask::new(object_id, priority, source, target);
        self.repo.add(&task).await?;
        info!(
            "task {} created: replicate {} from {} to {}",
            task.id, task.object_id, task.source_storage, task.target_storage
        );
        self.try_enqueue(task.request()).await;
        Ok(task.id)
    }

    pub async fn get_task(&self, id: &str) -> ServiceResult<ReplicationTask> {
        self.repo
            .get_by_id(id)
            .await?
            .ok_or_else(|| ServiceError::TaskNotFound(id.to_string()))
    }

    /// Queue `request` if there is room; otherwise leave it to the feeder.
    async fn try_enqueue(&self, request: ReplicationRequest) {
        let task_id = request.task_id.clone();
        let mut pending = self.pending.lock().await;
        if pending.contains(&task_id) {
            debug!("task {} already queued", task_id);
            return;
        }
        match self.queue.try_send(request) {
            Ok(()) => {
                pending.insert(task_id);
            }
            Err(TrySendError::Full(_)) => {
                debug!("task queue full; task {} stays in the backlog", task_id);
                self.backlog.notify_one();
            }
            Err(TrySendError::Closed(_)) => {
                warn!("task queue closed; task {} stays created", task_id);
            }
        }
    }

    /// Spawn the dispatch workers, the collector and the backlog feeder.
    /// Returns without waiting for any task to be queued. Can be called once.
    pub async fn start(self: &Arc<Self>, shutdown: CancellationToken) -> ServiceResult<TaskRunner> {
        let receiver = self
            .receiver
            .lock()
            .await
            .take()
            .ok_or_else(|| ServiceError::WorkerPool("task runner already started".into()))?;
        let receiver = Arc::new(Mutex::new(receiver));
        let (result_tx, result_rx) = mpsc::channel::<ReplicationResult>(self.workers);

        let mut handles = Vec::with_capacity(self.workers + 2);
        for worker in 0..self.workers {
            let receiver = receiver.clone();
            let result_tx = result_tx.clone();
            let shutdown = shutdown.clone();
            let replication = self.replication.clone();
            handles.push(tokio::spawn(async move {
                dispatch(worker, receiver, result_tx, replication, shutdown).await;
            }));
        }
        drop(result_tx);

        let service = self.clone();
        handles.push(tokio::spawn(async move {
            service.collect(result_rx).await;
        }));
        let service = self.clone();
        let feeder_shutdown = shutdown.clone();
        handles.push(tokio::spawn(async move {
            service.feed_backlog(feeder_shutdown).await;
        }));
        info!("started {} task workers", self.workers);

        Ok(TaskRunner { handles })
    }

    /// Queue backlog tasks whenever signalled, starting with one pass for the
    /// tasks a previous run left `Created`.
    async fn feed_backlog(&self, shutdown: CancellationToken) {
        loop {
            match self.drain_backlog(&shutdown).await {
                Ok(0) => {}
                Ok(queued) => info!("queued {} backlog tasks", queued),
                Err(err) => error!("failed to read task backlog: {}", err),
            }
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = self.backlog.notified() => {}
            }
        }
        debug!("task backlog feeder stopped");
    }

    async fn drain_backlog(&self, shutdown: &CancellationToken) -> ServiceResult<usize> {
        let created = self.repo.list_by_status(TaskStatus::Created).await?;
        let mut queued = 0;
        for task in created {
            if self.pending.lock().await.contains(&task.id) {
                continue;
            }
            let permit = tokio::select! {
                _ = shutdown.cancelled() => return Ok(queued),
                permit = self.queue.reserve() => match permit {
                    Ok(permit) => permit,
                    Err(_) => return Ok(queued),
                },
            };

            // Ids leave `pending` only after their result is recorded.
            let mut pending = self.pending.lock().await;
            if pending.contains(&task.id) {
                continue;
            }
            match self.repo.get_by_id(&task.id).await? {
                Some(current) if current.status == TaskStatus::Created => {
                    pending.insert(current.id.clone());
                    permit.send(current.request());
                    queued += 1;
                }
                _ => continue,
            }
        }
        Ok(queued)
    }

    async fn collect(&self, mut results: mpsc::Receiver<ReplicationResult>) {
        while let Some(result) = results.recv().await {
            if let Err(err) = self.record(&result).await {
                error!("failed to record result of task {}: {}", result.task_id, err);
            }
            self.pending.lock().await.remove(&result.task_id);
        }
        debug!("task result collector stopped");
    }

    async fn record(&self, result: &ReplicationResult) -> ServiceResult<()> {
        let mut task = self.get_task(&result.task_id).await?;
        task.start = Some(result.start);
        task.end = Some(result.end);
        match &result.error {
            None => {
                task.status = TaskStatus::Completed;
                info!("task {} completed", task.id);
            }
            Some(reason) => {
                task.status = TaskStatus::Failed;
                task.error = Some(reason.clone());
                warn!("task {} failed: {}", task.id, reason);
            }
        }
        self.repo.update(&task).await?;
        Ok(())
    }
}

async fn dispatch(
    worker: usize,
    receiver: Arc<Mutex<mpsc::Receiver<ReplicationRequest>>>,
    results: mpsc::Sender<ReplicationResult>,
    replication: ReplicationService,
    shutdown: CancellationToken,
) {
    loop {
        let next = tokio::select! {
            biased;
            _ = shutdown.cancelled() => None,
            request = async { receiver.lock().await.recv().await } => request,
        };
        let Some(request) = next else { break };

        debug!("worker {} running task {}", worker, request.task_id);
        // In-flight replications are not interrupted by shutdown.
        let result = replication.run(&request, &CancellationToken::new()).await;
        if results.send(result).await.is_err() {
            break;
        }
    }
    debug!("task worker {} stopped", worker);
}
