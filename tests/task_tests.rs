mod common;

use bytes::Bytes;
use common::{TIMEWEB, YANDEX, harness, harness_with, test_config};
use object_gateway::{
    models::{
        new_id,
        storage::StorageRef,
        task::{ReplicationTask, TaskStatus},
    },
    repositories::{SqliteRepository, TaskRepository},
    services::ServiceError,
    state::AppState,
};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Poll until the task leaves `Created`.
async fn wait_for_terminal(state: &AppState, id: &str) -> ReplicationTask {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let task = state.tasks.get_task(id).await.unwrap();
            if task.status != TaskStatus::Created {
                return task;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("task did not finish in time")
}

#[tokio::test]
async fn submitted_task_completes_in_background() {
    let h = harness().await;
    let source = h.backend_with_bucket(YANDEX, "src").await;
    let target = h.backend_with_bucket(TIMEWEB, "dst").await;
    let object_id = new_id();
    source.put_object("src", &object_id, Bytes::from_static(b"replicate me"));

    let shutdown = CancellationToken::new();
    let runner = h.state.tasks.start(shutdown.clone()).await.unwrap();

    let id = h
        .state
        .tasks
        .submit(
            &object_id,
            0,
            StorageRef::new(YANDEX, "src"),
            StorageRef::new(TIMEWEB, "dst"),
        )
        .await
        .unwrap();

    let task = wait_for_terminal(&h.state, &id).await;
    assert_eq!(task.status, TaskStatus::Completed);
    assert!(task.start.is_some());
    assert!(task.end >= task.start);
    assert!(task.error.is_none());
    assert_eq!(
        target.object_data("dst", &object_id).unwrap(),
        Bytes::from_static(b"replicate me")
    );

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(5), runner.wait())
        .await
        .unwrap();
}

#[tokio::test]
async fn failed_replication_marks_task_failed() {
    let h = harness().await;
    h.backend_with_bucket(YANDEX, "src").await;
    h.backend_with_bucket(TIMEWEB, "dst").await;

    let shutdown = CancellationToken::new();
    let _runner = h.state.tasks.start(shutdown.clone()).await.unwrap();

    let id = h
        .state
        .tasks
        .submit(
            &new_id(),
            5,
            StorageRef::new(YANDEX, "src"),
            StorageRef::new(TIMEWEB, "dst"),
        )
        .await
        .unwrap();

    let task = wait_for_terminal(&h.state, &id).await;
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.priority, 5);
    assert!(task.error.unwrap().contains("not found"));
    shutdown.cancel();
}

#[tokio::test]
async fn created_tasks_resume_on_start() {
    let h = harness().await;
    let source = h.backend_with_bucket(YANDEX, "src").await;
    let target = h.backend_with_bucket(TIMEWEB, "dst").await;
    let object_id = new_id();
    source.put_object("src", &object_id, Bytes::from_static(b"left over"));

    let leftover = ReplicationTask::new(
        object_id.clone(),
        0,
        StorageRef::new(YANDEX, "src"),
        StorageRef::new(TIMEWEB, "dst"),
    );
    let repo = SqliteRepository::new(h.state.db.clone());
    TaskRepository::add(&repo, &leftover).await.unwrap();

    let shutdown = CancellationToken::new();
    let _runner = h.state.tasks.start(shutdown.clone()).await.unwrap();

    let task = wait_for_terminal(&h.state, &leftover.id).await;
    assert_eq!(task.status, TaskStatus::Completed);
    assert!(target.object_data("dst", &object_id).is_some());
    shutdown.cancel();
}

#[tokio::test]
async fn runner_starts_once_and_stops_on_shutdown() {
    let h = harness().await;
    let shutdown = CancellationToken::new();
    let runner = h.state.tasks.start(shutdown.clone()).await.unwrap();

    assert!(matches!(
        h.state.tasks.start(shutdown.clone()).await,
        Err(ServiceError::WorkerPool(_))
    ));

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(5), runner.wait())
        .await
        .unwrap();
}

#[tokio::test]
async fn unknown_task_is_not_found() {
    let h = harness().await;
    assert!(matches!(
        h.state.tasks.get_task(&new_id()).await,
        Err(ServiceError::TaskNotFound(_))
    ));
}

async fn single_worker_harness() -> common::Harness {
    let mut cfg = test_config();
    cfg.task_workers = 1;
    cfg.task_queue_capacity = 1;
    harness_with(cfg).await
}

#[tokio::test]
async fn submit_does_not_wait_for_queue_capacity() {
    let h = single_worker_harness().await;
    let source = h.backend_with_bucket(YANDEX, "src").await;
    let target = h.backend_with_bucket(TIMEWEB, "dst").await;
    target.delay_part(1, Duration::from_millis(300));

    let shutdown = CancellationToken::new();
    let _runner = h.state.tasks.start(shutdown.clone()).await.unwrap();

    let mut submitted = Vec::new();
    for n in 0..4 {
        let object_id = new_id();
        source.put_object("src", &object_id, Bytes::from_static(b"abc"));
        let id = tokio::time::timeout(
            Duration::from_millis(200),
            h.state.tasks.submit(
                &object_id,
                0,
                StorageRef::new(YANDEX, "src"),
                StorageRef::new(TIMEWEB, "dst"),
            ),
        )
        .await
        .unwrap_or_else(|_| panic!("submit #{} waited for queue capacity", n))
        .unwrap();
        submitted.push((id, object_id));
    }

    for (id, object_id) in &submitted {
        let task = wait_for_terminal(&h.state, id).await;
        assert_eq!(task.status, TaskStatus::Completed);
        assert!(target.object_data("dst", object_id).is_some());
    }
    shutdown.cancel();
}

#[tokio::test]
async fn start_returns_before_backlog_is_queued() {
    let h = single_worker_harness().await;
    let source = h.backend_with_bucket(YANDEX, "src").await;
    let target = h.backend_with_bucket(TIMEWEB, "dst").await;
    target.delay_part(1, Duration::from_millis(200));

    let repo = SqliteRepository::new(h.state.db.clone());
    let mut leftovers = Vec::new();
    for _ in 0..5 {
        let object_id = new_id();
        source.put_object("src", &object_id, Bytes::from_static(b"left over"));
        let task = ReplicationTask::new(
            object_id,
            0,
            StorageRef::new(YANDEX, "src"),
            StorageRef::new(TIMEWEB, "dst"),
        );
        TaskRepository::add(&repo, &task).await.unwrap();
        leftovers.push(task);
    }

    let shutdown = CancellationToken::new();
    let runner = tokio::time::timeout(
        Duration::from_millis(200),
        h.state.tasks.start(shutdown.clone()),
    )
    .await
    .expect("start waited for the backlog")
    .unwrap();

    for task in &leftovers {
        let done = wait_for_terminal(&h.state, &task.id).await;
        assert_eq!(done.status, TaskStatus::Completed);
        assert!(target.object_data("dst", &task.object_id).is_some());
    }

    shutdown.cancel();
    tokio::time::timeout(Duration::from_secs(5), runner.wait())
        .await
        .unwrap();
}
