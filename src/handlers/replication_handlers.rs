//! Replication endpoints.
//!
//! - `POST /replication/{object_id}`        copy now, respond with the replica
//! - `POST /tasks/replicate/{object_id}`    queue a copy, respond 202 with a task id
//! - `GET  /tasks/{task_id}`                task status

use crate::{
    errors::AppError,
    models::{is_valid_id, storage::StorageRef},
    state::AppState,
};
use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};

/// Body of both replication triggers.
#[derive(Debug, Deserialize)]
pub struct ReplicateReq {
    pub source_storage: StorageRef,
    pub target_storage: StorageRef,
    /// Recorded on the task; dispatch is FIFO.
    #[serde(default)]
    pub priority: i32,
}

#[derive(Debug, Serialize)]
pub struct IdResponse {
    pub id: String,
}

fn check_object_id(id: &str) -> Result<(), AppError> {
    if is_valid_id(id) {
        Ok(())
    } else {
        Err(AppError::not_found(format!("object `{}` not found", id)))
    }
}

/// `POST /replication/{object_id}`
pub async fn replicate_object(
    State(state): State<AppState>,
    Path(object_id): Path<String>,
    Json(req): Json<ReplicateReq>,
) -> Result<impl IntoResponse, AppError> {
    check_object_id(&object_id)?;
    let cancel = state.shutdown.child_token();
    let replica = state
        .replication
        .replicate_object(&object_id, &req.source_storage, &req.target_storage, &cancel)
        .await?;
    Ok(Json(replica))
}

/// `POST /tasks/replicate/{object_id}`
pub async fn submit_replication(
    State(state): State<AppState>,
    Path(object_id): Path<String>,
    Json(req): Json<ReplicateReq>,
) -> Result<impl IntoResponse, AppError> {
    check_object_id(&object_id)?;
    let id = state
        .tasks
        .submit(&object_id, req.priority, req.source_storage, req.target_storage)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(IdResponse { id })))
}

/// `GET /tasks/{task_id}`
pub async fn get_task(
    State(state): State<AppState>,
    Path(task_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    if !is_valid_id(&task_id) {
        return Err(AppError::not_found(format!("task `{}` not found", task_id)));
    }
    let task = state.tasks.get_task(&task_id).await?;
    Ok(Json(task))
}
