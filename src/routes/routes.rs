//! Defines routes for uploads, replication, tasks and accounts.
//!
//! ## Structure
//! - **Resumable uploads**
//!   - `OPTIONS /files`        capabilities
//!   - `POST    /files`        create upload
//!   - `GET     /files`        active uploads
//!   - `HEAD    /files/{id}`   offset / length
//!   - `PATCH   /files/{id}`   append chunk
//!
//! - **Replication**
//!   - `POST /replication/{object_id}`      synchronous copy
//!   - `POST /tasks/replicate/{object_id}`  queued copy
//!   - `GET  /tasks/{task_id}`              task status
//!
//! - **Accounts**
//!   - `POST /accounts`, `GET /providers`

use crate::{
    handlers::{
        account_handlers::{add_account, list_providers},
        health_handlers::{healthz, readyz},
        replication_handlers::{get_task, replicate_object, submit_replication},
        upload_handlers::{create_upload, list_uploads, upload_options, upload_status, write_chunk},
    },
    state::AppState,
};
use axum::{
    Router,
    extract::DefaultBodyLimit,
    routing::{get, head, post},
};
use tower_http::trace::TraceLayer;

/// Build the router. Request bodies are capped at `max_chunk_size` bytes.
pub fn routes(max_chunk_size: usize) -> Router<AppState> {
    Router::new()
        // health endpoints (mounted at root)
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        // uploads
        .route(
            "/files",
            post(create_upload).get(list_uploads).options(upload_options),
        )
        .route("/files/{id}", head(upload_status).patch(write_chunk))
        // replication
        .route("/replication/{object_id}", post(replicate_object))
        .route("/tasks/replicate/{object_id}", post(submit_replication))
        .route("/tasks/{task_id}", get(get_task))
        // accounts
        .route("/accounts", post(add_account))
        .route("/providers", get(list_providers))
        .layer(TraceLayer::new_for_http())
        .layer(DefaultBodyLimit::max(max_chunk_size))
}
