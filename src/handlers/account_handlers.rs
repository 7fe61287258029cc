//! Account registration and the provider catalog.

use super::replication_handlers::IdResponse;
use crate::{errors::AppError, state::AppState};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct AddAccountReq {
    /// Catalog id of the provider.
    pub provider: String,
    pub region: String,
    pub access_key: String,
    pub secret: String,
}

/// `POST /accounts`
pub async fn add_account(
    State(state): State<AppState>,
    Json(req): Json<AddAccountReq>,
) -> Result<impl IntoResponse, AppError> {
    if req.access_key.is_empty() || req.secret.is_empty() {
        return Err(AppError::bad_request("access_key and secret are required"));
    }
    let account = state
        .accounts
        .add_account(&req.provider, &req.region, &req.access_key, &req.secret)
        .await?;
    Ok((StatusCode::CREATED, Json(IdResponse { id: account.id })))
}

/// `GET /providers`
pub async fn list_providers(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    Ok(Json(state.accounts.list_providers().await?))
}
