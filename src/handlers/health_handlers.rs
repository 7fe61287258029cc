//! Health & readiness handlers.
//!
//! - GET /healthz  -> liveness, always "ok"
//! - GET /readyz   -> readiness: SQLite answers and the provider catalog is seeded

use crate::state::AppState;
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use std::collections::BTreeMap;

/// `GET /healthz`
pub async fn healthz() -> impl IntoResponse {
    Json(HealthResponse { status: "ok" })
}

/// `GET /readyz`
///
/// Runs `SELECT 1` against SQLite and reads the provider catalog. Without
/// providers no account can be registered and no upload can be placed, so an
/// empty catalog counts as not ready.
///
/// HTTP 200 when every check passes, HTTP 503 otherwise.
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let mut checks = BTreeMap::new();

    let sqlite = sqlx::query_scalar::<_, i64>("SELECT 1")
        .fetch_one(&*state.db)
        .await;
    checks.insert(
        "sqlite",
        match sqlite {
            Ok(1) => CheckStatus::passed(),
            Ok(v) => CheckStatus::failed(format!("unexpected result: {}", v)),
            Err(e) => CheckStatus::failed(e),
        },
    );

    checks.insert(
        "providers",
        match state.accounts.list_providers().await {
            Ok(providers) if !providers.is_empty() => CheckStatus::passed(),
            Ok(_) => CheckStatus::failed("provider catalog is empty"),
            Err(e) => CheckStatus::failed(e),
        },
    );

    let ready = checks.values().all(|c| c.ok);
    let status = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        status,
        Json(ReadyResponse {
            status: if ready { "ok" } else { "error" },
            checks,
        }),
    )
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Serialize)]
struct ReadyResponse {
    status: &'static str,
    checks: BTreeMap<&'static str, CheckStatus>,
}

#[derive(Serialize)]
struct CheckStatus {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl CheckStatus {
    fn passed() -> Self {
        Self { ok: true, error: None }
    }

    fn failed(err: impl std::fmt::Display) -> Self {
        Self {
            ok: false,
            error: Some(err.to_string()),
        }
    }
}
