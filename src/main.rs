use anyhow::Result;
use axum::Router;
use object_gateway::{
    backend::{BackendRegistry, s3::S3BackendFactory},
    config, db,
    routes,
    services::upload_sweeper::{UploadSweepConfig, UploadSweeper},
    state::AppState,
};
use std::{io::ErrorKind, sync::Arc};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

/// Provider kinds served by the S3-compatible backend.
const S3_PROVIDER_KINDS: [&str; 2] = ["yandex", "timeweb"];

#[tokio::main]
async fn main() -> Result<()> {
    // --- Logging setup ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // --- Parse config + migrate flag ---
    let (cfg, migrate) = config::AppConfig::from_env_and_args()?;

    tracing::info!("Starting object-gateway with config: {:?}", cfg);

    // --- Initialize SQLite connection ---
    let db = Arc::new(db::connect(&cfg.database_url, 5).await?);

    // --- Handle migration mode ---
    if migrate {
        db::run_migrations(&db).await?;
        tracing::info!("Database migration complete.");
        return Ok(()); // exit after migration
    }
    db::run_migrations(&db).await?;

    // --- Backends ---
    let registry = Arc::new(BackendRegistry::new());
    let s3 = Arc::new(S3BackendFactory);
    for kind in S3_PROVIDER_KINDS {
        registry.register(kind, s3.clone()).await;
    }
    tracing::info!("Backend kinds: {:?}", registry.names().await);

    // --- Initialize services ---
    let state = AppState::new(db.clone(), registry, &cfg);
    state.uploads.restore_uploads().await?;
    let runner = state.tasks.start(state.shutdown.clone()).await?;

    let sweeper = cfg.upload_ttl.map(|ttl| {
        UploadSweeper::new(
            state.uploads.clone(),
            UploadSweepConfig {
                ttl,
                interval: cfg.sweep_interval,
            },
        )
        .start(state.shutdown.clone())
    });

    // --- Build router ---
    let max_chunk_size = usize::try_from(cfg.max_chunk_size).unwrap_or(usize::MAX);
    let app: Router = routes::routes::routes(max_chunk_size).with_state(state.clone());

    // --- Start server ---
    let addr = cfg.addr();
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err)
            if err.kind() == ErrorKind::PermissionDenied
                && matches!(cfg.host.as_str(), "0.0.0.0" | "::") =>
        {
            let fallback_addr = format!("127.0.0.1:{}", cfg.port);
            tracing::warn!(
                "Permission denied binding to {} ({}). Falling back to {}",
                addr,
                err,
                fallback_addr
            );
            TcpListener::bind(&fallback_addr).await?
        }
        Err(err) => return Err(err.into()),
    };

    tracing::info!("Server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // --- Drain background work ---
    tracing::info!("Shutting down; waiting for in-flight replications");
    state.shutdown.cancel();
    runner.wait().await;
    if let Some(sweeper) = sweeper {
        if let Err(err) = sweeper.await {
            tracing::error!("upload sweep exited abnormally: {}", err);
        }
    }
    tracing::info!("Shutdown complete");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", err);
        std::future::pending::<()>().await;
    }
}
