#![allow(dead_code)]

use object_gateway::{
    backend::{
        BackendRegistry,
        memory::{MemoryBackend, MemoryBackendFactory},
    },
    config::AppConfig,
    db,
    models::new_id,
    state::AppState,
};
use std::{sync::Arc, time::Duration};

/// Catalog ids seeded by the migration.
pub const YANDEX: &str = "1";
pub const TIMEWEB: &str = "2";

pub fn test_config() -> AppConfig {
    AppConfig {
        host: "127.0.0.1".into(),
        port: 0,
        database_url: "sqlite::memory:".into(),
        max_upload_size: None,
        max_chunk_size: 1024 * 1024,
        chunk_size: 4,
        part_workers: 3,
        task_workers: 2,
        task_queue_capacity: 8,
        upload_ttl: None,
        sweep_interval: Duration::from_secs(60),
    }
}

pub struct Harness {
    pub state: AppState,
    pub factory: Arc<MemoryBackendFactory>,
}

pub async fn harness() -> Harness {
    harness_with(test_config()).await
}

pub async fn harness_with(cfg: AppConfig) -> Harness {
    let pool = db::connect(&cfg.database_url, 1).await.unwrap();
    db::run_migrations(&pool).await.unwrap();

    let registry = Arc::new(BackendRegistry::new());
    let factory = Arc::new(MemoryBackendFactory::new());
    registry.register("yandex", factory.clone()).await;
    registry.register("timeweb", factory.clone()).await;

    Harness {
        state: AppState::new(Arc::new(pool), registry, &cfg),
        factory,
    }
}

impl Harness {
    /// Register an account on `provider_id` whose credentials reach `backend`.
    pub async fn add_account(&self, provider_id: &str, backend: Arc<MemoryBackend>) -> String {
        let access_key = new_id();
        self.factory.insert(access_key.clone(), backend);
        self.state
            .accounts
            .add_account(provider_id, "ru-central1", &access_key, "secret")
            .await
            .unwrap()
            .id
    }

    /// One backend with a single bucket, reachable through one account.
    pub async fn backend_with_bucket(&self, provider_id: &str, bucket: &str) -> Arc<MemoryBackend> {
        let backend = Arc::new(MemoryBackend::new(provider_id).with_bucket(bucket));
        self.add_account(provider_id, backend.clone()).await;
        backend
    }
}
