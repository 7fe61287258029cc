//! SQLite implementation of every repository.

use super::{
    AccountRepository, ProviderRepository, RepositoryError, RepositoryResult, TaskRepository,
    UploadRepository,
};
use crate::models::{
    account::{Provider, ServiceAccount},
    storage::StorageRef,
    task::{ReplicationTask, TaskStatus},
    upload::{Upload, UploadPart, UploadStatus},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, SqlitePool};
use std::{collections::HashMap, sync::Arc};

/// Repositories backed by one shared SQLite pool.
#[derive(Clone)]
pub struct SqliteRepository {
    db: Arc<SqlitePool>,
}

impl SqliteRepository {
    pub fn new(db: Arc<SqlitePool>) -> Self {
        Self { db }
    }
}

#[derive(FromRow)]
struct AccountRow {
    id: String,
    provider_id: String,
    region: String,
    access_key: String,
    secret: String,
    created_at: DateTime<Utc>,
}

impl From<AccountRow> for ServiceAccount {
    fn from(row: AccountRow) -> Self {
        ServiceAccount {
            id: row.id,
            provider_id: row.provider_id,
            region: row.region,
            access_key: row.access_key,
            secret: row.secret,
            created_at: row.created_at,
        }
    }
}

#[derive(FromRow)]
struct ProviderRow {
    id: String,
    name: String,
    endpoint: String,
}

#[derive(FromRow)]
struct UploadRow {
    id: String,
    object_id: String,
    size: i64,
    upload_offset: i64,
    provider_id: String,
    bucket: String,
    parts: String,
    metadata: String,
    status: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<UploadRow> for Upload {
    type Error = RepositoryError;

    fn try_from(row: UploadRow) -> Result<Self, Self::Error> {
        let parts: Vec<UploadPart> = serde_json::from_str(&row.parts)
            .map_err(|err| RepositoryError::Decode(format!("upload {} parts: {}", row.id, err)))?;
        let metadata: HashMap<String, String> = serde_json::from_str(&row.metadata)
            .map_err(|err| RepositoryError::Decode(format!("upload {} metadata: {}", row.id, err)))?;
        let status = row.status.parse().map_err(RepositoryError::Decode)?;

        Ok(Upload {
            id: row.id,
            object_id: row.object_id,
            size: row.size as u64,
            offset: row.upload_offset as u64,
            storage: StorageRef::new(row.provider_id, row.bucket),
            parts,
            status,
            metadata,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(FromRow)]
struct TaskRow {
    id: String,
    object_id: String,
    priority: i32,
    source_provider_id: String,
    source_bucket: String,
    target_provider_id: String,
    target_bucket: String,
    status: String,
    started_at: Option<DateTime<Utc>>,
    ended_at: Option<DateTime<Utc>>,
    error: Option<String>,
    created_at: DateTime<Utc>,
}

impl TryFrom<TaskRow> for ReplicationTask {
    type Error = RepositoryError;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        Ok(ReplicationTask {
            status: row.status.parse().map_err(RepositoryError::Decode)?,
            id: row.id,
            object_id: row.object_id,
            priority: row.priority,
            source_storage: StorageRef::new(row.source_provider_id, row.source_bucket),
            target_storage: StorageRef::new(row.target_provider_id, row.target_bucket),
            start: row.started_at,
            end: row.ended_at,
            error: row.error,
            created_at: row.created_at,
        })
    }
}

fn encode_json<T: serde::Serialize>(value: &T) -> RepositoryResult<String> {
    serde_json::to_string(value).map_err(|err| RepositoryError::Decode(err.to_string()))
}

const UPLOAD_COLUMNS: &str = "id, object_id, size, upload_offset, provider_id, bucket, parts, \
                              metadata, status, created_at, updated_at";

const TASK_COLUMNS: &str = "id, object_id, priority, source_provider_id, source_bucket, \
                            target_provider_id, target_bucket, status, started_at, ended_at, \
                            error, created_at";

#[async_trait]
impl AccountRepository for SqliteRepository {
    async fn add(&self, account: &ServiceAccount) -> RepositoryResult<()> {
        sqlx::query(
            "INSERT INTO accounts (id, provider_id, region, access_key, secret, created_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(&account.id)
        .bind(&account.provider_id)
        .bind(&account.region)
        .bind(&account.access_key)
        .bind(&account.secret)
        .bind(account.created_at)
        .execute(&*self.db)
        .await?;
        Ok(())
    }

    async fn get_by_id(&self, id: &str) -> RepositoryResult<Option<ServiceAccount>> {
        let row = sqlx::query_as::<_, AccountRow>(
            "SELECT id, provider_id, region, access_key, secret, created_at
             FROM accounts WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&*self.db)
        .await?;
        Ok(row.map(ServiceAccount::from))
    }

    async fn list_by_provider(&self, provider_id: &str) -> RepositoryResult<Vec<ServiceAccount>> {
        let rows = sqlx::query_as::<_, AccountRow>(
            "SELECT id, provider_id, region, access_key, secret, created_at
             FROM accounts WHERE provider_id = ? ORDER BY created_at ASC, rowid ASC",
        )
        .bind(provider_id)
        .fetch_all(&*self.db)
        .await?;
        Ok(rows.into_iter().map(ServiceAccount::from).collect())
    }

    async fn list(&self) -> RepositoryResult<Vec<ServiceAccount>> {
        let rows = sqlx::query_as::<_, AccountRow>(
            "SELECT id, provider_id, region, access_key, secret, created_at
             FROM accounts ORDER BY created_at ASC, rowid ASC",
        )
        .fetch_all(&*self.db)
        .await?;
        Ok(rows.into_iter().map(ServiceAccount::from).collect())
    }
}

#[async_trait]
impl ProviderRepository for SqliteRepository {
    async fn get_by_id(&self, id: &str) -> RepositoryResult<Option<Provider>> {
        let row = sqlx::query_as::<_, ProviderRow>(
            "SELECT id, name, endpoint FROM providers WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&*self.db)
        .await?;
        Ok(row.map(|r| Provider {
            id: r.id,
            name: r.name,
            endpoint: r.endpoint,
        }))
    }

    async fn list(&self) -> RepositoryResult<Vec<Provider>> {
        let rows = sqlx::query_as::<_, ProviderRow>(
            "SELECT id, name, endpoint FROM providers ORDER BY id ASC",
        )
        .fetch_all(&*self.db)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| Provider {
                id: r.id,
                name: r.name,
                endpoint: r.endpoint,
            })
            .collect())
    }
}

#[async_trait]
impl UploadRepository for SqliteRepository {
    async fn add(&self, upload: &Upload) -> RepositoryResult<()> {
        sqlx::query(&format!(
            "INSERT INTO uploads ({UPLOAD_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(&upload.id)
        .bind(&upload.object_id)
        .bind(upload.size as i64)
        .bind(upload.offset as i64)
        .bind(&upload.storage.provider_id)
        .bind(&upload.storage.bucket)
        .bind(encode_json(&upload.parts)?)
        .bind(encode_json(&upload.metadata)?)
        .bind(upload.status.as_str())
        .bind(upload.created_at)
        .bind(upload.updated_at)
        .execute(&*self.db)
        .await?;
        Ok(())
    }

    async fn get_by_object_id(&self, object_id: &str) -> RepositoryResult<Option<Upload>> {
        let row = sqlx::query_as::<_, UploadRow>(&format!(
            "SELECT {UPLOAD_COLUMNS} FROM uploads WHERE object_id = ?"
        ))
        .bind(object_id)
        .fetch_optional(&*self.db)
        .await?;
        row.map(Upload::try_from).transpose()
    }

    async fn update(&self, upload: &Upload) -> RepositoryResult<()> {
        sqlx::query(
            "UPDATE uploads SET upload_offset = ?, parts = ?, metadata = ?, status = ?, updated_at = ?
             WHERE id = ?",
        )
        .bind(upload.offset as i64)
        .bind(encode_json(&upload.parts)?)
        .bind(encode_json(&upload.metadata)?)
        .bind(upload.status.as_str())
        .bind(upload.updated_at)
        .bind(&upload.id)
        .execute(&*self.db)
        .await?;
        Ok(())
    }

    async fn list_by_status(&self, status: UploadStatus) -> RepositoryResult<Vec<Upload>> {
        let rows = sqlx::query_as::<_, UploadRow>(&format!(
            "SELECT {UPLOAD_COLUMNS} FROM uploads WHERE status = ? ORDER BY created_at ASC"
        ))
        .bind(status.as_str())
        .fetch_all(&*self.db)
        .await?;
        rows.into_iter().map(Upload::try_from).collect()
    }
}

#[async_trait]
impl TaskRepository for SqliteRepository {
    async fn add(&self, task: &ReplicationTask) -> RepositoryResult<()> {
        sqlx::query(&format!(
            "INSERT INTO tasks ({TASK_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(&task.id)
        .bind(&task.object_id)
        .bind(task.priority)
        .bind(&task.source_storage.provider_id)
        .bind(&task.source_storage.bucket)
        .bind(&task.target_storage.provider_id)
        .bind(&task.target_storage.bucket)
        .bind(task.status.as_str())
        .bind(task.start)
        .bind(task.end)
        .bind(&task.error)
        .bind(task.created_at)
        .execute(&*self.db)
        .await?;
        Ok(())
    }

    async fn get_by_id(&self, id: &str) -> RepositoryResult<Option<ReplicationTask>> {
        let row = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?"
        ))
        .bind(id)
        .fetch_optional(&*self.db)
        .await?;
        row.map(ReplicationTask::try_from).transpose()
    }

    async fn update(&self, task: &ReplicationTask) -> RepositoryResult<()> {
        sqlx::query(
            "UPDATE tasks SET status = ?, started_at = ?, ended_at = ?, error = ? WHERE id = ?",
        )
        .bind(task.status.as_str())
        .bind(task.start)
        .bind(task.end)
        .bind(&task.error)
        .bind(&task.id)
        .execute(&*self.db)
        .await?;
        Ok(())
    }

    async fn list_by_status(&self, status: TaskStatus) -> RepositoryResult<Vec<ReplicationTask>> {
        let rows = sqlx::query_as::<_, TaskRow>(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE status = ? ORDER BY created_at ASC, rowid ASC"
        ))
        .bind(status.as_str())
        .fetch_all(&*self.db)
        .await?;
        rows.into_iter().map(ReplicationTask::try_from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    async fn repo() -> SqliteRepository {
        let pool = db::connect("sqlite::memory:", 1).await.unwrap();
        db::run_migrations(&pool).await.unwrap();
        SqliteRepository::new(Arc::new(pool))
    }

    #[tokio::test]
    async fn upload_round_trips_with_parts_and_metadata() {
        let repo = repo().await;
        let mut metadata = HashMap::new();
        metadata.insert("filename".to_string(), "movie.mkv".to_string());
        let mut upload = Upload::new("mp-1", "obj-1", 10, StorageRef::new("1", "media"), metadata);
        UploadRepository::add(&repo, &upload).await.unwrap();

        upload.apply_part("etag-1".into(), 4);
        UploadRepository::update(&repo, &upload).await.unwrap();

        let stored = repo.get_by_object_id("obj-1").await.unwrap().unwrap();
        assert_eq!(stored.id, "mp-1");
        assert_eq!(stored.offset, 4);
        assert_eq!(stored.parts, upload.parts);
        assert_eq!(stored.metadata.get("filename").map(String::as_str), Some("movie.mkv"));
        assert_eq!(stored.status, UploadStatus::Active);
        assert!(repo.get_by_object_id("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn accounts_list_in_registration_order() {
        let repo = repo().await;
        let first = ServiceAccount::new("1", "ru-central1", "key-a", "secret");
        let second = ServiceAccount::new("1", "ru-central1", "key-b", "secret");
        let other = ServiceAccount::new("2", "ru-1", "key-c", "secret");
        for account in [&first, &second, &other] {
            AccountRepository::add(&repo, account).await.unwrap();
        }

        let listed = repo.list_by_provider("1").await.unwrap();
        let keys: Vec<&str> = listed.iter().map(|a| a.access_key.as_str()).collect();
        assert_eq!(keys, vec!["key-a", "key-b"]);
        assert_eq!(AccountRepository::list(&repo).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn tasks_filter_by_status() {
        let repo = repo().await;
        let mut done = ReplicationTask::new("obj", 0, StorageRef::new("1", "a"), StorageRef::new("2", "b"));
        let pending = ReplicationTask::new("obj", 0, StorageRef::new("1", "a"), StorageRef::new("2", "b"));
        TaskRepository::add(&repo, &done).await.unwrap();
        TaskRepository::add(&repo, &pending).await.unwrap();

        done.status = TaskStatus::Completed;
        done.start = Some(Utc::now());
        done.end = Some(Utc::now());
        TaskRepository::update(&repo, &done).await.unwrap();

        let created = TaskRepository::list_by_status(&repo, TaskStatus::Created)
            .await
            .unwrap();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].id, pending.id);

        let stored = TaskRepository::get_by_id(&repo, &done.id).await.unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Completed);
        assert!(stored.start.is_some() && stored.end.is_some());
    }
}
