//! Replication tasks tracked to a terminal status.

use super::storage::StorageRef;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Created,
    Completed,
    Failed,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Created => "created",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(TaskStatus::Created),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            other => Err(format!("unknown task status `{other}`")),
        }
    }
}

/// A durable request to copy one object between two storage references.
///
/// Written once as `Created`, then updated exactly once to a terminal status.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ReplicationTask {
    pub id: String,

    /// Object to copy; the replica is written under the same id.
    pub object_id: String,

    /// Submitted priority. Recorded only; dispatch is FIFO.
    pub priority: i32,

    pub source_storage: StorageRef,

    pub target_storage: StorageRef,

    pub status: TaskStatus,

    /// When a worker started the copy.
    pub start: Option<DateTime<Utc>>,

    /// When the copy finished or failed.
    pub end: Option<DateTime<Utc>>,

    /// Failure reason for `Failed` tasks.
    pub error: Option<String>,

    pub created_at: DateTime<Utc>,
}

impl ReplicationTask {
    pub fn new(
        object_id: impl Into<String>,
        priority: i32,
        source_storage: StorageRef,
        target_storage: StorageRef,
    ) -> Self {
        Self {
            id: super::new_id(),
            object_id: object_id.into(),
            priority,
            source_storage,
            target_storage,
            status: TaskStatus::Created,
            start: None,
            end: None,
            error: None,
            created_at: Utc::now(),
        }
    }

    /// The work unit handed to the dispatch queue for this task.
    pub fn request(&self) -> ReplicationRequest {
        ReplicationRequest {
            task_id: self.id.clone(),
            object_id: self.object_id.clone(),
            source: self.source_storage.clone(),
            target: self.target_storage.clone(),
        }
    }
}

/// Queue entry consumed by the task dispatch workers.
#[derive(Clone, Debug)]
pub struct ReplicationRequest {
    pub task_id: String,
    pub object_id: String,
    pub source: StorageRef,
    pub target: StorageRef,
}
