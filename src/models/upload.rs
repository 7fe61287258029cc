//! Resumable upload sessions and the parts written for them.

use super::storage::StorageRef;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Lifecycle of an upload. `Active` is the only non-terminal state.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum UploadStatus {
    Active,
    Complete,
    Expired,
    Failed,
}

impl UploadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadStatus::Active => "active",
            UploadStatus::Complete => "complete",
            UploadStatus::Expired => "expired",
            UploadStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, UploadStatus::Active)
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UploadStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(UploadStatus::Active),
            "complete" => Ok(UploadStatus::Complete),
            "expired" => Ok(UploadStatus::Expired),
            "failed" => Ok(UploadStatus::Failed),
            other => Err(format!("unknown upload status `{other}`")),
        }
    }
}

/// A part accepted by the backend for a multipart upload.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct UploadPart {
    /// Opaque part tag (ETag) returned by the backend.
    pub tag: String,

    /// Part number (1-based, contiguous).
    pub position: u32,
}

/// A resumable upload session.
///
/// The client-facing handle is `object_id`; `id` is the backend's multipart
/// upload id and never leaves the gateway.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct Upload {
    /// Backend multipart upload id.
    #[serde(skip_serializing)]
    pub id: String,

    /// Generated object identifier (also the object key on the backend).
    pub object_id: String,

    /// Declared total size in bytes.
    pub size: u64,

    /// Bytes acknowledged so far. Always `<= size`.
    pub offset: u64,

    /// Where the object is being assembled.
    pub storage: StorageRef,

    /// Parts in ascending position order.
    pub parts: Vec<UploadPart>,

    pub status: UploadStatus,

    /// Decoded `Upload-Metadata` pairs.
    pub metadata: HashMap<String, String>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,
}

impl Upload {
    pub fn new(
        id: impl Into<String>,
        object_id: impl Into<String>,
        size: u64,
        storage: StorageRef,
        metadata: HashMap<String, String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            object_id: object_id.into(),
            size,
            offset: 0,
            storage,
            parts: Vec::new(),
            status: UploadStatus::Active,
            metadata,
            created_at: now,
            updated_at: now,
        }
    }

    /// Position the next chunk will be written at.
    pub fn next_position(&self) -> u32 {
        self.parts.len() as u32 + 1
    }

    /// Record a part accepted by the backend and advance the offset.
    pub fn apply_part(&mut self, tag: String, len: u64) {
        let position = self.next_position();
        self.parts.push(UploadPart { tag, position });
        self.offset += len;
        self.updated_at = Utc::now();
    }

    pub fn is_finished(&self) -> bool {
        self.offset == self.size
    }

    pub fn set_status(&mut self, status: UploadStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }
}
