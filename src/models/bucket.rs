//! Represents a bucket discovered on a backend.

use serde::{Deserialize, Serialize};

/// A bucket as reported by a backend listing.
///
/// Buckets are discovered dynamically and are never persisted by the gateway.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Bucket {
    /// Backend-scoped identifier (the name for S3-compatible providers).
    pub id: String,

    /// Bucket name (must conform to the provider's naming rules).
    pub name: String,

    /// Catalog id of the provider that owns this bucket.
    pub provider_id: String,
}

impl Bucket {
    pub fn new(name: impl Into<String>, provider_id: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            id: name.clone(),
            name,
            provider_id: provider_id.into(),
        }
    }
}
