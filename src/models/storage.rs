//! Logical pointer to a bucket on a provider.

use serde::{Deserialize, Serialize};

/// A storage reference: `{provider, bucket}`.
///
/// References are resolved to a live backend handle through account
/// selection; they never carry credentials themselves.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq, Hash)]
pub struct StorageRef {
    /// Catalog id of the provider hosting the bucket.
    pub provider_id: String,

    /// Bucket name on that provider.
    pub bucket: String,
}

impl StorageRef {
    pub fn new(provider_id: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
            bucket: bucket.into(),
        }
    }
}

impl std::fmt::Display for StorageRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.provider_id, self.bucket)
    }
}
