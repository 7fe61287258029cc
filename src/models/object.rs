//! Represents an object (blob) stored in a backend bucket.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Object metadata returned by a backend head request.
///
/// The struct describes the object, not its content bytes.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ObjectInfo {
    /// Object key; the gateway always uses the generated object id.
    pub id: String,

    /// Bucket holding the object.
    pub bucket: String,

    /// Size in bytes.
    pub size: u64,

    /// User metadata attached at upload time.
    pub metadata: HashMap<String, String>,
}

/// Identity of a replica produced by a replication.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ReplicatedObject {
    pub id: String,
    pub bucket: String,
}
