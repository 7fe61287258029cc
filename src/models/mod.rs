//! Core data models for the upload and replication gateway.
//!
//! These entities describe resumable uploads, credentialed accounts on
//! cloud providers, and replication tasks. They serialize naturally as JSON
//! via `serde`; persistence mapping lives in `crate::repositories`.

pub mod account;
pub mod bucket;
pub mod object;
pub mod storage;
pub mod task;
pub mod upload;

use uuid::Uuid;

/// Length of an identifier rendered as lowercase hex.
pub const ID_LEN: usize = 32;

/// Generate an opaque 128-bit random identifier rendered as 32 hex chars.
pub fn new_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Return true if `id` looks like an identifier produced by [`new_id`].
pub fn is_valid_id(id: &str) -> bool {
    id.len() == ID_LEN && id.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}
