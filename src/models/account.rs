//! Provider catalog entries and the service accounts scoped to them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Static catalog entry describing where a backend lives.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Provider {
    /// Catalog id (referenced by storage references and accounts).
    pub id: String,

    /// Provider kind; selects the backend factory (e.g. "yandex").
    pub name: String,

    /// Base endpoint URL of the provider's object API.
    pub endpoint: String,
}

/// One set of credentials scoped to exactly one provider.
///
/// Accounts are immutable after registration.
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ServiceAccount {
    pub id: String,

    /// Catalog id of the provider these credentials belong to.
    pub provider_id: String,

    /// Region passed to the provider's API.
    pub region: String,

    pub access_key: String,

    #[serde(skip_serializing)]
    pub secret: String,

    pub created_at: DateTime<Utc>,
}

impl ServiceAccount {
    pub fn new(
        provider_id: impl Into<String>,
        region: impl Into<String>,
        access_key: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        Self {
            id: super::new_id(),
            provider_id: provider_id.into(),
            region: region.into(),
            access_key: access_key.into(),
            secret: secret.into(),
            created_at: Utc::now(),
        }
    }
}
