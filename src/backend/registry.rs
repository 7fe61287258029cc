//! Provider-name → backend factory table.

use super::BackendFactory;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::RwLock;
use tracing::info;

/// Registry of backend constructors keyed by provider name.
///
/// Read-mostly; factories may be registered or removed while requests are in
/// flight. Lookups hand out a cloned `Arc` so the lock is never held across
/// a backend call.
#[derive(Default)]
pub struct BackendRegistry {
    factories: RwLock<HashMap<String, Arc<dyn BackendFactory>>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `factory` for `name`. Returns false if the name is taken.
    pub async fn register(&self, name: impl Into<String>, factory: Arc<dyn BackendFactory>) -> bool {
        let name = name.into();
        let mut factories = self.factories.write().await;
        if factories.contains_key(&name) {
            return false;
        }
        info!("registered backend factory for provider kind `{}`", name);
        factories.insert(name, factory);
        true
    }

    /// Remove the factory for `name`. Returns false if none was registered.
    pub async fn deregister(&self, name: &str) -> bool {
        let removed = self.factories.write().await.remove(name).is_some();
        if removed {
            info!("deregistered backend factory for provider kind `{}`", name);
        }
        removed
    }

    pub async fn get(&self, name: &str) -> Option<Arc<dyn BackendFactory>> {
        self.factories.read().await.get(name).cloned()
    }

    /// Names of every registered provider kind, sorted.
    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.factories.read().await.keys().cloned().collect();
        names.sort();
        names
    }
}
