//! Account & storage selection.
//!
//! Resolves a logical storage reference `{provider, bucket}` to a live
//! backend handle by trying the provider's accounts in registration order.
//! There is no load balancing: the first account whose bucket probe succeeds
//! wins.

use super::errors::{ServiceError, ServiceResult};
use crate::{
    backend::{BackendError, BackendFactory, BackendRegistry, ObjectStorageBackend},
    models::{
        account::{Provider, ServiceAccount},
        storage::StorageRef,
    },
    repositories::{AccountRepository, ProviderRepository},
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Clone)]
pub struct AccountService {
    accounts: Arc<dyn AccountRepository>,
    providers: Arc<dyn ProviderRepository>,
    registry: Arc<BackendRegistry>,
}

impl AccountService {
    pub fn new(
        accounts: Arc<dyn AccountRepository>,
        providers: Arc<dyn ProviderRepository>,
        registry: Arc<BackendRegistry>,
    ) -> Self {
        Self {
            accounts,
            providers,
            registry,
        }
    }

    /// Register credentials for a catalog provider.
    pub async fn add_account(
        &self,
        provider_id: &str,
        region: &str,
        access_key: &str,
        secret: &str,
    ) -> ServiceResult<ServiceAccount> {
        if self.providers.get_by_id(provider_id).await?.is_none() {
            return Err(ServiceError::ProviderNotFound(provider_id.to_string()));
        }

        let account = ServiceAccount::new(provider_id, region, access_key, secret);
        self.accounts.add(&account).await?;
        info!(
            "registered account {} for provider {}",
            account.id, account.provider_id
        );
        Ok(account)
    }

    pub async fn get_account(&self, id: &str) -> ServiceResult<ServiceAccount> {
        self.accounts
            .get_by_id(id)
            .await?
            .ok_or_else(|| ServiceError::AccountNotFound(id.to_string()))
    }

    /// Accounts of `provider_id` in registration order; never empty.
    pub async fn list_accounts_by_provider(
        &self,
        provider_id: &str,
    ) -> ServiceResult<Vec<ServiceAccount>> {
        let accounts = self.accounts.list_by_provider(provider_id).await?;
        if accounts.is_empty() {
            return Err(ServiceError::NoAvailableAccounts(provider_id.to_string()));
        }
        Ok(accounts)
    }

    pub async fn list_providers(&self) -> ServiceResult<Vec<Provider>> {
        Ok(self.providers.list().await?)
    }

    pub async fn register_backend(
        &self,
        kind: &str,
        factory: Arc<dyn BackendFactory>,
    ) -> ServiceResult<()> {
        if !self.registry.register(kind, factory).await {
            return Err(ServiceError::ProviderKindExists(kind.to_string()));
        }
        Ok(())
    }

    pub async fn deregister_backend(&self, kind: &str) -> ServiceResult<()> {
        if !self.registry.deregister(kind).await {
            return Err(ServiceError::UnknownProviderKind(kind.to_string()));
        }
        Ok(())
    }

    async fn provider(&self, provider_id: &str) -> ServiceResult<Provider> {
        self.providers
            .get_by_id(provider_id)
            .await?
            .ok_or_else(|| ServiceError::ProviderNotFound(provider_id.to_string()))
    }

    async fn factory(&self, provider: &Provider) -> ServiceResult<Arc<dyn BackendFactory>> {
        self.registry
            .get(&provider.name)
            .await
            .ok_or_else(|| ServiceError::UnknownProviderKind(provider.name.clone()))
    }

    /// Find a backend handle that can serve `storage`.
    ///
    /// Fails with `NoAvailableAccounts` before any backend is contacted when
    /// the provider has no accounts. When every probe answers that the bucket
    /// is missing the result is `BucketNotFound`; when no probe could be
    /// completed at all it is `NoAvailableBuckets`.
    pub async fn resolve_storage(
        &self,
        storage: &StorageRef,
        cancel: &CancellationToken,
    ) -> ServiceResult<Arc<dyn ObjectStorageBackend>> {
        let accounts = self.list_accounts_by_provider(&storage.provider_id).await?;
        let provider = self.provider(&storage.provider_id).await?;
        let factory = self.factory(&provider).await?;

        let mut answered = false;
        for account in &accounts {
            let backend = match factory.connect(&provider, account).await {
                Ok(backend) => backend,
                Err(err) => {
                    warn!("account {}: failed to build backend: {}", account.id, err);
                    continue;
                }
            };

            match backend.bucket_exists(&storage.bucket, cancel).await {
                Ok(true) => {
                    debug!("resolved {} through account {}", storage, account.id);
                    return Ok(backend);
                }
                Ok(false) => {
                    answered = true;
                    debug!("account {} has no bucket {}", account.id, storage.bucket);
                }
                Err(BackendError::Cancelled) => return Err(BackendError::Cancelled.into()),
                Err(err) => warn!("account {}: bucket probe failed: {}", account.id, err),
            }
        }

        if answered {
            Err(ServiceError::BucketNotFound(storage.bucket.clone()))
        } else {
            Err(ServiceError::NoAvailableBuckets)
        }
    }

    /// Pick where a new upload goes: the first bucket listed by the first
    /// reachable account, providers in catalog order.
    pub async fn choose_upload_destination(
        &self,
        cancel: &CancellationToken,
    ) -> ServiceResult<(StorageRef, Arc<dyn ObjectStorageBackend>)> {
        for provider in self.providers.list().await? {
            let accounts = self.accounts.list_by_provider(&provider.id).await?;
            if accounts.is_empty() {
                continue;
            }
            let Some(factory) = self.registry.get(&provider.name).await else {
                debug!("provider {} has no registered backend", provider.name);
                continue;
            };

            for account in &accounts {
                let backend = match factory.connect(&provider, account).await {
                    Ok(backend) => backend,
                    Err(err) => {
                        warn!("account {}: failed to build backend: {}", account.id, err);
                        continue;
                    }
                };

                match backend.list_buckets(cancel).await {
                    Ok(buckets) => {
                        if let Some(bucket) = buckets.into_iter().next() {
                            info!(
                                "chose bucket {} on provider {} for new upload",
                                bucket.name, provider.id
                            );
                            return Ok((StorageRef::new(provider.id.clone(), bucket.name), backend));
                        }
                        debug!("account {} lists no buckets", account.id);
                    }
                    Err(BackendError::Cancelled) => return Err(BackendError::Cancelled.into()),
                    Err(err) => warn!("account {}: failed to list buckets: {}", account.id, err),
                }
            }
        }

        Err(ServiceError::NoAvailableBuckets)
    }
}
