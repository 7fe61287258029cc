mod common;

use common::{TIMEWEB, YANDEX, harness};
use object_gateway::{
    backend::memory::MemoryBackend,
    models::storage::StorageRef,
    services::ServiceError,
};
use std::{collections::HashMap, sync::Arc};
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn provider_without_accounts_is_never_probed() {
    let h = harness().await;
    let other = h.backend_with_bucket(TIMEWEB, "media").await;

    let err = h
        .state
        .accounts
        .resolve_storage(&StorageRef::new(YANDEX, "media"), &CancellationToken::new())
        .await
        .err()
        .unwrap();
    assert!(matches!(err, ServiceError::NoAvailableAccounts(p) if p == YANDEX));
    assert_eq!(h.factory.connects(), 0);
    assert_eq!(other.counts().total(), 0);
}

#[tokio::test]
async fn first_account_with_the_bucket_wins() {
    let h = harness().await;
    let without = Arc::new(MemoryBackend::new(YANDEX).with_bucket("other"));
    let with = Arc::new(MemoryBackend::new(YANDEX).with_bucket("media"));
    let later = Arc::new(MemoryBackend::new(YANDEX).with_bucket("media"));
    h.add_account(YANDEX, without.clone()).await;
    h.add_account(YANDEX, with.clone()).await;
    h.add_account(YANDEX, later.clone()).await;

    h.state
        .accounts
        .resolve_storage(&StorageRef::new(YANDEX, "media"), &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(without.counts().bucket_exists, 1);
    assert_eq!(with.counts().bucket_exists, 1);
    assert_eq!(later.counts().bucket_exists, 0);
}

#[tokio::test]
async fn unreachable_accounts_yield_no_available_buckets() {
    let h = harness().await;
    let backend = h.backend_with_bucket(YANDEX, "media").await;
    backend.set_unavailable(true);

    let err = h
        .state
        .accounts
        .resolve_storage(&StorageRef::new(YANDEX, "media"), &CancellationToken::new())
        .await
        .err()
        .unwrap();
    assert!(matches!(err, ServiceError::NoAvailableBuckets));
}

#[tokio::test]
async fn upload_without_any_bucket_fails() {
    let h = harness().await;
    h.add_account(YANDEX, Arc::new(MemoryBackend::new(YANDEX)))
        .await;

    let err = h
        .state
        .uploads
        .create_upload(5, HashMap::new(), &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, ServiceError::NoAvailableBuckets));
}

#[tokio::test]
async fn accounts_are_listed_per_provider() {
    let h = harness().await;
    let id = h.add_account(TIMEWEB, Arc::new(MemoryBackend::new(TIMEWEB))).await;

    let accounts = h
        .state
        .accounts
        .list_accounts_by_provider(TIMEWEB)
        .await
        .unwrap();
    assert_eq!(accounts.len(), 1);
    assert_eq!(accounts[0].id, id);
    assert_eq!(h.state.accounts.get_account(&id).await.unwrap().region, "ru-central1");
    assert!(matches!(
        h.state.accounts.list_accounts_by_provider(YANDEX).await,
        Err(ServiceError::NoAvailableAccounts(_))
    ));
    assert!(matches!(
        h.state.accounts.get_account("missing").await,
        Err(ServiceError::AccountNotFound(_))
    ));
}
