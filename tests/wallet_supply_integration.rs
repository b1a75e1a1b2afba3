mod common;

use common::{FakeWalletApi, settle};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::time::timeout;
use walletfeed::supply::{Lce, StatusSource, SupplyConfig, SupplyError};
use walletfeed::wallet::{
    CurrencyId, MultiQuoteParams, NetworkStatusParams, NetworkStatusValue, QuoteParams, QuoteStatus, UserWalletId,
    WalletApi, WalletSuppliers, YieldsParams,
};

fn suppliers(api: &Arc<FakeWalletApi>) -> WalletSuppliers {
    let api: Arc<dyn WalletApi> = Arc::clone(api) as Arc<dyn WalletApi>;
    WalletSuppliers::new(api, &SupplyConfig::default())
}

#[tokio::test]
async fn test_concurrent_invokes_share_one_fetch() {
    let api = Arc::new(FakeWalletApi::new().with_latency(Duration::from_millis(100)));
    let suppliers = suppliers(&api);

    let mut handles = Vec::new();
    for _ in 0..20 {
        let quotes = suppliers.quotes.clone();
        handles.push(tokio::spawn(async move { quotes.invoke(QuoteParams::new("bitcoin", "usd")).await }));
    }

    let mut streams = Vec::new();
    for handle in handles {
        streams.push(handle.await.unwrap().unwrap());
    }

    // Every caller observes the same producer
    assert!(streams.iter().all(|stream| stream.is_same_stream(&streams[0])));
    let item = settle(&mut streams[0]).await;
    assert_eq!(item.content().map(|s| s.source), Some(StatusSource::Actual));

    assert_eq!(FakeWalletApi::calls(&api.quote_calls), 1);
    assert_eq!(suppliers.quotes.store().len().await, 1);
}

#[tokio::test]
async fn test_same_key_reuses_stream_without_fetching() {
    let api = Arc::new(FakeWalletApi::new());
    let suppliers = suppliers(&api);

    let mut first = suppliers.quotes.invoke(QuoteParams::new("bitcoin", "usd")).await.unwrap();
    settle(&mut first).await;

    // fiat is not part of the key, so this maps onto the same stream
    let second = suppliers.quotes.invoke(QuoteParams::new("bitcoin", "eur")).await.unwrap();
    assert!(second.is_same_stream(&first));
    assert_eq!(second.value(), first.value());
    assert_eq!(FakeWalletApi::calls(&api.quote_calls), 1);

    let producer = suppliers.quotes.store().get(first.key()).await.unwrap();
    assert_eq!(producer.params().fiat, "usd");
}

#[tokio::test]
async fn test_new_key_adds_one_producer() {
    let api = Arc::new(FakeWalletApi::new());
    let suppliers = suppliers(&api);

    suppliers.quotes.invoke(QuoteParams::new("bitcoin", "usd")).await.unwrap();
    assert_eq!(suppliers.quotes.store().len().await, 1);

    let mut tron = suppliers.quotes.invoke(QuoteParams::new("tron", "usd")).await.unwrap();
    assert_eq!(suppliers.quotes.store().len().await, 2);

    let item = settle(&mut tron).await;
    match item.content().map(|s| &s.value) {
        Some(QuoteStatus::Data(quote)) => assert_eq!(quote.currency_id, CurrencyId::new("tron")),
        other => panic!("expected a tron quote, got {other:?}"),
    }
}

#[tokio::test]
async fn test_failed_first_fetch_falls_back_to_empty_quote() {
    let api = Arc::new(FakeWalletApi::new());
    api.fail_quotes.store(true, Ordering::SeqCst);
    let suppliers = suppliers(&api);

    let mut stream = suppliers.quotes.invoke(QuoteParams::new("bitcoin", "usd")).await.unwrap();
    let item = settle(&mut stream).await;

    let supplied = item.content().unwrap();
    assert_eq!(supplied.source, StatusSource::Fallback);
    assert_eq!(supplied.value, QuoteStatus::empty(CurrencyId::new("bitcoin")));

    let producer = suppliers.quotes.store().get(stream.key()).await.unwrap();
    assert!(matches!(producer.last_error(), Some(SupplyError::Transport(_))));
}

#[tokio::test]
async fn test_empty_fiat_is_rejected_before_calling_the_backend() {
    let api = Arc::new(FakeWalletApi::new());
    let suppliers = suppliers(&api);

    let mut stream = suppliers.quotes.invoke(QuoteParams::new("bitcoin", "  ")).await.unwrap();
    let item = settle(&mut stream).await;

    assert_eq!(item.content().map(|s| s.source), Some(StatusSource::Fallback));
    let producer = suppliers.quotes.store().get(stream.key()).await.unwrap();
    assert!(matches!(producer.last_error(), Some(SupplyError::InvalidArguments(_))));
    assert_eq!(FakeWalletApi::calls(&api.quote_calls), 0);
}

#[tokio::test]
async fn test_multi_quote_without_currencies_skips_the_backend() {
    let api = Arc::new(FakeWalletApi::new());
    let suppliers = suppliers(&api);

    let no_ids: [&str; 0] = [];
    let mut stream = suppliers
        .multi_quotes
        .invoke(MultiQuoteParams::new(no_ids, "usd"))
        .await
        .unwrap();
    let item = settle(&mut stream).await;

    assert_eq!(item.content().map(|s| s.value.len()), Some(0));
    assert_eq!(FakeWalletApi::calls(&api.quote_calls), 0);
}

#[tokio::test]
async fn test_refresh_failure_keeps_last_good_quote() {
    let api = Arc::new(FakeWalletApi::new());
    let suppliers = suppliers(&api);

    let mut stream = suppliers.quotes.invoke(QuoteParams::new("bitcoin", "usd")).await.unwrap();
    let before = settle(&mut stream).await;

    api.fail_quotes.store(true, Ordering::SeqCst);
    let result = timeout(Duration::from_secs(1), suppliers.quotes.refresh(stream.key()))
        .await
        .unwrap();
    assert!(matches!(result, Err(SupplyError::Transport(_))));

    // Subscribers still see the value they had
    assert_eq!(stream.current(), before);
    assert_eq!(suppliers.quotes.store().stats().await.error_entries, 1);

    api.fail_quotes.store(false, Ordering::SeqCst);
    suppliers.quotes.refresh(stream.key()).await.unwrap();
    assert_ne!(stream.value(), before.content().map(|s| s.value.clone()));
    assert_eq!(FakeWalletApi::calls(&api.quote_calls), 3);
}

#[tokio::test]
async fn test_new_producer_is_seeded_from_persisted_quote() {
    let api = Arc::new(FakeWalletApi::new().with_latency(Duration::from_millis(200)));
    let suppliers = suppliers(&api);
    let params = QuoteParams::new("bitcoin", "usd");

    let mut stream = suppliers.quotes.invoke(params.clone()).await.unwrap();
    let fetched = settle(&mut stream).await;
    assert_eq!(suppliers.persisted_quotes().len(), 1);

    assert!(suppliers.quotes.remove(stream.key()).await);
    let mut replacement = suppliers.quotes.invoke(params).await.unwrap();
    assert!(!replacement.is_same_stream(&stream));

    // The persisted value arrives before the new fetch completes
    let seeded = settle(&mut replacement).await;
    let supplied = seeded.content().unwrap();
    assert_eq!(supplied.source, StatusSource::Cache);
    assert_eq!(Some(&supplied.value), fetched.content().map(|s| &s.value));

    let actual = timeout(Duration::from_secs(2), replacement.changed()).await.unwrap().unwrap();
    assert_eq!(actual.content().map(|s| s.source), Some(StatusSource::Actual));
}

#[tokio::test]
async fn test_network_status_error_then_recovery() {
    let api = Arc::new(FakeWalletApi::new());
    api.fail_next_networks.store(1, Ordering::SeqCst);
    let suppliers = suppliers(&api);

    let mut stream = suppliers
        .network_statuses
        .invoke(NetworkStatusParams::new("w1", "ethereum"))
        .await
        .unwrap();

    // No fallback: the failure itself is the item
    let item = settle(&mut stream).await;
    assert!(matches!(item, Lce::Error(SupplyError::Transport(_))));

    suppliers.network_statuses.refresh(stream.key()).await.unwrap();
    let status = stream.value().unwrap();
    assert!(matches!(status.value, NetworkStatusValue::Verified { .. }));
    assert_eq!(FakeWalletApi::calls(&api.network_calls), 2);
}

#[tokio::test]
async fn test_wallet_without_enabled_yields_gets_empty_list() {
    let api = Arc::new(FakeWalletApi::new());
    api.yields_enabled.store(false, Ordering::SeqCst);
    let suppliers = suppliers(&api);

    let mut stream = suppliers.yields.invoke(YieldsParams::new("w1")).await.unwrap();
    let item = settle(&mut stream).await;

    let supplied = item.content().unwrap();
    assert_eq!(supplied.source, StatusSource::Fallback);
    assert!(supplied.value.is_empty());

    let producer = suppliers.yields.store().get(stream.key()).await.unwrap();
    assert_eq!(
        producer.last_error(),
        Some(SupplyError::EmptyUpstream("no enabled yields".to_string()))
    );
}

#[tokio::test]
async fn test_remove_wallet_releases_only_its_streams() {
    let api = Arc::new(FakeWalletApi::new());
    let suppliers = suppliers(&api);

    let params = [
        NetworkStatusParams::new("w1", "ethereum"),
        NetworkStatusParams::new("w1", "bitcoin"),
        NetworkStatusParams::new("w2", "ethereum"),
    ];
    suppliers.network_statuses.invoke_many(params).await.unwrap();
    suppliers.yields.invoke(YieldsParams::new("w1")).await.unwrap();

    let removed = suppliers.remove_wallet(&UserWalletId::new("w1")).await;

    assert_eq!(removed, 3);
    assert_eq!(
        suppliers.network_statuses.store().keys().await,
        vec![NetworkStatusParams::new("w2", "ethereum").key()]
    );
    assert!(suppliers.yields.store().is_empty().await);
}

#[tokio::test]
async fn test_remove_wallet_keeps_wallets_sharing_a_prefix() {
    let api = Arc::new(FakeWalletApi::new());
    let suppliers = suppliers(&api);

    let backup = NetworkStatusParams::new("w1_backup", "ethereum");
    suppliers
        .network_statuses
        .invoke_many([NetworkStatusParams::new("w1", "ethereum"), backup.clone()])
        .await
        .unwrap();
    let mut backup_stream = suppliers.network_statuses.subscribe(&backup.key()).await.unwrap();

    let removed = suppliers.remove_wallet(&UserWalletId::new("w1")).await;

    assert_eq!(removed, 1);
    assert_eq!(suppliers.network_statuses.store().keys().await, vec![backup.key()]);
    assert!(matches!(settle(&mut backup_stream).await, Lce::Content(_)));
}

#[tokio::test]
async fn test_shutdown_rejects_new_invokes() {
    let api = Arc::new(FakeWalletApi::new());
    let suppliers = suppliers(&api);

    suppliers.shutdown().await;
    let result = suppliers.quotes.invoke(QuoteParams::new("bitcoin", "usd")).await;
    assert!(matches!(result, Err(SupplyError::Cancelled)));
}
