//! Transaction isolation and commit visibility.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use keel_core::{to_properties, Key};
use keel_storage::StoreOps;
use keel_test_utils::*;

#[tokio::test]
async fn transaction_reads_store_value_behind_warm_cache() {
    let h = TestHarness::new();
    let mut e = HasId::new(1, "cached");
    let key = h.keel.put(&mut e).await.unwrap();

    let fresh = to_properties(&HasId::new(1, "changed in store")).unwrap();
    h.store.put_multi(vec![(key, fresh)]).await.unwrap();

    let mut outside = HasId::new(1, "");
    h.keel.get(&mut outside).await.unwrap();
    assert_eq!(outside.name, "cached");

    let inside = h
        .keel
        .run_in_transaction(TransactionOptions::default(), |tx| async move {
            let mut e = HasId::new(1, "");
            tx.get(&mut e).await?;
            Ok(e.name)
        })
        .await
        .unwrap();
    assert_eq!(inside, "changed in store");
}

#[tokio::test]
async fn transactional_writes_reach_caches_only_after_commit() {
    let h = TestHarness::new();
    let probe = h.keel.clone();
    let store = h.store.clone();

    h.keel
        .run_in_transaction(TransactionOptions::default(), move |tx| {
            let probe = probe.clone();
            let store = store.clone();
            async move {
                let key = tx.put(&mut HasId::new(5, "pending")).await?;
                assert!(!probe.local_cache().contains(&key.encode()));
                assert!(!store.contains(&key)?);

                // Reads inside the transaction see its own writes.
                let mut own = HasId::new(5, "");
                tx.get(&mut own).await?;
                assert_eq!(own.name, "pending");
                Ok(())
            }
        })
        .await
        .unwrap();

    let key = Key::with_int("HasId", 5);
    assert!(h.store.contains(&key).unwrap());
    assert!(h.keel.local_cache().contains(&key.encode()));

    let before = h.store.stats().get_calls;
    let mut e = HasId::new(5, "");
    h.keel.get(&mut e).await.unwrap();
    assert_eq!(e.name, "pending");
    assert_eq!(h.store.stats().get_calls, before);
}

#[tokio::test]
async fn failed_transaction_leaves_every_tier_unchanged() {
    let h = TestHarness::new();
    let mut e = HasId::new(2, "original");
    let key = h.keel.put(&mut e).await.unwrap();

    let result: KeelResult<()> = h
        .keel
        .run_in_transaction(TransactionOptions::default(), |tx| async move {
            tx.put(&mut HasId::new(2, "overwritten")).await?;
            tx.delete(&Key::with_int("HasId", 2)).await?;
            let mut deleted = HasId::new(2, "");
            tx.get(&mut deleted).await?;
            Ok(())
        })
        .await;
    assert!(result.unwrap_err().is_not_found());

    assert_eq!(
        h.keel.local_cache().get::<HasId>(&key.encode()).map(|e| e.name),
        Some("original".to_string())
    );
    assert!(h.remote.contains(&h.keel.remote_cache().cache_key(&key)));
    h.keel.flush_local_cache();
    let mut read = HasId::new(2, "");
    h.keel.get(&mut read).await.unwrap();
    assert_eq!(read.name, "original");
}

#[tokio::test]
async fn conflicting_commit_is_retried_with_fresh_reads() {
    let h = TestHarness::new();
    h.keel.put(&mut HasId::new(1, "0")).await.unwrap();

    let runs = Arc::new(AtomicU32::new(0));
    let store = h.store.clone();
    let counter = Arc::clone(&runs);
    h.keel
        .run_in_transaction(TransactionOptions::default(), move |tx| {
            let first = counter.fetch_add(1, Ordering::SeqCst) == 0;
            let store = store.clone();
            async move {
                let mut e = HasId::new(1, "");
                tx.get(&mut e).await?;
                if first {
                    let concurrent = to_properties(&HasId::new(1, "10")).unwrap();
                    store
                        .put_multi(vec![(Key::with_int("HasId", 1), concurrent)])
                        .await?;
                }
                let n: i64 = e.name.parse().unwrap();
                e.name = (n + 1).to_string();
                tx.put(&mut e).await?;
                Ok(())
            }
        })
        .await
        .unwrap();

    assert_eq!(runs.load(Ordering::SeqCst), 2);
    let mut e = HasId::new(1, "");
    h.keel.get(&mut e).await.unwrap();
    assert_eq!(e.name, "11");
}

#[tokio::test]
async fn single_group_transaction_rejects_second_entity_group() {
    let h = TestHarness::new();
    let result: KeelResult<()> = h
        .keel
        .run_in_transaction(TransactionOptions::default(), |tx| async move {
            tx.put(&mut HasId::new(1, "a")).await?;
            tx.put(&mut HasId::new(2, "b")).await?;
            Ok(())
        })
        .await;
    assert!(matches!(
        result.unwrap_err(),
        KeelError::Store(StoreError::CrossGroup { .. })
    ));

    h.keel
        .run_in_transaction(
            TransactionOptions::default().with_cross_group(true),
            |tx| async move {
                let mut batch = vec![HasId::new(1, "a"), HasId::new(2, "b")];
                tx.put_multi(&mut batch).await?;
                Ok(())
            },
        )
        .await
        .unwrap();
    assert_eq!(h.store.len().unwrap(), 2);
}

#[tokio::test]
async fn read_only_transaction_refuses_writes() {
    let h = TestHarness::new();
    let result: KeelResult<()> = h
        .keel
        .run_in_transaction(
            TransactionOptions::default().with_read_only(true),
            |tx| async move {
                tx.put(&mut HasId::new(1, "a")).await?;
                Ok(())
            },
        )
        .await;
    assert!(matches!(
        result.unwrap_err(),
        KeelError::Store(StoreError::ReadOnly)
    ));
    assert!(h.store.is_empty().unwrap());
}

#[tokio::test]
async fn nested_transaction_depends_on_store_support() {
    let h = TestHarness::new();
    let err = h
        .keel
        .run_in_transaction(TransactionOptions::default(), |tx| async move {
            tx.run_in_transaction(TransactionOptions::default(), |_| async { Ok(()) })
                .await
        })
        .await
        .unwrap_err();
    assert_eq!(err, KeelError::NestedTransaction);

    let h = TestHarness::with_store(MemoryStore::new().with_nested_transactions(true));
    h.keel
        .run_in_transaction(TransactionOptions::default(), |tx| async move {
            tx.put(&mut HasId::new(1, "outer")).await?;
            tx.run_in_transaction(TransactionOptions::default(), |inner| async move {
                let mut e = HasId::new(1, "");
                inner.get(&mut e).await?;
                assert_eq!(e.name, "outer");
                Ok(())
            })
            .await
        })
        .await
        .unwrap();
}
