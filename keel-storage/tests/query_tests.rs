//! Query execution and local-cache back-fill.

use keel_core::Key;
use keel_storage::RemoteCache;
use keel_test_utils::fixtures::query_items;
use keel_test_utils::*;

async fn seeded() -> TestHarness {
    let h = TestHarness::new();
    let mut items = query_items();
    h.keel.put_multi(&mut items).await.unwrap();
    h.keel.flush_local_cache();
    h
}

#[tokio::test]
async fn filtered_query_backfills_local_cache() {
    let h = seeded().await;

    let mut found: Vec<QueryItem> = Vec::new();
    let keys = h
        .keel
        .get_all(&Query::new("QueryItem").filter("data", "two"), &mut found)
        .await
        .unwrap();
    assert_eq!(keys, vec![Key::with_int("QueryItem", 2)]);
    assert_eq!(found, vec![QueryItem::new(2, "two")]);

    // Served by the local tier alone.
    h.remote.flush().await.unwrap();
    let gets_before = h.store.stats().get_calls;
    let mut item = QueryItem::new(2, "");
    h.keel.get(&mut item).await.unwrap();
    assert_eq!(item.data, "two");
    assert_eq!(h.store.stats().get_calls, gets_before);
}

#[tokio::test]
async fn keys_only_query_never_populates_local_cache() {
    let h = seeded().await;

    let mut shells: Vec<QueryItem> = Vec::new();
    let keys = h
        .keel
        .get_all(&Query::new("QueryItem").keys_only(), &mut shells)
        .await
        .unwrap();
    assert_eq!(keys.len(), 3);
    assert!(shells.iter().all(|s| s.data.is_empty()));
    assert!(h.keel.local_cache().is_empty());

    let keys_again = h.keel.get_all_keys(&Query::new("QueryItem")).await.unwrap();
    assert_eq!(keys_again, keys);
    assert!(h.keel.local_cache().is_empty());

    let mut full: Vec<QueryItem> = keys.iter().map(|k| QueryItem::new(k.int_id(), "")).collect();
    h.keel.get_multi(&mut full).await.unwrap();
    assert_eq!(full, query_items());
}

#[tokio::test]
async fn non_empty_destination_is_appended_and_not_cached() {
    let h = seeded().await;

    let mut dst = vec![QueryItem::new(99, "already here")];
    let keys = h
        .keel
        .get_all(&Query::new("QueryItem"), &mut dst)
        .await
        .unwrap();
    assert_eq!(keys.len(), 3);
    assert_eq!(dst.len(), 4);
    assert_eq!(dst[0], QueryItem::new(99, "already here"));
    assert_eq!(&dst[1..], &query_items()[..]);
    assert!(h.keel.local_cache().is_empty());
}

#[tokio::test]
async fn iterator_and_count() {
    let h = seeded().await;
    assert_eq!(h.keel.count(&Query::new("QueryItem")).await.unwrap(), 3);
    assert_eq!(
        h.keel
            .count(&Query::new("QueryItem").filter("data", "nope"))
            .await
            .unwrap(),
        0
    );

    let results: Vec<(Key, QueryItem)> = h
        .keel
        .run::<QueryItem>(&Query::new("QueryItem").limit(2))
        .await
        .unwrap()
        .collect::<KeelResult<_>>()
        .unwrap();
    assert_eq!(results.len(), 2);
    assert_eq!(results[1].1, QueryItem::new(2, "two"));
    assert_eq!(h.keel.local_cache().len(), 2);
}

#[tokio::test]
async fn ancestor_query_inside_transaction() {
    let h = TestHarness::new();
    let parent = Key::with_name("Fruit", "Apple");
    let mut seeds = vec![
        HasId::new(1, "a").with_kind("Seed").with_parent(parent.clone()),
        HasId::new(2, "b").with_kind("Seed").with_parent(parent.clone()),
        HasId::new(3, "c").with_kind("Seed"),
    ];
    h.keel.put_multi(&mut seeds).await.unwrap();
    h.keel.flush_local_cache();

    let query = Query::new("Seed").ancestor(parent);
    let names = h
        .keel
        .run_in_transaction(TransactionOptions::default(), move |tx| {
            let query = query.clone();
            async move {
                let mut found: Vec<HasId> = Vec::new();
                tx.get_all(&query, &mut found).await?;
                Ok(found.into_iter().map(|e| e.name).collect::<Vec<_>>())
            }
        })
        .await
        .unwrap();
    assert_eq!(names, vec!["a".to_string(), "b".to_string()]);
    assert!(h.keel.local_cache().is_empty());
}
