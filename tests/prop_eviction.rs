// Property: after inserting into a bounded namespace, eviction leaves exactly
// the newest `limit` entries, in insertion order, and running it again
// removes nothing

use bytes::Bytes;
use http::HeaderMap;
use offline_relay::{CacheEntry, EvictionPolicy, FileStore, MemoryStore, Store};
use proptest::prelude::*;

fn entry(key: &str) -> CacheEntry {
    CacheEntry::new(key, key, 200, &HeaderMap::new(), Bytes::from_static(b"x"))
}

async fn insert_and_evict(store: &dyn Store, keys: &[String], limit: usize) -> Vec<String> {
    for key in keys {
        store.put("ns", entry(key)).await.unwrap();
        EvictionPolicy::enforce(store, "ns", limit).await.unwrap();
    }
    store.keys("ns").await.unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// N + k distinct inserts with limit N keep the N newest
    #[test]
    fn prop_keeps_newest(limit in 1usize..20, extra in 0usize..20) {
        let keys: Vec<String> = (0..limit + extra)
            .map(|i| format!("GET https://h/{}.mp3", i))
            .collect();
        let store = MemoryStore::new();

        let remaining = tokio_test::block_on(insert_and_evict(&store, &keys, limit));

        let expected: Vec<String> = keys[keys.len() - limit.min(keys.len())..].to_vec();
        prop_assert_eq!(remaining, expected);
    }

    /// Re-inserting a key refreshes it, so it survives the next eviction
    #[test]
    fn prop_replace_counts_as_newest(
        limit in 2usize..10,
        refreshed in any::<prop::sample::Index>(),
    ) {
        let mut keys: Vec<String> = (0..limit).map(|i| format!("k{}", i)).collect();
        let refreshed = keys[refreshed.index(limit)].clone();
        keys.push(refreshed.clone());
        keys.push("new".to_string());
        let store = MemoryStore::new();

        let remaining = tokio_test::block_on(insert_and_evict(&store, &keys, limit));

        prop_assert_eq!(remaining.len(), limit);
        prop_assert!(remaining.contains(&refreshed));
        prop_assert_eq!(remaining.last().map(String::as_str), Some("new"));
    }

    /// Enforcement is idempotent
    #[test]
    fn prop_enforce_is_idempotent(count in 0usize..40, limit in 1usize..20) {
        let store = MemoryStore::new();
        tokio_test::block_on(async {
            for i in 0..count {
                store.put("ns", entry(&format!("k{}", i))).await.unwrap();
            }
        });

        let first = tokio_test::block_on(EvictionPolicy::enforce(&store, "ns", limit)).unwrap();
        let after_first = tokio_test::block_on(store.keys("ns")).unwrap();
        let second = tokio_test::block_on(EvictionPolicy::enforce(&store, "ns", limit)).unwrap();
        let after_second = tokio_test::block_on(store.keys("ns")).unwrap();

        prop_assert_eq!(first, count.saturating_sub(limit));
        prop_assert_eq!(second, 0);
        prop_assert_eq!(after_first, after_second);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(20))]

    /// The file store preserves insertion order across reopen
    #[test]
    fn prop_file_store_keeps_newest(limit in 1usize..6, extra in 0usize..6) {
        let dir = tempfile::tempdir().unwrap();
        let keys: Vec<String> = (0..limit + extra).map(|i| format!("k{}", i)).collect();

        let remaining = tokio_test::block_on(async {
            let store = FileStore::open(dir.path()).await.unwrap();
            insert_and_evict(&store, &keys, limit).await;
            let reopened = FileStore::open(dir.path()).await.unwrap();
            reopened.keys("ns").await.unwrap()
        });

        prop_assert_eq!(remaining, keys[extra..].to_vec());
    }
}
