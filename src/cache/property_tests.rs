//! Property-Based Tests for Cache Module
//!
//! Uses proptest to check TTL, overwrite, delete and sweep behaviour of the
//! stores against a simple reference model.

use proptest::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::cache::{Backend, CacheStore, ManualClock, MemoryStore, SqliteStore};

// == Test Configuration ==
const START_MS: u64 = 1_700_000_000_000;

// == Strategies ==
/// Generates valid cache keys (non-blank)
fn valid_key_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9_:-]{1,64}".prop_map(|s| s)
}

/// Generates cache values
fn valid_value_strategy() -> impl Strategy<Value = String> {
    "[a-zA-Z0-9 ]{0,128}".prop_map(|s| s)
}

/// Generates a sequence of cache operations for testing
#[derive(Debug, Clone)]
enum CacheOp {
    Put { key: String, value: String },
    PutIfAbsent { key: String, value: String },
    Get { key: String },
    Delete { key: String },
}

fn cache_op_strategy() -> impl Strategy<Value = CacheOp> {
    // A small key space so operations actually collide.
    let key = "[a-d]";
    prop_oneof![
        (key, valid_value_strategy()).prop_map(|(key, value)| CacheOp::Put { key, value }),
        (key, valid_value_strategy()).prop_map(|(key, value)| CacheOp::PutIfAbsent { key, value }),
        key.prop_map(|key| CacheOp::Get { key }),
        key.prop_map(|key| CacheOp::Delete { key }),
    ]
}

fn memory_store() -> (MemoryStore<String>, ManualClock) {
    let clock = ManualClock::new(START_MS);
    (MemoryStore::with_clock(Arc::new(clock.clone())), clock)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    // For an entry put with TTL d, get succeeds strictly before create_at + d
    // and misses from create_at + d onwards, with or without a sweep.
    #[test]
    fn prop_ttl_correctness(
        key in valid_key_strategy(),
        value in valid_value_strategy(),
        ttl_ms in 1u64..86_400_000,
        before in 0u64..86_400_000,
        after in 0u64..86_400_000,
        sweep in any::<bool>()
    ) {
        tokio_test::block_on(async {
            let (store, clock) = memory_store();
            store.put(&key, value.clone(), Some(Duration::from_millis(ttl_ms))).await.unwrap();

            clock.set(START_MS + before % ttl_ms);
            if sweep {
                store.sweep_expired().await.unwrap();
            }
            prop_assert_eq!(store.get_value(&key).await.unwrap(), Some(value));

            clock.set(START_MS + ttl_ms + after);
            if sweep {
                store.sweep_expired().await.unwrap();
            }
            prop_assert!(store.get(&key).await.unwrap().is_none());
            Ok(())
        })?;
    }

    // Entries without TTL stay readable no matter how far the clock moves.
    #[test]
    fn prop_no_expiry(
        key in valid_key_strategy(),
        value in valid_value_strategy(),
        elapsed_ms in any::<u32>(),
        zero_ttl in any::<bool>()
    ) {
        tokio_test::block_on(async {
            let (store, clock) = memory_store();
            let ttl = if zero_ttl { Some(Duration::ZERO) } else { None };
            store.put(&key, value.clone(), ttl).await.unwrap();

            clock.advance(Duration::from_millis(elapsed_ms as u64));
            store.sweep_expired().await.unwrap();
            prop_assert_eq!(store.get_value(&key).await.unwrap(), Some(value));
            Ok(())
        })?;
    }

    // Storing V1 then V2 under one key leaves V2.
    #[test]
    fn prop_overwrite_semantics(
        key in valid_key_strategy(),
        value1 in valid_value_strategy(),
        value2 in valid_value_strategy()
    ) {
        tokio_test::block_on(async {
            let (store, _) = memory_store();
            store.put(&key, value1, Some(Duration::from_secs(60))).await.unwrap();
            store.put(&key, value2.clone(), None).await.unwrap();

            let wrapper = store.get(&key).await.unwrap().unwrap();
            prop_assert_eq!(wrapper.data, value2);
            prop_assert!(wrapper.expire_at.is_none(), "overwrite replaces the expiry too");
            prop_assert_eq!(store.len().await, 1);
            Ok(())
        })?;
    }

    // Deleting once or twice, present or not, ends in the same state.
    #[test]
    fn prop_delete_idempotent(
        key in valid_key_strategy(),
        value in valid_value_strategy(),
        present in any::<bool>(),
        repeat in 1usize..4
    ) {
        tokio_test::block_on(async {
            let (store, _) = memory_store();
            if present {
                store.put(&key, value, None).await.unwrap();
            }
            for _ in 0..repeat {
                prop_assert!(store.delete(&key).await.is_ok());
            }
            prop_assert!(store.get(&key).await.unwrap().is_none());
            prop_assert!(store.is_empty().await);
            Ok(())
        })?;
    }

    // A sweep started at T never removes an entry whose expiry is after T.
    #[test]
    fn prop_sweep_safety(
        ttls in prop::collection::vec(prop::option::of(1u64..10_000), 1..20),
        elapsed_ms in 0u64..10_000
    ) {
        tokio_test::block_on(async {
            let (store, clock) = memory_store();
            for (i, ttl) in ttls.iter().enumerate() {
                let ttl = ttl.map(Duration::from_millis);
                store.put(&format!("k{}", i), "v".to_string(), ttl).await.unwrap();
            }

            clock.advance(Duration::from_millis(elapsed_ms));
            let sweep_start = START_MS + elapsed_ms;
            store.sweep_expired().await.unwrap();

            let remaining = store.len().await;
            let expected = ttls
                .iter()
                .filter(|ttl| ttl.map_or(true, |ms| START_MS + ms >= sweep_start))
                .count();
            prop_assert_eq!(remaining, expected);
            Ok(())
        })?;
    }

    // Any sequence of operations leaves the memory store equal to a plain map.
    #[test]
    fn prop_matches_reference_model(ops in prop::collection::vec(cache_op_strategy(), 1..60)) {
        tokio_test::block_on(async {
            let (store, _) = memory_store();
            let mut model: BTreeMap<String, String> = BTreeMap::new();

            for op in ops {
                match op {
                    CacheOp::Put { key, value } => {
                        store.put(&key, value.clone(), None).await.unwrap();
                        model.insert(key, value);
                    }
                    CacheOp::PutIfAbsent { key, value } => {
                        let installed = store.put_if_absent(&key, value.clone(), None).await.unwrap();
                        prop_assert_eq!(installed, !model.contains_key(&key));
                        model.entry(key).or_insert(value);
                    }
                    CacheOp::Get { key } => {
                        prop_assert_eq!(store.get_value(&key).await.unwrap(), model.get(&key).cloned());
                    }
                    CacheOp::Delete { key } => {
                        store.delete(&key).await.unwrap();
                        model.remove(&key);
                    }
                }
            }

            prop_assert_eq!(store.to_map().await, model);
            Ok(())
        })?;
    }
}

// Disk-backed cases are slower; fewer of them.
proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_sqlite_matches_reference_model(ops in prop::collection::vec(cache_op_strategy(), 1..30)) {
        let dir = tempfile::tempdir().unwrap();
        let runtime = tokio::runtime::Runtime::new().unwrap();

        runtime.block_on(async {
            let clock = ManualClock::new(START_MS);
            let store: SqliteStore<String> =
                SqliteStore::open(dir.path().join("cache.db"), Arc::new(clock)).unwrap();
            let mut model: BTreeMap<String, String> = BTreeMap::new();

            for op in ops {
                match op {
                    CacheOp::Put { key, value } => {
                        prop_assert!(store.put(&key, value.clone(), None).await.unwrap());
                        model.insert(key, value);
                    }
                    CacheOp::PutIfAbsent { key, value } => {
                        let installed = store.put_if_absent(&key, value.clone(), None).await.unwrap();
                        prop_assert_eq!(installed, !model.contains_key(&key));
                        model.entry(key).or_insert(value);
                    }
                    CacheOp::Get { key } => {
                        prop_assert_eq!(store.get_value(&key).await.unwrap(), model.get(&key).cloned());
                    }
                    CacheOp::Delete { key } => {
                        store.delete(&key).await.unwrap();
                        model.remove(&key);
                    }
                }
            }

            prop_assert_eq!(store.to_map().await, model);
            store.close().await;
            Ok(())
        })?;
    }
}
