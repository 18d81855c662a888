use pagestore::core::constants::*;
use pagestore::{Error, IndexQuery, StoreOptions, Termination, ValueStore};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::ops::Bound;
use tempfile::TempDir;

fn options(page_size: usize) -> StoreOptions {
    StoreOptions {
        page_size,
        cache_size: 16,
        ..StoreOptions::default()
    }
}

fn open(dir: &TempDir, page_size: usize) -> ValueStore {
    ValueStore::open_with_options(dir.path().join("values.db"), options(page_size)).unwrap()
}

fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
}

#[test]
fn test_round_trip_various_sizes() {
    let temp_dir = TempDir::new().unwrap();
    let store = open(&temp_dir, 1024);

    let sizes = [0usize, 1, 17, 300, 900, 2000, 10_000, 70_000];
    for (i, &len) in sizes.iter().enumerate() {
        let key = format!("key-{}", i);
        store.put(None, key.as_bytes(), &pattern(len, i as u8), true).unwrap();
    }
    for (i, &len) in sizes.iter().enumerate() {
        let key = format!("key-{}", i);
        assert_eq!(store.get(key.as_bytes()).unwrap().unwrap(), pattern(len, i as u8), "size {}", len);
    }
}

#[test]
fn test_threshold_boundary_values() {
    let temp_dir = TempDir::new().unwrap();
    let store = open(&temp_dir, 4096);
    let threshold = (4096 - PAGE_HEADER_SIZE) / 2 - TUPLE_OVERHEAD;

    for len in [threshold - 1, threshold, threshold + 1] {
        let key = format!("len-{}", len);
        let address = store.put(None, key.as_bytes(), &pattern(len, 3), true).unwrap();
        assert_eq!(store.get(key.as_bytes()).unwrap().unwrap(), pattern(len, 3));
        if len > threshold {
            assert_eq!(address.slot(), OVERFLOW_SLOT);
        }
    }
}

#[test]
fn test_append_accumulates_random_chunks() {
    let temp_dir = TempDir::new().unwrap();
    let store = open(&temp_dir, 1024);
    let mut rng = StdRng::seed_from_u64(0x5eed);

    let mut expected = Vec::new();
    for round in 0..60 {
        let len = rng.gen_range(1..2500);
        let chunk: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
        store.append(None, b"log", &chunk).unwrap();
        expected.extend_from_slice(&chunk);

        if round % 10 == 0 {
            assert_eq!(store.get(b"log").unwrap().unwrap(), expected);
        }
    }
    assert_eq!(store.get(b"log").unwrap().unwrap(), expected);
}

#[test]
fn test_append_crosses_into_overflow() {
    let temp_dir = TempDir::new().unwrap();
    let store = open(&temp_dir, 1024);

    let first = store.append(None, b"grow", &[1u8; 100]).unwrap();
    assert_eq!(store.metrics().overflow_pages_created, 0);
    let second = store.append(None, b"grow", &[2u8; 600]).unwrap();
    assert_ne!(second, first);
    assert_eq!(second.slot(), OVERFLOW_SLOT);
    assert!(store.metrics().overflow_pages_created > 0);
    let third = store.append(None, b"grow", &[3u8; 5]).unwrap();
    assert_eq!(second, third);

    let value = store.get(b"grow").unwrap().unwrap();
    assert_eq!(value.len(), 705);
    assert!(value[..100].iter().all(|&b| b == 1));
    assert!(value[700..].iter().all(|&b| b == 3));
}

#[test]
fn test_freed_page_is_reused() {
    let temp_dir = TempDir::new().unwrap();
    let store = open(&temp_dir, 1024);

    let address = store.put(None, b"lonely", &[9u8; 200], true).unwrap();
    let pages = store.stats().unwrap().num_pages;
    store.remove(None, b"lonely").unwrap();
    assert_eq!(store.stats().unwrap().free_pages, 1);

    let again = store.put(None, b"next", &[8u8; 210], true).unwrap();
    assert_eq!(again.page_num(), address.page_num());
    assert_eq!(store.stats().unwrap().num_pages, pages);
}

#[test]
fn test_freed_page_is_reused_after_commit() {
    let temp_dir = TempDir::new().unwrap();
    let store = open(&temp_dir, 1024);

    let address = store.put(None, b"lonely", &[9u8; 200], true).unwrap();
    let txn = store.begin().unwrap();
    store.remove(Some(&txn), b"lonely").unwrap();
    assert_eq!(store.stats().unwrap().free_pages, 0);
    store.commit(txn).unwrap();
    assert_eq!(store.stats().unwrap().free_pages, 1);

    let again = store.put(None, b"next", &[8u8; 210], true).unwrap();
    assert_eq!(again.page_num(), address.page_num());
}

#[test]
fn test_large_document_lifecycle() {
    let temp_dir = TempDir::new().unwrap();
    let store = open(&temp_dir, 4096);
    let work = 4096 - PAGE_HEADER_SIZE;
    let value = pattern(50 * 1024, 11);

    let before = store.stats().unwrap();
    store.put(None, b"doc#1", &value, true).unwrap();
    let after = store.stats().unwrap();
    let chain_pages = (value.len() + TUPLE_OVERHEAD + work - 1) / work;
    assert_eq!(chain_pages, (50 * 1024 + work - 1) / work);
    assert_eq!(after.num_pages - before.num_pages, chain_pages as u64);
    assert_eq!(store.get(b"doc#1").unwrap().unwrap(), value);

    store.remove(None, b"doc#1").unwrap();
    let removed = store.stats().unwrap();
    assert_eq!(removed.free_pages, chain_pages);
    assert_eq!(removed.free_space_entries, 0);
    assert!(store.get(b"doc#1").unwrap().is_none());
}

#[test]
fn test_update_by_address_switches_representation() {
    let temp_dir = TempDir::new().unwrap();
    let store = open(&temp_dir, 1024);

    let small = store.put(None, b"doc", b"small", true).unwrap();
    let big = store.update(None, small, b"doc", &pattern(4000, 1)).unwrap();
    assert_eq!(big.slot(), OVERFLOW_SLOT);
    assert_eq!(store.address_of(b"doc").unwrap(), Some(big));

    let bigger = store.update(None, big, b"doc", &pattern(6000, 2)).unwrap();
    assert_eq!(bigger, big);
    assert_eq!(store.get_by_address(bigger).unwrap().unwrap(), pattern(6000, 2));

    let back = store.update(None, bigger, b"doc", b"small again").unwrap();
    assert_eq!(store.get(b"doc").unwrap().unwrap(), b"small again");
    assert_eq!(store.address_of(b"doc").unwrap(), Some(back));
}

#[test]
fn test_put_without_overwrite_keeps_value() {
    let temp_dir = TempDir::new().unwrap();
    let store = open(&temp_dir, 1024);

    store.put(None, b"k", b"one", false).unwrap();
    let err = store.put(None, b"k", b"two", false).unwrap_err();
    assert!(matches!(err, Error::KeyExists));
    assert_eq!(store.get(b"k").unwrap().unwrap(), b"one");
}

#[test]
fn test_oversized_input_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let store = ValueStore::open_with_options(
        temp_dir.path().join("values.db"),
        StoreOptions {
            max_value_size: 4096,
            ..options(1024)
        },
    )
    .unwrap();
    let before = store.stats().unwrap();

    let key = vec![b'x'; store.max_key_size() + 1];
    assert!(matches!(store.put(None, &key, b"v", true), Err(Error::KeyTooLarge { .. })));
    assert!(matches!(store.put(None, b"v", &[0u8; 5000], true), Err(Error::ValueTooLarge { .. })));
    assert_eq!(store.stats().unwrap(), before);
}

#[test]
fn test_standalone_values() {
    let temp_dir = TempDir::new().unwrap();
    let store = open(&temp_dir, 1024);

    let a = store.store(None, b"no key").unwrap();
    let b = store.store(None, &pattern(3000, 4)).unwrap();
    assert_eq!(store.get_by_address(a).unwrap().unwrap(), b"no key");
    assert_eq!(store.get_by_address(b).unwrap().unwrap(), pattern(3000, 4));

    assert_eq!(store.remove_by_address(None, b).unwrap(), pattern(3000, 4));
    assert!(store.get_by_address(b).unwrap().is_none());
    assert!(matches!(store.remove_by_address(None, b), Err(Error::InvalidAddress { .. })));
}

fn fill_keys(store: &ValueStore, count: usize) {
    for i in 0..count {
        let key = format!("key{:04}", i);
        store.put(None, key.as_bytes(), format!("value{}", i).as_bytes(), true).unwrap();
    }
}

#[test]
fn test_scans_span_batches() {
    let temp_dir = TempDir::new().unwrap();
    let store = open(&temp_dir, 1024);
    fill_keys(&store, 300);

    let keys = store.keys().unwrap();
    assert_eq!(keys.len(), 300);
    assert!(keys.windows(2).all(|w| w[0] < w[1]));

    let prefixed = store.find_keys(&IndexQuery::Prefix(b"key01".to_vec()), None).unwrap();
    assert_eq!(prefixed.len(), 100);
    assert_eq!(prefixed[0], b"key0100");

    let range = IndexQuery::Range(
        Bound::Included(b"key0010".to_vec()),
        Bound::Excluded(b"key0020".to_vec()),
    );
    let entries = store.find_entries(&range, None).unwrap();
    assert_eq!(entries.len(), 10);
    assert_eq!(entries[3], (b"key0013".to_vec(), b"value13".to_vec()));

    let values = store.find_values(&IndexQuery::Equal(b"key0299".to_vec()), None).unwrap();
    assert_eq!(values, vec![b"value299".to_vec()]);
    assert_eq!(store.values().unwrap().len(), 300);
}

#[test]
fn test_scan_stops_when_callback_declines() {
    let temp_dir = TempDir::new().unwrap();
    let store = open(&temp_dir, 1024);
    fill_keys(&store, 50);

    let mut seen = 0;
    store
        .find(&IndexQuery::All, None, |_, _| {
            seen += 1;
            Ok(seen < 7)
        })
        .unwrap();
    assert_eq!(seen, 7);
}

#[test]
fn test_terminated_scan_reports_termination() {
    let temp_dir = TempDir::new().unwrap();
    let store = open(&temp_dir, 1024);
    fill_keys(&store, 200);

    let token = Termination::new();
    let mut seen = 0;
    let result = store.find(&IndexQuery::All, Some(&token), |_, _| {
        seen += 1;
        if seen == 10 {
            token.terminate();
        }
        Ok(true)
    });
    assert!(matches!(result, Err(Error::Terminated { .. })));
    assert_eq!(seen, 10);

    let err = store.find_keys(&IndexQuery::All, Some(&token)).unwrap_err();
    assert!(matches!(err, Error::Terminated { .. }));
}

#[test]
fn test_remove_all_matching() {
    let temp_dir = TempDir::new().unwrap();
    let store = open(&temp_dir, 1024);
    fill_keys(&store, 120);
    store.put(None, b"big-a", &pattern(5000, 1), true).unwrap();
    store.put(None, b"big-b", &pattern(5000, 2), true).unwrap();

    let removed = store.remove_all(None, &IndexQuery::Prefix(b"key00".to_vec())).unwrap();
    assert_eq!(removed, 100);
    assert_eq!(store.len().unwrap(), 22);
    assert!(store.get(b"key0050").unwrap().is_none());
    assert_eq!(store.get(b"key0100").unwrap().unwrap(), b"value100");

    assert_eq!(store.remove_all(None, &IndexQuery::Prefix(b"big".to_vec())).unwrap(), 2);
    assert_eq!(store.remove_all(None, &IndexQuery::Prefix(b"nothing".to_vec())).unwrap(), 0);
    assert_eq!(store.len().unwrap(), 20);
}

#[test]
fn test_values_persist_across_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let big = pattern(9000, 5);
    {
        let store = open(&temp_dir, 1024);
        store.put(None, b"small", b"persisted", true).unwrap();
        store.put(None, b"big", &big, true).unwrap();
        store.remove(None, b"small").unwrap();
        store.put(None, b"small", b"again", true).unwrap();
        store.close().unwrap();
    }

    let store = open(&temp_dir, 1024);
    assert_eq!(store.get(b"small").unwrap().unwrap(), b"again");
    assert_eq!(store.get(b"big").unwrap().unwrap(), big);
    assert_eq!(store.recovery_report().redone, 0);
}

#[test]
fn test_page_size_fixed_at_creation() {
    let temp_dir = TempDir::new().unwrap();
    {
        let store = open(&temp_dir, 2048);
        store.put(None, b"k", b"v", true).unwrap();
    }
    let store = open(&temp_dir, 8192);
    assert_eq!(store.stats().unwrap().page_size, 2048);
    assert_eq!(store.get(b"k").unwrap().unwrap(), b"v");
}

#[test]
fn test_metrics_count_operations() {
    let temp_dir = TempDir::new().unwrap();
    let store = open(&temp_dir, 1024);

    store.put(None, b"a", b"1", true).unwrap();
    store.put(None, b"b", &pattern(3000, 0), true).unwrap();
    store.get(b"a").unwrap();
    store.get(b"b").unwrap();
    store.remove(None, b"a").unwrap();

    let metrics = store.metrics();
    assert_eq!(metrics.values_stored, 2);
    assert_eq!(metrics.values_read, 2);
    assert_eq!(metrics.values_removed, 1);
    assert!(metrics.overflow_pages_created >= 4);
    let json = serde_json::to_value(&metrics).unwrap();
    assert_eq!(json["values_stored"], 2);
}
