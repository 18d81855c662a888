use pagestore::{summarize_journal, StoreOptions, ValueStore};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

fn options() -> StoreOptions {
    StoreOptions {
        page_size: 1024,
        cache_size: 64,
        ..StoreOptions::default()
    }
}

fn open(path: &Path) -> ValueStore {
    ValueStore::open_with_options(path, options()).unwrap()
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// Copies the store's files as they are on disk right now, without any
/// flushing, the way a power cut would leave them.
fn crash_image(path: &Path, target_dir: &Path) -> PathBuf {
    let target = target_dir.join("values.db");
    fs::copy(path, &target).unwrap();
    for suffix in ["-journal", "-index"] {
        let source = sibling(path, suffix);
        if source.exists() {
            fs::copy(&source, sibling(&target, suffix)).unwrap();
        }
    }
    target
}

fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(7).wrapping_add(seed)).collect()
}

/// A committed transaction whose pages never reached the disk is redone.
#[test]
fn test_committed_transaction_survives_crash() {
    let temp_dir = TempDir::new().unwrap();
    let crash_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("values.db");
    let store = open(&path);

    let big = pattern(6000, 1);
    let txn = store.begin().unwrap();
    store.put(Some(&txn), b"small", b"committed value", true).unwrap();
    store.put(Some(&txn), b"big", &big, true).unwrap();
    store.append(Some(&txn), b"log", b"first line;").unwrap();
    store.commit(txn).unwrap();

    let image = crash_image(&path, crash_dir.path());
    drop(store);

    let recovered = open(&image);
    let report = recovered.recovery_report().clone();
    println!("recovery report: {:?}", report);
    assert!(report.redone > 0);
    assert!(report.losers.is_empty());

    assert_eq!(recovered.get(b"small").unwrap().unwrap(), b"committed value");
    assert_eq!(recovered.get(b"big").unwrap().unwrap(), big);
    assert_eq!(recovered.get(b"log").unwrap().unwrap(), b"first line;");
    assert_eq!(recovered.len().unwrap(), 3);
}

/// Work of a transaction that never finished is rolled back on reopen.
#[test]
fn test_uncommitted_transaction_is_undone() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("values.db");

    let loser_id = {
        let store = open(&path);
        store.put(None, b"doc", b"before", true).unwrap();
        store.put(None, b"big", &pattern(4000, 2), true).unwrap();
        store.flush().unwrap();

        let txn = store.begin().unwrap();
        store.put(Some(&txn), b"doc", b"after", true).unwrap();
        store.put(Some(&txn), b"fresh", &pattern(3000, 3), true).unwrap();
        store.remove(Some(&txn), b"big").unwrap();
        assert!(store.get(b"big").unwrap().is_none());
        txn.id()
        // dropped with the transaction still running
    };

    let store = open(&path);
    assert_eq!(store.recovery_report().losers, vec![loser_id]);
    assert!(store.recovery_report().undone >= 3);

    assert_eq!(store.get(b"doc").unwrap().unwrap(), b"before");
    assert!(store.get(b"fresh").unwrap().is_none());
    assert_eq!(store.get(b"big").unwrap().unwrap(), pattern(4000, 2));
    assert_eq!(store.len().unwrap(), 2);
}

/// A crash in the middle of growing an overflow value keeps the length the
/// journal last recorded, and pages added by the lost append are reusable.
#[test]
fn test_crash_during_overflow_append() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("values.db");
    let original = pattern(2500, 4);

    let pages_before = {
        let store = open(&path);
        store.put(None, b"grow", &original, true).unwrap();
        store.flush().unwrap();
        let pages = store.stats().unwrap().num_pages;

        let txn = store.begin().unwrap();
        store.append(Some(&txn), b"grow", &pattern(5000, 5)).unwrap();
        assert_eq!(store.get(b"grow").unwrap().unwrap().len(), 7500);
        pages
    };

    let store = open(&path);
    assert_eq!(store.get(b"grow").unwrap().unwrap(), original);
    let stats = store.stats().unwrap();
    assert_eq!(stats.num_pages as usize - stats.free_pages, pages_before as usize);

    store.append(None, b"grow", b"tail").unwrap();
    let value = store.get(b"grow").unwrap().unwrap();
    assert_eq!(&value[..2500], &original[..]);
    assert_eq!(&value[2500..], b"tail");
}

/// An abort that reached the journal is replayed as an abort.
#[test]
fn test_aborted_transaction_stays_aborted_after_crash() {
    let temp_dir = TempDir::new().unwrap();
    let crash_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("values.db");
    let store = open(&path);

    let txn = store.begin().unwrap();
    store.put(Some(&txn), b"kept", b"yes", true).unwrap();
    store.commit(txn).unwrap();

    let txn = store.begin().unwrap();
    store.put(Some(&txn), b"kept", b"no", true).unwrap();
    store.put(Some(&txn), b"dropped", &pattern(2000, 6), true).unwrap();
    store.abort(txn).unwrap();

    let image = crash_image(&path, crash_dir.path());
    drop(store);

    let recovered = open(&image);
    assert!(recovered.recovery_report().losers.is_empty());
    assert_eq!(recovered.get(b"kept").unwrap().unwrap(), b"yes");
    assert!(recovered.get(b"dropped").unwrap().is_none());
}

/// Committed work is kept and unfinished work discarded when both are in
/// the journal at the time of the crash.
#[test]
fn test_mixed_winners_and_losers() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("values.db");

    {
        let store = open(&path);
        let winner = store.begin().unwrap();
        let loser = store.begin().unwrap();

        for i in 0..20 {
            let key = format!("win-{:02}", i);
            store.put(Some(&winner), key.as_bytes(), &pattern(50 + i, i as u8), true).unwrap();
            let key = format!("lose-{:02}", i);
            store.put(Some(&loser), key.as_bytes(), &pattern(60 + i, i as u8), true).unwrap();
        }
        store.commit(winner).unwrap();
    }

    let store = open(&path);
    assert_eq!(store.recovery_report().losers.len(), 1);
    assert_eq!(store.len().unwrap(), 20);
    for i in 0..20 {
        let key = format!("win-{:02}", i);
        assert_eq!(store.get(key.as_bytes()).unwrap().unwrap(), pattern(50 + i, i as u8));
        let key = format!("lose-{:02}", i);
        assert!(store.get(key.as_bytes()).unwrap().is_none());
    }
}

/// Opening a recovered store again finds a clean journal.
#[test]
fn test_recovery_leaves_clean_journal() {
    let temp_dir = TempDir::new().unwrap();
    let crash_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("values.db");
    let store = open(&path);

    let txn = store.begin().unwrap();
    store.put(Some(&txn), b"k", &pattern(3000, 9), true).unwrap();
    store.commit(txn).unwrap();
    let image = crash_image(&path, crash_dir.path());
    drop(store);

    {
        let first = open(&image);
        assert!(first.recovery_report().redone > 0);
    }

    let second = open(&image);
    let report = second.recovery_report();
    assert_eq!(report.redone, 0);
    assert_eq!(report.undone, 0);
    assert_eq!(second.get(b"k").unwrap().unwrap(), pattern(3000, 9));
}

#[test]
fn test_journal_summary_counts_transaction_records() {
    let temp_dir = TempDir::new().unwrap();
    let store = open(&temp_dir.path().join("values.db"));

    let txn = store.begin().unwrap();
    let id = txn.id();
    store.put(Some(&txn), b"a", b"1", true).unwrap();
    store.put(Some(&txn), b"b", b"2", true).unwrap();

    let summary = summarize_journal(&store.journal_records().unwrap());
    // start marker, the new record page, then a value and an index update per put
    assert_eq!(summary.get(&id), Some(&6));

    store.commit(txn).unwrap();
    store.flush().unwrap();
    let summary = summarize_journal(&store.journal_records().unwrap());
    assert!(summary.is_empty());
}

#[test]
fn test_recovery_disabled_has_no_journal() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("values.db");
    let store = ValueStore::open_with_options(
        &path,
        StoreOptions {
            recovery_enabled: false,
            ..options()
        },
    )
    .unwrap();

    let txn = store.begin().unwrap();
    store.put(Some(&txn), b"k", b"v", true).unwrap();
    store.commit(txn).unwrap();
    assert!(store.journal_records().unwrap().is_empty());
    assert!(!sibling(&path, "-journal").exists());
    store.close().unwrap();

    let store = ValueStore::open_with_options(&path, StoreOptions { recovery_enabled: false, ..options() }).unwrap();
    assert_eq!(store.get(b"k").unwrap().unwrap(), b"v");
}

/// A tuple removed by a running transaction keeps its slot while another
/// writer stores into the same page, so the abort puts it back where the
/// key expects it.
#[test]
fn test_abort_restores_tuple_on_shared_page() {
    let temp_dir = TempDir::new().unwrap();
    let store = open(&temp_dir.path().join("values.db"));

    let a = store.put(None, b"a", b"AAAA", true).unwrap();
    store.put(None, b"keep", b"KEEP", true).unwrap();

    let txn = store.begin().unwrap();
    store.remove(Some(&txn), b"a").unwrap();

    let b = store.put(None, b"b", b"BBBB", true).unwrap();
    let other = store.begin().unwrap();
    let c = store.put(Some(&other), b"c", b"CCCC", true).unwrap();
    store.commit(other).unwrap();
    assert_eq!(b.page_num(), a.page_num());
    assert_ne!(b, a);
    assert_ne!(c, a);

    store.abort(txn).unwrap();
    assert_eq!(store.address_of(b"a").unwrap(), Some(a));
    assert_eq!(store.get(b"a").unwrap().unwrap(), b"AAAA");
    assert_eq!(store.get(b"b").unwrap().unwrap(), b"BBBB");
    assert_eq!(store.get(b"c").unwrap().unwrap(), b"CCCC");
    assert_eq!(store.get(b"keep").unwrap().unwrap(), b"KEEP");
}

/// Space freed by a running transaction is not handed to other writers, so
/// rolling back always has room and the store reopens afterwards.
#[test]
fn test_abort_has_room_after_concurrent_store() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("values.db");
    let big_a = pattern(470, 5);
    let big_keep = pattern(470, 6);
    let big_b = pattern(480, 7);

    {
        let store = open(&path);
        let x = store.put(None, b"x", &pattern(10, 8), true).unwrap();
        let a = store.put(None, b"a", &big_a, true).unwrap();
        store.put(None, b"keep", &big_keep, true).unwrap();
        assert_eq!(x.page_num(), a.page_num());

        let txn = store.begin().unwrap();
        store.remove(Some(&txn), b"x").unwrap();
        store.remove(Some(&txn), b"a").unwrap();

        let b = store.put(None, b"b", &big_b, true).unwrap();
        assert_ne!(b.page_num(), a.page_num());

        store.abort(txn).unwrap();
        assert_eq!(store.get(b"a").unwrap().unwrap(), big_a);
        assert_eq!(store.get(b"x").unwrap().unwrap(), pattern(10, 8));
        store.close().unwrap();
    }

    let store = open(&path);
    assert_eq!(store.get(b"x").unwrap().unwrap(), pattern(10, 8));
    assert_eq!(store.get(b"a").unwrap().unwrap(), big_a);
    assert_eq!(store.get(b"keep").unwrap().unwrap(), big_keep);
    assert_eq!(store.get(b"b").unwrap().unwrap(), big_b);
}

/// A crash with a loser and a committed winner on the same record page:
/// the winner's tuple survives and the loser's removals are undone.
#[test]
fn test_crash_with_two_writers_on_one_page() {
    let temp_dir = TempDir::new().unwrap();
    let crash_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("values.db");
    let store = open(&path);
    let big_a = pattern(470, 5);
    let big_b = pattern(480, 7);

    store.put(None, b"x", &pattern(10, 8), true).unwrap();
    store.put(None, b"a", &big_a, true).unwrap();
    store.put(None, b"keep", b"KEEP", true).unwrap();
    store.flush().unwrap();

    let loser = store.begin().unwrap();
    store.remove(Some(&loser), b"x").unwrap();
    store.remove(Some(&loser), b"a").unwrap();

    let winner = store.begin().unwrap();
    store.put(Some(&winner), b"b", &big_b, true).unwrap();
    store.put(Some(&winner), b"c", b"CCCC", true).unwrap();
    store.commit(winner).unwrap();

    let loser_id = loser.id();
    let image = crash_image(&path, crash_dir.path());
    drop(store);

    let recovered = open(&image);
    assert_eq!(recovered.recovery_report().losers, vec![loser_id]);
    assert_eq!(recovered.get(b"x").unwrap().unwrap(), pattern(10, 8));
    assert_eq!(recovered.get(b"a").unwrap().unwrap(), big_a);
    assert_eq!(recovered.get(b"keep").unwrap().unwrap(), b"KEEP");
    assert_eq!(recovered.get(b"b").unwrap().unwrap(), big_b);
    assert_eq!(recovered.get(b"c").unwrap().unwrap(), b"CCCC");
    assert_eq!(recovered.len().unwrap(), 5);
}
