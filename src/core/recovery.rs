use crate::core::constants::*;
use crate::core::data_file::DataFile;
use crate::core::errors::*;
use crate::core::index::KeyIndex;
use crate::core::journal::LogRecord;
use crate::core::loggable::{Loggable, RecoveryContext};
use crate::core::page::Page;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap, HashSet};
use tracing::{debug, info, warn};

/// What a recovery pass found and did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RecoveryReport {
    pub scanned: usize,
    pub redone: usize,
    pub undone: usize,
    pub losers: Vec<TransactionID>,
}

/// Gives journal records access to the data file's pages and the key index.
pub(crate) struct Replayer<'a> {
    file: &'a mut DataFile,
    index: &'a mut dyn KeyIndex,
}

impl<'a> Replayer<'a> {
    pub fn new(file: &'a mut DataFile, index: &'a mut dyn KeyIndex) -> Self {
        Self { file, index }
    }
}

impl RecoveryContext for Replayer<'_> {
    fn page_mut(&mut self, page: PageNum) -> Result<Option<&mut Page>> {
        if !self.file.is_valid_page(page) {
            return Ok(None);
        }
        match self.file.page_mut(page) {
            Ok(p) => Ok(Some(p)),
            Err(e) => {
                warn!(page, error = %e, "page unreadable during replay");
                Ok(None)
            }
        }
    }

    fn claim_page(&mut self, page: PageNum) -> Result<&mut Page> {
        if page == 0 {
            return Err(Error::InvalidPageNum { page_num: page });
        }
        self.file.pager.reclaim_page(page);
        self.file.page_mut(page)
    }

    fn release_page(&mut self, page: PageNum) -> Result<()> {
        if !self.file.is_valid_page(page) {
            return Ok(());
        }
        self.file.free_space.remove(page);
        self.file.pager.free_page(page)
    }

    fn index(&mut self) -> &mut dyn KeyIndex {
        &mut *self.index
    }
}

/// Whether the journal holds anything beyond its checkpoint marker.
pub(crate) fn needs_recovery(records: &[LogRecord]) -> bool {
    records.iter().any(|r| r.entry != Loggable::Checkpoint)
}

/// Brings the data file and index to the state of the last committed
/// transactions: analysis, redo of every record, undo of unfinished
/// transactions. Leaves the journal checkpointed.
pub(crate) fn recover(file: &mut DataFile, index: &mut dyn KeyIndex) -> Result<RecoveryReport> {
    let records = match file.journal.as_mut() {
        Some(journal) => journal.read_all()?,
        None => return Ok(RecoveryReport::default()),
    };
    let mut report = RecoveryReport {
        scanned: records.len(),
        ..RecoveryReport::default()
    };
    if !needs_recovery(&records) {
        return Ok(report);
    }
    info!(records = records.len(), "journal not clean; running recovery");

    // analysis
    let mut finished = HashSet::new();
    let mut seen = BTreeSet::new();
    let mut max_txn = 0;
    for record in &records {
        max_txn = max_txn.max(record.txn_id);
        match record.entry {
            Loggable::TxnCommit | Loggable::TxnAbort => {
                finished.insert(record.txn_id);
            }
            Loggable::Checkpoint => {}
            _ => {
                seen.insert(record.txn_id);
            }
        }
    }
    report.losers = seen.iter().copied().filter(|t| !finished.contains(t)).collect();
    file.pager.set_next_transaction_id(max_txn + 1);
    debug!(winners = finished.len(), losers = report.losers.len(), "analysis complete");

    // redo
    for record in &records {
        if record.entry.is_marker() {
            continue;
        }
        let mut replayer = Replayer::new(file, index);
        let outcome = record.entry.redo(record.lsn, &mut replayer);
        if applied(file, record, "redo", outcome)? {
            report.redone += 1;
        }
    }

    // undo
    let stamp = match file.journal.as_ref() {
        Some(journal) => journal.current_lsn(),
        None => LSN_INVALID,
    };
    let losers: HashSet<_> = report.losers.iter().copied().collect();
    let compensated: HashSet<Lsn> = records
        .iter()
        .filter_map(|r| match &r.entry {
            Loggable::Compensation { undone_lsn, .. } => Some(*undone_lsn),
            _ => None,
        })
        .collect();

    for record in records.iter().rev() {
        if !losers.contains(&record.txn_id) || record.entry.is_marker() || compensated.contains(&record.lsn) {
            continue;
        }
        let mut replayer = Replayer::new(file, index);
        let outcome = record.entry.undo(stamp, &mut replayer, false);
        if applied(file, record, "undo", outcome)? {
            report.undone += 1;
            file.metrics().record_undone();
        }
    }

    file.rebuild_free_space()?;
    file.sync()?;
    index.set_lsn(stamp);
    index.flush()?;
    if let Some(journal) = file.journal.as_mut() {
        journal.checkpoint()?;
    }

    file.metrics().recovery_completed(report.redone as u64, report.undone as u64);
    info!(
        scanned = report.scanned,
        redone = report.redone,
        undone = report.undone,
        losers = report.losers.len(),
        "recovery complete"
    );
    Ok(report)
}

/// Rolls back one running transaction: each of its records is undone in
/// reverse order and a compensation record is logged for it before the
/// abort marker. Returns the number of records undone.
pub(crate) fn rollback(
    file: &mut DataFile,
    index: &mut dyn KeyIndex,
    txn_id: TransactionID,
    start_lsn: Lsn,
) -> Result<usize> {
    let records: Vec<LogRecord> = match file.journal.as_mut() {
        Some(journal) => journal
            .records_since(start_lsn)?
            .into_iter()
            .filter(|r| r.txn_id == txn_id && !r.entry.is_marker())
            .collect(),
        None => {
            warn!(txn = txn_id, "no journal; aborted changes stay in place");
            return Ok(0);
        }
    };

    let compensated: HashSet<Lsn> = records
        .iter()
        .filter_map(|r| match &r.entry {
            Loggable::Compensation { undone_lsn, .. } => Some(*undone_lsn),
            _ => None,
        })
        .collect();

    let mut touched = BTreeSet::new();
    let mut undone = 0;
    for record in records.iter().rev() {
        if matches!(record.entry, Loggable::Compensation { .. }) || compensated.contains(&record.lsn) {
            continue;
        }
        let clr = Loggable::Compensation {
            undone_lsn: record.lsn,
            record: Box::new(record.entry.clone()),
        };
        let lsn = file.log(Some(txn_id), &clr)?;

        let mut replayer = Replayer::new(file, index);
        let outcome = record.entry.undo(lsn, &mut replayer, false);
        if applied(file, record, "rollback", outcome)? {
            undone += 1;
            file.metrics().record_undone();
        }
        touched.extend(pages_of(&record.entry));
    }

    file.discard_deferred(txn_id);
    file.release_holds(txn_id)?;
    for page in touched {
        if file.is_valid_page(page) {
            file.refresh_free_space(page)?;
        }
    }

    debug!(txn = txn_id, undone, "transaction rolled back");
    Ok(undone)
}

// A record that cannot be applied is logged and skipped; I/O failures
// still end the pass.
fn applied(file: &DataFile, record: &LogRecord, pass: &str, outcome: Result<bool>) -> Result<bool> {
    match outcome {
        Ok(applied) => Ok(applied),
        Err(e @ Error::Io(_)) => Err(e),
        Err(e) => {
            warn!(
                lsn = record.lsn,
                txn = record.txn_id,
                record = record.entry.name(),
                pass,
                error = %e,
                "journal record not applied; skipping"
            );
            file.metrics().corruption_warning();
            Ok(false)
        }
    }
}

fn pages_of(entry: &Loggable) -> Vec<PageNum> {
    match entry {
        Loggable::CreatePage { page, .. }
        | Loggable::StoreValue { page, .. }
        | Loggable::RemoveValue { page, .. }
        | Loggable::RemoveEmptyPage { page, .. }
        | Loggable::OverflowAppend { page, .. }
        | Loggable::OverflowStore { page, .. }
        | Loggable::OverflowCreate { page, .. }
        | Loggable::OverflowModified { page, .. }
        | Loggable::OverflowRemove { page, .. } => vec![*page],
        Loggable::OverflowCreatePage { page, prev, .. } => vec![*page, *prev],
        Loggable::Compensation { record, .. } => pages_of(record),
        _ => Vec::new(),
    }
}

/// Counts records per transaction; used by the CLI's journal summary.
pub fn summarize(records: &[LogRecord]) -> HashMap<TransactionID, usize> {
    let mut counts = HashMap::new();
    for record in records {
        if record.entry != Loggable::Checkpoint {
            *counts.entry(record.txn_id).or_insert(0) += 1;
        }
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::data_page::{store_value, DataPage, OverflowChain};
    use crate::core::index::OrderedIndex;
    use crate::core::journal::Journal;
    use crate::core::metrics::Metrics;
    use crate::core::pager::Pager;
    use std::path::Path;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn open(path: &Path, cache_size: usize) -> DataFile {
        let metrics = Arc::new(Metrics::new());
        let pager = Pager::open(path, 1024, 0o644, false, Arc::clone(&metrics)).unwrap();
        let journal = Journal::open(path, pager.lsn(), 0o644, Arc::clone(&metrics)).unwrap();
        DataFile::new(pager, Some(journal), cache_size, 1, PAGE_MIN_FREE, metrics).unwrap()
    }

    fn log(file: &mut DataFile, txn: TransactionID, entry: Loggable) {
        file.log(Some(txn), &entry).unwrap();
    }

    fn read(file: &mut DataFile, address: crate::core::address::Address) -> Option<Vec<u8>> {
        match DataPage::resolve(file, address).unwrap() {
            Some(page) => page.read(file).unwrap(),
            None => None,
        }
    }

    // Writes the journal out but leaves dirty pages unwritten, as a crash would.
    fn crash(mut file: DataFile) {
        file.journal.as_mut().unwrap().flush_to_log(true).unwrap();
    }

    #[test]
    fn test_committed_work_is_redone() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("redo.db");

        let address = {
            let mut file = open(&path, 64);
            log(&mut file, 1, Loggable::TxnStart);
            let address = store_value(&mut file, Some(1), b"committed value").unwrap();
            log(&mut file, 1, Loggable::TxnCommit);
            crash(file);
            address
        };

        let mut file = open(&path, 64);
        let mut index = OrderedIndex::in_memory();
        let report = recover(&mut file, &mut index).unwrap();
        assert!(report.losers.is_empty());
        assert!(report.redone >= 2);
        assert_eq!(read(&mut file, address).unwrap(), b"committed value");

        // a second pass finds a clean journal
        let again = recover(&mut file, &mut index).unwrap();
        assert_eq!(again.redone, 0);
    }

    #[test]
    fn test_uncommitted_work_is_undone() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("undo.db");

        let (kept, lost) = {
            let mut file = open(&path, 4);
            log(&mut file, 1, Loggable::TxnStart);
            let kept = store_value(&mut file, Some(1), b"keep me").unwrap();
            log(&mut file, 1, Loggable::TxnCommit);

            log(&mut file, 2, Loggable::TxnStart);
            let lost = store_value(&mut file, Some(2), &vec![7u8; 3000]).unwrap();
            // force the loser's pages to disk
            file.sync().unwrap();
            crash(file);
            (kept, lost)
        };

        let mut file = open(&path, 4);
        let mut index = OrderedIndex::in_memory();
        let report = recover(&mut file, &mut index).unwrap();
        assert_eq!(report.losers, vec![2]);
        assert!(report.undone > 0);
        assert_eq!(read(&mut file, kept).unwrap(), b"keep me");
        assert!(read(&mut file, lost).is_none());
        assert!(file.pager.is_free(lost.page_num()));
    }

    #[test]
    fn test_crash_mid_overflow_append_keeps_logged_length() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("append.db");
        let original = vec![1u8; 2000];

        let (chain, pages_before) = {
            let mut file = open(&path, 4);
            log(&mut file, 1, Loggable::TxnStart);
            let chain = OverflowChain::create(&mut file, Some(1), &original).unwrap();
            log(&mut file, 1, Loggable::TxnCommit);
            let pages_before = chain.pages(&mut file).unwrap();

            log(&mut file, 2, Loggable::TxnStart);
            chain.append(&mut file, Some(2), &vec![2u8; 5000]).unwrap();
            file.sync().unwrap();
            crash(file);
            (chain, pages_before)
        };

        let mut file = open(&path, 4);
        let mut index = OrderedIndex::in_memory();
        recover(&mut file, &mut index).unwrap();

        assert_eq!(chain.read(&mut file).unwrap().unwrap(), original);
        assert_eq!(chain.pages(&mut file).unwrap(), pages_before);
        let last = *pages_before.last().unwrap();
        for page in last + 1..file.pager.num_pages() {
            assert!(file.pager.is_free(page), "page {} leaked", page);
        }
    }

    #[test]
    fn test_rollback_logs_compensation_and_restores() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("rollback.db");
        let mut file = open(&path, 16);
        let mut index = OrderedIndex::in_memory();

        let base = store_value(&mut file, None, b"base").unwrap();
        let start = file.journal.as_ref().unwrap().end_lsn();
        log(&mut file, 3, Loggable::TxnStart);
        let page = DataPage::resolve(&mut file, base).unwrap().unwrap();
        page.remove(&mut file, Some(3)).unwrap();
        let added = store_value(&mut file, Some(3), b"added").unwrap();

        let undone = rollback(&mut file, &mut index, 3, start).unwrap();
        assert!(undone >= 3);
        assert_eq!(read(&mut file, base).unwrap(), b"base");
        if added != base {
            assert_ne!(read(&mut file, added).as_deref(), Some(&b"added"[..]));
        }

        let records = file.journal.as_mut().unwrap().read_all().unwrap();
        let clrs = records
            .iter()
            .filter(|r| matches!(r.entry, Loggable::Compensation { .. }))
            .count();
        assert_eq!(clrs, undone);
    }

    #[test]
    fn test_summarize_counts_per_transaction() {
        let records = vec![
            LogRecord { lsn: 40, txn_id: 0, entry: Loggable::Checkpoint },
            LogRecord { lsn: 60, txn_id: 4, entry: Loggable::TxnStart },
            LogRecord { lsn: 80, txn_id: 4, entry: Loggable::TxnCommit },
            LogRecord { lsn: 99, txn_id: 6, entry: Loggable::TxnStart },
        ];
        let counts = summarize(&records);
        assert_eq!(counts[&4], 2);
        assert_eq!(counts[&6], 1);
        assert!(!counts.contains_key(&0));
        assert!(needs_recovery(&records));
        assert!(!needs_recovery(&records[..1]));
    }
}
