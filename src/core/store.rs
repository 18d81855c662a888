use crate::core::address::Address;
use crate::core::constants::*;
use crate::core::data_file::DataFile;
use crate::core::data_page::{store_value, update_value, DataPage};
use crate::core::errors::*;
use crate::core::index::{IndexQuery, KeyIndex, OrderedIndex, Termination};
use crate::core::journal::{Journal, LogRecord};
use crate::core::loggable::Loggable;
use crate::core::metrics::{Metrics, MetricsSnapshot};
use crate::core::pager::{valid_page_size, Pager};
use crate::core::recovery::{self, RecoveryReport};
use crate::core::stream::ValueStream;
use crate::core::transaction::{TransactionTable, TxState, Txn};
use fs2::FileExt;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt;

#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Only used when the file is created.
    pub page_size: usize,
    /// Data cache capacity in pages.
    pub cache_size: usize,
    /// Stamped into every journal record this store writes.
    pub file_id: u8,
    /// Without recovery there is no journal; transactions are bare handles.
    pub recovery_enabled: bool,
    /// Defaults to a quarter of the page's working area.
    pub max_key_size: Option<usize>,
    pub max_value_size: usize,
    /// Smallest free byte count worth keeping in the free-space list.
    pub min_free: usize,
    /// Interval honored by [`ValueStore::sync_if_due`].
    pub sync_period: Duration,
    /// Whether commit waits for the journal to reach the disk.
    pub sync_on_commit: bool,
    pub file_permissions: u32,
    pub read_only: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            cache_size: DEFAULT_CACHE_SIZE,
            file_id: 1,
            recovery_enabled: true,
            max_key_size: None,
            max_value_size: DEFAULT_MAX_VALUE_SIZE,
            min_free: PAGE_MIN_FREE,
            sync_period: Duration::from_millis(DATA_SYNC_PERIOD_MS),
            sync_on_commit: true,
            file_permissions: 0o644,
            read_only: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub page_size: usize,
    pub work_size: usize,
    pub num_pages: u64,
    pub free_pages: usize,
    pub free_space_entries: usize,
    pub cached_pages: usize,
    pub dirty_pages: usize,
    pub keys: usize,
    pub active_transactions: usize,
    pub journal_bytes: u64,
}

/// State guarded by the store lock. Streams share it with the store.
pub(crate) struct StoreInner {
    pub(crate) file: DataFile,
    pub(crate) index: Box<dyn KeyIndex>,
    pub(crate) closed: bool,
    txns: TransactionTable,
    last_sync: Instant,
}

impl StoreInner {
    fn txn_id(&self, txn: Option<&Txn>) -> Result<Option<TransactionID>> {
        match txn {
            Some(txn) => {
                self.txns.check(txn)?;
                Ok(Some(txn.id()))
            }
            None => Ok(None),
        }
    }

    fn read_at(&mut self, address: Address) -> Result<Option<Vec<u8>>> {
        let value = match DataPage::resolve(&mut self.file, address)? {
            Some(page) => page.read(&mut self.file)?,
            None => None,
        };
        if value.is_some() {
            self.file.metrics().value_read();
        }
        Ok(value)
    }

    fn value_len(&mut self, address: Address) -> Result<Option<usize>> {
        match DataPage::resolve(&mut self.file, address)? {
            Some(DataPage::Overflow(chain)) => Ok(Some(chain.value_len(&mut self.file)?)),
            Some(DataPage::Single(address)) => {
                Ok(self.file.page(address.page_num())?.read_tuple(address.slot()).map(|v| v.len()))
            }
            None => Ok(None),
        }
    }

    /// Points `key` at `address` (or drops it), logging the change.
    fn set_key(&mut self, txn: Option<TransactionID>, key: &[u8], new: Option<Address>) -> Result<()> {
        let old = self.index.find_value(key);
        if old == new {
            return Ok(());
        }

        let entry = Loggable::IndexUpdate {
            key: key.to_vec(),
            old,
            new,
        };
        let lsn = self.file.log(txn, &entry)?;
        match new {
            Some(address) => self.index.add_value(key, address),
            None => self.index.remove_value(key),
        };
        self.index.set_lsn(lsn);
        Ok(())
    }

    fn note_write(&mut self, txn: Option<TransactionID>) {
        if let Some(id) = txn {
            self.txns.note_write(id);
        }
    }

    fn flush(&mut self) -> Result<()> {
        self.file.sync()?;
        if let Some(journal) = self.file.journal.as_ref() {
            self.index.set_lsn(journal.current_lsn());
        }
        self.index.flush()?;

        // records of running transactions are still needed for abort
        if self.txns.is_empty() {
            if let Some(journal) = self.file.journal.as_mut() {
                journal.checkpoint()?;
            }
        }
        self.last_sync = Instant::now();
        self.file.metrics().set_dirty_pages(self.file.cache.dirty_count());
        Ok(())
    }
}

/// A durable store of byte values addressed by ordered byte-string keys.
///
/// Values live in record pages (many small tuples per page) or overflow
/// chains (one value spread over linked pages). Mutations given a [`Txn`]
/// are journaled and survive a crash once committed; mutations without one
/// are applied directly and become durable at the next [`flush`].
///
/// All operations take the store lock for their duration. Streams take it
/// only while moving to the next page.
///
/// [`flush`]: ValueStore::flush
pub struct ValueStore {
    inner: Arc<Mutex<StoreInner>>,
    path: PathBuf,
    options: StoreOptions,
    max_key_size: usize,
    metrics: Arc<Metrics>,
    lock_file: File,
    recovery: RecoveryReport,
}

impl ValueStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_options(path, StoreOptions::default())
    }

    pub fn open_with_options(path: impl AsRef<Path>, options: StoreOptions) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if path.as_os_str().is_empty() {
            return Err(Error::Other("store path cannot be empty".to_string()));
        }
        if !valid_page_size(options.page_size) {
            return Err(Error::InvalidPageSize);
        }
        if options.cache_size == 0 {
            return Err(Error::Other("cache size must be at least one page".to_string()));
        }

        let lock_file = open_lock_file(&path, &options)?;
        if options.read_only {
            FileExt::try_lock_shared(&lock_file)?;
        } else {
            FileExt::try_lock_exclusive(&lock_file)?;
        }

        let metrics = Arc::new(Metrics::new());
        let pager = Pager::open(
            &path,
            options.page_size,
            options.file_permissions,
            options.read_only,
            Arc::clone(&metrics),
        )?;
        let work_size = pager.work_size();

        let journal = if options.recovery_enabled && !options.read_only {
            Some(Journal::open(
                &path,
                pager.lsn(),
                options.file_permissions,
                Arc::clone(&metrics),
            )?)
        } else {
            None
        };

        let mut file = DataFile::new(
            pager,
            journal,
            options.cache_size,
            options.file_id,
            options.min_free,
            Arc::clone(&metrics),
        )?;
        let mut index = OrderedIndex::open(&index_path(&path))?;
        let recovery = recovery::recover(&mut file, &mut index)?;

        let max_key_size = options.max_key_size.unwrap_or(work_size / 4);
        info!(
            file = %path.display(),
            page_size = file.pager.page_size(),
            pages = file.pager.num_pages(),
            keys = index.len(),
            "opened value store"
        );

        Ok(Self {
            inner: Arc::new(Mutex::new(StoreInner {
                file,
                index: Box::new(index),
                closed: false,
                txns: TransactionTable::new(),
                last_sync: Instant::now(),
            })),
            path,
            options,
            max_key_size,
            metrics,
            lock_file,
            recovery,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    /// What recovery did when this store was opened.
    pub fn recovery_report(&self) -> &RecoveryReport {
        &self.recovery
    }

    pub fn max_key_size(&self) -> usize {
        self.max_key_size
    }

    fn lock(&self) -> Result<MutexGuard<'_, StoreInner>> {
        let guard = self.inner.lock().map_err(|_| Error::LockPoisoned {
            lock_name: "value store".to_string(),
        })?;
        if guard.closed {
            return Err(Error::StoreClosed);
        }
        Ok(guard)
    }

    fn check_writable(&self, operation: &str) -> Result<()> {
        if self.options.read_only {
            return Err(Error::ReadOnly {
                operation: operation.to_string(),
            });
        }
        Ok(())
    }

    fn check_key(&self, key: &[u8]) -> Result<()> {
        if key.len() > self.max_key_size {
            return Err(Error::KeyTooLarge {
                len: key.len(),
                max: self.max_key_size,
            });
        }
        Ok(())
    }

    fn check_value(&self, len: usize) -> Result<()> {
        if len > self.options.max_value_size {
            return Err(Error::ValueTooLarge {
                len,
                max: self.options.max_value_size,
            });
        }
        Ok(())
    }

    // ---- transactions ----

    pub fn begin(&self) -> Result<Txn> {
        self.check_writable("begin transaction")?;
        let mut inner = self.lock()?;
        let id = inner.file.pager.allocate_transaction_id();
        let start_lsn = inner.file.log(Some(id), &Loggable::TxnStart)?;
        inner.txns.begin(id, start_lsn);
        self.metrics.transaction_begun();
        debug!(txn = id, lsn = start_lsn, "transaction started");
        Ok(Txn::new(id))
    }

    /// Makes the transaction's changes durable (with `sync_on_commit`) and
    /// releases the pages and tuple space it freed.
    pub fn commit(&self, txn: Txn) -> Result<()> {
        let mut inner = self.lock()?;
        inner.txns.check(&txn)?;
        let id = txn.id();

        inner.file.log(Some(id), &Loggable::TxnCommit)?;
        if let Some(journal) = inner.file.journal.as_mut() {
            journal.flush_to_log(self.options.sync_on_commit)?;
        }
        inner.file.release_deferred(id)?;
        inner.file.release_holds(id)?;
        let entry = inner.txns.finish(id, TxState::Committed);

        self.metrics.transaction_committed();
        debug!(txn = id, records = entry.map(|e| e.records).unwrap_or(0), "transaction committed");
        Ok(())
    }

    /// Rolls back every change the transaction made.
    pub fn abort(&self, txn: Txn) -> Result<()> {
        let mut guard = self.lock()?;
        let entry = guard.txns.check(&txn)?;
        let id = txn.id();

        let inner = &mut *guard;
        let undone = recovery::rollback(&mut inner.file, inner.index.as_mut(), id, entry.start_lsn)?;
        inner.file.log(Some(id), &Loggable::TxnAbort)?;
        if let Some(journal) = inner.file.journal.as_mut() {
            journal.flush_to_log(self.options.sync_on_commit)?;
        }
        inner.txns.finish(id, TxState::Aborted);

        self.metrics.transaction_aborted();
        debug!(txn = id, undone, "transaction aborted");
        Ok(())
    }

    // ---- reads ----

    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let mut inner = self.lock()?;
        match inner.index.find_value(key) {
            Some(address) => inner.read_at(address),
            None => Ok(None),
        }
    }

    pub fn get_by_address(&self, address: Address) -> Result<Option<Vec<u8>>> {
        self.lock()?.read_at(address)
    }

    pub fn contains_key(&self, key: &[u8]) -> Result<bool> {
        Ok(self.lock()?.index.find_value(key).is_some())
    }

    /// The address `key` currently maps to.
    pub fn address_of(&self, key: &[u8]) -> Result<Option<Address>> {
        Ok(self.lock()?.index.find_value(key))
    }

    /// A reader over the value that loads one page at a time.
    pub fn get_as_stream(&self, key: &[u8]) -> Result<Option<ValueStream>> {
        let address = match self.lock()?.index.find_value(key) {
            Some(address) => address,
            None => return Ok(None),
        };
        ValueStream::open(Arc::clone(&self.inner), address)
    }

    pub fn get_as_stream_by_address(&self, address: Address) -> Result<Option<ValueStream>> {
        ValueStream::open(Arc::clone(&self.inner), address)
    }

    // ---- writes ----

    /// Stores a value without a key and returns its address.
    pub fn store(&self, txn: Option<&Txn>, value: &[u8]) -> Result<Address> {
        self.check_writable("store")?;
        self.check_value(value.len())?;
        let mut inner = self.lock()?;
        let txn_id = inner.txn_id(txn)?;

        let address = store_value(&mut inner.file, txn_id, value)?;
        inner.note_write(txn_id);
        self.metrics.value_stored();
        Ok(address)
    }

    /// Inserts or replaces the value for `key`. With `overwrite` false an
    /// existing key is left alone and `KeyExists` returned.
    pub fn put(&self, txn: Option<&Txn>, key: &[u8], value: &[u8], overwrite: bool) -> Result<Address> {
        self.check_writable("put")?;
        self.check_key(key)?;
        self.check_value(value.len())?;
        let mut inner = self.lock()?;
        let txn_id = inner.txn_id(txn)?;

        let address = match inner.index.find_value(key) {
            Some(_) if !overwrite => return Err(Error::KeyExists),
            Some(address) => match DataPage::resolve(&mut inner.file, address)? {
                Some(current) => update_value(&mut inner.file, txn_id, current, value)?,
                None => {
                    warn!(key = %String::from_utf8_lossy(key), address = %address, "key maps to a missing value; storing afresh");
                    store_value(&mut inner.file, txn_id, value)?
                }
            },
            None => store_value(&mut inner.file, txn_id, value)?,
        };

        inner.set_key(txn_id, key, Some(address))?;
        inner.note_write(txn_id);
        self.metrics.value_stored();
        Ok(address)
    }

    /// Adds `value` to the end of the value stored under `key`, creating it
    /// if absent. Overflow values grow in place; small values are rewritten.
    pub fn append(&self, txn: Option<&Txn>, key: &[u8], value: &[u8]) -> Result<Address> {
        self.check_writable("append")?;
        self.check_key(key)?;
        self.check_value(value.len())?;
        let mut inner = self.lock()?;
        let txn_id = inner.txn_id(txn)?;

        let address = match inner.index.find_value(key) {
            None => store_value(&mut inner.file, txn_id, value)?,
            Some(address) => {
                let current_len = inner.value_len(address)?.ok_or_else(|| {
                    Error::corruption(
                        "value store",
                        address.page_num(),
                        format!("append target {} is unreadable", address),
                    )
                })?;
                self.check_value(current_len + value.len())?;

                match DataPage::resolve(&mut inner.file, address)? {
                    Some(DataPage::Overflow(chain)) => {
                        chain.append(&mut inner.file, txn_id, value)?;
                        address
                    }
                    Some(current @ DataPage::Single(_)) => {
                        let mut combined = current.read(&mut inner.file)?.unwrap_or_default();
                        combined.extend_from_slice(value);
                        update_value(&mut inner.file, txn_id, current, &combined)?
                    }
                    None => return Err(Error::InvalidAddress { address: address.raw() }),
                }
            }
        };

        inner.set_key(txn_id, key, Some(address))?;
        inner.note_write(txn_id);
        self.metrics.value_stored();
        Ok(address)
    }

    /// Replaces the value at `address` and maps `key` to wherever it ends up.
    pub fn update(&self, txn: Option<&Txn>, address: Address, key: &[u8], value: &[u8]) -> Result<Address> {
        self.check_writable("update")?;
        self.check_key(key)?;
        self.check_value(value.len())?;
        let mut inner = self.lock()?;
        let txn_id = inner.txn_id(txn)?;

        let current = DataPage::resolve(&mut inner.file, address)?
            .ok_or(Error::InvalidAddress { address: address.raw() })?;
        let new_address = update_value(&mut inner.file, txn_id, current, value)?;

        inner.set_key(txn_id, key, Some(new_address))?;
        inner.note_write(txn_id);
        self.metrics.value_stored();
        Ok(new_address)
    }

    /// Deletes the value for `key` and the key itself. Returns the removed
    /// value, or `None` when the key was absent.
    pub fn remove(&self, txn: Option<&Txn>, key: &[u8]) -> Result<Option<Vec<u8>>> {
        self.check_writable("remove")?;
        let mut inner = self.lock()?;
        let txn_id = inner.txn_id(txn)?;

        let address = match inner.index.find_value(key) {
            Some(address) => address,
            None => return Ok(None),
        };
        let removed = match DataPage::resolve(&mut inner.file, address)? {
            Some(page) => page.remove(&mut inner.file, txn_id)?,
            None => {
                return Err(Error::corruption(
                    "value store",
                    address.page_num(),
                    format!("key maps to missing value at {}", address),
                ))
            }
        };

        inner.set_key(txn_id, key, None)?;
        inner.note_write(txn_id);
        self.metrics.value_removed();
        Ok(Some(removed))
    }

    /// Deletes the value at `address`. Keys mapping to it are not touched.
    pub fn remove_by_address(&self, txn: Option<&Txn>, address: Address) -> Result<Vec<u8>> {
        self.check_writable("remove")?;
        let mut inner = self.lock()?;
        let txn_id = inner.txn_id(txn)?;

        let page = DataPage::resolve(&mut inner.file, address)?
            .ok_or(Error::InvalidAddress { address: address.raw() })?;
        let removed = page.remove(&mut inner.file, txn_id)?;
        inner.note_write(txn_id);
        self.metrics.value_removed();
        Ok(removed)
    }

    /// Deletes every key matching `query` and its value. All targets are
    /// checked before anything changes; values then go in page order, each
    /// followed by the keys that mapped to it. Returns the number of keys removed.
    pub fn remove_all(&self, txn: Option<&Txn>, query: &IndexQuery) -> Result<usize> {
        self.check_writable("remove all")?;
        let mut inner = self.lock()?;
        let txn_id = inner.txn_id(txn)?;

        let mut matches = Vec::new();
        inner.index.query(query, &mut |key, address| {
            matches.push((address, key.to_vec()));
            Ok(true)
        })?;
        matches.sort_by_key(|(address, _)| (address.page_num(), address.slot()));
        debug!(count = matches.len(), "collected values to remove");

        let mut targets: Vec<(Address, Option<DataPage>, Vec<Vec<u8>>)> = Vec::new();
        for (address, key) in matches {
            if let Some((last, _, keys)) = targets.last_mut() {
                if *last == address {
                    keys.push(key);
                    continue;
                }
            }
            let page = DataPage::resolve(&mut inner.file, address)?;
            if let Some(page) = &page {
                page.check_removable(&mut inner.file)?;
            }
            targets.push((address, page, vec![key]));
        }

        let mut removed = 0;
        for (address, page, keys) in targets {
            match page {
                Some(page) => {
                    page.remove(&mut inner.file, txn_id)?;
                    self.metrics.value_removed();
                }
                None => warn!(address = %address, "value already gone; dropping its keys"),
            }
            for key in &keys {
                inner.set_key(txn_id, key, None)?;
            }
            removed += keys.len();
        }

        inner.note_write(txn_id);
        Ok(removed)
    }

    // ---- scans ----

    // Runs `query` in batches, releasing the lock between batches. Values
    // are read under the same lock as their keys.
    fn scan(
        &self,
        query: &IndexQuery,
        termination: Option<&Termination>,
        with_values: bool,
        visit: &mut dyn FnMut(Vec<u8>, Address, Option<Vec<u8>>) -> Result<bool>,
    ) -> Result<()> {
        let mut current = query.clone();

        loop {
            let batch = {
                let mut inner = self.lock()?;
                let mut keys = Vec::with_capacity(SCAN_BATCH_SIZE);
                inner.index.query(&current, &mut |key, address| {
                    keys.push((key.to_vec(), address));
                    Ok(keys.len() < SCAN_BATCH_SIZE)
                })?;

                let mut batch = Vec::with_capacity(keys.len());
                for (key, address) in keys {
                    let value = if with_values { inner.read_at(address)? } else { None };
                    batch.push((key, address, value));
                }
                batch
            };

            let full = batch.len() == SCAN_BATCH_SIZE;
            let mut last_key = None;
            for (key, address, value) in batch {
                if let Some(token) = termination {
                    token.check("scan")?;
                }
                if with_values && value.is_none() {
                    warn!(key = %String::from_utf8_lossy(&key), address = %address, "skipping key without readable value");
                    last_key = Some(key);
                    continue;
                }
                let resume = key.clone();
                if !visit(key, address, value)? {
                    return Ok(());
                }
                last_key = Some(resume);
            }

            match last_key {
                Some(key) if full => current = query.resume_after(&key),
                _ => return Ok(()),
            }
        }
    }

    /// Streams `(key, address)` for every match until the callback returns `false`.
    pub fn find<F>(&self, query: &IndexQuery, termination: Option<&Termination>, mut callback: F) -> Result<()>
    where
        F: FnMut(&[u8], Address) -> Result<bool>,
    {
        self.scan(query, termination, false, &mut |key, address, _| callback(&key, address))
    }

    pub fn find_keys(&self, query: &IndexQuery, termination: Option<&Termination>) -> Result<Vec<Vec<u8>>> {
        let mut keys = Vec::new();
        self.scan(query, termination, false, &mut |key, _, _| {
            keys.push(key);
            Ok(true)
        })?;
        Ok(keys)
    }

    pub fn find_values(&self, query: &IndexQuery, termination: Option<&Termination>) -> Result<Vec<Vec<u8>>> {
        let mut values = Vec::new();
        self.scan(query, termination, true, &mut |_, _, value| {
            values.extend(value);
            Ok(true)
        })?;
        Ok(values)
    }

    pub fn find_entries(
        &self,
        query: &IndexQuery,
        termination: Option<&Termination>,
    ) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut entries = Vec::new();
        self.scan(query, termination, true, &mut |key, _, value| {
            if let Some(value) = value {
                entries.push((key, value));
            }
            Ok(true)
        })?;
        Ok(entries)
    }

    pub fn keys(&self) -> Result<Vec<Vec<u8>>> {
        self.find_keys(&IndexQuery::All, None)
    }

    pub fn values(&self) -> Result<Vec<Vec<u8>>> {
        self.find_values(&IndexQuery::All, None)
    }

    pub fn entries(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        self.find_entries(&IndexQuery::All, None)
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.lock()?.index.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    // ---- maintenance ----

    /// Writes dirty pages, the file header and the key index. The journal is
    /// truncated when no transaction is running.
    pub fn flush(&self) -> Result<()> {
        if self.options.read_only {
            return Ok(());
        }
        self.lock()?.flush()
    }

    /// Flushes when the sync period has elapsed since the last flush.
    /// Returns whether it flushed.
    pub fn sync_if_due(&self) -> Result<bool> {
        if self.options.read_only {
            return Ok(false);
        }
        let mut inner = self.lock()?;
        if inner.last_sync.elapsed() < self.options.sync_period {
            return Ok(false);
        }
        inner.flush()?;
        Ok(true)
    }

    /// Flushes and closes the store. Running transactions are left for
    /// recovery to roll back.
    pub fn close(&self) -> Result<()> {
        let mut inner = self.lock()?;
        if !self.options.read_only {
            if !inner.txns.is_empty() {
                warn!(active = ?inner.txns.ids(), "closing with running transactions");
            }
            inner.flush()?;
            if let Some(journal) = inner.file.journal.as_mut() {
                journal.close()?;
            }
        }
        inner.closed = true;
        FileExt::unlock(&self.lock_file)?;
        info!(file = %self.path.display(), "closed value store");
        Ok(())
    }

    pub fn stats(&self) -> Result<StoreStats> {
        let inner = self.lock()?;
        Ok(StoreStats {
            page_size: inner.file.pager.page_size(),
            work_size: inner.file.work_size(),
            num_pages: inner.file.pager.num_pages(),
            free_pages: inner.file.pager.free_pages().len(),
            free_space_entries: inner.file.free_space.len(),
            cached_pages: inner.file.cache.len(),
            dirty_pages: inner.file.cache.dirty_count(),
            keys: inner.index.len(),
            active_transactions: inner.txns.len(),
            journal_bytes: inner.file.journal.as_ref().map(|j| j.size()).unwrap_or(0),
        })
    }

    /// Logs the free-space list at debug level.
    pub fn debug_free_list(&self) -> Result<()> {
        self.lock()?.file.debug_free_list();
        Ok(())
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Every record currently in the journal.
    pub fn journal_records(&self) -> Result<Vec<LogRecord>> {
        let mut inner = self.lock()?;
        match inner.file.journal.as_mut() {
            Some(journal) => journal.read_all(),
            None => Ok(Vec::new()),
        }
    }
}

impl Drop for ValueStore {
    fn drop(&mut self) {
        if let Ok(mut inner) = self.inner.lock() {
            if inner.closed {
                return;
            }
            // Drop can't report errors
            if !self.options.read_only {
                let _ = inner.flush();
                if let Some(journal) = inner.file.journal.as_mut() {
                    let _ = journal.close();
                }
            }
            inner.closed = true;
        }
        let _ = FileExt::unlock(&self.lock_file);
    }
}

fn index_path(path: &Path) -> PathBuf {
    let mut index = path.as_os_str().to_owned();
    index.push("-index");
    PathBuf::from(index)
}

#[cfg_attr(not(unix), allow(unused_variables))]
fn open_lock_file(path: &Path, options: &StoreOptions) -> Result<File> {
    let mut lock_path = path.as_os_str().to_owned();
    lock_path.push(".lock");

    let mut open = OpenOptions::new();
    open.read(true).write(true).create(true);
    #[cfg(unix)]
    open.mode(options.file_permissions);
    Ok(open.open(PathBuf::from(lock_path))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn small_options() -> StoreOptions {
        StoreOptions {
            page_size: 1024,
            cache_size: 32,
            ..StoreOptions::default()
        }
    }

    fn open(dir: &TempDir) -> ValueStore {
        ValueStore::open_with_options(dir.path().join("store.db"), small_options()).unwrap()
    }

    #[test]
    fn test_put_get_remove() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);

        store.put(None, b"a", b"alpha", true).unwrap();
        assert_eq!(store.get(b"a").unwrap().unwrap(), b"alpha");
        assert!(store.contains_key(b"a").unwrap());

        assert_eq!(store.remove(None, b"a").unwrap().unwrap(), b"alpha");
        assert!(store.get(b"a").unwrap().is_none());
        assert!(store.remove(None, b"a").unwrap().is_none());
    }

    #[test]
    fn test_put_without_overwrite() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);

        store.put(None, b"k", b"first", false).unwrap();
        assert!(matches!(store.put(None, b"k", b"second", false), Err(Error::KeyExists)));
        assert_eq!(store.get(b"k").unwrap().unwrap(), b"first");
    }

    #[test]
    fn test_limits_checked_before_allocation() {
        let dir = TempDir::new().unwrap();
        let store = ValueStore::open_with_options(
            dir.path().join("limits.db"),
            StoreOptions {
                max_value_size: 100,
                ..small_options()
            },
        )
        .unwrap();
        let pages = store.stats().unwrap().num_pages;

        let key = vec![b'k'; store.max_key_size() + 1];
        assert!(matches!(store.put(None, &key, b"v", true), Err(Error::KeyTooLarge { .. })));
        assert!(matches!(
            store.put(None, b"k", &[0u8; 101], true),
            Err(Error::ValueTooLarge { len: 101, max: 100 })
        ));
        store.put(None, b"k", &[0u8; 60], true).unwrap();
        assert!(matches!(store.append(None, b"k", &[0u8; 60]), Err(Error::ValueTooLarge { .. })));
        assert_eq!(store.stats().unwrap().num_pages, pages + 1);
    }

    #[test]
    fn test_finished_transaction_is_rejected() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);

        let txn = store.begin().unwrap();
        store.put(Some(&txn), b"k", b"v", true).unwrap();
        let stale = Txn::new(txn.id());
        store.commit(txn).unwrap();

        assert!(matches!(
            store.put(Some(&stale), b"k", b"w", true),
            Err(Error::TxNotActive { .. })
        ));
    }

    #[test]
    fn test_abort_restores_previous_value() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);
        store.put(None, b"doc", b"original", true).unwrap();

        let txn = store.begin().unwrap();
        store.put(Some(&txn), b"doc", &vec![5u8; 2000], true).unwrap();
        store.put(Some(&txn), b"new", b"fresh", true).unwrap();
        store.abort(txn).unwrap();

        assert_eq!(store.get(b"doc").unwrap().unwrap(), b"original");
        assert!(store.get(b"new").unwrap().is_none());
        assert_eq!(store.metrics().transactions_aborted, 1);
    }

    #[test]
    fn test_read_only_rejects_writes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("ro.db");
        {
            let store = ValueStore::open_with_options(&path, small_options()).unwrap();
            store.put(None, b"k", b"v", true).unwrap();
            store.close().unwrap();
        }

        let store = ValueStore::open_with_options(
            &path,
            StoreOptions {
                read_only: true,
                ..small_options()
            },
        )
        .unwrap();
        assert_eq!(store.get(b"k").unwrap().unwrap(), b"v");
        assert!(matches!(store.put(None, b"k", b"w", true), Err(Error::ReadOnly { .. })));
        assert!(matches!(store.begin(), Err(Error::ReadOnly { .. })));
    }

    #[test]
    fn test_closed_store_rejects_calls() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);
        store.close().unwrap();
        assert!(matches!(store.get(b"k"), Err(Error::StoreClosed)));
    }

    #[test]
    fn test_second_writer_is_locked_out() {
        let dir = TempDir::new().unwrap();
        let _store = open(&dir);
        assert!(ValueStore::open_with_options(dir.path().join("store.db"), small_options()).is_err());
    }

    #[test]
    fn test_stats_track_pages_and_keys() {
        let dir = TempDir::new().unwrap();
        let store = open(&dir);
        store.put(None, b"big", &vec![1u8; 3000], true).unwrap();
        store.put(None, b"small", b"s", true).unwrap();

        let stats = store.stats().unwrap();
        assert_eq!(stats.page_size, 1024);
        assert_eq!(stats.work_size, 1024 - PAGE_HEADER_SIZE);
        assert_eq!(stats.keys, 2);
        assert_eq!(stats.num_pages, 1 + 4 + 1);

        store.flush().unwrap();
        assert_eq!(store.stats().unwrap().dirty_pages, 0);
    }

    #[test]
    fn test_sync_if_due_honors_period() {
        let dir = TempDir::new().unwrap();
        let store = ValueStore::open_with_options(
            dir.path().join("periodic.db"),
            StoreOptions {
                sync_period: Duration::from_secs(3600),
                ..small_options()
            },
        )
        .unwrap();
        store.put(None, b"k", b"v", true).unwrap();
        assert!(!store.sync_if_due().unwrap());
        assert!(store.stats().unwrap().dirty_pages > 0);

        let eager = ValueStore::open_with_options(
            dir.path().join("eager.db"),
            StoreOptions {
                sync_period: Duration::ZERO,
                ..small_options()
            },
        )
        .unwrap();
        eager.put(None, b"k", b"v", true).unwrap();
        assert!(eager.sync_if_due().unwrap());
        assert_eq!(eager.stats().unwrap().dirty_pages, 0);
        eager.debug_free_list().unwrap();
    }
}
