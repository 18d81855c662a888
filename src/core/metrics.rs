use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

/// Counters collected by one store instance.
/// All fields are atomics so the hot paths never take a lock to record them.
#[derive(Debug)]
pub struct Metrics {
    // Transaction metrics
    transactions_begun: AtomicU64,
    transactions_committed: AtomicU64,
    transactions_aborted: AtomicU64,
    active_transactions: AtomicUsize,

    // Page metrics
    pages_read: AtomicU64,
    pages_written: AtomicU64,
    pages_allocated: AtomicU64,
    pages_freed: AtomicU64,
    overflow_pages_created: AtomicU64,

    // Cache metrics
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
    cache_evictions: AtomicU64,
    dirty_pages: AtomicUsize,

    // Journal metrics
    journal_records: AtomicU64,
    journal_bytes_written: AtomicU64,
    journal_flushes: AtomicU64,
    checkpoints: AtomicU64,

    // Recovery metrics
    recoveries: AtomicU64,
    records_redone: AtomicU64,
    records_undone: AtomicU64,

    // Operation metrics
    values_stored: AtomicU64,
    values_removed: AtomicU64,
    values_read: AtomicU64,

    corruption_warnings: AtomicU64,
}

/// Point-in-time copy of [`Metrics`] with derived ratios.
#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricsSnapshot {
    pub transactions_begun: u64,
    pub transactions_committed: u64,
    pub transactions_aborted: u64,
    pub active_transactions: usize,

    pub pages_read: u64,
    pub pages_written: u64,
    pub pages_allocated: u64,
    pub pages_freed: u64,
    pub overflow_pages_created: u64,

    pub cache_hits: u64,
    pub cache_misses: u64,
    pub cache_evictions: u64,
    pub cache_hit_rate: f64,
    pub dirty_pages: usize,

    pub journal_records: u64,
    pub journal_bytes_written: u64,
    pub journal_flushes: u64,
    pub checkpoints: u64,

    pub recoveries: u64,
    pub records_redone: u64,
    pub records_undone: u64,

    pub values_stored: u64,
    pub values_removed: u64,
    pub values_read: u64,
    pub total_value_operations: u64,

    pub corruption_warnings: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            transactions_begun: AtomicU64::new(0),
            transactions_committed: AtomicU64::new(0),
            transactions_aborted: AtomicU64::new(0),
            active_transactions: AtomicUsize::new(0),

            pages_read: AtomicU64::new(0),
            pages_written: AtomicU64::new(0),
            pages_allocated: AtomicU64::new(0),
            pages_freed: AtomicU64::new(0),
            overflow_pages_created: AtomicU64::new(0),

            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
            cache_evictions: AtomicU64::new(0),
            dirty_pages: AtomicUsize::new(0),

            journal_records: AtomicU64::new(0),
            journal_bytes_written: AtomicU64::new(0),
            journal_flushes: AtomicU64::new(0),
            checkpoints: AtomicU64::new(0),

            recoveries: AtomicU64::new(0),
            records_redone: AtomicU64::new(0),
            records_undone: AtomicU64::new(0),

            values_stored: AtomicU64::new(0),
            values_removed: AtomicU64::new(0),
            values_read: AtomicU64::new(0),

            corruption_warnings: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn transaction_begun(&self) {
        self.transactions_begun.fetch_add(1, Ordering::Relaxed);
        self.active_transactions.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn transaction_committed(&self) {
        self.transactions_committed.fetch_add(1, Ordering::Relaxed);
        self.active_transactions.fetch_sub(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn transaction_aborted(&self) {
        self.transactions_aborted.fetch_add(1, Ordering::Relaxed);
        self.active_transactions.fetch_sub(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn page_read(&self) {
        self.pages_read.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn page_written(&self) {
        self.pages_written.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn page_allocated(&self) {
        self.pages_allocated.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn page_freed(&self) {
        self.pages_freed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn overflow_page_created(&self) {
        self.overflow_pages_created.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn cache_hit(&self) {
        self.cache_hits.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn cache_miss(&self) {
        self.cache_misses.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn cache_eviction(&self) {
        self.cache_evictions.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn set_dirty_pages(&self, count: usize) {
        self.dirty_pages.store(count, Ordering::Relaxed);
    }

    #[inline]
    pub fn journal_write(&self, bytes: u64) {
        self.journal_records.fetch_add(1, Ordering::Relaxed);
        self.journal_bytes_written.fetch_add(bytes, Ordering::Relaxed);
    }

    #[inline]
    pub fn journal_flushed(&self) {
        self.journal_flushes.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn checkpoint_completed(&self) {
        self.checkpoints.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn recovery_completed(&self, redone: u64, undone: u64) {
        self.recoveries.fetch_add(1, Ordering::Relaxed);
        self.records_redone.fetch_add(redone, Ordering::Relaxed);
        self.records_undone.fetch_add(undone, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_undone(&self) {
        self.records_undone.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn value_stored(&self) {
        self.values_stored.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn value_removed(&self) {
        self.values_removed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn value_read(&self) {
        self.values_read.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn corruption_warning(&self) {
        self.corruption_warnings.fetch_add(1, Ordering::Relaxed);
    }

    /// Relaxed loads; the snapshot is for monitoring, not for coordination.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let cache_hits = self.cache_hits.load(Ordering::Relaxed);
        let cache_misses = self.cache_misses.load(Ordering::Relaxed);
        let cache_total = cache_hits + cache_misses;

        let values_stored = self.values_stored.load(Ordering::Relaxed);
        let values_removed = self.values_removed.load(Ordering::Relaxed);
        let values_read = self.values_read.load(Ordering::Relaxed);

        MetricsSnapshot {
            transactions_begun: self.transactions_begun.load(Ordering::Relaxed),
            transactions_committed: self.transactions_committed.load(Ordering::Relaxed),
            transactions_aborted: self.transactions_aborted.load(Ordering::Relaxed),
            active_transactions: self.active_transactions.load(Ordering::Relaxed),

            pages_read: self.pages_read.load(Ordering::Relaxed),
            pages_written: self.pages_written.load(Ordering::Relaxed),
            pages_allocated: self.pages_allocated.load(Ordering::Relaxed),
            pages_freed: self.pages_freed.load(Ordering::Relaxed),
            overflow_pages_created: self.overflow_pages_created.load(Ordering::Relaxed),

            cache_hits,
            cache_misses,
            cache_evictions: self.cache_evictions.load(Ordering::Relaxed),
            cache_hit_rate: if cache_total > 0 {
                cache_hits as f64 / cache_total as f64
            } else {
                0.0
            },
            dirty_pages: self.dirty_pages.load(Ordering::Relaxed),

            journal_records: self.journal_records.load(Ordering::Relaxed),
            journal_bytes_written: self.journal_bytes_written.load(Ordering::Relaxed),
            journal_flushes: self.journal_flushes.load(Ordering::Relaxed),
            checkpoints: self.checkpoints.load(Ordering::Relaxed),

            recoveries: self.recoveries.load(Ordering::Relaxed),
            records_redone: self.records_redone.load(Ordering::Relaxed),
            records_undone: self.records_undone.load(Ordering::Relaxed),

            values_stored,
            values_removed,
            values_read,
            total_value_operations: values_stored + values_removed + values_read,

            corruption_warnings: self.corruption_warnings.load(Ordering::Relaxed),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
