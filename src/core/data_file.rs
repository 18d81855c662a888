use crate::core::constants::*;
use crate::core::errors::*;
use crate::core::free_space::FreeSpaceList;
use crate::core::journal::Journal;
use crate::core::loggable::Loggable;
use crate::core::lru_cache::{DataCache, PinGuard};
use crate::core::metrics::Metrics;
use crate::core::page::Page;
use crate::core::pager::Pager;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

/// Everything owned by one open data file: the paged file, its page cache,
/// free-space list and (when recovery is enabled) the journal.
pub struct DataFile {
    pub(crate) pager: Pager,
    pub(crate) cache: DataCache,
    pub(crate) journal: Option<Journal>,
    pub(crate) free_space: FreeSpaceList,
    /// Pages emptied by a running transaction; handed to the allocator on commit.
    deferred_free: HashMap<TransactionID, Vec<PageNum>>,
    /// Tuples removed by a running transaction. Their tids and bytes stay
    /// reserved until it finishes so an abort can put them back.
    held: HashMap<TransactionID, Vec<SlotHold>>,
    file_id: u8,
    min_free: usize,
    metrics: Arc<Metrics>,
}

#[derive(Debug, Clone, Copy)]
struct SlotHold {
    page: PageNum,
    tid: SlotId,
    bytes: usize,
}

impl DataFile {
    pub fn new(
        pager: Pager,
        journal: Option<Journal>,
        cache_size: usize,
        file_id: u8,
        min_free: usize,
        metrics: Arc<Metrics>,
    ) -> Result<Self> {
        let free_space = match FreeSpaceList::deserialize(pager.header_payload()) {
            Ok(list) => list,
            Err(e) => {
                // the list is only an allocation hint
                warn!(error = %e, "discarding unreadable free-space list");
                FreeSpaceList::new()
            }
        };

        Ok(Self {
            pager,
            cache: DataCache::new(cache_size, Arc::clone(&metrics)),
            journal,
            free_space,
            deferred_free: HashMap::new(),
            held: HashMap::new(),
            file_id,
            min_free,
            metrics,
        })
    }

    pub fn file_id(&self) -> u8 {
        self.file_id
    }

    pub fn work_size(&self) -> usize {
        self.pager.work_size()
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Record pages with less usable room than this stay off the free-space list.
    pub fn min_free(&self) -> usize {
        self.min_free
    }

    /// Values whose encoded tuple exceeds this go to an overflow chain.
    pub fn max_single_size(&self) -> usize {
        self.work_size() / 2
    }

    fn load(&mut self, page_num: PageNum) -> Result<()> {
        if self.cache.contains(page_num) {
            self.metrics.cache_hit();
            return Ok(());
        }
        self.metrics.cache_miss();

        let buf = self.pager.read_page(page_num)?;
        let page = Page::from_bytes(page_num, &buf);
        self.pager.recycle(buf);
        let page = page?;

        let victims = self.cache.add(page, 0, false);
        self.write_victims(victims)
    }

    pub fn page(&mut self, page_num: PageNum) -> Result<&Page> {
        self.load(page_num)?;
        self.cache
            .get(page_num)
            .ok_or(Error::InvalidPageNum { page_num })
    }

    pub fn page_mut(&mut self, page_num: PageNum) -> Result<&mut Page> {
        self.load(page_num)?;
        self.cache
            .get_mut(page_num)
            .ok_or(Error::InvalidPageNum { page_num })
    }

    /// Whether `page_num` names an allocated data page.
    pub fn is_valid_page(&self, page_num: PageNum) -> bool {
        page_num != 0 && page_num < self.pager.num_pages()
    }

    pub fn pin(&mut self, page_num: PageNum) -> Result<PinGuard> {
        self.load(page_num)?;
        self.cache
            .pin(page_num)
            .ok_or(Error::InvalidPageNum { page_num })
    }

    /// Puts a freshly initialized page in the cache as dirty.
    pub fn install(&mut self, page: Page) -> Result<()> {
        let victims = self.cache.add(page, 1, true);
        self.write_victims(victims)
    }

    fn write_victims(&mut self, victims: Vec<Page>) -> Result<()> {
        for page in victims {
            self.write_out(&page)?;
        }
        Ok(())
    }

    // Log before data: the journal must be durable through the page's LSN.
    fn write_out(&mut self, page: &Page) -> Result<()> {
        if let Some(journal) = self.journal.as_mut() {
            journal.flush_through(page.lsn())?;
        }
        let bytes = page.to_bytes();
        self.pager.write_page(page.num(), &bytes)
    }

    /// Appends `entry` to the journal on behalf of `txn` and returns the LSN
    /// to stamp on the affected pages. Without a transaction nothing is
    /// logged and the journal's current position is returned instead.
    pub fn log(&mut self, txn: Option<TransactionID>, entry: &Loggable) -> Result<Lsn> {
        match (txn, self.journal.as_mut()) {
            (Some(txn_id), Some(journal)) => journal.write(txn_id, entry),
            (None, Some(journal)) => Ok(journal.current_lsn()),
            (_, None) => Ok(LSN_INVALID),
        }
    }

    pub fn alloc_page(&mut self) -> Result<PageNum> {
        self.pager.alloc_page()
    }

    /// Marks a page free on disk and returns it to the allocator. A page
    /// emptied inside a transaction is held back until that transaction
    /// commits, so an abort can restore it in place.
    pub fn drop_page(&mut self, page_num: PageNum, lsn: Lsn, txn: Option<TransactionID>) -> Result<()> {
        let page = self.page_mut(page_num)?;
        page.clear(FREE_LIST);
        page.stamp_lsn(lsn);
        self.free_space.remove(page_num);

        match txn {
            Some(txn_id) if self.journal.is_some() => {
                self.deferred_free.entry(txn_id).or_default().push(page_num);
                debug!(page = page_num, txn = txn_id, "page release deferred to commit");
            }
            _ => {
                self.pager.free_page(page_num)?;
                debug!(page = page_num, "page returned to allocator");
            }
        }
        Ok(())
    }

    /// Hands the pages `txn` emptied to the allocator.
    pub fn release_deferred(&mut self, txn: TransactionID) -> Result<()> {
        for page_num in self.deferred_free.remove(&txn).unwrap_or_default() {
            self.pager.free_page(page_num)?;
        }
        Ok(())
    }

    /// Forgets the pages `txn` emptied; its rollback has restored them.
    pub fn discard_deferred(&mut self, txn: TransactionID) {
        self.deferred_free.remove(&txn);
    }

    /// Reserves a removed tuple's tid and bytes for `txn`'s rollback.
    /// Without a transaction or a journal there is no rollback to serve.
    pub fn hold_slot(&mut self, txn: Option<TransactionID>, page: PageNum, tid: SlotId, bytes: usize) {
        if let (Some(txn_id), Some(_)) = (txn, self.journal.as_ref()) {
            self.held.entry(txn_id).or_default().push(SlotHold { page, tid, bytes });
        }
    }

    fn holds_on(&self, page_num: PageNum) -> Vec<SlotHold> {
        self.held
            .values()
            .flatten()
            .filter(|h| h.page == page_num)
            .copied()
            .collect()
    }

    pub fn has_holds(&self, page_num: PageNum) -> bool {
        self.held.values().flatten().any(|h| h.page == page_num)
    }

    /// Free bytes and the lowest free tid of a record page, minus what
    /// running transactions hold.
    pub fn usable_room(&mut self, page_num: PageNum) -> Result<(usize, Option<SlotId>)> {
        let holds = self.holds_on(page_num);
        let reserved: usize = holds.iter().map(|h| h.bytes).sum();
        let page = self.page(page_num)?;
        let free = page.free_space().saturating_sub(reserved);
        let slot = page.free_slot_where(|tid| holds.iter().all(|h| h.tid != tid));
        Ok((free, slot))
    }

    /// Lifts the holds of a finished transaction. Record pages left without
    /// tuples go back to the allocator.
    pub fn release_holds(&mut self, txn: TransactionID) -> Result<()> {
        let mut pages: Vec<PageNum> = self
            .held
            .remove(&txn)
            .unwrap_or_default()
            .into_iter()
            .map(|h| h.page)
            .collect();
        pages.sort_unstable();
        pages.dedup();

        for page_num in pages {
            if !self.is_valid_page(page_num) {
                continue;
            }
            let (status, records) = {
                let page = self.page(page_num)?;
                (page.status(), page.records())
            };
            if status != RECORD {
                continue;
            }
            if records == 0 && !self.has_holds(page_num) {
                let lsn = self.current_lsn();
                self.drop_page(page_num, lsn, None)?;
            } else {
                self.refresh_free_space(page_num)?;
            }
        }
        Ok(())
    }

    fn current_lsn(&self) -> Lsn {
        self.journal.as_ref().map(|j| j.current_lsn()).unwrap_or(LSN_INVALID)
    }

    /// Brings the free-space entry for a record page in line with the page.
    pub fn refresh_free_space(&mut self, page_num: PageNum) -> Result<()> {
        if self.page(page_num)?.status() != RECORD {
            self.free_space.remove(page_num);
            return Ok(());
        }
        let (free, slot) = self.usable_room(page_num)?;

        if slot.is_some() && free >= self.min_free {
            self.free_space.add(page_num, free as u32);
        } else {
            self.free_space.remove(page_num);
        }
        Ok(())
    }

    /// Recomputes the free-space list and the allocator's free pages by
    /// reading every page.
    pub fn rebuild_free_space(&mut self) -> Result<()> {
        self.free_space.clear();
        let mut free_pages = Vec::new();

        for page_num in 1..self.pager.num_pages() {
            let status = match self.page(page_num) {
                Ok(page) => page.status(),
                Err(e) => {
                    warn!(page = page_num, error = %e, "unreadable page while rebuilding free space");
                    self.metrics.corruption_warning();
                    continue;
                }
            };
            match status {
                RECORD => {
                    if self.page(page_num)?.records() == 0 {
                        free_pages.push(page_num);
                    } else {
                        self.refresh_free_space(page_num)?;
                    }
                }
                FREE_LIST | STATUS_UNUSED => free_pages.push(page_num),
                _ => {}
            }
        }

        debug!(
            entries = self.free_space.len(),
            free_pages = free_pages.len(),
            "rebuilt free-space list"
        );
        self.pager.set_free_pages(free_pages);
        Ok(())
    }

    /// Writes every dirty page, then the header and fsyncs the data file.
    pub fn sync(&mut self) -> Result<()> {
        for (page_num, lsn) in self.cache.dirty_pages() {
            if let Some(journal) = self.journal.as_mut() {
                journal.flush_through(lsn)?;
            }
            let bytes = match self.cache.peek(page_num) {
                Some(page) => page.to_bytes(),
                None => continue,
            };
            self.pager.write_page(page_num, &bytes)?;
            self.cache.mark_clean(page_num);
        }

        if let Some(journal) = self.journal.as_ref() {
            self.pager.set_lsn(journal.current_lsn());
        }
        let payload = self.free_space.serialize(self.pager.header_payload_capacity());
        self.pager.set_header_payload(payload);
        self.pager.write_header()?;
        self.pager.sync()
    }

    pub fn debug_free_list(&self) {
        self.free_space.debug_dump();
    }
}
