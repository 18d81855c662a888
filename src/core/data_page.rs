use crate::core::address::Address;
use crate::core::constants::*;
use crate::core::data_file::DataFile;
use crate::core::errors::*;
use crate::core::loggable::{rewrite_page, set_chain_length, write_at, Loggable};
use crate::core::page::Page;
use std::collections::HashSet;
use tracing::warn;

/// A stored value's physical home, decided by the status of the page its
/// address points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataPage {
    Single(Address),
    Overflow(OverflowChain),
}

impl DataPage {
    /// Looks at the page behind `address`. `None` when the address does not
    /// lead to a live record page or chain head.
    pub fn resolve(file: &mut DataFile, address: Address) -> Result<Option<DataPage>> {
        if address.is_unknown() || !file.is_valid_page(address.page_num()) {
            warn!(address = %address, "address points outside the data file");
            file.metrics().corruption_warning();
            return Ok(None);
        }

        let status = file.page(address.page_num())?.status();
        match status {
            RECORD if address.slot() >= FIRST_RECORD_SLOT => Ok(Some(DataPage::Single(address))),
            OVERFLOW if address.slot() == OVERFLOW_SLOT => {
                Ok(Some(DataPage::Overflow(OverflowChain::new(address.page_num()))))
            }
            RECORD | OVERFLOW => {
                warn!(address = %address, status, "slot does not match the page kind; stale address");
                file.metrics().corruption_warning();
                Ok(None)
            }
            other => {
                warn!(address = %address, status = other, "address points at a page without a value");
                file.metrics().corruption_warning();
                Ok(None)
            }
        }
    }

    pub fn address(&self) -> Address {
        match self {
            DataPage::Single(address) => *address,
            DataPage::Overflow(chain) => chain.address(),
        }
    }

    /// Reads the whole value. Corrupt tuples read as absent.
    pub fn read(&self, file: &mut DataFile) -> Result<Option<Vec<u8>>> {
        match self {
            DataPage::Single(address) => read_single(file, *address),
            DataPage::Overflow(chain) => chain.read(file),
        }
    }

    /// Fails with `Corruption` where `remove` would, without changing anything.
    pub fn check_removable(&self, file: &mut DataFile) -> Result<()> {
        match self {
            DataPage::Single(address) => match file.page(address.page_num())?.read_tuple(address.slot()) {
                Some(_) => Ok(()),
                None => Err(Error::corruption(
                    "record page",
                    address.page_num(),
                    format!("no readable tuple in slot {}", address.slot()),
                )),
            },
            DataPage::Overflow(chain) => {
                chain.value_len(file)?;
                chain.pages(file).map(|_| ())
            }
        }
    }

    pub fn remove(&self, file: &mut DataFile, txn: Option<TransactionID>) -> Result<Vec<u8>> {
        match self {
            DataPage::Single(address) => remove_single(file, txn, *address),
            DataPage::Overflow(chain) => chain.delete(file, txn),
        }
    }
}

/// Whether a value of `len` bytes needs an overflow chain.
pub fn is_overflow_size(file: &DataFile, len: usize) -> bool {
    len + TUPLE_OVERHEAD > file.max_single_size()
}

/// Stores `value` as a single tuple or an overflow chain, whichever fits.
pub fn store_value(file: &mut DataFile, txn: Option<TransactionID>, value: &[u8]) -> Result<Address> {
    if is_overflow_size(file, value.len()) {
        Ok(OverflowChain::create(file, txn, value)?.address())
    } else {
        store_single(file, txn, value)
    }
}

// Finds a record page with room for `needed` bytes and a free slot,
// dropping or correcting stale free-space entries on the way.
fn find_page_with_room(file: &mut DataFile, needed: usize) -> Result<Option<(PageNum, SlotId)>> {
    while let Some(entry) = file.free_space.find(needed) {
        if !file.is_valid_page(entry.page) {
            file.free_space.remove(entry.page);
            continue;
        }

        if file.page(entry.page)?.status() != RECORD {
            file.free_space.remove(entry.page);
            continue;
        }
        let (real_free, slot) = file.usable_room(entry.page)?;

        match slot {
            Some(tid) if real_free >= needed => return Ok(Some((entry.page, tid))),
            Some(_) if real_free >= file.min_free() => file.free_space.adjust(entry.page, real_free as u32),
            _ => {
                file.free_space.remove(entry.page);
            }
        }
    }
    Ok(None)
}

pub fn store_single(file: &mut DataFile, txn: Option<TransactionID>, value: &[u8]) -> Result<Address> {
    let needed = value.len() + TUPLE_OVERHEAD;

    let (page_num, tid) = match find_page_with_room(file, needed)? {
        Some(found) => found,
        None => {
            let page_num = file.alloc_page()?;
            let lsn = file.log(txn, &Loggable::CreatePage { file_id: file.file_id(), page: page_num })?;
            let mut page = Page::new_record(page_num, file.work_size());
            page.stamp_lsn(lsn);
            file.install(page)?;
            (page_num, FIRST_RECORD_SLOT)
        }
    };

    store_tuple_at(file, txn, page_num, tid, value)?;
    Ok(Address::new(page_num, tid))
}

fn store_tuple_at(
    file: &mut DataFile,
    txn: Option<TransactionID>,
    page_num: PageNum,
    tid: SlotId,
    value: &[u8],
) -> Result<()> {
    let entry = Loggable::StoreValue {
        file_id: file.file_id(),
        page: page_num,
        tid,
        value: value.to_vec(),
    };
    let lsn = file.log(txn, &entry)?;

    let page = file.page_mut(page_num)?;
    page.store_tuple(tid, value)?;
    page.stamp_lsn(lsn);
    file.refresh_free_space(page_num)
}

fn read_single(file: &mut DataFile, address: Address) -> Result<Option<Vec<u8>>> {
    let page = file.page(address.page_num())?;
    match page.read_tuple(address.slot()) {
        Some(bytes) => Ok(Some(bytes.to_vec())),
        None => {
            if page.find_slot_offset(address.slot()).is_some() {
                file.metrics().corruption_warning();
            }
            Ok(None)
        }
    }
}

fn remove_single(file: &mut DataFile, txn: Option<TransactionID>, address: Address) -> Result<Vec<u8>> {
    let page_num = address.page_num();
    let tid = address.slot();

    let old_value = match file.page(page_num)?.read_tuple(tid) {
        Some(bytes) => bytes.to_vec(),
        None => {
            return Err(Error::corruption(
                "record page",
                page_num,
                format!("no readable tuple in slot {}", tid),
            ))
        }
    };

    let entry = Loggable::RemoveValue {
        file_id: file.file_id(),
        page: page_num,
        tid,
        old_value: old_value.clone(),
    };
    let lsn = file.log(txn, &entry)?;

    let page = file.page_mut(page_num)?;
    page.remove_slot(tid);
    page.stamp_lsn(lsn);
    let emptied = page.records() == 0;

    // a page still holding tuples for another rollback stays a record page
    if emptied && !file.has_holds(page_num) {
        let lsn = file.log(txn, &Loggable::RemoveEmptyPage { file_id: file.file_id(), page: page_num })?;
        file.drop_page(page_num, lsn, txn)?;
    } else {
        file.hold_slot(txn, page_num, tid, old_value.len() + TUPLE_OVERHEAD);
        file.refresh_free_space(page_num)?;
    }

    Ok(old_value)
}

/// Replaces the value at `address`, switching between single-page and
/// overflow storage as the new length requires. Returns the new address.
pub fn update_value(
    file: &mut DataFile,
    txn: Option<TransactionID>,
    current: DataPage,
    value: &[u8],
) -> Result<Address> {
    let wants_overflow = is_overflow_size(file, value.len());

    match current {
        DataPage::Overflow(chain) if wants_overflow => {
            chain.rewrite(file, txn, value)?;
            Ok(chain.address())
        }
        DataPage::Overflow(chain) => {
            chain.delete(file, txn)?;
            store_single(file, txn, value)
        }
        DataPage::Single(address) if wants_overflow => {
            remove_single(file, txn, address)?;
            Ok(OverflowChain::create(file, txn, value)?.address())
        }
        DataPage::Single(address) => {
            let page_num = address.page_num();
            let tid = address.slot();
            let old_value = match file.page(page_num)?.read_tuple(tid) {
                Some(bytes) => bytes.to_vec(),
                None => {
                    return Err(Error::corruption(
                        "record page",
                        page_num,
                        format!("no readable tuple in slot {}", tid),
                    ))
                }
            };

            // keep the address when the page has room once the old tuple is gone
            let (room, _) = file.usable_room(page_num)?;
            if room + old_value.len() < value.len() {
                remove_single(file, txn, address)?;
                return store_single(file, txn, value);
            }

            let old_len = old_value.len();
            let entry = Loggable::RemoveValue {
                file_id: file.file_id(),
                page: page_num,
                tid,
                old_value,
            };
            let lsn = file.log(txn, &entry)?;
            let page = file.page_mut(page_num)?;
            page.remove_slot(tid);
            page.stamp_lsn(lsn);
            file.hold_slot(txn, page_num, tid, old_len + TUPLE_OVERHEAD);

            store_tuple_at(file, txn, page_num, tid, value)?;
            Ok(address)
        }
    }
}

/// A value spread over a linked run of `OVERFLOW` pages.
///
/// The first page starts with `marker u16 | value_len u32`, its header
/// `data_len` holds the encoded length of the whole value and
/// `last_in_chain` points at the tail page (0 when it is the tail itself).
/// Every other page carries its own byte count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OverflowChain {
    first: PageNum,
}

impl OverflowChain {
    pub fn new(first: PageNum) -> Self {
        Self { first }
    }

    pub fn first_page(&self) -> PageNum {
        self.first
    }

    pub fn address(&self) -> Address {
        Address::new(self.first, OVERFLOW_SLOT)
    }

    pub fn create(file: &mut DataFile, txn: Option<TransactionID>, value: &[u8]) -> Result<Self> {
        let work = file.work_size();
        let file_id = file.file_id();

        let mut encoded = Vec::with_capacity(value.len() + TUPLE_OVERHEAD);
        encoded.extend_from_slice(&OVERFLOW_SLOT.to_le_bytes());
        encoded.extend_from_slice(&(value.len() as u32).to_le_bytes());
        encoded.extend_from_slice(value);

        let first = file.alloc_page()?;
        let lsn = file.log(txn, &Loggable::OverflowCreate { file_id, page: first })?;
        let mut page = Page::new(first, work);
        page.clear(OVERFLOW);
        page.stamp_lsn(lsn);
        file.install(page)?;
        file.metrics().overflow_page_created();
        let _pin = file.pin(first)?;

        let mut tail = first;
        for (i, chunk) in encoded.chunks(work).enumerate() {
            let page_num = if i == 0 { first } else { new_chain_page(file, txn, tail)? };
            let new_len = if i == 0 { 0 } else { chunk.len() as u32 };
            append_to_page(file, txn, page_num, 0, chunk, 0, new_len)?;
            tail = page_num;
        }

        let chain = Self { first };
        chain.set_length(file, txn, encoded.len() as u32, 0, tail, NO_PAGE)?;
        Ok(chain)
    }

    /// Encoded length (value plus 6 header bytes) and tail page.
    fn head(&self, file: &mut DataFile) -> Result<(u32, PageNum)> {
        let page = file.page(self.first)?;
        if page.status() != OVERFLOW {
            return Err(Error::corruption(
                "overflow chain",
                self.first,
                format!("chain head has status {}", page.status()),
            ));
        }
        let total = page.header.data_len;
        if (total as usize) < TUPLE_OVERHEAD {
            return Err(Error::corruption(
                "overflow chain",
                self.first,
                format!("encoded length {} too small", total),
            ));
        }
        let last = match page.header.last_in_chain {
            NO_PAGE => self.first,
            last => last,
        };
        Ok((total, last))
    }

    /// Number of value bytes in the chain, as recorded in its first page.
    pub fn value_len(&self, file: &mut DataFile) -> Result<usize> {
        Ok(self.head(file)?.0 as usize - TUPLE_OVERHEAD)
    }

    /// Value bytes held by one chain page and the page that follows it.
    pub fn chunk(&self, file: &mut DataFile, page_num: PageNum) -> Result<(Vec<u8>, PageNum)> {
        let work = file.work_size();
        let page = file.page(page_num)?;
        if page.status() != OVERFLOW {
            return Err(Error::corruption(
                "overflow chain",
                page_num,
                format!("chain page has status {}", page.status()),
            ));
        }

        let (start, end) = if page_num == self.first {
            (TUPLE_OVERHEAD, (page.data_len()).min(work))
        } else {
            (0, page.data_len().min(work))
        };
        let bytes = page.data()[start.min(end)..end].to_vec();
        Ok((bytes, page.header.next_in_chain))
    }

    /// Pages in chain order. Fails on cycles, broken links and overlong chains.
    pub fn pages(&self, file: &mut DataFile) -> Result<Vec<PageNum>> {
        let mut pages = Vec::new();
        let mut seen = HashSet::new();
        let mut next = self.first;

        while next != NO_PAGE {
            if !seen.insert(next) {
                return Err(Error::corruption("overflow chain", next, "cycle in chain links"));
            }
            if pages.len() >= MAX_OVERFLOW_CHAIN_LENGTH || !file.is_valid_page(next) {
                return Err(Error::corruption("overflow chain", next, "chain link out of range"));
            }
            let page = file.page(next)?;
            if page.status() != OVERFLOW {
                return Err(Error::corruption(
                    "overflow chain",
                    next,
                    format!("chain page has status {}", page.status()),
                ));
            }
            pages.push(next);
            next = page.header.next_in_chain;
        }
        Ok(pages)
    }

    /// Reads the value, stopping early (with a warning) at a broken link.
    pub fn read(&self, file: &mut DataFile) -> Result<Option<Vec<u8>>> {
        let (total, _) = match self.head(file) {
            Ok(head) => head,
            Err(e) => {
                warn!(page = self.first, error = %e, "unreadable overflow chain");
                file.metrics().corruption_warning();
                return Ok(None);
            }
        };
        let value_len = total as usize - TUPLE_OVERHEAD;

        let mut out = Vec::with_capacity(value_len);
        let mut seen = HashSet::new();
        let mut next = self.first;

        while next != NO_PAGE && out.len() < value_len {
            if !seen.insert(next) || seen.len() > MAX_OVERFLOW_CHAIN_LENGTH || !file.is_valid_page(next) {
                warn!(page = self.first, link = next, "bad overflow chain link; value truncated");
                file.metrics().corruption_warning();
                break;
            }
            let (bytes, following) = match self.chunk(file, next) {
                Ok(chunk) => chunk,
                Err(e) => {
                    warn!(page = next, error = %e, "overflow chain page unreadable; value truncated");
                    file.metrics().corruption_warning();
                    break;
                }
            };
            let take = bytes.len().min(value_len - out.len());
            out.extend_from_slice(&bytes[..take]);
            next = following;
        }

        if out.len() < value_len {
            warn!(page = self.first, expected = value_len, got = out.len(), "overflow value shorter than recorded");
        }
        Ok(Some(out))
    }

    /// Appends to the end of the value without touching existing pages
    /// other than the tail and the chain head.
    pub fn append(&self, file: &mut DataFile, txn: Option<TransactionID>, bytes: &[u8]) -> Result<()> {
        let work = file.work_size();
        let (total, last) = self.head(file)?;
        let old_last = file.page(self.first)?.header.last_in_chain;
        let _pin = file.pin(self.first)?;

        let mut rest = bytes;
        let mut tail = last;

        let fill = if last == self.first {
            total as usize
        } else {
            file.page(last)?.data_len()
        };
        if fill > work {
            return Err(Error::corruption(
                "overflow chain",
                last,
                format!("tail holds {} bytes in a {} byte page", fill, work),
            ));
        }

        let room = work - fill;
        if room > 0 && !rest.is_empty() {
            let take = room.min(rest.len());
            let (old_len, new_len) = if last == self.first {
                (total, total)
            } else {
                (fill as u32, (fill + take) as u32)
            };
            append_to_page(file, txn, last, fill as u32, &rest[..take], old_len, new_len)?;
            rest = &rest[take..];
        }

        for chunk in rest.chunks(work) {
            let page_num = new_chain_page(file, txn, tail)?;
            append_to_page(file, txn, page_num, 0, chunk, 0, chunk.len() as u32)?;
            tail = page_num;
        }

        self.set_length(file, txn, total + bytes.len() as u32, total, tail, old_last)
    }

    /// Replaces the chain's content in place, reusing its pages and
    /// growing or trimming the chain as needed.
    pub fn rewrite(&self, file: &mut DataFile, txn: Option<TransactionID>, value: &[u8]) -> Result<()> {
        let work = file.work_size();
        let file_id = file.file_id();
        let (old_total, _) = self.head(file)?;
        let old_last = file.page(self.first)?.header.last_in_chain;
        let old_pages = self.pages(file)?;
        let _pin = file.pin(self.first)?;

        let mut encoded = Vec::with_capacity(value.len() + TUPLE_OVERHEAD);
        encoded.extend_from_slice(&OVERFLOW_SLOT.to_le_bytes());
        encoded.extend_from_slice(&(value.len() as u32).to_le_bytes());
        encoded.extend_from_slice(value);
        let total = encoded.len() as u32;

        let chunks: Vec<&[u8]> = encoded.chunks(work).collect();
        let mut tail = self.first;

        for (i, chunk) in chunks.iter().enumerate() {
            if let Some(&page_num) = old_pages.get(i) {
                let new_next = match old_pages.get(i + 1) {
                    Some(&next) if i + 1 < chunks.len() => next,
                    _ => NO_PAGE,
                };
                let new_len = if i == 0 { total } else { chunk.len() as u32 };

                let page = file.page(page_num)?;
                let used = if i == 0 {
                    (old_total as usize).min(work)
                } else {
                    page.data_len().min(work)
                };
                let entry = Loggable::OverflowStore {
                    file_id,
                    page: page_num,
                    data: chunk.to_vec(),
                    new_len,
                    new_next,
                    old_data: page.data()[..used].to_vec(),
                    old_len: page.header.data_len,
                    old_next: page.header.next_in_chain,
                };
                let lsn = file.log(txn, &entry)?;
                let page = file.page_mut(page_num)?;
                rewrite_page(page, chunk, new_len, new_next)?;
                page.stamp_lsn(lsn);
                tail = page_num;
            } else {
                let page_num = new_chain_page(file, txn, tail)?;
                append_to_page(file, txn, page_num, 0, chunk, 0, chunk.len() as u32)?;
                tail = page_num;
            }
        }

        for &page_num in old_pages.iter().skip(chunks.len()) {
            remove_chain_page(file, txn, page_num, work, None)?;
        }

        self.set_length(file, txn, total, old_total, tail, old_last)
    }

    /// Frees every page of the chain and returns the value it held.
    pub fn delete(&self, file: &mut DataFile, txn: Option<TransactionID>) -> Result<Vec<u8>> {
        let work = file.work_size();
        let value = self.read(file)?.unwrap_or_default();
        let (total, _) = self.head(file)?;
        let pages = self.pages(file)?;

        for page_num in pages {
            let first_len = if page_num == self.first { Some(total as usize) } else { None };
            remove_chain_page(file, txn, page_num, work, first_len)?;
        }
        Ok(value)
    }

    fn set_length(
        &self,
        file: &mut DataFile,
        txn: Option<TransactionID>,
        new_len: u32,
        old_len: u32,
        tail: PageNum,
        old_last: PageNum,
    ) -> Result<()> {
        let new_last = if tail == self.first { NO_PAGE } else { tail };
        let entry = Loggable::OverflowModified {
            file_id: file.file_id(),
            page: self.first,
            new_len,
            old_len,
            new_last,
            old_last,
        };
        let lsn = file.log(txn, &entry)?;
        let page = file.page_mut(self.first)?;
        set_chain_length(page, new_len, new_last);
        page.stamp_lsn(lsn);
        Ok(())
    }
}

// Allocates a page, links it behind `prev` and logs both changes.
fn new_chain_page(file: &mut DataFile, txn: Option<TransactionID>, prev: PageNum) -> Result<PageNum> {
    let page_num = file.alloc_page()?;
    let entry = Loggable::OverflowCreatePage { file_id: file.file_id(), page: page_num, prev };
    let lsn = file.log(txn, &entry)?;

    let mut page = Page::new(page_num, file.work_size());
    page.clear(OVERFLOW);
    page.stamp_lsn(lsn);
    file.install(page)?;
    file.metrics().overflow_page_created();

    let prev_page = file.page_mut(prev)?;
    prev_page.header.next_in_chain = page_num;
    prev_page.stamp_lsn(lsn);
    Ok(page_num)
}

fn append_to_page(
    file: &mut DataFile,
    txn: Option<TransactionID>,
    page_num: PageNum,
    offset: u32,
    chunk: &[u8],
    old_len: u32,
    new_len: u32,
) -> Result<()> {
    let entry = Loggable::OverflowAppend {
        file_id: file.file_id(),
        page: page_num,
        offset,
        chunk: chunk.to_vec(),
        old_len,
        new_len,
    };
    let lsn = file.log(txn, &entry)?;
    let page = file.page_mut(page_num)?;
    write_at(page, offset as usize, chunk)?;
    page.header.data_len = new_len;
    page.stamp_lsn(lsn);
    Ok(())
}

// `first_len` is the encoded chain length when `page_num` is the chain head.
fn remove_chain_page(
    file: &mut DataFile,
    txn: Option<TransactionID>,
    page_num: PageNum,
    work: usize,
    first_len: Option<usize>,
) -> Result<()> {
    let file_id = file.file_id();
    let page = file.page(page_num)?;
    let used = first_len.unwrap_or(page.data_len()).min(work);
    let entry = Loggable::OverflowRemove {
        file_id,
        page: page_num,
        status: page.status(),
        data_len: page.header.data_len,
        next: page.header.next_in_chain,
        last: page.header.last_in_chain,
        data: page.data()[..used].to_vec(),
    };
    let lsn = file.log(txn, &entry)?;
    file.drop_page(page_num, lsn, txn)
}
