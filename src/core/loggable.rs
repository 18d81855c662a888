use crate::core::address::Address;
use crate::core::constants::*;
use crate::core::errors::*;
use crate::core::index::KeyIndex;
use crate::core::page::Page;
use tracing::warn;

pub const TXN_START: u8 = 0x01;
pub const TXN_COMMIT: u8 = 0x02;
pub const TXN_ABORT: u8 = 0x03;
pub const CHECKPOINT: u8 = 0x04;
pub const CREATE_PAGE: u8 = 0x30;
pub const STORE_VALUE: u8 = 0x31;
pub const REMOVE_VALUE: u8 = 0x32;
pub const REMOVE_EMPTY_PAGE: u8 = 0x33;
pub const OVERFLOW_APPEND: u8 = 0x34;
pub const OVERFLOW_STORE: u8 = 0x35;
pub const OVERFLOW_CREATE: u8 = 0x36;
pub const OVERFLOW_MODIFIED: u8 = 0x37;
pub const OVERFLOW_CREATE_PAGE: u8 = 0x38;
pub const OVERFLOW_REMOVE: u8 = 0x39;
pub const INDEX_UPDATE: u8 = 0x40;
pub const COMPENSATION: u8 = 0x41;

/// Page and index access needed to replay or roll back a record.
pub trait RecoveryContext {
    /// The page, loaded for modification. `None` when it cannot be read.
    fn page_mut(&mut self, page: PageNum) -> Result<Option<&mut Page>>;

    /// Takes `page` out of the allocator's free list and returns it.
    fn claim_page(&mut self, page: PageNum) -> Result<&mut Page>;

    /// Hands `page` back to the allocator.
    fn release_page(&mut self, page: PageNum) -> Result<()>;

    fn index(&mut self) -> &mut dyn KeyIndex;
}

/// One journal record body. Every page-level variant carries what it takes
/// to move the page forward (redo) and back to its prior state (undo).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Loggable {
    TxnStart,
    TxnCommit,
    TxnAbort,
    Checkpoint,
    CreatePage {
        file_id: u8,
        page: PageNum,
    },
    StoreValue {
        file_id: u8,
        page: PageNum,
        tid: SlotId,
        value: Vec<u8>,
    },
    RemoveValue {
        file_id: u8,
        page: PageNum,
        tid: SlotId,
        old_value: Vec<u8>,
    },
    RemoveEmptyPage {
        file_id: u8,
        page: PageNum,
    },
    OverflowAppend {
        file_id: u8,
        page: PageNum,
        offset: u32,
        chunk: Vec<u8>,
        old_len: u32,
        new_len: u32,
    },
    OverflowStore {
        file_id: u8,
        page: PageNum,
        data: Vec<u8>,
        new_len: u32,
        new_next: PageNum,
        old_data: Vec<u8>,
        old_len: u32,
        old_next: PageNum,
    },
    OverflowCreate {
        file_id: u8,
        page: PageNum,
    },
    OverflowModified {
        file_id: u8,
        page: PageNum,
        new_len: u32,
        old_len: u32,
        new_last: PageNum,
        old_last: PageNum,
    },
    OverflowCreatePage {
        file_id: u8,
        page: PageNum,
        prev: PageNum,
    },
    OverflowRemove {
        file_id: u8,
        page: PageNum,
        status: u8,
        data_len: u32,
        next: PageNum,
        last: PageNum,
        data: Vec<u8>,
    },
    IndexUpdate {
        key: Vec<u8>,
        old: Option<Address>,
        new: Option<Address>,
    },
    /// Written while rolling back at runtime; replays the undo of `record`.
    Compensation {
        undone_lsn: Lsn,
        record: Box<Loggable>,
    },
}

impl Loggable {
    pub fn type_id(&self) -> u8 {
        match self {
            Loggable::TxnStart => TXN_START,
            Loggable::TxnCommit => TXN_COMMIT,
            Loggable::TxnAbort => TXN_ABORT,
            Loggable::Checkpoint => CHECKPOINT,
            Loggable::CreatePage { .. } => CREATE_PAGE,
            Loggable::StoreValue { .. } => STORE_VALUE,
            Loggable::RemoveValue { .. } => REMOVE_VALUE,
            Loggable::RemoveEmptyPage { .. } => REMOVE_EMPTY_PAGE,
            Loggable::OverflowAppend { .. } => OVERFLOW_APPEND,
            Loggable::OverflowStore { .. } => OVERFLOW_STORE,
            Loggable::OverflowCreate { .. } => OVERFLOW_CREATE,
            Loggable::OverflowModified { .. } => OVERFLOW_MODIFIED,
            Loggable::OverflowCreatePage { .. } => OVERFLOW_CREATE_PAGE,
            Loggable::OverflowRemove { .. } => OVERFLOW_REMOVE,
            Loggable::IndexUpdate { .. } => INDEX_UPDATE,
            Loggable::Compensation { .. } => COMPENSATION,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Loggable::TxnStart => "txn-start",
            Loggable::TxnCommit => "txn-commit",
            Loggable::TxnAbort => "txn-abort",
            Loggable::Checkpoint => "checkpoint",
            Loggable::CreatePage { .. } => "create-page",
            Loggable::StoreValue { .. } => "store-value",
            Loggable::RemoveValue { .. } => "remove-value",
            Loggable::RemoveEmptyPage { .. } => "remove-empty-page",
            Loggable::OverflowAppend { .. } => "overflow-append",
            Loggable::OverflowStore { .. } => "overflow-store",
            Loggable::OverflowCreate { .. } => "overflow-create",
            Loggable::OverflowModified { .. } => "overflow-modified",
            Loggable::OverflowCreatePage { .. } => "overflow-create-page",
            Loggable::OverflowRemove { .. } => "overflow-remove",
            Loggable::IndexUpdate { .. } => "index-update",
            Loggable::Compensation { .. } => "compensation",
        }
    }

    /// Transaction boundary and checkpoint markers carry no state change.
    pub fn is_marker(&self) -> bool {
        matches!(
            self,
            Loggable::TxnStart | Loggable::TxnCommit | Loggable::TxnAbort | Loggable::Checkpoint
        )
    }

    pub fn file_id(&self) -> Option<u8> {
        match self {
            Loggable::CreatePage { file_id, .. }
            | Loggable::StoreValue { file_id, .. }
            | Loggable::RemoveValue { file_id, .. }
            | Loggable::RemoveEmptyPage { file_id, .. }
            | Loggable::OverflowAppend { file_id, .. }
            | Loggable::OverflowStore { file_id, .. }
            | Loggable::OverflowCreate { file_id, .. }
            | Loggable::OverflowModified { file_id, .. }
            | Loggable::OverflowCreatePage { file_id, .. }
            | Loggable::OverflowRemove { file_id, .. } => Some(*file_id),
            Loggable::Compensation { record, .. } => record.file_id(),
            _ => None,
        }
    }

    pub fn encode(&self, buf: &mut Vec<u8>) {
        match self {
            Loggable::TxnStart | Loggable::TxnCommit | Loggable::TxnAbort | Loggable::Checkpoint => {}
            Loggable::CreatePage { file_id, page }
            | Loggable::RemoveEmptyPage { file_id, page }
            | Loggable::OverflowCreate { file_id, page } => {
                put_page_ref(buf, *file_id, *page);
            }
            Loggable::StoreValue { file_id, page, tid, value } => {
                put_page_ref(buf, *file_id, *page);
                buf.extend_from_slice(&tid.to_le_bytes());
                put_bytes(buf, value);
            }
            Loggable::RemoveValue { file_id, page, tid, old_value } => {
                put_page_ref(buf, *file_id, *page);
                buf.extend_from_slice(&tid.to_le_bytes());
                put_bytes(buf, old_value);
            }
            Loggable::OverflowAppend { file_id, page, offset, chunk, old_len, new_len } => {
                put_page_ref(buf, *file_id, *page);
                buf.extend_from_slice(&offset.to_le_bytes());
                buf.extend_from_slice(&old_len.to_le_bytes());
                buf.extend_from_slice(&new_len.to_le_bytes());
                put_bytes(buf, chunk);
            }
            Loggable::OverflowStore { file_id, page, data, new_len, new_next, old_data, old_len, old_next } => {
                put_page_ref(buf, *file_id, *page);
                buf.extend_from_slice(&new_len.to_le_bytes());
                put_page(buf, *new_next);
                put_bytes(buf, data);
                buf.extend_from_slice(&old_len.to_le_bytes());
                put_page(buf, *old_next);
                put_bytes(buf, old_data);
            }
            Loggable::OverflowModified { file_id, page, new_len, old_len, new_last, old_last } => {
                put_page_ref(buf, *file_id, *page);
                buf.extend_from_slice(&new_len.to_le_bytes());
                buf.extend_from_slice(&old_len.to_le_bytes());
                put_page(buf, *new_last);
                put_page(buf, *old_last);
            }
            Loggable::OverflowCreatePage { file_id, page, prev } => {
                put_page_ref(buf, *file_id, *page);
                put_page(buf, *prev);
            }
            Loggable::OverflowRemove { file_id, page, status, data_len, next, last, data } => {
                put_page_ref(buf, *file_id, *page);
                buf.push(*status);
                buf.extend_from_slice(&data_len.to_le_bytes());
                put_page(buf, *next);
                put_page(buf, *last);
                put_bytes(buf, data);
            }
            Loggable::IndexUpdate { key, old, new } => {
                put_bytes(buf, key);
                buf.extend_from_slice(&old.unwrap_or(Address::UNKNOWN).raw().to_le_bytes());
                buf.extend_from_slice(&new.unwrap_or(Address::UNKNOWN).raw().to_le_bytes());
            }
            Loggable::Compensation { undone_lsn, record } => {
                buf.extend_from_slice(&undone_lsn.to_le_bytes());
                buf.push(record.type_id());
                record.encode(buf);
            }
        }
    }

    pub fn decode(type_id: u8, payload: &[u8]) -> Result<Self> {
        let mut r = Reader::new(payload);
        let entry = Self::decode_from(type_id, &mut r)?;
        if !r.is_empty() {
            return Err(Error::DataCorruption {
                details: format!("{} trailing bytes after journal record type {:#x}", r.remaining(), type_id),
            });
        }
        Ok(entry)
    }

    fn decode_from(type_id: u8, r: &mut Reader<'_>) -> Result<Self> {
        let entry = match type_id {
            TXN_START => Loggable::TxnStart,
            TXN_COMMIT => Loggable::TxnCommit,
            TXN_ABORT => Loggable::TxnAbort,
            CHECKPOINT => Loggable::Checkpoint,
            CREATE_PAGE => Loggable::CreatePage { file_id: r.u8()?, page: r.page()? },
            REMOVE_EMPTY_PAGE => Loggable::RemoveEmptyPage { file_id: r.u8()?, page: r.page()? },
            OVERFLOW_CREATE => Loggable::OverflowCreate { file_id: r.u8()?, page: r.page()? },
            STORE_VALUE => Loggable::StoreValue {
                file_id: r.u8()?,
                page: r.page()?,
                tid: r.u16()?,
                value: r.bytes()?,
            },
            REMOVE_VALUE => Loggable::RemoveValue {
                file_id: r.u8()?,
                page: r.page()?,
                tid: r.u16()?,
                old_value: r.bytes()?,
            },
            OVERFLOW_APPEND => {
                let file_id = r.u8()?;
                let page = r.page()?;
                let offset = r.u32()?;
                let old_len = r.u32()?;
                let new_len = r.u32()?;
                let chunk = r.bytes()?;
                Loggable::OverflowAppend { file_id, page, offset, chunk, old_len, new_len }
            }
            OVERFLOW_STORE => {
                let file_id = r.u8()?;
                let page = r.page()?;
                let new_len = r.u32()?;
                let new_next = r.page()?;
                let data = r.bytes()?;
                let old_len = r.u32()?;
                let old_next = r.page()?;
                let old_data = r.bytes()?;
                Loggable::OverflowStore { file_id, page, data, new_len, new_next, old_data, old_len, old_next }
            }
            OVERFLOW_MODIFIED => Loggable::OverflowModified {
                file_id: r.u8()?,
                page: r.page()?,
                new_len: r.u32()?,
                old_len: r.u32()?,
                new_last: r.page()?,
                old_last: r.page()?,
            },
            OVERFLOW_CREATE_PAGE => Loggable::OverflowCreatePage {
                file_id: r.u8()?,
                page: r.page()?,
                prev: r.page()?,
            },
            OVERFLOW_REMOVE => Loggable::OverflowRemove {
                file_id: r.u8()?,
                page: r.page()?,
                status: r.u8()?,
                data_len: r.u32()?,
                next: r.page()?,
                last: r.page()?,
                data: r.bytes()?,
            },
            INDEX_UPDATE => {
                let key = r.bytes()?;
                let old = known(Address::from_raw(r.u64()?));
                let new = known(Address::from_raw(r.u64()?));
                Loggable::IndexUpdate { key, old, new }
            }
            COMPENSATION => {
                let undone_lsn = r.u64()?;
                let inner_type = r.u8()?;
                if inner_type == COMPENSATION {
                    return Err(Error::DataCorruption { details: "nested compensation record".to_string() });
                }
                let record = Box::new(Self::decode_from(inner_type, r)?);
                Loggable::Compensation { undone_lsn, record }
            }
            other => {
                return Err(Error::DataCorruption {
                    details: format!("unknown journal record type {:#x}", other),
                })
            }
        };
        Ok(entry)
    }

    /// Re-applies this record. Each target is only touched if its LSN is
    /// older than `lsn`. Returns whether anything changed.
    pub fn redo(&self, lsn: Lsn, ctx: &mut dyn RecoveryContext) -> Result<bool> {
        match self {
            Loggable::TxnStart | Loggable::TxnCommit | Loggable::TxnAbort | Loggable::Checkpoint => Ok(false),

            Loggable::CreatePage { page, .. } => {
                let p = ctx.claim_page(*page)?;
                if p.lsn() >= lsn {
                    return Ok(false);
                }
                p.clear(RECORD);
                p.stamp_lsn(lsn);
                Ok(true)
            }

            Loggable::StoreValue { page, tid, value, .. } => {
                let Some(p) = gated_page(ctx, *page, lsn, self)? else {
                    return Ok(false);
                };
                if p.find_slot_offset(*tid).is_none() {
                    if let Err(e) = p.store_tuple(*tid, value) {
                        warn!(page = *page, slot = *tid, error = %e, "redo of store-value skipped");
                        return Ok(false);
                    }
                }
                p.stamp_lsn(lsn);
                Ok(true)
            }

            Loggable::RemoveValue { page, tid, .. } => {
                let Some(p) = gated_page(ctx, *page, lsn, self)? else {
                    return Ok(false);
                };
                p.remove_slot(*tid);
                p.stamp_lsn(lsn);
                Ok(true)
            }

            Loggable::RemoveEmptyPage { page, .. } | Loggable::OverflowRemove { page, .. } => {
                let applied = match gated_page(ctx, *page, lsn, self)? {
                    Some(p) => {
                        p.clear(FREE_LIST);
                        p.stamp_lsn(lsn);
                        true
                    }
                    None => false,
                };
                ctx.release_page(*page)?;
                Ok(applied)
            }

            Loggable::OverflowCreate { page, .. } => {
                let p = ctx.claim_page(*page)?;
                if p.lsn() >= lsn {
                    return Ok(false);
                }
                p.clear(OVERFLOW);
                p.stamp_lsn(lsn);
                Ok(true)
            }

            Loggable::OverflowCreatePage { page, prev, .. } => {
                let mut applied = false;
                let p = ctx.claim_page(*page)?;
                if p.lsn() < lsn {
                    p.clear(OVERFLOW);
                    p.stamp_lsn(lsn);
                    applied = true;
                }
                if let Some(prev_page) = gated_page(ctx, *prev, lsn, self)? {
                    prev_page.header.next_in_chain = *page;
                    prev_page.stamp_lsn(lsn);
                    applied = true;
                }
                Ok(applied)
            }

            Loggable::OverflowAppend { page, offset, chunk, new_len, .. } => {
                let Some(p) = gated_page(ctx, *page, lsn, self)? else {
                    return Ok(false);
                };
                write_at(p, *offset as usize, chunk)?;
                p.header.data_len = *new_len;
                p.stamp_lsn(lsn);
                Ok(true)
            }

            Loggable::OverflowStore { page, data, new_len, new_next, .. } => {
                let Some(p) = gated_page(ctx, *page, lsn, self)? else {
                    return Ok(false);
                };
                rewrite_page(p, data, *new_len, *new_next)?;
                p.stamp_lsn(lsn);
                Ok(true)
            }

            Loggable::OverflowModified { page, new_len, new_last, .. } => {
                let Some(p) = gated_page(ctx, *page, lsn, self)? else {
                    return Ok(false);
                };
                set_chain_length(p, *new_len, *new_last);
                p.stamp_lsn(lsn);
                Ok(true)
            }

            Loggable::IndexUpdate { key, new, .. } => {
                let index = ctx.index();
                if index.lsn() >= lsn {
                    return Ok(false);
                }
                match new {
                    Some(address) => index.add_value(key, *address),
                    None => index.remove_value(key),
                };
                index.set_lsn(lsn);
                Ok(true)
            }

            Loggable::Compensation { record, .. } => record.undo(lsn, ctx, true),
        }
    }

    /// Restores the state this record overwrote and stamps touched pages
    /// with `lsn`. With `gated` set, targets already at or past `lsn` are
    /// left alone (used when replaying compensation records).
    pub fn undo(&self, lsn: Lsn, ctx: &mut dyn RecoveryContext, gated: bool) -> Result<bool> {
        match self {
            Loggable::TxnStart
            | Loggable::TxnCommit
            | Loggable::TxnAbort
            | Loggable::Checkpoint
            | Loggable::Compensation { .. } => Ok(false),

            Loggable::CreatePage { page, .. }
            | Loggable::OverflowCreate { page, .. } => {
                if !undo_target(ctx, *page, lsn, gated)? {
                    return Ok(false);
                }
                if let Some(p) = ctx.page_mut(*page)? {
                    // another transaction has since stored into this record page
                    if p.status() == RECORD && !p.live_slots().is_empty() {
                        p.stamp_lsn(lsn);
                        return Ok(true);
                    }
                    p.clear(FREE_LIST);
                    p.stamp_lsn(lsn);
                }
                ctx.release_page(*page)?;
                Ok(true)
            }

            Loggable::StoreValue { page, tid, .. } => {
                if !undo_target(ctx, *page, lsn, gated)? {
                    return Ok(false);
                }
                if let Some(p) = ctx.page_mut(*page)? {
                    p.remove_slot(*tid);
                    p.stamp_lsn(lsn);
                }
                Ok(true)
            }

            Loggable::RemoveValue { page, tid, old_value, .. } => {
                if !undo_target(ctx, *page, lsn, gated)? {
                    return Ok(false);
                }
                if let Some(p) = ctx.page_mut(*page)? {
                    match p.read_tuple(*tid) {
                        Some(current) if current == old_value.as_slice() => {}
                        Some(_) => {
                            warn!(page = *page, slot = *tid, "slot reused before undo of remove-value; skipping");
                            return Ok(false);
                        }
                        None => {
                            if let Err(e) = p.store_tuple(*tid, old_value) {
                                warn!(page = *page, slot = *tid, error = %e, "undo of remove-value skipped");
                                return Ok(false);
                            }
                        }
                    }
                    p.stamp_lsn(lsn);
                }
                Ok(true)
            }

            Loggable::RemoveEmptyPage { page, .. } => {
                let p = ctx.claim_page(*page)?;
                if gated && p.lsn() >= lsn {
                    return Ok(false);
                }
                p.clear(RECORD);
                p.stamp_lsn(lsn);
                Ok(true)
            }

            Loggable::OverflowCreatePage { page, prev, .. } => {
                let mut applied = false;
                if undo_target(ctx, *prev, lsn, gated)? {
                    if let Some(prev_page) = ctx.page_mut(*prev)? {
                        if prev_page.header.next_in_chain == *page {
                            prev_page.header.next_in_chain = NO_PAGE;
                        }
                        prev_page.stamp_lsn(lsn);
                        applied = true;
                    }
                }
                if undo_target(ctx, *page, lsn, gated)? {
                    if let Some(p) = ctx.page_mut(*page)? {
                        p.clear(FREE_LIST);
                        p.stamp_lsn(lsn);
                    }
                    ctx.release_page(*page)?;
                    applied = true;
                }
                Ok(applied)
            }

            Loggable::OverflowAppend { page, old_len, .. } => {
                if !undo_target(ctx, *page, lsn, gated)? {
                    return Ok(false);
                }
                if let Some(p) = ctx.page_mut(*page)? {
                    p.header.data_len = *old_len;
                    p.stamp_lsn(lsn);
                }
                Ok(true)
            }

            Loggable::OverflowStore { page, old_data, old_len, old_next, .. } => {
                if !undo_target(ctx, *page, lsn, gated)? {
                    return Ok(false);
                }
                if let Some(p) = ctx.page_mut(*page)? {
                    rewrite_page(p, old_data, *old_len, *old_next)?;
                    p.stamp_lsn(lsn);
                }
                Ok(true)
            }

            Loggable::OverflowModified { page, old_len, old_last, .. } => {
                if !undo_target(ctx, *page, lsn, gated)? {
                    return Ok(false);
                }
                if let Some(p) = ctx.page_mut(*page)? {
                    set_chain_length(p, *old_len, *old_last);
                    p.stamp_lsn(lsn);
                }
                Ok(true)
            }

            Loggable::OverflowRemove { page, status, data_len, next, last, data, .. } => {
                let p = ctx.claim_page(*page)?;
                if gated && p.lsn() >= lsn {
                    return Ok(false);
                }
                p.clear(*status);
                write_at(p, 0, data)?;
                p.header.data_len = *data_len;
                p.header.next_in_chain = *next;
                p.header.last_in_chain = *last;
                p.stamp_lsn(lsn);
                Ok(true)
            }

            Loggable::IndexUpdate { key, old, .. } => {
                let index = ctx.index();
                if gated && index.lsn() >= lsn {
                    return Ok(false);
                }
                match old {
                    Some(address) => index.add_value(key, *address),
                    None => index.remove_value(key),
                };
                index.set_lsn(lsn);
                Ok(true)
            }
        }
    }
}

fn gated_page<'a>(
    ctx: &'a mut dyn RecoveryContext,
    page: PageNum,
    lsn: Lsn,
    record: &Loggable,
) -> Result<Option<&'a mut Page>> {
    match ctx.page_mut(page)? {
        Some(p) if p.lsn() < lsn => Ok(Some(p)),
        Some(_) => Ok(None),
        None => {
            warn!(page, lsn, record = record.name(), "redo target page missing; skipping");
            Ok(None)
        }
    }
}

fn undo_target(ctx: &mut dyn RecoveryContext, page: PageNum, lsn: Lsn, gated: bool) -> Result<bool> {
    match ctx.page_mut(page)? {
        Some(p) => Ok(!gated || p.lsn() < lsn),
        None => {
            warn!(page, "undo target page missing; skipping");
            Ok(false)
        }
    }
}

pub(crate) fn write_at(page: &mut Page, offset: usize, bytes: &[u8]) -> Result<()> {
    let end = offset + bytes.len();
    if end > page.work_size() {
        return Err(Error::corruption(
            "overflow page",
            page.num(),
            format!("write of {} bytes at {} exceeds working area", bytes.len(), offset),
        ));
    }
    page.data_mut()[offset..end].copy_from_slice(bytes);
    Ok(())
}

pub(crate) fn rewrite_page(page: &mut Page, data: &[u8], len: u32, next: PageNum) -> Result<()> {
    write_at(page, 0, data)?;
    page.data_mut()[data.len()..].fill(0);
    page.header.data_len = len;
    page.header.next_in_chain = next;
    Ok(())
}

/// Sets the first page's total length (header field and in-page copy) and tail pointer.
pub(crate) fn set_chain_length(page: &mut Page, total_len: u32, last: PageNum) {
    page.header.data_len = total_len;
    page.header.last_in_chain = last;
    if total_len as usize >= TUPLE_OVERHEAD && page.work_size() >= TUPLE_OVERHEAD {
        let value_len = total_len - TUPLE_OVERHEAD as u32;
        page.data_mut()[0..TID_SIZE].copy_from_slice(&OVERFLOW_SLOT.to_le_bytes());
        page.data_mut()[TID_SIZE..TUPLE_OVERHEAD].copy_from_slice(&value_len.to_le_bytes());
    }
}

fn known(address: Address) -> Option<Address> {
    if address.is_unknown() {
        None
    } else {
        Some(address)
    }
}

fn put_page_ref(buf: &mut Vec<u8>, file_id: u8, page: PageNum) {
    buf.push(file_id);
    put_page(buf, page);
}

fn put_page(buf: &mut Vec<u8>, page: PageNum) {
    buf.extend_from_slice(&(page as u32).to_le_bytes());
}

fn put_bytes(buf: &mut Vec<u8>, bytes: &[u8]) {
    buf.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    buf.extend_from_slice(bytes);
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.pos + n > self.buf.len() {
            return Err(Error::DataCorruption {
                details: format!("journal record truncated: need {} bytes at offset {}", n, self.pos),
            });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into()?))
    }

    fn u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into()?))
    }

    fn u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.take(8)?.try_into()?))
    }

    fn page(&mut self) -> Result<PageNum> {
        Ok(self.u32()? as PageNum)
    }

    fn bytes(&mut self) -> Result<Vec<u8>> {
        let len = self.u32()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn is_empty(&self) -> bool {
        self.remaining() == 0
    }
}
