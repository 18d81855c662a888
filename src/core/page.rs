use crate::core::constants::*;
use crate::core::errors::*;
use tracing::warn;

/// Fixed 40-byte header at the start of every data page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PageHeader {
    pub status: u8,
    pub records: u16,
    pub data_len: u32,
    /// Slot table capacity for record pages.
    pub next_tid: u16,
    pub next_in_chain: PageNum,
    pub last_in_chain: PageNum,
    pub lsn: Lsn,
}

impl PageHeader {
    pub fn read(buf: &[u8]) -> Result<Self> {
        if buf.len() < PAGE_HEADER_SIZE {
            return Err(Error::InvalidPageSize);
        }

        Ok(Self {
            status: buf[0],
            records: u16::from_le_bytes(buf[1..3].try_into()?),
            data_len: u32::from_le_bytes(buf[3..7].try_into()?),
            next_tid: u16::from_le_bytes(buf[7..9].try_into()?),
            next_in_chain: u64::from_le_bytes(buf[9..17].try_into()?),
            last_in_chain: u64::from_le_bytes(buf[17..25].try_into()?),
            lsn: u64::from_le_bytes(buf[25..33].try_into()?),
        })
    }

    pub fn write(&self, buf: &mut [u8]) {
        buf[0] = self.status;
        buf[1..3].copy_from_slice(&self.records.to_le_bytes());
        buf[3..7].copy_from_slice(&self.data_len.to_le_bytes());
        buf[7..9].copy_from_slice(&self.next_tid.to_le_bytes());
        buf[9..17].copy_from_slice(&self.next_in_chain.to_le_bytes());
        buf[17..25].copy_from_slice(&self.last_in_chain.to_le_bytes());
        buf[25..33].copy_from_slice(&self.lsn.to_le_bytes());
        buf[33..PAGE_HEADER_SIZE].fill(0);
    }
}

/// In-memory image of one data page: header plus working area.
///
/// For `RECORD` pages the working area is a packed run of
/// `tid u16 | len u32 | bytes` tuples and `slots` maps each live tid to the
/// offset of its tuple. The slot table is derived from the bytes on load and
/// never written out.
#[derive(Debug, Clone)]
pub struct Page {
    num: PageNum,
    pub header: PageHeader,
    data: Vec<u8>,
    slots: Vec<Option<usize>>,
}

impl Page {
    /// A blank page with status `UNUSED`.
    pub fn new(num: PageNum, work_size: usize) -> Self {
        Self {
            num,
            header: PageHeader::default(),
            data: vec![0u8; work_size],
            slots: Vec::new(),
        }
    }

    /// A fresh, empty record page.
    pub fn new_record(num: PageNum, work_size: usize) -> Self {
        let mut page = Self::new(num, work_size);
        page.header.status = RECORD;
        page.header.next_tid = INITIAL_SLOT_TABLE;
        page.slots = vec![None; INITIAL_SLOT_TABLE as usize];
        page
    }

    pub fn from_bytes(num: PageNum, buf: &[u8]) -> Result<Self> {
        let header = PageHeader::read(buf)?;
        let mut page = Self {
            num,
            header,
            data: buf[PAGE_HEADER_SIZE..].to_vec(),
            slots: Vec::new(),
        };
        if page.header.status == RECORD {
            page.rebuild_slots();
        }
        Ok(page)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = vec![0u8; PAGE_HEADER_SIZE + self.data.len()];
        self.header.write(&mut buf);
        buf[PAGE_HEADER_SIZE..].copy_from_slice(&self.data);
        buf
    }

    // One pass over the tuples. An invalid tid or length cuts the page off
    // at that point; everything after it is treated as absent.
    fn rebuild_slots(&mut self) {
        let capacity = (self.header.next_tid as usize).clamp(INITIAL_SLOT_TABLE as usize, MAX_SLOT_ID as usize + 1);
        self.slots = vec![None; capacity];

        let data_len = (self.header.data_len as usize).min(self.data.len());
        let mut pos = 0;
        let mut records = 0u16;

        while pos < data_len {
            if pos + TUPLE_OVERHEAD > data_len {
                warn!(page = self.num, offset = pos, "truncated tuple header; ignoring page tail");
                break;
            }
            let tid = u16::from_le_bytes([self.data[pos], self.data[pos + 1]]);
            let len = u32::from_le_bytes([
                self.data[pos + 2],
                self.data[pos + 3],
                self.data[pos + 4],
                self.data[pos + 5],
            ]) as usize;

            if !(FIRST_RECORD_SLOT..=MAX_SLOT_ID).contains(&tid) {
                warn!(page = self.num, slot = tid, offset = pos, "invalid tid; ignoring page tail");
                break;
            }
            if pos + TUPLE_OVERHEAD + len > data_len {
                warn!(page = self.num, slot = tid, len, "tuple length exceeds page; ignoring page tail");
                break;
            }
            if self.slots.get(tid as usize).copied().flatten().is_some() {
                warn!(page = self.num, slot = tid, "duplicate tid; ignoring page tail");
                break;
            }

            self.ensure_slot_capacity(tid);
            self.slots[tid as usize] = Some(pos);
            records += 1;
            pos += TUPLE_OVERHEAD + len;
        }

        if pos != self.header.data_len as usize || records != self.header.records {
            self.header.data_len = pos as u32;
            self.header.records = records;
        }
    }

    fn ensure_slot_capacity(&mut self, tid: SlotId) {
        let mut capacity = self.slots.len().max(INITIAL_SLOT_TABLE as usize);
        while capacity <= tid as usize {
            capacity *= 2;
        }
        let capacity = capacity.min(MAX_SLOT_ID as usize + 1);
        if capacity > self.slots.len() {
            self.slots.resize(capacity, None);
        }
        self.header.next_tid = capacity.min(u16::MAX as usize) as u16;
    }

    pub fn num(&self) -> PageNum {
        self.num
    }

    pub fn status(&self) -> u8 {
        self.header.status
    }

    pub fn lsn(&self) -> Lsn {
        self.header.lsn
    }

    /// LSNs only move forward.
    pub fn stamp_lsn(&mut self, lsn: Lsn) {
        if lsn > self.header.lsn {
            self.header.lsn = lsn;
        }
    }

    pub fn work_size(&self) -> usize {
        self.data.len()
    }

    pub fn data_len(&self) -> usize {
        self.header.data_len as usize
    }

    pub fn free_space(&self) -> usize {
        self.data.len().saturating_sub(self.header.data_len as usize)
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    pub fn records(&self) -> u16 {
        self.header.records
    }

    /// Offset of the tuple for `tid` within the working area.
    pub fn find_slot_offset(&self, tid: SlotId) -> Option<usize> {
        self.slots.get(tid as usize).copied().flatten()
    }

    /// Lowest unused slot id, or the id that doubling the table would make
    /// available. `None` once the page has exhausted slot ids.
    #[cfg(test)]
    pub(crate) fn next_free_slot(&self) -> Option<SlotId> {
        self.free_slot_where(|_| true)
    }

    /// Lowest unused slot id accepted by `usable`.
    pub fn free_slot_where(&self, usable: impl Fn(SlotId) -> bool) -> Option<SlotId> {
        (FIRST_RECORD_SLOT..=MAX_SLOT_ID).find(|&tid| self.find_slot_offset(tid).is_none() && usable(tid))
    }

    /// Bytes of the tuple stored at `tid`. Out-of-range lengths read as absent.
    pub fn read_tuple(&self, tid: SlotId) -> Option<&[u8]> {
        let offset = self.find_slot_offset(tid)?;
        let len = self.tuple_len_at(offset)?;
        let start = offset + TUPLE_OVERHEAD;
        if start + len > self.data_len() {
            warn!(page = self.num, slot = tid, len, "tuple length out of bounds");
            return None;
        }
        Some(&self.data[start..start + len])
    }

    fn tuple_len_at(&self, offset: usize) -> Option<usize> {
        let bytes = self.data.get(offset + TID_SIZE..offset + TUPLE_OVERHEAD)?;
        Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize)
    }

    /// Appends a tuple at the end of the occupied area. The caller checks
    /// that `value.len() + 6` bytes are free.
    pub fn store_tuple(&mut self, tid: SlotId, value: &[u8]) -> Result<()> {
        if !(FIRST_RECORD_SLOT..=MAX_SLOT_ID).contains(&tid) {
            return Err(Error::corruption("record page", self.num, format!("slot {} out of range", tid)));
        }
        if self.find_slot_offset(tid).is_some() {
            return Err(Error::corruption("record page", self.num, format!("slot {} already in use", tid)));
        }
        let needed = TUPLE_OVERHEAD + value.len();
        if needed > self.free_space() {
            return Err(Error::corruption(
                "record page",
                self.num,
                format!("tuple of {} bytes does not fit in {} free bytes", needed, self.free_space()),
            ));
        }

        let pos = self.data_len();
        self.data[pos..pos + TID_SIZE].copy_from_slice(&tid.to_le_bytes());
        self.data[pos + TID_SIZE..pos + TUPLE_OVERHEAD].copy_from_slice(&(value.len() as u32).to_le_bytes());
        self.data[pos + TUPLE_OVERHEAD..pos + needed].copy_from_slice(value);

        self.ensure_slot_capacity(tid);
        self.slots[tid as usize] = Some(pos);
        self.header.records += 1;
        self.header.data_len += needed as u32;
        Ok(())
    }

    /// Removes the tuple at `tid`, compacting the bytes behind it.
    /// Returns the removed value.
    pub fn remove_slot(&mut self, tid: SlotId) -> Option<Vec<u8>> {
        let offset = self.find_slot_offset(tid)?;
        let len = self.tuple_len_at(offset)?;
        let end = offset + TUPLE_OVERHEAD + len;
        let data_len = self.data_len();
        if end > data_len {
            warn!(page = self.num, slot = tid, len, "cannot remove tuple with out-of-bounds length");
            return None;
        }

        let value = self.data[offset + TUPLE_OVERHEAD..end].to_vec();
        self.data.copy_within(end..data_len, offset);
        self.data[data_len - (end - offset)..data_len].fill(0);

        let shift = end - offset;
        self.slots[tid as usize] = None;
        for slot in self.slots.iter_mut().flatten() {
            if *slot > offset {
                *slot -= shift;
            }
        }

        self.header.records = self.header.records.saturating_sub(1);
        self.header.data_len -= shift as u32;
        Some(value)
    }

    /// Live tids in storage order.
    pub fn live_slots(&self) -> Vec<SlotId> {
        let mut live: Vec<(usize, SlotId)> = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(tid, off)| off.map(|o| (o, tid as SlotId)))
            .collect();
        live.sort_unstable();
        live.into_iter().map(|(_, tid)| tid).collect()
    }

    /// Drops all content; the page keeps its number and LSN.
    pub fn clear(&mut self, status: u8) {
        let lsn = self.header.lsn;
        self.header = PageHeader {
            status,
            lsn,
            ..PageHeader::default()
        };
        self.data.fill(0);
        self.slots.clear();
        if status == RECORD {
            self.header.next_tid = INITIAL_SLOT_TABLE;
            self.slots = vec![None; INITIAL_SLOT_TABLE as usize];
        }
    }
}
