use crate::core::buffer_pool::BufferPool;
use crate::core::constants::*;
use crate::core::errors::*;
use crate::core::metrics::Metrics;
use std::collections::HashSet;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct Header {
    pub magic: [u8; 4],
    pub version: u32,
    pub page_size: u32,
    pub num_pages: u64,
    pub next_tx_id: u64,
    /// Highest journal LSN the data file may carry; new journals start past it.
    pub lsn: Lsn,
    pub free_list: Vec<PageNum>,
    /// Opaque bytes owned by the layer above (the value store keeps its
    /// free-space list here).
    pub payload: Vec<u8>,
}

impl Header {
    fn new(page_size: usize) -> Self {
        Self {
            magic: MAGIC,
            version: VERSION,
            page_size: page_size as u32,
            num_pages: 1,
            next_tx_id: 1,
            lsn: LSN_INVALID,
            free_list: Vec::new(),
            payload: Vec::new(),
        }
    }

    fn serialize(&self) -> Vec<u8> {
        let page_size = self.page_size as usize;
        let mut buf = vec![0u8; page_size];
        let mut offset = 0;

        buf[offset..offset + 4].copy_from_slice(&self.magic);
        offset += 4;

        buf[offset..offset + 4].copy_from_slice(&self.version.to_le_bytes());
        offset += 4;

        buf[offset..offset + 4].copy_from_slice(&self.page_size.to_le_bytes());
        offset += 4;

        buf[offset..offset + 8].copy_from_slice(&self.num_pages.to_le_bytes());
        offset += 8;

        buf[offset..offset + 8].copy_from_slice(&self.next_tx_id.to_le_bytes());
        offset += 8;

        buf[offset..offset + 8].copy_from_slice(&self.lsn.to_le_bytes());
        offset += 8;

        // payload goes at the end; the free page list gets whatever remains
        let payload_len = self.payload.len().min(page_size - FILE_HEADER_FIXED_SIZE - 4);
        let room = (page_size - FILE_HEADER_FIXED_SIZE - 4 - payload_len) / 8;
        let free_count = self.free_list.len().min(room);
        if free_count < self.free_list.len() {
            warn!(
                dropped = self.free_list.len() - free_count,
                "free page list does not fit in the file header; dropping entries"
            );
        }

        buf[offset..offset + 4].copy_from_slice(&(free_count as u32).to_le_bytes());
        offset += 4;

        for &page_num in &self.free_list[..free_count] {
            buf[offset..offset + 8].copy_from_slice(&page_num.to_le_bytes());
            offset += 8;
        }

        buf[offset..offset + 4].copy_from_slice(&(payload_len as u32).to_le_bytes());
        offset += 4;
        buf[offset..offset + payload_len].copy_from_slice(&self.payload[..payload_len]);

        buf
    }

    fn deserialize(data: &[u8]) -> Result<Self> {
        if data.len() < FILE_HEADER_FIXED_SIZE {
            return Err(Error::InvalidPageSize);
        }

        let mut offset = 0;

        let mut magic = [0u8; 4];
        magic.copy_from_slice(&data[offset..offset + 4]);
        if magic != MAGIC {
            return Err(Error::InvalidMagic);
        }
        offset += 4;

        let version = u32::from_le_bytes(data[offset..offset + 4].try_into()?);
        if version != VERSION {
            return Err(Error::InvalidVersion { found: version, expected: VERSION });
        }
        offset += 4;

        let page_size = u32::from_le_bytes(data[offset..offset + 4].try_into()?);
        if !valid_page_size(page_size as usize) || data.len() < page_size as usize {
            return Err(Error::InvalidPageSize);
        }
        offset += 4;

        let num_pages = u64::from_le_bytes(data[offset..offset + 8].try_into()?);
        offset += 8;

        let next_tx_id = u64::from_le_bytes(data[offset..offset + 8].try_into()?);
        offset += 8;

        let lsn = u64::from_le_bytes(data[offset..offset + 8].try_into()?);
        offset += 8;

        let free_count = u32::from_le_bytes(data[offset..offset + 4].try_into()?) as usize;
        offset += 4;

        if offset + free_count * 8 + 4 > page_size as usize {
            return Err(Error::DataCorruption {
                details: format!("free page count {} does not fit in the header page", free_count),
            });
        }

        let mut free_list = Vec::with_capacity(free_count);
        for _ in 0..free_count {
            free_list.push(u64::from_le_bytes(data[offset..offset + 8].try_into()?));
            offset += 8;
        }

        let payload_len = u32::from_le_bytes(data[offset..offset + 4].try_into()?) as usize;
        offset += 4;
        if offset + payload_len > page_size as usize {
            return Err(Error::DataCorruption {
                details: format!("header payload length {} exceeds the header page", payload_len),
            });
        }
        let payload = data[offset..offset + payload_len].to_vec();

        Ok(Self {
            magic,
            version,
            page_size,
            num_pages,
            next_tx_id,
            lsn,
            free_list,
            payload,
        })
    }
}

pub fn valid_page_size(page_size: usize) -> bool {
    page_size.is_power_of_two() && (MIN_PAGE_SIZE..=MAX_PAGE_SIZE).contains(&page_size)
}

/// Fixed-size block file with a page allocator. Page 0 is the header.
pub struct Pager {
    file: File,
    page_size: usize,
    num_pages: u64,
    next_tx_id: u64,
    lsn: Lsn,
    free_list: Vec<PageNum>,
    payload: Vec<u8>,
    read_only: bool,
    buffers: BufferPool,
    metrics: Arc<Metrics>,
}

impl Pager {
    #[cfg_attr(not(unix), allow(unused_variables))]
    pub fn open(
        path: &Path,
        page_size: usize,
        permissions: u32,
        read_only: bool,
        metrics: Arc<Metrics>,
    ) -> Result<Self> {
        let exists = path.exists();

        if !exists && !valid_page_size(page_size) {
            return Err(Error::InvalidPageSize);
        }

        let file = if read_only {
            OpenOptions::new().read(true).open(path)?
        } else {
            let mut options = OpenOptions::new();
            options.read(true).write(true);

            if !exists {
                options.create(true);
            }

            let f = options.open(path)?;

            #[cfg(unix)]
            {
                let metadata = f.metadata()?;
                let mut perms = metadata.permissions();
                perms.set_mode(permissions);
                f.set_permissions(perms)?;
            }

            f
        };

        let mut pager = Self {
            file,
            page_size,
            num_pages: 1,
            next_tx_id: 1,
            lsn: LSN_INVALID,
            free_list: Vec::new(),
            payload: Vec::new(),
            read_only,
            buffers: BufferPool::new(page_size, 64),
            metrics,
        };

        if exists {
            pager.read_header()?;
        } else if !read_only {
            debug!(file = %path.display(), page_size, "creating data file");
            pager.write_header()?;
        }

        Ok(pager)
    }

    fn read_header(&mut self) -> Result<()> {
        let file_size = self.file.seek(SeekFrom::End(0))?;
        self.file.seek(SeekFrom::Start(0))?;

        let mut fixed = vec![0u8; FILE_HEADER_FIXED_SIZE];
        self.file.read_exact(&mut fixed)?;
        let page_size = u32::from_le_bytes(fixed[8..12].try_into()?) as usize;
        if !valid_page_size(page_size) {
            return Err(Error::InvalidPageSize);
        }

        let mut buf = vec![0u8; page_size];
        self.file.seek(SeekFrom::Start(0))?;
        self.file.read_exact(&mut buf)?;

        let header = Header::deserialize(&buf)?;

        if header.num_pages < 1 {
            return Err(Error::DataCorruption {
                details: format!(
                    "invalid num_pages: {} (must be at least 1 for header page)",
                    header.num_pages
                ),
            });
        }

        // pages past the end of the file are allowed: they were allocated but never written
        if file_size < page_size as u64 {
            return Err(Error::DataCorruption {
                details: format!("file truncated: {} bytes is smaller than one page", file_size),
            });
        }

        let mut seen_pages: HashSet<u64> = HashSet::new();
        for (i, &page_num) in header.free_list.iter().enumerate() {
            if page_num == 0 || page_num >= header.num_pages {
                return Err(Error::DataCorruption {
                    details: format!(
                        "invalid free_list entry at index {}: page {} (num_pages {})",
                        i, page_num, header.num_pages
                    ),
                });
            }
            if !seen_pages.insert(page_num) {
                return Err(Error::DataCorruption {
                    details: format!("duplicate page {} in free_list at index {}", page_num, i),
                });
            }
        }

        self.page_size = page_size;
        self.num_pages = header.num_pages;
        self.next_tx_id = header.next_tx_id;
        self.lsn = header.lsn;
        self.free_list = header.free_list;
        self.payload = header.payload;
        self.buffers = BufferPool::new(page_size, 64);

        Ok(())
    }

    pub fn get_header_data(&self) -> Vec<u8> {
        let header = Header {
            free_list: self.free_list.clone(),
            payload: self.payload.clone(),
            num_pages: self.num_pages,
            next_tx_id: self.next_tx_id,
            lsn: self.lsn,
            ..Header::new(self.page_size)
        };
        header.serialize()
    }

    pub fn write_header(&mut self) -> Result<()> {
        if self.read_only {
            return Err(Error::ReadOnly { operation: "write header".to_string() });
        }

        let data = self.get_header_data();
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&data)?;

        Ok(())
    }

    pub fn sync(&mut self) -> Result<()> {
        if self.read_only {
            return Ok(());
        }
        self.file.sync_all()?;
        Ok(())
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn work_size(&self) -> usize {
        self.page_size - PAGE_HEADER_SIZE
    }

    /// Reads a full page. Pages allocated but never written read as zeroes.
    pub fn read_page(&mut self, page_num: PageNum) -> Result<Vec<u8>> {
        if page_num == 0 || page_num >= self.num_pages {
            return Err(Error::InvalidPageNum { page_num });
        }

        let mut buf = self.buffers.get();
        let offset = page_num * self.page_size as u64;
        self.file.seek(SeekFrom::Start(offset))?;

        let mut filled = 0;
        while filled < buf.len() {
            let n = self.file.read(&mut buf[filled..])?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        buf[filled..].fill(0);

        self.metrics.page_read();
        Ok(buf)
    }

    pub fn write_page(&mut self, page_num: PageNum, data: &[u8]) -> Result<()> {
        if self.read_only {
            return Err(Error::ReadOnly { operation: "write page".to_string() });
        }
        if data.len() != self.page_size {
            return Err(Error::InvalidPageSize);
        }
        if page_num == 0 || page_num >= self.num_pages {
            return Err(Error::InvalidPageNum { page_num });
        }

        let offset = page_num * self.page_size as u64;
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)?;
        self.metrics.page_written();

        Ok(())
    }

    /// Hands a page buffer back for reuse by later reads.
    pub fn recycle(&self, buf: Vec<u8>) {
        self.buffers.put(buf);
    }

    pub fn alloc_page(&mut self) -> Result<PageNum> {
        if self.read_only {
            return Err(Error::ReadOnly { operation: "allocate page".to_string() });
        }

        let page_num = match self.free_list.pop() {
            Some(page_num) => page_num,
            None => {
                let page_num = self.num_pages;
                self.num_pages += 1;
                page_num
            }
        };

        self.metrics.page_allocated();
        Ok(page_num)
    }

    /// Returns a page to the allocator. Freeing an already free page is a no-op.
    pub fn free_page(&mut self, page_num: PageNum) -> Result<()> {
        if self.read_only {
            return Err(Error::ReadOnly { operation: "free page".to_string() });
        }
        if page_num == 0 || page_num >= self.num_pages {
            return Err(Error::InvalidPageNum { page_num });
        }

        if !self.free_list.contains(&page_num) {
            self.free_list.push(page_num);
            self.metrics.page_freed();
        }

        Ok(())
    }

    /// Marks a page as in use regardless of the allocator's current view.
    /// Used by recovery when the journal shows the page was created.
    pub fn reclaim_page(&mut self, page_num: PageNum) {
        self.free_list.retain(|&p| p != page_num);
        if page_num >= self.num_pages {
            self.num_pages = page_num + 1;
        }
    }

    pub fn is_free(&self, page_num: PageNum) -> bool {
        self.free_list.contains(&page_num)
    }

    pub fn free_pages(&self) -> &[PageNum] {
        &self.free_list
    }

    pub fn set_free_pages(&mut self, pages: Vec<PageNum>) {
        self.free_list = pages;
    }

    pub fn num_pages(&self) -> u64 {
        self.num_pages
    }

    pub fn header_payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn set_header_payload(&mut self, payload: Vec<u8>) {
        self.payload = payload;
    }

    /// Room left for the header payload if the free page list is kept whole.
    pub fn header_payload_capacity(&self) -> usize {
        (self.page_size - FILE_HEADER_FIXED_SIZE - 4).saturating_sub(self.free_list.len() * 8)
    }

    pub fn allocate_transaction_id(&mut self) -> TransactionID {
        let tx_id = self.next_tx_id;
        self.next_tx_id += 1;
        tx_id
    }

    pub fn set_next_transaction_id(&mut self, tx_id: TransactionID) {
        if tx_id > self.next_tx_id {
            self.next_tx_id = tx_id;
        }
    }

    pub fn lsn(&self) -> Lsn {
        self.lsn
    }

    pub fn set_lsn(&mut self, lsn: Lsn) {
        if lsn > self.lsn {
            self.lsn = lsn;
        }
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }
}
