use crate::core::address::Address;
use crate::core::constants::*;
use crate::core::data_page::{DataPage, OverflowChain};
use crate::core::errors::*;
use crate::core::store::StoreInner;
use std::collections::HashSet;
use std::io::{self, Read, Seek, SeekFrom};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::warn;

#[derive(Debug, Clone, Copy)]
struct Segment {
    page: PageNum,
    start: u64,
    len: u64,
    next: PageNum,
}

enum Source {
    Single,
    Overflow {
        chain: OverflowChain,
        segments: Vec<Segment>,
        visited: HashSet<PageNum>,
    },
}

/// Lazy reader over one stored value.
///
/// Overflow values are fetched one page at a time; the store lock is taken
/// only for each fetch, so a mutation between fetches may be observed.
/// Seeking backwards re-reads pages already discovered.
pub struct ValueStream {
    store: Arc<Mutex<StoreInner>>,
    address: Address,
    source: Source,
    len: u64,
    pos: u64,
    /// Start offset and bytes of the buffered page.
    current: Option<(u64, Vec<u8>)>,
}

impl ValueStream {
    pub(crate) fn open(store: Arc<Mutex<StoreInner>>, address: Address) -> Result<Option<Self>> {
        let (source, len, current) = {
            let mut inner = lock(&store)?;
            match DataPage::resolve(&mut inner.file, address)? {
                None => return Ok(None),
                Some(single @ DataPage::Single(_)) => match single.read(&mut inner.file)? {
                    Some(value) => (Source::Single, value.len() as u64, Some((0, value))),
                    None => return Ok(None),
                },
                Some(DataPage::Overflow(chain)) => {
                    let len = chain.value_len(&mut inner.file)? as u64;
                    let source = Source::Overflow {
                        chain,
                        segments: Vec::new(),
                        visited: HashSet::new(),
                    };
                    (source, len, None)
                }
            }
        };

        Ok(Some(Self {
            store,
            address,
            source,
            len,
            pos: 0,
            current,
        }))
    }

    pub fn address(&self) -> Address {
        self.address
    }

    /// Total value length as recorded when the stream was opened.
    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn position(&self) -> u64 {
        self.pos
    }

    fn fetch(&self, chain: &OverflowChain, page: PageNum) -> Result<(Vec<u8>, PageNum)> {
        let mut inner = lock(&self.store)?;
        let _pin = inner.file.pin(page)?;
        chain.chunk(&mut inner.file, page)
    }

    // Buffers the page holding `pos`. `false` when the chain ends before it.
    fn ensure_loaded(&mut self) -> Result<bool> {
        let pos = self.pos;
        if let Some((start, bytes)) = &self.current {
            if *start <= pos && pos < start + bytes.len() as u64 {
                return Ok(true);
            }
        }

        let (chain, known) = match &self.source {
            Source::Single => return Ok(false),
            Source::Overflow { chain, segments, .. } => (
                *chain,
                segments
                    .iter()
                    .find(|s| s.start <= pos && pos < s.start + s.len)
                    .copied(),
            ),
        };

        if let Some(segment) = known {
            let (bytes, _) = self.fetch(&chain, segment.page)?;
            self.current = Some((segment.start, bytes));
            return Ok(true);
        }

        loop {
            let (page, start) = match &self.source {
                Source::Overflow { segments, .. } => match segments.last() {
                    Some(last) => (last.next, last.start + last.len),
                    None => (chain.first_page(), 0),
                },
                Source::Single => return Ok(false),
            };

            if page == NO_PAGE {
                warn!(address = %self.address, pos, "overflow chain ends before recorded length");
                return Ok(false);
            }

            let (bytes, next) = self.fetch(&chain, page)?;
            if let Source::Overflow { segments, visited, .. } = &mut self.source {
                if !visited.insert(page) || segments.len() >= MAX_OVERFLOW_CHAIN_LENGTH {
                    warn!(address = %self.address, page, "overflow chain loops; stream truncated");
                    return Ok(false);
                }
                segments.push(Segment {
                    page,
                    start,
                    len: bytes.len() as u64,
                    next,
                });
            }

            let found = start <= pos && pos < start + bytes.len() as u64;
            self.current = Some((start, bytes));
            if found {
                return Ok(true);
            }
        }
    }
}

impl Read for ValueStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() || self.pos >= self.len {
            return Ok(0);
        }
        if !self.ensure_loaded().map_err(to_io)? {
            return Ok(0);
        }

        let (start, bytes) = match &self.current {
            Some(current) => current,
            None => return Ok(0),
        };
        let offset = (self.pos - start) as usize;
        let n = buf
            .len()
            .min(bytes.len() - offset)
            .min((self.len - self.pos) as usize);
        buf[..n].copy_from_slice(&bytes[offset..offset + n]);
        self.pos += n as u64;
        Ok(n)
    }
}

impl Seek for ValueStream {
    fn seek(&mut self, from: SeekFrom) -> io::Result<u64> {
        let target = match from {
            SeekFrom::Start(n) => Some(n),
            SeekFrom::End(delta) => self.len.checked_add_signed(delta),
            SeekFrom::Current(delta) => self.pos.checked_add_signed(delta),
        };
        match target {
            Some(pos) => {
                self.pos = pos;
                Ok(pos)
            }
            None => Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "seek to a negative or overflowing position",
            )),
        }
    }
}

fn lock(store: &Arc<Mutex<StoreInner>>) -> Result<MutexGuard<'_, StoreInner>> {
    let guard = store.lock().map_err(|_| Error::LockPoisoned {
        lock_name: "value store".to_string(),
    })?;
    if guard.closed {
        return Err(Error::StoreClosed);
    }
    Ok(guard)
}

fn to_io(err: Error) -> io::Error {
    match err {
        Error::Io(msg) => io::Error::new(io::ErrorKind::Other, msg),
        other => io::Error::new(io::ErrorKind::InvalidData, other),
    }
}
