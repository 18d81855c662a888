use crate::core::address::Address;
use crate::core::constants::{Lsn, LSN_INVALID};
use crate::core::errors::*;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Read, Write};
use std::ops::Bound;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Key selection for scans.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexQuery {
    All,
    Equal(Vec<u8>),
    Prefix(Vec<u8>),
    Range(Bound<Vec<u8>>, Bound<Vec<u8>>),
}

impl IndexQuery {
    pub fn matches(&self, key: &[u8]) -> bool {
        match self {
            IndexQuery::All => true,
            IndexQuery::Equal(k) => key == k.as_slice(),
            IndexQuery::Prefix(p) => key.starts_with(p),
            IndexQuery::Range(lo, hi) => {
                let above = match lo {
                    Bound::Included(l) => key >= l.as_slice(),
                    Bound::Excluded(l) => key > l.as_slice(),
                    Bound::Unbounded => true,
                };
                let below = match hi {
                    Bound::Included(h) => key <= h.as_slice(),
                    Bound::Excluded(h) => key < h.as_slice(),
                    Bound::Unbounded => true,
                };
                above && below
            }
        }
    }

    /// Key bounds covering every match.
    pub fn bounds(&self) -> (Bound<Vec<u8>>, Bound<Vec<u8>>) {
        match self {
            IndexQuery::All => (Bound::Unbounded, Bound::Unbounded),
            IndexQuery::Equal(k) => (Bound::Included(k.clone()), Bound::Included(k.clone())),
            IndexQuery::Prefix(p) => {
                let upper = match prefix_successor(p) {
                    Some(s) => Bound::Excluded(s),
                    None => Bound::Unbounded,
                };
                (Bound::Included(p.clone()), upper)
            }
            IndexQuery::Range(lo, hi) => (lo.clone(), hi.clone()),
        }
    }

    /// The same query restricted to keys strictly greater than `key`.
    pub fn resume_after(&self, key: &[u8]) -> IndexQuery {
        let (_, upper) = self.bounds();
        IndexQuery::Range(Bound::Excluded(key.to_vec()), upper)
    }
}

// Smallest byte string greater than every string starting with `prefix`.
fn prefix_successor(prefix: &[u8]) -> Option<Vec<u8>> {
    let mut succ = prefix.to_vec();
    while let Some(last) = succ.pop() {
        if last < u8::MAX {
            succ.push(last + 1);
            return Some(succ);
        }
    }
    None
}

fn valid_bounds(lo: &Bound<Vec<u8>>, hi: &Bound<Vec<u8>>) -> bool {
    match (lo, hi) {
        (Bound::Included(l), Bound::Included(h)) => l <= h,
        (Bound::Included(l), Bound::Excluded(h))
        | (Bound::Excluded(l), Bound::Included(h))
        | (Bound::Excluded(l), Bound::Excluded(h)) => l < h,
        _ => true,
    }
}

/// Cooperative cancellation flag for long scans.
#[derive(Debug, Clone, Default)]
pub struct Termination(Arc<AtomicBool>);

impl Termination {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn terminate(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_terminated(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub fn check(&self, operation: &str) -> Result<()> {
        if self.is_terminated() {
            return Err(Error::Terminated { operation: operation.to_string() });
        }
        Ok(())
    }
}

/// Ordered key to address mapping used by the value store.
pub trait KeyIndex: Send {
    fn find_value(&self, key: &[u8]) -> Option<Address>;

    /// Returns the previous address for `key`, if any.
    fn add_value(&mut self, key: &[u8], address: Address) -> Option<Address>;

    fn remove_value(&mut self, key: &[u8]) -> Option<Address>;

    /// Visits matches in key order until the callback returns `false`.
    fn query(
        &self,
        query: &IndexQuery,
        callback: &mut dyn FnMut(&[u8], Address) -> Result<bool>,
    ) -> Result<()>;

    fn lsn(&self) -> Lsn;

    fn set_lsn(&mut self, lsn: Lsn);

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn flush(&mut self) -> Result<()>;
}

/// In-memory ordered index persisted as a checksummed snapshot file.
pub struct OrderedIndex {
    map: BTreeMap<Vec<u8>, Address>,
    lsn: Lsn,
    path: Option<PathBuf>,
    dirty: bool,
}

impl OrderedIndex {
    pub fn in_memory() -> Self {
        Self {
            map: BTreeMap::new(),
            lsn: LSN_INVALID,
            path: None,
            dirty: false,
        }
    }

    pub fn open(path: &Path) -> Result<Self> {
        let mut index = Self {
            path: Some(path.to_path_buf()),
            ..Self::in_memory()
        };

        if !path.exists() {
            return Ok(index);
        }

        let mut data = Vec::new();
        File::open(path)?.read_to_end(&mut data)?;
        index.load(&data)?;
        debug!(file = %path.display(), keys = index.map.len(), lsn = index.lsn, "loaded key index");

        Ok(index)
    }

    fn load(&mut self, data: &[u8]) -> Result<()> {
        if data.len() < 8 + 8 + 4 {
            return Err(Error::DataCorruption { details: "key index snapshot truncated".to_string() });
        }

        let body = &data[..data.len() - 4];
        let stored = u32::from_le_bytes(data[data.len() - 4..].try_into()?);
        if crc32fast::hash(body) != stored {
            return Err(Error::DataCorruption { details: "key index snapshot checksum mismatch".to_string() });
        }

        let count = u64::from_le_bytes(body[0..8].try_into()?);
        let mut offset = 8;
        for _ in 0..count {
            if offset + 4 > body.len() {
                return Err(Error::DataCorruption { details: "key index entry truncated".to_string() });
            }
            let klen = u32::from_le_bytes(body[offset..offset + 4].try_into()?) as usize;
            offset += 4;
            if offset + klen + 8 > body.len() {
                return Err(Error::DataCorruption { details: "key index entry truncated".to_string() });
            }
            let key = body[offset..offset + klen].to_vec();
            offset += klen;
            let address = Address::from_raw(u64::from_le_bytes(body[offset..offset + 8].try_into()?));
            offset += 8;
            self.map.insert(key, address);
        }

        if offset + 8 != body.len() {
            return Err(Error::DataCorruption { details: "key index snapshot has trailing bytes".to_string() });
        }
        self.lsn = u64::from_le_bytes(body[offset..offset + 8].try_into()?);
        Ok(())
    }

    fn snapshot(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(self.map.len() as u64).to_le_bytes());
        for (key, address) in &self.map {
            buf.extend_from_slice(&(key.len() as u32).to_le_bytes());
            buf.extend_from_slice(key);
            buf.extend_from_slice(&address.raw().to_le_bytes());
        }
        buf.extend_from_slice(&self.lsn.to_le_bytes());
        let crc = crc32fast::hash(&buf);
        buf.extend_from_slice(&crc.to_le_bytes());
        buf
    }
}

impl KeyIndex for OrderedIndex {
    fn find_value(&self, key: &[u8]) -> Option<Address> {
        self.map.get(key).copied()
    }

    fn add_value(&mut self, key: &[u8], address: Address) -> Option<Address> {
        self.dirty = true;
        self.map.insert(key.to_vec(), address)
    }

    fn remove_value(&mut self, key: &[u8]) -> Option<Address> {
        let previous = self.map.remove(key);
        if previous.is_some() {
            self.dirty = true;
        }
        previous
    }

    fn query(
        &self,
        query: &IndexQuery,
        callback: &mut dyn FnMut(&[u8], Address) -> Result<bool>,
    ) -> Result<()> {
        let (lo, hi) = query.bounds();
        if !valid_bounds(&lo, &hi) {
            return Ok(());
        }

        for (key, &address) in self.map.range::<Vec<u8>, _>((lo, hi)) {
            if !query.matches(key) {
                continue;
            }
            if !callback(key, address)? {
                break;
            }
        }
        Ok(())
    }

    fn lsn(&self) -> Lsn {
        self.lsn
    }

    fn set_lsn(&mut self, lsn: Lsn) {
        if lsn > self.lsn {
            self.lsn = lsn;
            self.dirty = true;
        }
    }

    fn len(&self) -> usize {
        self.map.len()
    }

    fn flush(&mut self) -> Result<()> {
        let path = match &self.path {
            Some(path) if self.dirty => path.clone(),
            _ => return Ok(()),
        };

        let mut tmp = path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);
        {
            let file = OpenOptions::new().write(true).create(true).truncate(true).open(&tmp)?;
            let mut writer = BufWriter::new(file);
            writer.write_all(&self.snapshot())?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        if let Err(e) = fs::rename(&tmp, &path) {
            warn!(file = %path.display(), error = %e, "failed to replace key index snapshot");
            return Err(e.into());
        }

        self.dirty = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn keys(index: &OrderedIndex, query: &IndexQuery) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        index
            .query(query, &mut |k, _| {
                out.push(k.to_vec());
                Ok(true)
            })
            .unwrap();
        out
    }

    fn populated() -> OrderedIndex {
        let mut index = OrderedIndex::in_memory();
        for (i, key) in ["apple", "apricot", "banana", "blueberry", "cherry"].iter().enumerate() {
            index.add_value(key.as_bytes(), Address::new(i as u64 + 1, 1));
        }
        index
    }

    #[test]
    fn test_add_find_remove() {
        let mut index = OrderedIndex::in_memory();
        assert_eq!(index.add_value(b"k", Address::new(1, 1)), None);
        assert_eq!(index.add_value(b"k", Address::new(2, 1)), Some(Address::new(1, 1)));
        assert_eq!(index.find_value(b"k"), Some(Address::new(2, 1)));
        assert_eq!(index.remove_value(b"k"), Some(Address::new(2, 1)));
        assert_eq!(index.find_value(b"k"), None);
    }

    #[test]
    fn test_prefix_and_range_queries() {
        let index = populated();

        assert_eq!(keys(&index, &IndexQuery::Prefix(b"ap".to_vec())), vec![b"apple".to_vec(), b"apricot".to_vec()]);
        assert_eq!(
            keys(&index, &IndexQuery::Range(Bound::Excluded(b"apricot".to_vec()), Bound::Included(b"blueberry".to_vec()))),
            vec![b"banana".to_vec(), b"blueberry".to_vec()]
        );
        assert_eq!(keys(&index, &IndexQuery::Equal(b"cherry".to_vec())), vec![b"cherry".to_vec()]);
        assert_eq!(keys(&index, &IndexQuery::All).len(), 5);
    }

    #[test]
    fn test_inverted_range_is_empty() {
        let index = populated();
        let query = IndexQuery::Range(Bound::Included(b"z".to_vec()), Bound::Included(b"a".to_vec()));
        assert!(keys(&index, &query).is_empty());
    }

    #[test]
    fn test_resume_after_continues_scan() {
        let index = populated();
        let query = IndexQuery::Prefix(b"b".to_vec());
        assert_eq!(keys(&index, &query.resume_after(b"banana")), vec![b"blueberry".to_vec()]);
    }

    #[test]
    fn test_prefix_successor() {
        assert_eq!(prefix_successor(b"ab"), Some(b"ac".to_vec()));
        assert_eq!(prefix_successor(&[0x61, 0xFF]), Some(vec![0x62]));
        assert_eq!(prefix_successor(&[0xFF, 0xFF]), None);
    }

    #[test]
    fn test_callback_can_stop() {
        let index = populated();
        let mut seen = 0;
        index
            .query(&IndexQuery::All, &mut |_, _| {
                seen += 1;
                Ok(seen < 2)
            })
            .unwrap();
        assert_eq!(seen, 2);
    }

    #[test]
    fn test_termination_token() {
        let token = Termination::new();
        assert!(token.check("scan").is_ok());
        token.clone().terminate();
        assert!(matches!(token.check("scan"), Err(Error::Terminated { .. })));
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("values-index");
        {
            let mut index = OrderedIndex::open(&path).unwrap();
            index.add_value(b"one", Address::new(3, 2));
            index.add_value(b"two", Address::new(4, 1));
            index.set_lsn(99);
            index.flush().unwrap();
        }

        let index = OrderedIndex::open(&path).unwrap();
        assert_eq!(index.len(), 2);
        assert_eq!(index.find_value(b"two"), Some(Address::new(4, 1)));
        assert_eq!(index.lsn(), 99);
    }

    #[test]
    fn test_corrupt_snapshot_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("values-index");
        {
            let mut index = OrderedIndex::open(&path).unwrap();
            index.add_value(b"one", Address::new(3, 2));
            index.flush().unwrap();
        }
        let mut data = fs::read(&path).unwrap();
        data[10] ^= 0xFF;
        fs::write(&path, &data).unwrap();

        assert!(matches!(OrderedIndex::open(&path), Err(Error::DataCorruption { .. })));
    }
}
