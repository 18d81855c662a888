use crate::core::constants::PageNum;
use crate::core::errors::*;
use std::collections::{BTreeSet, HashMap};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FreeSpaceEntry {
    pub page: PageNum,
    pub free: u32,
}

const ENTRY_SIZE: usize = 8 + 4;

/// Registry of record pages that still have room for more tuples.
///
/// Entries are kept ordered by free space so `find` returns the tightest
/// page that fits. The list is advisory: callers re-check the page itself
/// before storing into it.
#[derive(Debug, Default)]
pub struct FreeSpaceList {
    by_space: BTreeSet<(u32, PageNum)>,
    by_page: HashMap<PageNum, u32>,
}

impl FreeSpaceList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Smallest entry with at least `min_bytes` free.
    pub fn find(&self, min_bytes: usize) -> Option<FreeSpaceEntry> {
        let min = u32::try_from(min_bytes).ok()?;
        self.by_space
            .range((min, 0)..)
            .next()
            .map(|&(free, page)| FreeSpaceEntry { page, free })
    }

    pub fn get(&self, page: PageNum) -> Option<FreeSpaceEntry> {
        self.by_page.get(&page).map(|&free| FreeSpaceEntry { page, free })
    }

    /// Inserts or replaces the entry for `page`.
    pub fn add(&mut self, page: PageNum, free: u32) {
        if let Some(old) = self.by_page.insert(page, free) {
            self.by_space.remove(&(old, page));
        }
        self.by_space.insert((free, page));
    }

    pub fn remove(&mut self, page: PageNum) -> Option<FreeSpaceEntry> {
        let free = self.by_page.remove(&page)?;
        self.by_space.remove(&(free, page));
        Some(FreeSpaceEntry { page, free })
    }

    /// Changes the free byte count of an existing entry. Unknown pages are ignored.
    pub fn adjust(&mut self, page: PageNum, free: u32) {
        if self.by_page.contains_key(&page) {
            self.add(page, free);
        }
    }

    pub fn len(&self) -> usize {
        self.by_page.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_page.is_empty()
    }

    pub fn clear(&mut self) {
        self.by_space.clear();
        self.by_page.clear();
    }

    /// Entries in ascending free-space order.
    pub fn entries(&self) -> Vec<FreeSpaceEntry> {
        self.by_space
            .iter()
            .map(|&(free, page)| FreeSpaceEntry { page, free })
            .collect()
    }

    /// Encodes as many entries as fit in `capacity` bytes, roomiest pages first.
    pub fn serialize(&self, capacity: usize) -> Vec<u8> {
        let max_entries = capacity.saturating_sub(4) / ENTRY_SIZE;
        let count = self.len().min(max_entries);
        if count < self.len() {
            warn!(
                kept = count,
                dropped = self.len() - count,
                "free-space list does not fit in the file header"
            );
        }

        let mut buf = Vec::with_capacity(4 + count * ENTRY_SIZE);
        buf.extend_from_slice(&(count as u32).to_le_bytes());
        for &(free, page) in self.by_space.iter().rev().take(count) {
            buf.extend_from_slice(&page.to_le_bytes());
            buf.extend_from_slice(&free.to_le_bytes());
        }
        buf
    }

    pub fn deserialize(data: &[u8]) -> Result<Self> {
        let mut list = Self::new();
        if data.is_empty() {
            return Ok(list);
        }
        if data.len() < 4 {
            return Err(Error::DataCorruption {
                details: "free-space list header truncated".to_string(),
            });
        }

        let count = u32::from_le_bytes(data[0..4].try_into()?) as usize;
        if 4 + count * ENTRY_SIZE > data.len() {
            return Err(Error::DataCorruption {
                details: format!("free-space list claims {} entries in {} bytes", count, data.len()),
            });
        }

        let mut offset = 4;
        for _ in 0..count {
            let page = u64::from_le_bytes(data[offset..offset + 8].try_into()?);
            let free = u32::from_le_bytes(data[offset + 8..offset + 12].try_into()?);
            list.add(page, free);
            offset += ENTRY_SIZE;
        }

        Ok(list)
    }

    pub fn debug_dump(&self) {
        debug!(entries = self.len(), "free-space list");
        for entry in self.entries() {
            debug!(page = entry.page, free = entry.free, "free-space entry");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_is_best_fit() {
        let mut list = FreeSpaceList::new();
        list.add(1, 500);
        list.add(2, 100);
        list.add(3, 300);

        assert_eq!(list.find(50).unwrap().page, 2);
        assert_eq!(list.find(101).unwrap().page, 3);
        assert_eq!(list.find(300).unwrap().page, 3);
        assert_eq!(list.find(501), None);
    }

    #[test]
    fn test_add_replaces_and_adjust_ignores_unknown() {
        let mut list = FreeSpaceList::new();
        list.add(7, 200);
        list.add(7, 50);
        assert_eq!(list.len(), 1);
        assert_eq!(list.get(7).unwrap().free, 50);

        list.adjust(7, 400);
        assert_eq!(list.find(300).unwrap().page, 7);

        list.adjust(8, 1000);
        assert!(list.get(8).is_none());
    }

    #[test]
    fn test_remove() {
        let mut list = FreeSpaceList::new();
        list.add(4, 80);
        assert_eq!(list.remove(4), Some(FreeSpaceEntry { page: 4, free: 80 }));
        assert!(list.remove(4).is_none());
        assert!(list.find(0).is_none());
        assert!(list.is_empty());
    }

    #[test]
    fn test_serialization_keeps_roomiest_when_truncated() {
        let mut list = FreeSpaceList::new();
        list.add(1, 10);
        list.add(2, 900);
        list.add(3, 400);

        let full = FreeSpaceList::deserialize(&list.serialize(1024)).unwrap();
        assert_eq!(full.entries(), list.entries());

        let partial = FreeSpaceList::deserialize(&list.serialize(4 + 2 * ENTRY_SIZE)).unwrap();
        assert_eq!(partial.len(), 2);
        assert!(partial.get(1).is_none());
        assert_eq!(partial.get(2).unwrap().free, 900);
    }

    #[test]
    fn test_deserialize_rejects_bad_count() {
        let mut data = 5u32.to_le_bytes().to_vec();
        data.extend_from_slice(&[0u8; 12]);
        assert!(FreeSpaceList::deserialize(&data).is_err());
        assert!(FreeSpaceList::deserialize(&[]).unwrap().is_empty());
    }
}
