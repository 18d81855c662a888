use crate::core::constants::{Lsn, PageNum};
use crate::core::metrics::Metrics;
use crate::core::page::Page;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Upper bound on second-chance credits one entry can hold.
pub const MAX_CREDITS: u32 = 3;

struct Node {
    page: Page,
    dirty: bool,
    pins: Arc<AtomicUsize>,
    credits: u32,
    prev: Option<usize>,
    next: Option<usize>,
}

/// Keeps a page resident while held. Dropping the guard releases the pin.
#[derive(Debug)]
pub struct PinGuard {
    page_num: PageNum,
    pins: Arc<AtomicUsize>,
}

impl PinGuard {
    pub fn page_num(&self) -> PageNum {
        self.page_num
    }
}

impl Drop for PinGuard {
    fn drop(&mut self) {
        self.pins.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Bounded cache of live pages for one file.
///
/// Entries live in an arena threaded by a doubly linked list, most recently
/// used at the head. Eviction walks from the tail, never touches pinned
/// entries, and lets entries with credits survive one more round. Dirty
/// victims are handed back to the caller, who must write them out.
pub struct DataCache {
    capacity: usize,
    map: HashMap<PageNum, usize>,
    nodes: Vec<Option<Node>>,
    head: Option<usize>,
    tail: Option<usize>,
    free_slots: Vec<usize>,
    metrics: Arc<Metrics>,
}

impl DataCache {
    pub fn new(capacity: usize, metrics: Arc<Metrics>) -> Self {
        Self {
            capacity: capacity.max(1),
            map: HashMap::new(),
            nodes: Vec::new(),
            head: None,
            tail: None,
            free_slots: Vec::new(),
            metrics,
        }
    }

    fn node(&self, idx: usize) -> Option<&Node> {
        self.nodes.get(idx).and_then(|n| n.as_ref())
    }

    fn node_mut(&mut self, idx: usize) -> Option<&mut Node> {
        self.nodes.get_mut(idx).and_then(|n| n.as_mut())
    }

    fn unlink(&mut self, idx: usize) {
        let (prev, next) = match self.node(idx) {
            Some(node) => (node.prev, node.next),
            None => return,
        };

        match prev {
            Some(p) => {
                if let Some(node) = self.node_mut(p) {
                    node.next = next;
                }
            }
            None => self.head = next,
        }
        match next {
            Some(n) => {
                if let Some(node) = self.node_mut(n) {
                    node.prev = prev;
                }
            }
            None => self.tail = prev,
        }
    }

    fn push_front(&mut self, idx: usize) {
        let old_head = self.head;
        if let Some(node) = self.node_mut(idx) {
            node.prev = None;
            node.next = old_head;
        }
        if let Some(h) = old_head {
            if let Some(node) = self.node_mut(h) {
                node.prev = Some(idx);
            }
        }
        self.head = Some(idx);
        if self.tail.is_none() {
            self.tail = Some(idx);
        }
    }

    fn move_to_front(&mut self, idx: usize) {
        if self.head == Some(idx) {
            return;
        }
        self.unlink(idx);
        self.push_front(idx);
    }

    fn take_node(&mut self, idx: usize) -> Option<Node> {
        self.unlink(idx);
        let node = self.nodes.get_mut(idx)?.take()?;
        self.map.remove(&node.page.num());
        self.free_slots.push(idx);
        Some(node)
    }

    pub fn contains(&self, page_num: PageNum) -> bool {
        self.map.contains_key(&page_num)
    }

    /// Looks a page up and marks it most recently used.
    pub fn get(&mut self, page_num: PageNum) -> Option<&Page> {
        let idx = *self.map.get(&page_num)?;
        self.move_to_front(idx);
        self.node(idx).map(|n| &n.page)
    }

    /// Mutable access; the entry becomes dirty.
    pub fn get_mut(&mut self, page_num: PageNum) -> Option<&mut Page> {
        let idx = *self.map.get(&page_num)?;
        self.move_to_front(idx);
        let node = self.node_mut(idx)?;
        if !node.dirty {
            node.dirty = true;
            self.refresh_dirty_gauge();
        }
        self.node_mut(idx).map(|n| &mut n.page)
    }

    /// Read access that leaves the LRU order alone.
    pub fn peek(&self, page_num: PageNum) -> Option<&Page> {
        let idx = *self.map.get(&page_num)?;
        self.node(idx).map(|n| &n.page)
    }

    /// Inserts or replaces a page at the head, granting it `boost` credits.
    /// Returns the dirty pages evicted to stay within capacity.
    pub fn add(&mut self, page: Page, boost: u32, dirty: bool) -> Vec<Page> {
        let page_num = page.num();
        let boost = boost.min(MAX_CREDITS);

        let idx = if let Some(&idx) = self.map.get(&page_num) {
            if let Some(node) = self.node_mut(idx) {
                node.page = page;
                node.dirty |= dirty;
                node.credits = node.credits.max(boost);
            }
            self.move_to_front(idx);
            idx
        } else {
            let node = Node {
                page,
                dirty,
                pins: Arc::new(AtomicUsize::new(0)),
                credits: boost,
                prev: None,
                next: None,
            };
            let idx = match self.free_slots.pop() {
                Some(idx) => {
                    self.nodes[idx] = Some(node);
                    idx
                }
                None => {
                    self.nodes.push(Some(node));
                    self.nodes.len() - 1
                }
            };
            self.map.insert(page_num, idx);
            self.push_front(idx);
            idx
        };

        let mut victims = Vec::new();
        while self.map.len() > self.capacity {
            match self.evict_one(idx) {
                Some(node) => {
                    self.metrics.cache_eviction();
                    if node.dirty {
                        victims.push(node.page);
                    }
                }
                // everything else is pinned; grow past capacity for now
                None => break,
            }
        }

        self.refresh_dirty_gauge();
        victims
    }

    fn evict_one(&mut self, protect: usize) -> Option<Node> {
        let mut steps = self.map.len() * (MAX_CREDITS as usize + 1);
        let mut cursor = self.tail;
        let mut moved = false;

        while steps > 0 {
            steps -= 1;

            let idx = match cursor {
                Some(idx) => idx,
                None if moved => {
                    moved = false;
                    match self.tail {
                        Some(t) => t,
                        None => return None,
                    }
                }
                None => return None,
            };

            let (prev, pinned, credits) = match self.node(idx) {
                Some(node) => (node.prev, node.pins.load(Ordering::Acquire) > 0, node.credits),
                None => return None,
            };

            if idx == protect || pinned {
                cursor = prev;
                continue;
            }

            if credits > 0 {
                if let Some(node) = self.node_mut(idx) {
                    node.credits -= 1;
                }
                self.move_to_front(idx);
                moved = true;
                cursor = prev;
                continue;
            }

            return self.take_node(idx);
        }

        None
    }

    /// Drops a page from the cache, returning it (dirty or not).
    pub fn remove(&mut self, page_num: PageNum) -> Option<Page> {
        let idx = *self.map.get(&page_num)?;
        let node = self.take_node(idx)?;
        self.refresh_dirty_gauge();
        Some(node.page)
    }

    pub fn pin(&mut self, page_num: PageNum) -> Option<PinGuard> {
        let idx = *self.map.get(&page_num)?;
        let node = self.node(idx)?;
        node.pins.fetch_add(1, Ordering::AcqRel);
        Some(PinGuard {
            page_num,
            pins: Arc::clone(&node.pins),
        })
    }

    #[cfg(test)]
    pub(crate) fn is_pinned(&self, page_num: PageNum) -> bool {
        self.map
            .get(&page_num)
            .and_then(|&idx| self.node(idx))
            .map(|n| n.pins.load(Ordering::Acquire) > 0)
            .unwrap_or(false)
    }

    #[cfg(test)]
    pub(crate) fn mark_dirty(&mut self, page_num: PageNum) {
        if let Some(&idx) = self.map.get(&page_num) {
            if let Some(node) = self.node_mut(idx) {
                node.dirty = true;
            }
            self.refresh_dirty_gauge();
        }
    }

    pub fn mark_clean(&mut self, page_num: PageNum) {
        if let Some(&idx) = self.map.get(&page_num) {
            if let Some(node) = self.node_mut(idx) {
                node.dirty = false;
            }
            self.refresh_dirty_gauge();
        }
    }

    #[cfg(test)]
    pub(crate) fn is_dirty(&self, page_num: PageNum) -> bool {
        self.map
            .get(&page_num)
            .and_then(|&idx| self.node(idx))
            .map(|n| n.dirty)
            .unwrap_or(false)
    }

    /// Dirty pages with their LSNs, ascending by page number.
    pub fn dirty_pages(&self) -> Vec<(PageNum, Lsn)> {
        let mut dirty: Vec<(PageNum, Lsn)> = self
            .nodes
            .iter()
            .flatten()
            .filter(|n| n.dirty)
            .map(|n| (n.page.num(), n.page.lsn()))
            .collect();
        dirty.sort_unstable();
        dirty
    }

    pub fn dirty_count(&self) -> usize {
        self.nodes.iter().flatten().filter(|n| n.dirty).count()
    }

    fn refresh_dirty_gauge(&self) {
        self.metrics.set_dirty_pages(self.dirty_count());
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
