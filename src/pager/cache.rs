//! Bounded LRU bookkeeping over resident pages.
//!
//! The page data itself lives in the memory-mapped file; this cache tracks
//! which pages are hot, which are dirty, and which may not be evicted
//! because a caller currently pins them. Eviction decisions are returned to
//! the pager, which performs the actual writeback through the mmap.

use std::collections::VecDeque;

use rustc_hash::FxHashMap;

use super::PageId;

/// Outcome of an eviction decision: the page that fell out and whether its
/// content must be written back first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Evicted {
    /// Page chosen for eviction.
    pub id: PageId,
    /// Whether the page had unflushed writes.
    pub dirty: bool,
}

#[derive(Debug, Default)]
struct Slot {
    dirty: bool,
    pins: u32,
}

/// Count-bounded LRU over page ids.
///
/// Recency order is a queue with the most recently used page at the back.
/// A pinned page is skipped by eviction until its last pin drops.
#[derive(Debug)]
pub struct PageCache {
    capacity: usize,
    order: VecDeque<PageId>,
    slots: FxHashMap<PageId, Slot>,
}

impl PageCache {
    /// Creates a cache bounded to `capacity` resident pages (minimum 1).
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            order: VecDeque::new(),
            slots: FxHashMap::default(),
        }
    }

    /// Number of tracked pages.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Whether no page is tracked.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Records an access to `id`, returning a page to evict when the cache
    /// grew past capacity.
    pub fn touch(&mut self, id: PageId) -> Option<Evicted> {
        if self.slots.contains_key(&id) {
            if let Some(pos) = self.order.iter().position(|&p| p == id) {
                self.order.remove(pos);
            }
            self.order.push_back(id);
            return None;
        }

        self.slots.insert(id, Slot::default());
        self.order.push_back(id);

        if self.slots.len() <= self.capacity {
            return None;
        }
        self.evict_lru()
    }

    /// Evicts the least-recently-used unpinned page, if any.
    pub fn evict_lru(&mut self) -> Option<Evicted> {
        let victim_pos = self.order.iter().position(|id| {
            self.slots
                .get(id)
                .map(|slot| slot.pins == 0)
                .unwrap_or(true)
        })?;
        let id = self.order.remove(victim_pos)?;
        let slot = self.slots.remove(&id).unwrap_or_default();
        Some(Evicted {
            id,
            dirty: slot.dirty,
        })
    }

    /// Marks `id` as carrying unflushed writes.
    pub fn mark_dirty(&mut self, id: PageId) {
        self.slots.entry(id).or_default().dirty = true;
        if !self.order.contains(&id) {
            self.order.push_back(id);
        }
    }

    /// All currently dirty pages, in no particular order.
    pub fn dirty_pages(&self) -> Vec<PageId> {
        self.slots
            .iter()
            .filter(|(_, slot)| slot.dirty)
            .map(|(&id, _)| id)
            .collect()
    }

    /// Clears the dirty mark after a successful writeback.
    pub fn clear_dirty(&mut self, id: PageId) {
        if let Some(slot) = self.slots.get_mut(&id) {
            slot.dirty = false;
        }
    }

    /// Pins `id`, exempting it from eviction.
    pub fn pin(&mut self, id: PageId) {
        self.slots.entry(id).or_default().pins += 1;
        if !self.order.contains(&id) {
            self.order.push_back(id);
        }
    }

    /// Drops one pin from `id`.
    pub fn unpin(&mut self, id: PageId) {
        if let Some(slot) = self.slots.get_mut(&id) {
            slot.pins = slot.pins.saturating_sub(1);
        }
    }
}
