//! B+Tree Engine Module
//!
//! This module implements the **ordered**, **page-resident** B+Tree mapping
//! fixed-width composite keys to 8-byte payloads. One engine serves both
//! tree flavors: the entry layout (key width, optional per-entry metadata
//! block) is a runtime parameter, and the comparator is plain byte compare —
//! keys are stored big-endian precisely so that works.
//!
//! ## Design Overview
//!
//! Nodes live in 16 KiB pages managed by the [`pager`](crate::pager). A node
//! is either a **leaf** (sorted entries of `key | value | meta?`) or a
//! **branch** (sorted separator entries of `key | child`, plus a leftmost
//! child in the header). Leaves form a singly-linked list in key order; all
//! leaves sit at the same depth.
//!
//! # Node layout
//!
//! ```text
//! [ID_LE u32][FLAGS u8][_ u8][COUNT_LE u16][PARENT_LE u32][LINK_LE u32]
//! [ENTRY 0][ENTRY 1]...
//! ```
//!
//! `LINK` is the next-leaf pointer on leaves and the leftmost child on
//! branches. Entry capacity is derived, never stored:
//! `(PAGE_SIZE − 16) / entry_len`.
//!
//! # Algorithms
//!
//! - **Search** — binary search per node on raw key bytes. A key equal to a
//!   separator routes to the separator's right child.
//! - **Insert** — idempotent on exact match. A full leaf splits: the upper
//!   half moves to a fresh right sibling, the sibling is fully written and
//!   linked **before** the separator is promoted, and promotion always
//!   completes — cascading branch splits included — creating a new root when
//!   the old root overflows.
//! - **Delete** — removes the entry in place; rebalancing is deferred
//!   (underfull and even empty leaves stay in the chain). Temporal callers
//!   prefer [`BTree::update_meta`] to set tombstones instead.
//! - **Range scan** — descends to the first candidate leaf, then walks the
//!   leaf chain, copying entries out one at a time.
//!
//! # Guarantees
//!
//! - **Idempotent insert:** re-inserting an existing key changes nothing.
//! - **Leaf linkage:** walking `LINK` from the leftmost leaf visits every
//!   key in ascending order.
//! - **Failure containment:** page-extension failure surfaces
//!   [`PagerError::StorageFull`]; impossible counts or mismatched page ids
//!   surface [`TreeError::Corruption`] and abort the operation with no
//!   partial results.

mod iterator;

#[cfg(test)]
mod tests;

pub use iterator::RangeScan;

use std::path::Path;

use smallvec::SmallVec;
use thiserror::Error;
use tracing::{debug, info, trace};

use crate::keys::{EntryMeta, KeyError, ENTRY_META_LEN, TEMPORAL_KEY_LEN, TRIPLE_KEY_LEN};
use crate::pager::{PageId, Pager, PagerError, PAGE_SIZE};

// ------------------------------------------------------------------------------------------------
// Constants — node header
// ------------------------------------------------------------------------------------------------

/// Byte length of the node header at the start of every page.
pub const NODE_HEADER_LEN: usize = 16;

const OFF_ID: usize = 0;
const OFF_FLAGS: usize = 4;
const OFF_COUNT: usize = 6;
const OFF_PARENT: usize = 8;
const OFF_LINK: usize = 12;

const FLAG_LEAF: u8 = 0x01;

/// Defensive bound on tree depth; a descent deeper than this is a cycle.
const MAX_DEPTH: usize = 64;

// ------------------------------------------------------------------------------------------------
// Error Types
// ------------------------------------------------------------------------------------------------

/// Errors returned by B+Tree operations.
#[derive(Debug, Error)]
pub enum TreeError {
    /// Error from the page layer.
    #[error("Pager error: {0}")]
    Pager(#[from] PagerError),

    /// Error from key encoding/decoding.
    #[error("Key error: {0}")]
    Key(#[from] KeyError),

    /// Structural damage detected while reading a node.
    #[error("corruption: {0}")]
    Corruption(String),

    /// Internal invariant violation.
    #[error("Internal error: {0}")]
    Internal(String),
}

// ------------------------------------------------------------------------------------------------
// Entry layout
// ------------------------------------------------------------------------------------------------

/// Runtime description of one tree flavor's entry shape.
///
/// The whole engine is parameterized over this: the non-temporal flavor
/// stores bare 12-byte keys, the temporal flavor 36-byte keys plus a 16-byte
/// metadata block. Values are always 8 bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    /// Key width in bytes.
    pub key_len: usize,
    /// Per-entry metadata width in bytes (0 or 16).
    pub meta_len: usize,
}

impl Layout {
    /// Payload width, common to both flavors.
    pub const VALUE_LEN: usize = 8;

    /// Non-temporal flavor: `(s, p, o)` keys, no metadata.
    pub const TRIPLE: Layout = Layout {
        key_len: TRIPLE_KEY_LEN,
        meta_len: 0,
    };

    /// Temporal flavor: bitemporal keys plus the per-entry metadata block.
    pub const TEMPORAL: Layout = Layout {
        key_len: TEMPORAL_KEY_LEN,
        meta_len: ENTRY_META_LEN,
    };

    /// Bytes per leaf entry.
    pub fn leaf_entry_len(&self) -> usize {
        self.key_len + Self::VALUE_LEN + self.meta_len
    }

    /// Bytes per branch entry (key + child page id).
    pub fn branch_entry_len(&self) -> usize {
        self.key_len + 4
    }

    /// Maximum entries per leaf page.
    pub fn leaf_capacity(&self) -> usize {
        (PAGE_SIZE - NODE_HEADER_LEN) / self.leaf_entry_len()
    }

    /// Maximum separator entries per branch page.
    pub fn branch_capacity(&self) -> usize {
        (PAGE_SIZE - NODE_HEADER_LEN) / self.branch_entry_len()
    }
}

// ------------------------------------------------------------------------------------------------
// Copied-out entry
// ------------------------------------------------------------------------------------------------

/// One entry copied out of a leaf during lookup or scan.
///
/// Copying (rather than borrowing page bytes) keeps iterators free of page
/// pins across suspension points; an entry is at most 60 bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    /// Encoded key bytes in this tree's rotation order.
    pub key: SmallVec<[u8; TEMPORAL_KEY_LEN]>,
    /// 8-byte payload.
    pub value: u64,
    /// Decoded metadata block, for temporal trees.
    pub meta: Option<EntryMeta>,
}

// ------------------------------------------------------------------------------------------------
// Header accessors — explicit offsets, unaligned-safe reads
// ------------------------------------------------------------------------------------------------

fn read_u16(page: &[u8], off: usize) -> u16 {
    let mut buf = [0u8; 2];
    buf.copy_from_slice(&page[off..off + 2]);
    u16::from_le_bytes(buf)
}

fn read_u32(page: &[u8], off: usize) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&page[off..off + 4]);
    u32::from_le_bytes(buf)
}

fn read_u64(page: &[u8], off: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&page[off..off + 8]);
    u64::from_le_bytes(buf)
}

fn write_u16(page: &mut [u8], off: usize, v: u16) {
    page[off..off + 2].copy_from_slice(&v.to_le_bytes());
}

fn write_u32(page: &mut [u8], off: usize, v: u32) {
    page[off..off + 4].copy_from_slice(&v.to_le_bytes());
}

fn write_u64(page: &mut [u8], off: usize, v: u64) {
    page[off..off + 8].copy_from_slice(&v.to_le_bytes());
}

pub(crate) fn node_is_leaf(page: &[u8]) -> bool {
    page[OFF_FLAGS] & FLAG_LEAF != 0
}

pub(crate) fn node_count(page: &[u8]) -> usize {
    read_u16(page, OFF_COUNT) as usize
}

pub(crate) fn node_link(page: &[u8]) -> PageId {
    read_u32(page, OFF_LINK)
}

fn node_parent(page: &[u8]) -> PageId {
    read_u32(page, OFF_PARENT)
}

fn set_count(page: &mut [u8], count: usize) {
    write_u16(page, OFF_COUNT, count as u16);
}

fn set_parent(page: &mut [u8], parent: PageId) {
    write_u32(page, OFF_PARENT, parent);
}

fn set_link(page: &mut [u8], link: PageId) {
    write_u32(page, OFF_LINK, link);
}

fn init_node(page: &mut [u8], id: PageId, leaf: bool, parent: PageId) {
    page[..NODE_HEADER_LEN].fill(0);
    write_u32(page, OFF_ID, id);
    page[OFF_FLAGS] = if leaf { FLAG_LEAF } else { 0 };
    set_parent(page, parent);
}

// ------------------------------------------------------------------------------------------------
// Entry accessors
// ------------------------------------------------------------------------------------------------

fn leaf_entry_off(layout: Layout, slot: usize) -> usize {
    NODE_HEADER_LEN + slot * layout.leaf_entry_len()
}

pub(crate) fn leaf_key(page: &[u8], layout: Layout, slot: usize) -> &[u8] {
    let off = leaf_entry_off(layout, slot);
    &page[off..off + layout.key_len]
}

pub(crate) fn leaf_value(page: &[u8], layout: Layout, slot: usize) -> u64 {
    read_u64(page, leaf_entry_off(layout, slot) + layout.key_len)
}

pub(crate) fn leaf_meta<'p>(page: &'p [u8], layout: Layout, slot: usize) -> &'p [u8] {
    let off = leaf_entry_off(layout, slot) + layout.key_len + Layout::VALUE_LEN;
    &page[off..off + layout.meta_len]
}

fn branch_entry_off(layout: Layout, slot: usize) -> usize {
    NODE_HEADER_LEN + slot * layout.branch_entry_len()
}

fn branch_key(page: &[u8], layout: Layout, slot: usize) -> &[u8] {
    let off = branch_entry_off(layout, slot);
    &page[off..off + layout.key_len]
}

fn branch_child(page: &[u8], layout: Layout, slot: usize) -> PageId {
    read_u32(page, branch_entry_off(layout, slot) + layout.key_len)
}

/// Binary search over leaf keys: `Ok(slot)` on exact match, `Err(slot)` with
/// the insertion point otherwise.
pub(crate) fn leaf_search(page: &[u8], layout: Layout, key: &[u8]) -> Result<usize, usize> {
    let count = node_count(page);
    let mut lo = 0usize;
    let mut hi = count;
    while lo < hi {
        let mid = (lo + hi) / 2;
        match leaf_key(page, layout, mid).cmp(key) {
            std::cmp::Ordering::Less => lo = mid + 1,
            std::cmp::Ordering::Greater => hi = mid,
            std::cmp::Ordering::Equal => return Ok(mid),
        }
    }
    Err(lo)
}

/// Child to descend into for `key`: the number of separators `<= key` picks
/// the slot, so a key equal to a separator goes right.
fn branch_descend_child(page: &[u8], layout: Layout, key: &[u8]) -> PageId {
    let count = node_count(page);
    let mut lo = 0usize;
    let mut hi = count;
    while lo < hi {
        let mid = (lo + hi) / 2;
        if branch_key(page, layout, mid) <= key {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    if lo == 0 {
        node_link(page)
    } else {
        branch_child(page, layout, lo - 1)
    }
}

/// Insertion point for a new separator key in a branch node.
fn branch_insertion_point(page: &[u8], layout: Layout, key: &[u8]) -> usize {
    let count = node_count(page);
    let mut lo = 0usize;
    let mut hi = count;
    while lo < hi {
        let mid = (lo + hi) / 2;
        if branch_key(page, layout, mid) < key {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    lo
}

// ------------------------------------------------------------------------------------------------
// BTree
// ------------------------------------------------------------------------------------------------

/// A single B+Tree over one page file.
#[derive(Debug)]
pub struct BTree {
    pager: Pager,
    layout: Layout,
}

impl BTree {
    /// Opens (or creates) a tree at `path` with the given entry layout.
    ///
    /// A fresh file gets its root allocated as an empty leaf and the
    /// metadata fence run immediately, so even an empty tree is recoverable.
    pub fn open(
        path: impl AsRef<Path>,
        layout: Layout,
        cache_pages: usize,
    ) -> Result<Self, TreeError> {
        let (pager, fresh) = Pager::open(path, cache_pages)?;
        let mut tree = Self { pager, layout };

        if fresh || tree.pager.meta().root == 0 {
            let root = tree.pager.allocate()?;
            init_node(tree.pager.page_mut(root)?, root, true, 0);
            tree.pager.set_root(root);
            tree.pager.commit()?;
            info!(path = %tree.pager.path().display(), root, "tree initialized");
        }
        Ok(tree)
    }

    /// This tree's entry layout.
    pub fn layout(&self) -> Layout {
        self.layout
    }

    /// Number of live entries.
    pub fn entry_count(&self) -> u64 {
        self.pager.meta().entry_count
    }

    /// Root page id (the value readers snapshot at iteration start).
    pub fn root(&self) -> PageId {
        self.pager.meta().root
    }

    /// Pages allocated in the backing file.
    pub fn allocated_pages(&self) -> u64 {
        self.pager.allocated_pages()
    }

    /// On-disk footprint in bytes.
    pub fn file_len(&self) -> u64 {
        self.pager.file_len()
    }

    /// Tree depth (1 = root is a leaf), walking the leftmost spine.
    pub fn depth(&self) -> Result<u32, TreeError> {
        let mut node = self.root();
        let mut depth = 1u32;
        loop {
            let page = self.checked_page(node)?;
            if node_is_leaf(page) {
                return Ok(depth);
            }
            let next = node_link(page);
            if next == 0 || depth as usize > MAX_DEPTH {
                return Err(TreeError::Corruption(format!(
                    "branch {node} without leftmost child"
                )));
            }
            node = next;
            depth += 1;
        }
    }

    /// Runs the two-phase durability fence (pages, then metadata).
    pub fn commit(&mut self) -> Result<(), TreeError> {
        Ok(self.pager.commit()?)
    }

    /// Inserts `key → value` (+ metadata for temporal layouts).
    ///
    /// Returns `false` — with the tree unchanged — when the exact key is
    /// already present.
    pub fn insert(
        &mut self,
        key: &[u8],
        value: u64,
        meta: Option<&EntryMeta>,
    ) -> Result<bool, TreeError> {
        self.check_key(key)?;
        loop {
            let (leaf_id, path) = self.descend(key)?;
            let (slot, count) = {
                let page = self.checked_page(leaf_id)?;
                match leaf_search(page, self.layout, key) {
                    Ok(_) => return Ok(false),
                    Err(slot) => (slot, node_count(page)),
                }
            };

            if count < self.layout.leaf_capacity() {
                self.leaf_insert_at(leaf_id, slot, key, value, meta)?;
                let n = self.pager.meta().entry_count + 1;
                self.pager.set_entry_count(n);
                trace!(leaf = leaf_id, slot, "entry inserted");
                return Ok(true);
            }

            // Full leaf: split, then retry the descent — the separator may
            // route the key into the new sibling.
            self.split_leaf(leaf_id, &path)?;
        }
    }

    /// Exact-key lookup.
    pub fn point_lookup(&self, key: &[u8]) -> Result<Option<TreeEntry>, TreeError> {
        self.check_key(key)?;
        let (leaf_id, _) = self.descend(key)?;
        let page = self.checked_page(leaf_id)?;
        match leaf_search(page, self.layout, key) {
            Ok(slot) => Ok(Some(self.copy_entry(page, slot)?)),
            Err(_) => Ok(None),
        }
    }

    /// Removes the exact key, returning whether it was present.
    ///
    /// Rebalancing is deferred: the leaf may go underfull (or empty) and
    /// stays in the chain.
    pub fn remove(&mut self, key: &[u8]) -> Result<bool, TreeError> {
        self.check_key(key)?;
        let (leaf_id, _) = self.descend(key)?;
        let layout = self.layout;
        let entry_len = layout.leaf_entry_len();

        let removed = {
            let page = self.pager.page_mut(leaf_id)?;
            match leaf_search(page, layout, key) {
                Err(_) => false,
                Ok(slot) => {
                    let count = node_count(page);
                    let start = leaf_entry_off(layout, slot);
                    let end = leaf_entry_off(layout, count);
                    page.copy_within(start + entry_len..end, start);
                    set_count(page, count - 1);
                    true
                }
            }
        };
        if removed {
            let n = self.pager.meta().entry_count.saturating_sub(1);
            self.pager.set_entry_count(n);
        }
        Ok(removed)
    }

    /// Rewrites the metadata block of the exact key in place.
    ///
    /// Only meaningful for layouts that carry metadata; the entry count is
    /// untouched (a tombstone is still an entry).
    pub fn update_meta(
        &mut self,
        key: &[u8],
        f: impl FnOnce(&mut EntryMeta),
    ) -> Result<bool, TreeError> {
        self.check_key(key)?;
        if self.layout.meta_len == 0 {
            return Err(TreeError::Internal(
                "metadata update on a layout without metadata".into(),
            ));
        }
        let (leaf_id, _) = self.descend(key)?;
        let layout = self.layout;

        let page = self.pager.page_mut(leaf_id)?;
        match leaf_search(page, layout, key) {
            Err(_) => Ok(false),
            Ok(slot) => {
                let off = leaf_entry_off(layout, slot) + layout.key_len + Layout::VALUE_LEN;
                let mut meta = EntryMeta::decode(&page[off..off + layout.meta_len])?;
                f(&mut meta);
                page[off..off + layout.meta_len].copy_from_slice(&meta.encode());
                Ok(true)
            }
        }
    }

    /// Streaming scan over `[min_key, max_key]` in ascending key order.
    ///
    /// An inverted range yields nothing.
    pub fn range_scan(&self, min_key: &[u8], max_key: &[u8]) -> Result<RangeScan<'_>, TreeError> {
        self.check_key(min_key)?;
        self.check_key(max_key)?;
        RangeScan::new(self, min_key, max_key)
    }

    // --------------------------------------------------------------------------------------------
    // Internals — descent and validation
    // --------------------------------------------------------------------------------------------

    pub(crate) fn pager(&self) -> &Pager {
        &self.pager
    }

    /// Leaf responsible for `key` under the current root.
    pub(crate) fn find_leaf(&self, key: &[u8]) -> Result<PageId, TreeError> {
        Ok(self.descend(key)?.0)
    }

    fn check_key(&self, key: &[u8]) -> Result<(), TreeError> {
        if key.len() != self.layout.key_len {
            return Err(TreeError::Key(KeyError::InvalidLength {
                expected: self.layout.key_len,
                actual: key.len(),
            }));
        }
        Ok(())
    }

    /// Reads a page and validates its structural sanity.
    pub(crate) fn checked_page(&self, id: PageId) -> Result<&[u8], TreeError> {
        let layout = self.layout;
        let page = self.pager.page(id)?;
        if read_u32(page, OFF_ID) != id {
            return Err(TreeError::Corruption(format!(
                "page {id} carries id {}",
                read_u32(page, OFF_ID)
            )));
        }
        let capacity = if node_is_leaf(page) {
            layout.leaf_capacity()
        } else {
            layout.branch_capacity()
        };
        if node_count(page) > capacity {
            return Err(TreeError::Corruption(format!(
                "page {id} claims {} entries, capacity {capacity}",
                node_count(page)
            )));
        }
        Ok(page)
    }

    /// Walks from the root to the leaf responsible for `key`, recording the
    /// branch pages traversed (root first).
    fn descend(&self, key: &[u8]) -> Result<(PageId, SmallVec<[PageId; 8]>), TreeError> {
        let mut node = self.root();
        let mut path: SmallVec<[PageId; 8]> = SmallVec::new();
        loop {
            if path.len() > MAX_DEPTH {
                return Err(TreeError::Corruption("descent exceeded max depth".into()));
            }
            let page = self.checked_page(node)?;
            if node_is_leaf(page) {
                return Ok((node, path));
            }
            let child = branch_descend_child(page, self.layout, key);
            if child == 0 {
                return Err(TreeError::Corruption(format!(
                    "branch {node} resolved child 0"
                )));
            }
            path.push(node);
            node = child;
        }
    }

    fn copy_entry(&self, page: &[u8], slot: usize) -> Result<TreeEntry, TreeError> {
        let layout = self.layout;
        let mut key = SmallVec::new();
        key.extend_from_slice(leaf_key(page, layout, slot));
        let value = leaf_value(page, layout, slot);
        let meta = if layout.meta_len > 0 {
            Some(EntryMeta::decode(leaf_meta(page, layout, slot))?)
        } else {
            None
        };
        Ok(TreeEntry { key, value, meta })
    }

    // --------------------------------------------------------------------------------------------
    // Internals — mutation
    // --------------------------------------------------------------------------------------------

    fn leaf_insert_at(
        &mut self,
        leaf_id: PageId,
        slot: usize,
        key: &[u8],
        value: u64,
        meta: Option<&EntryMeta>,
    ) -> Result<(), TreeError> {
        let layout = self.layout;
        let entry_len = layout.leaf_entry_len();
        let page = self.pager.page_mut(leaf_id)?;
        let count = node_count(page);

        let start = leaf_entry_off(layout, slot);
        let end = leaf_entry_off(layout, count);
        page.copy_within(start..end, start + entry_len);

        page[start..start + layout.key_len].copy_from_slice(key);
        write_u64(page, start + layout.key_len, value);
        if layout.meta_len > 0 {
            let meta = meta.copied().unwrap_or_default();
            page[start + layout.key_len + Layout::VALUE_LEN..start + entry_len]
                .copy_from_slice(&meta.encode());
        }
        set_count(page, count + 1);
        Ok(())
    }

    /// Splits a full leaf, promoting the right sibling's smallest key.
    ///
    /// The new sibling is fully written before it is linked into the chain,
    /// and the parent separator is inserted only after that — a reader
    /// interleaving with the split never observes a half-built page.
    fn split_leaf(&mut self, leaf_id: PageId, path: &[PageId]) -> Result<(), TreeError> {
        let layout = self.layout;
        let entry_len = layout.leaf_entry_len();

        let (count, parent, old_link) = {
            let page = self.checked_page(leaf_id)?;
            (node_count(page), node_parent(page), node_link(page))
        };
        let keep = count / 2;
        let moved = count - keep;

        let mut carry = vec![0u8; moved * entry_len];
        {
            let page = self.pager.page(leaf_id)?;
            let start = leaf_entry_off(layout, keep);
            carry.copy_from_slice(&page[start..start + moved * entry_len]);
        }

        let right_id = self.pager.allocate()?;
        let mut separator: SmallVec<[u8; TEMPORAL_KEY_LEN]> = SmallVec::new();
        separator.extend_from_slice(&carry[..layout.key_len]);
        {
            let page = self.pager.page_mut(right_id)?;
            init_node(page, right_id, true, parent);
            set_link(page, old_link);
            let start = NODE_HEADER_LEN;
            page[start..start + carry.len()].copy_from_slice(&carry);
            set_count(page, moved);
        }
        {
            let page = self.pager.page_mut(leaf_id)?;
            set_count(page, keep);
            set_link(page, right_id);
        }
        debug!(left = leaf_id, right = right_id, moved, "leaf split");

        self.insert_into_parent(path, leaf_id, &separator, right_id)
    }

    /// Promotes `separator` (with right child `right_id`) into the parent of
    /// `left_id`, splitting branches — and growing a new root — as needed.
    fn insert_into_parent(
        &mut self,
        path: &[PageId],
        left_id: PageId,
        separator: &[u8],
        right_id: PageId,
    ) -> Result<(), TreeError> {
        let layout = self.layout;

        let Some((&parent_id, upper_path)) = path.split_last() else {
            // The split node was the root: grow the tree by one level.
            let new_root = self.pager.allocate()?;
            {
                let page = self.pager.page_mut(new_root)?;
                init_node(page, new_root, false, 0);
                set_link(page, left_id);
                let off = branch_entry_off(layout, 0);
                page[off..off + layout.key_len].copy_from_slice(separator);
                write_u32(page, off + layout.key_len, right_id);
                set_count(page, 1);
            }
            set_parent(self.pager.page_mut(left_id)?, new_root);
            set_parent(self.pager.page_mut(right_id)?, new_root);
            self.pager.set_root(new_root);
            debug!(new_root, left = left_id, right = right_id, "root split");
            return Ok(());
        };

        let count = {
            let page = self.checked_page(parent_id)?;
            node_count(page)
        };

        let target = if count < layout.branch_capacity() {
            parent_id
        } else {
            // Full parent: split it first, then route the separator into
            // whichever half now owns its key range (equal goes right).
            let (mid_key, parent_right) = self.split_branch(parent_id, upper_path)?;
            if separator < mid_key.as_slice() {
                parent_id
            } else {
                parent_right
            }
        };

        {
            let page = self.pager.page_mut(target)?;
            let slot = branch_insertion_point(page, layout, separator);
            let count = node_count(page);
            let entry_len = layout.branch_entry_len();
            let start = branch_entry_off(layout, slot);
            let end = branch_entry_off(layout, count);
            page.copy_within(start..end, start + entry_len);
            page[start..start + layout.key_len].copy_from_slice(separator);
            write_u32(page, start + layout.key_len, right_id);
            set_count(page, count + 1);
        }
        set_parent(self.pager.page_mut(right_id)?, target);
        Ok(())
    }

    /// Splits a full branch node, promoting its middle key upward.
    ///
    /// Unlike a leaf split, the middle key leaves both halves: it travels up
    /// as the new separator. Children moved to the right half get their
    /// parent pointers rewritten.
    fn split_branch(
        &mut self,
        branch_id: PageId,
        upper_path: &[PageId],
    ) -> Result<(SmallVec<[u8; TEMPORAL_KEY_LEN]>, PageId), TreeError> {
        let layout = self.layout;
        let entry_len = layout.branch_entry_len();

        let (count, parent) = {
            let page = self.checked_page(branch_id)?;
            (node_count(page), node_parent(page))
        };
        let mid = count / 2;

        let mut mid_key: SmallVec<[u8; TEMPORAL_KEY_LEN]> = SmallVec::new();
        let mut right_leftmost: PageId = 0;
        let moved = count - mid - 1;
        let mut carry = vec![0u8; moved * entry_len];
        {
            let page = self.pager.page(branch_id)?;
            mid_key.extend_from_slice(branch_key(page, layout, mid));
            right_leftmost = branch_child(page, layout, mid);
            let start = branch_entry_off(layout, mid + 1);
            carry.copy_from_slice(&page[start..start + moved * entry_len]);
        }

        let right_id = self.pager.allocate()?;
        {
            let page = self.pager.page_mut(right_id)?;
            init_node(page, right_id, false, parent);
            set_link(page, right_leftmost);
            let start = NODE_HEADER_LEN;
            page[start..start + carry.len()].copy_from_slice(&carry);
            set_count(page, moved);
        }
        {
            let page = self.pager.page_mut(branch_id)?;
            set_count(page, mid);
        }

        // Re-home every child that moved.
        let mut moved_children: SmallVec<[PageId; 64]> = SmallVec::new();
        moved_children.push(right_leftmost);
        {
            let page = self.checked_page(right_id)?;
            for slot in 0..node_count(page) {
                moved_children.push(branch_child(page, layout, slot));
            }
        }
        for child in moved_children {
            if child == 0 {
                return Err(TreeError::Corruption(format!(
                    "branch {branch_id} carried child 0"
                )));
            }
            set_parent(self.pager.page_mut(child)?, right_id);
        }

        debug!(left = branch_id, right = right_id, "branch split");
        self.insert_into_parent(upper_path, branch_id, &mid_key, right_id)?;
        Ok((mid_key, right_id))
    }
}
