//! Leaf-chain range scan.
//!
//! Finds the leaf holding the lower bound, then walks sibling links,
//! copying one entry out per step. Entries are copied — never borrowed —
//! so no page stays pinned between steps and a scan can be suspended
//! indefinitely between `next()` calls.

use smallvec::SmallVec;

use super::{leaf_key, leaf_meta, leaf_value, node_count, node_link, BTree, TreeEntry, TreeError};
use crate::keys::{EntryMeta, TEMPORAL_KEY_LEN};
use crate::pager::PageId;

/// Streaming ascending scan over `[min_key, max_key]`.
///
/// Yields `Err` exactly once on storage failure, then terminates.
pub struct RangeScan<'t> {
    tree: &'t BTree,
    max_key: SmallVec<[u8; TEMPORAL_KEY_LEN]>,
    leaf: PageId,
    slot: usize,
    done: bool,
}

impl<'t> RangeScan<'t> {
    pub(crate) fn new(tree: &'t BTree, min_key: &[u8], max_key: &[u8]) -> Result<Self, TreeError> {
        let mut scan = Self {
            tree,
            max_key: SmallVec::from_slice(max_key),
            leaf: 0,
            slot: 0,
            done: false,
        };

        // An inverted range yields nothing.
        if min_key > max_key {
            scan.done = true;
            return Ok(scan);
        }

        let leaf = tree.find_leaf(min_key)?;
        let slot = {
            let page = tree.checked_page(leaf)?;
            match super::leaf_search(page, tree.layout(), min_key) {
                Ok(slot) | Err(slot) => slot,
            }
        };
        scan.leaf = leaf;
        scan.slot = slot;
        Ok(scan)
    }

    /// Pulls the next entry in range, or `None` when exhausted.
    fn next_entry(&mut self) -> Result<Option<TreeEntry>, TreeError> {
        if self.done {
            return Ok(None);
        }
        let layout = self.tree.layout();

        loop {
            if self.leaf == 0 {
                self.done = true;
                return Ok(None);
            }
            let page = self.tree.checked_page(self.leaf)?;
            if self.slot >= node_count(page) {
                // Crossed the leaf boundary; continue down the chain.
                self.leaf = node_link(page);
                self.slot = 0;
                continue;
            }

            let key = leaf_key(page, layout, self.slot);
            if key > self.max_key.as_slice() {
                self.done = true;
                return Ok(None);
            }

            let mut out_key: SmallVec<[u8; TEMPORAL_KEY_LEN]> = SmallVec::new();
            out_key.extend_from_slice(key);
            let value = leaf_value(page, layout, self.slot);
            let meta = if layout.meta_len > 0 {
                Some(EntryMeta::decode(leaf_meta(page, layout, self.slot))?)
            } else {
                None
            };
            self.slot += 1;
            return Ok(Some(TreeEntry {
                key: out_key,
                value,
                meta,
            }));
        }
    }
}

impl Iterator for RangeScan<'_> {
    type Item = Result<TreeEntry, TreeError>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_entry() {
            Ok(Some(entry)) => Some(Ok(entry)),
            Ok(None) => None,
            Err(e) => {
                // Errors are terminal; no partial results after this.
                self.done = true;
                Some(Err(e))
            }
        }
    }
}
