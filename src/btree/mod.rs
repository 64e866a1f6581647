//! Disk-backed B+ tree index, keyed on a fixed-width `Key` with `Rid`
//! values, latch-crabbed for concurrent access.
//!
//! Grounded on the original engine's `BPlusTree` (`index/b_plus_tree.h`,
//! `.cpp`): search descends choosing the rightmost child whose key is `<=`
//! the search key; insert splits a leaf (then recursively its ancestors) on
//! overflow; delete redistributes from a sibling or coalesces on underflow,
//! recursing upward and collapsing the root when it is reduced to a single
//! child. The crabbing discipline itself (`LockRootId`/`UnlockRootId`,
//! `LockPage`/`UnLockPage` in the operation's mode, releasing ancestors once
//! a "safe" node is reached) mirrors the original's `Insert`/`Remove`
//! traversal helpers; the teacher's `btree/table/insert_crab.rs` supplies
//! the idiom for expressing that traversal as owned latch guards threaded
//! through a loop rather than recursion.
//!
//! A child is "safe" the instant it is latched and its *parent* is found
//! not to need modification as a side effect of whatever the child is about
//! to do: safe-for-insert means the parent has room for one more child
//! (`size < max_size`); safe-for-delete means the parent would stay above
//! `min_size` even if it lost one child. The moment a node is judged safe,
//! every latch above it — including the tree-level root latch — is
//! released; nodes judged unsafe stay latched on a stack in case the
//! structural change cascades all the way up to them.

pub mod page;

use std::marker::PhantomData;
use std::sync::Arc;

use log::debug;

use crate::buffer::BufferPoolManager;
use crate::error::{Error, Result};
use crate::latch::{Latch, LatchWriteOwned};
use crate::page::{Page, INVALID_PAGE_ID};
use crate::wal::Rid;

pub use page::Key;
use page::{InternalPage, LeafPage};

enum Mode {
    Insert,
    Delete,
}

/// One write-latched ancestor page still pinned while its safety against a
/// structural change is unresolved.
struct HeldPage {
    page_id: i32,
    guard: LatchWriteOwned<Page>,
}

impl HeldPage {
    fn release(self, buffer_pool: &BufferPoolManager, dirty: bool) {
        drop(self.guard);
        buffer_pool.unpin_page(self.page_id, dirty);
    }
}

fn release_all(stack: Vec<HeldPage>, buffer_pool: &BufferPoolManager, dirty: bool) {
    for held in stack {
        held.release(buffer_pool, dirty);
    }
}

/// A disk-backed B+ tree index over keys of type `K`, values fixed to
/// [`Rid`] (the data model defines leaf entries as `(key, rid)` pairs end to
/// end, so a second generic parameter buys nothing here).
pub struct BPlusTree<K> {
    buffer_pool: Arc<BufferPoolManager>,
    root_page_id: Arc<Latch<i32>>,
    leaf_max_size: usize,
    internal_max_size: usize,
    _marker: PhantomData<K>,
}

impl<K: Key> BPlusTree<K> {
    pub fn new(buffer_pool: Arc<BufferPoolManager>) -> Self {
        BPlusTree {
            buffer_pool,
            root_page_id: Arc::new(Latch::new(INVALID_PAGE_ID)),
            leaf_max_size: page::leaf_max_size::<K>(),
            internal_max_size: page::internal_max_size::<K>(),
            _marker: PhantomData,
        }
    }

    pub fn is_empty(&self) -> bool {
        *self.root_page_id.read() == INVALID_PAGE_ID
    }

    fn leaf_min_size(&self) -> usize {
        self.leaf_max_size / 2
    }

    fn internal_min_size(&self) -> usize {
        self.internal_max_size / 2
    }

    fn fetch(&self, page_id: i32) -> Result<Arc<Latch<Page>>> {
        self.buffer_pool.fetch_page(page_id).ok_or(Error::OutOfMemoryPage)
    }

    fn new_page(&self) -> Result<(i32, Arc<Latch<Page>>)> {
        self.buffer_pool.new_page().ok_or(Error::OutOfMemoryPage)
    }

    /// Point lookup. Takes only shared latches, released on each descent
    /// step as soon as the child is latched (`Mode::Read`'s rule in the
    /// module doc): at most two pages are ever pinned at once.
    pub fn get(&self, key: &K) -> Result<Option<Rid>> {
        let root_guard = self.root_page_id.read();
        let root_id = *root_guard;
        if root_id == INVALID_PAGE_ID {
            return Ok(None);
        }
        let mut current_id = root_id;
        let frame = self.fetch(current_id)?;
        let mut current_guard = Latch::read_owned(&frame);
        drop(root_guard);
        drop(frame); // the owned guard above holds its own Arc clone

        loop {
            if page::is_leaf(current_guard.data()) {
                let found = page::leaf_find::<K>(current_guard.data(), key);
                drop(current_guard);
                self.buffer_pool.unpin_page(current_id, false);
                return Ok(found);
            }
            let child_id = page::internal_lookup::<K>(current_guard.data(), key);
            let child_frame = self.fetch(child_id)?;
            let child_guard = Latch::read_owned(&child_frame);
            drop(current_guard);
            self.buffer_pool.unpin_page(current_id, false);
            current_id = child_id;
            current_guard = child_guard;
        }
    }

    /// Inserts `(key, rid)`. Returns `false` without modifying the tree if
    /// `key` is already present.
    pub fn insert(&self, key: K, rid: Rid) -> Result<bool> {
        let mut root_guard = Some(Latch::write_owned(&self.root_page_id));

        if **root_guard.as_ref().unwrap() == INVALID_PAGE_ID {
            let (new_root_id, frame) = self.new_page()?;
            {
                let mut guard = frame.write();
                let mut leaf = LeafPage::<K>::new(guard.data_mut());
                leaf.init(INVALID_PAGE_ID, self.leaf_max_size);
                leaf.insert(key, rid);
            }
            self.buffer_pool.unpin_page(new_root_id, true);
            **root_guard.as_mut().unwrap() = new_root_id;
            debug!("btree: started a new tree rooted at page {}", new_root_id);
            return Ok(true);
        }

        let (mut ancestors, leaf_id, mut leaf_guard, mut root_guard) =
            self.descend(root_guard.take().unwrap(), Mode::Insert, &key)?;

        let inserted = {
            let mut leaf = LeafPage::<K>::new(leaf_guard.data_mut());
            leaf.insert(key, rid)
        };
        if !inserted {
            drop(leaf_guard);
            self.buffer_pool.unpin_page(leaf_id, false);
            release_all(ancestors, &self.buffer_pool, false);
            drop(root_guard.take());
            return Ok(false);
        }

        let overflowed = page::node_size(leaf_guard.data()) > self.leaf_max_size;
        if !overflowed {
            drop(leaf_guard);
            self.buffer_pool.unpin_page(leaf_id, true);
            release_all(ancestors, &self.buffer_pool, false);
            drop(root_guard.take());
            return Ok(true);
        }

        // Split the leaf, then walk upward inserting the pushed-up
        // separator into each ancestor, splitting again on overflow.
        let (new_leaf_id, new_leaf_frame) = self.new_page()?;
        let mut new_leaf_guard = new_leaf_frame.write();
        let split_key = {
            let mut leaf = LeafPage::<K>::new(leaf_guard.data_mut());
            let split_at = leaf.size() / 2;
            let mut new_leaf = LeafPage::<K>::new(new_leaf_guard.data_mut());
            new_leaf.init(leaf.parent_page_id(), self.leaf_max_size);
            leaf.split_into(&mut new_leaf, split_at, new_leaf_id);
            new_leaf.first_key()
        };
        drop(new_leaf_guard);
        drop(leaf_guard);
        self.buffer_pool.unpin_page(leaf_id, true);
        self.buffer_pool.unpin_page(new_leaf_id, true);

        let mut pushed_key = split_key;
        let mut left_id = leaf_id;
        let mut right_id = new_leaf_id;

        loop {
            let Some(parent) = ancestors.pop() else {
                // No ancestor left to absorb the split: make a new root.
                let (new_root_id, frame) = self.new_page()?;
                {
                    let mut guard = frame.write();
                    let mut root = InternalPage::<K>::new(guard.data_mut());
                    root.init(INVALID_PAGE_ID, self.internal_max_size);
                    root.populate_new_root(left_id, pushed_key, right_id);
                }
                self.buffer_pool.unpin_page(new_root_id, true);
                self.set_parent(left_id, new_root_id)?;
                self.set_parent(right_id, new_root_id)?;
                **root_guard.as_mut().unwrap() = new_root_id;
                drop(root_guard.take());
                debug!("btree: root split, new root is page {}", new_root_id);
                return Ok(true);
            };

            let HeldPage {
                page_id: parent_id,
                guard: mut parent_guard,
            } = parent;

            let pos = {
                let internal = InternalPage::<K>::new(parent_guard.data_mut());
                internal.index_of_child(left_id).expect("left child must be listed in its parent")
            };
            {
                let mut internal = InternalPage::<K>::new(parent_guard.data_mut());
                internal.insert_at(pos + 1, pushed_key, right_id);
            }

            let parent_overflowed = page::node_size(parent_guard.data()) > self.internal_max_size;
            if !parent_overflowed {
                drop(parent_guard);
                self.buffer_pool.unpin_page(parent_id, true);
                release_all(ancestors, &self.buffer_pool, false);
                drop(root_guard.take());
                return Ok(true);
            }

            let (new_parent_id, new_parent_frame) = self.new_page()?;
            let mut new_parent_guard = new_parent_frame.write();
            let next_pushed_key = {
                let mut internal = InternalPage::<K>::new(parent_guard.data_mut());
                let split_at = internal.size() / 2;
                let mut new_internal = InternalPage::<K>::new(new_parent_guard.data_mut());
                new_internal.init(internal.parent_page_id(), self.internal_max_size);
                internal.split_into(&mut new_internal, split_at)
            };
            let new_children: Vec<i32> = {
                let new_internal = InternalPage::<K>::new(new_parent_guard.data_mut());
                (0..new_internal.size()).map(|i| new_internal.child_at(i)).collect()
            };
            drop(new_parent_guard);
            drop(parent_guard);
            self.buffer_pool.unpin_page(parent_id, true);
            self.buffer_pool.unpin_page(new_parent_id, true);
            for child in new_children {
                self.set_parent(child, new_parent_id)?;
            }

            pushed_key = next_pushed_key;
            left_id = parent_id;
            right_id = new_parent_id;
        }
    }

    /// Removes `key`. Returns `false` if it was not present.
    pub fn remove(&self, key: &K) -> Result<bool> {
        let root_guard = Some(Latch::write_owned(&self.root_page_id));
        if **root_guard.as_ref().unwrap() == INVALID_PAGE_ID {
            return Ok(false);
        }

        let (mut ancestors, leaf_id, mut leaf_guard, mut root_guard) =
            self.descend(root_guard.unwrap(), Mode::Delete, key)?;

        let found = {
            let mut leaf = LeafPage::<K>::new(leaf_guard.data_mut());
            leaf.remove(key)
        };
        if !found {
            drop(leaf_guard);
            self.buffer_pool.unpin_page(leaf_id, false);
            release_all(ancestors, &self.buffer_pool, false);
            drop(root_guard.take());
            return Ok(false);
        }

        let is_root = ancestors.is_empty();
        let underflowed = page::node_size(leaf_guard.data()) < self.leaf_min_size();
        if !underflowed || is_root {
            if is_root && page::node_size(leaf_guard.data()) == 0 {
                drop(leaf_guard);
                self.buffer_pool.unpin_page(leaf_id, true);
                self.buffer_pool.delete_page(leaf_id);
                **root_guard.as_mut().unwrap() = INVALID_PAGE_ID;
                drop(root_guard.take());
                debug!("btree: removed the last entry, tree is now empty");
                return Ok(true);
            }
            drop(leaf_guard);
            self.buffer_pool.unpin_page(leaf_id, true);
            release_all(ancestors, &self.buffer_pool, false);
            drop(root_guard.take());
            return Ok(true);
        }
        drop(leaf_guard);
        self.buffer_pool.unpin_page(leaf_id, true);

        let mut current_id = leaf_id;
        let mut current_is_leaf = true;

        loop {
            let Some(parent) = ancestors.pop() else {
                break;
            };
            let HeldPage {
                page_id: parent_id,
                guard: mut parent_guard,
            } = parent;

            let absorbed = if current_is_leaf {
                self.fix_leaf_underflow(current_id, parent_id, &mut parent_guard)?
            } else {
                self.fix_internal_underflow(current_id, parent_id, &mut parent_guard)?
            };
            let _ = absorbed;

            let parent_underflowed = page::node_size(parent_guard.data()) < self.internal_min_size();
            let parent_is_root = ancestors.is_empty();
            if !parent_underflowed || parent_is_root {
                if parent_is_root && page::node_size(parent_guard.data()) == 1 {
                    // Root collapsed to a single child: promote it.
                    let only_child = InternalPage::<K>::new(parent_guard.data_mut()).child_at(0);
                    drop(parent_guard);
                    self.buffer_pool.unpin_page(parent_id, true);
                    self.buffer_pool.delete_page(parent_id);
                    self.set_parent(only_child, INVALID_PAGE_ID)?;
                    **root_guard.as_mut().unwrap() = only_child;
                    drop(root_guard.take());
                    debug!("btree: root collapsed, new root is page {}", only_child);
                    return Ok(true);
                }
                drop(parent_guard);
                self.buffer_pool.unpin_page(parent_id, true);
                release_all(ancestors, &self.buffer_pool, false);
                drop(root_guard.take());
                return Ok(true);
            }

            drop(parent_guard);
            self.buffer_pool.unpin_page(parent_id, true);
            current_id = parent_id;
            current_is_leaf = false;
        }
        drop(root_guard.take());
        Ok(true)
    }

    /// Fixes `child_id`'s (a leaf) underflow against a sibling listed in
    /// `parent_guard`, preferring redistribution over coalescing. Returns
    /// whether a merge happened (the sibling page was freed).
    fn fix_leaf_underflow(
        &self,
        child_id: i32,
        parent_id: i32,
        parent_guard: &mut crate::latch::LatchWriteOwned<Page>,
    ) -> Result<bool> {
        let pos = InternalPage::<K>::new(parent_guard.data_mut())
            .index_of_child(child_id)
            .expect("child must be listed in its parent");
        let parent_size = page::node_size(parent_guard.data());

        let left_sibling_id = if pos > 0 {
            Some(InternalPage::<K>::new(parent_guard.data_mut()).child_at(pos - 1))
        } else {
            None
        };
        let right_sibling_id = if pos + 1 < parent_size {
            Some(InternalPage::<K>::new(parent_guard.data_mut()).child_at(pos + 1))
        } else {
            None
        };

        let child_frame = self.fetch(child_id)?;
        let mut child_guard = child_frame.write();

        if let Some(left_id) = left_sibling_id {
            let left_frame = self.fetch(left_id)?;
            let mut left_guard = left_frame.write();
            let left_size = page::node_size(left_guard.data());
            if left_size > self.leaf_min_size() {
                let (borrow_key, borrow_rid) = {
                    let mut left = LeafPage::<K>::new(left_guard.data_mut());
                    left.remove_at(left.size() - 1)
                };
                let new_first = {
                    let mut child = LeafPage::<K>::new(child_guard.data_mut());
                    child.insert_at(0, borrow_key, borrow_rid);
                    child.first_key()
                };
                drop(left_guard);
                drop(child_guard);
                self.buffer_pool.unpin_page(left_id, true);
                self.buffer_pool.unpin_page(child_id, true);
                let mut internal = InternalPage::<K>::new(parent_guard.data_mut());
                let (_, c) = internal.remove_at(pos);
                internal.insert_at(pos, new_first, c);
                return Ok(false);
            }
            // Merge child into left sibling.
            {
                let mut left = LeafPage::<K>::new(left_guard.data_mut());
                let child = LeafPage::<K>::new(child_guard.data_mut());
                left.merge_from(&child);
            }
            drop(left_guard);
            drop(child_guard);
            self.buffer_pool.unpin_page(left_id, true);
            self.buffer_pool.unpin_page(child_id, true);
            self.buffer_pool.delete_page(child_id);
            InternalPage::<K>::new(parent_guard.data_mut()).remove_at(pos);
            return Ok(true);
        }

        if let Some(right_id) = right_sibling_id {
            let right_frame = self.fetch(right_id)?;
            let mut right_guard = right_frame.write();
            let right_size = page::node_size(right_guard.data());
            if right_size > self.leaf_min_size() {
                let (borrow_key, borrow_rid, new_right_first) = {
                    let mut right = LeafPage::<K>::new(right_guard.data_mut());
                    let (k, r) = right.remove_at(0);
                    (k, r, right.first_key())
                };
                {
                    let mut child = LeafPage::<K>::new(child_guard.data_mut());
                    child.append_entry(borrow_key, borrow_rid);
                }
                drop(right_guard);
                drop(child_guard);
                self.buffer_pool.unpin_page(right_id, true);
                self.buffer_pool.unpin_page(child_id, true);
                let mut internal = InternalPage::<K>::new(parent_guard.data_mut());
                let (_, c) = internal.remove_at(pos + 1);
                internal.insert_at(pos + 1, new_right_first, c);
                return Ok(false);
            }
            // Merge right sibling into child.
            {
                let mut child = LeafPage::<K>::new(child_guard.data_mut());
                let right = LeafPage::<K>::new(right_guard.data_mut());
                child.merge_from(&right);
            }
            drop(right_guard);
            drop(child_guard);
            self.buffer_pool.unpin_page(right_id, true);
            self.buffer_pool.unpin_page(child_id, true);
            self.buffer_pool.delete_page(right_id);
            InternalPage::<K>::new(parent_guard.data_mut()).remove_at(pos + 1);
            return Ok(true);
        }

        // No sibling at all (parent has a single child): nothing to do.
        drop(child_guard);
        self.buffer_pool.unpin_page(child_id, false);
        Ok(false)
    }

    /// Internal-page counterpart of [`fix_leaf_underflow`](Self::fix_leaf_underflow).
    fn fix_internal_underflow(
        &self,
        child_id: i32,
        parent_id: i32,
        parent_guard: &mut crate::latch::LatchWriteOwned<Page>,
    ) -> Result<bool> {
        let _ = parent_id;
        let pos = InternalPage::<K>::new(parent_guard.data_mut())
            .index_of_child(child_id)
            .expect("child must be listed in its parent");
        let parent_size = page::node_size(parent_guard.data());

        let left_sibling_id = if pos > 0 {
            Some(InternalPage::<K>::new(parent_guard.data_mut()).child_at(pos - 1))
        } else {
            None
        };
        let right_sibling_id = if pos + 1 < parent_size {
            Some(InternalPage::<K>::new(parent_guard.data_mut()).child_at(pos + 1))
        } else {
            None
        };

        let child_frame = self.fetch(child_id)?;
        let mut child_guard = child_frame.write();

        if let Some(left_id) = left_sibling_id {
            let left_frame = self.fetch(left_id)?;
            let mut left_guard = left_frame.write();
            let left_size = page::node_size(left_guard.data());
            let separator = InternalPage::<K>::new(parent_guard.data_mut()).key_at(pos);

            if left_size > self.internal_min_size() {
                let (borrow_key, borrow_child) = {
                    let mut left = InternalPage::<K>::new(left_guard.data_mut());
                    left.remove_at(left.size() - 1)
                };
                {
                    // The borrowed child becomes entry 0 (its key slot is
                    // the unread sentinel); the old entry 0 shifts to
                    // index 1 and inherits `separator` as its now-real key.
                    let mut child = InternalPage::<K>::new(child_guard.data_mut());
                    child.insert_at(0, separator, borrow_child);
                    child.set_key_at(1, separator);
                }
                drop(left_guard);
                drop(child_guard);
                self.set_parent(borrow_child, child_id)?;
                self.buffer_pool.unpin_page(left_id, true);
                self.buffer_pool.unpin_page(child_id, true);
                InternalPage::<K>::new(parent_guard.data_mut()).remove_at(pos);
                InternalPage::<K>::new(parent_guard.data_mut()).insert_at(pos, borrow_key, child_id);
                return Ok(false);
            }

            let moved_children: Vec<i32> = {
                let mut left = InternalPage::<K>::new(left_guard.data_mut());
                let child = InternalPage::<K>::new(child_guard.data_mut());
                left.merge_from(separator, &child);
                (0..left.size()).map(|i| left.child_at(i)).collect()
            };
            drop(left_guard);
            drop(child_guard);
            for c in moved_children {
                self.set_parent(c, left_id)?;
            }
            self.buffer_pool.unpin_page(left_id, true);
            self.buffer_pool.unpin_page(child_id, true);
            self.buffer_pool.delete_page(child_id);
            InternalPage::<K>::new(parent_guard.data_mut()).remove_at(pos);
            return Ok(true);
        }

        if let Some(right_id) = right_sibling_id {
            let right_frame = self.fetch(right_id)?;
            let mut right_guard = right_frame.write();
            let right_size = page::node_size(right_guard.data());
            let separator = InternalPage::<K>::new(parent_guard.data_mut()).key_at(pos + 1);

            if right_size > self.internal_min_size() {
                let (_, borrow_child, new_right_first) = {
                    let mut right = InternalPage::<K>::new(right_guard.data_mut());
                    let (k, c) = right.remove_at(0);
                    // `k` is the sentinel key at what was index 0 (a
                    // duplicate of `separator`, per the index-0 convention);
                    // what was index 1's key has now shifted into index 0
                    // and is the real new lower bound of `right`.
                    (k, c, right.key_at(0))
                };
                {
                    let mut child = InternalPage::<K>::new(child_guard.data_mut());
                    child.append_entry(separator, borrow_child);
                }
                drop(right_guard);
                drop(child_guard);
                self.set_parent(borrow_child, child_id)?;
                self.buffer_pool.unpin_page(right_id, true);
                self.buffer_pool.unpin_page(child_id, true);
                InternalPage::<K>::new(parent_guard.data_mut()).remove_at(pos + 1);
                InternalPage::<K>::new(parent_guard.data_mut())
                    .insert_at(pos + 1, new_right_first, right_id);
                return Ok(false);
            }

            let moved_children: Vec<i32> = {
                let mut child = InternalPage::<K>::new(child_guard.data_mut());
                let right = InternalPage::<K>::new(right_guard.data_mut());
                child.merge_from(separator, &right);
                (0..child.size()).map(|i| child.child_at(i)).collect()
            };
            drop(right_guard);
            drop(child_guard);
            for c in moved_children {
                self.set_parent(c, child_id)?;
            }
            self.buffer_pool.unpin_page(right_id, true);
            self.buffer_pool.unpin_page(child_id, true);
            self.buffer_pool.delete_page(right_id);
            InternalPage::<K>::new(parent_guard.data_mut()).remove_at(pos + 1);
            return Ok(true);
        }

        drop(child_guard);
        self.buffer_pool.unpin_page(child_id, false);
        Ok(false)
    }

    fn set_parent(&self, page_id: i32, parent_id: i32) -> Result<()> {
        let frame = self.fetch(page_id)?;
        page::set_node_parent_page_id(frame.write().data_mut(), parent_id);
        self.buffer_pool.unpin_page(page_id, true);
        Ok(())
    }

    /// Shared crabbing descent for insert/delete: write-latches the root id
    /// slot, then every page on the path to the leaf containing `key`,
    /// releasing the prefix of ancestors (and the root-id latch itself) the
    /// moment a node is found safe for `mode`. Returns the still-latched
    /// unsafe ancestor stack (closest-first would be wrong for popping, so
    /// this is ordered root-to-leaf and popped from the back, i.e. nearest
    /// the leaf first), the leaf's id and write guard, and the root-id
    /// guard (still held only if the whole path turned out unsafe).
    fn descend(
        &self,
        root_guard: crate::latch::LatchWriteOwned<i32>,
        mode: Mode,
        key: &K,
    ) -> Result<(
        Vec<HeldPage>,
        i32,
        crate::latch::LatchWriteOwned<Page>,
        Option<crate::latch::LatchWriteOwned<i32>>,
    )> {
        let mut root_guard = Some(root_guard);
        let mut ancestors: Vec<HeldPage> = Vec::new();
        let mut current_id = **root_guard.as_ref().unwrap();
        let current_frame = self.fetch(current_id)?;
        let mut current_guard = Latch::write_owned(&current_frame);

        loop {
            if page::is_leaf(current_guard.data()) {
                return Ok((ancestors, current_id, current_guard, root_guard));
            }

            let child_id = {
                let internal = InternalPage::<K>::new(current_guard.data_mut());
                internal.lookup(key)
            };
            let child_frame = self.fetch(child_id)?;
            let child_guard = Latch::write_owned(&child_frame);

            let size = page::node_size(current_guard.data());
            let safe = match mode {
                Mode::Insert => size < self.internal_max_size,
                Mode::Delete => size > self.internal_min_size(),
            };

            if safe {
                release_all(std::mem::take(&mut ancestors), &self.buffer_pool, false);
                drop(root_guard.take());
                drop(current_guard);
                self.buffer_pool.unpin_page(current_id, false);
            } else {
                ancestors.push(HeldPage {
                    page_id: current_id,
                    guard: current_guard,
                });
            }

            current_id = child_id;
            current_guard = child_guard;
        }
    }

    /// An iterator over every `(key, rid)` pair in ascending key order.
    pub fn iter(&self) -> Result<TreeIter<K>> {
        self.range_from(None)
    }

    /// An iterator starting at the least key `>= start`.
    pub fn range(&self, start: &K) -> Result<TreeIter<K>> {
        self.range_from(Some(*start))
    }

    fn range_from(&self, start: Option<K>) -> Result<TreeIter<K>> {
        let root_guard = self.root_page_id.read();
        let root_id = *root_guard;
        if root_id == INVALID_PAGE_ID {
            return Ok(TreeIter {
                buffer_pool: Arc::clone(&self.buffer_pool),
                leaf_id: INVALID_PAGE_ID,
                index: 0,
                _marker: PhantomData,
            });
        }
        let mut current_id = root_id;
        let frame = self.fetch(current_id)?;
        let mut current_guard = Latch::read_owned(&frame);
        drop(root_guard);
        drop(frame);

        loop {
            if page::is_leaf(current_guard.data()) {
                let index = match &start {
                    None => 0,
                    Some(k) => {
                        let n = page::node_size(current_guard.data());
                        (0..n)
                            .find(|&i| page::leaf_key_at::<K>(current_guard.data(), i) >= *k)
                            .unwrap_or(n)
                    }
                };
                drop(current_guard);
                self.buffer_pool.unpin_page(current_id, false);
                return Ok(TreeIter {
                    buffer_pool: Arc::clone(&self.buffer_pool),
                    leaf_id: current_id,
                    index,
                    _marker: PhantomData,
                });
            }
            let child_id = match &start {
                None => page::internal_child_at::<K>(current_guard.data(), 0),
                Some(k) => page::internal_lookup::<K>(current_guard.data(), k),
            };
            let child_frame = self.fetch(child_id)?;
            let child_guard = Latch::read_owned(&child_frame);
            drop(current_guard);
            self.buffer_pool.unpin_page(current_id, false);
            current_id = child_id;
            current_guard = child_guard;
        }
    }
}

/// Walks the leaf chain left to right, holding at most one leaf's shared
/// latch and pin at a time.
pub struct TreeIter<K> {
    buffer_pool: Arc<BufferPoolManager>,
    leaf_id: i32,
    index: usize,
    _marker: PhantomData<K>,
}

impl<K: Key> Iterator for TreeIter<K> {
    type Item = (K, Rid);

    fn next(&mut self) -> Option<(K, Rid)> {
        loop {
            if self.leaf_id == INVALID_PAGE_ID {
                return None;
            }
            let frame = self.buffer_pool.fetch_page(self.leaf_id)?;
            let guard = frame.read();
            let size = page::node_size(guard.data());
            if self.index < size {
                let key = page::leaf_key_at::<K>(guard.data(), self.index);
                let rid = page::leaf_rid_at::<K>(guard.data(), self.index);
                self.index += 1;
                drop(guard);
                self.buffer_pool.unpin_page(self.leaf_id, false);
                return Some((key, rid));
            }
            let next_id = page::leaf_next_page_id(guard.data());
            drop(guard);
            self.buffer_pool.unpin_page(self.leaf_id, false);
            self.leaf_id = next_id;
            self.index = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk::DiskManager;
    use std::sync::Arc;
    use tempfile::tempdir;

    fn rid(n: i64) -> Rid {
        Rid {
            page_id: n as i32,
            slot_id: 0,
        }
    }

    fn tree(pool_size: usize) -> BPlusTree<i64> {
        let dir = tempdir().unwrap();
        let dm = Arc::new(DiskManager::new(dir.path().join("db"), dir.path().join("log")).unwrap());
        std::mem::forget(dir);
        let bpm = Arc::new(BufferPoolManager::new(pool_size, 4, dm, None));
        BPlusTree::new(bpm)
    }

    #[test]
    fn empty_tree_finds_nothing() {
        let t = tree(16);
        assert!(t.is_empty());
        assert_eq!(t.get(&1).unwrap(), None);
        assert_eq!(t.remove(&1).unwrap(), false);
    }

    #[test]
    fn insert_and_get_round_trip() {
        let t = tree(16);
        for k in [5i64, 1, 9, 3, 7] {
            assert!(t.insert(k, rid(k)).unwrap());
        }
        for k in [5i64, 1, 9, 3, 7] {
            assert_eq!(t.get(&k).unwrap(), Some(rid(k)));
        }
        assert_eq!(t.get(&42).unwrap(), None);
    }

    #[test]
    fn duplicate_insert_is_rejected() {
        let t = tree(16);
        assert!(t.insert(1, rid(1)).unwrap());
        assert_eq!(t.insert(1, rid(99)).unwrap(), false);
        // the original value survives the rejected duplicate
        assert_eq!(t.get(&1).unwrap(), Some(rid(1)));
    }

    #[test]
    fn removing_a_missing_key_is_a_no_op() {
        let t = tree(16);
        t.insert(1, rid(1)).unwrap();
        assert_eq!(t.remove(&2).unwrap(), false);
        assert_eq!(t.get(&1).unwrap(), Some(rid(1)));
    }

    #[test]
    fn iter_visits_every_key_in_ascending_order() {
        let t = tree(32);
        let keys = [50i64, 10, 30, 20, 40, 5, 45];
        for &k in &keys {
            t.insert(k, rid(k)).unwrap();
        }
        let collected: Vec<i64> = t.iter().unwrap().map(|(k, _)| k).collect();
        let mut expected: Vec<i64> = keys.to_vec();
        expected.sort();
        assert_eq!(collected, expected);
    }

    #[test]
    fn range_starts_at_the_first_key_not_less_than_start() {
        let t = tree(32);
        for k in (0..20).map(|i| i * 2) {
            t.insert(k, rid(k)).unwrap();
        }
        let from_15: Vec<i64> = t.range(&15).unwrap().map(|(k, _)| k).collect();
        assert_eq!(from_15.first(), Some(&16));
        assert_eq!(from_15.len(), 12); // 16, 18, .. 38
    }

    #[test]
    fn many_sequential_inserts_force_leaf_splits_and_a_new_root() {
        let t = tree(64);
        let n = 2000i64;
        for k in 0..n {
            assert!(t.insert(k, rid(k)).unwrap(), "insert of {} rejected", k);
        }
        assert!(!t.is_empty());
        for k in 0..n {
            assert_eq!(t.get(&k).unwrap(), Some(rid(k)), "lookup of {} failed", k);
        }
        let collected: Vec<i64> = t.iter().unwrap().map(|(k, _)| k).collect();
        let expected: Vec<i64> = (0..n).collect();
        assert_eq!(collected, expected);
    }

    #[test]
    fn deleting_every_key_collapses_the_tree_to_empty() {
        let t = tree(32);
        let keys: Vec<i64> = (0..50).collect();
        for &k in &keys {
            t.insert(k, rid(k)).unwrap();
        }
        for &k in &keys {
            assert!(t.remove(&k).unwrap(), "remove of {} failed", k);
        }
        assert!(t.is_empty());
        assert_eq!(t.get(&0).unwrap(), None);
    }

    #[test]
    fn deletions_trigger_merges_without_losing_survivors() {
        let t = tree(64);
        let n = 600i64;
        for k in 0..n {
            t.insert(k, rid(k)).unwrap();
        }
        // Remove every key in the first third: forces repeated leaf
        // underflow handling (redistribute or merge) across that whole run.
        for k in 0..(n / 3) {
            assert!(t.remove(&k).unwrap());
        }
        for k in 0..(n / 3) {
            assert_eq!(t.get(&k).unwrap(), None);
        }
        for k in (n / 3)..n {
            assert_eq!(t.get(&k).unwrap(), Some(rid(k)), "survivor {} lost", k);
        }
        let collected: Vec<i64> = t.iter().unwrap().map(|(k, _)| k).collect();
        let expected: Vec<i64> = ((n / 3)..n).collect();
        assert_eq!(collected, expected);
    }

    #[test]
    fn reverse_order_inserts_and_interleaved_deletes() {
        let t = tree(64);
        let n = 300i64;
        for k in (0..n).rev() {
            t.insert(k, rid(k)).unwrap();
        }
        for k in (0..n).step_by(2) {
            assert!(t.remove(&k).unwrap());
        }
        for k in 0..n {
            let expect = if k % 2 == 0 { None } else { Some(rid(k)) };
            assert_eq!(t.get(&k).unwrap(), expect, "mismatch at {}", k);
        }
    }
}
