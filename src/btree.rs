use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::cache::LruCache;
use crate::config::SpiderConfig;
use crate::error::{BTreeResult, SpiderError};
use crate::node::{Node, NodeGuard, NodeId, NULL_NODE, ROOT_NODE};
use crate::page::PageType;
use crate::pagedfile::{HeaderExt, PagedFile};
use crate::sync::Semaphore;

pub const NULL_DATA_POINTER: i64 = -1;

/// Locks a set of distinct nodes' structural-mutation semaphores in
/// ascending-id order. Any two operations that might touch the same
/// pair of nodes (a merge and its mirror image, say) always acquire
/// them in this same order, so they can never deadlock against each
/// other.
fn lock_ascending(nodes: &[&Arc<Node>]) -> Vec<NodeGuard> {
    let mut ordered: Vec<&Arc<Node>> = nodes.to_vec();
    ordered.sort_by_key(|n| n.id());
    ordered.iter().map(|n| n.lock_guard()).collect()
}

/// Extension point for the file-header field(s) a tree needs: just the
/// persisted root id. The storage layer's header additionally carries
/// the availability directory alongside this.
pub trait TreeHeader: HeaderExt {
    fn root(&self) -> NodeId;
    fn set_root(&mut self, root: NodeId);
}

/// Standalone tree header (root id only), used when the tree is not
/// wrapped by the data-page store.
#[derive(Clone, Default)]
pub struct TreeHeaderExt {
    pub root: NodeId,
}

impl HeaderExt for TreeHeaderExt {
    fn encode(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.root.to_le_bytes());
    }

    fn decode(buf: &[u8]) -> BTreeResult<Self> {
        Ok(TreeHeaderExt {
            root: i64::from_le_bytes(buf[0..8].try_into().unwrap()),
        })
    }
}

impl TreeHeader for TreeHeaderExt {
    fn root(&self) -> NodeId {
        self.root
    }

    fn set_root(&mut self, root: NodeId) {
        self.root = root;
    }
}

/// Ordered key -> 64-bit-pointer map built on a paged file, with a
/// B-link right-sibling chain so readers can recover from a racing
/// split without taking any node lock.
pub struct BTree<H: TreeHeader> {
    pub file: Arc<PagedFile<H>>,
    pub config: SpiderConfig,
    cache: LruCache<NodeId, Arc<Node>>,
    nodes: Mutex<HashMap<NodeId, Weak<Node>>>,
    get_node_lock: Semaphore,
}

impl<H: TreeHeader + Send + Sync + 'static> BTree<H> {
    pub fn new(file: Arc<PagedFile<H>>, config: SpiderConfig) -> Self {
        let evict_file = file.clone();
        let cache = LruCache::new(
            config.n_cached_nodes,
            Box::new(move |_id: &NodeId, node: &Arc<Node>| {
                if node.is_dirty() {
                    node.prepare_flush()?;
                }
                evict_file.flush_page(node.page())
            }),
        );
        BTree {
            file,
            config,
            cache,
            nodes: Mutex::new(HashMap::new()),
            get_node_lock: Semaphore::new(1),
        }
    }

    fn root_id(&self) -> NodeId {
        self.file.header.read().ext.root()
    }

    pub fn is_open(&self) -> bool {
        self.file.is_open()
    }

    /// Ensures the root page exists, creating a fresh leaf root the
    /// first time the file is opened.
    pub fn open(&self) -> BTreeResult<()> {
        self.file.open()?;
        let root_page = self.file.get_or_create_page(ROOT_NODE)?;
        let existing_type = root_page.read().page_type();
        let node = match existing_type {
            PageType::Unused => {
                let mut header = self.file.header.write();
                header.ext.set_root(ROOT_NODE);
                header.page_count = header.page_count.max(1);
                header.dirty = true;
                Node::new(root_page.clone(), PageType::Leaf, NULL_NODE)
            }
            PageType::Internal | PageType::Leaf => Node::load(root_page.clone())?,
            _ => return Err(SpiderError::InvalidPageType),
        };
        let node = Arc::new(node);
        self.nodes.lock().insert(ROOT_NODE, Arc::downgrade(&node));
        self.cache.put(ROOT_NODE, node)?;
        Ok(())
    }

    /// Flushes the root and the file header without closing the file.
    pub fn flush(&self) -> BTreeResult<()> {
        let root = self.get_node(self.root_id())?;
        if root.is_dirty() {
            root.prepare_flush()?;
            self.file.flush_page(root.page())?;
        }
        self.file.flush_header()?;
        Ok(())
    }

    pub fn close(&self) -> BTreeResult<()> {
        let root = self.get_node(self.root_id())?;
        if root.is_dirty() {
            root.prepare_flush()?;
            self.file.flush_page(root.page())?;
        }
        self.cache.clear()?;
        self.file.close()?;
        Ok(())
    }

    /// Resolves a node through the cache, then the live weak-object
    /// table, then disk; serialized so only one task materializes a
    /// given id.
    pub fn get_node(&self, id: NodeId) -> BTreeResult<Arc<Node>> {
        if let Ok(node) = self.cache.get(&id) {
            return Ok(node);
        }
        let _permit = self.get_node_lock.acquire();
        if let Ok(node) = self.cache.get(&id) {
            return Ok(node);
        }
        let mut table = self.nodes.lock();
        if let Some(weak) = table.get(&id) {
            if let Some(node) = weak.upgrade() {
                drop(table);
                self.cache.put(id, node.clone())?;
                return Ok(node);
            }
        }
        let page = self.file.get_or_create_page(id)?;
        let node = Arc::new(Node::load(page)?);
        table.insert(id, Arc::downgrade(&node));
        drop(table);
        self.cache.put(id, node.clone())?;
        Ok(node)
    }

    fn create_node(&self, node_type: PageType, parent: NodeId) -> BTreeResult<Arc<Node>> {
        let page = self.file.get_free_page()?;
        let node = Arc::new(Node::new(page, node_type, parent));
        log::trace!("allocate: node {} created under parent {}", node.id(), parent);
        self.nodes.lock().insert(node.id(), Arc::downgrade(&node));
        self.cache.put(node.id(), node.clone())?;
        Ok(node)
    }

    fn cache_node(&self, node: Arc<Node>) -> BTreeResult<()> {
        self.cache.put(node.id(), node)
    }

    pub fn find(&self, key: &[u8]) -> BTreeResult<i64> {
        let mut node = self.get_node(self.root_id())?;
        loop {
            if node.next() != NULL_NODE && key > node.high_key().as_slice() {
                node = self.get_node(node.next())?;
                continue;
            }
            let idx = node.binary_search(key);
            match node.node_type() {
                PageType::Internal => {
                    let child_idx = if idx >= 0 {
                        idx as usize + 1
                    } else {
                        (-(idx + 1)) as usize
                    };
                    let pointers = node.pointers();
                    node = self.get_node(pointers[child_idx])?;
                }
                PageType::Leaf => {
                    return Ok(if idx >= 0 {
                        node.pointers()[idx as usize]
                    } else {
                        NULL_DATA_POINTER
                    });
                }
                _ => return Err(SpiderError::InvalidNode),
            }
        }
    }

    fn find_leaf_locked(&self, key: &[u8]) -> BTreeResult<(Arc<Node>, crate::node::NodeGuard)> {
        let mut node = self.get_node(self.root_id())?;
        loop {
            while node.next() != NULL_NODE && key > node.high_key().as_slice() {
                node = self.get_node(node.next())?;
            }
            if node.node_type() == PageType::Leaf {
                let guard = node.lock_guard();
                if node.next() != NULL_NODE && key > node.high_key().as_slice() {
                    drop(guard);
                    node = self.get_node(node.next())?;
                    continue;
                }
                return Ok((node, guard));
            }
            let idx = node.binary_search(key);
            let child_idx = if idx >= 0 {
                idx as usize + 1
            } else {
                (-(idx + 1)) as usize
            };
            let pointers = node.pointers();
            node = self.get_node(pointers[child_idx])?;
        }
    }

    pub fn add(&self, key: Vec<u8>, ptr: i64) -> BTreeResult<()> {
        let (leaf, _guard) = self.find_leaf_locked(&key)?;
        let idx = leaf.binary_search(&key);
        if idx >= 0 {
            return Err(SpiderError::KeyExists);
        }
        let pos = (-(idx + 1)) as usize;
        let mut keys = leaf.keys();
        let mut pointers = leaf.pointers();
        keys.insert(pos, key);
        pointers.insert(pos, ptr);
        leaf.set_body(keys, pointers);
        self.cache_node(leaf.clone())?;
        if leaf.need_split(self.config.max_keys_on_each_node, self.config.work_size()) {
            self.split(&leaf)?;
        }
        Ok(())
    }

    pub fn remove(&self, key: &[u8]) -> BTreeResult<i64> {
        let (ptr, leaf_id) = {
            let (leaf, _guard) = self.find_leaf_locked(key)?;
            let idx = leaf.binary_search(key);
            if idx < 0 {
                return Err(SpiderError::KeyNotExists);
            }
            let idx = idx as usize;
            let mut keys = leaf.keys();
            let mut pointers = leaf.pointers();
            let ptr = pointers[idx];
            keys.remove(idx);
            pointers.remove(idx);
            leaf.set_body(keys, pointers);
            self.cache_node(leaf.clone())?;
            (ptr, leaf.id())
        };
        // The leaf's own lock is released above: destroy()/merge() below
        // re-acquire whatever locks they need themselves, in a fixed
        // global order, rather than relying on a lock already held here.
        let leaf = self.get_node(leaf_id)?;
        if leaf.need_destroy() {
            self.destroy(&leaf)?;
        } else if leaf.id() != ROOT_NODE
            && leaf.need_merge(self.config.min_keys_on_each_node, self.config.work_size())
        {
            self.merge(&leaf)?;
        }
        Ok(ptr)
    }

    fn free_node_page(&self, node: &Arc<Node>) -> BTreeResult<()> {
        {
            let mut page = node.page().write();
            page.set_page_type(PageType::Unused);
            page.set_next_page(crate::page::NULL_PAGE);
        }
        self.file.flush_page(node.page())?;
        self.file.unlink_pages_from(node.id())?;
        self.nodes.lock().remove(&node.id());
        Ok(())
    }

    #[allow(clippy::type_complexity)]
    fn split_halves(
        &self,
        node: &Arc<Node>,
    ) -> (PageType, Vec<Vec<u8>>, Vec<i64>, Vec<Vec<u8>>, Vec<i64>, Vec<u8>) {
        let keys = node.keys();
        let pointers = node.pointers();
        let m = keys.len() / 2;
        let node_type = node.node_type();
        if node_type == PageType::Internal {
            let left_keys = keys[0..m].to_vec();
            let left_pointers = pointers[0..=m].to_vec();
            let separator = keys[m].clone();
            let right_keys = keys[m + 1..].to_vec();
            let right_pointers = pointers[m + 1..].to_vec();
            (node_type, left_keys, left_pointers, right_keys, right_pointers, separator)
        } else {
            let left_keys = keys[0..m].to_vec();
            let left_pointers = pointers[0..m].to_vec();
            let separator = keys[m].clone();
            let right_keys = keys[m..].to_vec();
            let right_pointers = pointers[m..].to_vec();
            (node_type, left_keys, left_pointers, right_keys, right_pointers, separator)
        }
    }

    fn split(&self, node: &Arc<Node>) -> BTreeResult<()> {
        log::debug!("split: node {} over capacity, splitting", node.id());
        let (node_type, left_keys, left_pointers, right_keys, right_pointers, separator) =
            self.split_halves(node);

        if node.id() == ROOT_NODE {
            return self.split_root(
                node,
                node_type,
                left_keys,
                left_pointers,
                right_keys,
                right_pointers,
                separator,
            );
        }

        let old_high_key = node.high_key();
        let old_next = node.next();

        let sibling = self.create_node(node_type, node.parent())?;
        sibling.set_body(right_keys, right_pointers);
        sibling.set_high_key(old_high_key);
        sibling.set_prev(node.id());
        sibling.set_next(old_next);

        node.set_body(left_keys, left_pointers);
        node.set_high_key(separator.clone());
        node.set_next(sibling.id());

        if old_next != NULL_NODE {
            let old_next_node = self.get_node(old_next)?;
            old_next_node.set_prev(sibling.id());
            self.cache_node(old_next_node)?;
        }

        if node_type == PageType::Internal {
            for &child_id in &sibling.pointers() {
                let child = self.get_node(child_id)?;
                child.set_parent(sibling.id());
                self.cache_node(child)?;
            }
        }

        self.cache_node(node.clone())?;
        self.cache_node(sibling.clone())?;
        log::trace!("split: node {} kept, new sibling {} holds the upper half", node.id(), sibling.id());

        let parent = self.get_node(node.parent())?;
        self.promote(&parent, separator, node.id(), sibling.id())
    }

    #[allow(clippy::too_many_arguments)]
    fn split_root(
        &self,
        root: &Arc<Node>,
        node_type: PageType,
        left_keys: Vec<Vec<u8>>,
        left_pointers: Vec<i64>,
        right_keys: Vec<Vec<u8>>,
        right_pointers: Vec<i64>,
        separator: Vec<u8>,
    ) -> BTreeResult<()> {
        log::debug!("split: root {} splitting, growing the tree by a level", root.id());
        let root_high_key = root.high_key();
        let left = self.create_node(node_type, ROOT_NODE)?;
        let right = self.create_node(node_type, ROOT_NODE)?;

        left.set_body(left_keys, left_pointers);
        left.set_high_key(separator.clone());
        left.set_prev(NULL_NODE);
        left.set_next(right.id());

        right.set_body(right_keys, right_pointers);
        right.set_high_key(root_high_key);
        right.set_prev(left.id());
        right.set_next(NULL_NODE);

        if node_type == PageType::Internal {
            for &child_id in &left.pointers() {
                self.get_node(child_id)?.set_parent(left.id());
            }
            for &child_id in &right.pointers() {
                self.get_node(child_id)?.set_parent(right.id());
            }
        }

        root.set_node_type(PageType::Internal);
        root.set_body(vec![separator], vec![left.id(), right.id()]);

        self.cache_node(left.clone())?;
        self.cache_node(right.clone())?;
        self.cache_node(root.clone())?;
        Ok(())
    }

    fn promote(&self, parent: &Arc<Node>, key: Vec<u8>, left: NodeId, right: NodeId) -> BTreeResult<()> {
        log::trace!("promote: inserting separator into parent {} for {}/{}", parent.id(), left, right);
        let _guard = parent.lock_guard();
        let mut pointers = parent.pointers();
        let mut keys = parent.keys();
        let pos = pointers
            .iter()
            .position(|&p| p == left)
            .ok_or(SpiderError::ChildNotExists)?;
        pointers.insert(pos + 1, right);
        keys.insert(pos, key);
        parent.set_body(keys, pointers);
        self.cache_node(parent.clone())?;
        if parent.need_split(self.config.max_keys_on_each_node, self.config.work_size()) {
            self.split(parent)?;
        }
        Ok(())
    }

    /// Removes the separator key and the `right` pointer from `parent`,
    /// returning the separator. Does not cascade into the parent: the
    /// caller still needs `left`/`right`'s pages alive to finish merging
    /// their content, and an absorb here could free `left`'s page out
    /// from under it.
    fn demote(&self, parent: &Arc<Node>, left: NodeId, right: NodeId) -> BTreeResult<Vec<u8>> {
        log::trace!("demote: removing separator from parent {} for {}/{}", parent.id(), left, right);
        let _guard = parent.lock_guard();
        let mut keys = parent.keys();
        let mut pointers = parent.pointers();
        let left_pos = pointers
            .iter()
            .position(|&p| p == left)
            .ok_or(SpiderError::ChildNotExists)?;
        let right_pos = pointers
            .iter()
            .position(|&p| p == right)
            .ok_or(SpiderError::ChildNotExists)?;
        let sep_idx = left_pos.min(right_pos);
        let separator = keys.remove(sep_idx);
        pointers.remove(right_pos);
        parent.set_body(keys, pointers);
        self.cache_node(parent.clone())?;
        Ok(separator)
    }

    /// Cascades a structural cleanup check into `parent` after one of its
    /// children changed shape: absorbs if it degenerated to a single
    /// pointer, otherwise merges it with a sibling if it's under-full.
    fn cascade_parent(&self, parent: &Arc<Node>) -> BTreeResult<()> {
        if parent.key_count() == 0 {
            self.absorb_only_child(parent)
        } else if parent.id() != ROOT_NODE
            && parent.need_merge(self.config.min_keys_on_each_node, self.config.work_size())
        {
            self.merge(parent)
        } else {
            Ok(())
        }
    }

    fn merge(&self, node: &Arc<Node>) -> BTreeResult<()> {
        let parent_id = node.parent();
        let parent = self.get_node(parent_id)?;

        let mergeable = |candidate_id: NodeId| -> BTreeResult<Option<Arc<Node>>> {
            if candidate_id == NULL_NODE {
                return Ok(None);
            }
            let candidate = self.get_node(candidate_id)?;
            if candidate.parent() == parent_id
                && candidate.need_merge(self.config.min_keys_on_each_node, self.config.work_size())
            {
                Ok(Some(candidate))
            } else {
                Ok(None)
            }
        };

        // `node` is not locked on entry (callers release their guard
        // before cascading into merge/destroy). Sample the mergeable
        // pair, lock both of them plus right's successor (also rewritten
        // below) in ascending-id order, then confirm the chain still
        // looks the way it did when sampled — a concurrent split/merge
        // elsewhere may have changed it while we were acquiring locks in
        // id order rather than chain order.
        let (left, right, right_next_node, _guards) = loop {
            let prev_id = node.prev();
            let next_id = node.next();

            let (left, right) = if let Some(prev_node) = mergeable(prev_id)? {
                (prev_node, node.clone())
            } else if let Some(next_node) = mergeable(next_id)? {
                (node.clone(), next_node)
            } else {
                return Ok(());
            };

            let right_next_id = right.next();
            let right_next_node = if right_next_id != NULL_NODE {
                Some(self.get_node(right_next_id)?)
            } else {
                None
            };

            let mut participants: Vec<&Arc<Node>> = vec![&left, &right];
            if let Some(n) = right_next_node.as_ref() {
                participants.push(n);
            }
            let guards = lock_ascending(&participants);

            let next_matches = right.next()
                == right_next_node.as_ref().map(|n| n.id()).unwrap_or(NULL_NODE);
            if left.next() == right.id() && right.prev() == left.id() && next_matches {
                break (left, right, right_next_node, guards);
            }
        };

        log::debug!("merge: combining node {} and node {}", left.id(), right.id());
        let separator = self.demote(&parent, left.id(), right.id())?;

        let mut left_keys = left.keys();
        let mut left_pointers = left.pointers();
        let right_keys = right.keys();
        let right_pointers = right.pointers();

        if left.node_type() == PageType::Internal {
            left_keys.push(separator);
            for &child_id in &right_pointers {
                self.get_node(child_id)?.set_parent(left.id());
            }
        }
        left_keys.extend(right_keys);
        left_pointers.extend(right_pointers);
        left.set_body(left_keys, left_pointers);
        left.set_high_key(right.high_key());

        left.set_next(right.next());
        if let Some(next_node) = &right_next_node {
            next_node.set_prev(left.id());
            self.cache_node(next_node.clone())?;
        }

        self.cache_node(left.clone())?;
        self.free_node_page(&right)?;
        drop(_guards);
        self.cascade_parent(&parent)
    }

    fn fire(&self, parent: &Arc<Node>, child_id: NodeId) -> BTreeResult<()> {
        log::trace!("fire: removing pointer to destroyed child {} from parent {}", child_id, parent.id());
        {
            let _guard = parent.lock_guard();
            let mut keys = parent.keys();
            let mut pointers = parent.pointers();
            let pos = pointers
                .iter()
                .position(|&p| p == child_id)
                .ok_or(SpiderError::ChildNotExists)?;
            pointers.remove(pos);
            if !keys.is_empty() {
                let key_idx = if pos == 0 { 0 } else { pos - 1 };
                if key_idx < keys.len() {
                    keys.remove(key_idx);
                }
            }
            parent.set_body(keys, pointers);
            self.cache_node(parent.clone())?;
        }
        self.cascade_parent(parent)
    }

    fn destroy(&self, node: &Arc<Node>) -> BTreeResult<()> {
        // Same discipline as merge(): lock node plus its (possibly
        // absent) prev/next neighbors in ascending-id order, confirming
        // after the lock that the chain still matches what we sampled.
        // The locks are held through `fire`/`free_node_page` below so
        // nothing can re-discover and start using `node` while it's
        // being unlinked and freed.
        let (prev_node, next_node, _guards) = loop {
            let prev_id = node.prev();
            let next_id = node.next();
            let prev_node = if prev_id != NULL_NODE { Some(self.get_node(prev_id)?) } else { None };
            let next_node = if next_id != NULL_NODE { Some(self.get_node(next_id)?) } else { None };

            let mut participants: Vec<&Arc<Node>> = vec![node];
            if let Some(p) = prev_node.as_ref() {
                participants.push(p);
            }
            if let Some(n) = next_node.as_ref() {
                participants.push(n);
            }
            let guards = lock_ascending(&participants);

            if node.prev() == prev_id && node.next() == next_id {
                break (prev_node, next_node, guards);
            }
        };

        if let Some(prev_node) = &prev_node {
            prev_node.set_next(next_node.as_ref().map(|n| n.id()).unwrap_or(NULL_NODE));
            self.cache_node(prev_node.clone())?;
        }
        if let Some(next_node) = &next_node {
            next_node.set_prev(prev_node.as_ref().map(|n| n.id()).unwrap_or(NULL_NODE));
            self.cache_node(next_node.clone())?;
        }

        let parent_id = node.parent();
        if parent_id != NULL_NODE {
            let parent = self.get_node(parent_id)?;
            self.fire(&parent, node.id())?;
        }
        log::debug!("destroy: freeing node {}", node.id());
        self.free_node_page(node)
    }

    /// A node whose last child-demote left it with a single pointer and
    /// no keys absorbs that child's content directly, keeping its own id
    /// stable while freeing the child's page.
    fn absorb_only_child(&self, node: &Arc<Node>) -> BTreeResult<()> {
        let (child, _guards) = loop {
            let pointers = node.pointers();
            if pointers.len() != 1 {
                return Ok(());
            }
            let child = self.get_node(pointers[0])?;
            let guards = lock_ascending(&[node, &child]);
            if node.pointers() == vec![child.id()] {
                break (child, guards);
            }
        };

        let child_type = child.node_type();
        let child_keys = child.keys();
        let child_pointers = child.pointers();
        let child_high_key = child.high_key();

        node.set_node_type(child_type);
        node.set_body(child_keys, child_pointers);
        node.set_high_key(child_high_key);

        if child_type == PageType::Internal {
            for &grandchild_id in &node.pointers() {
                self.get_node(grandchild_id)?.set_parent(node.id());
            }
        }

        self.cache_node(node.clone())?;
        log::debug!("absorb: node {} absorbed child {}", node.id(), child.id());
        self.free_node_page(&child)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn open_tree(config: SpiderConfig) -> BTree<TreeHeaderExt> {
        let tmp = NamedTempFile::new().unwrap();
        let path = tmp.path().to_path_buf();
        tmp.close().unwrap();
        let file = Arc::new(PagedFile::new(path, config));
        let tree = BTree::new(file, config);
        tree.open().unwrap();
        tree
    }

    #[test]
    fn insert_find_remove_roundtrip() {
        let tree = open_tree(SpiderConfig::default());
        for i in 0..200i64 {
            let key = format!("k{:05}", i).into_bytes();
            tree.add(key, i).unwrap();
        }
        for i in 0..200i64 {
            let key = format!("k{:05}", i).into_bytes();
            assert_eq!(tree.find(&key).unwrap(), i);
        }
        for i in (0..200i64).step_by(2) {
            let key = format!("k{:05}", i).into_bytes();
            tree.remove(&key).unwrap();
        }
        for i in 0..200i64 {
            let key = format!("k{:05}", i).into_bytes();
            if i % 2 == 0 {
                assert_eq!(tree.find(&key).unwrap(), NULL_DATA_POINTER);
            } else {
                assert_eq!(tree.find(&key).unwrap(), i);
            }
        }
        tree.close().unwrap();
    }

    #[test]
    fn duplicate_insert_and_missing_remove_are_errors() {
        let tree = open_tree(SpiderConfig::default());
        tree.add(b"a".to_vec(), 1).unwrap();
        assert!(matches!(tree.add(b"a".to_vec(), 2), Err(SpiderError::KeyExists)));
        assert!(matches!(tree.remove(b"missing"), Err(SpiderError::KeyNotExists)));
        tree.close().unwrap();
    }

    #[test]
    fn splits_and_merges_under_small_node_capacity() {
        let config = SpiderConfig {
            min_keys_on_each_node: 4,
            max_keys_on_each_node: 8,
            page_size: 512,
            page_header_size: 64,
            ..SpiderConfig::default()
        };
        let tree = open_tree(config);
        for i in 0..500i64 {
            let key = format!("key-{:06}", i).into_bytes();
            tree.add(key, i).unwrap();
        }
        for i in 0..500i64 {
            let key = format!("key-{:06}", i).into_bytes();
            assert_eq!(tree.find(&key).unwrap(), i);
        }
        for i in 0..500i64 {
            let key = format!("key-{:06}", i).into_bytes();
            tree.remove(&key).unwrap();
        }
        for i in 0..500i64 {
            let key = format!("key-{:06}", i).into_bytes();
            assert_eq!(tree.find(&key).unwrap(), NULL_DATA_POINTER);
        }
        tree.close().unwrap();
    }

    #[test]
    fn reopen_preserves_tree() {
        let tmp = NamedTempFile::new().unwrap();
        let path = tmp.path().to_path_buf();
        tmp.close().unwrap();
        let config = SpiderConfig::default();
        {
            let file = Arc::new(PagedFile::<TreeHeaderExt>::new(&path, config));
            let tree = BTree::new(file, config);
            tree.open().unwrap();
            for i in 0..50i64 {
                tree.add(format!("k{i}").into_bytes(), i).unwrap();
            }
            tree.close().unwrap();
        }
        {
            let file = Arc::new(PagedFile::<TreeHeaderExt>::new(&path, config));
            let tree = BTree::new(file, config);
            tree.open().unwrap();
            for i in 0..50i64 {
                assert_eq!(tree.find(format!("k{i}").as_bytes()).unwrap(), i);
            }
            tree.close().unwrap();
        }
    }
}
