use std::cmp::Ordering;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{NodeResult, SpiderError};
use crate::page::{Page, PageId, PageType, NULL_PAGE};
use crate::sync::Semaphore;

pub type NodeId = PageId;
pub const NULL_NODE: NodeId = NULL_PAGE;
pub const ROOT_NODE: NodeId = 0;

/// A child-node id (internal nodes) or a leaf payload pointer (leaf
/// nodes), both stored as a plain `i64` the way the source's
/// `node_item_pointer` union does.
pub type NodePointer = i64;

struct NodeState {
    node_type: PageType,
    parent: NodeId,
    keys: Vec<Vec<u8>>,
    pointers: Vec<NodePointer>,
    high_key: Vec<u8>,
    prev: NodeId,
    next: NodeId,
    dirty: bool,
}

/// One B-link-tree node, backed by one page. Keys are kept fully
/// expanded in memory; prefix compression is applied only when the
/// node is serialized.
pub struct Node {
    id: NodeId,
    page: Arc<RwLock<Page>>,
    state: RwLock<NodeState>,
    pub lock: Semaphore,
}

fn common_prefix_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}

impl Node {
    pub fn new(page: Arc<RwLock<Page>>, node_type: PageType, parent: NodeId) -> Self {
        let id = page.read().id();
        Node {
            id,
            page,
            state: RwLock::new(NodeState {
                node_type,
                parent,
                keys: Vec::new(),
                pointers: Vec::new(),
                high_key: Vec::new(),
                prev: NULL_NODE,
                next: NULL_NODE,
                dirty: true,
            }),
            lock: Semaphore::new(1),
        }
    }

    /// Loads node state from the page it already wraps.
    pub fn load(page: Arc<RwLock<Page>>) -> NodeResult<Self> {
        let id = page.read().id();
        let guard = page.read();
        let node_type = guard.page_type();
        if !matches!(node_type, PageType::Internal | PageType::Leaf) {
            return Err(SpiderError::InvalidPageType);
        }
        let extra = guard.header_extra();
        let parent = i64::from_le_bytes(extra[0..8].try_into().unwrap());
        let key_count = u32::from_le_bytes(extra[8..12].try_into().unwrap()) as usize;
        let prefix_len = u32::from_le_bytes(extra[12..16].try_into().unwrap()) as usize;

        let body = &guard.payload()[..guard.data_len() as usize];
        let mut cursor = 0usize;
        let prefix = body[cursor..cursor + prefix_len].to_vec();
        cursor += prefix_len;

        let mut keys = Vec::with_capacity(key_count);
        for _ in 0..key_count {
            let suffix_len =
                u32::from_le_bytes(body[cursor..cursor + 4].try_into().unwrap()) as usize;
            cursor += 4;
            let suffix = &body[cursor..cursor + suffix_len];
            cursor += suffix_len;
            let mut full = prefix.clone();
            full.extend_from_slice(suffix);
            keys.push(full);
        }

        let n_pointers = if node_type == PageType::Internal {
            key_count + 1
        } else {
            key_count
        };
        let mut pointers = Vec::with_capacity(n_pointers);
        for _ in 0..n_pointers {
            pointers.push(i64::from_le_bytes(body[cursor..cursor + 8].try_into().unwrap()));
            cursor += 8;
        }

        let high_key_len =
            u32::from_le_bytes(body[cursor..cursor + 4].try_into().unwrap()) as usize;
        cursor += 4;
        let high_key = body[cursor..cursor + high_key_len].to_vec();
        cursor += high_key_len;
        let prev = i64::from_le_bytes(body[cursor..cursor + 8].try_into().unwrap());
        cursor += 8;
        let next = i64::from_le_bytes(body[cursor..cursor + 8].try_into().unwrap());

        drop(guard);
        Ok(Node {
            id,
            page,
            state: RwLock::new(NodeState {
                node_type,
                parent,
                keys,
                pointers,
                high_key,
                prev,
                next,
                dirty: false,
            }),
            lock: Semaphore::new(1),
        })
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn page(&self) -> &Arc<RwLock<Page>> {
        &self.page
    }

    pub fn node_type(&self) -> PageType {
        self.state.read().node_type
    }

    pub fn set_node_type(&self, t: PageType) {
        let mut s = self.state.write();
        s.node_type = t;
        s.dirty = true;
    }

    pub fn parent(&self) -> NodeId {
        self.state.read().parent
    }

    pub fn set_parent(&self, parent: NodeId) {
        self.state.write().parent = parent;
    }

    pub fn key_count(&self) -> usize {
        self.state.read().keys.len()
    }

    pub fn keys(&self) -> Vec<Vec<u8>> {
        self.state.read().keys.clone()
    }

    pub fn pointers(&self) -> Vec<NodePointer> {
        self.state.read().pointers.clone()
    }

    pub fn high_key(&self) -> Vec<u8> {
        self.state.read().high_key.clone()
    }

    pub fn set_high_key(&self, high_key: Vec<u8>) {
        let mut s = self.state.write();
        s.high_key = high_key;
        s.dirty = true;
    }

    pub fn prev(&self) -> NodeId {
        self.state.read().prev
    }

    pub fn set_prev(&self, prev: NodeId) {
        let mut s = self.state.write();
        s.prev = prev;
        s.dirty = true;
    }

    pub fn next(&self) -> NodeId {
        self.state.read().next
    }

    pub fn set_next(&self, next: NodeId) {
        let mut s = self.state.write();
        s.next = next;
        s.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.state.read().dirty
    }

    /// Replaces the node's body wholesale (used by split/merge/promote/
    /// demote, which recompute the full key and pointer arrays).
    pub fn set_body(&self, keys: Vec<Vec<u8>>, pointers: Vec<NodePointer>) {
        let mut s = self.state.write();
        s.keys = keys;
        s.pointers = pointers;
        s.dirty = true;
    }

    /// `mid` on exact match, `-(low + 1)` as the insertion point on miss.
    pub fn binary_search(&self, key: &[u8]) -> i64 {
        let state = self.state.read();
        let mut low: i64 = 0;
        let mut high: i64 = state.keys.len() as i64 - 1;
        while low <= high {
            let mid = (low + high) / 2;
            match state.keys[mid as usize].as_slice().cmp(key) {
                Ordering::Less => low = mid + 1,
                Ordering::Greater => high = mid - 1,
                Ordering::Equal => return mid,
            }
        }
        -(low + 1)
    }

    fn prefix(&self) -> Vec<u8> {
        let state = self.state.read();
        match (state.keys.first(), state.keys.last()) {
            (Some(first), Some(last)) => {
                let len = common_prefix_len(first, last);
                first[..len].to_vec()
            }
            _ => Vec::new(),
        }
    }

    fn encode_body(&self) -> Vec<u8> {
        let state = self.state.read();
        let prefix = self.prefix();
        let mut body = Vec::new();
        body.extend_from_slice(&prefix);
        for key in &state.keys {
            let suffix = &key[prefix.len()..];
            body.extend_from_slice(&(suffix.len() as u32).to_le_bytes());
            body.extend_from_slice(suffix);
        }
        for p in &state.pointers {
            body.extend_from_slice(&p.to_le_bytes());
        }
        body.extend_from_slice(&(state.high_key.len() as u32).to_le_bytes());
        body.extend_from_slice(&state.high_key);
        body.extend_from_slice(&state.prev.to_le_bytes());
        body.extend_from_slice(&state.next.to_le_bytes());
        body
    }

    /// Serializes body + header-extra fields into the backing page.
    /// Does not flush the page to disk; the caller (the tree, via the
    /// cache's eviction path or an explicit flush) does that.
    pub fn prepare_flush(&self) -> NodeResult<()> {
        let body = self.encode_body();
        let mut page = self.page.write();
        if body.len() as u32 > page.work_size() {
            return Err(SpiderError::ExceededMaxKeyCount);
        }
        let (node_type, parent, key_count, prefix_len) = {
            let state = self.state.read();
            (
                state.node_type,
                state.parent,
                state.keys.len() as u32,
                self.prefix().len() as u32,
            )
        };
        page.set_page_type(node_type);
        let extra = page.header_extra_mut();
        extra[0..8].copy_from_slice(&parent.to_le_bytes());
        extra[8..12].copy_from_slice(&key_count.to_le_bytes());
        extra[12..16].copy_from_slice(&prefix_len.to_le_bytes());
        let mut slice: &[u8] = &body;
        page.write(&mut slice)?;
        self.state.write().dirty = false;
        Ok(())
    }

    pub fn encoded_len(&self) -> usize {
        self.encode_body().len()
    }

    pub fn need_split(&self, max_keys: u32, work_size: u32) -> bool {
        self.key_count() as u32 > max_keys || self.encoded_len() as u32 > work_size
    }

    pub fn need_merge(&self, min_keys: u32, work_size: u32) -> bool {
        (self.key_count() as u32) < min_keys / 2 || (self.encoded_len() as u32) < work_size / 2
    }

    /// True only for a genuinely empty leaf: an internal node with 0
    /// keys still has one child pointer and must be absorbed, not freed.
    pub fn need_destroy(&self) -> bool {
        self.id != ROOT_NODE && self.node_type() == PageType::Leaf && self.key_count() == 0
    }

    /// Acquires this node's structural-mutation lock, returning a guard
    /// that owns a strong reference so it can outlive the caller's
    /// borrow of the `Arc` it was acquired from.
    pub fn lock_guard(self: &Arc<Self>) -> NodeGuard {
        self.lock.acquire_raw();
        NodeGuard { node: self.clone() }
    }
}

pub struct NodeGuard {
    node: Arc<Node>,
}

impl NodeGuard {
    pub fn node(&self) -> &Arc<Node> {
        &self.node
    }
}

impl Drop for NodeGuard {
    fn drop(&mut self) {
        self.node.lock.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SpiderConfig;

    fn leaf_with_keys(keys: &[&[u8]]) -> Node {
        let config = SpiderConfig::default();
        let page = Arc::new(RwLock::new(Page::new(1, &config)));
        let node = Node::new(page, PageType::Leaf, NULL_NODE);
        node.set_body(
            keys.iter().map(|k| k.to_vec()).collect(),
            (0..keys.len() as i64).collect(),
        );
        node
    }

    #[test]
    fn binary_search_finds_match_and_insertion_point() {
        let node = leaf_with_keys(&[b"a", b"c", b"e"]);
        assert_eq!(node.binary_search(b"c"), 1);
        assert_eq!(node.binary_search(b"b"), -2);
        assert_eq!(node.binary_search(b"z"), -4);
    }

    #[test]
    fn round_trips_through_page() {
        let node = leaf_with_keys(&[b"apple", b"apply", b"banana"]);
        node.set_high_key(b"zzzz".to_vec());
        node.prepare_flush().unwrap();
        let page = node.page().clone();
        let reloaded = Node::load(page).unwrap();
        assert_eq!(reloaded.keys(), node.keys());
        assert_eq!(reloaded.high_key(), b"zzzz");
    }
}
