use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::btree::{BTree, TreeHeader, NULL_DATA_POINTER};
use crate::cache::LruCache;
use crate::config::SpiderConfig;
use crate::datapage::{DataPage, ValueId};
use crate::error::{SpiderError, StorageResult};
use crate::node::NodeId;
use crate::page::{PageId, PageType, NULL_PAGE};
use crate::pagedfile::{HeaderExt, PagedFile};
use crate::sync::Semaphore;

/// Data-page id -> remaining free bytes, capped at `max_available_pages`
/// entries and persisted in the file header. A linear scan is fine: the
/// directory is deliberately small.
#[derive(Clone, Default)]
pub struct AvailabilityDirectory {
    entries: Vec<(PageId, u32)>,
}

impl AvailabilityDirectory {
    pub fn encode(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&(self.entries.len() as u64).to_le_bytes());
        for &(id, space) in &self.entries {
            buf.extend_from_slice(&id.to_le_bytes());
            buf.extend_from_slice(&space.to_le_bytes());
        }
    }

    pub fn decode(buf: &[u8]) -> StorageResult<Self> {
        let count = u64::from_le_bytes(buf[0..8].try_into().unwrap()) as usize;
        let mut cursor = 8;
        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            let id = i64::from_le_bytes(buf[cursor..cursor + 8].try_into().unwrap());
            cursor += 8;
            let space = u32::from_le_bytes(buf[cursor..cursor + 4].try_into().unwrap());
            cursor += 4;
            entries.push((id, space));
        }
        Ok(AvailabilityDirectory { entries })
    }

    pub fn find_candidate(&self, required: u32) -> Option<PageId> {
        self.entries.iter().find(|&&(_, space)| space >= required).map(|&(id, _)| id)
    }

    /// Re-lists `page_id` with its current free space, or drops it if
    /// that's below `min_available_space`. Silently skips adding a new
    /// entry once the directory is at `max_available_pages` — the
    /// directory is a placement hint, not a source of truth.
    pub fn upsert(&mut self, page_id: PageId, free_space: u32, min_available_space: u32, max_available_pages: usize) {
        self.entries.retain(|&(id, _)| id != page_id);
        if free_space >= min_available_space && self.entries.len() < max_available_pages {
            self.entries.push((page_id, free_space));
        }
    }

    pub fn remove(&mut self, page_id: PageId) {
        self.entries.retain(|&(id, _)| id != page_id);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Extension point for the storage layer's file-header fields: the
/// tree's root plus the availability directory.
pub trait StorageHeader: TreeHeader {
    fn directory(&self) -> &AvailabilityDirectory;
    fn directory_mut(&mut self) -> &mut AvailabilityDirectory;
}

#[derive(Clone, Default)]
pub struct StorageHeaderExt {
    pub root: NodeId,
    pub directory: AvailabilityDirectory,
}

impl HeaderExt for StorageHeaderExt {
    fn encode(&self, buf: &mut Vec<u8>) {
        buf.extend_from_slice(&self.root.to_le_bytes());
        self.directory.encode(buf);
    }

    fn decode(buf: &[u8]) -> StorageResult<Self> {
        let root = i64::from_le_bytes(buf[0..8].try_into().unwrap());
        let directory = AvailabilityDirectory::decode(&buf[8..])?;
        Ok(StorageHeaderExt { root, directory })
    }
}

impl TreeHeader for StorageHeaderExt {
    fn root(&self) -> NodeId {
        self.root
    }

    fn set_root(&mut self, root: NodeId) {
        self.root = root;
    }
}

impl StorageHeader for StorageHeaderExt {
    fn directory(&self) -> &AvailabilityDirectory {
        &self.directory
    }

    fn directory_mut(&mut self) -> &mut AvailabilityDirectory {
        &mut self.directory
    }
}

fn encode_ptr(page_id: PageId, value_id: ValueId) -> i64 {
    (page_id << 16) | value_id as i64
}

fn decode_ptr(ptr: i64) -> (PageId, ValueId) {
    (ptr >> 16, (ptr & 0xffff) as ValueId)
}

/// Heap of variable-length values packed into data pages, sitting on top
/// of a B-link-tree that maps keys to `(page_id << 16) | value_id`
/// pointers. Mirrors `BTree`'s cache/weak-map/disk resolution, but for
/// data pages instead of nodes.
pub struct Storage<H: StorageHeader> {
    pub tree: BTree<H>,
    config: SpiderConfig,
    cache: LruCache<PageId, Arc<DataPage>>,
    pages: Mutex<HashMap<PageId, Weak<DataPage>>>,
    get_page_lock: Semaphore,
}

impl<H: StorageHeader + Send + Sync + 'static> Storage<H> {
    pub fn new(file: Arc<PagedFile<H>>, config: SpiderConfig) -> Self {
        let evict_file = file.clone();
        let cache = LruCache::new(
            config.n_cached_data_pages,
            Box::new(move |_id: &PageId, page: &Arc<DataPage>| {
                if page.is_dirty() {
                    page.prepare_flush()?;
                }
                evict_file.flush_page(page.page())
            }),
        );
        Storage {
            tree: BTree::new(file, config),
            config,
            cache,
            pages: Mutex::new(HashMap::new()),
            get_page_lock: Semaphore::new(1),
        }
    }

    pub fn open(&self) -> StorageResult<()> {
        self.tree.open()
    }

    pub fn close(&self) -> StorageResult<()> {
        self.cache.clear()?;
        self.tree.close()
    }

    pub fn flush(&self) -> StorageResult<()> {
        self.tree.flush()
    }

    pub fn is_open(&self) -> bool {
        self.tree.is_open()
    }

    fn get_data_page(&self, id: PageId) -> StorageResult<Arc<DataPage>> {
        if let Ok(page) = self.cache.get(&id) {
            return Ok(page);
        }
        let _permit = self.get_page_lock.acquire();
        if let Ok(page) = self.cache.get(&id) {
            return Ok(page);
        }
        let mut table = self.pages.lock();
        if let Some(weak) = table.get(&id) {
            if let Some(page) = weak.upgrade() {
                drop(table);
                self.cache.put(id, page.clone())?;
                return Ok(page);
            }
        }
        let raw_page = self.tree.file.get_or_create_page(id)?;
        let page = Arc::new(DataPage::load(raw_page)?);
        table.insert(id, Arc::downgrade(&page));
        drop(table);
        self.cache.put(id, page.clone())?;
        Ok(page)
    }

    fn create_data_page(&self) -> StorageResult<Arc<DataPage>> {
        let raw_page = self.tree.file.get_free_page()?;
        raw_page.write().set_page_type(PageType::Data);
        let page = Arc::new(DataPage::new(raw_page));
        self.pages.lock().insert(page.id(), Arc::downgrade(&page));
        self.cache.put(page.id(), page.clone())?;
        Ok(page)
    }

    fn cache_page(&self, page: Arc<DataPage>) -> StorageResult<()> {
        self.cache.put(page.id(), page)
    }

    fn relist(&self, page: &Arc<DataPage>) {
        let free_space = page.free_space(self.config.work_size());
        let mut header = self.tree.file.header.write();
        header.ext.directory_mut().upsert(
            page.id(),
            free_space,
            self.config.min_available_space,
            self.config.max_available_pages,
        );
        header.dirty = true;
    }

    fn free_data_page(&self, page: &Arc<DataPage>) -> StorageResult<()> {
        {
            let raw = page.page();
            let mut guard = raw.write();
            guard.set_page_type(PageType::Unused);
            guard.set_next_page(NULL_PAGE);
        }
        self.tree.file.flush_page(page.page())?;
        self.tree.file.unlink_pages_from(page.id())?;
        self.pages.lock().remove(&page.id());
        let mut header = self.tree.file.header.write();
        header.ext.directory_mut().remove(page.id());
        header.dirty = true;
        Ok(())
    }

    /// Stores `bytes` on a page with enough free space (from the
    /// availability directory, else a freshly allocated one) and returns
    /// its data pointer.
    pub fn add_value(&self, bytes: &[u8]) -> StorageResult<i64> {
        let required = 4 + bytes.len() as u32;
        if required > self.config.work_size() {
            return Err(SpiderError::DataPageUnavailable);
        }
        let candidate = self.tree.file.header.read().ext.directory().find_candidate(required);

        let page = match candidate {
            Some(id) => self.get_data_page(id)?,
            None => self.create_data_page()?,
        };

        let value_id = page.add_value(bytes)?;
        self.cache_page(page.clone())?;
        self.relist(&page);
        Ok(encode_ptr(page.id(), value_id))
    }

    pub fn find_value(&self, ptr: i64) -> StorageResult<Vec<u8>> {
        let (page_id, value_id) = decode_ptr(ptr);
        self.get_data_page(page_id)?.get_value(value_id)
    }

    pub fn update_value(&self, ptr: i64, bytes: &[u8]) -> StorageResult<()> {
        let (page_id, value_id) = decode_ptr(ptr);
        let page = self.get_data_page(page_id)?;
        page.update_value(value_id, bytes)?;
        self.cache_page(page.clone())?;
        self.relist(&page);
        Ok(())
    }

    /// Tombstones the value. If the page has accumulated
    /// `max_empty_values_on_each_page` tombstones and holds nothing
    /// live, the page is returned to the free list.
    pub fn remove_value(&self, ptr: i64) -> StorageResult<()> {
        let (page_id, value_id) = decode_ptr(ptr);
        let page = self.get_data_page(page_id)?;
        page.remove_value(value_id)?;

        if page.live_count() == 0
            && page.tombstone_count() >= self.config.max_empty_values_on_each_page as usize
        {
            self.free_data_page(&page)
        } else {
            self.cache_page(page.clone())?;
            self.relist(&page);
            Ok(())
        }
    }

    pub fn insert(&self, key: Vec<u8>, value: &[u8]) -> StorageResult<()> {
        let ptr = self.add_value(value)?;
        if let Err(e) = self.tree.add(key, ptr) {
            let _ = self.remove_value(ptr);
            return Err(e);
        }
        Ok(())
    }

    pub fn update(&self, key: &[u8], value: &[u8]) -> StorageResult<()> {
        let ptr = self.tree.find(key)?;
        if ptr == NULL_DATA_POINTER {
            return Err(SpiderError::KeyNotExists);
        }
        self.update_value(ptr, value)
    }

    pub fn erase(&self, key: &[u8]) -> StorageResult<()> {
        let ptr = self.tree.remove(key)?;
        self.remove_value(ptr)
    }

    pub fn select(&self, key: &[u8]) -> StorageResult<Vec<u8>> {
        let ptr = self.tree.find(key)?;
        if ptr == NULL_DATA_POINTER {
            return Err(SpiderError::KeyNotExists);
        }
        self.find_value(ptr)
    }
}
