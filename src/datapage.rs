use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{SpiderError, StorageResult};
use crate::page::{Page, PageId, PageType};

/// Index of a value slot inside a data page. 16-bit, so a single page
/// can never hold more than 65,536 values regardless of `page_size`.
pub type ValueId = u16;
pub const MAX_VALUES_PER_PAGE: usize = u16::MAX as usize + 1;

struct DataPageState {
    /// One slot per value; an empty `Vec` marks a tombstone. Values are
    /// validated non-empty at the database boundary, so emptiness is an
    /// unambiguous tombstone marker here.
    values: Vec<Vec<u8>>,
    dirty: bool,
}

/// One data page: a flat sequence of length-prefixed value slots backed
/// by one page, the way `Node` backs one B-link-tree node.
pub struct DataPage {
    id: PageId,
    page: Arc<RwLock<Page>>,
    state: RwLock<DataPageState>,
}

impl DataPage {
    pub fn new(page: Arc<RwLock<Page>>) -> Self {
        let id = page.read().id();
        DataPage {
            id,
            page,
            state: RwLock::new(DataPageState {
                values: Vec::new(),
                dirty: true,
            }),
        }
    }

    pub fn load(page: Arc<RwLock<Page>>) -> StorageResult<Self> {
        let id = page.read().id();
        let guard = page.read();
        if guard.page_type() != PageType::Data {
            return Err(SpiderError::InvalidPageType);
        }
        let value_count =
            u32::from_le_bytes(guard.header_extra()[0..4].try_into().unwrap()) as usize;

        let body = &guard.payload()[..guard.data_len() as usize];
        let mut cursor = 0usize;
        let mut values = Vec::with_capacity(value_count);
        for _ in 0..value_count {
            let len = u32::from_le_bytes(body[cursor..cursor + 4].try_into().unwrap()) as usize;
            cursor += 4;
            values.push(body[cursor..cursor + len].to_vec());
            cursor += len;
        }
        drop(guard);
        Ok(DataPage {
            id,
            page,
            state: RwLock::new(DataPageState {
                values,
                dirty: false,
            }),
        })
    }

    pub fn id(&self) -> PageId {
        self.id
    }

    pub fn page(&self) -> &Arc<RwLock<Page>> {
        &self.page
    }

    pub fn is_dirty(&self) -> bool {
        self.state.read().dirty
    }

    pub fn live_count(&self) -> usize {
        self.state.read().values.iter().filter(|v| !v.is_empty()).count()
    }

    pub fn tombstone_count(&self) -> usize {
        self.state.read().values.iter().filter(|v| v.is_empty()).count()
    }

    fn encode_body(&self) -> Vec<u8> {
        let state = self.state.read();
        let mut body = Vec::new();
        for v in &state.values {
            body.extend_from_slice(&(v.len() as u32).to_le_bytes());
            body.extend_from_slice(v);
        }
        body
    }

    pub fn encoded_len(&self) -> usize {
        self.encode_body().len()
    }

    /// Serializes the slot array into the backing page, without
    /// flushing to disk.
    pub fn prepare_flush(&self) -> StorageResult<()> {
        let body = self.encode_body();
        let mut page = self.page.write();
        if body.len() as u32 > page.work_size() {
            return Err(SpiderError::ExceededMaxKeyCount);
        }
        let value_count = self.state.read().values.len() as u32;
        page.set_page_type(PageType::Data);
        page.header_extra_mut()[0..4].copy_from_slice(&value_count.to_le_bytes());
        let mut slice: &[u8] = &body;
        page.write(&mut slice)?;
        self.state.write().dirty = false;
        Ok(())
    }

    /// Remaining bytes available for a new value on this page.
    pub fn free_space(&self, work_size: u32) -> u32 {
        work_size.saturating_sub(self.encoded_len() as u32)
    }

    /// Appends a value slot, returning its id.
    pub fn add_value(&self, bytes: &[u8]) -> StorageResult<ValueId> {
        let mut state = self.state.write();
        if state.values.len() >= MAX_VALUES_PER_PAGE {
            return Err(SpiderError::DataPageUnavailable);
        }
        let id = state.values.len() as ValueId;
        state.values.push(bytes.to_vec());
        state.dirty = true;
        Ok(id)
    }

    pub fn get_value(&self, id: ValueId) -> StorageResult<Vec<u8>> {
        match self.state.read().values.get(id as usize) {
            Some(v) if !v.is_empty() => Ok(v.clone()),
            _ => Err(SpiderError::ValueNotExists),
        }
    }

    pub fn update_value(&self, id: ValueId, bytes: &[u8]) -> StorageResult<()> {
        let mut state = self.state.write();
        match state.values.get_mut(id as usize) {
            Some(v) if !v.is_empty() => {
                *v = bytes.to_vec();
                state.dirty = true;
                Ok(())
            }
            _ => Err(SpiderError::ValueNotExists),
        }
    }

    /// Tombstones a slot: clears its bytes but keeps its index, so later
    /// slots keep their ids.
    pub fn remove_value(&self, id: ValueId) -> StorageResult<()> {
        let mut state = self.state.write();
        match state.values.get_mut(id as usize) {
            Some(v) if !v.is_empty() => {
                *v = Vec::new();
                state.dirty = true;
                Ok(())
            }
            _ => Err(SpiderError::ValueNotExists),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SpiderConfig;

    fn fresh_page() -> Arc<RwLock<Page>> {
        let config = SpiderConfig::default();
        Arc::new(RwLock::new(Page::new(1, &config)))
    }

    #[test]
    fn add_find_update_remove_round_trip() {
        let page = DataPage::new(fresh_page());
        let a = page.add_value(b"hello").unwrap();
        let b = page.add_value(b"world").unwrap();
        assert_eq!(page.get_value(a).unwrap(), b"hello");
        assert_eq!(page.get_value(b).unwrap(), b"world");

        page.update_value(a, b"greetings").unwrap();
        assert_eq!(page.get_value(a).unwrap(), b"greetings");

        page.remove_value(a).unwrap();
        assert!(matches!(page.get_value(a), Err(SpiderError::ValueNotExists)));
        assert!(matches!(
            page.update_value(a, b"x"),
            Err(SpiderError::ValueNotExists)
        ));
        assert_eq!(page.tombstone_count(), 1);
        assert_eq!(page.live_count(), 1);
    }

    #[test]
    fn out_of_range_slot_is_value_not_exists() {
        let page = DataPage::new(fresh_page());
        assert!(matches!(page.get_value(0), Err(SpiderError::ValueNotExists)));
    }

    #[test]
    fn round_trips_through_page() {
        let page = DataPage::new(fresh_page());
        page.add_value(b"alpha").unwrap();
        page.add_value(b"beta").unwrap();
        page.remove_value(0).unwrap();
        page.prepare_flush().unwrap();

        let reloaded = DataPage::load(page.page().clone()).unwrap();
        assert!(matches!(reloaded.get_value(0), Err(SpiderError::ValueNotExists)));
        assert_eq!(reloaded.get_value(1).unwrap(), b"beta");
        assert_eq!(reloaded.tombstone_count(), 1);
    }
}
