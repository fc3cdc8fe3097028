use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, RwLock};

use crate::config::SpiderConfig;
use crate::error::{FileResult, SpiderError};
use crate::page::{Page, PageId, PageType, NULL_PAGE};
use crate::sync::Semaphore;

/// Extension point for the fields a layer above the paged file appends
/// to the file header (the tree's `root`, the storage layer's
/// availability directory). Reframes the source's header-factory
/// virtual methods as plain composition.
pub trait HeaderExt: Default + Clone {
    fn encode(&self, buf: &mut Vec<u8>);
    fn decode(buf: &[u8]) -> FileResult<Self>
    where
        Self: Sized;
}

impl HeaderExt for () {
    fn encode(&self, _buf: &mut Vec<u8>) {}
    fn decode(_buf: &[u8]) -> FileResult<Self> {
        Ok(())
    }
}

/// Bytes occupied by the base file header fields: page_size(4) +
/// page_count(8) + first_free_page(8) + last_free_page(8).
const BASE_FILE_HEADER_SIZE: usize = 4 + 8 + 8 + 8;

#[derive(Clone)]
pub struct FileHeader<E: HeaderExt> {
    pub page_size: u32,
    pub page_count: u64,
    pub first_free_page: PageId,
    pub last_free_page: PageId,
    pub ext: E,
    pub dirty: bool,
}

impl<E: HeaderExt> FileHeader<E> {
    fn new(config: &SpiderConfig) -> Self {
        FileHeader {
            page_size: config.page_size,
            page_count: 0,
            first_free_page: NULL_PAGE,
            last_free_page: NULL_PAGE,
            ext: E::default(),
            dirty: true,
        }
    }

    fn encode(&self, header_size: u32) -> Vec<u8> {
        let mut buf = vec![0u8; header_size as usize];
        buf[0..4].copy_from_slice(&self.page_size.to_le_bytes());
        buf[4..12].copy_from_slice(&self.page_count.to_le_bytes());
        buf[12..20].copy_from_slice(&self.first_free_page.to_le_bytes());
        buf[20..28].copy_from_slice(&self.last_free_page.to_le_bytes());
        let mut ext_buf = Vec::new();
        self.ext.encode(&mut ext_buf);
        let end = (BASE_FILE_HEADER_SIZE + ext_buf.len()).min(buf.len());
        buf[BASE_FILE_HEADER_SIZE..end]
            .copy_from_slice(&ext_buf[..end - BASE_FILE_HEADER_SIZE]);
        buf
    }

    fn decode(buf: &[u8]) -> FileResult<Self> {
        let page_size = u32::from_le_bytes(buf[0..4].try_into().unwrap());
        let page_count = u64::from_le_bytes(buf[4..12].try_into().unwrap());
        let first_free_page = i64::from_le_bytes(buf[12..20].try_into().unwrap());
        let last_free_page = i64::from_le_bytes(buf[20..28].try_into().unwrap());
        let ext = E::decode(&buf[BASE_FILE_HEADER_SIZE..])?;
        Ok(FileHeader {
            page_size,
            page_count,
            first_free_page,
            last_free_page,
            ext,
            dirty: false,
        })
    }
}

/// Owns the OS file, the file header, the free-page list, and the table
/// of live page objects. Reads and writes variable-length records as
/// chains of pages.
pub struct PagedFile<E: HeaderExt> {
    pub config: SpiderConfig,
    path: PathBuf,
    file: Mutex<Option<File>>,
    pub header: RwLock<FileHeader<E>>,
    pages: Mutex<HashMap<PageId, Weak<RwLock<Page>>>>,
    free_page_lock: Semaphore,
}

impl<E: HeaderExt> PagedFile<E> {
    pub fn new<P: AsRef<Path>>(path: P, config: SpiderConfig) -> Self {
        PagedFile {
            header: RwLock::new(FileHeader::new(&config)),
            config,
            path: path.as_ref().to_path_buf(),
            file: Mutex::new(None),
            pages: Mutex::new(HashMap::new()),
            free_page_lock: Semaphore::new(1),
        }
    }

    pub fn is_open(&self) -> bool {
        self.file.lock().is_some()
    }

    pub fn open(&self) -> FileResult<()> {
        let mut file_slot = self.file.lock();
        if file_slot.is_some() {
            return Err(SpiderError::FileAlreadyOpened);
        }
        let existed = self.path.exists();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.path)?;

        let header_size = self.config.file_header_size;
        if existed && file.metadata()?.len() >= header_size as u64 {
            let mut buf = vec![0u8; header_size as usize];
            file.seek(SeekFrom::Start(0))?;
            file.read_exact(&mut buf)?;
            *self.header.write() = FileHeader::decode(&buf)?;
        } else {
            let header = FileHeader::new(&self.config);
            let buf = header.encode(header_size);
            file.seek(SeekFrom::Start(0))?;
            file.write_all(&buf)?;
            *self.header.write() = header;
        }
        *file_slot = Some(file);
        Ok(())
    }

    pub fn flush_header(&self) -> FileResult<()> {
        let mut file_slot = self.file.lock();
        let file = file_slot.as_mut().ok_or(SpiderError::ClosedError)?;
        let header = self.header.read();
        let buf = header.encode(self.config.file_header_size);
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&buf)?;
        Ok(())
    }

    pub fn close(&self) -> FileResult<()> {
        let mut file_slot = self.file.lock();
        let mut file = file_slot.take().ok_or(SpiderError::FileAlreadyClosed)?;
        let buf = self.header.read().encode(self.config.file_header_size);
        file.seek(SeekFrom::Start(0))?;
        file.write_all(&buf)?;
        Ok(())
    }

    fn with_file<R>(&self, f: impl FnOnce(&mut File) -> FileResult<R>) -> FileResult<R> {
        let mut file_slot = self.file.lock();
        let file = file_slot.as_mut().ok_or(SpiderError::ClosedError)?;
        f(file)
    }

    /// Resolves a page, loading it from disk on first touch and
    /// reusing the live weak-referenced object thereafter.
    pub fn get_or_create_page(&self, id: PageId) -> FileResult<Arc<RwLock<Page>>> {
        let mut table = self.pages.lock();
        if let Some(weak) = table.get(&id) {
            if let Some(page) = weak.upgrade() {
                return Ok(page);
            }
        }
        let mut page = Page::new(id, &self.config);
        self.with_file(|file| page.load(file, self.config.file_header_size))?;
        let page = Arc::new(RwLock::new(page));
        table.insert(id, Arc::downgrade(&page));
        Ok(page)
    }

    pub fn flush_page(&self, page: &Arc<RwLock<Page>>) -> FileResult<()> {
        self.with_file(|file| page.write().flush(file, self.config.file_header_size))
    }

    /// Claims a free page, extending the file if the free list is
    /// empty. Serialized so two allocators never claim the same id.
    pub fn get_free_page(&self) -> FileResult<Arc<RwLock<Page>>> {
        let _permit = self.free_page_lock.acquire();
        let first_free = self.header.read().first_free_page;
        if first_free != NULL_PAGE {
            let page_arc = self.get_or_create_page(first_free)?;
            let next = {
                let mut page = page_arc.write();
                let next = page.next_page();
                page.set_page_type(PageType::Unused);
                page.set_next_page(NULL_PAGE);
                next
            };
            let mut header = self.header.write();
            header.first_free_page = next;
            if next == NULL_PAGE {
                header.last_free_page = NULL_PAGE;
            }
            header.dirty = true;
            log::trace!("allocate: reusing free page {}", first_free);
            Ok(page_arc)
        } else {
            let id = {
                let mut header = self.header.write();
                let id = header.page_count as PageId;
                header.page_count += 1;
                header.dirty = true;
                id
            };
            log::trace!("allocate: extending file to page {}", id);
            self.get_or_create_page(id)
        }
    }

    /// Prepends the chain starting at `f` onto the free list.
    pub fn unlink_pages_from(&self, f: PageId) -> FileResult<()> {
        log::trace!("allocate: returning page chain starting at {} to the free list", f);
        let mut header = self.header.write();
        if header.first_free_page == NULL_PAGE {
            header.first_free_page = f;
        } else {
            let last = self.get_or_create_page(header.last_free_page)?;
            last.write().set_next_page(f);
            self.flush_page(&last)?;
        }
        let mut tail = f;
        let bound = header.page_count.max(1);
        for _ in 0..bound {
            let page = self.get_or_create_page(tail)?;
            let next = page.read().next_page();
            if next == NULL_PAGE {
                break;
            }
            tail = next;
        }
        header.last_free_page = tail;
        header.dirty = true;
        Ok(())
    }

    /// Writes `data` as a chain of pages, returning the first page's id.
    /// `record_type` tags the first page; later pages are `overflow`.
    pub fn write_record(&self, data: &[u8], record_type: PageType) -> FileResult<PageId> {
        let first_page = self.get_free_page()?;
        let first_id = first_page.id_of();
        let mut cursor: &[u8] = data;
        let mut current = first_page;
        let mut first = true;
        loop {
            {
                let mut page = current.write();
                if first {
                    page.set_page_type(record_type);
                    page.set_record_len(data.len() as u32);
                }
                page.write(&mut cursor)?;
            }
            first = false;
            if cursor.is_empty() {
                current.write().set_next_page(NULL_PAGE);
                self.flush_page(&current)?;
                break;
            }
            let next_page = self.get_free_page()?;
            current.write().set_next_page(next_page.id_of());
            self.flush_page(&current)?;
            {
                let mut p = next_page.write();
                p.set_page_type(PageType::Overflow);
            }
            current = next_page;
        }
        Ok(first_id)
    }

    pub fn read_record(&self, id: PageId) -> FileResult<Vec<u8>> {
        let first = self.get_or_create_page(id)?;
        let record_len = first.read().record_len() as usize;
        let mut out = Vec::with_capacity(record_len);
        let mut current = first;
        loop {
            current.read().read(&mut out)?;
            if out.len() >= record_len {
                break;
            }
            let next = current.read().next_page();
            if next == NULL_PAGE {
                break;
            }
            current = self.get_or_create_page(next)?;
        }
        out.truncate(record_len);
        Ok(out)
    }
}

trait PageIdExt {
    fn id_of(&self) -> PageId;
}

impl PageIdExt for Arc<RwLock<Page>> {
    fn id_of(&self) -> PageId {
        self.read().id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn temp_path() -> PathBuf {
        let tmp = NamedTempFile::new().unwrap();
        let path = tmp.path().to_path_buf();
        tmp.close().unwrap();
        path
    }

    #[test]
    fn open_twice_fails() {
        let file: PagedFile<()> = PagedFile::new(temp_path(), SpiderConfig::default());
        file.open().unwrap();
        assert!(matches!(file.open(), Err(SpiderError::FileAlreadyOpened)));
        file.close().unwrap();
    }

    #[test]
    fn close_twice_fails() {
        let file: PagedFile<()> = PagedFile::new(temp_path(), SpiderConfig::default());
        file.open().unwrap();
        file.close().unwrap();
        assert!(matches!(file.close(), Err(SpiderError::FileAlreadyClosed)));
    }

    #[test]
    fn record_round_trips_across_pages() {
        let config = SpiderConfig {
            page_size: 64,
            page_header_size: 24,
            ..SpiderConfig::default()
        };
        let file: PagedFile<()> = PagedFile::new(temp_path(), config);
        file.open().unwrap();
        let data = vec![7u8; 300];
        let id = file.write_record(&data, PageType::Leaf).unwrap();
        let back = file.read_record(id).unwrap();
        assert_eq!(back, data);
        file.close().unwrap();
    }

    #[test]
    fn free_list_reuses_pages() {
        let file: PagedFile<()> = PagedFile::new(temp_path(), SpiderConfig::default());
        file.open().unwrap();
        let a = file.get_free_page().unwrap();
        let a_id = a.id_of();
        file.unlink_pages_from(a_id).unwrap();
        let b = file.get_free_page().unwrap();
        assert_eq!(b.id_of(), a_id);
        file.close().unwrap();
    }
}
