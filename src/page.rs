use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};

use crate::config::SpiderConfig;
use crate::error::{PageResult, SpiderError};

pub type PageId = i64;
pub const NULL_PAGE: PageId = -1;

/// Bytes occupied by the base page header: type(1) + data_len(4) +
/// record_len(4) + next(8).
pub const BASE_HEADER_SIZE: usize = 1 + 4 + 4 + 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageType {
    Unused = 0,
    Internal = 1,
    Leaf = 2,
    Data = 3,
    Overflow = 4,
}

impl PageType {
    pub fn from_u8(val: u8) -> PageResult<Self> {
        match val {
            0 => Ok(PageType::Unused),
            1 => Ok(PageType::Internal),
            2 => Ok(PageType::Leaf),
            3 => Ok(PageType::Data),
            4 => Ok(PageType::Overflow),
            _ => Err(SpiderError::InvalidPageType),
        }
    }

    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

/// In-memory wrapper of one fixed-size disk page: base header plus the
/// raw byte buffer for the reserved header region and the payload.
pub struct Page {
    id: PageId,
    page_size: u32,
    page_header_size: u32,
    page_type: PageType,
    data_len: u32,
    record_len: u32,
    next: PageId,
    buffer: Vec<u8>,
}

impl Page {
    pub fn new(id: PageId, config: &SpiderConfig) -> Self {
        Page {
            id,
            page_size: config.page_size,
            page_header_size: config.page_header_size,
            page_type: PageType::Unused,
            data_len: 0,
            record_len: 0,
            next: NULL_PAGE,
            buffer: vec![0u8; config.page_size as usize],
        }
    }

    pub fn id(&self) -> PageId {
        self.id
    }

    pub fn page_type(&self) -> PageType {
        self.page_type
    }

    pub fn set_page_type(&mut self, t: PageType) {
        self.page_type = t;
    }

    pub fn data_len(&self) -> u32 {
        self.data_len
    }

    pub fn record_len(&self) -> u32 {
        self.record_len
    }

    pub fn set_record_len(&mut self, len: u32) {
        self.record_len = len;
    }

    pub fn next_page(&self) -> PageId {
        self.next
    }

    pub fn set_next_page(&mut self, next: PageId) {
        self.next = next;
    }

    pub fn work_size(&self) -> u32 {
        self.page_size - self.page_header_size
    }

    /// The header region beyond the base fields, reserved for the node
    /// / data-page header extensions (parent, key_count, prefix_len,
    /// value_count).
    pub fn header_extra(&self) -> &[u8] {
        &self.buffer[BASE_HEADER_SIZE..self.page_header_size as usize]
    }

    pub fn header_extra_mut(&mut self) -> &mut [u8] {
        &mut self.buffer[BASE_HEADER_SIZE..self.page_header_size as usize]
    }

    pub fn payload(&self) -> &[u8] {
        &self.buffer[self.page_header_size as usize..]
    }

    pub fn payload_mut(&mut self) -> &mut [u8] {
        &mut self.buffer[self.page_header_size as usize..]
    }

    fn offset(&self, file_header_size: u32) -> u64 {
        file_header_size as u64 + self.id as u64 * self.page_size as u64
    }

    fn encode_header(&mut self) {
        let buf = &mut self.buffer[..BASE_HEADER_SIZE];
        buf[0] = self.page_type.to_u8();
        buf[1..5].copy_from_slice(&self.data_len.to_le_bytes());
        buf[5..9].copy_from_slice(&self.record_len.to_le_bytes());
        buf[9..17].copy_from_slice(&self.next.to_le_bytes());
    }

    fn decode_header(&mut self) -> PageResult<()> {
        let buf = &self.buffer[..BASE_HEADER_SIZE];
        self.page_type = PageType::from_u8(buf[0])?;
        self.data_len = u32::from_le_bytes(buf[1..5].try_into().unwrap());
        self.record_len = u32::from_le_bytes(buf[5..9].try_into().unwrap());
        self.next = i64::from_le_bytes(buf[9..17].try_into().unwrap());
        Ok(())
    }

    /// Loads the page from disk. EOF is treated as a freshly allocated,
    /// still-`unused` page rather than an error.
    pub fn load(&mut self, file: &mut File, file_header_size: u32) -> PageResult<()> {
        let offset = self.offset(file_header_size);
        if file.seek(SeekFrom::Start(offset)).is_err() {
            return Ok(());
        }
        match file.read_exact(&mut self.buffer) {
            Ok(()) => self.decode_header(),
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                log::warn!("page {} not yet on disk, treating as empty", self.id);
                Ok(())
            }
            Err(e) => Err(SpiderError::Io(e)),
        }
    }

    pub fn flush(&mut self, file: &mut File, file_header_size: u32) -> PageResult<()> {
        self.encode_header();
        let offset = self.offset(file_header_size);
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(&self.buffer)?;
        Ok(())
    }

    /// Copies up to `work_size` bytes from `stream` into the payload.
    pub fn write(&mut self, stream: &mut &[u8]) -> PageResult<()> {
        let work_size = self.work_size() as usize;
        let n = stream.len().min(work_size);
        let (chunk, rest) = stream.split_at(n);
        self.payload_mut()[..n].copy_from_slice(chunk);
        self.data_len = n as u32;
        *stream = rest;
        Ok(())
    }

    /// Appends `data_len` payload bytes to `out`.
    pub fn read(&self, out: &mut Vec<u8>) -> PageResult<()> {
        out.extend_from_slice(&self.payload()[..self.data_len as usize]);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn round_trips_through_disk() {
        let config = SpiderConfig::default();
        let tmp = NamedTempFile::new().unwrap();
        let mut file = tmp.reopen().unwrap();

        let mut page = Page::new(0, &config);
        page.set_page_type(PageType::Leaf);
        page.set_next_page(7);
        let mut data: &[u8] = b"hello world";
        page.write(&mut data).unwrap();
        page.flush(&mut file, config.file_header_size).unwrap();

        let mut loaded = Page::new(0, &config);
        loaded.load(&mut file, config.file_header_size).unwrap();
        assert_eq!(loaded.page_type(), PageType::Leaf);
        assert_eq!(loaded.next_page(), 7);
        let mut out = Vec::new();
        loaded.read(&mut out).unwrap();
        assert_eq!(out, b"hello world");
    }

    #[test]
    fn missing_page_loads_as_empty() {
        let config = SpiderConfig::default();
        let tmp = NamedTempFile::new().unwrap();
        let mut file = tmp.reopen().unwrap();
        let mut page = Page::new(3, &config);
        page.load(&mut file, config.file_header_size).unwrap();
        assert_eq!(page.page_type(), PageType::Unused);
    }
}
