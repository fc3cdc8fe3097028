use std::path::Path;
use std::sync::Arc;

use crate::config::SpiderConfig;
use crate::error::{SpiderError, SpiderResult};
use crate::pagedfile::PagedFile;
use crate::storage::{Storage, StorageHeaderExt};

/// Per-database facade: validates key/value constraints at the boundary
/// (per the external-interface key-length rule) and delegates everything
/// else to `Storage`. The cross-core sharding facade named in the
/// top-level purpose statement is an external collaborator, not built
/// here — one `Database` owns one file.
pub struct Database {
    storage: Storage<StorageHeaderExt>,
    config: SpiderConfig,
}

impl Database {
    pub fn new<P: AsRef<Path>>(path: P, config: SpiderConfig) -> Self {
        let file = Arc::new(PagedFile::new(path, config));
        Database {
            storage: Storage::new(file, config),
            config,
        }
    }

    pub fn open(&self) -> SpiderResult<()> {
        self.storage.open()
    }

    pub fn close(&self) -> SpiderResult<()> {
        self.storage.close()
    }

    pub fn flush(&self) -> SpiderResult<()> {
        self.storage.flush()
    }

    pub fn is_open(&self) -> bool {
        self.storage.is_open()
    }

    fn validate_key(&self, key: &[u8]) -> SpiderResult<()> {
        if key.is_empty() {
            return Err(SpiderError::EmptyKey);
        }
        if key.len() as u32 > self.config.max_key_len() {
            return Err(SpiderError::KeyTooLong);
        }
        Ok(())
    }

    fn validate_value(&self, value: &[u8]) -> SpiderResult<()> {
        if value.is_empty() {
            return Err(SpiderError::EmptyValue);
        }
        Ok(())
    }

    pub fn insert(&self, key: &[u8], value: &[u8]) -> SpiderResult<()> {
        self.validate_key(key)?;
        self.validate_value(value)?;
        self.storage.insert(key.to_vec(), value)
    }

    pub fn update(&self, key: &[u8], value: &[u8]) -> SpiderResult<()> {
        self.validate_key(key)?;
        self.validate_value(value)?;
        self.storage.update(key, value)
    }

    pub fn erase(&self, key: &[u8]) -> SpiderResult<()> {
        self.validate_key(key)?;
        self.storage.erase(key)
    }

    pub fn select(&self, key: &[u8]) -> SpiderResult<Vec<u8>> {
        self.validate_key(key)?;
        self.storage.select(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn open_db(config: SpiderConfig) -> (Database, NamedTempFile) {
        let tmp = NamedTempFile::new().unwrap();
        let path = tmp.path().to_path_buf();
        let db = Database::new(path, config);
        db.open().unwrap();
        (db, tmp)
    }

    #[test]
    fn rejects_empty_key_and_value() {
        let (db, _tmp) = open_db(SpiderConfig::default());
        assert!(matches!(db.insert(b"", b"v"), Err(SpiderError::EmptyKey)));
        assert!(matches!(db.insert(b"k", b""), Err(SpiderError::EmptyValue)));
    }

    #[test]
    fn rejects_overlong_key() {
        let (db, _tmp) = open_db(SpiderConfig::default());
        let config = SpiderConfig::default();
        let long_key = vec![b'a'; config.max_key_len() as usize + 1];
        assert!(matches!(db.insert(&long_key, b"v"), Err(SpiderError::KeyTooLong)));
    }

    #[test]
    fn insert_select_update_erase_round_trip() {
        let (db, _tmp) = open_db(SpiderConfig::default());
        db.insert(b"hello", b"world").unwrap();
        assert_eq!(db.select(b"hello").unwrap(), b"world");
        db.update(b"hello", b"there").unwrap();
        assert_eq!(db.select(b"hello").unwrap(), b"there");
        db.erase(b"hello").unwrap();
        assert!(matches!(db.select(b"hello"), Err(SpiderError::KeyNotExists)));
    }

    #[test]
    fn reopen_preserves_data() {
        let config = SpiderConfig::default();
        let tmp = NamedTempFile::new().unwrap();
        let path = tmp.path().to_path_buf();
        {
            let db = Database::new(&path, config);
            db.open().unwrap();
            db.insert(b"persisted", b"value").unwrap();
            db.close().unwrap();
        }
        {
            let db = Database::new(&path, config);
            db.open().unwrap();
            assert_eq!(db.select(b"persisted").unwrap(), b"value");
            db.close().unwrap();
        }
    }
}
