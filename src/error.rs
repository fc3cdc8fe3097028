use thiserror::Error;

/// All error kinds the engine can report, matching the failure surface of
/// the paged file, the cache, the B-link-tree and the data-page store.
#[derive(Debug, Error)]
pub enum SpiderError {
    #[error("file already opened")]
    FileAlreadyOpened,
    #[error("file already closed")]
    FileAlreadyClosed,
    #[error("database is closed")]
    ClosedError,
    #[error("invalid database")]
    InvalidDatabase,
    #[error("invalid file")]
    InvalidFile,
    #[error("invalid btree")]
    InvalidBtree,
    #[error("invalid storage")]
    InvalidStorage,

    #[error("key must not be empty")]
    EmptyKey,
    #[error("value must not be empty")]
    EmptyValue,
    #[error("key exceeds maximum length")]
    KeyTooLong,
    #[error("key already exists")]
    KeyExists,
    #[error("key does not exist")]
    KeyNotExists,

    #[error("invalid page")]
    InvalidPage,
    #[error("invalid page type")]
    InvalidPageType,
    #[error("invalid node")]
    InvalidNode,
    #[error("page unavailable")]
    PageUnavailable,
    #[error("data page unavailable")]
    DataPageUnavailable,
    #[error("node unavailable")]
    NodeUnavailable,
    #[error("child does not exist")]
    ChildNotExists,
    #[error("exceeded maximum key count")]
    ExceededMaxKeyCount,
    #[error("value does not exist")]
    ValueNotExists,

    #[error("item does not exist in cache")]
    ItemNotExists,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type SpiderResult<T> = Result<T, SpiderError>;

pub type PageResult<T> = SpiderResult<T>;
pub type FileResult<T> = SpiderResult<T>;
pub type CacheResult<T> = SpiderResult<T>;
pub type NodeResult<T> = SpiderResult<T>;
pub type BTreeResult<T> = SpiderResult<T>;
pub type StorageResult<T> = SpiderResult<T>;
