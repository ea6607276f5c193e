//! Page-oriented storage substrate for the HNSW vector index.
//!
//! This crate plays the part of a host database's buffer manager: fixed-size
//! pages, shared/exclusive locking per page, and a write-ahead log for
//! crash safety. It knows nothing about what a page's bytes mean — that is
//! the vector index engine's job (see `quartz-vector`).

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("page {page} is out of range (relation has {relation_size} pages)")]
    PageOutOfRange { page: u32, relation_size: u32 },

    #[error("page has no free space: needed {needed} bytes, {available} available")]
    NoFreeSpace { needed: usize, available: usize },

    #[error("data corrupted: {0}")]
    Corrupted(String),
}

pub type Result<T> = std::result::Result<T, Error>;

mod page;
mod store;
mod wal;

pub use page::{Page, PageNumber, INVALID_PAGE, PAGE_SIZE};
pub use store::{PageReadGuard, PageStore, PageWriteGuard};
pub use wal::WriteAheadLog;
