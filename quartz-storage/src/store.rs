//! Page store: the host buffer manager stand-in.
//!
//! Pages live in an in-memory frame table guarded per-page by a
//! [`tokio::sync::RwLock`], backed by a flat data file. Writes go through
//! the write-ahead log before they are considered durable; [`PageStore::checkpoint`]
//! applies dirty frames to the data file and truncates the log. Callers never
//! see file offsets or frame bookkeeping, only page numbers and guards whose
//! `Drop` releases the lock on every exit path, panics included.

use crate::page::{Page, PageNumber, PAGE_SIZE};
use crate::wal::WriteAheadLog;
use crate::{Error, Result};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

struct Frame {
    page: Page,
    dirty: bool,
}

struct Inner {
    data_file: Mutex<File>,
    wal: Mutex<WriteAheadLog>,
    frames: RwLock<HashMap<PageNumber, Arc<RwLock<Frame>>>>,
    num_pages: AtomicU32,
}

/// Page-oriented storage substrate. One `PageStore` owns one on-disk relation.
#[derive(Clone)]
pub struct PageStore {
    inner: Arc<Inner>,
}

/// A shared-lock view of a page. Released when dropped.
pub struct PageReadGuard {
    page_number: PageNumber,
    guard: OwnedRwLockReadGuard<Frame>,
}

impl PageReadGuard {
    pub fn page_number(&self) -> PageNumber {
        self.page_number
    }
}

impl std::ops::Deref for PageReadGuard {
    type Target = Page;
    fn deref(&self) -> &Page {
        &self.guard.page
    }
}

/// An exclusive-lock view of a page. Released when dropped.
pub struct PageWriteGuard {
    page_number: PageNumber,
    guard: OwnedRwLockWriteGuard<Frame>,
}

impl PageWriteGuard {
    pub fn page_number(&self) -> PageNumber {
        self.page_number
    }
}

impl std::ops::Deref for PageWriteGuard {
    type Target = Page;
    fn deref(&self) -> &Page {
        &self.guard.page
    }
}

impl std::ops::DerefMut for PageWriteGuard {
    fn deref_mut(&mut self) -> &mut Page {
        &mut self.guard.page
    }
}

impl PageStore {
    /// Open (creating if needed) the page store rooted at `dir`. Any
    /// write-ahead log records from an unclean shutdown are replayed into the
    /// data file before this returns.
    pub async fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        std::fs::create_dir_all(&dir)?;
        let data_path = dir.as_ref().join("hnsw.data");
        let wal_path = dir.as_ref().join("hnsw.wal");

        let mut data_file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&data_path)?;

        let mut wal = WriteAheadLog::open(&wal_path)?;
        let recovered = wal.replay()?;
        for (page_number, bytes) in &recovered {
            write_page_at(&mut data_file, *page_number, bytes)?;
        }
        if !recovered.is_empty() {
            tracing::info!(count = recovered.len(), "page store: replayed wal records");
        }
        wal.truncate()?;

        let file_len = data_file.metadata()?.len();
        let num_pages = (file_len / PAGE_SIZE as u64) as u32;

        Ok(Self {
            inner: Arc::new(Inner {
                data_file: Mutex::new(data_file),
                wal: Mutex::new(wal),
                frames: RwLock::new(HashMap::new()),
                num_pages: AtomicU32::new(num_pages),
            }),
        })
    }

    /// Number of pages in the relation, including the meta page.
    pub fn relation_size(&self) -> PageNumber {
        self.inner.num_pages.load(Ordering::Acquire)
    }

    async fn frame_for(&self, page_number: PageNumber) -> Result<Arc<RwLock<Frame>>> {
        if page_number >= self.relation_size() {
            return Err(Error::PageOutOfRange {
                page: page_number,
                relation_size: self.relation_size(),
            });
        }
        if let Some(frame) = self.inner.frames.read().await.get(&page_number) {
            return Ok(frame.clone());
        }
        let mut frames = self.inner.frames.write().await;
        if let Some(frame) = frames.get(&page_number) {
            return Ok(frame.clone());
        }
        let page = read_page_at(&self.inner.data_file, page_number)?;
        let frame = Arc::new(RwLock::new(Frame { page, dirty: false }));
        frames.insert(page_number, frame.clone());
        Ok(frame)
    }

    /// Acquire a page under a shared lock. Out-of-range page numbers are an error.
    pub async fn read_shared(&self, page_number: PageNumber) -> Result<PageReadGuard> {
        let frame = self.frame_for(page_number).await?;
        let guard = frame.read_owned().await;
        Ok(PageReadGuard { page_number, guard })
    }

    /// Acquire a page under an exclusive lock.
    pub async fn read_exclusive(&self, page_number: PageNumber) -> Result<PageWriteGuard> {
        let frame = self.frame_for(page_number).await?;
        let guard = frame.write_owned().await;
        Ok(PageWriteGuard { page_number, guard })
    }

    /// Allocate a new page at the end of the relation, returning it already
    /// exclusively locked.
    pub async fn extend(&self) -> Result<PageWriteGuard> {
        let page_number = self.inner.num_pages.fetch_add(1, Ordering::AcqRel);
        let frame = Arc::new(RwLock::new(Frame {
            page: Page::new_empty(),
            dirty: false,
        }));
        self.inner.frames.write().await.insert(page_number, frame.clone());
        let guard = frame.write_owned().await;
        Ok(PageWriteGuard { page_number, guard })
    }

    /// Log the page's current image to the write-ahead log and mark its
    /// frame dirty so [`PageStore::checkpoint`] will apply it.
    pub fn mark_dirty(&self, guard: &mut PageWriteGuard) -> Result<()> {
        self.inner
            .wal
            .lock()
            .unwrap()
            .append_page(guard.page_number, guard.guard.page.as_bytes())?;
        guard.guard.dirty = true;
        Ok(())
    }

    /// Apply every dirty frame to the data file and truncate the write-ahead
    /// log. Safe to call concurrently with readers; exclusive writers on a
    /// given page still serialize through that page's lock.
    pub async fn checkpoint(&self) -> Result<()> {
        let frames = self.inner.frames.read().await;
        for (&page_number, frame) in frames.iter() {
            let mut frame = frame.write().await;
            if frame.dirty {
                write_page_at(&mut self.inner.data_file.lock().unwrap(), page_number, frame.page.as_bytes())?;
                frame.dirty = false;
            }
        }
        self.inner.wal.lock().unwrap().truncate()?;
        Ok(())
    }
}

fn read_page_at(data_file: &Mutex<File>, page_number: PageNumber) -> Result<Page> {
    let mut file = data_file.lock().unwrap();
    let offset = page_number as u64 * PAGE_SIZE as u64;
    let len = file.metadata()?.len();
    if offset + PAGE_SIZE as u64 > len {
        // Allocated via extend() but never flushed yet in this process.
        return Ok(Page::new_empty());
    }
    let mut bytes = [0u8; PAGE_SIZE];
    file.seek(SeekFrom::Start(offset))?;
    file.read_exact(&mut bytes)?;
    Ok(Page::from_bytes(bytes))
}

fn write_page_at(file: &mut File, page_number: PageNumber, bytes: &[u8; PAGE_SIZE]) -> Result<()> {
    let offset = page_number as u64 * PAGE_SIZE as u64;
    file.seek(SeekFrom::Start(offset))?;
    file.write_all(bytes)?;
    file.flush()?;
    Ok(())
}

/// Helper only used by callers that need a stable path for diagnostics.
pub fn data_file_path(dir: &Path) -> PathBuf {
    dir.join("hnsw.data")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn extend_then_read_round_trips() {
        let dir = TempDir::new().unwrap();
        let store = PageStore::open(dir.path()).await.unwrap();

        let mut guard = store.extend().await.unwrap();
        assert_eq!(guard.page_number(), 0);
        guard.add_item(b"hello").unwrap();
        store.mark_dirty(&mut guard).unwrap();
        drop(guard);

        let read = store.read_shared(0).await.unwrap();
        assert_eq!(read.first_item(), Some(&b"hello"[..]));
    }

    #[tokio::test]
    async fn out_of_range_page_is_an_error() {
        let dir = TempDir::new().unwrap();
        let store = PageStore::open(dir.path()).await.unwrap();
        assert!(store.read_shared(0).await.is_err());
    }

    #[tokio::test]
    async fn checkpoint_survives_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = PageStore::open(dir.path()).await.unwrap();
            let mut guard = store.extend().await.unwrap();
            guard.add_item(b"persisted").unwrap();
            store.mark_dirty(&mut guard).unwrap();
            drop(guard);
            store.checkpoint().await.unwrap();
        }
        let store = PageStore::open(dir.path()).await.unwrap();
        assert_eq!(store.relation_size(), 1);
        let read = store.read_shared(0).await.unwrap();
        assert_eq!(read.first_item(), Some(&b"persisted"[..]));
    }

    #[tokio::test]
    async fn crash_before_checkpoint_recovers_from_wal() {
        let dir = TempDir::new().unwrap();
        {
            let store = PageStore::open(dir.path()).await.unwrap();
            let mut guard = store.extend().await.unwrap();
            guard.add_item(b"logged-not-checkpointed").unwrap();
            store.mark_dirty(&mut guard).unwrap();
            // No checkpoint: simulate a crash right after the WAL fsync.
        }
        let store = PageStore::open(dir.path()).await.unwrap();
        assert_eq!(store.relation_size(), 1);
        let read = store.read_shared(0).await.unwrap();
        assert_eq!(read.first_item(), Some(&b"logged-not-checkpointed"[..]));
    }
}
