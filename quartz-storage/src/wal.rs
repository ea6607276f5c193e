//! Write-ahead log for page images.
//!
//! Before a dirty page is applied to the data file, its full image is
//! appended here with a checksum. On reopen the log is replayed to recover
//! any writes that never made it to the data file, then truncated. This is
//! deliberately a physiological, full-page WAL (no delta records) since
//! pages are small and fixed-size.

use crate::page::PAGE_SIZE;
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

pub struct WriteAheadLog {
    file: File,
    path: PathBuf,
}

impl WriteAheadLog {
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;
        Ok(Self {
            file,
            path: path.as_ref().to_path_buf(),
        })
    }

    /// Append a full-page image record and fsync before returning, so the
    /// record is durable before the in-memory frame is considered clean.
    pub fn append_page(&mut self, page_number: u32, data: &[u8; PAGE_SIZE]) -> io::Result<()> {
        let crc = crc32fast::hash(data);
        let mut record = Vec::with_capacity(4 + 4 + PAGE_SIZE);
        record.extend_from_slice(&page_number.to_le_bytes());
        record.extend_from_slice(&crc.to_le_bytes());
        record.extend_from_slice(data);
        self.file.write_all(&record)?;
        self.file.sync_data()?;
        Ok(())
    }

    /// Replay every valid record in the log, in append order. Records with a
    /// bad checksum (a torn write from a crash mid-append) are skipped.
    pub fn replay(&mut self) -> io::Result<Vec<(u32, [u8; PAGE_SIZE])>> {
        self.file.seek(SeekFrom::Start(0))?;
        let mut reader = BufReader::new(&self.file);
        let mut out = Vec::new();
        let mut header = [0u8; 8];
        loop {
            match reader.read_exact(&mut header) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e),
            }
            let page_number = u32::from_le_bytes(header[0..4].try_into().unwrap());
            let crc = u32::from_le_bytes(header[4..8].try_into().unwrap());
            let mut data = [0u8; PAGE_SIZE];
            match reader.read_exact(&mut data) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                Err(e) => return Err(e),
            }
            if crc32fast::hash(&data) != crc {
                tracing::warn!(page_number, "wal: checksum mismatch, discarding torn record");
                continue;
            }
            out.push((page_number, data));
        }
        Ok(out)
    }

    /// Drop all records once their pages are durably applied to the data file.
    pub fn truncate(&mut self) -> io::Result<()> {
        self.file.set_len(0)?;
        self.file.seek(SeekFrom::Start(0))?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
