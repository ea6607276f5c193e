//! Fixed-size page layout.
//!
//! Every page is exactly [`PAGE_SIZE`] bytes. Page 0 is reserved by the
//! caller for whatever metadata it wants to keep; pages 1.. hold at most one
//! item each, laid out as a small slotted page: a header, a single item
//! pointer, and the item's bytes growing backward from the end of the page.
//! This mirrors the line-pointer indirection real page-oriented stores use,
//! scaled down to the "one item per page" case the HNSW engine relies on.

use crate::{Error, Result};

/// Page size in bytes. Chosen to match common OS/DB page sizes.
pub const PAGE_SIZE: usize = 8192;

/// A page number. Page 0 is the meta page; data pages start at 1.
pub type PageNumber = u32;

/// Sentinel meaning "no page" (used for neighbor slots and entry points).
pub const INVALID_PAGE: PageNumber = u32::MAX;

const HEADER_SIZE: usize = 8; // item_count: u16, _pad: u16, item_offset: u16, item_len: u16

/// Raw bytes of one page, always exactly [`PAGE_SIZE`] long.
#[derive(Clone)]
pub struct Page {
    bytes: Box<[u8; PAGE_SIZE]>,
}

impl Page {
    /// A freshly zeroed page, as returned by `extend()`.
    pub fn new_empty() -> Self {
        Self {
            bytes: Box::new([0u8; PAGE_SIZE]),
        }
    }

    pub fn from_bytes(bytes: [u8; PAGE_SIZE]) -> Self {
        Self {
            bytes: Box::new(bytes),
        }
    }

    pub fn as_bytes(&self) -> &[u8; PAGE_SIZE] {
        &self.bytes
    }

    /// True if this page has never had an item written to it.
    pub fn is_new(&self) -> bool {
        self.item_count() == 0
    }

    /// Alias kept for readability at call sites that check "no live node here".
    pub fn is_empty(&self) -> bool {
        self.is_new()
    }

    fn item_count(&self) -> u16 {
        u16::from_le_bytes([self.bytes[0], self.bytes[1]])
    }

    fn set_item_count(&mut self, count: u16) {
        self.bytes[0..2].copy_from_slice(&count.to_le_bytes());
    }

    fn slot(&self) -> (u16, u16) {
        let offset = u16::from_le_bytes([self.bytes[4], self.bytes[5]]);
        let len = u16::from_le_bytes([self.bytes[6], self.bytes[7]]);
        (offset, len)
    }

    fn set_slot(&mut self, offset: u16, len: u16) {
        self.bytes[4..6].copy_from_slice(&offset.to_le_bytes());
        self.bytes[6..8].copy_from_slice(&len.to_le_bytes());
    }

    /// The bytes of the single item on this page, if any.
    pub fn first_item(&self) -> Option<&[u8]> {
        if self.is_new() {
            return None;
        }
        let (offset, len) = self.slot();
        Some(&self.bytes[offset as usize..offset as usize + len as usize])
    }

    /// Free bytes available for a new item (accounting for the header and
    /// the item pointer this format always reserves).
    pub fn free_space(&self) -> usize {
        if !self.is_new() {
            return 0;
        }
        PAGE_SIZE.saturating_sub(HEADER_SIZE)
    }

    /// Write the item into this (previously empty) page.
    pub fn add_item(&mut self, data: &[u8]) -> Result<()> {
        if !self.is_new() {
            return Err(Error::Corrupted(
                "attempted to add a second item to a one-item-per-page slot".into(),
            ));
        }
        if data.len() > self.free_space() {
            return Err(Error::NoFreeSpace {
                needed: data.len(),
                available: self.free_space(),
            });
        }
        let offset = PAGE_SIZE - data.len();
        self.bytes[offset..].copy_from_slice(data);
        self.set_item_count(1);
        self.set_slot(offset as u16, data.len() as u16);
        Ok(())
    }

    /// Clear the item, returning the page to its "new" state. Used when a
    /// dead item's storage is reclaimed by the host.
    pub fn clear(&mut self) {
        self.bytes.fill(0);
    }
}

impl Default for Page {
    fn default() -> Self {
        Self::new_empty()
    }
}
