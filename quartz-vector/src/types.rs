//! Shared scalar types: row identifiers and search results.

use serde::{Deserialize, Serialize};

/// Opaque row identifier the host uses to locate the underlying tuple.
///
/// Modeled after a line-pointer style `(block, offset)` pair — the engine
/// never interprets these fields, only stores and returns them verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HeapTid {
    pub block: u32,
    pub offset: u16,
}

impl HeapTid {
    pub fn new(block: u32, offset: u16) -> Self {
        Self { block, offset }
    }

    pub(crate) fn to_bytes(self) -> [u8; 6] {
        let mut out = [0u8; 6];
        out[0..4].copy_from_slice(&self.block.to_le_bytes());
        out[4..6].copy_from_slice(&self.offset.to_le_bytes());
        out
    }

    pub(crate) fn from_bytes(bytes: [u8; 6]) -> Self {
        Self {
            block: u32::from_le_bytes(bytes[0..4].try_into().unwrap()),
            offset: u16::from_le_bytes(bytes[4..6].try_into().unwrap()),
        }
    }
}

impl std::fmt::Display for HeapTid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({},{})", self.block, self.offset)
    }
}

/// One result row from a search: the tuple identifier and its distance
/// under the scan's active strategy (always ascending — lower is better).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchResult {
    pub tid: HeapTid,
    pub distance: f32,
}

impl SearchResult {
    pub fn new(tid: HeapTid, distance: f32) -> Self {
        Self { tid, distance }
    }
}
