//! Binary layout for the meta page and graph nodes.
//!
//! Every multiplication and addition in the node-size computation is
//! checked; overflow is a hard error rather than a silently truncated
//! size. Decoding never panics on untrusted bytes — level/neighbor-count
//! validation clamps or skips instead of raising.

use crate::types::HeapTid;
use crate::{Error, Result};

pub const MAGIC: u32 = 0x4853_4E57;
pub const FORMAT_VERSION: u32 = 1;
pub const MAX_LEVEL: i32 = 16;
pub const NEIGHBOR_SENTINEL: u32 = 0xFFFF_FFFF;

pub const META_PAGE_SIZE: usize = 40;
const NODE_HEADER_SIZE: usize = 6 + 4 + 2 + 2 * MAX_LEVEL as usize; // 44

/// Decoded contents of the index's page-0 meta record.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MetaPage {
    pub entry_point: Option<u32>,
    pub entry_level: i32,
    pub max_level: i32,
    pub m: i16,
    pub ef_construction: i16,
    pub ef_search: i16,
    pub ml: f32,
    pub inserted_count: i64,
}

impl MetaPage {
    pub fn new(m: i16, ef_construction: i16, ef_search: i16, ml: f32) -> Self {
        Self {
            entry_point: None,
            entry_level: -1,
            max_level: 0,
            m,
            ef_construction,
            ef_search,
            ml,
            inserted_count: 0,
        }
    }

    pub fn encode(&self) -> [u8; META_PAGE_SIZE] {
        let mut out = [0u8; META_PAGE_SIZE];
        out[0..4].copy_from_slice(&MAGIC.to_le_bytes());
        out[4..8].copy_from_slice(&FORMAT_VERSION.to_le_bytes());
        out[8..12].copy_from_slice(&self.entry_point.unwrap_or(u32::MAX).to_le_bytes());
        out[12..16].copy_from_slice(&self.entry_level.to_le_bytes());
        out[16..20].copy_from_slice(&self.max_level.to_le_bytes());
        out[20..22].copy_from_slice(&self.m.to_le_bytes());
        out[22..24].copy_from_slice(&self.ef_construction.to_le_bytes());
        out[24..26].copy_from_slice(&self.ef_search.to_le_bytes());
        // offset 26..28 reserved, left zeroed.
        out[28..32].copy_from_slice(&self.ml.to_le_bytes());
        out[32..40].copy_from_slice(&self.inserted_count.to_le_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < META_PAGE_SIZE {
            return Err(Error::Corrupted("hnsw: meta page truncated".into()));
        }
        let magic = u32::from_le_bytes(bytes[0..4].try_into().unwrap());
        if magic != MAGIC {
            return Err(Error::Corrupted(format!(
                "hnsw: meta page magic mismatch (got {magic:#010x})"
            )));
        }
        let version = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
        if version != FORMAT_VERSION {
            return Err(Error::Corrupted(format!(
                "hnsw: unsupported meta page version {version}"
            )));
        }
        let entry_point_raw = u32::from_le_bytes(bytes[8..12].try_into().unwrap());
        let entry_level = i32::from_le_bytes(bytes[12..16].try_into().unwrap());
        Ok(Self {
            entry_point: if entry_point_raw == u32::MAX {
                None
            } else {
                Some(entry_point_raw)
            },
            entry_level,
            max_level: i32::from_le_bytes(bytes[16..20].try_into().unwrap()),
            m: i16::from_le_bytes(bytes[20..22].try_into().unwrap()),
            ef_construction: i16::from_le_bytes(bytes[22..24].try_into().unwrap()),
            ef_search: i16::from_le_bytes(bytes[24..26].try_into().unwrap()),
            ml: f32::from_le_bytes(bytes[28..32].try_into().unwrap()),
            inserted_count: i64::from_le_bytes(bytes[32..40].try_into().unwrap()),
        })
    }
}

/// A decoded graph node: header fields plus its vector payload and
/// per-layer neighbor table, flattened as `(level+1) * 2m` page numbers.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeRecord {
    pub heap_tid: HeapTid,
    pub level: i32,
    pub dim: i16,
    pub neighbor_count: [i16; MAX_LEVEL as usize],
    pub vector: Vec<f32>,
    pub neighbors: Vec<u32>,
    m: i16,
}

/// Computes the on-disk byte size of a node with the given `(dim, level,
/// m)`, checking every multiplication and addition for overflow.
pub fn compute_node_size(dim: i16, level: i32, m: i16) -> Result<usize> {
    if dim < 0 || level < 0 || m < 0 {
        return Err(Error::SizeOverflow("negative dim/level/m".into()));
    }
    let dim = dim as usize;
    let level = level as usize;
    let m = m as usize;

    let vector_bytes = dim
        .checked_mul(4)
        .ok_or_else(|| Error::SizeOverflow("vector payload size".into()))?;

    let level_plus_one = level
        .checked_add(1)
        .ok_or_else(|| Error::SizeOverflow("level + 1".into()))?;
    let neighbors_per_layer = level_plus_one
        .checked_mul(2)
        .and_then(|x| x.checked_mul(m))
        .ok_or_else(|| Error::SizeOverflow("neighbor table width".into()))?;
    let neighbor_bytes = neighbors_per_layer
        .checked_mul(4)
        .ok_or_else(|| Error::SizeOverflow("neighbor table size".into()))?;

    NODE_HEADER_SIZE
        .checked_add(vector_bytes)
        .and_then(|x| x.checked_add(neighbor_bytes))
        .ok_or_else(|| Error::SizeOverflow("total node size".into()))
}

impl NodeRecord {
    pub fn new(heap_tid: HeapTid, level: i32, vector: Vec<f32>, m: i16) -> Result<Self> {
        if !validate_level(level) {
            return Err(Error::Corrupted(format!("hnsw: invalid node level {level}")));
        }
        let dim: i16 = vector
            .len()
            .try_into()
            .map_err(|_| Error::DimensionMismatch {
                expected: i16::MAX as usize,
                actual: vector.len(),
            })?;
        let width = (level as usize + 1) * 2 * m as usize;
        Ok(Self {
            heap_tid,
            level,
            dim,
            neighbor_count: [0; MAX_LEVEL as usize],
            vector,
            neighbors: vec![NEIGHBOR_SENTINEL; width],
            m,
        })
    }

    /// Neighbor slots for one layer, up to `2m` wide. A `layer` outside
    /// `0..=self.level` has no backing slots — returns empty rather than
    /// panicking, since a stale or corrupted neighbor pointer can lead a
    /// caller to ask a lower-level node for a layer it never stored.
    pub fn neighbors_for_layer(&self, layer: i32) -> &[u32] {
        if layer < 0 || layer > self.level {
            return &[];
        }
        let m = self.m as usize;
        let start = layer as usize * 2 * m;
        let end = start + 2 * m;
        self.neighbors.get(start..end).unwrap_or(&[])
    }

    pub fn neighbors_for_layer_mut(&mut self, layer: i32) -> &mut [u32] {
        if layer < 0 || layer > self.level {
            return &mut [];
        }
        let m = self.m as usize;
        let start = layer as usize * 2 * m;
        let end = start + 2 * m;
        self.neighbors.get_mut(start..end).unwrap_or(&mut [])
    }

    pub fn vector_slice(&self) -> &[f32] {
        &self.vector
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        let size = compute_node_size(self.dim, self.level, self.m)?;
        let mut out = vec![0u8; size];
        out[0..6].copy_from_slice(&self.heap_tid.to_bytes());
        out[6..10].copy_from_slice(&self.level.to_le_bytes());
        out[10..12].copy_from_slice(&self.dim.to_le_bytes());
        for (i, count) in self.neighbor_count.iter().enumerate() {
            let off = 12 + i * 2;
            out[off..off + 2].copy_from_slice(&count.to_le_bytes());
        }
        let vector_start = NODE_HEADER_SIZE;
        for (i, v) in self.vector.iter().enumerate() {
            let off = vector_start + i * 4;
            out[off..off + 4].copy_from_slice(&v.to_le_bytes());
        }
        let neighbors_start = vector_start + self.vector.len() * 4;
        for (i, n) in self.neighbors.iter().enumerate() {
            let off = neighbors_start + i * 4;
            out[off..off + 4].copy_from_slice(&n.to_le_bytes());
        }
        Ok(out)
    }

    pub fn decode(bytes: &[u8], m: i16) -> Result<Self> {
        if bytes.len() < NODE_HEADER_SIZE {
            return Err(Error::Corrupted("hnsw: node record truncated".into()));
        }
        let heap_tid = HeapTid::from_bytes(bytes[0..6].try_into().unwrap());
        let level = i32::from_le_bytes(bytes[6..10].try_into().unwrap());
        let dim = i16::from_le_bytes(bytes[10..12].try_into().unwrap());

        let mut neighbor_count = [0i16; MAX_LEVEL as usize];
        for (i, count) in neighbor_count.iter_mut().enumerate() {
            let off = 12 + i * 2;
            *count = i16::from_le_bytes(bytes[off..off + 2].try_into().unwrap());
        }

        if !validate_level(level) {
            return Err(Error::Corrupted(format!("hnsw: decoded node has invalid level {level}")));
        }
        let size = compute_node_size(dim, level, m)?;
        if bytes.len() < size {
            return Err(Error::Corrupted("hnsw: node record shorter than its declared size".into()));
        }

        let vector_start = NODE_HEADER_SIZE;
        let dim_usize = dim as usize;
        let mut vector = Vec::with_capacity(dim_usize);
        for i in 0..dim_usize {
            let off = vector_start + i * 4;
            vector.push(f32::from_le_bytes(bytes[off..off + 4].try_into().unwrap()));
        }

        let neighbors_start = vector_start + dim_usize * 4;
        let width = (level as usize + 1) * 2 * m as usize;
        let mut neighbors = Vec::with_capacity(width);
        for i in 0..width {
            let off = neighbors_start + i * 4;
            neighbors.push(u32::from_le_bytes(bytes[off..off + 4].try_into().unwrap()));
        }

        Ok(Self {
            heap_tid,
            level,
            dim,
            neighbor_count,
            vector,
            neighbors,
            m,
        })
    }
}

/// `0 <= level < MAX_LEVEL`.
pub fn validate_level(level: i32) -> bool {
    (0..MAX_LEVEL).contains(&level)
}

/// A neighbor slot is valid if it isn't the sentinel and addresses a page
/// within the current relation.
pub fn validate_block(block: u32, relation_size: u32) -> bool {
    block != NEIGHBOR_SENTINEL && block < relation_size
}

/// Clamp an out-of-range neighbor count into `[0, 2m]`, logging a warning
/// when clamping was necessary.
pub fn clamp_neighbor_count(count: i16, m: i16) -> i16 {
    let max = 2 * m;
    if count < 0 {
        tracing::warn!(count, "hnsw: negative neighbor count clamped to 0");
        0
    } else if count > max {
        tracing::warn!(count, max, "hnsw: neighbor count exceeds 2m, clamping");
        max
    } else {
        count
    }
}
