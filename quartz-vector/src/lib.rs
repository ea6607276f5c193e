//! HNSW vector index engine for QuartzDB.
//!
//! A disk-backed, crash-safe approximate-nearest-neighbor index over dense
//! float vectors, built on top of `quartz-storage`'s page store. It exposes
//! the operations a SQL engine needs — build, insert, delete, bulk-delete,
//! search, cost estimation — through [`facade`], an index access-method
//! style surface. `quartz-storage` supplies page locking and crash
//! recovery (L1); this crate supplies the binary layout (L2), key
//! coercion (L3), graph algorithm (L4), and façade (L5).

mod codec;
mod coercion;
mod distance;
pub mod facade;
pub mod graph;
mod types;

pub use codec::{MetaPage, NodeRecord};
pub use coercion::{SparseEntry, VectorKey};
pub use distance::DistanceMetric;
pub use facade::{
    AmCapabilities, BuildStats, CostEstimate, IndexContext, IndexOptions, ScanContext, SessionKnobs, VacuumStats,
    CAPABILITIES,
};
pub use types::{HeapTid, SearchResult};

/// Errors produced by the HNSW engine. "Corruption (soft)" has no variant
/// here — by policy it logs a warning and the caller continues rather
/// than observing an `Err`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Validation: an option, dimension, or key shape the host gave us is
    /// invalid. Raised before any lock is taken.
    #[error("hnsw: invalid option: {0}")]
    InvalidOption(String),

    #[error("hnsw: dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    #[error("hnsw: unsupported key value: {0}")]
    UnsupportedKeyType(String),

    /// Corruption (hard): meta magic mismatch, or an impossible overflow
    /// in a size calculation. All guards are released before this is raised.
    #[error("hnsw: data corrupted: {0}")]
    Corrupted(String),

    /// Resource: no free space for a node, or a size computation would
    /// overflow. No index state is mutated when this is raised.
    #[error("hnsw: storage error: {0}")]
    Storage(#[from] quartz_storage::Error),

    #[error("hnsw: size computation overflow: {0}")]
    SizeOverflow(String),

    /// Cancellation: the host signalled an interrupt; all held guards
    /// have been unwound.
    #[error("hnsw: operation cancelled")]
    Cancelled,
}

pub type Result<T> = std::result::Result<T, Error>;
