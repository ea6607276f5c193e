//! Index access-method façade: build, insert, bulk-delete, vacuum-cleanup,
//! cost estimation, option validation, and the scan lifecycle
//! (`begin_scan` / `rescan` / `get_tuple` / `end_scan`).
//!
//! [`IndexContext`] and [`ScanContext`] carry state (PRNG, per-scan query
//! and cursor) explicitly rather than through module-level globals.

use crate::codec::{MetaPage, NodeRecord};
use crate::coercion::{coerce, VectorKey};
use crate::distance::DistanceMetric;
use crate::graph;
use crate::graph::InterruptCheck;
use crate::types::{HeapTid, SearchResult};
use crate::{Error, Result};
use quartz_storage::PageStore;
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::ops::RangeInclusive;

/// Capability flags the access-method layer reports to its host planner.
/// `can_orderbyop`: scans support `ORDER BY <op> query` directly. `can_order`:
/// no native ordering beyond distance (the index has no secondary sort key).
/// `can_unique`: not a unique index. `can_parallel`: independent scans may
/// run concurrently against the same relation. `search_nulls`: null keys are
/// never indexed, so a scan cannot be asked to find them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AmCapabilities {
    pub can_orderbyop: bool,
    pub can_order: bool,
    pub can_unique: bool,
    pub can_parallel: bool,
    pub search_nulls: bool,
}

pub const CAPABILITIES: AmCapabilities = AmCapabilities {
    can_orderbyop: true,
    can_order: false,
    can_unique: false,
    can_parallel: true,
    search_nulls: false,
};

const M_RANGE: RangeInclusive<i32> = 2..=128;
const EF_RANGE: RangeInclusive<i32> = 4..=10_000;

const DEFAULT_M: i16 = 16;
const DEFAULT_EF_CONSTRUCTION: i16 = 200;
const DEFAULT_EF_SEARCH: i16 = 64;
const DEFAULT_ML: f32 = 0.36;

const MAX_EF_SEARCH_OVERRIDE: i32 = 100_000;
const DEFAULT_K: usize = 10;

/// Build-time reloptions. Out-of-range input is always an error; nothing here silently falls
/// back to a default once the caller has supplied a value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndexOptions {
    pub m: i16,
    pub ef_construction: i16,
    pub ef_search: i16,
    pub ml: f32,
}

impl Default for IndexOptions {
    fn default() -> Self {
        Self {
            m: DEFAULT_M,
            ef_construction: DEFAULT_EF_CONSTRUCTION,
            ef_search: DEFAULT_EF_SEARCH,
            ml: DEFAULT_ML,
        }
    }
}

impl IndexOptions {
    pub fn validate(&self) -> Result<()> {
        if !M_RANGE.contains(&(self.m as i32)) {
            return Err(Error::InvalidOption(format!("m must be in 2..=128, got {}", self.m)));
        }
        if !EF_RANGE.contains(&(self.ef_construction as i32)) {
            return Err(Error::InvalidOption(format!(
                "ef_construction must be in 4..=10000, got {}",
                self.ef_construction
            )));
        }
        if !EF_RANGE.contains(&(self.ef_search as i32)) {
            return Err(Error::InvalidOption(format!(
                "ef_search must be in 4..=10000, got {}",
                self.ef_search
            )));
        }
        if (self.ef_construction as i32) < self.m as i32 {
            return Err(Error::InvalidOption("ef_construction must be >= m".into()));
        }
        if (self.ef_search as i32) < self.m as i32 {
            return Err(Error::InvalidOption("ef_search must be >= m".into()));
        }
        Ok(())
    }
}

/// Per-query overrides a session may supply.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionKnobs {
    pub ef_search_override: Option<i16>,
    pub k: usize,
}

impl Default for SessionKnobs {
    fn default() -> Self {
        Self {
            ef_search_override: None,
            k: DEFAULT_K,
        }
    }
}

impl SessionKnobs {
    fn effective_ef_search(&self, meta: &MetaPage) -> usize {
        let raw = self.ef_search_override.unwrap_or(meta.ef_search) as i32;
        raw.clamp(1, MAX_EF_SEARCH_OVERRIDE) as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildStats {
    pub tuples_indexed: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VacuumStats {
    pub tuples_removed: u64,
    pub pages: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostEstimate {
    pub startup_cost: f64,
    pub total_cost: f64,
    pub pages: u32,
    pub correlation: f64,
}

async fn persist_meta(store: &PageStore, meta: &MetaPage) -> Result<()> {
    let mut guard = store.read_exclusive(0).await?;
    guard.clear();
    guard.add_item(&meta.encode())?;
    store.mark_dirty(&mut guard)?;
    Ok(())
}

/// Checks the new vector's dimension against the index's existing
/// dimension, implicitly fixed by the first successfully inserted vector.
/// A corrupt or unreadable entry node is not this function's concern — it
/// only validates when it can read one.
async fn check_dimension(store: &PageStore, meta: &MetaPage, dim: usize) -> Result<()> {
    let Some(entry_page) = meta.entry_point else {
        return Ok(());
    };
    let guard = store.read_shared(entry_page).await?;
    let Some(bytes) = guard.first_item() else {
        return Ok(());
    };
    if let Ok(node) = NodeRecord::decode(bytes, meta.m)
        && node.dim as usize != dim
    {
        return Err(Error::DimensionMismatch {
            expected: node.dim as usize,
            actual: dim,
        });
    }
    Ok(())
}

/// Read-mostly context shared by every façade call against one open index.
/// Carries the insertion PRNG explicitly, rather than as a process-global,
/// so tests and concurrent backends can inject deterministic seeds.
pub struct IndexContext {
    rng: StdRng,
    interrupt: InterruptCheck,
}

impl IndexContext {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            interrupt: graph::no_interrupt(),
        }
    }

    /// Builds a context whose long-running calls poll `interrupt` the way
    /// [`graph::insert`] and [`graph::search`] do, instead of always running
    /// to completion.
    pub fn with_interrupt(seed: u64, interrupt: InterruptCheck) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            interrupt,
        }
    }

    /// Inserts a single tuple within the caller's transaction.
    pub async fn insert(&mut self, store: &PageStore, meta: &mut MetaPage, tid: HeapTid, key: &VectorKey) -> Result<()> {
        let (vector, dim) = coerce(key)?;
        check_dimension(store, meta, dim as usize).await?;
        graph::insert(store, meta, tid, vector, &mut self.rng, &self.interrupt).await?;
        persist_meta(store, meta).await
    }
}

/// Initializes the meta page and indexes every supplied tuple. Returns the
/// populated meta page plus a count of indexed tuples; null values are the
/// caller's responsibility to filter before this is reached.
pub async fn build<I>(store: &PageStore, options: IndexOptions, seed: u64, tuples: I) -> Result<(MetaPage, BuildStats)>
where
    I: IntoIterator<Item = (HeapTid, VectorKey)>,
{
    build_with_interrupt(store, options, seed, tuples, &graph::no_interrupt()).await
}

/// Same as [`build`], polling `interrupt` before each tuple is indexed so a
/// long build over many tuples can be cancelled between insertions.
pub async fn build_with_interrupt<I>(
    store: &PageStore,
    options: IndexOptions,
    seed: u64,
    tuples: I,
    interrupt: &InterruptCheck,
) -> Result<(MetaPage, BuildStats)>
where
    I: IntoIterator<Item = (HeapTid, VectorKey)>,
{
    options.validate()?;
    let mut meta = MetaPage::new(options.m, options.ef_construction, options.ef_search, options.ml);

    let mut guard = store.extend().await?;
    debug_assert_eq!(guard.page_number(), 0, "meta page must be the first page allocated");
    guard.add_item(&meta.encode())?;
    store.mark_dirty(&mut guard)?;
    drop(guard);

    let mut rng = StdRng::seed_from_u64(seed);
    let mut indexed = 0u64;
    for (tid, key) in tuples {
        let (vector, dim) = coerce(&key)?;
        check_dimension(store, &meta, dim as usize).await?;
        graph::insert(store, &mut meta, tid, vector, &mut rng, interrupt).await?;
        indexed += 1;
    }
    persist_meta(store, &meta).await?;

    Ok((meta, BuildStats { tuples_indexed: indexed }))
}

/// Initializes an index with no tuples (e.g. an unlogged relation rebuilt
/// on recovery).
pub async fn build_empty(store: &PageStore, options: IndexOptions) -> Result<MetaPage> {
    options.validate()?;
    let meta = MetaPage::new(options.m, options.ef_construction, options.ef_search, options.ml);
    let mut guard = store.extend().await?;
    guard.add_item(&meta.encode())?;
    store.mark_dirty(&mut guard)?;
    Ok(meta)
}

/// Scans every live node and deletes those the host's `alive` callback
/// rejects.
pub async fn bulk_delete<F>(store: &PageStore, meta: &mut MetaPage, alive: F) -> Result<VacuumStats>
where
    F: FnMut(HeapTid) -> bool,
{
    bulk_delete_with_interrupt(store, meta, alive, &graph::no_interrupt()).await
}

/// Same as [`bulk_delete`], polling `interrupt` before each page is scanned
/// and before each node's neighbors are unlinked.
pub async fn bulk_delete_with_interrupt<F>(
    store: &PageStore,
    meta: &mut MetaPage,
    mut alive: F,
    interrupt: &InterruptCheck,
) -> Result<VacuumStats>
where
    F: FnMut(HeapTid) -> bool,
{
    let relation_size = store.relation_size();
    let mut removed = 0u64;
    for page in 1..relation_size {
        let tid = {
            let guard = store.read_shared(page).await?;
            if guard.is_empty() {
                continue;
            }
            match NodeRecord::decode(guard.first_item().expect("non-empty page has an item"), meta.m) {
                Ok(node) => node.heap_tid,
                Err(err) => {
                    tracing::warn!(page, %err, "hnsw: skipping unreadable node during bulk delete");
                    continue;
                }
            }
        };
        if !alive(tid) && graph::delete(store, meta, tid, interrupt).await? {
            removed += 1;
        }
    }
    persist_meta(store, meta).await?;
    Ok(VacuumStats {
        tuples_removed: removed,
        pages: store.relation_size(),
    })
}

/// Vacuum cleanup: the host's AM contract calls this from a separate hook
/// than `bulk_delete`, but the repair it performs — removing dead tuples
/// and fixing back-links — is the same operation, so it is implemented by
/// delegating to it. No physical repacking: dead pages are cleared, never
/// coalesced or returned to a free list here.
pub async fn vacuum_cleanup<F>(store: &PageStore, meta: &mut MetaPage, alive: F) -> Result<VacuumStats>
where
    F: FnMut(HeapTid) -> bool,
{
    bulk_delete(store, meta, alive).await
}

/// Cost estimate for the planner: constant startup cost, total cost
/// approximating `log(n_tuples) * ef_search * cpu_op_cost`, and zero
/// correlation (the graph has no relationship to heap order).
pub fn cost_estimate(meta: &MetaPage, relation_size: u32, n_tuples: u64, cpu_op_cost: f64) -> CostEstimate {
    let n = (n_tuples as f64).max(1.0);
    CostEstimate {
        startup_cost: 0.0,
        total_cost: n.ln() * meta.ef_search as f64 * cpu_op_cost,
        pages: relation_size,
        correlation: 0.0,
    }
}

/// Per-scan mutable state: the query vector, ordering strategy, and
/// buffered results between `gettuple` calls.
pub struct ScanContext {
    metric: DistanceMetric,
    ef_search: usize,
    k: usize,
    query: Option<Vec<f32>>,
    results: Vec<SearchResult>,
    cursor: usize,
    searched: bool,
    interrupt: InterruptCheck,
}

impl ScanContext {
    /// `begin_scan`: allocates scan state with the meta's default
    /// `ef_search` and no query yet (the query arrives via `rescan`).
    pub fn begin_scan(metric: DistanceMetric, meta: &MetaPage) -> Self {
        Self {
            metric,
            ef_search: meta.ef_search.max(1) as usize,
            k: DEFAULT_K,
            query: None,
            results: Vec::new(),
            cursor: 0,
            searched: false,
            interrupt: graph::no_interrupt(),
        }
    }

    /// Same as `begin_scan`, with a scan that polls `interrupt` before its
    /// search runs, so a query cancelled mid-flight can unwind instead of
    /// completing.
    pub fn begin_scan_with_interrupt(metric: DistanceMetric, meta: &MetaPage, interrupt: InterruptCheck) -> Self {
        Self {
            interrupt,
            ..Self::begin_scan(metric, meta)
        }
    }

    /// `rescan`: extracts the query vector from the first order-by key,
    /// applies the session's `ef_search`/`k` overrides, and clears any
    /// buffered results from a prior scan position.
    pub fn rescan(&mut self, meta: &MetaPage, knobs: &SessionKnobs, order_by_key: &VectorKey) -> Result<()> {
        let (query, _dim) = coerce(order_by_key)?;
        self.query = Some(query);
        self.ef_search = knobs.effective_ef_search(meta);
        self.k = knobs.k.max(1);
        self.results.clear();
        self.cursor = 0;
        self.searched = false;
        Ok(())
    }

    /// `gettuple`: runs the search on the first call, then yields buffered
    /// results one at a time. Returns `None` once exhausted.
    pub async fn get_tuple(&mut self, store: &PageStore, meta: &MetaPage) -> Result<Option<SearchResult>> {
        if !self.searched {
            if let Some(query) = self.query.clone() {
                self.results =
                    graph::search(store, meta, &query, self.metric, self.ef_search, self.k, &self.interrupt).await?;
            }
            self.searched = true;
        }
        let next = self.results.get(self.cursor).copied();
        if next.is_some() {
            self.cursor += 1;
        }
        Ok(next)
    }

    /// `end_scan`: frees the buffered results. Nothing else to release —
    /// every page lock taken during the search was already scoped and
    /// dropped by the time `get_tuple` returned.
    pub fn end_scan(self) {}
}
