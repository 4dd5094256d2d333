//! Disk-resident staging of raw nodes during bulk ingestion.
//!
//! Nodes are sharded by a coarse lat/lon grid. Each cell owns one
//! append-only file in every sub-store directory, and record *n* of each
//! file describes the same node:
//!
//! ```text
//! <dir>/ids/cell_n47_e8.bin      <dir>/tags/cell_n47_e8.bin
//! <dir>/meta/cell_n47_e8.bin     <dir>/spatial/cell_n47_e8.bin
//! ```
//!
//! Only a bounded number of cells keep open writers; the least recently
//! written one is flushed and closed when another cell needs a handle, and
//! reopened in append mode later. Delta state for the meta encoding lives in
//! the store, not in the handle, so eviction does not change the bytes.

mod cell;
mod record;

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, ErrorKind, Write};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use lru::LruCache;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::primitives::bytes::buf::Cursor;
use crate::storage::archive::{Descriptor, GraphArchive, Metadata};
use crate::storage::column::Value;
use crate::storage::graph::Graph;
use crate::storage::schema::vertex;
use crate::types::{ElementId, ElementKind, Result, RoadError};

pub use cell::{cell_units, CellKey};
pub use record::{RawNode, RevisionMeta};

use record::{MetaState, ID_WIDTH, SPATIAL_WIDTH};

/// Staging configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StagingOptions {
    /// Edge length of a grid cell in degrees.
    pub cell_degrees: f64,
    /// Cells allowed to keep open writers at once.
    pub max_open_cells: usize,
    /// Buffer size of each open sub-store file.
    pub write_buffer_bytes: usize,
}

impl Default for StagingOptions {
    fn default() -> Self {
        Self {
            cell_degrees: 1.0,
            max_open_cells: 64,
            write_buffer_bytes: 64 * 1024,
        }
    }
}

impl StagingOptions {
    /// Sets the cell size.
    pub fn cell_degrees(mut self, degrees: f64) -> Self {
        self.cell_degrees = degrees;
        self
    }

    /// Sets the open-writer bound.
    pub fn max_open_cells(mut self, cells: usize) -> Self {
        self.max_open_cells = cells;
        self
    }

    /// Sets the per-file write buffer.
    pub fn write_buffer_bytes(mut self, bytes: usize) -> Self {
        self.write_buffer_bytes = bytes;
        self
    }

    /// Checks the values are usable.
    pub fn validate(&self) -> Result<()> {
        cell_units(self.cell_degrees)?;
        if self.max_open_cells == 0 {
            return Err(RoadError::Invalid("max_open_cells must be at least 1"));
        }
        Ok(())
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum SubStore {
    Ids,
    Tags,
    Meta,
    Spatial,
}

impl SubStore {
    const ALL: [SubStore; 4] = [SubStore::Ids, SubStore::Tags, SubStore::Meta, SubStore::Spatial];

    fn dir_name(self) -> &'static str {
        match self {
            SubStore::Ids => "ids",
            SubStore::Tags => "tags",
            SubStore::Meta => "meta",
            SubStore::Spatial => "spatial",
        }
    }

    fn path(self, root: &Path, key: CellKey) -> PathBuf {
        root.join(self.dir_name()).join(key.file_name())
    }
}

struct CellWriter {
    ids: BufWriter<File>,
    tags: BufWriter<File>,
    meta: BufWriter<File>,
    spatial: BufWriter<File>,
}

impl CellWriter {
    fn open(root: &Path, key: CellKey, buffer: usize) -> Result<Self> {
        let open = |sub: SubStore| -> Result<BufWriter<File>> {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(sub.path(root, key))?;
            Ok(BufWriter::with_capacity(buffer, file))
        };
        Ok(Self {
            ids: open(SubStore::Ids)?,
            tags: open(SubStore::Tags)?,
            meta: open(SubStore::Meta)?,
            spatial: open(SubStore::Spatial)?,
        })
    }

    fn flush(&mut self) -> Result<()> {
        self.ids.flush()?;
        self.tags.flush()?;
        self.meta.flush()?;
        self.spatial.flush()?;
        Ok(())
    }
}

#[derive(Default)]
struct CellState {
    records: u64,
    meta: MetaState,
    // Set when a write may have reached some sub-stores but not others.
    failed: bool,
}

/// One ingestion run's staging directory.
pub struct StagingStore {
    dir: PathBuf,
    opts: StagingOptions,
    cell_e7: i64,
    cells: FxHashMap<CellKey, CellState>,
    writers: LruCache<CellKey, CellWriter>,
    scratch: [Vec<u8>; 4],
}

impl StagingStore {
    /// Creates a fresh staging directory.
    ///
    /// An existing directory is accepted only if it holds no cell files.
    pub fn create(dir: impl AsRef<Path>, opts: StagingOptions) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        for sub in SubStore::ALL {
            let path = dir.join(sub.dir_name());
            fs::create_dir_all(&path)?;
            if fs::read_dir(&path)?.next().is_some() {
                return Err(RoadError::invalid_state(format!(
                    "staging directory {} already holds data",
                    dir.display()
                )));
            }
        }
        info!(dir = %dir.display(), cell_degrees = opts.cell_degrees, "staging.created");
        Self::with_cells(dir, opts, FxHashMap::default())
    }

    /// Reopens an existing staging directory to continue appending.
    pub fn open(dir: impl AsRef<Path>, opts: StagingOptions) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let mut store = Self::with_cells(dir, opts, FxHashMap::default())?;
        let mut keys = Vec::new();
        for entry in fs::read_dir(store.dir.join(SubStore::Ids.dir_name()))? {
            let entry = entry?;
            if let Some(key) = entry.file_name().to_str().and_then(CellKey::parse_file_name) {
                keys.push(key);
            }
        }
        for key in keys {
            let mut state = CellState::default();
            let nodes = store.decode_cell(key, &mut state.meta)?;
            state.records = nodes.len() as u64;
            store.cells.insert(key, state);
        }
        info!(dir = %store.dir.display(), cells = store.cells.len(), "staging.opened");
        Ok(store)
    }

    fn with_cells(
        dir: PathBuf,
        opts: StagingOptions,
        cells: FxHashMap<CellKey, CellState>,
    ) -> Result<Self> {
        opts.validate()?;
        let cell_e7 = cell_units(opts.cell_degrees)?;
        let capacity = NonZeroUsize::new(opts.max_open_cells)
            .ok_or(RoadError::Invalid("max_open_cells must be at least 1"))?;
        Ok(Self {
            dir,
            opts,
            cell_e7,
            cells,
            writers: LruCache::new(capacity),
            scratch: Default::default(),
        })
    }

    /// Root directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Configuration in effect.
    pub fn options(&self) -> &StagingOptions {
        &self.opts
    }

    /// Cell a location belongs to.
    pub fn cell_of(&self, node: &RawNode) -> CellKey {
        CellKey::of(node.location, self.cell_e7)
    }

    /// Appends a node to its cell.
    ///
    /// The cell's delta state only advances once all four sub-store writes
    /// succeeded. A write that fails part way leaves the cell refusing further
    /// appends, since its files may no longer be in lock-step.
    pub fn add(&mut self, node: &RawNode) -> Result<CellKey> {
        if node.location.is_null() {
            return Err(RoadError::Invalid("staged node needs a location"));
        }
        let key = self.cell_of(node);
        if self.cells.get(&key).map_or(false, |c| c.failed) {
            return Err(RoadError::invalid_state(format!(
                "staging cell {key} was damaged by an earlier failed write"
            )));
        }
        let mut scratch = std::mem::take(&mut self.scratch);
        let outcome = self.append_record(key, node, &mut scratch);
        self.scratch = scratch;
        outcome.map(|()| key)
    }

    fn append_record(&mut self, key: CellKey, node: &RawNode, scratch: &mut [Vec<u8>; 4]) -> Result<()> {
        let [ids, tags, meta, spatial] = scratch;
        for buf in [&mut *ids, &mut *tags, &mut *meta, &mut *spatial] {
            buf.clear();
        }
        record::encode_id(node.id, ids);
        record::encode_tags(&node.tags, tags);
        record::encode_location(node.location, spatial);
        let mut meta_state = self.cells.get(&key).map(|c| c.meta.clone()).unwrap_or_default();
        meta_state.encode(node.meta.as_ref(), meta);

        let writer = self.writer(key)?;
        let written = writer
            .ids
            .write_all(ids)
            .and_then(|()| writer.tags.write_all(tags))
            .and_then(|()| writer.meta.write_all(meta))
            .and_then(|()| writer.spatial.write_all(spatial));
        let state = self.cells.entry(key).or_default();
        match written {
            Ok(()) => {
                state.meta = meta_state;
                state.records += 1;
                Ok(())
            }
            Err(err) => {
                state.failed = true;
                warn!(cell = %key, error = %err, "staging.cell.write_failed");
                Err(err.into())
            }
        }
    }

    fn writer(&mut self, key: CellKey) -> Result<&mut CellWriter> {
        if !self.writers.contains(&key) {
            let writer = CellWriter::open(&self.dir, key, self.opts.write_buffer_bytes)?;
            debug!(cell = %key, "staging.cell.opened");
            if let Some((evicted, mut old)) = self.writers.push(key, writer) {
                if let Err(err) = old.flush() {
                    self.cells.entry(evicted).or_default().failed = true;
                    warn!(cell = %evicted, error = %err, "staging.cell.write_failed");
                    return Err(err);
                }
                debug!(cell = %evicted, "staging.cell.evicted");
            }
        }
        self.writers
            .get_mut(&key)
            .ok_or_else(|| RoadError::invalid_state("staging writer missing after open"))
    }

    /// Flushes every open writer.
    pub fn flush(&mut self) -> Result<()> {
        for (_, writer) in self.writers.iter_mut() {
            writer.flush()?;
        }
        debug!(open = self.writers.len(), "staging.flushed");
        Ok(())
    }

    /// Returns true once any node was staged.
    pub fn contains_data(&self) -> bool {
        self.cells.values().any(|c| c.records > 0)
    }

    /// Number of staged nodes.
    pub fn record_count(&self) -> u64 {
        self.cells.values().map(|c| c.records).sum()
    }

    /// Cells holding data, sorted.
    pub fn cells(&self) -> Vec<CellKey> {
        let mut keys: Vec<_> = self
            .cells
            .iter()
            .filter(|(_, c)| c.records > 0)
            .map(|(k, _)| *k)
            .collect();
        keys.sort_unstable();
        keys
    }

    /// Reads every node of one cell in insertion order.
    pub fn read_cell(&mut self, key: CellKey) -> Result<Vec<RawNode>> {
        if let Some(writer) = self.writers.peek_mut(&key) {
            writer.flush()?;
        }
        self.decode_cell(key, &mut MetaState::default())
    }

    fn decode_cell(&self, key: CellKey, meta_state: &mut MetaState) -> Result<Vec<RawNode>> {
        let read = |sub: SubStore| -> Result<Vec<u8>> {
            match fs::read(sub.path(&self.dir, key)) {
                Ok(bytes) => Ok(bytes),
                Err(err) if err.kind() == ErrorKind::NotFound => Ok(Vec::new()),
                Err(err) => Err(err.into()),
            }
        };
        let ids = read(SubStore::Ids)?;
        let spatial = read(SubStore::Spatial)?;
        let tags = read(SubStore::Tags)?;
        let meta = read(SubStore::Meta)?;
        if ids.len() % ID_WIDTH != 0 {
            return Err(RoadError::corruption(format!("cell {key}: torn id entry")));
        }
        let count = ids.len() / ID_WIDTH;
        if spatial.len() != count * SPATIAL_WIDTH {
            return Err(RoadError::corruption(format!(
                "cell {key}: {count} ids but {} spatial bytes",
                spatial.len()
            )));
        }
        let mut ids = Cursor::new(&ids);
        let mut spatial = Cursor::new(&spatial);
        let mut tags = Cursor::new(&tags);
        let mut meta = Cursor::new(&meta);
        let mut nodes = Vec::with_capacity(count);
        for _ in 0..count {
            nodes.push(RawNode {
                id: ElementId(ids.u64()?),
                location: record::decode_location(&mut spatial)?,
                tags: record::decode_tags(&mut tags)?,
                meta: meta_state.decode(&mut meta)?,
            });
        }
        if !tags.is_exhausted() || !meta.is_exhausted() {
            return Err(RoadError::corruption(format!(
                "cell {key}: sub-stores hold more records than the id store"
            )));
        }
        Ok(nodes)
    }

    /// Appends every staged node to `graph` as a vertex, cell by cell in
    /// sorted order. Returns the number of vertices added.
    pub fn merge_into(&mut self, graph: &mut Graph) -> Result<usize> {
        if let Some(key) = self.cells.iter().find(|(_, c)| c.failed).map(|(k, _)| *k) {
            return Err(RoadError::invalid_state(format!(
                "staging cell {key} was damaged by an earlier failed write"
            )));
        }
        self.flush()?;
        let mut added = 0;
        for key in self.cells() {
            let nodes = self.read_cell(key)?;
            for node in nodes {
                let index = graph.add_vertex(node.id, node.location)?;
                if !node.tags.is_empty() {
                    graph.set_attribute(ElementKind::Vertex, index, vertex::TAGS, Value::Tags(node.tags))?;
                }
                if let Some(meta) = node.meta {
                    graph.set_attribute(ElementKind::Vertex, index, vertex::CHANGESET, Value::Long(meta.changeset))?;
                    graph.set_attribute(ElementKind::Vertex, index, vertex::REVISION, Value::Int(meta.revision))?;
                    graph.set_attribute(ElementKind::Vertex, index, vertex::TIMESTAMP, Value::Long(meta.timestamp))?;
                    graph.set_attribute(ElementKind::Vertex, index, vertex::USER, Value::Long(meta.user_id))?;
                }
                added += 1;
            }
            debug!(cell = %key, vertices = added, "staging.cell.merged");
        }
        info!(vertices = added, cells = self.cells.len(), "staging.merged");
        Ok(added)
    }

    /// Merges the staged nodes into a new graph and saves it to `archive`.
    pub fn save_to(&mut self, archive: &mut GraphArchive, descriptor: Descriptor) -> Result<Metadata> {
        let mut graph = Graph::new(descriptor);
        self.merge_into(&mut graph)?;
        archive.save(&mut graph)
    }

    /// Closes every writer and removes the staging directory.
    pub fn delete(mut self) -> Result<()> {
        self.flush()?;
        self.writers.clear();
        fs::remove_dir_all(&self.dir)?;
        info!(dir = %self.dir.display(), "staging.deleted");
        Ok(())
    }
}

impl std::fmt::Debug for StagingStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StagingStore")
            .field("dir", &self.dir)
            .field("cells", &self.cells.len())
            .field("open", &self.writers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Point;
    use tempfile::tempdir;

    #[test]
    fn create_refuses_populated_directory() {
        let dir = tempdir().unwrap();
        let mut store = StagingStore::create(dir.path(), StagingOptions::default()).unwrap();
        store.add(&RawNode::new(1, Point::from_degrees(1.5, 1.5))).unwrap();
        store.flush().unwrap();
        drop(store);
        assert!(matches!(
            StagingStore::create(dir.path(), StagingOptions::default()),
            Err(RoadError::InvalidState(_))
        ));
    }

    #[test]
    fn nodes_without_location_are_rejected() {
        let dir = tempdir().unwrap();
        let mut store = StagingStore::create(dir.path(), StagingOptions::default()).unwrap();
        assert!(store.add(&RawNode::new(1, Point::NULL)).is_err());
        assert!(!store.contains_data());
    }

    #[test]
    fn failed_open_leaves_delta_state_untouched() {
        let dir = tempdir().unwrap();
        let mut store = StagingStore::create(dir.path(), StagingOptions::default()).unwrap();
        let meta = |changeset| RevisionMeta {
            changeset,
            revision: 1,
            timestamp: 1_700_000_000,
            user_id: 3,
            user_name: "carol".into(),
        };
        let at = Point::from_degrees(12.5, 12.5);
        let meta_dir = dir.path().join("meta");
        fs::remove_dir(&meta_dir).unwrap();
        assert!(store.add(&RawNode::new(1, at).with_meta(meta(10))).is_err());
        assert_eq!(store.record_count(), 0);

        fs::create_dir(&meta_dir).unwrap();
        let second = RawNode::new(2, at).with_meta(meta(11));
        let key = store.add(&second).unwrap();
        assert_eq!(store.read_cell(key).unwrap(), vec![second]);
    }

    #[test]
    fn cell_with_partial_write_refuses_appends() {
        let dir = tempdir().unwrap();
        let mut store = StagingStore::create(dir.path(), StagingOptions::default()).unwrap();
        let key = CellKey::new(1, 1);
        store.cells.entry(key).or_default().failed = true;
        let err = store.add(&RawNode::new(1, Point::from_degrees(1.5, 1.5))).unwrap_err();
        assert!(matches!(err, RoadError::InvalidState(_)));
        let mut graph = Graph::new(Descriptor::default());
        assert!(matches!(store.merge_into(&mut graph), Err(RoadError::InvalidState(_))));
    }

    #[test]
    fn invalid_options_are_rejected() {
        let dir = tempdir().unwrap();
        let zero_cells = StagingOptions::default().max_open_cells(0);
        assert!(StagingStore::create(dir.path(), zero_cells).is_err());
        let bad_size = StagingOptions::default().cell_degrees(-1.0);
        assert!(StagingStore::create(dir.path(), bad_size).is_err());
    }
}
