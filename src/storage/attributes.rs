//! Named attribute streams with lazy, per-stream load and unload.
//!
//! Each stream is either resident (an `Arc<Column>` shared with readers) or
//! unloaded. An unloaded stream that has a persisted copy in the attached
//! archive is read back on first access; one that never had data reads as an
//! empty column. Streams modified since the last save are pinned in memory
//! until they are written out.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, trace};

use crate::storage::archive::{ArchiveSource, ArchiveWriter};
use crate::storage::column::{Column, ColumnKind};
use crate::storage::schema;
use crate::types::{ElementKind, Result, RoadError};

struct Stream {
    kind: ColumnKind,
    slot: RwLock<Option<Arc<Column>>>,
    persisted: bool,
    dirty: bool,
}

impl Stream {
    fn new(kind: ColumnKind) -> Self {
        Self {
            kind,
            slot: RwLock::new(None),
            persisted: false,
            dirty: false,
        }
    }
}

/// The attribute streams of one element kind.
pub struct AttributeStreamStore {
    owner: ElementKind,
    streams: BTreeMap<String, Stream>,
    source: Option<ArchiveSource>,
}

impl AttributeStreamStore {
    /// Creates a store with no streams declared.
    pub fn new(owner: ElementKind) -> Self {
        Self {
            owner,
            streams: BTreeMap::new(),
            source: None,
        }
    }

    /// Creates a store with the kind's schema streams declared.
    pub fn with_schema(owner: ElementKind) -> Self {
        let mut store = Self::new(owner);
        for (name, kind) in schema::declared(owner) {
            debug_assert_eq!(ElementKind::of_stream(name), Some(owner), "{name}");
            store.streams.insert((*name).to_owned(), Stream::new(*kind));
        }
        store
    }

    /// Declares a stream. Re-declaring with the same kind is a no-op.
    pub fn declare(&mut self, name: &str, kind: ColumnKind) -> Result<()> {
        if ElementKind::of_stream(name) != Some(self.owner) {
            return Err(RoadError::Invalid("stream name does not match store kind"));
        }
        match self.streams.get(name) {
            Some(existing) if existing.kind != kind => Err(RoadError::invalid_state(format!(
                "stream {name} already declared as {}",
                existing.kind
            ))),
            Some(_) => Ok(()),
            None => {
                self.streams.insert(name.to_owned(), Stream::new(kind));
                Ok(())
            }
        }
    }

    /// Declared stream names in order.
    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.streams.keys().map(String::as_str)
    }

    /// Encoding of a declared stream.
    pub fn kind(&self, name: &str) -> Option<ColumnKind> {
        self.streams.get(name).map(|s| s.kind)
    }

    /// Returns true when the attached archive holds a copy of `name`.
    pub fn is_persisted(&self, name: &str) -> bool {
        self.streams.get(name).map_or(false, |s| s.persisted)
    }

    /// Binds the store to an archive so unloaded streams read from it.
    ///
    /// Persisted streams this build does not declare are adopted, so a later
    /// save carries them forward unchanged.
    pub fn attach(&mut self, source: &ArchiveSource) -> Result<()> {
        if let Some(name) = self.dirty_stream() {
            return Err(RoadError::invalid_state(format!(
                "stream {name} has unsaved changes"
            )));
        }
        for entry in source.streams() {
            if ElementKind::of_stream(&entry.name) != Some(self.owner) {
                continue;
            }
            match self.streams.get(&entry.name) {
                Some(stream) if stream.kind != entry.kind => {
                    return Err(RoadError::corruption(format!(
                        "stream {} persisted as {}, declared as {}",
                        entry.name, entry.kind, stream.kind
                    )));
                }
                Some(_) => {}
                None => {
                    debug!(stream = %entry.name, kind = %entry.kind, "attributes.stream.adopted");
                    self.streams
                        .insert(entry.name.clone(), Stream::new(entry.kind));
                }
            }
        }
        for (name, stream) in self.streams.iter_mut() {
            *stream.slot.get_mut() = None;
            stream.persisted = source.entry(name).is_some();
        }
        self.source = Some(source.clone());
        Ok(())
    }

    fn stream(&self, name: &str) -> Result<&Stream> {
        self.streams
            .get(name)
            .ok_or_else(|| RoadError::NotFound(format!("stream {name}")))
    }

    fn dirty_stream(&self) -> Option<&str> {
        self.streams
            .iter()
            .find(|(_, s)| s.dirty)
            .map(|(name, _)| name.as_str())
    }

    /// Returns the column for `name`, loading it on first access.
    ///
    /// Concurrent callers racing on the same unloaded stream read it once.
    pub fn column(&self, name: &str) -> Result<Arc<Column>> {
        let stream = self.stream(name)?;
        if let Some(column) = stream.slot.read().as_ref() {
            return Ok(Arc::clone(column));
        }
        let mut slot = stream.slot.write();
        if let Some(column) = slot.as_ref() {
            return Ok(Arc::clone(column));
        }
        let column = match (&self.source, stream.persisted) {
            (Some(source), true) => {
                let column = source.read_column(name)?;
                if column.kind() != stream.kind {
                    return Err(RoadError::corruption(format!(
                        "stream {name} decoded as {}",
                        column.kind()
                    )));
                }
                debug!(stream = name, entries = column.len(), "attributes.stream.loaded");
                column
            }
            _ => Column::new(stream.kind),
        };
        let column = Arc::new(column);
        *slot = Some(Arc::clone(&column));
        Ok(column)
    }

    /// Alias of [`AttributeStreamStore::column`] for callers forcing a load.
    pub fn load(&self, name: &str) -> Result<Arc<Column>> {
        self.column(name)
    }

    /// Returns the column only if it is already resident.
    pub fn loaded(&self, name: &str) -> Option<Arc<Column>> {
        self.streams
            .get(name)
            .and_then(|s| s.slot.read().as_ref().map(Arc::clone))
    }

    /// Returns true when `name` is resident.
    pub fn is_loaded(&self, name: &str) -> bool {
        self.streams
            .get(name)
            .map_or(false, |s| s.slot.read().is_some())
    }

    /// Loads every stream. Returns how many were read.
    pub fn load_all(&self) -> Result<usize> {
        self.load_all_except(&BTreeSet::new())
    }

    /// Loads every stream not named in `skip`. Returns how many were read.
    pub fn load_all_except(&self, skip: &BTreeSet<String>) -> Result<usize> {
        let mut count = 0;
        for name in self.streams.keys() {
            if skip.contains(name) || self.is_loaded(name) {
                continue;
            }
            self.column(name)?;
            count += 1;
        }
        Ok(count)
    }

    /// Mutable access for builders. Marks the stream as modified.
    pub fn column_mut(&mut self, name: &str) -> Result<&mut Column> {
        self.column(name)?;
        let stream = self
            .streams
            .get_mut(name)
            .ok_or_else(|| RoadError::NotFound(format!("stream {name}")))?;
        stream.dirty = true;
        let slot = stream
            .slot
            .get_mut()
            .as_mut()
            .ok_or_else(|| RoadError::invalid_state(format!("stream {name} not resident")))?;
        Ok(Arc::make_mut(slot))
    }

    /// Drops one resident stream.
    ///
    /// Fails with [`RoadError::InvalidState`] when the stream holds changes
    /// that exist nowhere else.
    pub fn unload_stream(&self, name: &str) -> Result<bool> {
        let stream = self.stream(name)?;
        if stream.dirty {
            return Err(RoadError::invalid_state(format!(
                "stream {name} has no persisted copy of its changes"
            )));
        }
        let dropped = stream.slot.write().take().is_some();
        if dropped {
            trace!(stream = name, "attributes.stream.unloaded");
        }
        Ok(dropped)
    }

    /// Drops every resident stream that can be read back later.
    ///
    /// Modified streams stay resident. Returns how many were dropped.
    pub fn unload(&self) -> usize {
        let mut count = 0;
        for (name, stream) in &self.streams {
            if stream.dirty {
                debug!(stream = %name, "attributes.stream.pinned");
                continue;
            }
            if stream.slot.write().take().is_some() {
                count += 1;
            }
        }
        count
    }

    /// Returns true when no stream is resident.
    pub fn is_unloaded(&self) -> bool {
        self.streams.values().all(|s| s.slot.read().is_none())
    }

    /// Number of entries a stream holds, without loading it.
    pub fn stream_len(&self, name: &str) -> Option<usize> {
        let stream = self.streams.get(name)?;
        if let Some(column) = stream.slot.read().as_ref() {
            return Some(column.len());
        }
        if stream.persisted {
            let entry = self.source.as_ref()?.entry(name)?;
            return usize::try_from(entry.element_count).ok();
        }
        Some(0)
    }

    /// Writes every stream padded to `len` entries.
    ///
    /// Unloaded streams whose persisted copy already has `len` entries are
    /// copied byte for byte from the attached archive.
    pub fn save(&self, writer: &mut ArchiveWriter<'_>, len: usize) -> Result<()> {
        for (name, stream) in &self.streams {
            let resident = stream.slot.read().as_ref().map(Arc::clone);
            if resident.is_none() && stream.persisted {
                if let Some(source) = &self.source {
                    let same_len = source
                        .entry(name)
                        .map_or(false, |e| e.element_count == len as u64);
                    if same_len {
                        writer.copy_stream(source, name)?;
                        trace!(stream = %name, "attributes.stream.copied");
                        continue;
                    }
                }
            }
            let column = match resident {
                Some(column) => column,
                None if stream.persisted => self.column(name)?,
                None => Arc::new(Column::new(stream.kind)),
            };
            if column.len() > len {
                return Err(RoadError::Problem(format!(
                    "stream {name} holds {} entries for {len} elements",
                    column.len()
                )));
            }
            if column.len() == len {
                writer.write_column(name, &column)?;
            } else {
                let mut padded = Column::clone(&column);
                padded.ensure_len(len);
                writer.write_column(name, &padded)?;
            }
        }
        Ok(())
    }

    /// Re-binds to the archive just written and clears modification marks.
    pub fn saved(&mut self, source: &ArchiveSource) {
        for (name, stream) in self.streams.iter_mut() {
            stream.persisted = source.entry(name).is_some();
            stream.dirty = false;
        }
        self.source = Some(source.clone());
    }

    /// Approximate resident size of all loaded streams.
    pub fn heap_bytes(&self) -> usize {
        self.streams
            .values()
            .filter_map(|s| s.slot.read().as_ref().map(|c| c.heap_bytes()))
            .sum()
    }
}

impl std::fmt::Debug for AttributeStreamStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttributeStreamStore")
            .field("owner", &self.owner)
            .field("streams", &self.streams.keys().collect::<Vec<_>>())
            .field("attached", &self.source.is_some())
            .finish()
    }
}
