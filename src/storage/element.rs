//! Per-kind element stores and their load/unload lifecycle.
//!
//! ```text
//! Empty ──loading──▶ Loading ──loaded──▶ Loaded ──unload──▶ Unloading ──▶ Unloaded
//!                       ▲                                                    │
//!                       └──────────────────────── loading ───────────────────┘
//! ```

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::storage::archive::{ArchiveSource, ArchiveWriter};
use crate::storage::attributes::AttributeStreamStore;
use crate::storage::column::{Column, Value, NULL_LONG};
use crate::storage::schema;
use crate::types::{ElementId, ElementIndex, ElementKind, Result, RoadError};

/// Lifecycle state of an [`ElementStore`].
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum StoreState {
    /// Nothing loaded or built yet.
    Empty,
    /// Bound to an archive, streams being loaded.
    Loading,
    /// Ready for reads and, for in-memory stores, appends.
    Loaded,
    /// Unload in progress.
    Unloading,
    /// Resident data released; streams reload on access.
    Unloaded,
}

/// Elements of one kind: an id stream plus declared attribute streams.
pub struct ElementStore {
    kind: ElementKind,
    state: Mutex<StoreState>,
    len: usize,
    attributes: AttributeStreamStore,
    unloading: AtomicBool,
}

struct UnloadGuard<'a>(&'a AtomicBool);

impl Drop for UnloadGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl ElementStore {
    /// Creates an empty store with the kind's schema declared.
    pub fn new(kind: ElementKind) -> Self {
        let attributes = AttributeStreamStore::with_schema(kind);
        Self {
            kind,
            state: Mutex::new(StoreState::Empty),
            len: 0,
            attributes,
            unloading: AtomicBool::new(false),
        }
    }

    /// Kind of element held.
    pub fn kind(&self) -> ElementKind {
        self.kind
    }

    /// Current lifecycle state.
    pub fn state(&self) -> StoreState {
        *self.state.lock()
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true when the store holds no elements.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Attribute streams of this store.
    pub fn attributes(&self) -> &AttributeStreamStore {
        &self.attributes
    }

    fn transition(&self, allowed: &[StoreState], to: StoreState, op: &str) -> Result<StoreState> {
        let mut state = self.state.lock();
        let from = *state;
        if !allowed.contains(&from) {
            return Err(RoadError::invalid_state(format!(
                "{} store: {op} not permitted while {from:?}",
                self.kind
            )));
        }
        *state = to;
        debug!(kind = %self.kind, from = ?from, to = ?to, "element.state");
        Ok(from)
    }

    fn require(&self, allowed: &[StoreState], op: &str) -> Result<StoreState> {
        let state = self.state();
        if !allowed.contains(&state) {
            return Err(RoadError::invalid_state(format!(
                "{} store: {op} not permitted while {state:?}",
                self.kind
            )));
        }
        Ok(state)
    }

    fn check_index(&self, index: ElementIndex) -> Result<usize> {
        let i = index.as_usize();
        if i >= self.len {
            return Err(RoadError::IndexOutOfRange {
                what: self.kind.prefix(),
                index: index.0 as u64,
                len: self.len as u64,
            });
        }
        Ok(i)
    }

    /// Appends an element and returns its index.
    pub fn append(&mut self, id: ElementId) -> Result<ElementIndex> {
        self.require(&[StoreState::Empty, StoreState::Loaded], "append")?;
        let index = u32::try_from(self.len).map_err(|_| RoadError::Capacity {
            what: "element index",
            len: self.len,
            max: u32::MAX as usize,
        })?;
        let raw = i64::try_from(id.0)
            .ok()
            .filter(|v| *v != NULL_LONG)
            .ok_or(RoadError::Invalid("element id above i64::MAX"))?;
        self.attributes
            .column_mut(schema::id_stream(self.kind))?
            .set(self.len, Value::Long(raw))?;
        self.len += 1;
        *self.state.get_mut() = StoreState::Loaded;
        Ok(ElementIndex(index))
    }

    /// Identifier of the element at `index`.
    pub fn id(&self, index: ElementIndex) -> Result<ElementId> {
        let i = self.check_index(index)?;
        let ids = self.attributes.column(schema::id_stream(self.kind))?;
        match ids.longs()?.get(i) {
            Some(&raw) if raw != NULL_LONG => Ok(ElementId(raw as u64)),
            _ => Err(RoadError::corruption(format!(
                "{} {index} has no id",
                self.kind
            ))),
        }
    }

    /// Sets one attribute of an element.
    pub fn set(&mut self, index: ElementIndex, name: &str, value: Value) -> Result<()> {
        self.require(&[StoreState::Loaded], "set")?;
        let i = self.check_index(index)?;
        self.attributes.column_mut(name)?.set(i, value)
    }

    /// Reads one attribute of an element, loading its stream if needed.
    pub fn get(&self, index: ElementIndex, name: &str) -> Result<Option<Value>> {
        let i = self.check_index(index)?;
        Ok(self.attributes.column(name)?.get(i))
    }

    /// Column of one attribute, loading it if needed.
    pub fn column(&self, name: &str) -> Result<Arc<Column>> {
        self.attributes.column(name)
    }

    /// Column of one attribute, only if resident.
    pub fn resident(&self, name: &str) -> Option<Arc<Column>> {
        self.attributes.loaded(name)
    }

    /// Enters [`StoreState::Loading`].
    ///
    /// Only an empty store or an unloaded one may be (re)loaded; loading into
    /// a store that already holds data is a programming error.
    pub fn loading(&self) -> Result<()> {
        if self.len != 0 && self.state() != StoreState::Unloaded {
            return Err(RoadError::invalid_state(format!(
                "{} store: cannot load into a non-empty store",
                self.kind
            )));
        }
        self.transition(&[StoreState::Empty, StoreState::Unloaded], StoreState::Loading, "loading")
            .map(|_| ())
    }

    /// Binds the store to an archive. Requires [`StoreState::Loading`].
    pub fn attach(&mut self, source: &ArchiveSource) -> Result<()> {
        self.require(&[StoreState::Loading], "attach")?;
        self.attributes.attach(source)?;
        let id_stream = schema::id_stream(self.kind);
        self.len = match source.entry(id_stream) {
            Some(entry) => usize::try_from(entry.element_count)
                .map_err(|_| RoadError::corruption("element count overflow"))?,
            None => 0,
        };
        debug!(kind = %self.kind, elements = self.len, "element.attached");
        Ok(())
    }

    /// Leaves [`StoreState::Loading`].
    pub fn loaded(&self) -> Result<()> {
        self.transition(&[StoreState::Loading], StoreState::Loaded, "loaded")
            .map(|_| ())
    }

    /// Forces every stream resident. Returns how many were read.
    pub fn load_all(&self) -> Result<usize> {
        self.load_all_except(&BTreeSet::new())
    }

    /// Forces every stream not named in `skip` resident.
    pub fn load_all_except(&self, skip: &BTreeSet<String>) -> Result<usize> {
        let state = self.require(
            &[
                StoreState::Empty,
                StoreState::Loading,
                StoreState::Loaded,
                StoreState::Unloaded,
            ],
            "load",
        )?;
        let count = self.attributes.load_all_except(skip)?;
        if state == StoreState::Unloaded {
            self.transition(&[StoreState::Unloaded], StoreState::Loaded, "load")?;
        }
        Ok(count)
    }

    /// Releases every resident stream that can be read back.
    ///
    /// Calls made while an unload of this store is already running return
    /// immediately. Callers must make sure no other thread reads the store
    /// meanwhile.
    pub fn unload(&self) -> Result<usize> {
        if self.unloading.swap(true, Ordering::AcqRel) {
            return Ok(0);
        }
        let _guard = UnloadGuard(&self.unloading);
        if self.state() == StoreState::Empty {
            return Ok(0);
        }
        self.transition(
            &[StoreState::Loaded, StoreState::Unloaded],
            StoreState::Unloading,
            "unload",
        )?;
        let count = self.attributes.unload();
        self.transition(&[StoreState::Unloading], StoreState::Unloaded, "unload")?;
        debug!(kind = %self.kind, streams = count, "element.unloaded");
        Ok(count)
    }

    /// Returns true once unloaded with no stream left resident.
    pub fn is_unloaded(&self) -> bool {
        self.state() == StoreState::Unloaded && self.attributes.is_unloaded()
    }

    /// Writes every stream. Permitted only from `Empty` or `Loaded`.
    pub fn save(&self, writer: &mut ArchiveWriter<'_>) -> Result<()> {
        self.require(&[StoreState::Empty, StoreState::Loaded], "save")?;
        self.attributes.save(writer, self.len)
    }

    /// Re-binds to the archive just written.
    pub fn saved(&mut self, source: &ArchiveSource) -> Result<()> {
        self.require(&[StoreState::Empty, StoreState::Loaded], "saved")?;
        self.attributes.saved(source);
        *self.state.get_mut() = StoreState::Loaded;
        Ok(())
    }

    /// Approximate resident size.
    pub fn heap_bytes(&self) -> usize {
        self.attributes.heap_bytes()
    }
}

impl std::fmt::Debug for ElementStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ElementStore")
            .field("kind", &self.kind)
            .field("state", &self.state())
            .field("len", &self.len)
            .finish()
    }
}
