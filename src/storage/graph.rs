//! In-memory road graph built from four element stores.
//!
//! Topology lives in the `edge.from` / `edge.to` streams. The CSR adjacency
//! used for traversal is derived from them on first use and dropped whenever
//! the edge set changes or the graph is unloaded.

use std::collections::BTreeSet;
use std::convert::TryFrom;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::storage::adjacency::AdjacencyLists;
use crate::storage::archive::{
    ArchiveSource, ArchiveWriter, Count, Descriptor, ElementCounts, LoadListener, LoadPlan,
    Metadata,
};
use crate::storage::column::{Tag, Value, NULL_BYTE, NULL_INT, NULL_LONG};
use crate::storage::element::ElementStore;
use crate::storage::schema::{self, edge, place, relation, vertex};
use crate::types::{ElementId, ElementIndex, ElementKind, ListId, Point, Rect, Result, RoadError};

/// Per-edge bit flags stored in `edge.flags`.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash)]
pub struct EdgeFlags(pub u8);

impl EdgeFlags {
    /// Traversable only from `from` to `to`.
    pub const ONEWAY: EdgeFlags = EdgeFlags(1);
    /// Toll road.
    pub const TOLL: EdgeFlags = EdgeFlags(1 << 1);
    /// Ferry connection.
    pub const FERRY: EdgeFlags = EdgeFlags(1 << 2);
    /// Tunnel.
    pub const TUNNEL: EdgeFlags = EdgeFlags(1 << 3);
    /// Bridge.
    pub const BRIDGE: EdgeFlags = EdgeFlags(1 << 4);

    /// Returns true when every bit of `other` is set.
    pub fn contains(self, other: EdgeFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl std::ops::BitOr for EdgeFlags {
    type Output = EdgeFlags;

    fn bitor(self, rhs: Self) -> Self::Output {
        EdgeFlags(self.0 | rhs.0)
    }
}

/// Attributes of a new edge.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EdgeSpec {
    /// Semantic identifier.
    pub id: ElementId,
    /// Start vertex.
    pub from: ElementIndex,
    /// End vertex.
    pub to: ElementIndex,
    /// Geometry including both endpoints.
    pub shape: Option<Vec<Point>>,
    /// Street name.
    pub name: Option<String>,
    /// Length in centimetres.
    pub length_cm: Option<i64>,
    /// Speed limit in km/h.
    pub speed_kph: Option<i32>,
    /// Grade in percent, `0..=100`.
    pub grade: Option<u8>,
    /// Bit flags.
    pub flags: EdgeFlags,
}

impl EdgeSpec {
    /// A bare edge between two vertices.
    pub fn new(id: impl Into<ElementId>, from: ElementIndex, to: ElementIndex) -> Self {
        Self {
            id: id.into(),
            from,
            to,
            ..Self::default()
        }
    }

    /// Sets the geometry.
    pub fn with_shape(mut self, shape: Vec<Point>) -> Self {
        self.shape = Some(shape);
        self
    }

    /// Sets the street name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the flags.
    pub fn with_flags(mut self, flags: EdgeFlags) -> Self {
        self.flags = flags;
        self
    }
}

/// Attributes of a new place.
#[derive(Clone, Debug, PartialEq)]
pub struct PlaceSpec {
    /// Semantic identifier.
    pub id: ElementId,
    /// Location.
    pub location: Point,
    /// Display name.
    pub name: Option<String>,
    /// Population, when known.
    pub population: Option<i64>,
    /// Source tags.
    pub tags: Vec<Tag>,
}

/// Kind of a turn restriction.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum TurnRestriction {
    /// No left turn.
    NoLeft = 1,
    /// No right turn.
    NoRight = 2,
    /// No straight on.
    NoStraight = 3,
    /// No U-turn.
    NoUTurn = 4,
    /// Only left turn.
    OnlyLeft = 5,
    /// Only right turn.
    OnlyRight = 6,
    /// Only straight on.
    OnlyStraight = 7,
}

impl TryFrom<u8> for TurnRestriction {
    type Error = RoadError;

    fn try_from(value: u8) -> Result<Self> {
        Ok(match value {
            1 => TurnRestriction::NoLeft,
            2 => TurnRestriction::NoRight,
            3 => TurnRestriction::NoStraight,
            4 => TurnRestriction::NoUTurn,
            5 => TurnRestriction::OnlyLeft,
            6 => TurnRestriction::OnlyRight,
            7 => TurnRestriction::OnlyStraight,
            other => {
                return Err(RoadError::corruption(format!(
                    "unknown turn restriction {other}"
                )))
            }
        })
    }
}

/// A turn relation: from-edge, via-vertex, to-edge.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct TurnRelation {
    /// Semantic identifier.
    pub id: ElementId,
    /// Restriction kind.
    pub kind: TurnRestriction,
    /// Edge the turn starts on.
    pub from: ElementIndex,
    /// Vertex the turn passes.
    pub via: ElementIndex,
    /// Edge the turn ends on.
    pub to: ElementIndex,
}

/// Outgoing and incoming edge lists, keyed by vertex index + 1.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GraphAdjacency {
    /// Edges leaving each vertex.
    pub outgoing: AdjacencyLists,
    /// Edges entering each vertex.
    pub incoming: AdjacencyLists,
}

impl GraphAdjacency {
    /// List id of a vertex.
    pub fn list_id(vertex: ElementIndex) -> ListId {
        ListId(vertex.0 + 1)
    }

    /// Edges leaving `vertex`.
    pub fn outgoing(&self, vertex: ElementIndex) -> Result<&[u32]> {
        self.outgoing.get(Self::list_id(vertex))
    }

    /// Edges entering `vertex`.
    pub fn incoming(&self, vertex: ElementIndex) -> Result<&[u32]> {
        self.incoming.get(Self::list_id(vertex))
    }

    fn build(vertices: usize, from: &[u32], to: &[u32]) -> Result<Self> {
        Ok(Self {
            outgoing: group_by_vertex(vertices, from)?,
            incoming: group_by_vertex(vertices, to)?,
        })
    }

    fn heap_bytes(&self) -> usize {
        self.outgoing.heap_bytes() + self.incoming.heap_bytes()
    }
}

// Counting sort of edge indices by endpoint, then one append per vertex.
fn group_by_vertex(vertices: usize, endpoints: &[u32]) -> Result<AdjacencyLists> {
    let mut starts = vec![0usize; vertices + 1];
    for &v in endpoints {
        starts[v as usize + 1] += 1;
    }
    for i in 0..vertices {
        starts[i + 1] += starts[i];
    }
    let mut cursor = starts.clone();
    let mut order = vec![0u32; endpoints.len()];
    for (e, &v) in endpoints.iter().enumerate() {
        order[cursor[v as usize]] = e as u32;
        cursor[v as usize] += 1;
    }
    let mut lists = AdjacencyLists::with_capacity(vertices, endpoints.len());
    for v in 0..vertices {
        lists.append(&order[starts[v]..starts[v + 1]])?;
    }
    Ok(lists)
}

/// A road graph.
pub struct Graph {
    descriptor: Descriptor,
    vertices: ElementStore,
    edges: ElementStore,
    places: ElementStore,
    relations: ElementStore,
    adjacency: Mutex<Option<Arc<GraphAdjacency>>>,
    origin: Option<Metadata>,
    modified: bool,
}

impl Graph {
    /// Creates an empty graph.
    pub fn new(descriptor: Descriptor) -> Self {
        Self {
            descriptor,
            vertices: ElementStore::new(ElementKind::Vertex),
            edges: ElementStore::new(ElementKind::Edge),
            places: ElementStore::new(ElementKind::Place),
            relations: ElementStore::new(ElementKind::Relation),
            adjacency: Mutex::new(None),
            origin: None,
            modified: false,
        }
    }

    /// Origin of the data.
    pub fn descriptor(&self) -> &Descriptor {
        &self.descriptor
    }

    /// Replaces the descriptor written on the next save.
    pub fn set_descriptor(&mut self, descriptor: Descriptor) {
        self.descriptor = descriptor;
        self.modified = true;
    }

    /// Store of one element kind.
    pub fn store(&self, kind: ElementKind) -> &ElementStore {
        match kind {
            ElementKind::Vertex => &self.vertices,
            ElementKind::Edge => &self.edges,
            ElementKind::Place => &self.places,
            ElementKind::Relation => &self.relations,
        }
    }

    fn store_mut(&mut self, kind: ElementKind) -> &mut ElementStore {
        match kind {
            ElementKind::Vertex => &mut self.vertices,
            ElementKind::Edge => &mut self.edges,
            ElementKind::Place => &mut self.places,
            ElementKind::Relation => &mut self.relations,
        }
    }

    fn stores(&self) -> [&ElementStore; 4] {
        [&self.vertices, &self.edges, &self.places, &self.relations]
    }

    fn touched(&mut self) {
        self.modified = true;
    }

    fn topology_changed(&mut self) {
        self.modified = true;
        *self.adjacency.get_mut() = None;
    }

    /// Returns true when no store holds elements.
    pub fn is_empty(&self) -> bool {
        self.stores().iter().all(|s| s.is_empty())
    }

    /// Adds a vertex.
    pub fn add_vertex(&mut self, id: impl Into<ElementId>, location: Point) -> Result<ElementIndex> {
        let index = self.vertices.append(id.into())?;
        self.vertices
            .set(index, vertex::LOCATION, Value::Point(location))?;
        self.topology_changed();
        Ok(index)
    }

    /// Adds an edge between two existing vertices.
    pub fn add_edge(&mut self, spec: EdgeSpec) -> Result<ElementIndex> {
        self.check(ElementKind::Vertex, spec.from)?;
        self.check(ElementKind::Vertex, spec.to)?;
        if let Some(grade) = spec.grade {
            if grade > crate::storage::column::MAX_PERCENT {
                return Err(RoadError::Capacity {
                    what: "edge grade",
                    len: grade as usize,
                    max: crate::storage::column::MAX_PERCENT as usize,
                });
            }
        }
        let from = stored_index("edge endpoint", spec.from)?;
        let to = stored_index("edge endpoint", spec.to)?;
        let index = self.edges.append(spec.id)?;
        let store = &mut self.edges;
        store.set(index, edge::FROM, Value::Int(from))?;
        store.set(index, edge::TO, Value::Int(to))?;
        if let Some(shape) = spec.shape {
            store.set(index, edge::SHAPE, Value::Shape(shape))?;
        }
        if let Some(name) = spec.name {
            store.set(index, edge::NAME, Value::Text(name))?;
        }
        if let Some(length) = spec.length_cm {
            store.set(index, edge::LENGTH, Value::Long(length))?;
        }
        if let Some(speed) = spec.speed_kph {
            store.set(index, edge::SPEED, Value::Int(speed))?;
        }
        if let Some(grade) = spec.grade {
            store.set(index, edge::GRADE, Value::Percent(grade))?;
        }
        store.set(index, edge::FLAGS, Value::Byte(spec.flags.0))?;
        self.topology_changed();
        Ok(index)
    }

    /// Adds a place.
    pub fn add_place(&mut self, spec: PlaceSpec) -> Result<ElementIndex> {
        let index = self.places.append(spec.id)?;
        self.places
            .set(index, place::LOCATION, Value::Point(spec.location))?;
        if let Some(name) = spec.name {
            self.places.set(index, place::NAME, Value::Text(name))?;
        }
        if let Some(population) = spec.population {
            self.places
                .set(index, place::POPULATION, Value::Long(population))?;
        }
        if !spec.tags.is_empty() {
            self.places.set(index, place::TAGS, Value::Tags(spec.tags))?;
        }
        self.touched();
        Ok(index)
    }

    /// Adds a turn relation between existing edges and vertex.
    pub fn add_relation(&mut self, turn: TurnRelation) -> Result<ElementIndex> {
        self.check(ElementKind::Edge, turn.from)?;
        self.check(ElementKind::Vertex, turn.via)?;
        self.check(ElementKind::Edge, turn.to)?;
        let from = stored_index("relation edge", turn.from)?;
        let via = stored_index("relation vertex", turn.via)?;
        let to = stored_index("relation edge", turn.to)?;
        let index = self.relations.append(turn.id)?;
        let store = &mut self.relations;
        store.set(index, relation::KIND, Value::Byte(turn.kind as u8))?;
        store.set(index, relation::FROM, Value::Int(from))?;
        store.set(index, relation::VIA, Value::Int(via))?;
        store.set(index, relation::TO, Value::Int(to))?;
        self.touched();
        Ok(index)
    }

    /// Sets any declared attribute of an element.
    pub fn set_attribute(
        &mut self,
        kind: ElementKind,
        index: ElementIndex,
        name: &str,
        value: Value,
    ) -> Result<()> {
        let topology = matches!(name, edge::FROM | edge::TO);
        self.store_mut(kind).set(index, name, value)?;
        if topology {
            self.topology_changed();
        } else {
            self.touched();
        }
        Ok(())
    }

    /// Reads any attribute of an element.
    pub fn attribute(&self, kind: ElementKind, index: ElementIndex, name: &str) -> Result<Option<Value>> {
        self.store(kind).get(index, name)
    }

    fn check(&self, kind: ElementKind, index: ElementIndex) -> Result<()> {
        let len = self.store(kind).len();
        if index.as_usize() >= len {
            return Err(RoadError::IndexOutOfRange {
                what: kind.prefix(),
                index: index.0 as u64,
                len: len as u64,
            });
        }
        Ok(())
    }

    /// Identifier of an element.
    pub fn id(&self, kind: ElementKind, index: ElementIndex) -> Result<ElementId> {
        self.store(kind).id(index)
    }

    /// Location of a vertex.
    pub fn vertex_location(&self, index: ElementIndex) -> Result<Option<Point>> {
        match self.vertices.get(index, vertex::LOCATION)? {
            Some(Value::Point(p)) => Ok(Some(p)),
            _ => Ok(None),
        }
    }

    /// Start and end vertex of an edge.
    pub fn edge_endpoints(&self, index: ElementIndex) -> Result<(ElementIndex, ElementIndex)> {
        let from = self.index_ref(ElementKind::Edge, index, edge::FROM)?;
        let to = self.index_ref(ElementKind::Edge, index, edge::TO)?;
        Ok((from, to))
    }

    /// Geometry of an edge.
    pub fn edge_shape(&self, index: ElementIndex) -> Result<Option<Vec<Point>>> {
        match self.edges.get(index, edge::SHAPE)? {
            Some(Value::Shape(points)) => Ok(Some(points)),
            _ => Ok(None),
        }
    }

    /// Flags of an edge.
    pub fn edge_flags(&self, index: ElementIndex) -> Result<EdgeFlags> {
        match self.edges.get(index, edge::FLAGS)? {
            Some(Value::Byte(bits)) => Ok(EdgeFlags(bits)),
            _ => Ok(EdgeFlags::default()),
        }
    }

    /// A turn relation.
    pub fn relation(&self, index: ElementIndex) -> Result<TurnRelation> {
        let kind = match self.relations.get(index, relation::KIND)? {
            Some(Value::Byte(code)) => TurnRestriction::try_from(code)?,
            _ => return Err(RoadError::corruption(format!("relation {index} has no kind"))),
        };
        Ok(TurnRelation {
            id: self.relations.id(index)?,
            kind,
            from: self.index_ref(ElementKind::Relation, index, relation::FROM)?,
            via: self.index_ref(ElementKind::Relation, index, relation::VIA)?,
            to: self.index_ref(ElementKind::Relation, index, relation::TO)?,
        })
    }

    fn index_ref(&self, kind: ElementKind, index: ElementIndex, name: &str) -> Result<ElementIndex> {
        match self.store(kind).get(index, name)? {
            Some(Value::Int(v)) if v >= 0 => Ok(ElementIndex(v as u32)),
            _ => Err(RoadError::corruption(format!(
                "{kind} {index} has no valid {name}"
            ))),
        }
    }

    /// The adjacency index, rebuilt from the edge streams when stale.
    pub fn adjacency(&self) -> Result<Arc<GraphAdjacency>> {
        let mut slot = self.adjacency.lock();
        if let Some(adjacency) = slot.as_ref() {
            return Ok(Arc::clone(adjacency));
        }
        let (from, to) = self.endpoint_indices()?;
        let adjacency = Arc::new(GraphAdjacency::build(self.vertices.len(), &from, &to)?);
        debug!(
            vertices = self.vertices.len(),
            edges = from.len(),
            bytes = adjacency.heap_bytes(),
            "graph.adjacency.built"
        );
        *slot = Some(Arc::clone(&adjacency));
        Ok(adjacency)
    }

    // Endpoint streams as vertex indices; null or dangling entries are Problems.
    fn endpoint_indices(&self) -> Result<(Vec<u32>, Vec<u32>)> {
        let n = self.edges.len();
        let vertices = self.vertices.len();
        let mut out = (Vec::with_capacity(n), Vec::with_capacity(n));
        for (name, target) in [(edge::FROM, &mut out.0), (edge::TO, &mut out.1)] {
            let column = self.edges.column(name)?;
            let values = column.ints()?;
            for i in 0..n {
                let raw = values.get(i).copied().unwrap_or(NULL_INT);
                if raw == NULL_INT || raw < 0 || raw as usize >= vertices {
                    return Err(RoadError::Problem(format!(
                        "edge #{i} has dangling {name} ({raw}) with {vertices} vertices"
                    )));
                }
                target.push(raw as u32);
            }
        }
        Ok(out)
    }

    /// Edges leaving a vertex.
    pub fn out_edges(&self, vertex: ElementIndex) -> Result<Vec<ElementIndex>> {
        self.check(ElementKind::Vertex, vertex)?;
        let adjacency = self.adjacency()?;
        Ok(adjacency
            .outgoing(vertex)?
            .iter()
            .map(|&e| ElementIndex(e))
            .collect())
    }

    /// Edges entering a vertex.
    pub fn in_edges(&self, vertex: ElementIndex) -> Result<Vec<ElementIndex>> {
        self.check(ElementKind::Vertex, vertex)?;
        let adjacency = self.adjacency()?;
        Ok(adjacency
            .incoming(vertex)?
            .iter()
            .map(|&e| ElementIndex(e))
            .collect())
    }

    /// Element counts.
    ///
    /// An unmodified graph loaded from an archive reports the archived counts
    /// without touching element data.
    pub fn counts(&self) -> ElementCounts {
        match &self.origin {
            Some(origin) if !self.modified => origin.counts,
            _ => self.exact_counts(),
        }
    }

    fn exact_counts(&self) -> ElementCounts {
        let mut counts = ElementCounts::default();
        for kind in ElementKind::ALL {
            *counts.get_mut(kind) = Count::exact(self.store(kind).len() as u64);
        }
        counts
    }

    /// Geographic bounds.
    ///
    /// An unmodified graph loaded from an archive reports the archived bounds;
    /// otherwise they are computed from the element data.
    pub fn bounds(&self) -> Result<Option<Rect>> {
        match &self.origin {
            Some(origin) if !self.modified => Ok(origin.bounds),
            _ => self.compute_bounds(),
        }
    }

    /// Scans vertex and place locations and edge shapes.
    pub fn compute_bounds(&self) -> Result<Option<Rect>> {
        let mut bounds: Option<Rect> = None;
        let mut cover = |p: Point| {
            if p.is_null() {
                return;
            }
            match bounds.as_mut() {
                Some(rect) => rect.expand(p),
                None => bounds = Some(Rect::of_point(p)),
            }
        };
        for (store, name) in [(&self.vertices, vertex::LOCATION), (&self.places, place::LOCATION)] {
            if store.is_empty() {
                continue;
            }
            let column = store.column(name)?;
            column.points()?.iter().copied().for_each(&mut cover);
        }
        if !self.edges.is_empty() {
            let shapes = self.edges.column(edge::SHAPE)?;
            shapes
                .shapes()?
                .iter()
                .flatten()
                .flatten()
                .copied()
                .for_each(&mut cover);
        }
        Ok(bounds)
    }

    /// Metadata describing the graph as it stands now.
    pub fn metadata(&self) -> Result<Metadata> {
        let bounds = match &self.origin {
            Some(origin) if !self.modified => origin.bounds,
            _ => self.compute_bounds()?,
        };
        Ok(Metadata::new(
            self.descriptor.clone(),
            self.exact_counts(),
            bounds,
        ))
    }

    /// Checks referential integrity before a save.
    pub fn validate(&self) -> Result<()> {
        for store in self.stores() {
            let len = store.len();
            for name in store.attributes().names() {
                if let Some(stream_len) = store.attributes().stream_len(name) {
                    if stream_len > len {
                        return Err(RoadError::Problem(format!(
                            "stream {name} holds {stream_len} entries for {len} elements"
                        )));
                    }
                }
            }
            if len > 0 {
                let ids = store.column(schema::id_stream(store.kind()))?;
                let ids = ids.longs()?;
                if let Some(i) = (0..len).find(|&i| ids.get(i).map_or(true, |v| *v == NULL_LONG)) {
                    return Err(RoadError::Problem(format!(
                        "{} #{i} has no id",
                        store.kind()
                    )));
                }
            }
        }
        self.endpoint_indices()?;
        self.validate_relations()?;
        match self.adjacency() {
            Err(RoadError::Capacity { len, max, .. }) => Err(RoadError::Problem(format!(
                "vertex degree {len} exceeds {max}"
            ))),
            other => other.map(|_| ()),
        }
    }

    fn validate_relations(&self) -> Result<()> {
        let n = self.relations.len();
        if n == 0 {
            return Ok(());
        }
        let kinds = self.relations.column(relation::KIND)?;
        for i in 0..n {
            let code = match kinds.get(i) {
                Some(Value::Byte(code)) => code,
                _ => NULL_BYTE,
            };
            if TurnRestriction::try_from(code).is_err() {
                return Err(RoadError::Problem(format!(
                    "relation #{i} has invalid kind {code}"
                )));
            }
        }
        for (name, target) in [
            (relation::FROM, ElementKind::Edge),
            (relation::VIA, ElementKind::Vertex),
            (relation::TO, ElementKind::Edge),
        ] {
            let column = self.relations.column(name)?;
            let values = column.ints()?;
            let limit = self.store(target).len();
            for i in 0..n {
                let raw = values.get(i).copied().unwrap_or(NULL_INT);
                if raw < 0 || raw as usize >= limit {
                    return Err(RoadError::Problem(format!(
                        "relation #{i} has dangling {name} ({raw})"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Forces every stream of every store resident.
    pub fn load_all(&self) -> Result<usize> {
        self.load_all_except(&[])
    }

    /// Forces every stream not named in `skip` resident.
    pub fn load_all_except(&self, skip: &[&str]) -> Result<usize> {
        let skip: BTreeSet<String> = skip.iter().map(|s| (*s).to_owned()).collect();
        let mut count = 0;
        for store in self.stores() {
            count += store.load_all_except(&skip)?;
        }
        Ok(count)
    }

    /// Releases resident data of every store. Unsaved streams stay resident.
    pub fn unload(&self) -> Result<usize> {
        let mut count = 0;
        for store in self.stores() {
            count += store.unload()?;
        }
        *self.adjacency.lock() = None;
        debug!(streams = count, "graph.unloaded");
        Ok(count)
    }

    /// Returns true once every store is unloaded.
    pub fn is_unloaded(&self) -> bool {
        self.stores().iter().all(|s| s.is_unloaded())
    }

    /// Approximate resident size.
    pub fn heap_bytes(&self) -> usize {
        let adjacency = self
            .adjacency
            .lock()
            .as_ref()
            .map_or(0, |a| a.heap_bytes());
        self.stores().iter().map(|s| s.heap_bytes()).sum::<usize>() + adjacency
    }

    pub(crate) fn attach_archive(
        &mut self,
        source: &ArchiveSource,
        listener: &mut dyn LoadListener,
    ) -> Result<()> {
        let metadata = source.metadata();
        let plan = listener.plan(metadata);
        for kind in ElementKind::ALL {
            let store = self.store_mut(kind);
            store.loading()?;
            store.attach(source)?;
            let streams = match &plan {
                LoadPlan::Lazy => 0,
                LoadPlan::All => store.load_all()?,
                LoadPlan::AllExcept(skip) => store.load_all_except(skip)?,
            };
            store.loaded()?;
            listener.store_loaded(kind, streams);
        }
        self.descriptor = metadata.descriptor.clone();
        self.origin = Some(metadata.clone());
        self.modified = false;
        *self.adjacency.get_mut() = None;
        info!(
            path = %source.path().display(),
            plan = ?plan,
            vertices = self.vertices.len(),
            edges = self.edges.len(),
            "graph.loaded"
        );
        Ok(())
    }

    pub(crate) fn save_streams(&self, writer: &mut ArchiveWriter<'_>) -> Result<()> {
        for store in self.stores() {
            store.save(writer)?;
        }
        Ok(())
    }

    pub(crate) fn saved(&mut self, source: &ArchiveSource) -> Result<()> {
        for kind in ElementKind::ALL {
            self.store_mut(kind).saved(source)?;
        }
        self.origin = Some(source.metadata().clone());
        self.modified = false;
        Ok(())
    }
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("descriptor", &self.descriptor)
            .field("vertices", &self.vertices.len())
            .field("edges", &self.edges.len())
            .field("places", &self.places.len())
            .field("relations", &self.relations.len())
            .finish()
    }
}

/// Index references are stored in signed 32-bit columns.
fn stored_index(what: &'static str, index: ElementIndex) -> Result<i32> {
    i32::try_from(index.0).map_err(|_| RoadError::Capacity {
        what,
        len: index.0 as usize,
        max: i32::MAX as usize,
    })
}
