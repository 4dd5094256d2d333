//! Graph storage: adjacency lists, attribute columns, element stores, and the
//! archive they persist into.

/// Compressed-sparse-row adjacency lists.
pub mod adjacency;

/// Archive file format and the atomic save/load protocol.
pub mod archive;

/// Named attribute streams with lazy load and unload.
pub mod attributes;

/// Typed columns and their binary encodings.
pub mod column;

/// Per-kind element stores and their lifecycle.
pub mod element;

/// The in-memory graph.
pub mod graph;

/// Stream names and encodings declared by each element kind.
pub mod schema;

pub use adjacency::{AdjacencyLists, MAX_LIST_LEN};
pub use archive::{
    ArchiveMode, ArchiveOptions, ArchiveSource, Count, Descriptor, ElementCounts, GraphArchive,
    LoadListener, LoadPlan, Metadata, StreamEntry,
};
pub use attributes::AttributeStreamStore;
pub use column::{Column, ColumnKind, Tag, Value};
pub use element::{ElementStore, StoreState};
pub use graph::{
    EdgeFlags, EdgeSpec, Graph, GraphAdjacency, PlaceSpec, TurnRelation, TurnRestriction,
};
