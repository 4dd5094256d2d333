#![forbid(unsafe_code)]
//! Identifier newtypes, geographic value types, and the crate error.

use std::fmt;

pub mod checksum;

pub use checksum::{block_crc32, stream_crc32, StreamDigest};

/// Semantic identifier of a vertex, edge, place, or relation.
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct ElementId(pub u64);

/// Dense 0-based position of an element inside its store.
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct ElementIndex(pub u32);

/// Identifier of one list inside an adjacency list store.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct ListId(pub u32);

impl ListId {
    /// Reserved id meaning "no list".
    pub const NONE: ListId = ListId(0);

    /// Returns true when this is the reserved sentinel.
    pub fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl ElementIndex {
    /// Returns the index as a `usize` for slice addressing.
    pub fn as_usize(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for ElementIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl fmt::Display for ListId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for ElementId {
    fn from(value: u64) -> Self {
        ElementId(value)
    }
}

impl From<u32> for ElementIndex {
    fn from(value: u32) -> Self {
        ElementIndex(value)
    }
}

/// The four kinds of graph elements, each persisted by its own store.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub enum ElementKind {
    /// Road junctions and shape-relevant nodes.
    Vertex,
    /// Directed road segments between two vertices.
    Edge,
    /// Named locations (cities, POIs).
    Place,
    /// Turn relations and other multi-member relations.
    Relation,
}

impl ElementKind {
    /// All kinds in persistence order.
    pub const ALL: [ElementKind; 4] = [
        ElementKind::Vertex,
        ElementKind::Edge,
        ElementKind::Place,
        ElementKind::Relation,
    ];

    /// Stream-name prefix used for this kind's attributes.
    pub const fn prefix(self) -> &'static str {
        match self {
            ElementKind::Vertex => "vertex",
            ElementKind::Edge => "edge",
            ElementKind::Place => "place",
            ElementKind::Relation => "relation",
        }
    }

    /// Returns the kind owning a stream name such as `edge.shape`.
    pub fn of_stream(name: &str) -> Option<ElementKind> {
        let prefix = name.split('.').next()?;
        ElementKind::ALL
            .into_iter()
            .find(|kind| kind.prefix() == prefix)
    }
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.prefix())
    }
}

/// Scale of the fixed-point coordinate encoding (1e-7 degrees).
pub const COORD_SCALE: f64 = 10_000_000.0;

/// A location in 1e-7 degree fixed point.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, serde::Serialize, serde::Deserialize)]
pub struct Point {
    /// Latitude in 1e-7 degrees.
    pub lat_e7: i32,
    /// Longitude in 1e-7 degrees.
    pub lon_e7: i32,
}

impl Point {
    /// Reserved null sentinel for absent locations.
    pub const NULL: Point = Point {
        lat_e7: i32::MIN,
        lon_e7: i32::MIN,
    };

    /// Creates a point from fixed-point coordinates.
    pub const fn new(lat_e7: i32, lon_e7: i32) -> Self {
        Self { lat_e7, lon_e7 }
    }

    /// Creates a point from floating-point degrees.
    pub fn from_degrees(lat: f64, lon: f64) -> Self {
        Self {
            lat_e7: (lat * COORD_SCALE).round() as i32,
            lon_e7: (lon * COORD_SCALE).round() as i32,
        }
    }

    /// Latitude in degrees.
    pub fn lat(self) -> f64 {
        self.lat_e7 as f64 / COORD_SCALE
    }

    /// Longitude in degrees.
    pub fn lon(self) -> f64 {
        self.lon_e7 as f64 / COORD_SCALE
    }

    /// Returns true for the null sentinel.
    pub fn is_null(self) -> bool {
        self == Point::NULL
    }
}

/// Geographic bounding rectangle.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, serde::Serialize, serde::Deserialize)]
pub struct Rect {
    /// South-west corner.
    pub min: Point,
    /// North-east corner.
    pub max: Point,
}

impl Rect {
    /// Creates a rectangle from two corners.
    pub const fn new(min: Point, max: Point) -> Self {
        Self { min, max }
    }

    /// Rectangle covering exactly one point.
    pub fn of_point(point: Point) -> Self {
        Self {
            min: point,
            max: point,
        }
    }

    /// Grows the rectangle to include `point`.
    pub fn expand(&mut self, point: Point) {
        self.min.lat_e7 = self.min.lat_e7.min(point.lat_e7);
        self.min.lon_e7 = self.min.lon_e7.min(point.lon_e7);
        self.max.lat_e7 = self.max.lat_e7.max(point.lat_e7);
        self.max.lon_e7 = self.max.lon_e7.max(point.lon_e7);
    }

    /// Returns true when `point` lies inside or on the border.
    pub fn contains(&self, point: Point) -> bool {
        point.lat_e7 >= self.min.lat_e7
            && point.lat_e7 <= self.max.lat_e7
            && point.lon_e7 >= self.min.lon_e7
            && point.lon_e7 <= self.max.lon_e7
    }
}

/// Errors surfaced by the storage and caching layer.
#[derive(thiserror::Error, Debug)]
pub enum RoadError {
    /// Underlying file system failure.
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    /// A value exceeds the fixed-width capacity of its encoding.
    #[error("capacity exceeded for {what}: {len} > {max}")]
    Capacity {
        /// What was being stored.
        what: &'static str,
        /// Requested size.
        len: usize,
        /// Maximum the encoding allows.
        max: usize,
    },
    /// An index or id outside the populated range.
    #[error("{what} index {index} out of range (len {len})")]
    IndexOutOfRange {
        /// What was being addressed.
        what: &'static str,
        /// Requested index.
        index: u64,
        /// Number of populated entries.
        len: u64,
    },
    /// Operation invoked from a lifecycle state that forbids it.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// The graph failed its own validity check.
    #[error("graph problem: {0}")]
    Problem(String),
    /// A persisted value failed a sanity check on read.
    #[error("corruption: {0}")]
    Corruption(String),
    /// The archive was written by a format version this build does not read.
    #[error("unsupported archive version {found} (supported: {supported})")]
    UnsupportedVersion {
        /// Version recorded in the archive.
        found: u16,
        /// Version this build understands.
        supported: u16,
    },
    /// Unknown stream or attribute.
    #[error("not found: {0}")]
    NotFound(String),
    /// Invalid argument.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, RoadError>;

impl RoadError {
    pub(crate) fn corruption(msg: impl Into<String>) -> Self {
        RoadError::Corruption(msg.into())
    }

    pub(crate) fn invalid_state(msg: impl Into<String>) -> Self {
        RoadError::InvalidState(msg.into())
    }
}
