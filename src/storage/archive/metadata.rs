//! The metadata record read before any element data is touched.

use serde::Serialize;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::primitives::bytes::{buf::Cursor, le};
use crate::types::{block_crc32, ElementKind, Point, Rect, Result, RoadError};


/// Describes where a graph's data came from.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct Descriptor {
    /// Data supplier, e.g. `OpenStreetMap`.
    pub supplier: String,
    /// Source format, e.g. `PBF`.
    pub format: String,
    /// Specification the graph was built against.
    pub specification: String,
    /// Optional dataset name.
    pub name: Option<String>,
    /// Optional dataset version.
    pub version: Option<String>,
    /// Optional build identifier.
    pub build: Option<String>,
}

impl Descriptor {
    /// Creates a descriptor from its required fields.
    pub fn new(
        supplier: impl Into<String>,
        format: impl Into<String>,
        specification: impl Into<String>,
    ) -> Self {
        Self {
            supplier: supplier.into(),
            format: format.into(),
            specification: specification.into(),
            ..Self::default()
        }
    }

    /// Sets the dataset name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the dataset version.
    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }
}

/// An element count that may be an estimate.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct Count {
    /// Number of elements.
    pub value: u64,
    /// False when the count was estimated rather than counted.
    pub exact: bool,
}

impl Count {
    /// An exact count.
    pub const fn exact(value: u64) -> Self {
        Self { value, exact: true }
    }

    /// An estimated count.
    pub const fn estimated(value: u64) -> Self {
        Self {
            value,
            exact: false,
        }
    }
}

/// Per-kind element counts.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Serialize)]
pub struct ElementCounts {
    /// Vertex count.
    pub vertices: Count,
    /// Edge count.
    pub edges: Count,
    /// Place count.
    pub places: Count,
    /// Relation count.
    pub relations: Count,
}

impl ElementCounts {
    /// Count for one kind.
    pub fn get(&self, kind: ElementKind) -> Count {
        match kind {
            ElementKind::Vertex => self.vertices,
            ElementKind::Edge => self.edges,
            ElementKind::Place => self.places,
            ElementKind::Relation => self.relations,
        }
    }

    /// Mutable count for one kind.
    pub fn get_mut(&mut self, kind: ElementKind) -> &mut Count {
        match kind {
            ElementKind::Vertex => &mut self.vertices,
            ElementKind::Edge => &mut self.edges,
            ElementKind::Place => &mut self.places,
            ElementKind::Relation => &mut self.relations,
        }
    }
}

/// Metadata block of an archive.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct Metadata {
    /// Origin of the data.
    pub descriptor: Descriptor,
    /// Element counts.
    pub counts: ElementCounts,
    /// Geographic bounds, absent for graphs without located elements.
    pub bounds: Option<Rect>,
    /// Build time in unix seconds.
    pub built_at_unix: i64,
}

impl Metadata {
    /// Creates metadata stamped with the current time.
    pub fn new(descriptor: Descriptor, counts: ElementCounts, bounds: Option<Rect>) -> Self {
        Self {
            descriptor,
            counts,
            bounds,
            built_at_unix: OffsetDateTime::now_utc().unix_timestamp(),
        }
    }

    /// Build time, if representable.
    pub fn built_at(&self) -> Option<OffsetDateTime> {
        OffsetDateTime::from_unix_timestamp(self.built_at_unix).ok()
    }

    /// Build time formatted as RFC 3339.
    pub fn built_at_rfc3339(&self) -> Option<String> {
        self.built_at().and_then(|t| t.format(&Rfc3339).ok())
    }

    /// Encodes the block followed by its checksum.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(128);
        let d = &self.descriptor;
        le::put_str(&mut out, &d.supplier);
        le::put_str(&mut out, &d.format);
        le::put_str(&mut out, &d.specification);
        put_opt_str(&mut out, d.name.as_deref());
        put_opt_str(&mut out, d.version.as_deref());
        put_opt_str(&mut out, d.build.as_deref());
        for kind in ElementKind::ALL {
            let count = self.counts.get(kind);
            le::put_u64(&mut out, count.value);
            le::put_u8(&mut out, count.exact as u8);
        }
        match self.bounds {
            Some(rect) => {
                le::put_u8(&mut out, 1);
                for p in [rect.min, rect.max] {
                    le::put_i32(&mut out, p.lat_e7);
                    le::put_i32(&mut out, p.lon_e7);
                }
            }
            None => le::put_u8(&mut out, 0),
        }
        le::put_i64(&mut out, self.built_at_unix);
        let crc = block_crc32(&out);
        le::put_u32(&mut out, crc);
        out
    }

    /// Decodes and verifies a block produced by [`Metadata::encode`].
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < 4 {
            return Err(RoadError::corruption("metadata block truncated"));
        }
        let (body, crc) = bytes.split_at(bytes.len() - 4);
        if Cursor::new(crc).u32()? != block_crc32(body) {
            return Err(RoadError::corruption("metadata checksum mismatch"));
        }
        let mut cur = Cursor::new(body);
        let descriptor = Descriptor {
            supplier: cur.str()?.to_owned(),
            format: cur.str()?.to_owned(),
            specification: cur.str()?.to_owned(),
            name: opt_str(&mut cur)?,
            version: opt_str(&mut cur)?,
            build: opt_str(&mut cur)?,
        };
        let mut counts = ElementCounts::default();
        for kind in ElementKind::ALL {
            let value = cur.u64()?;
            let exact = flag(cur.u8()?)?;
            *counts.get_mut(kind) = Count { value, exact };
        }
        let bounds = if flag(cur.u8()?)? {
            let min = Point::new(cur.i32()?, cur.i32()?);
            let max = Point::new(cur.i32()?, cur.i32()?);
            Some(Rect::new(min, max))
        } else {
            None
        };
        let built_at_unix = cur.i64()?;
        if !cur.is_exhausted() {
            return Err(RoadError::corruption("metadata block has trailing bytes"));
        }
        Ok(Self {
            descriptor,
            counts,
            bounds,
            built_at_unix,
        })
    }
}

fn put_opt_str(out: &mut Vec<u8>, value: Option<&str>) {
    match value {
        Some(s) => {
            le::put_u8(out, 1);
            le::put_str(out, s);
        }
        None => le::put_u8(out, 0),
    }
}

fn opt_str(cur: &mut Cursor<'_>) -> Result<Option<String>> {
    if flag(cur.u8()?)? {
        Ok(Some(cur.str()?.to_owned()))
    } else {
        Ok(None)
    }
}

fn flag(byte: u8) -> Result<bool> {
    match byte {
        0 => Ok(false),
        1 => Ok(true),
        other => Err(RoadError::corruption(format!("invalid flag byte {other}"))),
    }
}
