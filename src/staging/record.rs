//! Per-record encodings of the four staging sub-stores.
//!
//! | sub-store | entry |
//! |---|---|
//! | `ids` | id, u64 LE |
//! | `spatial` | lat_e7, lon_e7, i32 LE each |
//! | `tags` | varint count, then varint-prefixed key and value strings |
//! | `meta` | tag byte, then zigzag changeset and timestamp deltas, revision, user |
//!
//! Meta tag bytes: `0` no metadata, `1` full record, `2` same user as the
//! previous record with metadata in the cell (user fields omitted). Deltas are
//! taken against that same previous record.

use serde::{Deserialize, Serialize};

use crate::primitives::bytes::{buf::Cursor, le, var};
use crate::storage::column::Tag;
use crate::types::{ElementId, Point, Result, RoadError};

/// Width of one `ids` entry.
pub const ID_WIDTH: usize = 8;
/// Width of one `spatial` entry.
pub const SPATIAL_WIDTH: usize = 8;

const META_NONE: u8 = 0;
const META_FULL: u8 = 1;
const META_SAME_USER: u8 = 2;

/// Edit history of a source node.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct RevisionMeta {
    /// Changeset of the last edit.
    pub changeset: i64,
    /// Revision number.
    pub revision: i32,
    /// Edit timestamp in unix seconds.
    pub timestamp: i64,
    /// Id of the editing user.
    pub user_id: i64,
    /// Name of the editing user.
    pub user_name: String,
}

/// A raw node as delivered by the source reader.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RawNode {
    /// Source identifier.
    pub id: ElementId,
    /// Location.
    pub location: Point,
    /// Source tags.
    pub tags: Vec<Tag>,
    /// Edit history, when the source carries it.
    pub meta: Option<RevisionMeta>,
}

impl RawNode {
    /// A node without tags or metadata.
    pub fn new(id: impl Into<ElementId>, location: Point) -> Self {
        Self {
            id: id.into(),
            location,
            tags: Vec::new(),
            meta: None,
        }
    }

    /// Adds a tag.
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.push((key.into(), value.into()));
        self
    }

    /// Sets the edit history.
    pub fn with_meta(mut self, meta: RevisionMeta) -> Self {
        self.meta = Some(meta);
        self
    }
}

/// Delta reference carried from one meta record to the next within a cell.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct MetaState {
    changeset: i64,
    timestamp: i64,
    user: Option<(i64, String)>,
}

impl MetaState {
    /// Appends the meta entry of `meta` and advances the state.
    pub fn encode(&mut self, meta: Option<&RevisionMeta>, out: &mut Vec<u8>) {
        let Some(meta) = meta else {
            le::put_u8(out, META_NONE);
            return;
        };
        let same_user = self
            .user
            .as_ref()
            .map_or(false, |(id, name)| *id == meta.user_id && *name == meta.user_name);
        le::put_u8(out, if same_user { META_SAME_USER } else { META_FULL });
        var::encode_i64(meta.changeset.wrapping_sub(self.changeset), out);
        var::encode_i64(meta.timestamp.wrapping_sub(self.timestamp), out);
        var::encode_i64(meta.revision as i64, out);
        if !same_user {
            var::encode_i64(meta.user_id, out);
            var::encode_str(&meta.user_name, out);
            self.user = Some((meta.user_id, meta.user_name.clone()));
        }
        self.changeset = meta.changeset;
        self.timestamp = meta.timestamp;
    }

    /// Reads one meta entry and advances the state.
    pub fn decode(&mut self, cur: &mut Cursor<'_>) -> Result<Option<RevisionMeta>> {
        let tag = cur.u8()?;
        if tag == META_NONE {
            return Ok(None);
        }
        if tag != META_FULL && tag != META_SAME_USER {
            return Err(RoadError::corruption(format!("unknown meta tag {tag}")));
        }
        let changeset = self.changeset.wrapping_add(cur.var_i64()?);
        let timestamp = self.timestamp.wrapping_add(cur.var_i64()?);
        let revision = i32::try_from(cur.var_i64()?)
            .map_err(|_| RoadError::corruption("revision out of range"))?;
        let (user_id, user_name) = if tag == META_FULL {
            let user = (cur.var_i64()?, cur.var_str()?.to_owned());
            self.user = Some(user.clone());
            user
        } else {
            self.user
                .clone()
                .ok_or_else(|| RoadError::corruption("same-user meta without a previous user"))?
        };
        self.changeset = changeset;
        self.timestamp = timestamp;
        Ok(Some(RevisionMeta {
            changeset,
            revision,
            timestamp,
            user_id,
            user_name,
        }))
    }
}

/// Appends an `ids` entry.
pub fn encode_id(id: ElementId, out: &mut Vec<u8>) {
    le::put_u64(out, id.0);
}

/// Appends a `spatial` entry.
pub fn encode_location(point: Point, out: &mut Vec<u8>) {
    le::put_i32(out, point.lat_e7);
    le::put_i32(out, point.lon_e7);
}

/// Appends a `tags` entry.
pub fn encode_tags(tags: &[Tag], out: &mut Vec<u8>) {
    var::encode_u64(tags.len() as u64, out);
    for (key, value) in tags {
        var::encode_str(key, out);
        var::encode_str(value, out);
    }
}

/// Reads a `tags` entry.
pub fn decode_tags(cur: &mut Cursor<'_>) -> Result<Vec<Tag>> {
    let count = cur.var_u64()?;
    if count > cur.remaining() as u64 {
        return Err(RoadError::corruption("tag count exceeds remaining bytes"));
    }
    let mut tags = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let key = cur.var_str()?.to_owned();
        let value = cur.var_str()?.to_owned();
        tags.push((key, value));
    }
    Ok(tags)
}

/// Reads a `spatial` entry.
pub fn decode_location(cur: &mut Cursor<'_>) -> Result<Point> {
    let lat = cur.i32()?;
    let lon = cur.i32()?;
    Ok(Point::new(lat, lon))
}
