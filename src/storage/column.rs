//! Typed attribute columns and their on-disk encodings.
//!
//! A column holds one value per element index. Absent entries use a reserved
//! sentinel of the value's primitive encoding; variable-length kinds encode
//! absence in their length prefix.

use std::convert::TryFrom;
use std::fmt;

use crate::primitives::bytes::{buf::Cursor, le, var};
use crate::types::{Point, Result, RoadError};

/// Null sentinel for [`ColumnKind::Long`].
pub const NULL_LONG: i64 = i64::MIN;
/// Null sentinel for [`ColumnKind::Int`].
pub const NULL_INT: i32 = i32::MIN;
/// Null sentinel for [`ColumnKind::Byte`] and [`ColumnKind::Percent`].
pub const NULL_BYTE: u8 = u8::MAX;
/// Largest legal [`ColumnKind::Percent`] value.
pub const MAX_PERCENT: u8 = 100;

const NULL_TEXT_LEN: u32 = u32::MAX;

/// A `(key, value)` tag pair.
pub type Tag = (String, String);

/// Primitive encoding of a column.
#[repr(u8)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    /// Signed 64-bit integers.
    Long = 1,
    /// Signed 32-bit integers.
    Int = 2,
    /// Unsigned bytes.
    Byte = 3,
    /// Percentages in `0..=100`.
    Percent = 4,
    /// Fixed-point locations.
    Point = 5,
    /// UTF-8 strings.
    Text = 6,
    /// Polylines.
    Shape = 7,
    /// Key/value tag lists.
    Tags = 8,
}

impl ColumnKind {
    /// Stable one-byte code written to the stream table.
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Lower-case display name.
    pub const fn name(self) -> &'static str {
        match self {
            ColumnKind::Long => "long",
            ColumnKind::Int => "int",
            ColumnKind::Byte => "byte",
            ColumnKind::Percent => "percent",
            ColumnKind::Point => "point",
            ColumnKind::Text => "text",
            ColumnKind::Shape => "shape",
            ColumnKind::Tags => "tags",
        }
    }
}

impl TryFrom<u8> for ColumnKind {
    type Error = RoadError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(ColumnKind::Long),
            2 => Ok(ColumnKind::Int),
            3 => Ok(ColumnKind::Byte),
            4 => Ok(ColumnKind::Percent),
            5 => Ok(ColumnKind::Point),
            6 => Ok(ColumnKind::Text),
            7 => Ok(ColumnKind::Shape),
            8 => Ok(ColumnKind::Tags),
            other => Err(RoadError::corruption(format!("unknown column kind {other}"))),
        }
    }
}

impl fmt::Display for ColumnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A single attribute value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Value {
    /// See [`ColumnKind::Long`].
    Long(i64),
    /// See [`ColumnKind::Int`].
    Int(i32),
    /// See [`ColumnKind::Byte`].
    Byte(u8),
    /// See [`ColumnKind::Percent`].
    Percent(u8),
    /// See [`ColumnKind::Point`].
    Point(Point),
    /// See [`ColumnKind::Text`].
    Text(String),
    /// See [`ColumnKind::Shape`].
    Shape(Vec<Point>),
    /// See [`ColumnKind::Tags`].
    Tags(Vec<Tag>),
}

impl Value {
    /// Encoding this value requires.
    pub fn kind(&self) -> ColumnKind {
        match self {
            Value::Long(_) => ColumnKind::Long,
            Value::Int(_) => ColumnKind::Int,
            Value::Byte(_) => ColumnKind::Byte,
            Value::Percent(_) => ColumnKind::Percent,
            Value::Point(_) => ColumnKind::Point,
            Value::Text(_) => ColumnKind::Text,
            Value::Shape(_) => ColumnKind::Shape,
            Value::Tags(_) => ColumnKind::Tags,
        }
    }
}

/// One attribute column.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Column {
    /// See [`ColumnKind::Long`].
    Long(Vec<i64>),
    /// See [`ColumnKind::Int`].
    Int(Vec<i32>),
    /// See [`ColumnKind::Byte`].
    Byte(Vec<u8>),
    /// See [`ColumnKind::Percent`].
    Percent(Vec<u8>),
    /// See [`ColumnKind::Point`].
    Point(Vec<Point>),
    /// See [`ColumnKind::Text`].
    Text(Vec<Option<String>>),
    /// See [`ColumnKind::Shape`].
    Shape(Vec<Option<Vec<Point>>>),
    /// See [`ColumnKind::Tags`].
    Tags(Vec<Option<Vec<Tag>>>),
}

impl Column {
    /// Creates an empty column of the given kind.
    pub fn new(kind: ColumnKind) -> Self {
        match kind {
            ColumnKind::Long => Column::Long(Vec::new()),
            ColumnKind::Int => Column::Int(Vec::new()),
            ColumnKind::Byte => Column::Byte(Vec::new()),
            ColumnKind::Percent => Column::Percent(Vec::new()),
            ColumnKind::Point => Column::Point(Vec::new()),
            ColumnKind::Text => Column::Text(Vec::new()),
            ColumnKind::Shape => Column::Shape(Vec::new()),
            ColumnKind::Tags => Column::Tags(Vec::new()),
        }
    }

    /// Encoding of this column.
    pub fn kind(&self) -> ColumnKind {
        match self {
            Column::Long(_) => ColumnKind::Long,
            Column::Int(_) => ColumnKind::Int,
            Column::Byte(_) => ColumnKind::Byte,
            Column::Percent(_) => ColumnKind::Percent,
            Column::Point(_) => ColumnKind::Point,
            Column::Text(_) => ColumnKind::Text,
            Column::Shape(_) => ColumnKind::Shape,
            Column::Tags(_) => ColumnKind::Tags,
        }
    }

    /// Number of entries, including null ones.
    pub fn len(&self) -> usize {
        match self {
            Column::Long(v) => v.len(),
            Column::Int(v) => v.len(),
            Column::Byte(v) | Column::Percent(v) => v.len(),
            Column::Point(v) => v.len(),
            Column::Text(v) => v.len(),
            Column::Shape(v) => v.len(),
            Column::Tags(v) => v.len(),
        }
    }

    /// Returns true when the column has no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Pads the column with null entries up to `len`.
    pub fn ensure_len(&mut self, len: usize) {
        if self.len() >= len {
            return;
        }
        match self {
            Column::Long(v) => v.resize(len, NULL_LONG),
            Column::Int(v) => v.resize(len, NULL_INT),
            Column::Byte(v) | Column::Percent(v) => v.resize(len, NULL_BYTE),
            Column::Point(v) => v.resize(len, Point::NULL),
            Column::Text(v) => v.resize(len, None),
            Column::Shape(v) => v.resize(len, None),
            Column::Tags(v) => v.resize(len, None),
        }
    }

    /// Stores `value` at `index`, growing the column with nulls as needed.
    pub fn set(&mut self, index: usize, value: Value) -> Result<()> {
        if value.kind() != self.kind() {
            return Err(RoadError::invalid_state(format!(
                "cannot store {} value in {} column",
                value.kind(),
                self.kind()
            )));
        }
        if let Value::Percent(p) = value {
            if p > MAX_PERCENT {
                return Err(RoadError::Capacity {
                    what: "percent value",
                    len: p as usize,
                    max: MAX_PERCENT as usize,
                });
            }
        }
        self.ensure_len(index + 1);
        match (self, value) {
            (Column::Long(v), Value::Long(x)) => v[index] = x,
            (Column::Int(v), Value::Int(x)) => v[index] = x,
            (Column::Byte(v), Value::Byte(x)) | (Column::Percent(v), Value::Percent(x)) => {
                v[index] = x
            }
            (Column::Point(v), Value::Point(x)) => v[index] = x,
            (Column::Text(v), Value::Text(x)) => v[index] = Some(x),
            (Column::Shape(v), Value::Shape(x)) => v[index] = Some(x),
            (Column::Tags(v), Value::Tags(x)) => v[index] = Some(x),
            _ => unreachable!("kinds checked above"),
        }
        Ok(())
    }

    /// Resets the entry at `index` to null (no-op past the end).
    pub fn set_null(&mut self, index: usize) {
        if index >= self.len() {
            return;
        }
        match self {
            Column::Long(v) => v[index] = NULL_LONG,
            Column::Int(v) => v[index] = NULL_INT,
            Column::Byte(v) | Column::Percent(v) => v[index] = NULL_BYTE,
            Column::Point(v) => v[index] = Point::NULL,
            Column::Text(v) => v[index] = None,
            Column::Shape(v) => v[index] = None,
            Column::Tags(v) => v[index] = None,
        }
    }

    /// Returns the value at `index`, or `None` for null and unpopulated entries.
    pub fn get(&self, index: usize) -> Option<Value> {
        match self {
            Column::Long(v) => v
                .get(index)
                .copied()
                .filter(|x| *x != NULL_LONG)
                .map(Value::Long),
            Column::Int(v) => v
                .get(index)
                .copied()
                .filter(|x| *x != NULL_INT)
                .map(Value::Int),
            Column::Byte(v) => v
                .get(index)
                .copied()
                .filter(|x| *x != NULL_BYTE)
                .map(Value::Byte),
            Column::Percent(v) => v
                .get(index)
                .copied()
                .filter(|x| *x != NULL_BYTE)
                .map(Value::Percent),
            Column::Point(v) => v
                .get(index)
                .copied()
                .filter(|p| !p.is_null())
                .map(Value::Point),
            Column::Text(v) => v.get(index).cloned().flatten().map(Value::Text),
            Column::Shape(v) => v.get(index).cloned().flatten().map(Value::Shape),
            Column::Tags(v) => v.get(index).cloned().flatten().map(Value::Tags),
        }
    }

    /// Raw `i64` entries (null entries hold [`NULL_LONG`]).
    pub fn longs(&self) -> Result<&[i64]> {
        match self {
            Column::Long(v) => Ok(v),
            other => Err(kind_mismatch(ColumnKind::Long, other.kind())),
        }
    }

    /// Raw `i32` entries (null entries hold [`NULL_INT`]).
    pub fn ints(&self) -> Result<&[i32]> {
        match self {
            Column::Int(v) => Ok(v),
            other => Err(kind_mismatch(ColumnKind::Int, other.kind())),
        }
    }

    /// Raw location entries (null entries hold [`Point::NULL`]).
    pub fn points(&self) -> Result<&[Point]> {
        match self {
            Column::Point(v) => Ok(v),
            other => Err(kind_mismatch(ColumnKind::Point, other.kind())),
        }
    }

    /// Polyline entries.
    pub fn shapes(&self) -> Result<&[Option<Vec<Point>>]> {
        match self {
            Column::Shape(v) => Ok(v),
            other => Err(kind_mismatch(ColumnKind::Shape, other.kind())),
        }
    }

    /// Approximate resident size in bytes.
    pub fn heap_bytes(&self) -> usize {
        match self {
            Column::Long(v) => v.capacity() * 8,
            Column::Int(v) => v.capacity() * 4,
            Column::Byte(v) | Column::Percent(v) => v.capacity(),
            Column::Point(v) => v.capacity() * 8,
            Column::Text(v) => {
                v.capacity() * std::mem::size_of::<Option<String>>()
                    + v.iter().flatten().map(String::capacity).sum::<usize>()
            }
            Column::Shape(v) => {
                v.capacity() * std::mem::size_of::<Option<Vec<Point>>>()
                    + v.iter().flatten().map(|s| s.capacity() * 8).sum::<usize>()
            }
            Column::Tags(v) => {
                v.capacity() * std::mem::size_of::<Option<Vec<Tag>>>()
                    + v.iter()
                        .flatten()
                        .flat_map(|tags| tags.iter())
                        .map(|(k, val)| k.capacity() + val.capacity() + 48)
                        .sum::<usize>()
            }
        }
    }

    /// Appends the payload encoding of this column to `out`.
    pub fn encode(&self, out: &mut Vec<u8>) {
        match self {
            Column::Long(v) => v.iter().for_each(|x| le::put_i64(out, *x)),
            Column::Int(v) => v.iter().for_each(|x| le::put_i32(out, *x)),
            Column::Byte(v) | Column::Percent(v) => out.extend_from_slice(v),
            Column::Point(v) => v.iter().for_each(|p| put_point(out, *p)),
            Column::Text(v) => {
                for entry in v {
                    match entry {
                        Some(s) => le::put_str(out, s),
                        None => le::put_u32(out, NULL_TEXT_LEN),
                    }
                }
            }
            Column::Shape(v) => {
                for entry in v {
                    match entry {
                        Some(points) => {
                            var::encode_u64(points.len() as u64 + 1, out);
                            let mut prev = Point::new(0, 0);
                            for p in points {
                                var::encode_i64(p.lat_e7 as i64 - prev.lat_e7 as i64, out);
                                var::encode_i64(p.lon_e7 as i64 - prev.lon_e7 as i64, out);
                                prev = *p;
                            }
                        }
                        None => var::encode_u64(0, out),
                    }
                }
            }
            Column::Tags(v) => {
                for entry in v {
                    match entry {
                        Some(tags) => {
                            var::encode_u64(tags.len() as u64 + 1, out);
                            for (k, val) in tags {
                                var::encode_str(k, out);
                                var::encode_str(val, out);
                            }
                        }
                        None => var::encode_u64(0, out),
                    }
                }
            }
        }
    }

    /// Decodes a payload holding exactly `len` entries.
    pub fn decode(kind: ColumnKind, bytes: &[u8], len: usize) -> Result<Self> {
        let mut cur = Cursor::new(bytes);
        let column = match kind {
            ColumnKind::Long => {
                expect_fixed(kind, bytes, len, 8)?;
                Column::Long(collect(len, || cur.i64())?)
            }
            ColumnKind::Int => {
                expect_fixed(kind, bytes, len, 4)?;
                Column::Int(collect(len, || cur.i32())?)
            }
            ColumnKind::Byte => {
                expect_fixed(kind, bytes, len, 1)?;
                Column::Byte(cur.take(len)?.to_vec())
            }
            ColumnKind::Percent => {
                expect_fixed(kind, bytes, len, 1)?;
                let values = cur.take(len)?.to_vec();
                if let Some(bad) = values
                    .iter()
                    .position(|v| *v > MAX_PERCENT && *v != NULL_BYTE)
                {
                    return Err(RoadError::corruption(format!(
                        "percent value {} out of range at index {bad}",
                        values[bad]
                    )));
                }
                Column::Percent(values)
            }
            ColumnKind::Point => {
                expect_fixed(kind, bytes, len, 8)?;
                Column::Point(collect(len, || read_point(&mut cur))?)
            }
            ColumnKind::Text => Column::Text(collect(len, || {
                let n = cur.u32()?;
                if n == NULL_TEXT_LEN {
                    return Ok(None);
                }
                cur.take(n as usize).and_then(|body| {
                    String::from_utf8(body.to_vec())
                        .map(Some)
                        .map_err(|_| RoadError::corruption("text value not valid UTF-8"))
                })
            })?),
            ColumnKind::Shape => Column::Shape(collect(len, || {
                let n = cur.var_u64()?;
                if n == 0 {
                    return Ok(None);
                }
                let mut prev = (0i64, 0i64);
                let points = collect(checked_count(n - 1, cur.remaining())?, || {
                    prev.0 += cur.var_i64()?;
                    prev.1 += cur.var_i64()?;
                    Ok(Point::new(to_coord(prev.0)?, to_coord(prev.1)?))
                })?;
                Ok(Some(points))
            })?),
            ColumnKind::Tags => Column::Tags(collect(len, || {
                let n = cur.var_u64()?;
                if n == 0 {
                    return Ok(None);
                }
                let tags = collect(checked_count(n - 1, cur.remaining())?, || {
                    let key = cur.var_str()?.to_owned();
                    let value = cur.var_str()?.to_owned();
                    Ok((key, value))
                })?;
                Ok(Some(tags))
            })?),
        };
        if !cur.is_exhausted() {
            return Err(RoadError::corruption(format!(
                "{kind} column has {} trailing bytes",
                cur.remaining()
            )));
        }
        Ok(column)
    }
}

fn kind_mismatch(expected: ColumnKind, found: ColumnKind) -> RoadError {
    RoadError::invalid_state(format!("expected {expected} column, found {found}"))
}

fn expect_fixed(kind: ColumnKind, bytes: &[u8], len: usize, width: usize) -> Result<()> {
    let expected = len
        .checked_mul(width)
        .ok_or_else(|| RoadError::corruption("column length overflow"))?;
    if bytes.len() != expected {
        return Err(RoadError::corruption(format!(
            "{kind} column holds {} bytes, expected {expected} for {len} entries",
            bytes.len()
        )));
    }
    Ok(())
}

// Every entry consumes at least one byte, so counts above the remaining
// payload can only come from a corrupt length prefix.
fn checked_count(n: u64, remaining: usize) -> Result<usize> {
    match usize::try_from(n) {
        Ok(n) if n <= remaining => Ok(n),
        _ => Err(RoadError::corruption(format!(
            "entry count {n} exceeds remaining payload"
        ))),
    }
}

fn to_coord(v: i64) -> Result<i32> {
    i32::try_from(v).map_err(|_| RoadError::corruption("shape coordinate out of range"))
}

fn collect<T>(len: usize, mut next: impl FnMut() -> Result<T>) -> Result<Vec<T>> {
    let mut out = Vec::with_capacity(len);
    for _ in 0..len {
        out.push(next()?);
    }
    Ok(out)
}

fn put_point(out: &mut Vec<u8>, p: Point) {
    le::put_i32(out, p.lat_e7);
    le::put_i32(out, p.lon_e7);
}

fn read_point(cur: &mut Cursor<'_>) -> Result<Point> {
    let lat = cur.i32()?;
    let lon = cur.i32()?;
    Ok(Point::new(lat, lon))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reencode(column: &Column) -> Column {
        let mut buf = Vec::new();
        column.encode(&mut buf);
        Column::decode(column.kind(), &buf, column.len()).unwrap()
    }

    #[test]
    fn set_pads_with_null_sentinels() {
        let mut col = Column::new(ColumnKind::Long);
        col.set(3, Value::Long(42)).unwrap();
        assert_eq!(col.len(), 4);
        assert_eq!(col.longs().unwrap()[0], NULL_LONG);
        assert_eq!(col.get(0), None);
        assert_eq!(col.get(3), Some(Value::Long(42)));
        assert_eq!(col.get(10), None);
    }

    #[test]
    fn set_rejects_mismatched_kind() {
        let mut col = Column::new(ColumnKind::Int);
        let err = col.set(0, Value::Long(1)).unwrap_err();
        assert!(matches!(err, RoadError::InvalidState(_)));
    }

    #[test]
    fn percent_above_hundred_is_capacity_violation() {
        let mut col = Column::new(ColumnKind::Percent);
        col.set(0, Value::Percent(100)).unwrap();
        assert!(matches!(
            col.set(1, Value::Percent(101)),
            Err(RoadError::Capacity { .. })
        ));
    }

    #[test]
    fn corrupt_percent_is_rejected_on_decode() {
        let bytes = [10u8, NULL_BYTE, 150];
        let err = Column::decode(ColumnKind::Percent, &bytes, 3).unwrap_err();
        assert!(matches!(err, RoadError::Corruption(_)));
    }

    #[test]
    fn variable_width_columns_keep_nulls() {
        let mut shapes = Column::new(ColumnKind::Shape);
        shapes
            .set(
                1,
                Value::Shape(vec![Point::new(-10, 20), Point::new(5, -900_000_000)]),
            )
            .unwrap();
        shapes.ensure_len(3);
        assert_eq!(reencode(&shapes), shapes);

        let mut tags = Column::new(ColumnKind::Tags);
        tags.set(0, Value::Tags(vec![("highway".into(), "primary".into())]))
            .unwrap();
        tags.set(2, Value::Tags(Vec::new())).unwrap();
        let decoded = reencode(&tags);
        assert_eq!(decoded.get(1), None);
        assert_eq!(decoded.get(2), Some(Value::Tags(Vec::new())));

        let mut text = Column::new(ColumnKind::Text);
        text.set(1, Value::Text("Bahnhofstrasse".into())).unwrap();
        assert_eq!(reencode(&text).get(1), Some(Value::Text("Bahnhofstrasse".into())));
        assert_eq!(reencode(&text).get(0), None);
    }

    #[test]
    fn decode_rejects_wrong_entry_count() {
        let mut col = Column::new(ColumnKind::Point);
        col.set(1, Value::Point(Point::new(1, 2))).unwrap();
        let mut buf = Vec::new();
        col.encode(&mut buf);
        assert!(Column::decode(ColumnKind::Point, &buf, 3).is_err());
        assert!(Column::decode(ColumnKind::Text, &[0, 0, 0, 0, 9], 1).is_err());
    }

    #[test]
    fn unknown_kind_code_is_corruption() {
        assert!(matches!(
            ColumnKind::try_from(42),
            Err(RoadError::Corruption(_))
        ));
        assert_eq!(ColumnKind::try_from(7).unwrap(), ColumnKind::Shape);
    }
}
