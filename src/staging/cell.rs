use std::fmt;

use crate::types::{Point, Result, RoadError, COORD_SCALE};

/// A coarse latitude/longitude grid bucket.
///
/// Keys order by latitude band first, then longitude, which is the order
/// cells are merged in.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct CellKey {
    /// Latitude band, `floor(lat / cell_degrees)`.
    pub lat: i32,
    /// Longitude band, `floor(lon / cell_degrees)`.
    pub lon: i32,
}

impl CellKey {
    /// Creates a key from band numbers.
    pub const fn new(lat: i32, lon: i32) -> Self {
        Self { lat, lon }
    }

    /// Cell containing `point` on a grid of `cell_e7` fixed-point units.
    ///
    /// Quantization uses integer floor division so the same location always
    /// maps to the same cell, including exactly on band borders.
    pub fn of(point: Point, cell_e7: i64) -> Self {
        Self {
            lat: (point.lat_e7 as i64).div_euclid(cell_e7) as i32,
            lon: (point.lon_e7 as i64).div_euclid(cell_e7) as i32,
        }
    }

    /// File name used by every sub-store for this cell.
    pub fn file_name(&self) -> String {
        format!(
            "cell_{}{}_{}{}.bin",
            if self.lat < 0 { 's' } else { 'n' },
            self.lat.unsigned_abs(),
            if self.lon < 0 { 'w' } else { 'e' },
            self.lon.unsigned_abs(),
        )
    }

    /// Parses a name produced by [`CellKey::file_name`].
    pub fn parse_file_name(name: &str) -> Option<Self> {
        let stem = name.strip_prefix("cell_")?.strip_suffix(".bin")?;
        let (lat, lon) = stem.split_once('_')?;
        Some(Self {
            lat: band(lat, 'n', 's')?,
            lon: band(lon, 'e', 'w')?,
        })
    }
}

fn band(text: &str, positive: char, negative: char) -> Option<i32> {
    let mut chars = text.chars();
    let sign = chars.next()?;
    let magnitude: i64 = chars.as_str().parse().ok()?;
    let value = match sign {
        c if c == positive => magnitude,
        c if c == negative => -magnitude,
        _ => return None,
    };
    i32::try_from(value).ok()
}

impl fmt::Display for CellKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.lat, self.lon)
    }
}

/// Converts a cell size in degrees to fixed-point units.
pub fn cell_units(cell_degrees: f64) -> Result<i64> {
    let units = (cell_degrees * COORD_SCALE).round();
    if !units.is_finite() || units < 1.0 || units > 3_600_000_000.0 {
        return Err(RoadError::Invalid("cell size must be within (0, 360] degrees"));
    }
    Ok(units as i64)
}
