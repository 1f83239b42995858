//! Quadtree tile addressing.
//!
//! Tiles subdivide a fixed logical rectangle (for the Mandelbrot viewer, a
//! region of the complex plane). Each subdivision picks one of four quadrants,
//! encoded as a base-4 digit:
//!
//! ```text
//!   ┌───┬───┐
//!   │ 0 │ 1 │      bit 0 = x parity
//!   ├───┼───┤      bit 1 = y parity
//!   │ 2 │ 3 │
//!   └───┴───┘
//! ```
//!
//! A tile id is `"0"` followed by one digit per zoom level, then `.png`.
//! The root tile is `"0.png"`; the lower-right tile at zoom 2 is `"033.png"`.
//! The format is shared with previously stored tiles, so it must not change.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::error::TileError;

/// File suffix carried by every tile id.
pub const TILE_SUFFIX: &str = ".png";

/// Deepest zoom level accepted. Below this, f64 rectangles stop subdividing exactly.
pub const MAX_ZOOM: u32 = 48;

/// Default tile edge length in pixels.
pub const DEFAULT_TILE_SIZE: u32 = 256;

// =============================================================================
// Tile Coordinate
// =============================================================================

/// A tile position in the `2^zoom x 2^zoom` grid.
///
/// Signed so that out-of-range inputs (e.g. negative pans) stay representable
/// and are rejected by [`tile_name`] instead of wrapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct TileCoord {
    pub x: i64,
    pub y: i64,
    pub zoom: u32,
}

impl TileCoord {
    pub fn new(x: i64, y: i64, zoom: u32) -> Self {
        Self { x, y, zoom }
    }

    /// Whether `zoom <= MAX_ZOOM` and `0 <= x, y < 2^zoom`.
    pub fn is_valid(&self) -> bool {
        if self.zoom > MAX_ZOOM {
            return false;
        }
        let side = 1i64 << self.zoom;
        (0..side).contains(&self.x) && (0..side).contains(&self.y)
    }

    /// Tile id for this coordinate, or `InvalidCoordinate`.
    pub fn tile_id(&self) -> Result<TileId, TileError> {
        tile_name(self.x, self.y, self.zoom).ok_or(TileError::InvalidCoordinate {
            x: self.x,
            y: self.y,
            zoom: self.zoom,
        })
    }
}

/// Map a grid coordinate to its tile id.
///
/// Returns `None` when `x` or `y` falls outside `0..2^zoom`, and for any
/// `zoom` above [`MAX_ZOOM`], where ids would outgrow `i64` coordinates and
/// `f64` rectangles.
pub fn tile_name(x: i64, y: i64, zoom: u32) -> Option<TileId> {
    if !TileCoord::new(x, y, zoom).is_valid() {
        return None;
    }

    let mut digits = Vec::with_capacity(zoom as usize);
    let (mut x, mut y) = (x, y);
    for _ in 0..zoom {
        let digit = 2 * (y & 1) + (x & 1);
        digits.push(b'0' + digit as u8);
        x >>= 1;
        y >>= 1;
    }
    digits.reverse();

    let mut id = String::with_capacity(1 + digits.len() + TILE_SUFFIX.len());
    id.push('0');
    // Digits are ASCII '0'..='3'
    id.extend(digits.iter().map(|&b| b as char));
    id.push_str(TILE_SUFFIX);
    Some(TileId(id))
}

// =============================================================================
// Tile Id
// =============================================================================

/// Canonical tile identifier, e.g. `"0213.png"`.
///
/// Only constructible through [`tile_name`] or [`TileId::parse`], so every
/// value is well formed.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct TileId(String);

impl TileId {
    /// The root tile, covering the whole space.
    pub fn root() -> Self {
        TileId(format!("0{}", TILE_SUFFIX))
    }

    /// Parse and validate a tile id string.
    pub fn parse(id: &str) -> Result<Self, TileError> {
        let invalid = |reason| TileError::InvalidTileId {
            id: id.to_string(),
            reason,
        };

        let stem = id
            .strip_suffix(TILE_SUFFIX)
            .ok_or_else(|| invalid("missing .png suffix"))?;
        let digits = stem
            .strip_prefix('0')
            .ok_or_else(|| invalid("must start with '0'"))?;

        if digits.len() > MAX_ZOOM as usize {
            return Err(invalid("too deep"));
        }
        if !digits.bytes().all(|b| (b'0'..=b'3').contains(&b)) {
            return Err(invalid("digits must be 0-3"));
        }

        Ok(TileId(id.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The quadrant digits, without the leading `"0"` and the suffix.
    pub fn digits(&self) -> &str {
        &self.0[1..self.0.len() - TILE_SUFFIX.len()]
    }

    /// Quadrant digits as numbers.
    fn quadrants(&self) -> impl Iterator<Item = u8> + '_ {
        self.digits().bytes().map(|b| b - b'0')
    }

    pub fn zoom(&self) -> u32 {
        self.digits().len() as u32
    }

    pub fn is_root(&self) -> bool {
        self.digits().is_empty()
    }

    /// Grid coordinate of this tile; inverse of [`tile_name`].
    pub fn coord(&self) -> TileCoord {
        let (x, y) = self.quadrants().fold((0i64, 0i64), |(x, y), q| {
            (2 * x + i64::from(q & 1), 2 * y + i64::from(q >> 1))
        });
        TileCoord::new(x, y, self.zoom())
    }

    /// The enclosing tile one level up.
    pub fn parent(&self) -> Option<TileId> {
        if self.is_root() {
            return None;
        }
        let stem = &self.0[..self.0.len() - TILE_SUFFIX.len() - 1];
        Some(TileId(format!("{}{}", stem, TILE_SUFFIX)))
    }

    /// The four sub-tiles, in quadrant order. Empty at [`MAX_ZOOM`].
    pub fn children(&self) -> Vec<TileId> {
        if self.zoom() >= MAX_ZOOM {
            return Vec::new();
        }
        let stem = &self.0[..self.0.len() - TILE_SUFFIX.len()];
        (0..4)
            .map(|q| TileId(format!("{}{}{}", stem, q, TILE_SUFFIX)))
            .collect()
    }

    /// Id prefixes of every ancestor tile, root first.
    ///
    /// `"0123.png"` yields `["0", "01", "012"]`. Uploads are tagged with these
    /// so a whole subtree can be listed by one tag.
    pub fn ancestors(&self) -> Vec<String> {
        let stem = &self.0[..self.0.len() - TILE_SUFFIX.len()];
        (1..stem.len()).map(|end| stem[..end].to_string()).collect()
    }
}

impl fmt::Display for TileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TileId {
    type Err = TileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TileId::parse(s)
    }
}

impl AsRef<str> for TileId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

// =============================================================================
// Tile Rectangle
// =============================================================================

/// Axis-aligned rectangle in logical space. `y` grows downward.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TileRect {
    pub x_min: f64,
    pub y_min: f64,
    pub x_max: f64,
    pub y_max: f64,
}

impl TileRect {
    pub const fn new(x_min: f64, y_min: f64, x_max: f64, y_max: f64) -> Self {
        Self {
            x_min,
            y_min,
            x_max,
            y_max,
        }
    }

    pub fn width(&self) -> f64 {
        self.x_max - self.x_min
    }

    pub fn height(&self) -> f64 {
        self.y_max - self.y_min
    }

    /// Logical point at the centre of pixel `(px, py)` when this rectangle is
    /// drawn at `width` x `height` pixels.
    pub fn pixel_centre(&self, px: u32, py: u32, width: u32, height: u32) -> (f64, f64) {
        let dx = self.width() / f64::from(width);
        let dy = self.height() / f64::from(height);
        (
            self.x_min + (f64::from(px) + 0.5) * dx,
            self.y_min + (f64::from(py) + 0.5) * dy,
        )
    }

    /// The sub-rectangle selected by one quadrant digit.
    pub fn quarter(&self, quadrant: u8) -> TileRect {
        let w = self.width() / 2.0;
        let h = self.height() / 2.0;
        let x_min = if quadrant & 1 != 0 {
            self.x_min + w
        } else {
            self.x_min
        };
        let y_min = if quadrant & 2 != 0 {
            self.y_min + h
        } else {
            self.y_min
        };
        TileRect::new(x_min, y_min, x_min + w, y_min + h)
    }

    pub fn as_array(&self) -> [f64; 4] {
        [self.x_min, self.y_min, self.x_max, self.y_max]
    }
}

/// Rectangle covered by a tile, given the root rectangle.
pub fn rect_from_tile_name(root: &TileRect, id: &TileId) -> TileRect {
    id.quadrants().fold(*root, |rect, q| rect.quarter(q))
}

// =============================================================================
// Tile Space
// =============================================================================

/// Root rectangle plus tile pixel size: everything needed to place a tile.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileSpace {
    pub root: TileRect,
    pub tile_size: u32,
}

impl TileSpace {
    pub fn new(root: TileRect, tile_size: u32) -> Self {
        Self { root, tile_size }
    }

    pub fn rect(&self, id: &TileId) -> TileRect {
        rect_from_tile_name(&self.root, id)
    }

    /// Logical point sampled by pixel `(px, py)` of a tile covering `rect`.
    pub fn pixel_to_point(&self, rect: &TileRect, px: u32, py: u32) -> (f64, f64) {
        rect.pixel_centre(px, py, self.tile_size, self.tile_size)
    }
}

impl Default for TileSpace {
    fn default() -> Self {
        Self {
            root: TileRect::new(-2.0, -2.0, 2.0, 2.0),
            tile_size: DEFAULT_TILE_SIZE,
        }
    }
}
