use crate::TileId;

use std::f64::consts::PI;
use tilestream_core::geometry::Aabb;
use tilestream_core::glam::{DVec2, DVec3};
use tilestream_core::SmallKeyHashMap;

/// Edge length of the whole map in world units, equal to the equatorial circumference of the earth in meters.
///
/// The map is a web-mercator square centered on the origin: +x is east, +y is north and +z is up. Tile rows count from the
/// north edge.
pub const WORLD_SIZE: f64 = 40_075_016.685_578_49;

/// Edge length in world units of every tile at `zoom_level`.
pub fn tile_world_size(zoom_level: u8) -> f64 {
    WORLD_SIZE / (1u64 << zoom_level) as f64
}

/// The horizontal footprint of `id` as `(min, max)` corners.
pub fn tile_footprint(id: TileId) -> (DVec2, DVec2) {
    let size = tile_world_size(id.zoom_level);
    let half_world = 0.5 * WORLD_SIZE;
    let min_x = -half_world + id.x as f64 * size;
    let max_y = half_world - id.y as f64 * size;
    (
        DVec2::new(min_x, max_y - size),
        DVec2::new(min_x + size, max_y),
    )
}

/// Range of terrain elevation in meters.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HeightRange {
    pub min: f64,
    pub max: f64,
}

impl HeightRange {
    /// From the bottom of the Mariana trench to above the summit of Everest.
    pub const EARTH: Self = Self {
        min: -11_000.0,
        max: 9_000.0,
    };

    pub fn new(min: f64, max: f64) -> Self {
        assert!(min <= max, "Height range {}..{} is inverted", min, max);
        Self { min, max }
    }
}

impl Default for HeightRange {
    fn default() -> Self {
        Self::EARTH
    }
}

/// Sparse table of precomputed elevation ranges.
///
/// A range stored for a tile must cover all of its descendants, so looking up a tile without an entry falls back to the nearest
/// ancestor that has one, and finally to the global range.
#[derive(Clone, Debug, Default)]
pub struct HeightRangeTable {
    ranges: SmallKeyHashMap<TileId, HeightRange>,
    global: HeightRange,
}

impl HeightRangeTable {
    pub fn new(global: HeightRange) -> Self {
        Self {
            ranges: Default::default(),
            global,
        }
    }

    pub fn insert(&mut self, id: TileId, range: HeightRange) {
        self.ranges.insert(id, range);
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn get(&self, id: TileId) -> HeightRange {
        std::iter::once(id)
            .chain(id.ancestors())
            .find_map(|t| self.ranges.get(&t).copied())
            .unwrap_or(self.global)
    }
}

/// The mercator ordinate of a row boundary, `y_norm` being the fraction of the map's height from the north edge.
fn mercator_psi(y_norm: f64) -> f64 {
    PI * (1.0 - 2.0 * y_norm)
}

/// World units spanned by one meter of elevation, over the rows of `id`, as `(least, greatest)`.
///
/// Web-mercator stretches lengths by `sec(latitude) = cosh(psi)`, which grows away from the equator.
pub fn vertical_scale_range(id: TileId) -> (f64, f64) {
    let n = id.tiles_per_side() as f64;
    let psi_north = mercator_psi(id.y as f64 / n);
    let psi_south = mercator_psi((id.y + 1) as f64 / n);

    let min_abs_psi = if psi_north >= 0.0 && psi_south <= 0.0 {
        0.0
    } else {
        psi_north.abs().min(psi_south.abs())
    };
    let max_abs_psi = psi_north.abs().max(psi_south.abs());

    (min_abs_psi.cosh(), max_abs_psi.cosh())
}

/// Maps each tile to a conservative world-space box.
pub trait BoundingVolumeProvider {
    fn bounding_volume(&self, id: TileId) -> Aabb;
}

/// Boxes from each tile's footprint and a latitude-corrected height range.
#[derive(Clone, Debug, Default)]
pub struct TileBoundingVolumes {
    heights: HeightRangeTable,
}

impl TileBoundingVolumes {
    pub fn new(heights: HeightRangeTable) -> Self {
        Self { heights }
    }
}

impl BoundingVolumeProvider for TileBoundingVolumes {
    fn bounding_volume(&self, id: TileId) -> Aabb {
        let (min_xy, max_xy) = tile_footprint(id);
        let heights = self.heights.get(id);
        let (scale_lo, scale_hi) = vertical_scale_range(id);

        // The hull over both scale extremes handles ranges of either sign.
        let candidates = [
            heights.min * scale_lo,
            heights.min * scale_hi,
            heights.max * scale_lo,
            heights.max * scale_hi,
        ];
        let min_z = candidates.iter().copied().fold(f64::INFINITY, f64::min);
        let max_z = candidates.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        Aabb::new(min_xy.extend(min_z), max_xy.extend(max_z))
    }
}

/// Distance from `point` to the closest point of the tile's box.
pub fn distance_to_tile(
    volumes: &(impl BoundingVolumeProvider + ?Sized),
    id: TileId,
    point: DVec3,
) -> f64 {
    volumes.bounding_volume(id).distance_to_point(point)
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝
