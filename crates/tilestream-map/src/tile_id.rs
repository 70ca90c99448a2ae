use rkyv::{Archive, Deserialize, Serialize};
use static_assertions::const_assert_eq;
use std::fmt;
use std::mem;

/// Deepest zoom level a [`TileId`] can address. Chosen so that an id packs into 63 bits (see [`TileId::packed`]).
pub const MAX_ZOOM_LEVEL: u8 = 29;

/// Address of one square map tile in the quadtree.
///
/// At zoom level `z` the map is divided into `2^z x 2^z` tiles; `x` counts columns from the west edge and `y` counts rows from
/// the north edge. This is the key of every map in the crate.
#[derive(
    Archive, Clone, Copy, Debug, Deserialize, Eq, Hash, PartialEq, PartialOrd, Ord, Serialize,
)]
#[archive(check_bytes)]
pub struct TileId {
    pub zoom_level: u8,
    pub x: u32,
    pub y: u32,
}

const_assert_eq!(mem::size_of::<TileId>(), 12);

impl TileId {
    pub const ROOT: Self = Self {
        zoom_level: 0,
        x: 0,
        y: 0,
    };

    pub fn new(zoom_level: u8, x: u32, y: u32) -> Self {
        Self::try_new(zoom_level, x, y).unwrap_or_else(|| {
            panic!(
                "Invalid tile coordinates ({}, {}) at zoom level {}",
                x, y, zoom_level
            )
        })
    }

    pub fn try_new(zoom_level: u8, x: u32, y: u32) -> Option<Self> {
        if zoom_level > MAX_ZOOM_LEVEL {
            return None;
        }
        let side = 1u32 << zoom_level;
        (x < side && y < side).then(|| Self { zoom_level, x, y })
    }

    /// Number of tiles along each edge of the map at this zoom level.
    #[inline]
    pub fn tiles_per_side(&self) -> u32 {
        1 << self.zoom_level
    }

    #[inline]
    pub fn is_root(&self) -> bool {
        self.zoom_level == 0
    }

    /// The 4 tiles one level deeper, in the order north-west, north-east, south-west, south-east.
    pub fn children(&self) -> [TileId; 4] {
        assert!(
            self.zoom_level < MAX_ZOOM_LEVEL,
            "{} has no children",
            self
        );
        let zoom_level = self.zoom_level + 1;
        let (x, y) = (self.x << 1, self.y << 1);
        [
            Self { zoom_level, x, y },
            Self { zoom_level, x: x + 1, y },
            Self { zoom_level, x, y: y + 1 },
            Self { zoom_level, x: x + 1, y: y + 1 },
        ]
    }

    /// Callers must check [`TileId::is_root`] first; the root has no parent.
    pub fn parent(&self) -> TileId {
        self.try_parent()
            .unwrap_or_else(|| panic!("The root tile has no parent"))
    }

    pub fn try_parent(&self) -> Option<TileId> {
        (!self.is_root()).then(|| Self {
            zoom_level: self.zoom_level - 1,
            x: self.x >> 1,
            y: self.y >> 1,
        })
    }

    /// Position of this tile in `self.parent().children()`.
    pub fn child_index(&self) -> usize {
        assert!(!self.is_root(), "The root tile is nobody's child");
        (((self.y & 1) << 1) | (self.x & 1)) as usize
    }

    /// Every ancestor, nearest first, ending with the root.
    pub fn ancestors(&self) -> impl Iterator<Item = TileId> {
        std::iter::successors(self.try_parent(), TileId::try_parent)
    }

    pub fn is_ancestor_of(&self, other: &TileId) -> bool {
        if other.zoom_level <= self.zoom_level {
            return false;
        }
        let shift = other.zoom_level - self.zoom_level;
        (other.x >> shift) == self.x && (other.y >> shift) == self.y
    }

    /// Packs the id into the low 63 bits: 5 bits of zoom level, then 29 bits each of `x` and `y`.
    pub fn packed(&self) -> u64 {
        ((self.zoom_level as u64) << 58) | ((self.x as u64) << 29) | self.y as u64
    }

    pub fn from_packed(packed: u64) -> Option<Self> {
        const MASK: u64 = (1 << 29) - 1;
        let zoom_level = (packed >> 58) as u8;
        if packed >> 63 != 0 {
            return None;
        }
        Self::try_new(
            zoom_level,
            ((packed >> 29) & MASK) as u32,
            (packed & MASK) as u32,
        )
    }
}

impl From<&ArchivedTileId> for TileId {
    fn from(archived: &ArchivedTileId) -> Self {
        Self {
            zoom_level: archived.zoom_level,
            x: archived.x,
            y: archived.y,
        }
    }
}

impl fmt::Display for TileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.zoom_level, self.x, self.y)
    }
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝

#[cfg(test)]
mod test {
    use super::*;

    fn sample_tiles() -> Vec<TileId> {
        let mut tiles = vec![TileId::ROOT];
        for zoom_level in 1..=MAX_ZOOM_LEVEL {
            let max = (1u32 << zoom_level) - 1;
            tiles.push(TileId::new(zoom_level, 0, 0));
            tiles.push(TileId::new(zoom_level, max, max));
            tiles.push(TileId::new(zoom_level, max / 3, max / 2 + 1));
        }
        tiles
    }

    #[test]
    fn children_and_parent_are_inverse() {
        for tile in sample_tiles() {
            if tile.zoom_level < MAX_ZOOM_LEVEL {
                for (i, child) in tile.children().iter().enumerate() {
                    assert_eq!(child.parent(), tile);
                    assert_eq!(child.child_index(), i);
                    assert!(tile.is_ancestor_of(child));
                }
            }
            if let Some(parent) = tile.try_parent() {
                let siblings = parent.children();
                assert_eq!(siblings.iter().filter(|&&s| s == tile).count(), 1);
            }
        }
    }

    #[test]
    fn children_quadrant_order() {
        let tile = TileId::new(3, 2, 5);
        assert_eq!(
            tile.children(),
            [
                TileId::new(4, 4, 10),
                TileId::new(4, 5, 10),
                TileId::new(4, 4, 11),
                TileId::new(4, 5, 11),
            ]
        );
    }

    #[test]
    fn ancestors_end_at_root() {
        let tile = TileId::new(3, 7, 1);
        let ancestors: Vec<_> = tile.ancestors().collect();
        assert_eq!(
            ancestors,
            vec![TileId::new(2, 3, 0), TileId::new(1, 1, 0), TileId::ROOT]
        );
        assert_eq!(TileId::ROOT.ancestors().count(), 0);
        assert!(!tile.is_ancestor_of(&TileId::ROOT));
        assert!(TileId::ROOT.is_ancestor_of(&tile));
    }

    #[test]
    fn packing_keeps_every_field() {
        for tile in sample_tiles() {
            assert_eq!(TileId::from_packed(tile.packed()), Some(tile));
        }
        assert_eq!(TileId::from_packed(u64::MAX), None);
    }

    #[test]
    fn rejects_out_of_range_coordinates() {
        assert_eq!(TileId::try_new(1, 2, 0), None);
        assert_eq!(TileId::try_new(MAX_ZOOM_LEVEL + 1, 0, 0), None);
        assert!(TileId::try_new(2, 3, 3).is_some());
    }

    #[test]
    #[should_panic(expected = "no parent")]
    fn root_parent_panics() {
        TileId::ROOT.parent();
    }
}
