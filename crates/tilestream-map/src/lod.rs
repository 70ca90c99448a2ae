use crate::{tile_world_size, BoundingVolumeProvider, Camera, TileId, WorldUnits, MAX_ZOOM_LEVEL};

use float_ord::FloatOrd;
use smallvec::SmallVec;
use tilestream_core::geometry::Aabb;

/// Parameters of the refinement decision.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RefineParams {
    /// A tile is refined while one of its texels would cover at least this many pixels.
    pub error_threshold_px: f64,
    /// Texels along each edge of a tile.
    pub tile_edge_size: u32,
    /// Tiles at this zoom level are never refined.
    pub max_zoom: u8,
}

/// True if any part of `aabb` might be visible to `camera`.
pub fn camera_frustum_contains_box(camera: &Camera, aabb: &Aabb) -> bool {
    camera.frustum().intersects_aabb(aabb)
}

/// `None` if `tile` is culled, otherwise whether it should be refined into its children.
fn classify<V>(tile: TileId, camera: &Camera, volumes: &V, params: &RefineParams) -> Option<bool>
where
    V: BoundingVolumeProvider + ?Sized,
{
    let aabb = volumes.bounding_volume(tile);
    if !camera_frustum_contains_box(camera, &aabb) {
        return None;
    }
    if tile.zoom_level >= params.max_zoom.min(MAX_ZOOM_LEVEL) {
        return Some(false);
    }

    let texel_size = tile_world_size(tile.zoom_level) / params.tile_edge_size as f64;
    let distance = aabb.distance_to_point(camera.position());
    let error = camera.screen_space_error(WorldUnits(texel_size), WorldUnits(distance));

    Some(error.0 >= params.error_threshold_px)
}

/// Decides whether `tile` should be replaced by its 4 children for the current view.
///
/// Tiles at `max_zoom` and tiles outside of the view frustum are never refined. Otherwise a tile is refined when one of its
/// texels, seen at the distance to the nearest point of the tile's box, covers at least `error_threshold_px` pixels.
pub fn should_refine<V>(tile: TileId, camera: &Camera, volumes: &V, params: &RefineParams) -> bool
where
    V: BoundingVolumeProvider + ?Sized,
{
    if tile.zoom_level >= params.max_zoom {
        return false;
    }
    classify(tile, camera, volumes, params) == Some(true)
}

/// One visible tile reached by [`walk_quadtree`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LodVisit {
    /// Too coarse for the view. Its children are walked next.
    Refined(TileId),
    /// Detailed enough to draw as-is.
    Leaf(TileId),
}

/// Walks the visible quadtree from the root, deciding refinement lazily.
///
/// Culled tiles are reported to nobody and their subtrees are never generated.
pub fn walk_quadtree<V>(
    camera: &Camera,
    volumes: &V,
    params: &RefineParams,
    mut visitor: impl FnMut(LodVisit),
) where
    V: BoundingVolumeProvider + ?Sized,
{
    let mut stack: SmallVec<[TileId; 64]> = SmallVec::new();
    stack.push(TileId::ROOT);

    while let Some(tile) = stack.pop() {
        match classify(tile, camera, volumes, params) {
            None => continue,
            Some(true) => {
                visitor(LodVisit::Refined(tile));
                stack.extend(tile.children());
            }
            Some(false) => visitor(LodVisit::Leaf(tile)),
        }
    }
}

/// Ids of the quads the view needs: one per refined tile, since a quad carries the 4 children of its id.
pub fn desired_quads<V>(camera: &Camera, volumes: &V, params: &RefineParams) -> Vec<TileId>
where
    V: BoundingVolumeProvider + ?Sized,
{
    let mut quads = Vec::new();
    walk_quadtree(camera, volumes, params, |visit| {
        if let LodVisit::Refined(id) = visit {
            quads.push(id);
        }
    });
    quads
}

/// The visible tiles that are drawn as-is.
pub fn leaf_tiles<V>(camera: &Camera, volumes: &V, params: &RefineParams) -> Vec<TileId>
where
    V: BoundingVolumeProvider + ?Sized,
{
    let mut leaves = Vec::new();
    walk_quadtree(camera, volumes, params, |visit| {
        if let LodVisit::Leaf(id) = visit {
            leaves.push(id);
        }
    });
    leaves
}

/// Orders `tiles` by the distance from the eye to each tile's box, nearest first.
pub fn sort_nearest_first<V>(tiles: &mut [TileId], camera: &Camera, volumes: &V)
where
    V: BoundingVolumeProvider + ?Sized,
{
    let eye = camera.position();
    tiles.sort_by_cached_key(|&t| FloatOrd(volumes.bounding_volume(t).distance_to_point(eye)));
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝
