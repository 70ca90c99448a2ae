//! The tilestream map data model.
//!
//! # Tiles
//!
//! The map is a web-mercator square divided into a quadtree of square tiles, each addressed by a [`TileId`]. The data for the
//! 4 children of a tile is fetched and cached together as one [`Quad`], so the quad with id `t` is what a renderer needs in
//! order to draw `t` at the next level of detail.
//!
//! # Level of Detail
//!
//! Every tile has a conservative [`Aabb`](tilestream_core::geometry::Aabb) from [`TileBoundingVolumes`]. A tile is refined
//! when it is visible and one of its texels would cover more than a few pixels on screen (see [`should_refine`]).
//!
//! # Caching
//!
//! Quads are kept in a [`TileCache`], which evicts by a logical recency stamp and follows the quadtree when refreshing stamps.
//! Caches can be persisted to a directory of versioned files. The subset of quads uploaded to the GPU gets slots from a
//! [`GpuArraySlotTable`], whose [`Dictionary`] lets shaders find the slot of any tile.

mod bounding_volume;
mod cache;
mod camera;
mod config;
mod gpu_array;
mod lod;
mod quad;
mod tile_id;
mod units;

pub use bounding_volume::*;
pub use cache::*;
pub use camera::*;
pub use config::*;
pub use gpu_array::*;
pub use lod::*;
pub use quad::*;
pub use tile_id::*;
pub use units::*;

pub use tilestream_core;
