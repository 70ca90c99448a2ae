//! Streaming of quadtree map tiles for a renderer.
//!
//! A [`Scheduler`] owns the tiles of one map layer. Given a [`Camera`](tilestream_map::Camera), it requests the [`Quad`]s the
//! view needs through a [`TileFetcher`], keeps them in a RAM cache that is optionally persisted to disk, and tells a
//! [`ResidencySink`] which tiles to upload into or evict from a GPU texture array.
//!
//! Applications with several layers register one scheduler per layer with a [`SchedulerDirector`].
//!
//! ```no_run
//! use tilestream::{Config, InlineFetcher, ResidencyDelta, Scheduler, TileSource};
//! use tilestream::tilestream_map::{unix_now, NetworkStatus, Quad, TileId};
//!
//! struct Blank;
//!
//! impl TileSource for Blank {
//!     fn fetch_quad(&self, id: TileId) -> Quad {
//!         Quad::uniform(id, NetworkStatus::NotFound, unix_now())
//!     }
//! }
//!
//! let config = Config::read_file("tilestream.ron").unwrap();
//! let mut scheduler = Scheduler::new(
//!     "imagery",
//!     config.streaming,
//!     InlineFetcher::new(Blank),
//!     |delta: &ResidencyDelta<'_>| println!("{} tiles to upload", delta.added.len()),
//! )
//! .unwrap();
//! if let Some(dir) = config.cache_dir("imagery") {
//!     scheduler = scheduler.with_cache_dir(dir);
//! }
//! scheduler.pump();
//! ```
//!
//! [`Quad`]: tilestream_map::Quad

mod config;
mod director;
mod fetch;
mod scheduler;

pub use config::*;
pub use director::*;
pub use fetch::*;
pub use scheduler::*;

pub use tilestream_core;
pub use tilestream_map;
