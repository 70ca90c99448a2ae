mod persist;

pub use persist::*;

use crate::{TileId, MAX_ZOOM_LEVEL};

use smallvec::SmallVec;
use tilestream_core::{SmallKeyHashMap, SmallKeyHashSet};

/// Anything that can live in a [`TileCache`]: it must know the tile it belongs to.
pub trait CacheValue {
    fn tile_id(&self) -> TileId;
}

/// Logical timestamps attached to every cached payload.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct CacheMeta {
    /// `time * 100 - zoom_level` at the last accepted visit. The zoom term makes deeper tiles look older than shallower tiles
    /// visited at the same time.
    pub visited: u64,
    /// Logical time of insertion.
    pub created: u64,
}

#[derive(Clone, Debug)]
pub struct CacheObject<T> {
    pub meta: CacheMeta,
    pub data: T,
}

/// A tree-aware store of tile payloads with recency-based eviction.
///
/// Time is a logical clock owned by the cache. Callers advance it with [`TileCache::advance_time`] once per scheduling pass,
/// and every insertion or accepted visit during that pass is stamped with the same time.
///
/// # Visiting
///
/// [`TileCache::visit`] walks from [`TileId::ROOT`] through cached children only. A payload that the visitor rejects is left
/// with its old stamp and none of its descendants are visited, so whole subtrees age together and get evicted together.
///
/// # Persistence
///
/// Caches of [`Persist`] payloads can be written to and restored from a directory, see [`TileCache::write_to_disk`].
pub struct TileCache<T> {
    entries: SmallKeyHashMap<TileId, CacheObject<T>>,
    time: u64,
    /// Entries whose current payload was written by the last successful write to disk. Inserting an id removes it.
    on_disk: SmallKeyHashSet<TileId>,
}

impl<T> Default for TileCache<T> {
    fn default() -> Self {
        Self {
            entries: Default::default(),
            time: 1,
            on_disk: Default::default(),
        }
    }
}

#[inline]
fn visited_stamp(time: u64, id: TileId) -> u64 {
    time * 100 - id.zoom_level as u64
}

impl<T: CacheValue> TileCache<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn time(&self) -> u64 {
        self.time
    }

    pub fn advance_time(&mut self) -> u64 {
        self.time += 1;
        self.time
    }

    /// Inserts `data`, replacing any payload with the same id. Returns the replaced payload.
    pub fn insert(&mut self, data: T) -> Option<T> {
        let id = data.tile_id();
        self.on_disk.remove(&id);
        let meta = CacheMeta {
            visited: visited_stamp(self.time, id),
            created: self.time,
        };
        self.entries
            .insert(id, CacheObject { meta, data })
            .map(|old| old.data)
    }

    pub fn contains(&self, id: TileId) -> bool {
        self.entries.contains_key(&id)
    }

    /// # Panics
    ///
    /// If `id` is not cached. Check [`TileCache::contains`] first or use [`TileCache::get`].
    pub fn peek(&self, id: TileId) -> &T {
        match self.entries.get(&id) {
            Some(object) => &object.data,
            None => panic!("Tile {} is not cached", id),
        }
    }

    pub fn get(&self, id: TileId) -> Option<&T> {
        self.entries.get(&id).map(|object| &object.data)
    }

    pub fn meta(&self, id: TileId) -> Option<CacheMeta> {
        self.entries.get(&id).map(|object| object.meta)
    }

    pub fn remove(&mut self, id: TileId) -> Option<T> {
        self.entries.remove(&id).map(|object| object.data)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (TileId, &CacheObject<T>)> {
        self.entries.iter().map(|(id, object)| (*id, object))
    }

    pub fn ids(&self) -> impl Iterator<Item = TileId> + '_ {
        self.entries.keys().copied()
    }

    /// Drops every payload. Files already on disk are deleted by the next [`TileCache::write_to_disk`].
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Walks the cached tree from the root. See the type-level docs.
    pub fn visit(&mut self, mut visitor: impl FnMut(&T) -> bool) {
        let time = self.time;
        let mut stack: SmallVec<[TileId; 64]> = SmallVec::new();
        if self.entries.contains_key(&TileId::ROOT) {
            stack.push(TileId::ROOT);
        }

        while let Some(id) = stack.pop() {
            let object = match self.entries.get_mut(&id) {
                Some(object) => object,
                None => continue,
            };
            if !visitor(&object.data) {
                continue;
            }
            object.meta.visited = visited_stamp(time, id);

            if id.zoom_level < MAX_ZOOM_LEVEL {
                for child in id.children() {
                    if self.entries.contains_key(&child) {
                        stack.push(child);
                    }
                }
            }
        }
    }

    /// Evicts the least recently visited payloads until at most `capacity` remain, and returns them in no particular order.
    ///
    /// Entries with equal stamps are evicted in [`TileId`] order.
    pub fn purge(&mut self, capacity: usize) -> Vec<T> {
        if self.entries.len() <= capacity {
            return Vec::new();
        }
        let num_evict = self.entries.len() - capacity;

        let mut candidates: Vec<(u64, TileId)> = self
            .entries
            .iter()
            .map(|(id, object)| (object.meta.visited, *id))
            .collect();
        // Partition so the `num_evict` smallest keys come first.
        candidates.select_nth_unstable(num_evict - 1);

        candidates[..num_evict]
            .iter()
            .filter_map(|(_, id)| self.entries.remove(id))
            .map(|object| object.data)
            .collect()
    }
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝
