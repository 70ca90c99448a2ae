use tilestream_core::SmallKeyHashSet;
use tilestream_map::{CacheValue, Dictionary, GpuArraySlotTable, Quad, QuadTile, TileCache, TileId};

/// A tile that was just given a GPU slot. The renderer should upload `tile` into layer `slot`.
#[derive(Clone, Copy, Debug)]
pub struct ResidentTile<'a> {
    pub id: TileId,
    pub slot: u32,
    pub tile: &'a QuadTile,
}

/// A tile whose GPU slot was just freed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct EvictedTile {
    pub id: TileId,
    pub slot: u32,
}

/// Everything the renderer needs to bring its copy of the GPU tile array up to date.
#[derive(Clone, Debug)]
pub struct ResidencyDelta<'a> {
    /// Slots in this list were freed before any slot in `added` was claimed.
    pub removed: Vec<EvictedTile>,
    pub added: Vec<ResidentTile<'a>>,
    /// Resolves every resident tile after applying this delta.
    pub dictionary: Dictionary,
}

/// The renderer's side of GPU residency. It is only called when some tile was added or removed, and tile payloads are only
/// borrowed for the duration of the call.
pub trait ResidencySink {
    fn update_residency(&mut self, delta: &ResidencyDelta<'_>);
}

impl<F> ResidencySink for F
where
    F: FnMut(&ResidencyDelta<'_>),
{
    fn update_residency(&mut self, delta: &ResidencyDelta<'_>) {
        self(delta)
    }
}

/// Entry of the GPU-residency cache. The payload stays in the RAM cache.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct GpuCacheInfo {
    pub id: TileId,
}

impl CacheValue for GpuCacheInfo {
    fn tile_id(&self) -> TileId {
        self.id
    }
}

/// Number of tiles whose residency changed in one pass.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ResidencyChange {
    pub added: usize,
    pub removed: usize,
}

/// Chooses which cached quads live on the GPU and keeps their tiles in slots.
pub(crate) struct GpuResidency {
    cache: TileCache<GpuCacheInfo>,
    slots: GpuArraySlotTable,
    quad_quota: usize,
}

impl GpuResidency {
    pub fn new(quad_quota: usize, slot_capacity: u32) -> Self {
        Self {
            cache: TileCache::new(),
            slots: GpuArraySlotTable::new(slot_capacity),
            quad_quota,
        }
    }

    pub fn cache(&self) -> &TileCache<GpuCacheInfo> {
        &self.cache
    }

    pub fn slots(&self) -> &GpuArraySlotTable {
        &self.slots
    }

    /// Makes the quads in `wanted` resident, evicting the least recently wanted quads over quota.
    ///
    /// `wanted` must be closed under ancestry, as the result of a [`TileCache::visit`] is, and every id in it must be in
    /// `ram_cache`. A quad that is added and evicted in the same pass never reaches the sink.
    pub fn update(
        &mut self,
        wanted: &[TileId],
        ram_cache: &TileCache<Quad>,
        sink: &mut dyn ResidencySink,
    ) -> ResidencyChange {
        self.cache.advance_time();

        let mut added_quads = Vec::new();
        for &id in wanted {
            if !self.cache.contains(id) {
                self.cache.insert(GpuCacheInfo { id });
                added_quads.push(id);
            }
        }

        let wanted_set: SmallKeyHashSet<TileId> = wanted.iter().copied().collect();
        self.cache.visit(|info| wanted_set.contains(&info.id));

        let mut evicted_quads: Vec<TileId> = self
            .cache
            .purge(self.quad_quota)
            .into_iter()
            .map(|info| info.id)
            .collect();

        // Quads that came and went within this pass never got slots, so they show up in neither list.
        let evicted_set: SmallKeyHashSet<TileId> = evicted_quads.iter().copied().collect();
        added_quads.retain(|id| !evicted_set.contains(id));
        evicted_quads.sort();

        let mut removed = Vec::new();
        for quad_id in evicted_quads {
            for id in quad_id.children() {
                if self.slots.contains(id) {
                    let slot = self.slots.remove(id);
                    removed.push(EvictedTile { id, slot });
                }
            }
        }

        let mut added = Vec::new();
        for quad_id in added_quads {
            let quad = ram_cache.peek(quad_id);
            for (id, tile) in quad.child_tiles() {
                let slot = self.slots.add(id);
                added.push(ResidentTile { id, slot, tile });
            }
        }

        let change = ResidencyChange {
            added: added.len(),
            removed: removed.len(),
        };
        if change != ResidencyChange::default() {
            sink.update_residency(&ResidencyDelta {
                removed,
                added,
                dictionary: self.slots.generate_dictionary(),
            });
        }
        change
    }
}
