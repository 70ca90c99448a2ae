use crate::TileId;

use bytemuck::{Pod, Zeroable};
use static_assertions::const_assert_eq;
use std::mem;
use tilestream_core::allocator::SlotAllocator;

/// Where the renderer finds the data for a tile: the slot of the tile itself or of its nearest resident ancestor.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct TileLayer {
    pub id: TileId,
    pub slot: u32,
}

impl TileLayer {
    /// Returned when no ancestor is resident, which only happens while the first tiles are loading.
    pub const SENTINEL: Self = Self {
        id: TileId::ROOT,
        slot: 0,
    };
}

/// Assigns GPU texture-array layers to tiles.
///
/// The table has a fixed number of slots. The renderer mirrors it in a texture array with one layer per slot, and resolves
/// tiles to layers with the [`Dictionary`].
#[derive(Clone, Debug)]
pub struct GpuArraySlotTable {
    slots: SlotAllocator<TileId>,
}

impl GpuArraySlotTable {
    pub fn new(capacity: u32) -> Self {
        Self {
            slots: SlotAllocator::new(capacity),
        }
    }

    pub fn capacity(&self) -> u32 {
        self.slots.capacity()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.slots.is_full()
    }

    pub fn contains(&self, id: TileId) -> bool {
        self.slots.contains(&id)
    }

    pub fn slot_of(&self, id: TileId) -> Option<u32> {
        self.slots.slot_of(&id)
    }

    /// One entry per slot; `None` marks an empty slot.
    pub fn array(&self) -> &[Option<TileId>] {
        self.slots.slots()
    }

    pub fn iter(&self) -> impl Iterator<Item = (TileId, u32)> + '_ {
        self.slots.iter()
    }

    /// Claims the lowest empty slot for `id`.
    ///
    /// # Panics
    ///
    /// If `id` already has a slot or the table is full.
    pub fn add(&mut self, id: TileId) -> u32 {
        self.slots.add(id)
    }

    /// Frees the slot of `id` and returns it.
    ///
    /// # Panics
    ///
    /// If `id` has no slot.
    pub fn remove(&mut self, id: TileId) -> u32 {
        self.slots.remove(id)
    }

    pub fn clear(&mut self) {
        self.slots.clear();
    }

    pub fn layer_of(&self, id: TileId) -> TileLayer {
        std::iter::once(id)
            .chain(id.ancestors())
            .find_map(|t| self.slot_of(t).map(|slot| TileLayer { id: t, slot }))
            .unwrap_or(TileLayer::SENTINEL)
    }

    /// Builds the hash table the renderer uses to find the slot of a tile. See [`Dictionary`].
    pub fn generate_dictionary(&self) -> Dictionary {
        let mut dictionary = Dictionary::empty(self.capacity());
        for (id, slot) in self.iter() {
            dictionary.insert(id, slot);
        }
        dictionary
    }
}

/// A [`TileId::packed`] split into `[low, high]` 32-bit words, as stored in a texture.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq, Pod, Zeroable)]
#[repr(C)]
pub struct PackedTileId(pub [u32; 2]);

const_assert_eq!(mem::size_of::<PackedTileId>(), 8);

impl PackedTileId {
    /// Marks an empty dictionary cell. Packed ids never set the top bit, so this never collides with a real id.
    pub const EMPTY: Self = Self([u32::MAX; 2]);

    pub fn new(id: TileId) -> Self {
        let packed = id.packed();
        Self([packed as u32, (packed >> 32) as u32])
    }

    pub fn as_u64(&self) -> u64 {
        self.0[0] as u64 | ((self.0[1] as u64) << 32)
    }
}

pub const EMPTY_SLOT: u32 = u32::MAX;

const MIN_DICTIONARY_CELLS: usize = 16;

/// Hash of a packed id used to place it in a [`Dictionary`]. Shaders must implement the same function.
///
/// The high word is mixed into the low word with a multiply, then the result goes through the 32-bit finalizer of MurmurHash3:
///
/// ```text
/// h = low ^ (high * 0x9E3779B9)
/// h ^= h >> 16; h *= 0x85EBCA6B
/// h ^= h >> 13; h *= 0xC2B2AE35
/// h ^= h >> 16
/// ```
///
/// All multiplication wraps.
pub fn dictionary_hash(key: PackedTileId) -> u32 {
    let [low, high] = key.0;
    let mut h = low ^ high.wrapping_mul(0x9E37_79B9);
    h ^= h >> 16;
    h = h.wrapping_mul(0x85EB_CA6B);
    h ^= h >> 13;
    h = h.wrapping_mul(0xC2B2_AE35);
    h ^= h >> 16;
    h
}

/// An open-addressing hash table from tile to GPU slot, laid out as two 2D textures of `width x height` texels.
///
/// The number of cells is a power of two at least twice the slot capacity, so the table is never more than half full. A key
/// lives at the first cell at or after `dictionary_hash(key) % num_cells` (wrapping, row-major) that holds it, and a probe can
/// stop at the first [`PackedTileId::EMPTY`] cell.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Dictionary {
    pub width: u32,
    pub height: u32,
    pub keys: Vec<PackedTileId>,
    pub slots: Vec<u32>,
}

impl Dictionary {
    fn empty(capacity: u32) -> Self {
        let num_cells = (2 * capacity as usize)
            .max(MIN_DICTIONARY_CELLS)
            .next_power_of_two();
        let log2_cells = num_cells.trailing_zeros();
        let width = 1u32 << ((log2_cells + 1) / 2);
        let height = (num_cells as u32) / width;

        Self {
            width,
            height,
            keys: vec![PackedTileId::EMPTY; num_cells],
            slots: vec![EMPTY_SLOT; num_cells],
        }
    }

    pub fn num_cells(&self) -> usize {
        self.keys.len()
    }

    fn probe(&self, key: PackedTileId) -> impl Iterator<Item = usize> {
        let mask = self.num_cells() - 1;
        let start = dictionary_hash(key) as usize & mask;
        (0..self.num_cells()).map(move |i| (start + i) & mask)
    }

    fn insert(&mut self, id: TileId, slot: u32) {
        let key = PackedTileId::new(id);
        let cell = self.probe(key).find(|&i| {
            self.keys[i] == PackedTileId::EMPTY || self.keys[i] == key
        });
        // The table is at most half full.
        let cell = match cell {
            Some(cell) => cell,
            None => unreachable!("Dictionary is full"),
        };
        self.keys[cell] = key;
        self.slots[cell] = slot;
    }

    /// The slot of `id`, found the same way a shader does.
    pub fn lookup(&self, id: TileId) -> Option<u32> {
        let key = PackedTileId::new(id);
        for cell in self.probe(key) {
            if self.keys[cell] == key {
                return Some(self.slots[cell]);
            }
            if self.keys[cell] == PackedTileId::EMPTY {
                return None;
            }
        }
        None
    }

    pub fn key_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.keys)
    }

    pub fn slot_bytes(&self) -> &[u8] {
        bytemuck::cast_slice(&self.slots)
    }
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝
