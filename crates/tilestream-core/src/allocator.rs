use crate::SmallKeyHashMap;

use std::fmt::Debug;
use std::hash::Hash;

/// A fixed number of slots, each exclusively owned by at most one key `K`.
///
/// The slot array and the reverse `key -> slot` map are always mutual inverses. New keys claim the lowest-numbered empty slot,
/// so a table that only grows stays densely packed at the front.
///
/// Misuse (adding a key twice, adding to a full table, removing an absent key) is a programming error and panics.
#[derive(Clone, Debug)]
pub struct SlotAllocator<K> {
    slots: Vec<Option<K>>,
    key_to_slot: SmallKeyHashMap<K, u32>,
    // No slot below this index is empty.
    first_free: usize,
}

impl<K> SlotAllocator<K>
where
    K: Copy + Debug + Eq + Hash,
{
    pub fn new(capacity: u32) -> Self {
        Self {
            slots: vec![None; capacity as usize],
            key_to_slot: SmallKeyHashMap::default(),
            first_free: 0,
        }
    }

    #[inline]
    pub fn capacity(&self) -> u32 {
        self.slots.len() as u32
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.key_to_slot.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.key_to_slot.is_empty()
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.len() == self.slots.len()
    }

    #[inline]
    pub fn contains(&self, key: &K) -> bool {
        self.key_to_slot.contains_key(key)
    }

    #[inline]
    pub fn slot_of(&self, key: &K) -> Option<u32> {
        self.key_to_slot.get(key).copied()
    }

    #[inline]
    pub fn key_in_slot(&self, slot: u32) -> Option<K> {
        self.slots.get(slot as usize).copied().flatten()
    }

    /// The raw slot array, `None` for empty slots.
    pub fn slots(&self) -> &[Option<K>] {
        &self.slots
    }

    /// Every occupied `(key, slot)` pair in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (K, u32)> + '_ {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, key)| key.map(|k| (k, i as u32)))
    }

    /// Claims the first empty slot for `key`.
    pub fn add(&mut self, key: K) -> u32 {
        assert!(!self.contains(&key), "{:?} already owns a slot", key);

        let index = self.slots[self.first_free..]
            .iter()
            .position(Option::is_none)
            .map(|offset| self.first_free + offset)
            .unwrap_or_else(|| panic!("No empty slot left for {:?}", key));

        self.slots[index] = Some(key);
        self.key_to_slot.insert(key, index as u32);
        self.first_free = index + 1;

        index as u32
    }

    /// Frees the slot owned by `key` and returns its index.
    pub fn remove(&mut self, key: K) -> u32 {
        let slot = self
            .key_to_slot
            .remove(&key)
            .unwrap_or_else(|| panic!("{:?} does not own a slot", key));
        self.slots[slot as usize] = None;
        self.first_free = self.first_free.min(slot as usize);

        slot
    }

    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|s| *s = None);
        self.key_to_slot.clear();
        self.first_free = 0;
    }
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝
