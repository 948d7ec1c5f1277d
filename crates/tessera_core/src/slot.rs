//! Reusable-handle pools
//!
//! [`SlotTable`] is an arena indexed by 1-based handles. Slots are never
//! deallocated while the table lives: releasing a slot only clears its
//! `reserved` flag and recycles the payload, so every handle ever returned
//! stays a valid index for the lifetime of the table. Stale handles resolve
//! to `None` instead of to the next occupant's state.

use crate::handle::SlotKey;

/// Payload reset performed when a slot returns to the free pool
pub trait Recycle {
    /// Reset to a neutral state. Implementations may keep backing storage.
    fn recycle(&mut self);
}

#[derive(Debug)]
struct Entry<T> {
    reserved: bool,
    value: T,
}

/// Generic slot pool shared by geometry, filter, shader and file caches
#[derive(Debug)]
pub struct SlotTable<K: SlotKey, T> {
    entries: Vec<Entry<T>>,
    _key: std::marker::PhantomData<K>,
}

impl<K: SlotKey, T> Default for SlotTable<K, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: SlotKey, T> SlotTable<K, T> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            _key: std::marker::PhantomData,
        }
    }

    /// Reserve the first free slot, creating one with `create` if none is free
    ///
    /// A reused slot keeps its recycled payload (and any storage it retained).
    pub fn reserve_with(&mut self, create: impl FnOnce() -> T) -> (K, &mut T) {
        let index = match self.free_index() {
            Some(index) => index,
            None => {
                self.entries.push(Entry {
                    reserved: false,
                    value: create(),
                });
                self.entries.len() - 1
            }
        };

        let entry = &mut self.entries[index];
        entry.reserved = true;
        (K::from_raw(index as u32 + 1), &mut entry.value)
    }

    /// Reserve a slot and store `value` in it, replacing any recycled payload
    pub fn insert(&mut self, value: T) -> K {
        let entry = Entry {
            reserved: true,
            value,
        };
        let index = match self.free_index() {
            Some(index) => {
                self.entries[index] = entry;
                index
            }
            None => {
                self.entries.push(entry);
                self.entries.len() - 1
            }
        };
        K::from_raw(index as u32 + 1)
    }

    fn free_index(&self) -> Option<usize> {
        self.entries.iter().position(|e| !e.reserved)
    }

    fn index_of(&self, key: K) -> Option<usize> {
        let raw = key.raw();
        if raw == 0 || raw as usize > self.entries.len() {
            return None;
        }
        Some(raw as usize - 1)
    }

    /// Look up a reserved slot; handle 0, out-of-range and released slots yield `None`
    pub fn get(&self, key: K) -> Option<&T> {
        let entry = &self.entries[self.index_of(key)?];
        entry.reserved.then_some(&entry.value)
    }

    pub fn get_mut(&mut self, key: K) -> Option<&mut T> {
        let index = self.index_of(key)?;
        let entry = &mut self.entries[index];
        entry.reserved.then_some(&mut entry.value)
    }

    pub fn is_reserved(&self, key: K) -> bool {
        self.get(key).is_some()
    }

    /// Number of currently reserved slots
    pub fn reserved_count(&self) -> usize {
        self.entries.iter().filter(|e| e.reserved).count()
    }

    /// Number of physical slots (reserved or free)
    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    /// Iterate over every physical payload, reserved or not
    pub fn payloads_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.entries.iter_mut().map(|e| &mut e.value)
    }

    /// Remove every slot, returning the payloads for teardown
    pub fn drain(&mut self) -> impl Iterator<Item = T> + '_ {
        self.entries.drain(..).map(|e| e.value)
    }
}

impl<K: SlotKey, T: Recycle> SlotTable<K, T> {
    /// Return a slot to the free pool
    ///
    /// No-op for handle 0, unknown handles and slots that are already free.
    /// Returns whether a slot was actually released.
    pub fn release(&mut self, key: K) -> bool {
        let Some(index) = self.index_of(key) else {
            return false;
        };
        let entry = &mut self.entries[index];
        if !entry.reserved {
            return false;
        }
        entry.reserved = false;
        entry.value.recycle();
        true
    }
}

impl<K: SlotKey, T: Default> SlotTable<K, T> {
    /// Reserve a slot with a default payload for fresh slots
    pub fn reserve(&mut self) -> (K, &mut T) {
        self.reserve_with(T::default)
    }
}
