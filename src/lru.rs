//! Keyed, insertion-ordered cache of flow state.
//!
//! Backs the transport and application flow tables in [`crate::manager`]. Every mutation is a
//! push-to-back, so the map's front-to-back order always reflects recency of last touch; the
//! housekeeper (§4.7) relies on this to stop its purge scan at the first still-fresh entry instead
//! of walking the whole table.

use std::hash::Hash;
use std::sync::Mutex;

use hashlink::LinkedHashMap;

/// A keyed LRU-ordered map.
///
/// `Get` does not disturb ordering; `Push` always moves the entry to the most-recently-used end,
/// inserting it if absent. `Items` returns a snapshot traversed most-recent first, so callers never
/// hold the internal lock while iterating.
pub struct KeyedLru<K, V> {
    inner: Mutex<LinkedHashMap<K, V>>,
}

impl<K, V> KeyedLru<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        KeyedLru {
            inner: Mutex::new(LinkedHashMap::new()),
        }
    }

    /// Returns a copy of the value for `id`, without changing its position.
    pub fn get(&self, id: &K) -> Option<V> {
        let table = self.inner.lock().unwrap();
        table.get(id).cloned()
    }

    /// Inserts or overwrites `value` for `id` and moves it to the most-recently-used end.
    pub fn push(&self, id: K, value: V) {
        let mut table = self.inner.lock().unwrap();
        table.insert(id.clone(), value);
        table.to_back(&id);
    }

    /// Removes and returns the value for `id`, if present.
    pub fn pop(&self, id: &K) -> Option<V> {
        let mut table = self.inner.lock().unwrap();
        table.remove(id)
    }

    /// Returns every value currently held, most-recently-pushed first.
    pub fn items(&self) -> Vec<V> {
        let table = self.inner.lock().unwrap();
        table.values().rev().cloned().collect()
    }

    /// Evicts entries starting from the least-recently-touched end while `is_stale` holds,
    /// stopping at the first entry that isn't stale. Returns the evicted values.
    ///
    /// This is why every mutation pushes to the back: it keeps the front of the table sorted by
    /// recency, so a purge scan can stop as soon as it hits something fresh instead of walking
    /// every entry on every tick.
    pub fn evict_while(&self, mut is_stale: impl FnMut(&V) -> bool) -> Vec<V> {
        let mut table = self.inner.lock().unwrap();
        let mut evicted = Vec::new();
        while let Some((_, front)) = table.front() {
            if !is_stale(front) {
                break;
            }
            if let Some((_, value)) = table.pop_front() {
                evicted.push(value);
            }
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K, V> Default for KeyedLru<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    fn default() -> Self {
        Self::new()
    }
}
