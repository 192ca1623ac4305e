//! Key-value snapshot abstraction consumed by the contract runtime.
//!
//! The [`State`] trait is the whole contract between the runtime and the ledger: point
//! reads and writes plus an ordered prefix scan. [`MemoryState`] is a plain in-memory
//! store and [`OverlayState`] buffers writes over a read-only base so an execution can be
//! committed or discarded as a unit.

use std::collections::BTreeMap;
use std::ops::Bound;

/// Direction of a prefix scan.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum SeekDirection {
    #[default]
    Forward,
    Backward,
}

/// Byte-keyed storage seen by an execution.
pub trait State {
    /// Retrieves a value by key, returning `None` if the key does not exist.
    fn get(&self, key: &[u8]) -> Option<Vec<u8>>;
    /// Stores a key-value pair, overwriting any existing value.
    fn put(&mut self, key: Vec<u8>, value: Vec<u8>);
    /// Removes a key from storage.
    fn delete(&mut self, key: &[u8]);
    /// Every entry whose key starts with `prefix`, in key order (reversed for
    /// [`SeekDirection::Backward`]).
    fn find(&self, prefix: &[u8], direction: SeekDirection) -> Vec<(Vec<u8>, Vec<u8>)>;
}

fn scan<'m, V>(
    map: &'m BTreeMap<Vec<u8>, V>,
    prefix: &'m [u8],
) -> impl Iterator<Item = (&'m Vec<u8>, &'m V)> + 'm {
    map.range::<[u8], _>((Bound::Included(prefix), Bound::Unbounded))
        .take_while(move |(key, _)| key.starts_with(prefix))
}

/// In-memory [`State`] backed by an ordered map.
#[derive(Clone, Debug, Default)]
pub struct MemoryState {
    data: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl MemoryState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_data(data: Vec<(Vec<u8>, Vec<u8>)>) -> Self {
        Self {
            data: data.into_iter().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Applies writes produced by [`OverlayState::into_writes`].
    pub fn apply(&mut self, writes: Vec<(Vec<u8>, Option<Vec<u8>>)>) {
        for (key, value) in writes {
            match value {
                Some(value) => {
                    self.data.insert(key, value);
                }
                None => {
                    self.data.remove(&key);
                }
            }
        }
    }
}

impl State for MemoryState {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.data.get(key).cloned()
    }

    fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.data.insert(key, value);
    }

    fn delete(&mut self, key: &[u8]) {
        self.data.remove(key);
    }

    fn find(&self, prefix: &[u8], direction: SeekDirection) -> Vec<(Vec<u8>, Vec<u8>)> {
        let mut entries: Vec<_> = scan(&self.data, prefix)
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        if direction == SeekDirection::Backward {
            entries.reverse();
        }
        entries
    }
}

/// Write-through overlay on top of a base storage.
///
/// Reads fall through to the base for keys not yet written. Pending writes are
/// `Some(value)` for insertions and `None` for deletions.
pub struct OverlayState<'a> {
    base: &'a dyn State,
    writes: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

impl<'a> OverlayState<'a> {
    pub fn new(base: &'a dyn State) -> Self {
        Self {
            base,
            writes: BTreeMap::new(),
        }
    }

    /// Consumes the overlay and returns the pending writes in key order.
    pub fn into_writes(self) -> Vec<(Vec<u8>, Option<Vec<u8>>)> {
        self.writes.into_iter().collect()
    }
}

impl State for OverlayState<'_> {
    fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        match self.writes.get(key) {
            Some(value) => value.clone(),
            None => self.base.get(key),
        }
    }

    fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.writes.insert(key, Some(value));
    }

    fn delete(&mut self, key: &[u8]) {
        self.writes.insert(key.to_vec(), None);
    }

    fn find(&self, prefix: &[u8], direction: SeekDirection) -> Vec<(Vec<u8>, Vec<u8>)> {
        let mut merged: BTreeMap<Vec<u8>, Vec<u8>> = self
            .base
            .find(prefix, SeekDirection::Forward)
            .into_iter()
            .collect();
        for (key, value) in scan(&self.writes, prefix) {
            match value {
                Some(value) => {
                    merged.insert(key.clone(), value.clone());
                }
                None => {
                    merged.remove(key);
                }
            }
        }
        let mut entries: Vec<_> = merged.into_iter().collect();
        if direction == SeekDirection::Backward {
            entries.reverse();
        }
        entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kv(k: &[u8], v: &[u8]) -> (Vec<u8>, Vec<u8>) {
        (k.to_vec(), v.to_vec())
    }

    #[test]
    fn overlay_reads_through_to_base() {
        let base = MemoryState::with_data(vec![kv(b"key", b"value")]);
        let overlay = OverlayState::new(&base);
        assert_eq!(overlay.get(b"key"), Some(b"value".to_vec()));
        assert_eq!(overlay.get(b"missing"), None);
    }

    #[test]
    fn overlay_write_shadows_base() {
        let base = MemoryState::with_data(vec![kv(b"key", b"old")]);
        let mut overlay = OverlayState::new(&base);
        overlay.put(b"key".to_vec(), b"new".to_vec());
        assert_eq!(overlay.get(b"key"), Some(b"new".to_vec()));
        assert_eq!(base.get(b"key"), Some(b"old".to_vec()));
    }

    #[test]
    fn overlay_delete_hides_base_entry() {
        let base = MemoryState::with_data(vec![kv(b"key", b"value")]);
        let mut overlay = OverlayState::new(&base);
        overlay.delete(b"key");
        assert_eq!(overlay.get(b"key"), None);
    }

    #[test]
    fn find_stops_at_prefix_boundary() {
        let state = MemoryState::with_data(vec![
            kv(b"a1", b"1"),
            kv(b"a2", b"2"),
            kv(b"b1", b"3"),
            kv(b"a", b"0"),
        ]);
        let keys: Vec<_> = state
            .find(b"a", SeekDirection::Forward)
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(keys, vec![b"a".to_vec(), b"a1".to_vec(), b"a2".to_vec()]);

        let backwards: Vec<_> = state
            .find(b"a", SeekDirection::Backward)
            .into_iter()
            .map(|(k, _)| k)
            .collect();
        assert_eq!(backwards, vec![b"a2".to_vec(), b"a1".to_vec(), b"a".to_vec()]);
    }

    #[test]
    fn overlay_find_merges_pending_writes() {
        let base = MemoryState::with_data(vec![kv(b"p1", b"base"), kv(b"p2", b"gone")]);
        let mut overlay = OverlayState::new(&base);
        overlay.delete(b"p2");
        overlay.put(b"p3".to_vec(), b"new".to_vec());
        overlay.put(b"q1".to_vec(), b"other".to_vec());
        assert_eq!(
            overlay.find(b"p", SeekDirection::Forward),
            vec![kv(b"p1", b"base"), kv(b"p3", b"new")]
        );
    }

    #[test]
    fn into_writes_applies_to_memory_state() {
        let mut base = MemoryState::with_data(vec![kv(b"c", b"old")]);
        let writes = {
            let mut overlay = OverlayState::new(&base);
            overlay.put(b"a".to_vec(), b"1".to_vec());
            overlay.delete(b"c");
            overlay.into_writes()
        };
        assert_eq!(writes.len(), 2);
        base.apply(writes);
        assert_eq!(base.get(b"a"), Some(b"1".to_vec()));
        assert_eq!(base.get(b"c"), None);
        assert_eq!(base.len(), 1);
    }
}
