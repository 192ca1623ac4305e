//! Reference counting arena for buffers and compound stack items.
//!
//! Every object lives in an arena slot addressed by [`ObjectId`]. The counter tracks:
//! - per object, how many stack and slot positions hold it
//! - per object, which parents contain it and how many times
//! - a global `references_count` over every stack position and every compound element
//!
//! Objects whose stack count drops to zero become candidates. [`ReferenceCounter::check_zero_referred`]
//! runs Tarjan over the candidates and their parent closure and releases every component
//! that no stack position can reach, cycles included.

use crate::virtual_machine::engine::limits::ExecutionEngineLimits;
use crate::virtual_machine::engine::tarjan;
use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::stack_item::{HeapObject, MapKey, ObjectId, StackItem};
use indexmap::IndexMap;
use std::collections::{BTreeMap, BTreeSet};

/// Candidate count that triggers a sweep at the next instruction boundary.
pub const ZERO_REFERRED_THRESHOLD: usize = 1024;

#[derive(Debug)]
struct Entry {
    object: HeapObject,
    stack_references: usize,
    parents: BTreeMap<ObjectId, usize>,
}

#[derive(Debug, Default)]
pub struct ReferenceCounter {
    entries: Vec<Option<Entry>>,
    zero_referred: BTreeSet<ObjectId>,
    references_count: usize,
}

impl ReferenceCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current number of tracked references.
    pub fn count(&self) -> usize {
        self.references_count
    }

    /// Number of objects still allocated in the arena.
    pub fn live_objects(&self) -> usize {
        self.entries.iter().filter(|e| e.is_some()).count()
    }

    /// Number of pending collection candidates.
    pub fn zero_referred_len(&self) -> usize {
        self.zero_referred.len()
    }

    pub fn contains(&self, id: ObjectId) -> bool {
        self.entry(id).is_some()
    }

    /// Places `object` in the arena and counts its elements as references.
    ///
    /// The new object starts as a collection candidate until something holds it.
    pub fn allocate(&mut self, object: HeapObject) -> ObjectId {
        let id = ObjectId(self.entries.len());
        let children: Vec<StackItem> = object.sub_items().cloned().collect();
        let keys = match &object {
            HeapObject::Map(map) => map.len(),
            _ => 0,
        };
        self.entries.push(Some(Entry {
            object,
            stack_references: 0,
            parents: BTreeMap::new(),
        }));
        self.references_count += keys;
        for child in &children {
            self.add_reference(child, id);
        }
        self.zero_referred.insert(id);
        id
    }

    /// Records `count` new stack or slot positions holding `item`.
    pub fn add_stack_reference(&mut self, item: &StackItem, count: usize) {
        self.references_count += count;
        let Some(id) = item.object_id() else {
            return;
        };
        if let Some(entry) = self.entry_mut(id) {
            entry.stack_references += count;
            self.zero_referred.remove(&id);
        }
    }

    /// Records that one stack or slot position no longer holds `item`.
    pub fn remove_stack_reference(&mut self, item: &StackItem) {
        self.references_count = self.references_count.saturating_sub(1);
        let Some(id) = item.object_id() else {
            return;
        };
        if let Some(entry) = self.entry_mut(id) {
            entry.stack_references = entry.stack_references.saturating_sub(1);
            if entry.stack_references == 0 {
                self.zero_referred.insert(id);
            }
        }
    }

    /// Records that `parent` now contains `item` once more.
    pub fn add_reference(&mut self, item: &StackItem, parent: ObjectId) {
        self.references_count += 1;
        let Some(id) = item.object_id() else {
            return;
        };
        if let Some(entry) = self.entry_mut(id) {
            *entry.parents.entry(parent).or_insert(0) += 1;
        }
    }

    /// Records that `parent` contains `item` once less.
    pub fn remove_reference(&mut self, item: &StackItem, parent: ObjectId) {
        self.references_count = self.references_count.saturating_sub(1);
        let Some(id) = item.object_id() else {
            return;
        };
        if let Some(entry) = self.entry_mut(id) {
            if let Some(n) = entry.parents.get_mut(&parent) {
                *n -= 1;
                if *n == 0 {
                    entry.parents.remove(&parent);
                }
            }
            if entry.stack_references == 0 {
                self.zero_referred.insert(id);
            }
        }
    }

    pub fn add_zero_referred(&mut self, id: ObjectId) {
        if self.contains(id) {
            self.zero_referred.insert(id);
        }
    }

    /// Releases every unreachable object among the candidates and returns the new count.
    ///
    /// Must only run at instruction boundaries: an item popped mid-instruction has no
    /// stack reference until it is pushed or stored again.
    pub fn check_zero_referred(&mut self) -> usize {
        while !self.zero_referred.is_empty() {
            let candidates: Vec<ObjectId> = std::mem::take(&mut self.zero_referred)
                .into_iter()
                .filter(|id| self.contains(*id))
                .collect();

            let components = tarjan::strongly_connected_components(&candidates, |id| {
                self.entry(id)
                    .map(|e| e.parents.keys().copied().collect())
                    .unwrap_or_default()
            });
            let visited: BTreeSet<ObjectId> = components.iter().flatten().copied().collect();

            // Parents come before children, so a parent's liveness is settled first.
            let mut live: BTreeSet<ObjectId> = BTreeSet::new();
            let mut requeue = Vec::new();
            for component in components {
                let reachable = component.iter().any(|id| {
                    self.entry(*id).is_some_and(|e| {
                        e.stack_references > 0 || e.parents.keys().any(|p| live.contains(p))
                    })
                });
                if reachable {
                    live.extend(component);
                    continue;
                }

                let members: BTreeSet<ObjectId> = component.iter().copied().collect();
                for id in &component {
                    let Some(entry) = self.entries.get_mut(id.0).and_then(Option::take) else {
                        continue;
                    };
                    self.references_count = self
                        .references_count
                        .saturating_sub(entry.object.sub_items_count());
                    for child in entry.object.sub_items() {
                        let Some(child_id) = child.object_id() else {
                            continue;
                        };
                        if members.contains(&child_id) {
                            continue;
                        }
                        if let Some(child_entry) = self.entry_mut(child_id) {
                            child_entry.parents.remove(id);
                            if child_entry.stack_references == 0 && !visited.contains(&child_id) {
                                requeue.push(child_id);
                            }
                        }
                    }
                }
            }
            self.zero_referred.extend(requeue);
        }
        self.references_count
    }

    fn entry(&self, id: ObjectId) -> Option<&Entry> {
        self.entries.get(id.0).and_then(Option::as_ref)
    }

    fn entry_mut(&mut self, id: ObjectId) -> Option<&mut Entry> {
        self.entries.get_mut(id.0).and_then(Option::as_mut)
    }

    fn released(id: ObjectId) -> VMError {
        VMError::InvalidOperation(format!("object #{} has been released", id.0))
    }

    /// Borrows an arena object.
    pub fn get(&self, id: ObjectId) -> Result<&HeapObject, VMError> {
        self.entry(id)
            .map(|e| &e.object)
            .ok_or_else(|| Self::released(id))
    }

    fn get_mut(&mut self, id: ObjectId) -> Result<&mut HeapObject, VMError> {
        self.entry_mut(id)
            .map(|e| &mut e.object)
            .ok_or_else(|| Self::released(id))
    }

    pub fn buffer(&self, id: ObjectId) -> Result<&Vec<u8>, VMError> {
        match self.get(id)? {
            HeapObject::Buffer(data) => Ok(data),
            other => Err(kind_mismatch(other, "Buffer")),
        }
    }

    /// Mutable access to a buffer's bytes. Buffers hold no references, so no counts change.
    pub fn buffer_mut(&mut self, id: ObjectId) -> Result<&mut Vec<u8>, VMError> {
        match self.get_mut(id)? {
            HeapObject::Buffer(data) => Ok(data),
            other => Err(kind_mismatch(other, "Buffer")),
        }
    }

    /// Elements of an Array or Struct.
    pub fn array(&self, id: ObjectId) -> Result<&Vec<StackItem>, VMError> {
        match self.get(id)? {
            HeapObject::Array(items) | HeapObject::Struct(items) => Ok(items),
            other => Err(kind_mismatch(other, "Array")),
        }
    }

    fn array_mut(&mut self, id: ObjectId) -> Result<&mut Vec<StackItem>, VMError> {
        match self.get_mut(id)? {
            HeapObject::Array(items) | HeapObject::Struct(items) => Ok(items),
            other => Err(kind_mismatch(other, "Array")),
        }
    }

    pub fn map(&self, id: ObjectId) -> Result<&IndexMap<MapKey, StackItem>, VMError> {
        match self.get(id)? {
            HeapObject::Map(map) => Ok(map),
            other => Err(kind_mismatch(other, "Map")),
        }
    }

    fn map_mut(&mut self, id: ObjectId) -> Result<&mut IndexMap<MapKey, StackItem>, VMError> {
        match self.get_mut(id)? {
            HeapObject::Map(map) => Ok(map),
            other => Err(kind_mismatch(other, "Map")),
        }
    }

    pub fn array_push(&mut self, id: ObjectId, item: StackItem) -> Result<(), VMError> {
        self.array_mut(id)?.push(item.clone());
        self.add_reference(&item, id);
        Ok(())
    }

    pub fn array_insert(&mut self, id: ObjectId, index: usize, item: StackItem) -> Result<(), VMError> {
        let items = self.array_mut(id)?;
        if index > items.len() {
            return Err(VMError::OutOfRange {
                index: index as i64,
                count: items.len(),
            });
        }
        items.insert(index, item.clone());
        self.add_reference(&item, id);
        Ok(())
    }

    /// Replaces the element at `index`.
    ///
    /// Returns [`VMError::IndexOutOfRange`] when the index is past the end.
    pub fn array_set(&mut self, id: ObjectId, index: usize, item: StackItem) -> Result<(), VMError> {
        let items = self.array_mut(id)?;
        let count = items.len();
        let slot = items.get_mut(index).ok_or(VMError::IndexOutOfRange {
            index: index as i64,
            count,
        })?;
        let old = std::mem::replace(slot, item.clone());
        self.remove_reference(&old, id);
        self.add_reference(&item, id);
        Ok(())
    }

    pub fn array_remove(&mut self, id: ObjectId, index: usize) -> Result<StackItem, VMError> {
        let items = self.array_mut(id)?;
        if index >= items.len() {
            return Err(VMError::OutOfRange {
                index: index as i64,
                count: items.len(),
            });
        }
        let old = items.remove(index);
        self.remove_reference(&old, id);
        Ok(old)
    }

    pub fn array_pop(&mut self, id: ObjectId) -> Result<StackItem, VMError> {
        let old = self.array_mut(id)?.pop().ok_or(VMError::OutOfRange {
            index: -1,
            count: 0,
        })?;
        self.remove_reference(&old, id);
        Ok(old)
    }

    pub fn array_clear(&mut self, id: ObjectId) -> Result<(), VMError> {
        let old = std::mem::take(self.array_mut(id)?);
        for item in &old {
            self.remove_reference(item, id);
        }
        Ok(())
    }

    pub fn array_reverse(&mut self, id: ObjectId) -> Result<(), VMError> {
        self.array_mut(id)?.reverse();
        Ok(())
    }

    /// Inserts or replaces a map entry. A new key counts as one reference.
    pub fn map_set(&mut self, id: ObjectId, key: MapKey, value: StackItem) -> Result<(), VMError> {
        let old = self.map_mut(id)?.insert(key, value.clone());
        match old {
            Some(old) => self.remove_reference(&old, id),
            None => self.references_count += 1,
        }
        self.add_reference(&value, id);
        Ok(())
    }

    /// Removes a map entry, keeping the order of the remaining entries.
    pub fn map_remove(&mut self, id: ObjectId, key: &MapKey) -> Result<Option<StackItem>, VMError> {
        let old = self.map_mut(id)?.shift_remove(key);
        if let Some(old) = &old {
            self.references_count = self.references_count.saturating_sub(1);
            self.remove_reference(old, id);
        }
        Ok(old)
    }

    pub fn map_clear(&mut self, id: ObjectId) -> Result<(), VMError> {
        let old = std::mem::take(self.map_mut(id)?);
        for value in old.values() {
            self.references_count = self.references_count.saturating_sub(1);
            self.remove_reference(value, id);
        }
        Ok(())
    }

    /// Empties an Array, Struct, Map or Buffer.
    pub fn clear_items(&mut self, id: ObjectId) -> Result<(), VMError> {
        let (is_map, is_buffer) = match self.get(id)? {
            HeapObject::Map(_) => (true, false),
            HeapObject::Buffer(_) => (false, true),
            _ => (false, false),
        };
        if is_map {
            self.map_clear(id)
        } else if is_buffer {
            self.buffer_mut(id)?.clear();
            Ok(())
        } else {
            self.array_clear(id)
        }
    }

    /// Copies a struct, recursively copying nested structs and sharing everything else.
    ///
    /// Fails once more than `max_stack_size - 1` elements have been copied.
    pub fn struct_clone(&mut self, id: ObjectId, limits: &ExecutionEngineLimits) -> Result<ObjectId, VMError> {
        let mut budget = limits.max_stack_size as i64 - 1;
        let result = self.allocate(HeapObject::Struct(Vec::new()));
        let mut queue = std::collections::VecDeque::from([(result, id)]);

        while let Some((target, source)) = queue.pop_front() {
            let items = self.array(source)?.clone();
            for item in items {
                budget -= 1;
                if budget < 0 {
                    return Err(VMError::InvalidOperation("beyond struct clone limits".into()));
                }
                match item {
                    StackItem::Struct(nested) => {
                        let copy = self.allocate(HeapObject::Struct(Vec::new()));
                        self.array_push(target, StackItem::Struct(copy))?;
                        queue.push_back((copy, nested));
                    }
                    other => self.array_push(target, other)?,
                }
            }
        }
        Ok(result)
    }
}

fn kind_mismatch(object: &HeapObject, to: &'static str) -> VMError {
    let from = match object {
        HeapObject::Buffer(_) => "Buffer",
        HeapObject::Array(_) => "Array",
        HeapObject::Struct(_) => "Struct",
        HeapObject::Map(_) => "Map",
    };
    VMError::InvalidCast { from, to }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn self_referencing_array_is_collected() {
        let mut rc = ReferenceCounter::new();
        let before = rc.count();

        let id = rc.allocate(HeapObject::Array(Vec::new()));
        let item = StackItem::Array(id);
        rc.add_stack_reference(&item, 1);
        rc.array_push(id, item.clone()).unwrap();
        assert_eq!(rc.count(), before + 2);

        rc.remove_stack_reference(&item);
        assert_eq!(rc.check_zero_referred(), before);
        assert_eq!(rc.live_objects(), 0);
    }

    #[test]
    fn reachable_child_survives_sweep() {
        let mut rc = ReferenceCounter::new();
        let parent = rc.allocate(HeapObject::Array(Vec::new()));
        let child = rc.allocate(HeapObject::Array(Vec::new()));
        rc.add_stack_reference(&StackItem::Array(parent), 1);
        rc.array_push(parent, StackItem::Array(child)).unwrap();

        assert_eq!(rc.check_zero_referred(), 2);
        assert!(rc.contains(child));

        rc.remove_stack_reference(&StackItem::Array(parent));
        assert_eq!(rc.check_zero_referred(), 0);
        assert!(!rc.contains(child));
        assert!(!rc.contains(parent));
    }

    #[test]
    fn two_node_cycle_with_external_child() {
        let mut rc = ReferenceCounter::new();
        let a = rc.allocate(HeapObject::Array(Vec::new()));
        let b = rc.allocate(HeapObject::Array(Vec::new()));
        let leaf = rc.allocate(HeapObject::Buffer(vec![1, 2, 3]));
        rc.add_stack_reference(&StackItem::Array(a), 1);
        rc.array_push(a, StackItem::Array(b)).unwrap();
        rc.array_push(b, StackItem::Array(a)).unwrap();
        rc.array_push(b, StackItem::Buffer(leaf)).unwrap();
        rc.add_stack_reference(&StackItem::Buffer(leaf), 1);

        rc.remove_stack_reference(&StackItem::Array(a));
        assert_eq!(rc.check_zero_referred(), 1);
        assert!(rc.contains(leaf));
        assert_eq!(rc.live_objects(), 1);
    }

    #[test]
    fn map_entries_count_key_and_value() {
        let mut rc = ReferenceCounter::new();
        let map = rc.allocate(HeapObject::Map(IndexMap::new()));
        let key = MapKey::from_item(&StackItem::from_int(1)).unwrap();
        rc.map_set(map, key.clone(), StackItem::from_int(10)).unwrap();
        assert_eq!(rc.count(), 2);
        rc.map_set(map, key.clone(), StackItem::from_int(11)).unwrap();
        assert_eq!(rc.count(), 2);
        assert!(rc.map_remove(map, &key).unwrap().is_some());
        assert_eq!(rc.count(), 0);
    }

    #[test]
    fn array_set_out_of_range_is_index_error() {
        let mut rc = ReferenceCounter::new();
        let id = rc.allocate(HeapObject::Array(vec![StackItem::Null]));
        assert_eq!(
            rc.array_set(id, 3, StackItem::Null),
            Err(VMError::IndexOutOfRange { index: 3, count: 1 })
        );
    }

    #[test]
    fn struct_clone_copies_nested_structs() {
        let mut rc = ReferenceCounter::new();
        let inner = rc.allocate(HeapObject::Struct(vec![StackItem::from_int(1)]));
        let outer = rc.allocate(HeapObject::Struct(vec![StackItem::Struct(inner)]));
        let copy = rc
            .struct_clone(outer, &ExecutionEngineLimits::default())
            .unwrap();
        let nested = rc.array(copy).unwrap()[0].clone();
        assert!(matches!(nested, StackItem::Struct(id) if id != inner));

        let tight = ExecutionEngineLimits {
            max_stack_size: 2,
            ..Default::default()
        };
        assert!(rc.struct_clone(outer, &tight).is_err());
    }
}
