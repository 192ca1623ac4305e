//! Contract storage: `System.Storage` and `System.Iterator` interop services.
//!
//! Every contract owns the keys prefixed with its id (`i32`, little-endian). A script reaches
//! them through a [`StorageContext`] handed out as an interop interface.

use crate::smart_contract::application_engine::ApplicationEngine;
use crate::smart_contract::binary_serializer;
use crate::smart_contract::call_flags::CallFlags;
use crate::smart_contract::gas::GasCategory;
use crate::smart_contract::interop::{InteropArgs, InteropDescriptor, InteropParameterType};
use crate::state::SeekDirection;
use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::stack_item::{HeapObject, StackItem};
use num_traits::ToPrimitive;
use std::cell::RefCell;
use std::rc::Rc;

pub const MAX_STORAGE_KEY_SIZE: usize = 64;
pub const MAX_STORAGE_VALUE_SIZE: usize = u16::MAX as usize;

/// A contract's view of its storage.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct StorageContext {
    pub id: i32,
    pub is_read_only: bool,
}

impl StorageContext {
    pub fn as_read_only(&self) -> StorageContext {
        StorageContext {
            id: self.id,
            is_read_only: true,
        }
    }
}

/// Full snapshot key of a contract storage entry.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StorageKey {
    pub id: i32,
    pub key: Vec<u8>,
}

impl StorageKey {
    pub fn new(id: i32, key: impl Into<Vec<u8>>) -> Self {
        Self { id, key: key.into() }
    }

    pub fn to_vec(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(4 + self.key.len());
        bytes.extend_from_slice(&self.id.to_le_bytes());
        bytes.extend_from_slice(&self.key);
        bytes
    }
}

/// Options of `System.Storage.Find`.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct FindOptions(u8);

impl FindOptions {
    pub const NONE: FindOptions = FindOptions(0);
    /// Yield keys only.
    pub const KEYS_ONLY: FindOptions = FindOptions(0x01);
    /// Strip the search prefix from keys.
    pub const REMOVE_PREFIX: FindOptions = FindOptions(0x02);
    /// Yield values only.
    pub const VALUES_ONLY: FindOptions = FindOptions(0x04);
    /// Deserialize values as stack items.
    pub const DESERIALIZE_VALUES: FindOptions = FindOptions(0x08);
    /// Yield field 0 of each deserialized value.
    pub const PICK_FIELD0: FindOptions = FindOptions(0x10);
    /// Yield field 1 of each deserialized value.
    pub const PICK_FIELD1: FindOptions = FindOptions(0x20);
    /// Iterate in descending key order.
    pub const BACKWARDS: FindOptions = FindOptions(0x80);

    const ALL: u8 = 0xBF;

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, other: FindOptions) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }

    fn has_any(self, other: u8) -> bool {
        self.0 & other != 0
    }

    /// Checks an options value the way `System.Storage.Find` does.
    ///
    /// Unknown bits and contradictory combinations are catchable
    /// [`VMError::ArgumentOutOfRange`] errors.
    pub fn validate(bits: u8) -> Result<FindOptions, VMError> {
        let invalid = |reason: &str| VMError::ArgumentOutOfRange(format!("find options {bits:#04x}: {reason}"));
        if bits & !Self::ALL != 0 {
            return Err(invalid("unknown flag"));
        }
        let options = FindOptions(bits);
        let keys_only = options.contains(Self::KEYS_ONLY);
        let values_only = options.contains(Self::VALUES_ONLY);
        let deserialize = options.contains(Self::DESERIALIZE_VALUES);
        let pick0 = options.contains(Self::PICK_FIELD0);
        let pick1 = options.contains(Self::PICK_FIELD1);

        if keys_only
            && options.has_any(Self::VALUES_ONLY.0 | Self::DESERIALIZE_VALUES.0 | Self::PICK_FIELD0.0 | Self::PICK_FIELD1.0)
        {
            return Err(invalid("KeysOnly excludes value options"));
        }
        if values_only && (keys_only || options.contains(Self::REMOVE_PREFIX)) {
            return Err(invalid("ValuesOnly excludes key options"));
        }
        if pick0 && pick1 {
            return Err(invalid("PickField0 and PickField1 are exclusive"));
        }
        if (pick0 || pick1) && !deserialize {
            return Err(invalid("PickField requires DeserializeValues"));
        }
        Ok(options)
    }
}

/// Cursor over the entries matched by `System.Storage.Find`.
///
/// Entries are read when the iterator is created; writes made afterwards are not seen.
#[derive(Debug)]
pub struct StorageIterator {
    entries: Vec<(Vec<u8>, Vec<u8>)>,
    /// Bytes to strip from snapshot keys: the id, plus the search prefix under RemovePrefix.
    prefix_length: usize,
    options: FindOptions,
    position: Option<usize>,
}

impl StorageIterator {
    pub fn new(entries: Vec<(Vec<u8>, Vec<u8>)>, prefix_length: usize, options: FindOptions) -> Self {
        Self {
            entries,
            prefix_length,
            options,
            position: None,
        }
    }

    /// Advances to the next entry. Returns `false` once exhausted.
    pub fn next(&mut self) -> bool {
        let next = self.position.map_or(0, |p| p + 1);
        if next < self.entries.len() {
            self.position = Some(next);
            true
        } else {
            self.position = Some(self.entries.len());
            false
        }
    }

    /// The current entry shaped by the find options.
    pub fn value(&self, engine: &ApplicationEngine<'_>) -> Result<StackItem, VMError> {
        let (key, value) = self
            .position
            .and_then(|p| self.entries.get(p))
            .ok_or_else(|| VMError::InvalidOperation("iterator has no current entry".into()))?;
        let key = StackItem::from_bytes(key.get(self.prefix_length..).unwrap_or_default());

        let mut value = if self.options.contains(FindOptions::DESERIALIZE_VALUES) {
            binary_serializer::deserialize(value, &mut engine.heap_mut(), engine.limits())?
        } else {
            StackItem::from_bytes(value.as_slice())
        };
        for (option, index) in [(FindOptions::PICK_FIELD0, 0), (FindOptions::PICK_FIELD1, 1)] {
            if self.options.contains(option) {
                let id = value.array_id().ok_or_else(|| value.invalid_cast("Array"))?;
                let heap = engine.heap();
                let fields = heap.array(id)?;
                let field = fields.get(index).cloned().ok_or(VMError::IndexOutOfRange {
                    index: index as i64,
                    count: fields.len(),
                })?;
                value = field;
            }
        }

        if self.options.contains(FindOptions::KEYS_ONLY) {
            return Ok(key);
        }
        if self.options.contains(FindOptions::VALUES_ONLY) {
            return Ok(value);
        }
        let id = engine.allocate(HeapObject::Struct(vec![key, value]));
        Ok(StackItem::Struct(id))
    }
}

pub(crate) fn descriptors() -> Vec<InteropDescriptor> {
    use InteropParameterType::*;
    vec![
        InteropDescriptor::new("System.Storage.GetContext", get_context, 1 << 4, CallFlags::READ_STATES, &[]),
        InteropDescriptor::new(
            "System.Storage.GetReadOnlyContext",
            get_read_only_context,
            1 << 4,
            CallFlags::READ_STATES,
            &[],
        ),
        InteropDescriptor::new(
            "System.Storage.AsReadOnly",
            as_read_only,
            1 << 4,
            CallFlags::READ_STATES,
            &[InteropInterface],
        ),
        InteropDescriptor::new(
            "System.Storage.Get",
            get,
            1 << 15,
            CallFlags::READ_STATES,
            &[InteropInterface, ByteArray],
        ),
        InteropDescriptor::new(
            "System.Storage.Find",
            find,
            1 << 15,
            CallFlags::READ_STATES,
            &[InteropInterface, ByteArray, Integer],
        ),
        InteropDescriptor::new(
            "System.Storage.Put",
            put,
            1 << 15,
            CallFlags::WRITE_STATES,
            &[InteropInterface, ByteArray, ByteArray],
        ),
        InteropDescriptor::new(
            "System.Storage.Delete",
            delete,
            1 << 15,
            CallFlags::WRITE_STATES,
            &[InteropInterface, ByteArray],
        ),
        InteropDescriptor::new(
            "System.Iterator.Next",
            iterator_next,
            1 << 15,
            CallFlags::NONE,
            &[InteropInterface],
        ),
        InteropDescriptor::new(
            "System.Iterator.Value",
            iterator_value,
            1 << 4,
            CallFlags::NONE,
            &[InteropInterface],
        ),
    ]
}

fn interface_item<T: 'static>(value: T) -> StackItem {
    StackItem::InteropInterface(Rc::new(value))
}

fn current_storage_context(
    engine: &ApplicationEngine<'_>,
    is_read_only: bool,
) -> Result<StackItem, VMError> {
    let id = engine
        .current_state()?
        .contract
        .as_ref()
        .map(|contract| contract.id)
        .ok_or_else(|| VMError::InvalidOperation("storage is only available to contracts".into()))?;
    Ok(interface_item(StorageContext { id, is_read_only }))
}

fn get_context(engine: &mut ApplicationEngine<'_>, _args: &mut InteropArgs) -> Result<Option<StackItem>, VMError> {
    current_storage_context(engine, false).map(Some)
}

fn get_read_only_context(
    engine: &mut ApplicationEngine<'_>,
    _args: &mut InteropArgs,
) -> Result<Option<StackItem>, VMError> {
    current_storage_context(engine, true).map(Some)
}

fn as_read_only(_engine: &mut ApplicationEngine<'_>, args: &mut InteropArgs) -> Result<Option<StackItem>, VMError> {
    let context = args.interface::<StorageContext>()?;
    Ok(Some(interface_item(context.as_read_only())))
}

fn get(engine: &mut ApplicationEngine<'_>, args: &mut InteropArgs) -> Result<Option<StackItem>, VMError> {
    let context = args.interface::<StorageContext>()?;
    let key = args.bytes()?;
    let value = engine.snapshot().get(&StorageKey::new(context.id, key.as_slice()).to_vec());
    Ok(Some(value.map_or(StackItem::Null, StackItem::from_bytes)))
}

fn find(engine: &mut ApplicationEngine<'_>, args: &mut InteropArgs) -> Result<Option<StackItem>, VMError> {
    let context = args.interface::<StorageContext>()?;
    let prefix = args.bytes()?;
    let bits = args.integer()?;
    let bits = bits
        .to_u8()
        .ok_or_else(|| VMError::ArgumentOutOfRange(format!("find options {bits}")))?;
    let options = FindOptions::validate(bits)?;

    let search = StorageKey::new(context.id, prefix.as_slice()).to_vec();
    let direction = if options.contains(FindOptions::BACKWARDS) {
        SeekDirection::Backward
    } else {
        SeekDirection::Forward
    };
    let entries = engine.snapshot().find(&search, direction);
    let prefix_length = if options.contains(FindOptions::REMOVE_PREFIX) {
        search.len()
    } else {
        4
    };
    let iterator = StorageIterator::new(entries, prefix_length, options);
    Ok(Some(interface_item(RefCell::new(iterator))))
}

/// Storage fee units for writing `new_len` bytes under a key holding `old`.
fn put_fee_units(key_len: usize, old: Option<usize>, new_len: usize) -> usize {
    match old {
        None => key_len + new_len,
        Some(_) if new_len == 0 => 0,
        Some(old_len) if new_len <= old_len => (new_len - 1) / 4 + 1,
        Some(0) => new_len,
        Some(old_len) => (old_len - 1) / 4 + 1 + new_len - old_len,
    }
}

fn put(engine: &mut ApplicationEngine<'_>, args: &mut InteropArgs) -> Result<Option<StackItem>, VMError> {
    let context = args.interface::<StorageContext>()?;
    let key = args.bytes()?;
    let value = args.bytes()?;
    if key.len() > MAX_STORAGE_KEY_SIZE {
        return Err(VMError::ArgumentError(format!(
            "storage key of {} bytes exceeds {MAX_STORAGE_KEY_SIZE}",
            key.len()
        )));
    }
    if value.len() > MAX_STORAGE_VALUE_SIZE {
        return Err(VMError::ArgumentError(format!(
            "storage value of {} bytes exceeds {MAX_STORAGE_VALUE_SIZE}",
            value.len()
        )));
    }
    if context.is_read_only {
        return Err(VMError::ArgumentError("storage context is read-only".into()));
    }

    let storage_key = StorageKey::new(context.id, key.as_slice()).to_vec();
    let old = engine.snapshot().get(&storage_key).map(|old| old.len());
    let units = put_fee_units(key.len(), old, value.len());
    engine.add_fee(GasCategory::Storage, units as i64 * engine.storage_price())?;
    engine.snapshot_mut().put(storage_key, value.to_vec());
    Ok(None)
}

fn delete(engine: &mut ApplicationEngine<'_>, args: &mut InteropArgs) -> Result<Option<StackItem>, VMError> {
    let context = args.interface::<StorageContext>()?;
    let key = args.bytes()?;
    if context.is_read_only {
        return Err(VMError::ArgumentError("storage context is read-only".into()));
    }
    engine
        .snapshot_mut()
        .delete(&StorageKey::new(context.id, key.as_slice()).to_vec());
    Ok(None)
}

fn iterator_next(_engine: &mut ApplicationEngine<'_>, args: &mut InteropArgs) -> Result<Option<StackItem>, VMError> {
    let iterator = args.interface::<RefCell<StorageIterator>>()?;
    let advanced = iterator.borrow_mut().next();
    Ok(Some(StackItem::Boolean(advanced)))
}

fn iterator_value(engine: &mut ApplicationEngine<'_>, args: &mut InteropArgs) -> Result<Option<StackItem>, VMError> {
    let iterator = args.interface::<RefCell<StorageIterator>>()?;
    let value = iterator.borrow().value(engine)?;
    Ok(Some(value))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_key_prefixes_the_contract_id() {
        assert_eq!(StorageKey::new(-1, vec![8u8, 1]).to_vec(), vec![0xFF, 0xFF, 0xFF, 0xFF, 8, 1]);
        assert_eq!(StorageKey::new(2, b"k".to_vec()).to_vec(), vec![2, 0, 0, 0, b'k']);
    }

    #[test]
    fn find_options_rejects_contradictions() {
        let ok = [0x00, 0x01, 0x03, 0x04, 0x08, 0x18, 0x28, 0x80, 0x0A];
        for bits in ok {
            assert!(FindOptions::validate(bits).is_ok(), "{bits:#04x} should be valid");
        }
        let bad = [0x40, 0x05, 0x09, 0x11, 0x06, 0x38, 0x10, 0x20];
        for bits in bad {
            assert!(
                matches!(FindOptions::validate(bits), Err(VMError::ArgumentOutOfRange(_))),
                "{bits:#04x} should be rejected"
            );
        }
    }

    #[test]
    fn put_fee_follows_size_growth() {
        assert_eq!(put_fee_units(3, None, 5), 8);
        assert_eq!(put_fee_units(3, Some(10), 0), 0);
        assert_eq!(put_fee_units(3, Some(10), 4), 1);
        assert_eq!(put_fee_units(3, Some(10), 9), 3);
        assert_eq!(put_fee_units(3, Some(0), 6), 6);
        assert_eq!(put_fee_units(3, Some(4), 10), 7);
    }

    #[test]
    fn iterator_walks_entries_once() {
        let mut iterator = StorageIterator::new(
            vec![(vec![0, 0, 0, 0, 1], vec![10]), (vec![0, 0, 0, 0, 2], vec![20])],
            4,
            FindOptions::NONE,
        );
        assert!(iterator.next());
        assert!(iterator.next());
        assert!(!iterator.next());
        assert!(!iterator.next());
    }

    #[test]
    fn read_only_context_stays_on_the_same_contract() {
        let context = StorageContext {
            id: 7,
            is_read_only: false,
        };
        assert_eq!(
            context.as_read_only(),
            StorageContext {
                id: 7,
                is_read_only: true
            }
        );
    }
}
