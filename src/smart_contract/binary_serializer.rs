//! Binary form of stack items, used where values leave the engine: storage values read
//! back by `Find` and the size check on notifications.
//!
//! # Format
//!
//! Each item is its type byte followed by:
//! - Null: nothing
//! - Boolean: one byte, 0 or 1
//! - Integer, ByteString, Buffer: var-int length and the bytes
//! - Array, Struct: var-int count and the elements
//! - Map: var-int count and the entries, key before value
//!
//! A var-int is one byte below `0xFD`, else a marker byte (`0xFD`, `0xFE`, `0xFF`)
//! followed by a little-endian `u16`, `u32` or `u64`.

use crate::types::encoding::{DecodeError, read_array, read_bytes};
use crate::virtual_machine::engine::limits::ExecutionEngineLimits;
use crate::virtual_machine::engine::reference_counter::ReferenceCounter;
use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::stack_item::{
    HeapObject, MAX_INTEGER_SIZE, MapKey, ObjectId, StackItem, StackItemType, bytes_to_integer,
    integer_to_bytes,
};
use indexmap::IndexMap;
use std::collections::HashSet;

pub fn write_var_int(out: &mut Vec<u8>, value: u64) {
    if value < 0xFD {
        out.push(value as u8);
    } else if value <= 0xFFFF {
        out.push(0xFD);
        out.extend_from_slice(&(value as u16).to_le_bytes());
    } else if value <= 0xFFFF_FFFF {
        out.push(0xFE);
        out.extend_from_slice(&(value as u32).to_le_bytes());
    } else {
        out.push(0xFF);
        out.extend_from_slice(&value.to_le_bytes());
    }
}

fn write_var_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    write_var_int(out, bytes.len() as u64);
    out.extend_from_slice(bytes);
}

/// Reads a var-int no greater than `max`.
pub fn read_var_int(input: &mut &[u8], max: u64) -> Result<u64, DecodeError> {
    let value = match read_array::<1>(input)?[0] {
        0xFD => u16::from_le_bytes(read_array(input)?) as u64,
        0xFE => u32::from_le_bytes(read_array(input)?) as u64,
        0xFF => u64::from_le_bytes(read_array(input)?),
        small => small as u64,
    };
    if value > max {
        return Err(DecodeError::LengthOverflow);
    }
    Ok(value)
}

fn read_var_bytes<'a>(input: &mut &'a [u8], max: usize) -> Result<&'a [u8], DecodeError> {
    let len = read_var_int(input, max as u64)? as usize;
    read_bytes(input, len)
}

/// Serializes `item` within the engine's item size and stack size limits.
pub fn serialize(
    item: &StackItem,
    heap: &ReferenceCounter,
    limits: &ExecutionEngineLimits,
) -> Result<Vec<u8>, VMError> {
    serialize_with_limits(item, heap, limits.max_item_size, limits.max_stack_size)
}

/// Serializes `item`, failing past `max_size` output bytes or `max_items` items.
///
/// Pointers and interop interfaces cannot be serialized. A compound reached twice, whether
/// through a cycle or through sharing, is rejected as well.
pub fn serialize_with_limits(
    item: &StackItem,
    heap: &ReferenceCounter,
    max_size: usize,
    max_items: usize,
) -> Result<Vec<u8>, VMError> {
    let mut out = Vec::new();
    let mut serialized: HashSet<ObjectId> = HashSet::new();
    let mut unserialized = vec![item.clone()];
    let mut remaining = max_items;

    while let Some(item) = unserialized.pop() {
        remaining = remaining
            .checked_sub(1)
            .ok_or_else(|| VMError::InvalidOperation("too many items to serialize".into()))?;
        out.push(item.item_type() as u8);
        match &item {
            StackItem::Null => {}
            StackItem::Boolean(b) => out.push(*b as u8),
            StackItem::Integer(i) => write_var_bytes(&mut out, &integer_to_bytes(i)),
            StackItem::ByteString(b) => write_var_bytes(&mut out, b),
            StackItem::Buffer(id) => write_var_bytes(&mut out, heap.buffer(*id)?),
            StackItem::Array(id) | StackItem::Struct(id) => {
                if !serialized.insert(*id) {
                    return Err(VMError::NotSupported("serializing a compound twice"));
                }
                let items = heap.array(*id)?;
                write_var_int(&mut out, items.len() as u64);
                unserialized.extend(items.iter().rev().cloned());
            }
            StackItem::Map(id) => {
                if !serialized.insert(*id) {
                    return Err(VMError::NotSupported("serializing a compound twice"));
                }
                let map = heap.map(*id)?;
                write_var_int(&mut out, map.len() as u64);
                for (key, value) in map.iter().rev() {
                    unserialized.push(value.clone());
                    unserialized.push(key.to_item());
                }
            }
            StackItem::Pointer { .. } | StackItem::InteropInterface(_) => {
                return Err(VMError::NotSupported("serializing pointers or interop interfaces"));
            }
        }
        if out.len() > max_size {
            return Err(VMError::ItemTooLarge {
                size: out.len(),
                max: max_size,
            });
        }
    }
    Ok(out)
}

/// Deserializes an item, allocating its compounds in `heap`.
///
/// The result holds no stack reference yet; it must be pushed or stored before the next
/// instruction boundary.
pub fn deserialize(
    data: &[u8],
    heap: &mut ReferenceCounter,
    limits: &ExecutionEngineLimits,
) -> Result<StackItem, VMError> {
    deserialize_with_limits(
        data,
        heap,
        data.len().min(limits.max_item_size),
        limits.max_stack_size,
    )
}

fn pop(stack: &mut Vec<StackItem>) -> Result<StackItem, VMError> {
    stack.pop().ok_or(VMError::Decode(DecodeError::UnexpectedEof))
}

enum Placeholder {
    Item(StackItem),
    Compound { kind: StackItemType, count: usize },
}

pub fn deserialize_with_limits(
    data: &[u8],
    heap: &mut ReferenceCounter,
    max_size: usize,
    max_items: usize,
) -> Result<StackItem, VMError> {
    let mut input = data;
    let mut deserialized: Vec<Placeholder> = Vec::new();
    let mut undeserialized = 1usize;

    while undeserialized > 0 {
        undeserialized -= 1;
        let kind = StackItemType::try_from(read_array::<1>(&mut input)?[0])?;
        let placeholder = match kind {
            StackItemType::Any => Placeholder::Item(StackItem::Null),
            StackItemType::Boolean => match read_array::<1>(&mut input)?[0] {
                0 => Placeholder::Item(StackItem::Boolean(false)),
                1 => Placeholder::Item(StackItem::Boolean(true)),
                _ => return Err(DecodeError::InvalidValue.into()),
            },
            StackItemType::Integer => {
                let bytes = read_var_bytes(&mut input, MAX_INTEGER_SIZE)?;
                Placeholder::Item(StackItem::Integer(bytes_to_integer(bytes)))
            }
            StackItemType::ByteString => {
                let bytes = read_var_bytes(&mut input, max_size)?;
                Placeholder::Item(StackItem::from_bytes(bytes.to_vec()))
            }
            StackItemType::Buffer => {
                let bytes = read_var_bytes(&mut input, max_size)?;
                let id = heap.allocate(HeapObject::Buffer(bytes.to_vec()));
                Placeholder::Item(StackItem::Buffer(id))
            }
            StackItemType::Array | StackItemType::Struct => {
                let count = read_var_int(&mut input, max_items as u64)? as usize;
                undeserialized += count;
                Placeholder::Compound { kind, count }
            }
            StackItemType::Map => {
                let count = read_var_int(&mut input, max_items as u64)? as usize;
                undeserialized += count * 2;
                Placeholder::Compound { kind, count }
            }
            StackItemType::Pointer | StackItemType::InteropInterface => {
                return Err(VMError::NotSupported("deserializing pointers or interop interfaces"));
            }
        };
        deserialized.push(placeholder);
        if deserialized.len() > max_items {
            return Err(VMError::InvalidOperation("too many items to deserialize".into()));
        }
    }

    let mut stack: Vec<StackItem> = Vec::new();
    while let Some(placeholder) = deserialized.pop() {
        let item = match placeholder {
            Placeholder::Item(item) => item,
            Placeholder::Compound { kind, count } if kind == StackItemType::Map => {
                let mut map = IndexMap::with_capacity(count);
                for _ in 0..count {
                    let key = pop(&mut stack)?;
                    let value = pop(&mut stack)?;
                    map.insert(MapKey::from_item(&key)?, value);
                }
                StackItem::Map(heap.allocate(HeapObject::Map(map)))
            }
            Placeholder::Compound { kind, count } => {
                let mut items = Vec::with_capacity(count);
                for _ in 0..count {
                    items.push(pop(&mut stack)?);
                }
                if kind == StackItemType::Struct {
                    StackItem::Struct(heap.allocate(HeapObject::Struct(items)))
                } else {
                    StackItem::Array(heap.allocate(HeapObject::Array(items)))
                }
            }
        };
        stack.push(item);
    }
    pop(&mut stack)
}
