use crate::virtual_machine::engine::{ExecutionEngine, Host};
use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::instruction::Instruction;
use crate::virtual_machine::stack_item::{HeapObject, MapKey, StackItem, StackItemType};
use indexmap::IndexMap;
use num_bigint::BigInt;
use num_traits::ToPrimitive;

fn stack_depth<H: Host>(engine: &ExecutionEngine<H>) -> Result<usize, VMError> {
    Ok(engine.current_context()?.evaluation_stack().len())
}

/// Resolves `key` as an element index into a collection of `count` items.
///
/// Misses are catchable so a contract can guard array access with TRY.
fn element_index(key: &StackItem, count: usize) -> Result<usize, VMError> {
    let index = key.get_integer()?;
    match index.to_usize() {
        Some(i) if i < count => Ok(i),
        _ => Err(VMError::IndexOutOfRange {
            index: index.to_i64().unwrap_or(i64::MAX),
            count,
        }),
    }
}

/// Copies a struct value before it is stored, so the container owns an independent copy.
fn clone_if_struct<H: Host>(engine: &mut ExecutionEngine<H>, item: StackItem) -> Result<StackItem, VMError> {
    match item {
        StackItem::Struct(id) => {
            let copy = engine.heap_mut().struct_clone(id, engine.limits())?;
            Ok(StackItem::Struct(copy))
        }
        other => Ok(other),
    }
}

/// `PACKMAP`: pops `n` key-value pairs, key first, into a new map.
pub(super) fn pack_map<H: Host>(engine: &mut ExecutionEngine<H>) -> Result<(), VMError> {
    let size = engine.pop_i32()?;
    let depth = stack_depth(engine)?;
    if size < 0 || size as usize * 2 > depth {
        return Err(VMError::OutOfRange {
            index: size as i64,
            count: depth,
        });
    }
    let id = engine.allocate(HeapObject::Map(IndexMap::new()));
    for _ in 0..size {
        let key = MapKey::from_item(&engine.pop()?)?;
        let value = engine.pop()?;
        engine.heap_mut().map_set(id, key, value)?;
    }
    engine.push(StackItem::Map(id))
}

/// `PACK` and `PACKSTRUCT`: pops `n` items into a new array; the top item comes first.
pub(super) fn pack<H: Host>(engine: &mut ExecutionEngine<H>, is_struct: bool) -> Result<(), VMError> {
    let size = engine.pop_i32()?;
    let depth = stack_depth(engine)?;
    if size < 0 || size as usize > depth {
        return Err(VMError::OutOfRange {
            index: size as i64,
            count: depth,
        });
    }
    let mut items = Vec::with_capacity(size as usize);
    for _ in 0..size {
        items.push(engine.pop()?);
    }
    let item = if is_struct {
        StackItem::Struct(engine.allocate(HeapObject::Struct(items)))
    } else {
        StackItem::Array(engine.allocate(HeapObject::Array(items)))
    };
    engine.push(item)
}

/// `UNPACK`: pushes the elements of an array or the entries of a map, then the count.
pub(super) fn unpack<H: Host>(engine: &mut ExecutionEngine<H>) -> Result<(), VMError> {
    let compound = engine.pop()?;
    let (items, count) = match &compound {
        StackItem::Map(id) => {
            let heap = engine.heap();
            let map = heap.map(*id)?;
            let mut items = Vec::with_capacity(map.len() * 2);
            for (key, value) in map.iter().rev() {
                items.push(value.clone());
                items.push(key.to_item());
            }
            (items, map.len())
        }
        StackItem::Array(id) | StackItem::Struct(id) => {
            let heap = engine.heap();
            let array = heap.array(*id)?;
            (array.iter().rev().cloned().collect(), array.len())
        }
        other => return Err(other.invalid_cast("CompoundType")),
    };
    for item in items {
        engine.push(item)?;
    }
    engine.push(StackItem::from_int(count as i64))
}

pub(super) fn new_array0<H: Host>(engine: &mut ExecutionEngine<H>, is_struct: bool) -> Result<(), VMError> {
    let item = if is_struct {
        StackItem::Struct(engine.allocate(HeapObject::Struct(Vec::new())))
    } else {
        StackItem::Array(engine.allocate(HeapObject::Array(Vec::new())))
    };
    engine.push(item)
}

/// `NEWARRAY` and `NEWSTRUCT`: a collection of `n` Nulls.
pub(super) fn new_array<H: Host>(engine: &mut ExecutionEngine<H>, is_struct: bool) -> Result<(), VMError> {
    let max = engine.limits().max_stack_size;
    let n = engine.pop_count(max)?;
    let items = vec![StackItem::Null; n];
    let item = if is_struct {
        StackItem::Struct(engine.allocate(HeapObject::Struct(items)))
    } else {
        StackItem::Array(engine.allocate(HeapObject::Array(items)))
    };
    engine.push(item)
}

/// `NEWARRAY_T`: an array of `n` default values of the operand type.
pub(super) fn new_array_t<H: Host>(
    engine: &mut ExecutionEngine<H>,
    instruction: &Instruction,
) -> Result<(), VMError> {
    let max = engine.limits().max_stack_size;
    let n = engine.pop_count(max)?;
    let item_type = StackItemType::try_from(instruction.token_u8())?;
    let default = match item_type {
        StackItemType::Boolean => StackItem::Boolean(false),
        StackItemType::Integer => StackItem::Integer(BigInt::default()),
        StackItemType::ByteString => StackItem::from_bytes(Vec::new()),
        _ => StackItem::Null,
    };
    let id = engine.allocate(HeapObject::Array(vec![default; n]));
    engine.push(StackItem::Array(id))
}

pub(super) fn new_map<H: Host>(engine: &mut ExecutionEngine<H>) -> Result<(), VMError> {
    let id = engine.allocate(HeapObject::Map(IndexMap::new()));
    engine.push(StackItem::Map(id))
}

/// `SIZE`: element count of a collection, or byte length of a primitive or buffer.
pub(super) fn size<H: Host>(engine: &mut ExecutionEngine<H>) -> Result<(), VMError> {
    let x = engine.pop()?;
    let size = {
        let heap = engine.heap();
        match &x {
            StackItem::Array(id) | StackItem::Struct(id) => heap.array(*id)?.len(),
            StackItem::Map(id) => heap.map(*id)?.len(),
            other => other.size(&heap)?,
        }
    };
    engine.push(StackItem::from_int(size as i64))
}

pub(super) fn has_key<H: Host>(engine: &mut ExecutionEngine<H>) -> Result<(), VMError> {
    let key = engine.pop()?;
    let x = engine.pop()?;
    let found = {
        let heap = engine.heap();
        match &x {
            StackItem::Map(id) => heap.map(*id)?.contains_key(&MapKey::from_item(&key)?),
            StackItem::Array(_) | StackItem::Struct(_) | StackItem::Buffer(_) | StackItem::ByteString(_) => {
                let index = key.get_integer()?;
                if index.sign() == num_bigint::Sign::Minus {
                    return Err(VMError::OutOfRange {
                        index: index.to_i64().unwrap_or(i64::MIN),
                        count: 0,
                    });
                }
                let count = match &x {
                    StackItem::Array(id) | StackItem::Struct(id) => heap.array(*id)?.len(),
                    other => other.size(&heap)?,
                };
                index.to_usize().is_some_and(|i| i < count)
            }
            other => return Err(other.invalid_cast("CompoundType")),
        }
    };
    engine.push(StackItem::Boolean(found))
}

pub(super) fn keys<H: Host>(engine: &mut ExecutionEngine<H>) -> Result<(), VMError> {
    let x = engine.pop()?;
    let StackItem::Map(id) = x else {
        return Err(x.invalid_cast("Map"));
    };
    let keys: Vec<StackItem> = engine.heap().map(id)?.keys().map(MapKey::to_item).collect();
    let array = engine.allocate(HeapObject::Array(keys));
    engine.push(StackItem::Array(array))
}

/// `VALUES`: a new array of the values. Struct values are copied.
pub(super) fn values<H: Host>(engine: &mut ExecutionEngine<H>) -> Result<(), VMError> {
    let x = engine.pop()?;
    let values: Vec<StackItem> = {
        let heap = engine.heap();
        match &x {
            StackItem::Array(id) | StackItem::Struct(id) => heap.array(*id)?.clone(),
            StackItem::Map(id) => heap.map(*id)?.values().cloned().collect(),
            other => return Err(other.invalid_cast("CompoundType")),
        }
    };
    let mut copies = Vec::with_capacity(values.len());
    for value in values {
        copies.push(clone_if_struct(engine, value)?);
    }
    let array = engine.allocate(HeapObject::Array(copies));
    engine.push(StackItem::Array(array))
}

/// `PICKITEM`: element by index, map value by key, or byte by index as an integer.
pub(super) fn pick_item<H: Host>(engine: &mut ExecutionEngine<H>) -> Result<(), VMError> {
    let key = engine.pop()?;
    let x = engine.pop()?;
    let item = {
        let heap = engine.heap();
        match &x {
            StackItem::Array(id) | StackItem::Struct(id) => {
                let items = heap.array(*id)?;
                items[element_index(&key, items.len())?].clone()
            }
            StackItem::Map(id) => heap
                .map(*id)?
                .get(&MapKey::from_item(&key)?)
                .cloned()
                .ok_or(VMError::KeyNotFound)?,
            StackItem::Boolean(_)
            | StackItem::Integer(_)
            | StackItem::ByteString(_)
            | StackItem::Buffer(_) => {
                let bytes = x.get_bytes(&heap)?;
                let index = element_index(&key, bytes.len())?;
                StackItem::from_int(bytes[index] as i64)
            }
            other => return Err(other.invalid_cast("CompoundType")),
        }
    };
    engine.push(item)
}

pub(super) fn append<H: Host>(engine: &mut ExecutionEngine<H>) -> Result<(), VMError> {
    let item = engine.pop()?;
    let item = clone_if_struct(engine, item)?;
    let x = engine.pop()?;
    let id = x.array_id().ok_or_else(|| x.invalid_cast("Array"))?;
    engine.heap_mut().array_push(id, item)
}

/// `SETITEM`: replaces an element, a map entry, or a buffer byte.
pub(super) fn set_item<H: Host>(engine: &mut ExecutionEngine<H>) -> Result<(), VMError> {
    let value = engine.pop()?;
    let value = clone_if_struct(engine, value)?;
    let key = engine.pop()?;
    let x = engine.pop()?;
    match &x {
        StackItem::Array(id) | StackItem::Struct(id) => {
            let count = engine.heap().array(*id)?.len();
            let index = element_index(&key, count)?;
            engine.heap_mut().array_set(*id, index, value)
        }
        StackItem::Map(id) => {
            let key = MapKey::from_item(&key)?;
            engine.heap_mut().map_set(*id, key, value)
        }
        StackItem::Buffer(id) => {
            let byte = value.get_integer()?;
            let byte = match byte.to_i16() {
                Some(b) if (-128..=255).contains(&b) => b as u8,
                _ => {
                    return Err(VMError::InvalidOperation(format!(
                        "value {byte} does not fit in a byte"
                    )));
                }
            };
            let mut heap = engine.heap_mut();
            let buffer = heap.buffer_mut(*id)?;
            let index = element_index(&key, buffer.len())?;
            buffer[index] = byte;
            Ok(())
        }
        other => Err(other.invalid_cast("CompoundType")),
    }
}

pub(super) fn reverse_items<H: Host>(engine: &mut ExecutionEngine<H>) -> Result<(), VMError> {
    let x = engine.pop()?;
    match &x {
        StackItem::Array(id) | StackItem::Struct(id) => engine.heap_mut().array_reverse(*id),
        StackItem::Buffer(id) => {
            engine.heap_mut().buffer_mut(*id)?.reverse();
            Ok(())
        }
        other => Err(other.invalid_cast("Array")),
    }
}

/// `REMOVE`: removes an element by index or a map entry by key.
///
/// An index past the end faults rather than raising a catchable exception.
pub(super) fn remove<H: Host>(engine: &mut ExecutionEngine<H>) -> Result<(), VMError> {
    let key = engine.pop()?;
    let x = engine.pop()?;
    match &x {
        StackItem::Array(id) | StackItem::Struct(id) => {
            let count = engine.heap().array(*id)?.len();
            let index = key.get_integer()?;
            let index = match index.to_usize() {
                Some(i) if i < count => i,
                _ => {
                    return Err(VMError::OutOfRange {
                        index: index.to_i64().unwrap_or(i64::MAX),
                        count,
                    });
                }
            };
            engine.heap_mut().array_remove(*id, index).map(|_| ())
        }
        StackItem::Map(id) => {
            let key = MapKey::from_item(&key)?;
            engine.heap_mut().map_remove(*id, &key).map(|_| ())
        }
        other => Err(other.invalid_cast("CompoundType")),
    }
}

pub(super) fn clear_items<H: Host>(engine: &mut ExecutionEngine<H>) -> Result<(), VMError> {
    let x = engine.pop()?;
    match &x {
        StackItem::Array(id) | StackItem::Struct(id) | StackItem::Map(id) => {
            engine.heap_mut().clear_items(*id)
        }
        other => Err(other.invalid_cast("CompoundType")),
    }
}

/// `POPITEM`: removes the last element of an array and pushes it.
pub(super) fn pop_item<H: Host>(engine: &mut ExecutionEngine<H>) -> Result<(), VMError> {
    let x = engine.pop()?;
    let id = x.array_id().ok_or_else(|| x.invalid_cast("Array"))?;
    let item = engine.heap_mut().array_pop(id)?;
    engine.push(item)
}
