use crate::virtual_machine::engine::reference_counter::ReferenceCounter;
use crate::virtual_machine::engine::{ExecutionEngine, Host};
use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::instruction::Instruction;
use crate::virtual_machine::stack_item::{
    HeapObject, MAX_INTEGER_SIZE, StackItem, StackItemType, bytes_to_integer,
};

/// Reads the type operand of `ISTYPE` and `CONVERT`. `Any` is not a valid target.
fn operand_type(instruction: &Instruction) -> Result<StackItemType, VMError> {
    let item_type = StackItemType::try_from(instruction.token_u8())?;
    if item_type == StackItemType::Any {
        return Err(VMError::InvalidOperation(format!(
            "invalid type for {}",
            instruction.opcode.mnemonic()
        )));
    }
    Ok(item_type)
}

pub(super) fn is_null<H: Host>(engine: &mut ExecutionEngine<H>) -> Result<(), VMError> {
    let x = engine.pop()?;
    engine.push(StackItem::Boolean(x.is_null()))
}

pub(super) fn is_type<H: Host>(
    engine: &mut ExecutionEngine<H>,
    instruction: &Instruction,
) -> Result<(), VMError> {
    let item_type = operand_type(instruction)?;
    let x = engine.pop()?;
    engine.push(StackItem::Boolean(x.item_type() == item_type))
}

pub(super) fn convert_op<H: Host>(
    engine: &mut ExecutionEngine<H>,
    instruction: &Instruction,
) -> Result<(), VMError> {
    let item_type = operand_type(instruction)?;
    let x = engine.pop()?;
    let converted = convert(&x, item_type, &mut engine.heap_mut())?;
    engine.push(converted)
}

/// Converts `item` to `target`, allocating in `heap` when the result is a new collection
/// or buffer.
///
/// Null converts to every type and stays Null. Any item converts to Boolean by truthiness.
/// Primitives convert among Integer, ByteString and Buffer; Arrays and Structs convert to
/// each other as shallow copies. Everything else is [`VMError::InvalidCast`].
pub fn convert(
    item: &StackItem,
    target: StackItemType,
    heap: &mut ReferenceCounter,
) -> Result<StackItem, VMError> {
    if item.item_type() == target {
        return Ok(item.clone());
    }
    if item.is_null() {
        if target == StackItemType::Any {
            return Err(item.invalid_cast(target.name()));
        }
        return Ok(StackItem::Null);
    }
    if target == StackItemType::Boolean {
        return item.get_boolean().map(StackItem::Boolean);
    }

    match (item, target) {
        (StackItem::Boolean(_) | StackItem::Integer(_) | StackItem::ByteString(_), _) => {
            match target {
                StackItemType::Integer => item.get_integer().map(StackItem::Integer),
                StackItemType::ByteString => item.get_bytes(heap).map(StackItem::ByteString),
                StackItemType::Buffer => {
                    let data = item.get_bytes(heap)?.to_vec();
                    Ok(StackItem::Buffer(heap.allocate(HeapObject::Buffer(data))))
                }
                _ => Err(item.invalid_cast(target.name())),
            }
        }
        (StackItem::Buffer(id), StackItemType::Integer) => {
            let data = heap.buffer(*id)?;
            if data.len() > MAX_INTEGER_SIZE {
                return Err(item.invalid_cast(target.name()));
            }
            Ok(StackItem::Integer(bytes_to_integer(data)))
        }
        (StackItem::Buffer(id), StackItemType::ByteString) => {
            Ok(StackItem::from_bytes(heap.buffer(*id)?.clone()))
        }
        (StackItem::Array(id), StackItemType::Struct) => {
            let items = heap.array(*id)?.clone();
            Ok(StackItem::Struct(heap.allocate(HeapObject::Struct(items))))
        }
        (StackItem::Struct(id), StackItemType::Array) => {
            let items = heap.array(*id)?.clone();
            Ok(StackItem::Array(heap.allocate(HeapObject::Array(items))))
        }
        _ => Err(item.invalid_cast(target.name())),
    }
}
