use crate::virtual_machine::engine::{ExecutionEngine, Host};
use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::instruction::Instruction;
use crate::virtual_machine::isa::OpCode;
use crate::virtual_machine::stack_item::{StackItem, bytes_to_integer};

/// `PUSHINT8` through `PUSHINT256`: the operand is a little-endian two's complement integer.
pub(super) fn push_int<H: Host>(
    engine: &mut ExecutionEngine<H>,
    instruction: &Instruction,
) -> Result<(), VMError> {
    engine.push(StackItem::Integer(bytes_to_integer(&instruction.operand)))
}

pub(super) fn push_bool<H: Host>(engine: &mut ExecutionEngine<H>, value: bool) -> Result<(), VMError> {
    engine.push(StackItem::Boolean(value))
}

pub(super) fn push_null<H: Host>(engine: &mut ExecutionEngine<H>) -> Result<(), VMError> {
    engine.push(StackItem::Null)
}

/// Pushes a pointer into the current script. The target may be the end of the script.
pub(super) fn push_a<H: Host>(
    engine: &mut ExecutionEngine<H>,
    instruction: &Instruction,
) -> Result<(), VMError> {
    let context = engine.current_context()?;
    let position = context.instruction_pointer() as i64 + instruction.token_i32() as i64;
    if position < 0 || position as usize > context.script().len() {
        return Err(VMError::InvalidJumpTarget { target: position });
    }
    let pointer = StackItem::Pointer {
        script: context.script().clone(),
        position: position as usize,
    };
    engine.push(pointer)
}

pub(super) fn push_data<H: Host>(
    engine: &mut ExecutionEngine<H>,
    instruction: &Instruction,
) -> Result<(), VMError> {
    engine.limits().check_item_size(instruction.operand.len())?;
    engine.push(StackItem::from_bytes(instruction.operand.clone()))
}

/// `PUSHM1` and `PUSH0` through `PUSH16`.
pub(super) fn push_small<H: Host>(
    engine: &mut ExecutionEngine<H>,
    instruction: &Instruction,
) -> Result<(), VMError> {
    let value = instruction.opcode as i64 - OpCode::Push0 as i64;
    engine.push(StackItem::from_int(value))
}
