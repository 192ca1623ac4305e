use crate::virtual_machine::engine::{ExecutionEngine, Host};
use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::instruction::Instruction;
use crate::virtual_machine::isa::OpCode;
use crate::virtual_machine::stack_item::StackItem;
use std::rc::Rc;

pub(super) fn jmp<H: Host>(
    engine: &mut ExecutionEngine<H>,
    instruction: &Instruction,
) -> Result<(), VMError> {
    engine.execute_jump_offset(instruction.jump_offset())
}

/// `JMPIF` jumps when the popped value is true, `JMPIFNOT` when it is false.
pub(super) fn jmp_if<H: Host>(
    engine: &mut ExecutionEngine<H>,
    instruction: &Instruction,
    expected: bool,
) -> Result<(), VMError> {
    if engine.pop_bool()? == expected {
        engine.execute_jump_offset(instruction.jump_offset())?;
    }
    Ok(())
}

pub(super) fn jmp_compare<H: Host>(
    engine: &mut ExecutionEngine<H>,
    instruction: &Instruction,
) -> Result<(), VMError> {
    let x2 = engine.pop_integer()?;
    let x1 = engine.pop_integer()?;
    let taken = match instruction.opcode {
        OpCode::JmpEq | OpCode::JmpEqL => x1 == x2,
        OpCode::JmpNe | OpCode::JmpNeL => x1 != x2,
        OpCode::JmpGt | OpCode::JmpGtL => x1 > x2,
        OpCode::JmpGe | OpCode::JmpGeL => x1 >= x2,
        OpCode::JmpLt | OpCode::JmpLtL => x1 < x2,
        _ => x1 <= x2,
    };
    if taken {
        engine.execute_jump_offset(instruction.jump_offset())?;
    }
    Ok(())
}

pub(super) fn call<H: Host>(
    engine: &mut ExecutionEngine<H>,
    instruction: &Instruction,
) -> Result<(), VMError> {
    let ip = engine.current_context()?.instruction_pointer() as i64;
    engine.execute_call(ip + instruction.jump_offset())
}

/// Calls through a pointer, which must point into the current script.
pub(super) fn call_a<H: Host>(engine: &mut ExecutionEngine<H>) -> Result<(), VMError> {
    let item = engine.pop()?;
    let StackItem::Pointer { script, position } = item else {
        return Err(item.invalid_cast("Pointer"));
    };
    if !Rc::ptr_eq(&script, engine.current_context()?.script()) {
        return Err(VMError::InvalidOperation(
            "pointers cannot be shared between scripts".into(),
        ));
    }
    engine.execute_call(position as i64)
}

pub(super) fn abort_msg<H: Host>(engine: &mut ExecutionEngine<H>) -> Result<(), VMError> {
    let message = engine.pop()?.get_string(&engine.heap())?;
    Err(VMError::AbortMsg(message))
}

pub(super) fn assert<H: Host>(engine: &mut ExecutionEngine<H>) -> Result<(), VMError> {
    if !engine.pop_bool()? {
        return Err(VMError::AssertFailed);
    }
    Ok(())
}

pub(super) fn assert_msg<H: Host>(engine: &mut ExecutionEngine<H>) -> Result<(), VMError> {
    let message = engine.pop()?.get_string(&engine.heap())?;
    if !engine.pop_bool()? {
        return Err(VMError::AssertMsg(message));
    }
    Ok(())
}

pub(super) fn throw<H: Host>(engine: &mut ExecutionEngine<H>) -> Result<(), VMError> {
    let exception = engine.pop()?;
    engine.execute_throw(exception)
}

pub(super) fn try_block<H: Host>(
    engine: &mut ExecutionEngine<H>,
    instruction: &Instruction,
) -> Result<(), VMError> {
    let (catch_offset, finally_offset) = instruction.try_offsets();
    engine.execute_try(catch_offset, finally_offset)
}
