use crate::virtual_machine::engine::{ExecutionEngine, Host};
use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::isa::OpCode;
use crate::virtual_machine::stack_item::StackItem;

pub(super) fn invert<H: Host>(engine: &mut ExecutionEngine<H>) -> Result<(), VMError> {
    let x = engine.pop_integer()?;
    engine.push(StackItem::Integer(!x))
}

/// `AND`, `OR` and `XOR` on two's complement integers.
pub(super) fn binary<H: Host>(engine: &mut ExecutionEngine<H>, opcode: OpCode) -> Result<(), VMError> {
    let x2 = engine.pop_integer()?;
    let x1 = engine.pop_integer()?;
    let result = match opcode {
        OpCode::And => x1 & x2,
        OpCode::Or => x1 | x2,
        _ => x1 ^ x2,
    };
    engine.push(StackItem::Integer(result))
}

/// `EQUAL` pushes the equality of the top two items, `NOTEQUAL` its negation.
pub(super) fn equal<H: Host>(engine: &mut ExecutionEngine<H>, expected: bool) -> Result<(), VMError> {
    let x2 = engine.pop()?;
    let x1 = engine.pop()?;
    let equals = x1.equals(&x2, &engine.heap(), engine.limits())?;
    engine.push(StackItem::Boolean(equals == expected))
}
