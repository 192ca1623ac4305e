use crate::virtual_machine::engine::{ExecutionEngine, Host};
use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::stack_item::StackItem;

/// Pops a stack position operand. Negative positions are rejected.
fn pop_position<H: Host>(engine: &mut ExecutionEngine<H>) -> Result<usize, VMError> {
    let n = engine.pop_i32()?;
    if n < 0 {
        return Err(VMError::OutOfRange {
            index: n as i64,
            count: 0,
        });
    }
    Ok(n as usize)
}

pub(super) fn depth<H: Host>(engine: &mut ExecutionEngine<H>) -> Result<(), VMError> {
    let depth = engine.current_context()?.evaluation_stack().len();
    engine.push(StackItem::from_int(depth as i64))
}

pub(super) fn drop<H: Host>(engine: &mut ExecutionEngine<H>) -> Result<(), VMError> {
    engine.pop().map(|_| ())
}

pub(super) fn nip<H: Host>(engine: &mut ExecutionEngine<H>) -> Result<(), VMError> {
    engine.current_context()?.evaluation_stack().remove(1).map(|_| ())
}

pub(super) fn xdrop<H: Host>(engine: &mut ExecutionEngine<H>) -> Result<(), VMError> {
    let n = pop_position(engine)?;
    engine.current_context()?.evaluation_stack().remove(n).map(|_| ())
}

pub(super) fn clear<H: Host>(engine: &mut ExecutionEngine<H>) -> Result<(), VMError> {
    engine.current_context()?.evaluation_stack().clear();
    Ok(())
}

pub(super) fn dup<H: Host>(engine: &mut ExecutionEngine<H>) -> Result<(), VMError> {
    let item = engine.peek(0)?;
    engine.push(item)
}

pub(super) fn over<H: Host>(engine: &mut ExecutionEngine<H>) -> Result<(), VMError> {
    let item = engine.peek(1)?;
    engine.push(item)
}

pub(super) fn pick<H: Host>(engine: &mut ExecutionEngine<H>) -> Result<(), VMError> {
    let n = pop_position(engine)?;
    let item = engine.peek(n)?;
    engine.push(item)
}

pub(super) fn tuck<H: Host>(engine: &mut ExecutionEngine<H>) -> Result<(), VMError> {
    let item = engine.peek(0)?;
    engine.current_context()?.evaluation_stack().insert(2, item)
}

pub(super) fn swap<H: Host>(engine: &mut ExecutionEngine<H>) -> Result<(), VMError> {
    let item = engine.current_context()?.evaluation_stack().remove(1)?;
    engine.push(item)
}

pub(super) fn rot<H: Host>(engine: &mut ExecutionEngine<H>) -> Result<(), VMError> {
    let item = engine.current_context()?.evaluation_stack().remove(2)?;
    engine.push(item)
}

pub(super) fn roll<H: Host>(engine: &mut ExecutionEngine<H>) -> Result<(), VMError> {
    let n = pop_position(engine)?;
    if n == 0 {
        return Ok(());
    }
    let item = engine.current_context()?.evaluation_stack().remove(n)?;
    engine.push(item)
}

pub(super) fn reverse<H: Host>(engine: &mut ExecutionEngine<H>, n: usize) -> Result<(), VMError> {
    engine.current_context()?.evaluation_stack().reverse(n)
}

pub(super) fn reverse_n<H: Host>(engine: &mut ExecutionEngine<H>) -> Result<(), VMError> {
    let n = pop_position(engine)?;
    reverse(engine, n)
}
