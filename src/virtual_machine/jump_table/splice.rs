use crate::virtual_machine::engine::{ExecutionEngine, Host};
use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::stack_item::{HeapObject, StackItem};

/// Pops a length or index operand, which must not be negative.
fn pop_non_negative<H: Host>(engine: &mut ExecutionEngine<H>) -> Result<usize, VMError> {
    let value = engine.pop_i32()?;
    if value < 0 {
        return Err(VMError::OutOfRange {
            index: value as i64,
            count: 0,
        });
    }
    Ok(value as usize)
}

fn push_buffer<H: Host>(engine: &mut ExecutionEngine<H>, data: Vec<u8>) -> Result<(), VMError> {
    engine.limits().check_item_size(data.len())?;
    let id = engine.allocate(HeapObject::Buffer(data));
    engine.push(StackItem::Buffer(id))
}

fn out_of_range(end: usize, count: usize) -> VMError {
    VMError::OutOfRange {
        index: end as i64,
        count,
    }
}

pub(super) fn new_buffer<H: Host>(engine: &mut ExecutionEngine<H>) -> Result<(), VMError> {
    let length = pop_non_negative(engine)?;
    engine.limits().check_item_size(length)?;
    push_buffer(engine, vec![0; length])
}

/// `MEMCPY`: copies `count` bytes from `src[si..]` into the buffer `dst[di..]`.
pub(super) fn memcpy<H: Host>(engine: &mut ExecutionEngine<H>) -> Result<(), VMError> {
    let count = pop_non_negative(engine)?;
    let si = pop_non_negative(engine)?;
    let src = engine.pop_bytes()?;
    if si + count > src.len() {
        return Err(out_of_range(si + count, src.len()));
    }
    let di = pop_non_negative(engine)?;
    let dst = engine.pop()?;
    let StackItem::Buffer(id) = dst else {
        return Err(dst.invalid_cast("Buffer"));
    };
    let mut heap = engine.heap_mut();
    let buffer = heap.buffer_mut(id)?;
    if di + count > buffer.len() {
        return Err(out_of_range(di + count, buffer.len()));
    }
    buffer[di..di + count].copy_from_slice(&src[si..si + count]);
    Ok(())
}

pub(super) fn cat<H: Host>(engine: &mut ExecutionEngine<H>) -> Result<(), VMError> {
    let x2 = engine.pop_bytes()?;
    let x1 = engine.pop_bytes()?;
    engine.limits().check_item_size(x1.len() + x2.len())?;
    let mut data = Vec::with_capacity(x1.len() + x2.len());
    data.extend_from_slice(&x1);
    data.extend_from_slice(&x2);
    push_buffer(engine, data)
}

pub(super) fn substr<H: Host>(engine: &mut ExecutionEngine<H>) -> Result<(), VMError> {
    let count = pop_non_negative(engine)?;
    let index = pop_non_negative(engine)?;
    let x = engine.pop_bytes()?;
    if index + count > x.len() {
        return Err(out_of_range(index + count, x.len()));
    }
    push_buffer(engine, x[index..index + count].to_vec())
}

pub(super) fn left<H: Host>(engine: &mut ExecutionEngine<H>) -> Result<(), VMError> {
    let count = pop_non_negative(engine)?;
    let x = engine.pop_bytes()?;
    if count > x.len() {
        return Err(out_of_range(count, x.len()));
    }
    push_buffer(engine, x[..count].to_vec())
}

pub(super) fn right<H: Host>(engine: &mut ExecutionEngine<H>) -> Result<(), VMError> {
    let count = pop_non_negative(engine)?;
    let x = engine.pop_bytes()?;
    if count > x.len() {
        return Err(out_of_range(count, x.len()));
    }
    push_buffer(engine, x[x.len() - count..].to_vec())
}
