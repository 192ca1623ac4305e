use crate::virtual_machine::engine::slot::Slot;
use crate::virtual_machine::engine::{ExecutionEngine, Host};
use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::instruction::Instruction;

/// `INITSSLOT`: creates the static fields shared by every frame of the script.
pub(super) fn init_static_slot<H: Host>(
    engine: &mut ExecutionEngine<H>,
    instruction: &Instruction,
) -> Result<(), VMError> {
    let count = instruction.token_u8() as usize;
    let reference_counter = engine.shared_reference_counter();
    let context = engine.current_context()?;
    let mut static_fields = context.static_fields();
    if static_fields.is_some() {
        return Err(VMError::InvalidOperation(
            "INITSSLOT cannot be executed twice".into(),
        ));
    }
    if count == 0 {
        return Err(VMError::InvalidOperation(
            "the operand of INITSSLOT must be greater than 0".into(),
        ));
    }
    *static_fields = Some(Slot::new(count, reference_counter));
    Ok(())
}

/// `INITSLOT`: creates the local variables and pops the arguments of the current frame.
///
/// The first argument is the top of the stack.
pub(super) fn init_slot<H: Host>(
    engine: &mut ExecutionEngine<H>,
    instruction: &Instruction,
) -> Result<(), VMError> {
    {
        let context = engine.current_context()?;
        if context.local_variables().is_some() || context.arguments().is_some() {
            return Err(VMError::InvalidOperation(
                "INITSLOT cannot be executed twice".into(),
            ));
        }
    }
    if instruction.token_u16() == 0 {
        return Err(VMError::InvalidOperation(
            "the operand of INITSLOT must be greater than 0".into(),
        ));
    }

    let reference_counter = engine.shared_reference_counter();
    let local_count = instruction.token_u8() as usize;
    let argument_count = instruction.token_u8_1() as usize;

    let locals = (local_count > 0).then(|| Slot::new(local_count, reference_counter.clone()));
    let arguments = if argument_count > 0 {
        let mut items = Vec::with_capacity(argument_count);
        for _ in 0..argument_count {
            items.push(engine.pop()?);
        }
        Some(Slot::from_items(items, reference_counter))
    } else {
        None
    };

    let context = engine.current_context_mut()?;
    context.local_variables = locals;
    context.arguments = arguments;
    Ok(())
}

pub(super) fn load_static<H: Host>(engine: &mut ExecutionEngine<H>, index: usize) -> Result<(), VMError> {
    let item = {
        let context = engine.current_context()?;
        let static_fields = context.static_fields();
        let slot = static_fields
            .as_ref()
            .ok_or(VMError::SlotNotInitialized("static"))?;
        slot.get(index)?
    };
    engine.push(item)
}

pub(super) fn store_static<H: Host>(engine: &mut ExecutionEngine<H>, index: usize) -> Result<(), VMError> {
    let item = engine.pop()?;
    let context = engine.current_context()?;
    let mut static_fields = context.static_fields();
    let slot = static_fields
        .as_mut()
        .ok_or(VMError::SlotNotInitialized("static"))?;
    slot.set(index, item)
}

pub(super) fn load_local<H: Host>(engine: &mut ExecutionEngine<H>, index: usize) -> Result<(), VMError> {
    let item = engine
        .current_context()?
        .local_variables()
        .ok_or(VMError::SlotNotInitialized("local"))?
        .get(index)?;
    engine.push(item)
}

pub(super) fn store_local<H: Host>(engine: &mut ExecutionEngine<H>, index: usize) -> Result<(), VMError> {
    let item = engine.pop()?;
    engine
        .current_context_mut()?
        .local_variables
        .as_mut()
        .ok_or(VMError::SlotNotInitialized("local"))?
        .set(index, item)
}

pub(super) fn load_argument<H: Host>(engine: &mut ExecutionEngine<H>, index: usize) -> Result<(), VMError> {
    let item = engine
        .current_context()?
        .arguments()
        .ok_or(VMError::SlotNotInitialized("argument"))?
        .get(index)?;
    engine.push(item)
}

pub(super) fn store_argument<H: Host>(
    engine: &mut ExecutionEngine<H>,
    index: usize,
) -> Result<(), VMError> {
    let item = engine.pop()?;
    engine
        .current_context_mut()?
        .arguments
        .as_mut()
        .ok_or(VMError::SlotNotInitialized("argument"))?
        .set(index, item)
}
