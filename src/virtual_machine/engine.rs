//! Execution engine: the fetch, execute and advance loop over a stack of frames.
//!
//! The engine is generic over a [`Host`], which receives hooks around every instruction
//! and handles `SYSCALL`, `CALLT` and frame unloading. The plain engine runs with
//! [`NullHost`]; the contract runtime plugs in its own host to add metering and interops.

pub mod context;
pub mod evaluation_stack;
pub mod limits;
pub mod reference_counter;
pub mod slot;
mod tarjan;
#[cfg(test)]
mod tests;

use crate::virtual_machine::engine::context::{
    ExceptionHandlingContext, ExceptionHandlingState, ExecutionContext,
};
use crate::virtual_machine::engine::evaluation_stack::{EvaluationStack, SharedReferenceCounter};
use crate::virtual_machine::engine::limits::ExecutionEngineLimits;
use crate::virtual_machine::engine::reference_counter::{ReferenceCounter, ZERO_REFERRED_THRESHOLD};
use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::instruction::Instruction;
use crate::virtual_machine::jump_table;
use crate::virtual_machine::script::Script;
use crate::virtual_machine::stack_item::{HeapObject, ObjectId, StackItem};
use crate::warn;
use num_bigint::BigInt;
use num_traits::ToPrimitive;
use std::cell::{Ref, RefCell, RefMut};
use std::rc::Rc;

/// Engine state.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum VMState {
    /// Not started, or running.
    None,
    /// Completed normally with an empty invocation stack.
    Halt,
    /// Stopped on an unrecoverable error.
    Fault,
    /// Paused by the debugger.
    Break,
}

/// Extension points of the execution engine.
///
/// Hooks are associated functions taking the whole engine, so a host can inspect and drive
/// the engine it is embedded in.
pub trait Host: Sized {
    /// Runs before each instruction. An error faults the engine.
    fn pre_execute_instruction(
        _engine: &mut ExecutionEngine<Self>,
        _instruction: &Instruction,
    ) -> Result<(), VMError> {
        Ok(())
    }

    /// Runs after each instruction. The default enforces the reference limit.
    fn post_execute_instruction(
        engine: &mut ExecutionEngine<Self>,
        _instruction: &Instruction,
    ) -> Result<(), VMError> {
        engine.check_reference_limit()
    }

    /// Handles `SYSCALL`.
    fn on_syscall(_engine: &mut ExecutionEngine<Self>, selector: u32) -> Result<(), VMError> {
        Err(VMError::InteropNotFound(selector))
    }

    /// Handles `CALLT`.
    fn on_call_token(_engine: &mut ExecutionEngine<Self>, _token: u16) -> Result<(), VMError> {
        Err(VMError::NotSupported("CALLT"))
    }

    /// Runs after a frame was popped and its references released.
    fn on_context_unloaded(
        _engine: &mut ExecutionEngine<Self>,
        _context: &ExecutionContext,
    ) -> Result<(), VMError> {
        Ok(())
    }

    /// Runs when the engine enters FAULT.
    fn on_fault(_engine: &mut ExecutionEngine<Self>, _error: &VMError) {}
}

/// Host with no services: every `SYSCALL` and `CALLT` faults.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullHost;

impl Host for NullHost {}

pub struct ExecutionEngine<H: Host = NullHost> {
    pub host: H,
    state: VMState,
    limits: ExecutionEngineLimits,
    reference_counter: SharedReferenceCounter,
    invocation_stack: Vec<ExecutionContext>,
    result_stack: EvaluationStack,
    uncaught_exception: Option<StackItem>,
    fault_exception: Option<VMError>,
    pub(crate) is_jumping: bool,
    next_context_id: u64,
}

impl<H: Host + Default> Default for ExecutionEngine<H> {
    fn default() -> Self {
        Self::new(H::default(), ExecutionEngineLimits::default())
    }
}

impl<H: Host> ExecutionEngine<H> {
    pub fn new(host: H, limits: ExecutionEngineLimits) -> Self {
        let reference_counter = Rc::new(RefCell::new(ReferenceCounter::new()));
        Self {
            host,
            state: VMState::None,
            limits,
            result_stack: EvaluationStack::new(reference_counter.clone()),
            reference_counter,
            invocation_stack: Vec::new(),
            uncaught_exception: None,
            fault_exception: None,
            is_jumping: false,
            next_context_id: 0,
        }
    }

    pub fn state(&self) -> VMState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: VMState) {
        self.state = state;
    }

    pub fn limits(&self) -> &ExecutionEngineLimits {
        &self.limits
    }

    /// The arena and reference counts. Do not hold the borrow across stack operations.
    pub fn heap(&self) -> Ref<'_, ReferenceCounter> {
        self.reference_counter.borrow()
    }

    pub fn heap_mut(&self) -> RefMut<'_, ReferenceCounter> {
        self.reference_counter.borrow_mut()
    }

    pub(crate) fn shared_reference_counter(&self) -> SharedReferenceCounter {
        self.reference_counter.clone()
    }

    pub fn allocate(&self, object: HeapObject) -> ObjectId {
        self.heap_mut().allocate(object)
    }

    pub fn result_stack(&self) -> &EvaluationStack {
        &self.result_stack
    }

    pub(crate) fn result_stack_mut(&mut self) -> &mut EvaluationStack {
        &mut self.result_stack
    }

    pub fn invocation_stack(&self) -> &[ExecutionContext] {
        &self.invocation_stack
    }

    pub fn current_context(&self) -> Result<&ExecutionContext, VMError> {
        self.invocation_stack.last().ok_or(VMError::NoCurrentContext)
    }

    pub fn current_context_mut(&mut self) -> Result<&mut ExecutionContext, VMError> {
        self.invocation_stack
            .last_mut()
            .ok_or(VMError::NoCurrentContext)
    }

    /// The bottom frame, the one the execution started from.
    pub fn entry_context(&self) -> Option<&ExecutionContext> {
        self.invocation_stack.first()
    }

    pub fn uncaught_exception(&self) -> Option<&StackItem> {
        self.uncaught_exception.as_ref()
    }

    /// The error that moved the engine to FAULT.
    pub fn fault_exception(&self) -> Option<&VMError> {
        self.fault_exception.as_ref()
    }

    /// Builds a frame for `script` without loading it.
    pub fn create_context(
        &mut self,
        script: Rc<Script>,
        rvcount: i32,
        initial_position: usize,
    ) -> ExecutionContext {
        let id = self.next_id();
        ExecutionContext::new(
            id,
            script,
            rvcount,
            initial_position,
            self.reference_counter.clone(),
        )
    }

    /// Pushes a frame onto the invocation stack.
    ///
    /// Returns [`VMError::InvocationStackOverflow`] past `max_invocation_stack_size`.
    pub fn load_context(&mut self, context: ExecutionContext) -> Result<(), VMError> {
        if self.invocation_stack.len() >= self.limits.max_invocation_stack_size {
            return Err(VMError::InvocationStackOverflow {
                max: self.limits.max_invocation_stack_size,
            });
        }
        self.invocation_stack.push(context);
        Ok(())
    }

    /// Creates and loads a frame for `script`, returning it.
    pub fn load_script(
        &mut self,
        script: Rc<Script>,
        rvcount: i32,
        initial_position: usize,
    ) -> Result<&ExecutionContext, VMError> {
        let context = self.create_context(script, rvcount, initial_position);
        self.load_context(context)?;
        self.current_context()
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_context_id;
        self.next_context_id += 1;
        id
    }

    /// Runs until HALT or FAULT.
    pub fn execute(&mut self) -> VMState {
        if self.state == VMState::Break {
            self.state = VMState::None;
        }
        while self.state != VMState::Halt && self.state != VMState::Fault {
            self.execute_next();
        }
        self.state
    }

    /// Executes a single instruction. Errors move the engine to FAULT.
    pub fn execute_next(&mut self) {
        if self.invocation_stack.is_empty() {
            self.state = VMState::Halt;
            return;
        }
        if let Err(error) = self.step() {
            self.fault(error);
        }
    }

    fn step(&mut self) -> Result<(), VMError> {
        let (context_id, instruction) = {
            let context = self.current_context()?;
            let instruction = context
                .current_instruction()?
                .unwrap_or_else(|| Rc::new(Instruction::ret()));
            (context.id(), instruction)
        };

        H::pre_execute_instruction(self, &instruction)?;
        match jump_table::execute(self, &instruction) {
            Ok(()) => {}
            Err(error) if error.is_catchable() && self.limits.catch_engine_exceptions => {
                self.execute_throw(StackItem::from_bytes(error.to_string()))?;
            }
            Err(error) => return Err(error),
        }
        H::post_execute_instruction(self, &instruction)?;

        if !self.is_jumping {
            if let Some(context) = self
                .invocation_stack
                .iter_mut()
                .rev()
                .find(|c| c.id() == context_id)
            {
                context.instruction_pointer += instruction.size();
            }
        }
        self.is_jumping = false;
        Ok(())
    }

    fn fault(&mut self, error: VMError) {
        let ip = self
            .invocation_stack
            .last()
            .map(|c| c.instruction_pointer())
            .unwrap_or_default();
        warn!("engine fault at ip {ip}: {error}");
        self.state = VMState::Fault;
        H::on_fault(self, &error);
        self.fault_exception = Some(error);
    }

    /// Sweeps unreachable objects when the reference count reaches the stack limit.
    ///
    /// Returns [`VMError::StackOverflow`] if the count is still over the limit afterwards.
    pub fn check_reference_limit(&mut self) -> Result<(), VMError> {
        let max = self.limits.max_stack_size;
        let mut counter = self.reference_counter.borrow_mut();
        if counter.count() < max && counter.zero_referred_len() <= ZERO_REFERRED_THRESHOLD {
            return Ok(());
        }
        let count = counter.check_zero_referred();
        if count > max {
            return Err(VMError::StackOverflow { size: count, max });
        }
        Ok(())
    }

    /// Runs a full sweep of unreachable objects and returns the remaining reference count.
    pub fn collect_garbage(&mut self) -> usize {
        self.reference_counter.borrow_mut().check_zero_referred()
    }

    // ---------------------------------------------------------------------
    // Stack helpers
    // ---------------------------------------------------------------------

    pub fn push(&mut self, item: StackItem) -> Result<(), VMError> {
        self.current_context()?.evaluation_stack().push(item);
        Ok(())
    }

    pub fn pop(&mut self) -> Result<StackItem, VMError> {
        self.current_context()?.evaluation_stack().pop()
    }

    pub fn peek(&self, n: usize) -> Result<StackItem, VMError> {
        self.current_context()?.evaluation_stack().peek(n).cloned()
    }

    pub fn pop_integer(&mut self) -> Result<BigInt, VMError> {
        self.pop()?.get_integer()
    }

    pub fn pop_bool(&mut self) -> Result<bool, VMError> {
        self.pop()?.get_boolean()
    }

    /// Pops an integer that must fit in an `i32`.
    pub fn pop_i32(&mut self) -> Result<i32, VMError> {
        self.pop_integer()?.to_i32().ok_or(VMError::InvalidCast {
            from: "Integer",
            to: "Int32",
        })
    }

    /// Pops a count or index that must be in `0..=max`.
    pub fn pop_count(&mut self, max: usize) -> Result<usize, VMError> {
        let value = self.pop_i32()?;
        if value < 0 || value as usize > max {
            return Err(VMError::OutOfRange {
                index: value as i64,
                count: max,
            });
        }
        Ok(value as usize)
    }

    /// Pops a primitive or buffer and returns its bytes.
    pub fn pop_bytes(&mut self) -> Result<crate::types::bytes::Bytes, VMError> {
        let item = self.pop()?;
        item.get_bytes(&self.heap())
    }

    // ---------------------------------------------------------------------
    // Control flow
    // ---------------------------------------------------------------------

    /// Moves the current frame's instruction pointer to `position`.
    ///
    /// Returns [`VMError::InvalidJumpTarget`] unless `0 <= position < script length`.
    pub fn execute_jump(&mut self, position: i64) -> Result<(), VMError> {
        let context = self.current_context_mut()?;
        if position < 0 || position as usize >= context.script().len() {
            return Err(VMError::InvalidJumpTarget { target: position });
        }
        context.instruction_pointer = position as usize;
        self.is_jumping = true;
        Ok(())
    }

    /// Jumps relative to the start of the current instruction.
    pub fn execute_jump_offset(&mut self, offset: i64) -> Result<(), VMError> {
        let ip = self.current_context()?.instruction_pointer() as i64;
        self.execute_jump(ip + offset)
    }

    /// Calls `position` in the current script with a cloned frame.
    pub fn execute_call(&mut self, position: i64) -> Result<(), VMError> {
        let id = self.next_id();
        let context = self.current_context()?;
        if position < 0 || position as usize > context.script().len() {
            return Err(VMError::InvalidJumpTarget { target: position });
        }
        let callee = context.clone_at(id, position as usize);
        self.load_context(callee)
    }

    /// Pops the current frame and hands its results to the caller.
    pub fn execute_ret(&mut self) -> Result<(), VMError> {
        let context = self
            .invocation_stack
            .pop()
            .ok_or(VMError::NoCurrentContext)?;

        let shares_caller_stack = self
            .invocation_stack
            .last()
            .is_some_and(|caller| caller.shares_states_with(&context));
        if !shares_caller_stack {
            let mut stack = context.evaluation_stack();
            let rvcount = context.rvcount();
            if rvcount >= 0 && stack.len() != rvcount as usize {
                return Err(VMError::InvalidOperation(format!(
                    "return value count mismatch: expected {rvcount}, found {}",
                    stack.len()
                )));
            }
            let count = stack.len();
            match self.invocation_stack.last() {
                Some(caller) => stack.move_to(&mut caller.evaluation_stack(), count)?,
                None => stack.move_to(&mut self.result_stack, count)?,
            }
        }

        if self.invocation_stack.is_empty() {
            self.state = VMState::Halt;
        }
        self.unload_context(context)?;
        self.is_jumping = true;
        Ok(())
    }

    /// Releases a popped frame and notifies the host.
    pub(crate) fn unload_context(&mut self, mut context: ExecutionContext) -> Result<(), VMError> {
        context.release();
        H::on_context_unloaded(self, &context)
    }

    // ---------------------------------------------------------------------
    // Exceptions
    // ---------------------------------------------------------------------

    fn set_uncaught_exception(&mut self, exception: Option<StackItem>) {
        let mut counter = self.reference_counter.borrow_mut();
        if let Some(old) = &self.uncaught_exception {
            counter.remove_stack_reference(old);
        }
        if let Some(new) = &exception {
            counter.add_stack_reference(new, 1);
        }
        drop(counter);
        self.uncaught_exception = exception;
    }

    /// Opens a try block relative to the current instruction.
    pub fn execute_try(&mut self, catch_offset: i64, finally_offset: i64) -> Result<(), VMError> {
        if catch_offset == 0 && finally_offset == 0 {
            return Err(VMError::InvalidOperation(
                "catch and finally offsets cannot both be 0".into(),
            ));
        }
        let max = self.limits.max_try_nesting_depth;
        let context = self.current_context_mut()?;
        if context.try_stack.len() >= max {
            return Err(VMError::TryNestingTooDeep { max });
        }
        let ip = context.instruction_pointer as i64;
        let pointer = |offset: i64| -> Result<Option<usize>, VMError> {
            if offset == 0 {
                return Ok(None);
            }
            let target = ip + offset;
            usize::try_from(target)
                .map(Some)
                .map_err(|_| VMError::InvalidJumpTarget { target })
        };
        let handler = ExceptionHandlingContext::new(pointer(catch_offset)?, pointer(finally_offset)?);
        context.try_stack.push(handler);
        Ok(())
    }

    /// Leaves the try or catch block, running the finally block first if there is one.
    pub fn execute_end_try(&mut self, end_offset: i64) -> Result<(), VMError> {
        let context = self.current_context_mut()?;
        let ip = context.instruction_pointer as i64;
        let handler = context
            .try_stack
            .last_mut()
            .ok_or_else(|| VMError::InvalidOperation("the corresponding TRY block cannot be found".into()))?;
        if handler.state == ExceptionHandlingState::Finally {
            return Err(VMError::InvalidOperation(
                "ENDTRY cannot be executed in a FINALLY block".into(),
            ));
        }
        let target = ip + end_offset;
        let end_pointer =
            usize::try_from(target).map_err(|_| VMError::InvalidJumpTarget { target })?;

        let finally_pointer = handler.finally_pointer;
        match finally_pointer {
            Some(finally) => {
                handler.state = ExceptionHandlingState::Finally;
                handler.end_pointer = Some(end_pointer);
                context.instruction_pointer = finally;
            }
            None => {
                context.try_stack.pop();
                context.instruction_pointer = end_pointer;
            }
        }
        self.is_jumping = true;
        Ok(())
    }

    /// Leaves a finally block: resumes after the try statement or keeps unwinding.
    pub fn execute_end_finally(&mut self) -> Result<(), VMError> {
        let has_exception = self.uncaught_exception.is_some();
        let context = self.current_context_mut()?;
        let handler = context
            .try_stack
            .pop()
            .ok_or_else(|| VMError::InvalidOperation("the corresponding TRY block cannot be found".into()))?;
        if has_exception {
            self.handle_exception()?;
        } else {
            context.instruction_pointer = handler.end_pointer.unwrap_or(context.instruction_pointer);
        }
        self.is_jumping = true;
        Ok(())
    }

    /// Raises `exception` as a script exception.
    pub fn execute_throw(&mut self, exception: StackItem) -> Result<(), VMError> {
        self.set_uncaught_exception(Some(exception));
        self.handle_exception()
    }

    /// Unwinds to the nearest handler.
    ///
    /// Frames without a usable handler are popped. A catch block receives the exception on
    /// its stack; a finally block runs with the exception still pending. With no handler
    /// left the engine faults with [`VMError::UnhandledException`].
    fn handle_exception(&mut self) -> Result<(), VMError> {
        let mut pop = 0;
        for index in (0..self.invocation_stack.len()).rev() {
            let context = &mut self.invocation_stack[index];
            while let Some(handler) = context.try_stack.last() {
                let exhausted = handler.state == ExceptionHandlingState::Finally
                    || (handler.state == ExceptionHandlingState::Catch
                        && handler.finally_pointer.is_none());
                if exhausted {
                    context.try_stack.pop();
                    continue;
                }

                for _ in 0..pop {
                    if let Some(popped) = self.invocation_stack.pop() {
                        self.unload_context(popped)?;
                    }
                }
                return self.enter_handler();
            }
            pop += 1;
        }

        let message = match &self.uncaught_exception {
            Some(exception) => exception
                .get_string(&self.heap())
                .unwrap_or_else(|_| exception.type_name().to_string()),
            None => String::new(),
        };
        Err(VMError::UnhandledException(message))
    }

    fn enter_handler(&mut self) -> Result<(), VMError> {
        let context = self.current_context_mut()?;
        let handler = context
            .try_stack
            .last_mut()
            .ok_or(VMError::NoCurrentContext)?;

        let catch = match (handler.state, handler.catch_pointer) {
            (ExceptionHandlingState::Try, Some(catch)) => {
                handler.state = ExceptionHandlingState::Catch;
                context.instruction_pointer = catch;
                true
            }
            _ => {
                handler.state = ExceptionHandlingState::Finally;
                context.instruction_pointer = handler.finally_pointer.unwrap_or(context.instruction_pointer);
                false
            }
        };

        if catch {
            if let Some(exception) = self.uncaught_exception.clone() {
                self.push(exception)?;
                self.set_uncaught_exception(None);
            }
        }
        self.is_jumping = true;
        Ok(())
    }
}
