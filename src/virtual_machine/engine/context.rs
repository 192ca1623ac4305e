//! Execution contexts: one frame per active invocation.

use crate::virtual_machine::engine::evaluation_stack::{EvaluationStack, SharedReferenceCounter};
use crate::virtual_machine::engine::slot::Slot;
use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::instruction::Instruction;
use crate::virtual_machine::script::Script;
use std::any::{Any, TypeId};
use std::cell::{RefCell, RefMut};
use std::collections::HashMap;
use std::rc::Rc;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ExceptionHandlingState {
    Try,
    Catch,
    Finally,
}

/// One entry of a frame's try stack, opened by `TRY` and closed by `ENDTRY`/`ENDFINALLY`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ExceptionHandlingContext {
    pub catch_pointer: Option<usize>,
    pub finally_pointer: Option<usize>,
    /// Where execution resumes once the finally block completes.
    pub end_pointer: Option<usize>,
    pub state: ExceptionHandlingState,
}

impl ExceptionHandlingContext {
    pub fn new(catch_pointer: Option<usize>, finally_pointer: Option<usize>) -> Self {
        Self {
            catch_pointer,
            finally_pointer,
            end_pointer: None,
            state: ExceptionHandlingState::Try,
        }
    }
}

/// State shared between a frame and the frames it spawns with `CALL`.
pub struct SharedStates {
    script: Rc<Script>,
    evaluation_stack: RefCell<EvaluationStack>,
    static_fields: RefCell<Option<Slot>>,
    states: RefCell<HashMap<TypeId, Box<dyn Any>>>,
}

/// A call frame.
///
/// `CALL` clones a frame into a new one sharing its script, evaluation stack, static fields
/// and state blob, but with fresh locals, arguments and try stack.
pub struct ExecutionContext {
    id: u64,
    shared: Rc<SharedStates>,
    pub(crate) instruction_pointer: usize,
    rvcount: i32,
    pub(crate) local_variables: Option<Slot>,
    pub(crate) arguments: Option<Slot>,
    pub(crate) try_stack: Vec<ExceptionHandlingContext>,
}

impl ExecutionContext {
    pub(crate) fn new(
        id: u64,
        script: Rc<Script>,
        rvcount: i32,
        initial_position: usize,
        reference_counter: SharedReferenceCounter,
    ) -> Self {
        Self {
            id,
            shared: Rc::new(SharedStates {
                script,
                evaluation_stack: RefCell::new(EvaluationStack::new(reference_counter)),
                static_fields: RefCell::new(None),
                states: RefCell::new(HashMap::new()),
            }),
            instruction_pointer: initial_position,
            rvcount,
            local_variables: None,
            arguments: None,
            try_stack: Vec::new(),
        }
    }

    /// A new frame at `position` sharing this frame's states.
    pub(crate) fn clone_at(&self, id: u64, position: usize) -> Self {
        Self {
            id,
            shared: self.shared.clone(),
            instruction_pointer: position,
            rvcount: 0,
            local_variables: None,
            arguments: None,
            try_stack: Vec::new(),
        }
    }

    /// Engine-unique frame id.
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn script(&self) -> &Rc<Script> {
        &self.shared.script
    }

    pub fn instruction_pointer(&self) -> usize {
        self.instruction_pointer
    }

    /// Number of values the frame must leave on its stack, or -1 for any.
    pub fn rvcount(&self) -> i32 {
        self.rvcount
    }

    /// The instruction at the instruction pointer, `None` at the end of the script.
    pub fn current_instruction(&self) -> Result<Option<Rc<Instruction>>, VMError> {
        self.shared.script.get_instruction(self.instruction_pointer)
    }

    /// The instruction following the current one.
    pub fn next_instruction(&self) -> Result<Option<Rc<Instruction>>, VMError> {
        match self.current_instruction()? {
            Some(current) => self
                .shared
                .script
                .get_instruction(self.instruction_pointer + current.size()),
            None => Ok(None),
        }
    }

    pub fn evaluation_stack(&self) -> RefMut<'_, EvaluationStack> {
        self.shared.evaluation_stack.borrow_mut()
    }

    pub fn static_fields(&self) -> RefMut<'_, Option<Slot>> {
        self.shared.static_fields.borrow_mut()
    }

    pub fn local_variables(&self) -> Option<&Slot> {
        self.local_variables.as_ref()
    }

    pub fn arguments(&self) -> Option<&Slot> {
        self.arguments.as_ref()
    }

    pub fn try_stack(&self) -> &[ExceptionHandlingContext] {
        &self.try_stack
    }

    /// Whether both frames run on the same evaluation stack.
    pub fn shares_states_with(&self, other: &ExecutionContext) -> bool {
        Rc::ptr_eq(&self.shared, &other.shared)
    }

    /// Whether any other live frame still shares this frame's states.
    pub(crate) fn is_states_shared(&self) -> bool {
        Rc::strong_count(&self.shared) > 1
    }

    /// Borrows the state of type `T`, creating it with `T::default()` on first use.
    pub fn state<T: Any + Default>(&self) -> Result<RefMut<'_, T>, VMError> {
        let states = self.shared.states.borrow_mut();
        RefMut::filter_map(states, |states| {
            states
                .entry(TypeId::of::<T>())
                .or_insert_with(|| Box::new(T::default()))
                .downcast_mut::<T>()
        })
        .map_err(|_| VMError::InvalidOperation("context state has an unexpected type".into()))
    }

    /// Borrows the state of type `T` if it was set.
    pub fn try_state<T: Any>(&self) -> Option<RefMut<'_, T>> {
        let states = self.shared.states.borrow_mut();
        RefMut::filter_map(states, |states| {
            states
                .get_mut(&TypeId::of::<T>())
                .and_then(|state| state.downcast_mut::<T>())
        })
        .ok()
    }

    pub fn set_state<T: Any>(&self, value: T) {
        self.shared
            .states
            .borrow_mut()
            .insert(TypeId::of::<T>(), Box::new(value));
    }

    /// Releases the stack references held by this frame.
    ///
    /// The shared evaluation stack and static fields are only released by the last frame
    /// holding them.
    pub(crate) fn release(&mut self) {
        if !self.is_states_shared() {
            if let Some(statics) = self.static_fields().as_mut() {
                statics.clear_references();
            }
            self.evaluation_stack().clear();
        }
        if let Some(locals) = self.local_variables.as_mut() {
            locals.clear_references();
        }
        if let Some(arguments) = self.arguments.as_mut() {
            arguments.clear_references();
        }
    }
}
