//! Breakpoint and stepping control over an [`ExecutionEngine`].

use crate::types::address::Address;
use crate::virtual_machine::engine::{ExecutionEngine, Host, VMState};
use crate::virtual_machine::script::Script;
use std::collections::{HashMap, HashSet};

/// Drives an engine instruction by instruction, stopping in the BREAK state at breakpoints
/// and step boundaries.
///
/// Breakpoints are keyed by script hash, so they apply to every frame running that script.
pub struct Debugger<'e, H: Host> {
    engine: &'e mut ExecutionEngine<H>,
    break_points: HashMap<Address, HashSet<usize>>,
}

impl<'e, H: Host> Debugger<'e, H> {
    pub fn new(engine: &'e mut ExecutionEngine<H>) -> Self {
        Self {
            engine,
            break_points: HashMap::new(),
        }
    }

    pub fn engine(&self) -> &ExecutionEngine<H> {
        self.engine
    }

    pub fn add_break_point(&mut self, script: &Script, position: usize) {
        self.break_points
            .entry(script.hash())
            .or_default()
            .insert(position);
    }

    /// Returns whether a breakpoint was set at `position`.
    pub fn remove_break_point(&mut self, script: &Script, position: usize) -> bool {
        let hash = script.hash();
        let Some(positions) = self.break_points.get_mut(&hash) else {
            return false;
        };
        let removed = positions.remove(&position);
        if positions.is_empty() {
            self.break_points.remove(&hash);
        }
        removed
    }

    /// Runs until HALT, FAULT, or the next breakpoint.
    pub fn execute(&mut self) -> VMState {
        if self.engine.state() == VMState::Break {
            self.engine.set_state(VMState::None);
        }
        while self.engine.state() == VMState::None {
            self.execute_and_check_break_points();
        }
        self.engine.state()
    }

    /// Executes one instruction, entering any call it makes.
    pub fn step_into(&mut self) -> VMState {
        if self.is_finished() {
            return self.engine.state();
        }
        self.engine.execute_next();
        self.pause_if_running()
    }

    /// Executes one instruction, running any call it makes to completion.
    pub fn step_over(&mut self) -> VMState {
        if self.is_finished() {
            return self.engine.state();
        }
        self.engine.set_state(VMState::None);
        let depth = self.engine.invocation_stack().len();
        loop {
            self.execute_and_check_break_points();
            if self.engine.state() != VMState::None
                || self.engine.invocation_stack().len() <= depth
            {
                break;
            }
        }
        self.pause_if_running()
    }

    /// Runs until the current frame returns.
    pub fn step_out(&mut self) -> VMState {
        if self.is_finished() {
            return self.engine.state();
        }
        self.engine.set_state(VMState::None);
        let depth = self.engine.invocation_stack().len();
        while self.engine.state() == VMState::None && self.engine.invocation_stack().len() >= depth
        {
            self.execute_and_check_break_points();
        }
        self.pause_if_running()
    }

    fn is_finished(&self) -> bool {
        matches!(self.engine.state(), VMState::Halt | VMState::Fault)
    }

    fn pause_if_running(&mut self) -> VMState {
        if self.engine.state() == VMState::None {
            self.engine.set_state(VMState::Break);
        }
        self.engine.state()
    }

    fn execute_and_check_break_points(&mut self) {
        self.engine.execute_next();
        if self.engine.state() != VMState::None {
            return;
        }
        let Ok(context) = self.engine.current_context() else {
            return;
        };
        let hit = self
            .break_points
            .get(&context.script().hash())
            .is_some_and(|positions| positions.contains(&context.instruction_pointer()));
        if hit {
            self.engine.set_state(VMState::Break);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::virtual_machine::isa::OpCode;
    use crate::virtual_machine::script_builder::ScriptBuilder;
    use crate::virtual_machine::stack_item::StackItem;
    use std::rc::Rc;

    fn load(engine: &mut ExecutionEngine, builder: &ScriptBuilder) -> Rc<Script> {
        let script = Rc::new(Script::new(builder.to_bytes(), true).unwrap());
        engine.load_script(script.clone(), -1, 0).unwrap();
        script
    }

    #[test]
    fn stops_at_break_point_then_resumes() {
        let mut builder = ScriptBuilder::new();
        builder.emit(OpCode::Push1);
        builder.emit(OpCode::Push2);
        builder.emit(OpCode::Add);
        let mut engine: ExecutionEngine = ExecutionEngine::default();
        let script = load(&mut engine, &builder);

        let mut debugger = Debugger::new(&mut engine);
        debugger.add_break_point(&script, 2);
        assert_eq!(debugger.execute(), VMState::Break);
        assert_eq!(debugger.engine().current_context().unwrap().instruction_pointer(), 2);

        assert!(debugger.remove_break_point(&script, 2));
        assert!(!debugger.remove_break_point(&script, 2));
        assert_eq!(debugger.execute(), VMState::Halt);
        assert_eq!(engine.result_stack().items(), &[StackItem::from_int(3)]);
    }

    #[test]
    fn step_over_runs_the_whole_call() {
        // 0: CALL +4 | 2: PUSH5 | 3: RET | 4: PUSH7 | 5: RET
        let mut builder = ScriptBuilder::new();
        builder.emit_call(4);
        builder.emit(OpCode::Push5);
        builder.emit(OpCode::Ret);
        builder.emit(OpCode::Push7);
        builder.emit(OpCode::Ret);
        let mut engine: ExecutionEngine = ExecutionEngine::default();
        load(&mut engine, &builder);

        let mut debugger = Debugger::new(&mut engine);
        assert_eq!(debugger.step_over(), VMState::Break);
        let context = debugger.engine().current_context().unwrap();
        assert_eq!(context.instruction_pointer(), 2);
        assert_eq!(context.evaluation_stack().len(), 1);
    }

    #[test]
    fn step_into_enters_the_call() {
        let mut builder = ScriptBuilder::new();
        builder.emit_call(4);
        builder.emit(OpCode::Push5);
        builder.emit(OpCode::Ret);
        builder.emit(OpCode::Push7);
        builder.emit(OpCode::Ret);
        let mut engine: ExecutionEngine = ExecutionEngine::default();
        load(&mut engine, &builder);

        let mut debugger = Debugger::new(&mut engine);
        assert_eq!(debugger.step_into(), VMState::Break);
        assert_eq!(debugger.engine().invocation_stack().len(), 2);
        assert_eq!(debugger.engine().current_context().unwrap().instruction_pointer(), 4);

        assert_eq!(debugger.step_out(), VMState::Break);
        assert_eq!(debugger.engine().invocation_stack().len(), 1);
        assert_eq!(debugger.execute(), VMState::Halt);
    }

    #[test]
    fn stepping_never_resumes_a_faulted_engine() {
        let mut builder = ScriptBuilder::new();
        builder.emit(OpCode::Push8);
        builder.emit(OpCode::Push2);
        builder.emit(OpCode::Push4);
        builder.emit(OpCode::Push0);
        builder.emit(OpCode::Div);
        let mut engine: ExecutionEngine = ExecutionEngine::default();
        load(&mut engine, &builder);

        let mut debugger = Debugger::new(&mut engine);
        assert_eq!(debugger.execute(), VMState::Fault);
        assert_eq!(debugger.step_out(), VMState::Fault);
        assert_eq!(debugger.step_over(), VMState::Fault);
        assert_eq!(debugger.step_into(), VMState::Fault);
        assert_eq!(debugger.execute(), VMState::Fault);
        assert!(engine.result_stack().is_empty());
    }
}
