use super::*;
use crate::virtual_machine::isa::OpCode;
use crate::virtual_machine::script_builder::ScriptBuilder;
use crate::virtual_machine::stack_item::StackItemType;

fn run_with(bytes: Vec<u8>, limits: ExecutionEngineLimits) -> ExecutionEngine {
    let mut engine = ExecutionEngine::new(NullHost, limits);
    let script = Rc::new(Script::new(bytes, true).unwrap());
    engine.load_script(script, -1, 0).unwrap();
    engine.execute();
    engine
}

fn run(builder: &ScriptBuilder) -> ExecutionEngine {
    run_with(builder.to_bytes(), ExecutionEngineLimits::default())
}

fn results(engine: &ExecutionEngine) -> Vec<StackItem> {
    engine.result_stack().items().to_vec()
}

fn ints(values: &[i64]) -> Vec<StackItem> {
    values.iter().map(|v| StackItem::from_int(*v)).collect()
}

#[test]
fn adds_two_constants() {
    let mut builder = ScriptBuilder::new();
    builder.emit(OpCode::Push1).emit(OpCode::Push2).emit(OpCode::Add);
    let engine = run(&builder);
    assert_eq!(engine.state(), VMState::Halt);
    assert_eq!(results(&engine), ints(&[3]));
}

#[test]
fn empty_script_halts_immediately() {
    let engine = run(&ScriptBuilder::new());
    assert_eq!(engine.state(), VMState::Halt);
    assert!(results(&engine).is_empty());
}

#[test]
fn self_referencing_array_is_collected() {
    let mut builder = ScriptBuilder::new();
    builder
        .emit(OpCode::NewArray0)
        .emit(OpCode::Dup)
        .emit(OpCode::Dup)
        .emit(OpCode::Append)
        .emit(OpCode::Drop);
    let mut engine = run(&builder);
    assert_eq!(engine.state(), VMState::Halt);
    assert_eq!(engine.collect_garbage(), 0);
    assert_eq!(engine.heap().live_objects(), 0);
}

#[test]
fn reference_limit_faults() {
    let mut builder = ScriptBuilder::new();
    for _ in 0..5 {
        builder.emit(OpCode::Push1);
    }
    let limits = ExecutionEngineLimits {
        max_stack_size: 4,
        ..Default::default()
    };
    let engine = run_with(builder.to_bytes(), limits);
    assert_eq!(engine.state(), VMState::Fault);
    assert!(matches!(
        engine.fault_exception(),
        Some(VMError::StackOverflow { size: 5, max: 4 })
    ));
}

#[test]
fn catch_receives_thrown_value() {
    // 0: TRY_L catch=11 | 9: PUSH1 | 10: THROW | 11: DROP | 12: PUSH2 | 13: ENDTRY +2 | 15: PUSH3
    let mut builder = ScriptBuilder::new();
    builder
        .emit_try(11, 0)
        .emit(OpCode::Push1)
        .emit(OpCode::Throw)
        .emit(OpCode::Drop)
        .emit(OpCode::Push2)
        .emit_jump(OpCode::EndTry, 2)
        .emit(OpCode::Push3);
    let engine = run(&builder);
    assert_eq!(engine.state(), VMState::Halt);
    assert_eq!(results(&engine), ints(&[2, 3]));
    assert!(engine.uncaught_exception().is_none());
}

#[test]
fn finally_runs_and_exception_propagates() {
    // 0: TRY_L finally=11 | 9: PUSH1 | 10: THROW | 11: PUSH5 | 12: ENDFINALLY
    let mut builder = ScriptBuilder::new();
    builder
        .emit_try(0, 11)
        .emit(OpCode::Push1)
        .emit(OpCode::Throw)
        .emit(OpCode::Push5)
        .emit(OpCode::EndFinally);
    let engine = run(&builder);
    assert_eq!(engine.state(), VMState::Fault);
    assert!(matches!(
        engine.fault_exception(),
        Some(VMError::UnhandledException(_))
    ));
}

#[test]
fn finally_runs_after_try_without_exception() {
    // 0: TRY_L finally=12 | 9: PUSH1 | 10: ENDTRY +4 | 12: PUSH2 | 13: ENDFINALLY | 14: PUSH3
    let mut builder = ScriptBuilder::new();
    builder
        .emit_try(0, 12)
        .emit(OpCode::Push1)
        .emit_jump(OpCode::EndTry, 4)
        .emit(OpCode::Push2)
        .emit(OpCode::EndFinally)
        .emit(OpCode::Push3);
    let engine = run(&builder);
    assert_eq!(engine.state(), VMState::Halt);
    assert_eq!(results(&engine), ints(&[1, 2, 3]));
}

#[test]
fn unhandled_exception_carries_message() {
    let mut builder = ScriptBuilder::new();
    builder.emit_push_string("boom").emit(OpCode::Throw);
    let engine = run(&builder);
    assert_eq!(engine.state(), VMState::Fault);
    assert_eq!(
        engine.fault_exception(),
        Some(&VMError::UnhandledException("boom".into()))
    );
}

#[test]
fn index_miss_is_catchable() {
    // 0: TRY_L catch=12 | 9: NEWARRAY0 | 10: PUSH0 | 11: PICKITEM | 12: DROP | 13: PUSH7 | 14: ENDTRY +2 | 16: NOP
    let mut builder = ScriptBuilder::new();
    builder
        .emit_try(12, 0)
        .emit(OpCode::NewArray0)
        .emit(OpCode::Push0)
        .emit(OpCode::PickItem)
        .emit(OpCode::Drop)
        .emit(OpCode::Push7)
        .emit_jump(OpCode::EndTry, 2)
        .emit(OpCode::Nop);
    let engine = run(&builder);
    assert_eq!(engine.state(), VMState::Halt);
    assert_eq!(results(&engine), ints(&[7]));
}

#[test]
fn index_miss_without_try_faults() {
    let mut builder = ScriptBuilder::new();
    builder
        .emit(OpCode::NewArray0)
        .emit(OpCode::Push0)
        .emit(OpCode::PickItem);
    let engine = run(&builder);
    assert_eq!(engine.state(), VMState::Fault);
    assert!(matches!(
        engine.fault_exception(),
        Some(VMError::UnhandledException(_))
    ));
}

#[test]
fn division_by_zero_is_not_catchable() {
    // 0: TRY_L catch=13 | 9: PUSH1 | 10: PUSH0 | 11: DIV | 12: RET | 13: PUSH7
    let mut builder = ScriptBuilder::new();
    builder
        .emit_try(13, 0)
        .emit(OpCode::Push1)
        .emit(OpCode::Push0)
        .emit(OpCode::Div)
        .emit(OpCode::Ret)
        .emit(OpCode::Push7);
    let engine = run(&builder);
    assert_eq!(engine.state(), VMState::Fault);
    assert_eq!(engine.fault_exception(), Some(&VMError::DivisionByZero));
}

#[test]
fn call_with_arguments() {
    // 0: PUSH2 | 1: PUSH3 | 2: CALL +3 | 4: RET | 5: INITSLOT 0 2 | 8: LDARG0 | 9: LDARG1 | 10: SUB | 11: RET
    let mut builder = ScriptBuilder::new();
    builder
        .emit(OpCode::Push2)
        .emit(OpCode::Push3)
        .emit_call(3)
        .emit(OpCode::Ret)
        .emit_with(OpCode::InitSlot, &[0, 2])
        .emit(OpCode::LdArg0)
        .emit(OpCode::LdArg1)
        .emit(OpCode::Sub)
        .emit(OpCode::Ret);
    let engine = run(&builder);
    assert_eq!(engine.state(), VMState::Halt);
    assert_eq!(results(&engine), ints(&[1]));
}

#[test]
fn static_fields_are_shared() {
    let mut builder = ScriptBuilder::new();
    builder
        .emit_with(OpCode::InitSSlot, &[1])
        .emit(OpCode::Push5)
        .emit(OpCode::StSFld0)
        .emit(OpCode::LdSFld0)
        .emit(OpCode::LdSFld0)
        .emit(OpCode::Mul);
    let engine = run(&builder);
    assert_eq!(results(&engine), ints(&[25]));
}

#[test]
fn uninitialized_local_faults() {
    let mut builder = ScriptBuilder::new();
    builder.emit(OpCode::LdLoc0);
    let engine = run(&builder);
    assert_eq!(
        engine.fault_exception(),
        Some(&VMError::SlotNotInitialized("local"))
    );
}

#[test]
fn calla_uses_pointer() {
    // 0: PUSHA +7 | 5: CALLA | 6: RET | 7: PUSH9 | 8: RET
    let mut builder = ScriptBuilder::new();
    builder
        .emit_with(OpCode::PushA, &7i32.to_le_bytes())
        .emit(OpCode::CallA)
        .emit(OpCode::Ret)
        .emit(OpCode::Push9)
        .emit(OpCode::Ret);
    let engine = run(&builder);
    assert_eq!(engine.state(), VMState::Halt);
    assert_eq!(results(&engine), ints(&[9]));
}

#[test]
fn unbounded_recursion_overflows_invocation_stack() {
    let mut builder = ScriptBuilder::new();
    builder.emit_call(0);
    let limits = ExecutionEngineLimits {
        max_invocation_stack_size: 8,
        ..Default::default()
    };
    let engine = run_with(builder.to_bytes(), limits);
    assert_eq!(
        engine.fault_exception(),
        Some(&VMError::InvocationStackOverflow { max: 8 })
    );
}

#[test]
fn return_value_count_is_checked() {
    let mut builder = ScriptBuilder::new();
    builder.emit(OpCode::Push1);
    let mut engine: ExecutionEngine = ExecutionEngine::default();
    let script = Rc::new(Script::new(builder.to_bytes(), true).unwrap());
    engine.load_script(script, 0, 0).unwrap();
    assert_eq!(engine.execute(), VMState::Fault);
    assert!(matches!(
        engine.fault_exception(),
        Some(VMError::InvalidOperation(_))
    ));
}

#[test]
fn jump_outside_script_faults() {
    let mut engine: ExecutionEngine = ExecutionEngine::default();
    let script = Rc::new(Script::new(vec![OpCode::Jmp as u8, 100], false).unwrap());
    engine.load_script(script, -1, 0).unwrap();
    assert_eq!(engine.execute(), VMState::Fault);
    assert_eq!(
        engine.fault_exception(),
        Some(&VMError::InvalidJumpTarget { target: 100 })
    );
}

#[test]
fn conditional_jump_loop() {
    // Counts down from 3, summing into a local.
    // 0: INITSLOT 1 0 | 3: PUSH0 | 4: STLOC0 | 5: PUSH3
    // 6: DUP | 7: LDLOC0 | 8: ADD | 9: STLOC0 | 10: DEC | 11: DUP | 12: JMPIF -6
    // 14: DROP | 15: LDLOC0
    let mut builder = ScriptBuilder::new();
    builder
        .emit_with(OpCode::InitSlot, &[1, 0])
        .emit(OpCode::Push0)
        .emit(OpCode::StLoc0)
        .emit(OpCode::Push3)
        .emit(OpCode::Dup)
        .emit(OpCode::LdLoc0)
        .emit(OpCode::Add)
        .emit(OpCode::StLoc0)
        .emit(OpCode::Dec)
        .emit(OpCode::Dup)
        .emit_jump(OpCode::JmpIf, -6)
        .emit(OpCode::Drop)
        .emit(OpCode::LdLoc0);
    let engine = run(&builder);
    assert_eq!(engine.state(), VMState::Halt);
    assert_eq!(results(&engine), ints(&[6]));
}

#[test]
fn structs_compare_by_value_arrays_by_identity() {
    let mut builder = ScriptBuilder::new();
    for opcode in [OpCode::PackStruct, OpCode::Pack] {
        builder
            .emit(OpCode::Push1)
            .emit(OpCode::Push1)
            .emit(opcode)
            .emit(OpCode::Push1)
            .emit(OpCode::Push1)
            .emit(opcode)
            .emit(OpCode::Equal);
    }
    let engine = run(&builder);
    assert_eq!(
        results(&engine),
        vec![StackItem::Boolean(true), StackItem::Boolean(false)]
    );
}

#[test]
fn append_copies_structs() {
    // The struct is appended, then mutated; the copy inside the array keeps its old value.
    let mut builder = ScriptBuilder::new();
    builder
        .emit(OpCode::NewArray0)
        .emit(OpCode::Dup)
        .emit(OpCode::Push1)
        .emit(OpCode::Push1)
        .emit(OpCode::PackStruct)
        .emit(OpCode::Tuck)
        .emit(OpCode::Append)
        .emit(OpCode::Push0)
        .emit(OpCode::Push9)
        .emit(OpCode::SetItem)
        .emit(OpCode::Push0)
        .emit(OpCode::PickItem)
        .emit(OpCode::Push0)
        .emit(OpCode::PickItem);
    let engine = run(&builder);
    assert_eq!(engine.state(), VMState::Halt);
    assert_eq!(results(&engine), ints(&[1]));
}

#[test]
fn pack_map_and_unpack() {
    let mut builder = ScriptBuilder::new();
    builder
        .emit(OpCode::Push2)
        .emit(OpCode::Push1)
        .emit(OpCode::Push1)
        .emit(OpCode::PackMap)
        .emit(OpCode::Unpack);
    let engine = run(&builder);
    assert_eq!(results(&engine), ints(&[2, 1, 1]));
}

#[test]
fn modpow_handles_inverse_and_negative_base() {
    let mut builder = ScriptBuilder::new();
    builder
        .emit(OpCode::Push3)
        .emit(OpCode::PushM1)
        .emit(OpCode::Push11)
        .emit(OpCode::ModPow)
        .emit_push_int(-2)
        .emit(OpCode::Push3)
        .emit(OpCode::Push5)
        .emit(OpCode::ModPow);
    let engine = run(&builder);
    assert_eq!(results(&engine), ints(&[4, -3]));
}

#[test]
fn modular_inverse_of_zero_faults() {
    let mut builder = ScriptBuilder::new();
    builder
        .emit(OpCode::Push0)
        .emit(OpCode::PushM1)
        .emit(OpCode::Push11)
        .emit(OpCode::ModPow);
    let engine = run(&builder);
    assert_eq!(engine.state(), VMState::Fault);
}

#[test]
fn shift_right_rounds_down() {
    let mut builder = ScriptBuilder::new();
    builder
        .emit_push_int(-5)
        .emit(OpCode::Push1)
        .emit(OpCode::Shr)
        .emit(OpCode::Push1)
        .emit(OpCode::Push0)
        .emit(OpCode::Shl);
    let engine = run(&builder);
    assert_eq!(results(&engine), ints(&[-3, 1]));
}

#[test]
fn integer_overflow_faults() {
    let mut builder = ScriptBuilder::new();
    builder
        .emit(OpCode::Push1)
        .emit_push_int(255)
        .emit(OpCode::Shl)
        .emit(OpCode::Dup)
        .emit(OpCode::Add);
    let engine = run(&builder);
    assert!(matches!(
        engine.fault_exception(),
        Some(VMError::IntegerOverflow { .. })
    ));
}

#[test]
fn concatenation_produces_buffer() {
    let mut builder = ScriptBuilder::new();
    builder
        .emit_push_string("ab")
        .emit_push_string("cd")
        .emit(OpCode::Cat)
        .emit(OpCode::Dup)
        .emit_with(OpCode::IsType, &[StackItemType::Buffer as u8])
        .emit(OpCode::Swap)
        .emit_with(OpCode::Convert, &[StackItemType::ByteString as u8]);
    let engine = run(&builder);
    assert_eq!(
        results(&engine),
        vec![StackItem::Boolean(true), StackItem::from_bytes("abcd")]
    );
}

#[test]
fn comparison_with_null_is_false() {
    let mut builder = ScriptBuilder::new();
    builder
        .emit(OpCode::PushNull)
        .emit(OpCode::Push1)
        .emit(OpCode::Lt);
    let engine = run(&builder);
    assert_eq!(results(&engine), vec![StackItem::Boolean(false)]);
}

#[test]
fn assert_message_faults() {
    let mut builder = ScriptBuilder::new();
    builder
        .emit(OpCode::PushF)
        .emit_push_string("bad state")
        .emit(OpCode::AssertMsg);
    let engine = run(&builder);
    assert_eq!(
        engine.fault_exception(),
        Some(&VMError::AssertMsg("bad state".into()))
    );
}

#[test]
fn stack_manipulation() {
    // [1 2 3] ROT -> [2 3 1], OVER -> [2 3 1 3], NIP -> [2 3 3], PUSH2 PICK -> [2 3 3 2]
    let mut builder = ScriptBuilder::new();
    builder
        .emit(OpCode::Push1)
        .emit(OpCode::Push2)
        .emit(OpCode::Push3)
        .emit(OpCode::Rot)
        .emit(OpCode::Over)
        .emit(OpCode::Nip)
        .emit(OpCode::Push2)
        .emit(OpCode::Pick);
    let engine = run(&builder);
    assert_eq!(results(&engine), ints(&[2, 3, 3, 2]));
}
