use super::*;
use crate::crypto::key_pair::{PrivateKey, PublicKey};
use crate::smart_contract::container::{Signer, TestContainer, WitnessScope};
use crate::smart_contract::crypto::CHECK_SIG_PRICE;
use crate::smart_contract::contracts::{ContractManifest, ContractParameterType, contract_hash, put_contract};
use crate::smart_contract::events::EventValue;
use crate::smart_contract::interop::{InteropDescriptor, InteropParameterType};
use crate::smart_contract::nef::{MethodToken, NefFile};
use crate::smart_contract::storage::{FindOptions, StorageKey};
use crate::state::MemoryState;
use crate::types::hash::Hash;
use crate::virtual_machine::isa::OpCode;
use crate::virtual_machine::script_builder::ScriptBuilder;
use std::cell::Cell;

const GAS: i64 = 1_000_000_000;

fn engine<'a>(
    state: &'a mut MemoryState,
    settings: &'a ProtocolSettings,
    container: Option<&'a dyn ScriptContainer>,
) -> ApplicationEngine<'a> {
    ApplicationEngine::create(TriggerType::Application, container, state, None, settings, GAS)
}

fn load_entry(engine: &mut ApplicationEngine<'_>, builder: &ScriptBuilder, flags: CallFlags) {
    let script = Rc::new(Script::new(builder.to_bytes(), false).unwrap());
    engine.load_script_with_flags(script, -1, flags).unwrap();
}

fn results(engine: &ApplicationEngine<'_>) -> Vec<StackItem> {
    engine.result_stack().items().to_vec()
}

fn void_method(name: &str, parameters: usize, offset: u32) -> ContractMethod {
    ContractMethod {
        return_type: ContractParameterType::Void,
        ..ContractMethod::new(name, parameters, offset)
    }
}

fn deploy_with_tokens(
    state: &mut MemoryState,
    id: i32,
    script: Vec<u8>,
    methods: Vec<ContractMethod>,
    tokens: Vec<MethodToken>,
) -> Address {
    let name = format!("contract{id}");
    let hash = contract_hash(&Address::zero(), id as u32, &name);
    put_contract(
        state,
        &ContractState {
            id,
            update_counter: 0,
            hash,
            nef: NefFile::new("test", "", tokens, script),
            manifest: ContractManifest { name, methods },
        },
    );
    hash
}

fn deploy(state: &mut MemoryState, id: i32, script: &ScriptBuilder, methods: Vec<ContractMethod>) -> Address {
    deploy_with_tokens(state, id, script.to_bytes(), methods, Vec::new())
}

/// Contract whose `answer` method returns 42.
fn deploy_answer(state: &mut MemoryState, id: i32) -> Address {
    let mut sb = ScriptBuilder::new();
    sb.emit_push_int(42).emit(OpCode::Ret);
    deploy(state, id, &sb, vec![ContractMethod::new("answer", 0, 0)])
}

/// Contract whose `answer` method throws "fail".
fn deploy_failing(state: &mut MemoryState, id: i32) -> Address {
    let mut sb = ScriptBuilder::new();
    sb.emit_push_string("fail").emit(OpCode::Throw);
    deploy(state, id, &sb, vec![ContractMethod::new("answer", 0, 0)])
}

#[test]
fn halts_with_result_and_charges_opcodes() {
    let settings = ProtocolSettings::default();
    let mut state = MemoryState::new();
    let mut engine = engine(&mut state, &settings, None);
    let mut sb = ScriptBuilder::new();
    sb.emit(OpCode::Push1).emit(OpCode::Push2).emit(OpCode::Add);
    load_entry(&mut engine, &sb, CallFlags::ALL);

    assert_eq!(engine.execute(), VMState::Halt);
    assert_eq!(results(&engine), vec![StackItem::from_int(3)]);

    let prices = PriceTable::new();
    let minimum = (prices.price(OpCode::Push1) + prices.price(OpCode::Push2) + prices.price(OpCode::Add))
        * settings.exec_fee_factor;
    assert!(engine.gas_consumed() >= minimum);
    assert_eq!(engine.gas_profile().get(GasCategory::Opcode), engine.gas_consumed());
    assert_eq!(engine.gas_left(), GAS - engine.gas_consumed());
}

#[test]
fn zero_gas_faults_on_first_instruction() {
    let settings = ProtocolSettings::default();
    let mut state = MemoryState::new();
    let mut engine =
        ApplicationEngine::create(TriggerType::Application, None, &mut state, None, &settings, 0);
    let mut sb = ScriptBuilder::new();
    sb.emit(OpCode::Push1);
    load_entry(&mut engine, &sb, CallFlags::ALL);

    assert_eq!(engine.execute(), VMState::Fault);
    assert_eq!(engine.gas_consumed(), 0);
    assert_eq!(engine.gas_left(), 0);
    assert!(matches!(engine.fault_exception(), Some(VMError::InsufficientGas { .. })));
}

#[test]
fn running_out_of_gas_pins_consumption_at_the_limit() {
    let settings = ProtocolSettings::default();
    let mut state = MemoryState::new();
    let mut engine =
        ApplicationEngine::create(TriggerType::Application, None, &mut state, None, &settings, 100);
    let mut sb = ScriptBuilder::new();
    sb.emit(OpCode::Push1).emit(OpCode::Push2).emit(OpCode::Add);
    load_entry(&mut engine, &sb, CallFlags::ALL);

    assert_eq!(engine.execute(), VMState::Fault);
    assert_eq!(engine.gas_consumed(), 100);
    assert_eq!(engine.gas_left(), 0);
    assert_eq!(engine.gas_profile().total(), 100);
}

#[test]
fn unknown_syscall_faults() {
    let settings = ProtocolSettings::default();
    let mut state = MemoryState::new();
    let mut engine = engine(&mut state, &settings, None);
    let mut sb = ScriptBuilder::new();
    sb.emit_syscall_selector(0xDEAD_BEEF);
    load_entry(&mut engine, &sb, CallFlags::ALL);

    assert_eq!(engine.execute(), VMState::Fault);
    assert!(matches!(engine.fault_exception(), Some(VMError::InteropNotFound(0xDEAD_BEEF))));
}

#[test]
fn syscall_without_required_flags_is_denied() {
    let settings = ProtocolSettings::default();
    let mut state = MemoryState::new();
    let mut engine = engine(&mut state, &settings, None);
    let mut sb = ScriptBuilder::new();
    sb.emit_push_string("hello").emit_syscall("System.Runtime.Log");
    load_entry(&mut engine, &sb, CallFlags::READ_STATES);

    assert_eq!(engine.execute(), VMState::Fault);
    assert!(matches!(
        engine.fault_exception(),
        Some(VMError::PermissionDenied { syscall: "System.Runtime.Log", .. })
    ));
    assert!(engine.logs().is_empty());
}

#[test]
fn log_and_notify_are_recorded() {
    let settings = ProtocolSettings::default();
    let mut state = MemoryState::new();
    let mut engine = engine(&mut state, &settings, None);
    let mut sb = ScriptBuilder::new();
    sb.emit_push_string("hello")
        .emit_syscall("System.Runtime.Log")
        .emit(OpCode::NewArray0)
        .emit_push_string("Transfer")
        .emit_syscall("System.Runtime.Notify");
    load_entry(&mut engine, &sb, CallFlags::ALL);

    assert_eq!(engine.execute(), VMState::Halt);
    let entry = Address::from_script(&sb.to_bytes());
    assert_eq!(
        engine.logs(),
        &[LogEvent {
            script_hash: entry,
            message: "hello".into()
        }]
    );
    assert_eq!(
        engine.notifications(),
        &[Notification {
            script_hash: entry,
            event_name: "Transfer".into(),
            state: EventValue::Array(Vec::new()),
        }]
    );
}

#[test]
fn burn_gas_charges_the_syscall_category() {
    let settings = ProtocolSettings::default();
    let mut state = MemoryState::new();
    let mut engine = engine(&mut state, &settings, None);
    let mut sb = ScriptBuilder::new();
    sb.emit_push_int(1000).emit_syscall("System.Runtime.BurnGas");
    load_entry(&mut engine, &sb, CallFlags::ALL);

    assert_eq!(engine.execute(), VMState::Halt);
    assert_eq!(
        engine.gas_profile().get(GasCategory::Syscall),
        (1 << 4) * settings.exec_fee_factor + 1000
    );
}

#[test]
fn burning_nothing_is_rejected() {
    let settings = ProtocolSettings::default();
    let mut state = MemoryState::new();
    let mut engine = engine(&mut state, &settings, None);
    let mut sb = ScriptBuilder::new();
    sb.emit_push_int(0).emit_syscall("System.Runtime.BurnGas");
    load_entry(&mut engine, &sb, CallFlags::ALL);

    assert_eq!(engine.execute(), VMState::Fault);
}

#[test]
fn dynamic_call_to_void_method_yields_null() {
    let settings = ProtocolSettings::default();
    let mut state = MemoryState::new();
    let mut callee = ScriptBuilder::new();
    callee
        .emit(OpCode::NewArray0)
        .emit_push_string("Ok")
        .emit_syscall("System.Runtime.Notify")
        .emit(OpCode::Ret);
    let hash = deploy(&mut state, 1, &callee, vec![void_method("main", 0, 0)]);

    let mut engine = engine(&mut state, &settings, None);
    let mut sb = ScriptBuilder::new();
    sb.emit_dynamic_call(&hash, "main", CallFlags::ALL.bits(), 0);
    load_entry(&mut engine, &sb, CallFlags::ALL);

    assert_eq!(engine.execute(), VMState::Halt);
    assert_eq!(results(&engine), vec![StackItem::Null]);
    assert_eq!(engine.notifications().len(), 1);
    assert_eq!(engine.notifications()[0].script_hash, hash);
    assert_eq!(engine.invocation_count(&hash), Some(1));
}

#[test]
fn dynamic_call_passes_arguments_in_order() {
    let settings = ProtocolSettings::default();
    let mut state = MemoryState::new();
    let mut callee = ScriptBuilder::new();
    callee
        .emit_with(OpCode::InitSlot, &[0, 2])
        .emit(OpCode::LdArg0)
        .emit(OpCode::LdArg1)
        .emit(OpCode::Sub)
        .emit(OpCode::Ret);
    let hash = deploy(&mut state, 1, &callee, vec![ContractMethod::new("sub", 2, 0)]);

    let mut engine = engine(&mut state, &settings, None);
    let mut sb = ScriptBuilder::new();
    sb.emit_push_int(3)
        .emit_push_int(10)
        .emit_dynamic_call(&hash, "sub", CallFlags::ALL.bits(), 2);
    load_entry(&mut engine, &sb, CallFlags::ALL);

    assert_eq!(engine.execute(), VMState::Halt);
    assert_eq!(results(&engine), vec![StackItem::from_int(7)]);
}

#[test]
fn notifications_of_an_unwound_callee_are_discarded() {
    let settings = ProtocolSettings::default();
    let mut state = MemoryState::new();
    let mut callee = ScriptBuilder::new();
    callee
        .emit(OpCode::NewArray0)
        .emit_push_string("Boom")
        .emit_syscall("System.Runtime.Notify")
        .emit_push_string("fail")
        .emit(OpCode::Throw);
    let hash = deploy(&mut state, 1, &callee, vec![void_method("main", 0, 0)]);

    let mut body = ScriptBuilder::new();
    body.emit_dynamic_call(&hash, "main", CallFlags::ALL.bits(), 0);
    let body_len = body.len() as i32;

    let mut sb = ScriptBuilder::new();
    sb.emit_try(9 + body_len + 2, 0)
        .emit_dynamic_call(&hash, "main", CallFlags::ALL.bits(), 0)
        .emit_jump(OpCode::EndTry, 5)
        .emit(OpCode::Drop)
        .emit_jump(OpCode::EndTry, 2)
        .emit(OpCode::Ret);

    let mut engine = engine(&mut state, &settings, None);
    load_entry(&mut engine, &sb, CallFlags::ALL);

    assert_eq!(engine.execute(), VMState::Halt);
    assert!(engine.notifications().is_empty());
    assert!(results(&engine).is_empty());
}

#[test]
fn unknown_contract_faults() {
    let settings = ProtocolSettings::default();
    let mut state = MemoryState::new();
    let mut engine = engine(&mut state, &settings, None);
    let mut sb = ScriptBuilder::new();
    sb.emit_dynamic_call(&Address([9; 20]), "main", CallFlags::ALL.bits(), 0);
    load_entry(&mut engine, &sb, CallFlags::ALL);

    assert_eq!(engine.execute(), VMState::Fault);
    assert!(matches!(engine.fault_exception(), Some(VMError::ContractNotFound(_))));
}

#[test]
fn safe_methods_cannot_notify() {
    let settings = ProtocolSettings::default();
    let mut state = MemoryState::new();
    let mut callee = ScriptBuilder::new();
    callee
        .emit(OpCode::NewArray0)
        .emit_push_string("Nope")
        .emit_syscall("System.Runtime.Notify")
        .emit(OpCode::Ret);
    let method = ContractMethod {
        safe: true,
        ..void_method("main", 0, 0)
    };
    let hash = deploy(&mut state, 1, &callee, vec![method]);

    let mut engine = engine(&mut state, &settings, None);
    engine
        .call_contract(hash, "main", CallFlags::ALL, false, Vec::new())
        .unwrap();

    assert_eq!(engine.execute(), VMState::Fault);
    assert!(matches!(engine.fault_exception(), Some(VMError::PermissionDenied { .. })));
}

#[test]
fn call_token_invokes_the_declared_method() {
    let settings = ProtocolSettings::default();
    let mut state = MemoryState::new();
    let answer = deploy_answer(&mut state, 1);
    let token = MethodToken {
        hash: answer,
        method: "answer".into(),
        parameters_count: 0,
        has_return_value: true,
        call_flags: CallFlags::ALL,
    };
    let mut caller = ScriptBuilder::new();
    caller.emit_with(OpCode::CallT, &0u16.to_le_bytes()).emit(OpCode::Ret);
    let hash = deploy_with_tokens(
        &mut state,
        2,
        caller.to_bytes(),
        vec![ContractMethod::new("main", 0, 0)],
        vec![token],
    );

    let mut engine = engine(&mut state, &settings, None);
    engine
        .call_contract(hash, "main", CallFlags::ALL, true, Vec::new())
        .unwrap();

    assert_eq!(engine.execute(), VMState::Halt);
    assert_eq!(results(&engine), vec![StackItem::from_int(42)]);
    assert_eq!(engine.invocation_count(&answer), Some(1));
}

#[test]
fn call_token_needs_the_token_flags() {
    let settings = ProtocolSettings::default();
    let mut state = MemoryState::new();
    let answer = deploy_answer(&mut state, 1);
    let token = MethodToken {
        hash: answer,
        method: "answer".into(),
        parameters_count: 0,
        has_return_value: true,
        call_flags: CallFlags::ALL,
    };
    let mut caller = ScriptBuilder::new();
    caller.emit_with(OpCode::CallT, &0u16.to_le_bytes()).emit(OpCode::Ret);
    let hash = deploy_with_tokens(
        &mut state,
        2,
        caller.to_bytes(),
        vec![ContractMethod::new("main", 0, 0)],
        vec![token],
    );

    let mut engine = engine(&mut state, &settings, None);
    engine
        .call_contract(hash, "main", CallFlags::READ_STATES, true, Vec::new())
        .unwrap();

    assert_eq!(engine.execute(), VMState::Fault);
    assert!(matches!(engine.fault_exception(), Some(VMError::InvalidOperation(_))));
}

#[test]
fn initialize_runs_before_the_called_method() {
    let settings = ProtocolSettings::default();
    let mut state = MemoryState::new();
    let mut sb = ScriptBuilder::new();
    sb.emit(OpCode::LdSFld0)
        .emit(OpCode::Ret)
        .emit_with(OpCode::InitSSlot, &[1])
        .emit(OpCode::Push7)
        .emit(OpCode::StSFld0)
        .emit(OpCode::Ret);
    let hash = deploy(
        &mut state,
        1,
        &sb,
        vec![ContractMethod::new("main", 0, 0), void_method("_initialize", 0, 2)],
    );

    let mut engine = engine(&mut state, &settings, None);
    engine
        .call_contract(hash, "main", CallFlags::ALL, true, Vec::new())
        .unwrap();

    assert_eq!(engine.execute(), VMState::Halt);
    assert_eq!(results(&engine), vec![StackItem::from_int(7)]);
}

#[test]
fn invocation_counter_of_a_called_contract() {
    let settings = ProtocolSettings::default();
    let mut state = MemoryState::new();
    let mut sb = ScriptBuilder::new();
    sb.emit_syscall("System.Runtime.GetInvocationCounter").emit(OpCode::Ret);
    let hash = deploy(&mut state, 1, &sb, vec![ContractMethod::new("main", 0, 0)]);

    let mut engine = engine(&mut state, &settings, None);
    engine
        .call_contract(hash, "main", CallFlags::ALL, true, Vec::new())
        .unwrap();

    assert_eq!(engine.execute(), VMState::Halt);
    assert_eq!(results(&engine), vec![StackItem::from_int(1)]);
}

#[test]
fn awaited_call_completes_the_continuation() {
    let settings = ProtocolSettings::default();
    let mut state = MemoryState::new();
    let answer = deploy_answer(&mut state, 1);

    let mut engine = engine(&mut state, &settings, None);
    let resumed = Rc::new(Cell::new(false));
    let flag = resumed.clone();
    let continuation = engine
        .call_contract_awaiting(
            answer,
            "answer",
            CallFlags::ALL,
            true,
            Vec::new(),
            Box::new(move |_engine: &mut ApplicationEngine<'_>, continuation: &Continuation| {
                flag.set(continuation.is_complete());
                Ok(())
            }),
        )
        .unwrap();

    assert_eq!(engine.execute(), VMState::Halt);
    assert!(resumed.get());
    assert_eq!(continuation.result(), Some(Ok(StackItem::from_int(42))));
    assert!(results(&engine).is_empty());
}

#[test]
fn awaited_call_reports_the_exception() {
    let settings = ProtocolSettings::default();
    let mut state = MemoryState::new();
    let failing = deploy_failing(&mut state, 1);

    // TRY_L catch=+11 | ENDTRY +5 | DROP | ENDTRY +2 | RET
    let mut sb = ScriptBuilder::new();
    sb.emit_try(11, 0)
        .emit_jump(OpCode::EndTry, 5)
        .emit(OpCode::Drop)
        .emit_jump(OpCode::EndTry, 2)
        .emit(OpCode::Ret);

    let mut engine = engine(&mut state, &settings, None);
    load_entry(&mut engine, &sb, CallFlags::ALL);
    engine.execute_next();
    let continuation = engine
        .call_contract_awaiting(
            failing,
            "answer",
            CallFlags::ALL,
            true,
            Vec::new(),
            Box::new(|_engine: &mut ApplicationEngine<'_>, _continuation: &Continuation| Ok(())),
        )
        .unwrap();

    assert_eq!(engine.execute(), VMState::Halt);
    assert_eq!(continuation.result(), Some(Err("fail".to_string())));
}

fn double_answer(engine: &mut ApplicationEngine<'_>, args: &mut InteropArgs) -> Result<Option<StackItem>, VMError> {
    let hash = args.hash160()?;
    engine.call_contract_awaiting(
        hash,
        "answer",
        CallFlags::ALL,
        true,
        Vec::new(),
        Box::new(|engine: &mut ApplicationEngine<'_>, continuation: &Continuation| {
            let value = match continuation.result() {
                Some(Ok(item)) => item.get_integer()?,
                _ => return Err(VMError::InvalidOperation("callee did not return".into())),
            };
            engine.push(StackItem::from_int(value * 2))
        }),
    )?;
    Ok(None)
}

#[test]
fn host_handler_resumes_with_the_callee_result() {
    let settings = ProtocolSettings::default();
    let mut state = MemoryState::new();
    let answer = deploy_answer(&mut state, 1);

    let mut registry = InteropRegistry::standard();
    registry.register(InteropDescriptor::new(
        "Test.DoubleAnswer",
        double_answer,
        0,
        CallFlags::ALLOW_CALL,
        &[InteropParameterType::Hash160],
    ));
    let mut engine = engine(&mut state, &settings, None).with_interops(Rc::new(registry));
    let mut sb = ScriptBuilder::new();
    sb.emit_push_bytes(answer.as_slice())
        .emit_syscall("Test.DoubleAnswer")
        .emit(OpCode::Ret);
    load_entry(&mut engine, &sb, CallFlags::ALL);

    assert_eq!(engine.execute(), VMState::Halt);
    assert_eq!(results(&engine), vec![StackItem::from_int(84)]);
}

#[test]
fn storage_put_then_get() {
    let settings = ProtocolSettings::default();
    let mut state = MemoryState::new();
    let mut sb = ScriptBuilder::new();
    sb.emit_push_string("value")
        .emit_push_string("key")
        .emit_syscall("System.Storage.GetContext")
        .emit_syscall("System.Storage.Put")
        .emit_push_string("key")
        .emit_syscall("System.Storage.GetContext")
        .emit_syscall("System.Storage.Get")
        .emit(OpCode::Ret);
    let hash = deploy(&mut state, 5, &sb, vec![ContractMethod::new("main", 0, 0)]);

    {
        let mut engine = engine(&mut state, &settings, None);
        engine
            .call_contract(hash, "main", CallFlags::ALL, true, Vec::new())
            .unwrap();
        assert_eq!(engine.execute(), VMState::Halt);
        assert_eq!(results(&engine), vec![StackItem::from_bytes("value")]);
        assert_eq!(
            engine.gas_profile().get(GasCategory::Storage),
            ("key".len() + "value".len()) as i64 * settings.storage_price
        );
    }
    assert_eq!(state.get(&StorageKey::new(5, b"key".to_vec()).to_vec()), Some(b"value".to_vec()));
}

#[test]
fn storage_delete_removes_the_entry() {
    let settings = ProtocolSettings::default();
    let mut state = MemoryState::new();
    let mut sb = ScriptBuilder::new();
    sb.emit_push_string("key")
        .emit_syscall("System.Storage.GetContext")
        .emit_syscall("System.Storage.Delete")
        .emit_push_string("key")
        .emit_syscall("System.Storage.GetContext")
        .emit_syscall("System.Storage.Get")
        .emit(OpCode::Ret);
    let hash = deploy(&mut state, 5, &sb, vec![ContractMethod::new("main", 0, 0)]);
    state.put(StorageKey::new(5, b"key".to_vec()).to_vec(), b"old".to_vec());

    {
        let mut engine = engine(&mut state, &settings, None);
        engine
            .call_contract(hash, "main", CallFlags::ALL, true, Vec::new())
            .unwrap();
        assert_eq!(engine.execute(), VMState::Halt);
        assert_eq!(results(&engine), vec![StackItem::Null]);
    }
    assert_eq!(state.get(&StorageKey::new(5, b"key".to_vec()).to_vec()), None);
}

#[test]
fn read_only_context_rejects_writes() {
    let settings = ProtocolSettings::default();
    let mut state = MemoryState::new();
    let mut sb = ScriptBuilder::new();
    sb.emit_push_string("value")
        .emit_push_string("key")
        .emit_syscall("System.Storage.GetReadOnlyContext")
        .emit_syscall("System.Storage.Put")
        .emit(OpCode::Ret);
    let hash = deploy(&mut state, 5, &sb, vec![void_method("main", 0, 0)]);

    {
        let mut engine = engine(&mut state, &settings, None);
        engine
            .call_contract(hash, "main", CallFlags::ALL, false, Vec::new())
            .unwrap();
        assert_eq!(engine.execute(), VMState::Fault);
    }
    assert_eq!(state.get(&StorageKey::new(5, b"key".to_vec()).to_vec()), None);
}

#[test]
fn storage_find_strips_the_prefix() {
    let settings = ProtocolSettings::default();
    let mut state = MemoryState::new();
    let options = FindOptions::KEYS_ONLY.bits() | FindOptions::REMOVE_PREFIX.bits();
    let mut sb = ScriptBuilder::new();
    sb.emit_push_int(options as i64)
        .emit_push_string("a")
        .emit_syscall("System.Storage.GetContext")
        .emit_syscall("System.Storage.Find")
        .emit(OpCode::Dup)
        .emit_syscall("System.Iterator.Next")
        .emit(OpCode::Drop)
        .emit_syscall("System.Iterator.Value")
        .emit(OpCode::Ret);
    let hash = deploy(&mut state, 5, &sb, vec![ContractMethod::new("main", 0, 0)]);
    state.put(StorageKey::new(5, b"a1".to_vec()).to_vec(), b"x".to_vec());
    state.put(StorageKey::new(5, b"b2".to_vec()).to_vec(), b"y".to_vec());

    let mut engine = engine(&mut state, &settings, None);
    engine
        .call_contract(hash, "main", CallFlags::ALL, true, Vec::new())
        .unwrap();
    assert_eq!(engine.execute(), VMState::Halt);
    assert_eq!(results(&engine), vec![StackItem::from_bytes("1")]);
}

#[test]
fn storage_needs_a_contract_frame() {
    let settings = ProtocolSettings::default();
    let mut state = MemoryState::new();
    let mut engine = engine(&mut state, &settings, None);
    let mut sb = ScriptBuilder::new();
    sb.emit_syscall("System.Storage.GetContext");
    load_entry(&mut engine, &sb, CallFlags::ALL);

    assert_eq!(engine.execute(), VMState::Fault);
    assert!(matches!(engine.fault_exception(), Some(VMError::InvalidOperation(_))));
}

fn signer_container(scopes: WitnessScope, allowed: Vec<Address>) -> TestContainer {
    TestContainer {
        hash: Hash::digest(b"transaction"),
        signers: vec![Signer {
            account: Address([7; 20]),
            scopes,
            allowed_contracts: allowed,
        }],
    }
}

fn witness_at_entry(scopes: WitnessScope) -> bool {
    let settings = ProtocolSettings::default();
    let mut state = MemoryState::new();
    let container = signer_container(scopes, Vec::new());
    let mut engine = engine(&mut state, &settings, Some(&container as &dyn ScriptContainer));
    let mut sb = ScriptBuilder::new();
    sb.emit_push_bytes(&[7; 20]).emit_syscall("System.Runtime.CheckWitness");
    load_entry(&mut engine, &sb, CallFlags::ALL);

    assert_eq!(engine.execute(), VMState::Halt);
    results(&engine) == vec![StackItem::Boolean(true)]
}

#[test]
fn entry_script_witness_scopes() {
    assert!(witness_at_entry(WitnessScope::CALLED_BY_ENTRY));
    assert!(witness_at_entry(WitnessScope::GLOBAL));
    assert!(!witness_at_entry(WitnessScope::NONE));
    assert!(!witness_at_entry(WitnessScope::CUSTOM_CONTRACTS));
}

/// Entry calls `outer`, which calls `inner`, which checks the witness of the signer.
fn witness_two_calls_deep(scopes: WitnessScope, allow_inner: bool) -> bool {
    let settings = ProtocolSettings::default();
    let mut state = MemoryState::new();
    let mut inner = ScriptBuilder::new();
    inner
        .emit_push_bytes(&[7; 20])
        .emit_syscall("System.Runtime.CheckWitness")
        .emit(OpCode::Ret);
    let inner = deploy(&mut state, 1, &inner, vec![ContractMethod::new("check", 0, 0)]);
    let mut outer = ScriptBuilder::new();
    outer
        .emit_dynamic_call(&inner, "check", CallFlags::ALL.bits(), 0)
        .emit(OpCode::Ret);
    let outer = deploy(&mut state, 2, &outer, vec![ContractMethod::new("main", 0, 0)]);

    let allowed = if allow_inner { vec![inner] } else { Vec::new() };
    let container = signer_container(scopes, allowed);
    let mut engine = engine(&mut state, &settings, Some(&container as &dyn ScriptContainer));
    let mut sb = ScriptBuilder::new();
    sb.emit_dynamic_call(&outer, "main", CallFlags::ALL.bits(), 0);
    load_entry(&mut engine, &sb, CallFlags::ALL);

    assert_eq!(engine.execute(), VMState::Halt);
    results(&engine) == vec![StackItem::Boolean(true)]
}

#[test]
fn nested_contract_witness_scopes() {
    assert!(!witness_two_calls_deep(WitnessScope::CALLED_BY_ENTRY, false));
    assert!(witness_two_calls_deep(WitnessScope::GLOBAL, false));
    assert!(witness_two_calls_deep(WitnessScope::CUSTOM_CONTRACTS, true));
    assert!(!witness_two_calls_deep(WitnessScope::CUSTOM_CONTRACTS, false));
}

#[test]
fn check_sig_without_container_is_false() {
    let settings = ProtocolSettings::default();
    let mut state = MemoryState::new();
    let mut engine = engine(&mut state, &settings, None);
    let mut sb = ScriptBuilder::new();
    sb.emit_push_bytes(&[0; 64])
        .emit_push_bytes(&[2; 32])
        .emit_syscall("System.Crypto.CheckSig");
    load_entry(&mut engine, &sb, CallFlags::ALL);

    assert_eq!(engine.execute(), VMState::Halt);
    assert_eq!(results(&engine), vec![StackItem::Boolean(false)]);
}

#[test]
fn check_multisig_with_more_signatures_than_keys_faults() {
    let settings = ProtocolSettings::default();
    let mut state = MemoryState::new();
    let mut engine = engine(&mut state, &settings, None);
    let mut sb = ScriptBuilder::new();
    sb.emit_push_bytes(&[0; 64])
        .emit_push_bytes(&[0; 64])
        .emit_push_int(2)
        .emit(OpCode::Pack)
        .emit_push_bytes(&[2; 32])
        .emit_push_int(1)
        .emit(OpCode::Pack)
        .emit_syscall("System.Crypto.CheckMultisig");
    load_entry(&mut engine, &sb, CallFlags::ALL);

    assert_eq!(engine.execute(), VMState::Fault);
    assert!(matches!(engine.fault_exception(), Some(VMError::InvalidOperation(_))));
}

/// Pushes `signatures` and `keys` the way redeem scripts do: items first, then their count.
fn multisig_call(signatures: &[Vec<u8>], keys: &[PublicKey]) -> ScriptBuilder {
    let mut sb = ScriptBuilder::new();
    for signature in signatures {
        sb.emit_push_bytes(signature);
    }
    sb.emit_push_int(signatures.len() as i64);
    for key in keys {
        sb.emit_push_bytes(&key.to_bytes());
    }
    sb.emit_push_int(keys.len() as i64)
        .emit_syscall("System.Crypto.CheckMultisig");
    sb
}

fn sorted_keys(count: usize) -> Vec<PrivateKey> {
    let mut keys: Vec<PrivateKey> = (0..count).map(|_| PrivateKey::new()).collect();
    keys.sort_by_key(|key| key.public_key().to_bytes());
    keys
}

fn run_multisig(keys: &[PrivateKey], signatures: impl Fn(&[u8]) -> Vec<Vec<u8>>) -> (VMState, Vec<StackItem>) {
    let settings = ProtocolSettings::default();
    let mut state = MemoryState::new();
    let container = signer_container(WitnessScope::NONE, Vec::new());
    let data = container.sign_data(settings.network);
    let public: Vec<PublicKey> = keys.iter().map(PrivateKey::public_key).collect();
    let mut engine = engine(&mut state, &settings, Some(&container as &dyn ScriptContainer));
    load_entry(&mut engine, &multisig_call(&signatures(&data), &public), CallFlags::ALL);
    let state = engine.execute();
    (state, results(&engine))
}

#[test]
fn check_multisig_accepts_signatures_in_key_order() {
    let keys = sorted_keys(3);
    let (state, result) = run_multisig(&keys, |data| {
        vec![keys[0].sign(data).to_vec(), keys[2].sign(data).to_vec()]
    });
    assert_eq!(state, VMState::Halt);
    assert_eq!(result, vec![StackItem::Boolean(true)]);
}

#[test]
fn check_multisig_with_malformed_signature_is_false() {
    let keys = sorted_keys(3);
    let (state, result) = run_multisig(&keys, |data| vec![keys[0].sign(data).to_vec(), vec![1, 2, 3]]);
    assert_eq!(state, VMState::Halt);
    assert_eq!(result, vec![StackItem::Boolean(false)]);
}

#[test]
fn check_multisig_without_signatures_is_false_but_charged() {
    let settings = ProtocolSettings::default();
    let mut state = MemoryState::new();
    let public: Vec<PublicKey> = sorted_keys(2).iter().map(PrivateKey::public_key).collect();
    let mut engine = engine(&mut state, &settings, None);
    load_entry(&mut engine, &multisig_call(&[], &public), CallFlags::ALL);

    assert_eq!(engine.execute(), VMState::Halt);
    assert_eq!(results(&engine), vec![StackItem::Boolean(false)]);
    assert_eq!(
        engine.gas_profile().get(GasCategory::Crypto),
        CHECK_SIG_PRICE * 2 * settings.exec_fee_factor
    );
}

#[test]
fn check_multisig_without_keys_faults() {
    let settings = ProtocolSettings::default();
    let mut state = MemoryState::new();
    let mut engine = engine(&mut state, &settings, None);
    load_entry(&mut engine, &multisig_call(&[], &[]), CallFlags::ALL);

    assert_eq!(engine.execute(), VMState::Fault);
    assert!(matches!(engine.fault_exception(), Some(VMError::InvalidOperation(_))));
    assert_eq!(engine.gas_profile().get(GasCategory::Crypto), 0);
}

#[test]
fn check_multisig_rejects_a_negative_item_count() {
    let settings = ProtocolSettings::default();
    let mut state = MemoryState::new();
    let mut engine = engine(&mut state, &settings, None);
    let mut sb = ScriptBuilder::new();
    sb.emit_push_int(0)
        .emit_push_int(-1)
        .emit_syscall("System.Crypto.CheckMultisig");
    load_entry(&mut engine, &sb, CallFlags::ALL);

    assert_eq!(engine.execute(), VMState::Fault);
    assert!(matches!(
        engine.fault_exception(),
        Some(VMError::UnhandledException(message)) if message.contains("item count -1")
    ));
}

