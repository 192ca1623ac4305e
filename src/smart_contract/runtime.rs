//! `System.Runtime` interop services.

use crate::crypto::key_pair::PublicKey;
use crate::info;
use crate::smart_contract::application_engine::ApplicationEngine;
use crate::smart_contract::binary_serializer;
use crate::smart_contract::call_flags::CallFlags;
use crate::smart_contract::crypto::create_signature_redeem_script;
use crate::smart_contract::events::{
    EventValue, LogEvent, MAX_EVENT_NAME, MAX_LOG_MESSAGE, MAX_NOTIFICATION_SIZE, Notification,
};
use crate::smart_contract::gas::GasCategory;
use crate::smart_contract::interop::{InteropArgs, InteropDescriptor, InteropParameterType};
use crate::smart_contract::witness::check_witness;
use crate::types::address::Address;
use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::stack_item::StackItem;
use num_traits::{Signed, ToPrimitive};

pub(crate) fn descriptors() -> Vec<InteropDescriptor> {
    use InteropParameterType::*;
    vec![
        InteropDescriptor::new("System.Runtime.GetTrigger", get_trigger, 1 << 3, CallFlags::NONE, &[]),
        InteropDescriptor::new("System.Runtime.GetNetwork", get_network, 1 << 3, CallFlags::NONE, &[]),
        InteropDescriptor::new("System.Runtime.GetTime", get_time, 1 << 3, CallFlags::NONE, &[]),
        InteropDescriptor::new("System.Runtime.GasLeft", gas_left, 1 << 4, CallFlags::NONE, &[]),
        InteropDescriptor::new(
            "System.Runtime.GetExecutingScriptHash",
            get_executing_script_hash,
            1 << 4,
            CallFlags::NONE,
            &[],
        ),
        InteropDescriptor::new(
            "System.Runtime.GetCallingScriptHash",
            get_calling_script_hash,
            1 << 4,
            CallFlags::NONE,
            &[],
        ),
        InteropDescriptor::new(
            "System.Runtime.GetEntryScriptHash",
            get_entry_script_hash,
            1 << 4,
            CallFlags::NONE,
            &[],
        ),
        InteropDescriptor::new(
            "System.Runtime.GetInvocationCounter",
            get_invocation_counter,
            1 << 4,
            CallFlags::NONE,
            &[],
        ),
        InteropDescriptor::new(
            "System.Runtime.CheckWitness",
            check_witness_interop,
            1 << 10,
            CallFlags::NONE,
            &[ByteArray],
        ),
        InteropDescriptor::new("System.Runtime.Log", log, 1 << 15, CallFlags::ALLOW_NOTIFY, &[ByteArray]),
        InteropDescriptor::new(
            "System.Runtime.Notify",
            notify,
            1 << 15,
            CallFlags::ALLOW_NOTIFY,
            &[ByteArray, Array],
        ),
        InteropDescriptor::new("System.Runtime.BurnGas", burn_gas, 1 << 4, CallFlags::NONE, &[Integer]),
    ]
}

fn hash_item(hash: Address) -> StackItem {
    StackItem::from_bytes(hash.as_slice())
}

fn get_trigger(engine: &mut ApplicationEngine<'_>, _args: &mut InteropArgs) -> Result<Option<StackItem>, VMError> {
    Ok(Some(StackItem::from_int(engine.trigger() as u8)))
}

fn get_network(engine: &mut ApplicationEngine<'_>, _args: &mut InteropArgs) -> Result<Option<StackItem>, VMError> {
    Ok(Some(StackItem::from_int(engine.settings().network)))
}

fn get_time(engine: &mut ApplicationEngine<'_>, _args: &mut InteropArgs) -> Result<Option<StackItem>, VMError> {
    let block = engine
        .persisting_block()
        .ok_or_else(|| VMError::InvalidOperation("no persisting block".into()))?;
    Ok(Some(StackItem::from_int(block.timestamp)))
}

fn gas_left(engine: &mut ApplicationEngine<'_>, _args: &mut InteropArgs) -> Result<Option<StackItem>, VMError> {
    Ok(Some(StackItem::from_int(engine.gas_left())))
}

fn get_executing_script_hash(
    engine: &mut ApplicationEngine<'_>,
    _args: &mut InteropArgs,
) -> Result<Option<StackItem>, VMError> {
    Ok(Some(hash_item(engine.current_script_hash()?)))
}

fn get_calling_script_hash(
    engine: &mut ApplicationEngine<'_>,
    _args: &mut InteropArgs,
) -> Result<Option<StackItem>, VMError> {
    Ok(Some(
        engine
            .calling_script_hash()?
            .map_or(StackItem::Null, hash_item),
    ))
}

fn get_entry_script_hash(
    engine: &mut ApplicationEngine<'_>,
    _args: &mut InteropArgs,
) -> Result<Option<StackItem>, VMError> {
    Ok(Some(
        engine
            .entry_script_hash()?
            .map_or(StackItem::Null, hash_item),
    ))
}

/// A script that was never called through a contract call counts as invoked once.
fn get_invocation_counter(
    engine: &mut ApplicationEngine<'_>,
    _args: &mut InteropArgs,
) -> Result<Option<StackItem>, VMError> {
    let hash = engine.current_script_hash()?;
    let count = match engine.invocation_count(&hash) {
        Some(count) => count,
        None => {
            engine.set_invocation_count(hash, 1);
            1
        }
    };
    Ok(Some(StackItem::from_int(count)))
}

/// Accepts a 20-byte script hash or a 32-byte public key, which stands for its standard
/// signature account.
fn check_witness_interop(
    engine: &mut ApplicationEngine<'_>,
    args: &mut InteropArgs,
) -> Result<Option<StackItem>, VMError> {
    let bytes = args.bytes()?;
    let hash = match bytes.len() {
        20 => Address::from_slice(&bytes),
        32 => PublicKey::from_slice(&bytes)
            .map(|key| Address::from_script(&create_signature_redeem_script(&key))),
        _ => None,
    }
    .ok_or_else(|| VMError::ArgumentError(format!("invalid witness target of {} bytes", bytes.len())))?;
    Ok(Some(StackItem::Boolean(check_witness(engine, &hash)?)))
}

fn log(engine: &mut ApplicationEngine<'_>, args: &mut InteropArgs) -> Result<Option<StackItem>, VMError> {
    let bytes = args.bytes()?;
    if bytes.len() > MAX_LOG_MESSAGE {
        return Err(VMError::ArgumentError(format!(
            "log message of {} bytes exceeds {MAX_LOG_MESSAGE}",
            bytes.len()
        )));
    }
    let message = String::from_utf8(bytes.to_vec())
        .map_err(|_| VMError::ArgumentError("log message is not UTF-8".into()))?;
    let script_hash = engine.current_script_hash()?;
    info!("[{script_hash}] {message}");
    engine.push_log(LogEvent {
        script_hash,
        message,
    });
    Ok(None)
}

fn notify(engine: &mut ApplicationEngine<'_>, args: &mut InteropArgs) -> Result<Option<StackItem>, VMError> {
    let name = args.bytes()?;
    let (state, _) = args.array_with_item()?;
    if name.len() > MAX_EVENT_NAME {
        return Err(VMError::ArgumentError(format!(
            "event name of {} bytes exceeds {MAX_EVENT_NAME}",
            name.len()
        )));
    }
    let event_name = String::from_utf8(name.to_vec())
        .map_err(|_| VMError::ArgumentError("event name is not UTF-8".into()))?;

    let state = {
        let heap = engine.heap();
        binary_serializer::serialize_with_limits(
            &state,
            &heap,
            MAX_NOTIFICATION_SIZE,
            engine.limits().max_stack_size,
        )?;
        EventValue::capture(&state, &heap)?
    };
    let script_hash = engine.current_script_hash()?;
    engine.push_notification(Notification {
        script_hash,
        event_name,
        state,
    })?;
    Ok(None)
}

fn burn_gas(engine: &mut ApplicationEngine<'_>, args: &mut InteropArgs) -> Result<Option<StackItem>, VMError> {
    let datoshi = args.integer()?;
    if !datoshi.is_positive() {
        return Err(VMError::ArgumentOutOfRange(format!(
            "gas to burn must be positive, got {datoshi}"
        )));
    }
    let datoshi = datoshi
        .to_i64()
        .ok_or_else(|| VMError::ArgumentOutOfRange(format!("gas to burn {datoshi} is too large")))?;
    engine.add_fee(GasCategory::Syscall, datoshi)?;
    Ok(None)
}
