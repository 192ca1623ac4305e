//! `System.Crypto` interop services and the standard account redeem scripts.
//!
//! A standard account is the hash of a redeem script that checks signatures over the
//! container's sign data:
//!
//! - single signature: `PUSHDATA1 <key> SYSCALL System.Crypto.CheckSig`
//! - multisignature: `PUSH m, PUSHDATA1 <key>.., PUSH n, SYSCALL System.Crypto.CheckMultisig`,
//!   keys sorted by their encoding

use crate::crypto::key_pair::{PUBLIC_KEY_SIZE, PublicKey};
use crate::smart_contract::application_engine::ApplicationEngine;
use crate::smart_contract::call_flags::CallFlags;
use crate::smart_contract::gas::GasCategory;
use crate::smart_contract::interop::{InteropArgs, InteropDescriptor, InteropParameterType};
use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::isa::OpCode;
use crate::virtual_machine::script_builder::{ScriptBuilder, interop_selector};
use crate::virtual_machine::stack_item::StackItem;

/// Price of one signature check, before the execution fee factor.
pub const CHECK_SIG_PRICE: i64 = 1 << 15;
/// Most keys a multisignature account may have.
pub const MAX_MULTISIG_KEYS: usize = 1024;

const CHECK_SIG: &str = "System.Crypto.CheckSig";
const CHECK_MULTISIG: &str = "System.Crypto.CheckMultisig";

pub(crate) fn descriptors() -> Vec<InteropDescriptor> {
    use InteropParameterType::*;
    vec![
        InteropDescriptor::new(CHECK_SIG, check_sig, CHECK_SIG_PRICE, CallFlags::NONE, &[ByteArray, ByteArray]),
        InteropDescriptor::new(CHECK_MULTISIG, check_multisig, 0, CallFlags::NONE, &[CountedArray, CountedArray]),
    ]
}

pub fn create_signature_redeem_script(key: &PublicKey) -> Vec<u8> {
    let mut sb = ScriptBuilder::new();
    sb.emit_push_bytes(&key.to_bytes()).emit_syscall(CHECK_SIG);
    sb.into_bytes()
}

/// Redeem script requiring `m` of `keys` to sign.
///
/// Returns [`VMError::ArgumentOutOfRange`] unless `1 <= m <= keys.len() <= 1024`.
pub fn create_multisig_redeem_script(m: usize, keys: &[PublicKey]) -> Result<Vec<u8>, VMError> {
    let n = keys.len();
    if m == 0 || m > n || n > MAX_MULTISIG_KEYS {
        return Err(VMError::ArgumentOutOfRange(format!(
            "invalid multisig parameters m = {m}, n = {n}"
        )));
    }
    let mut sorted: Vec<[u8; PUBLIC_KEY_SIZE]> = keys.iter().map(PublicKey::to_bytes).collect();
    sorted.sort();

    let mut sb = ScriptBuilder::new();
    sb.emit_push_int(m as i64);
    for key in &sorted {
        sb.emit_push_bytes(key);
    }
    sb.emit_push_int(n as i64).emit_syscall(CHECK_MULTISIG);
    Ok(sb.into_bytes())
}

pub fn is_signature_contract(script: &[u8]) -> bool {
    script.len() == 2 + PUBLIC_KEY_SIZE + 5
        && script[0] == OpCode::PushData1 as u8
        && script[1] == PUBLIC_KEY_SIZE as u8
        && script[2 + PUBLIC_KEY_SIZE] == OpCode::Syscall as u8
        && script[3 + PUBLIC_KEY_SIZE..] == interop_selector(CHECK_SIG).to_le_bytes()
}

/// Reads an integer pushed by `PUSH0..PUSH16`, `PUSHINT8` or `PUSHINT16`.
fn read_small_int(script: &[u8], pos: &mut usize) -> Option<i64> {
    let opcode = OpCode::try_from(*script.get(*pos)?).ok()?;
    let value = match opcode {
        OpCode::PushInt8 => {
            let value = *script.get(*pos + 1)? as i8 as i64;
            *pos += 2;
            return Some(value);
        }
        OpCode::PushInt16 => {
            let bytes = script.get(*pos + 1..*pos + 3)?;
            *pos += 3;
            return Some(i16::from_le_bytes([bytes[0], bytes[1]]) as i64);
        }
        op if (OpCode::Push0 as u8..=OpCode::Push16 as u8).contains(&(op as u8)) => {
            op as i64 - OpCode::Push0 as i64
        }
        _ => return None,
    };
    *pos += 1;
    Some(value)
}

/// Parses a multisignature redeem script, returning `(m, n)`.
pub fn parse_multisig_contract(script: &[u8]) -> Option<(usize, usize)> {
    let mut pos = 0;
    let m = read_small_int(script, &mut pos)?;
    let mut keys = 0usize;
    while script.get(pos) == Some(&(OpCode::PushData1 as u8)) {
        if script.get(pos + 1) != Some(&(PUBLIC_KEY_SIZE as u8)) {
            return None;
        }
        pos += 2 + PUBLIC_KEY_SIZE;
        keys += 1;
    }
    let n = read_small_int(script, &mut pos)?;
    if m < 1 || n as usize != keys || m > n || keys > MAX_MULTISIG_KEYS {
        return None;
    }
    if script.get(pos) != Some(&(OpCode::Syscall as u8)) {
        return None;
    }
    let selector = script.get(pos + 1..pos + 5)?;
    if selector != interop_selector(CHECK_MULTISIG).to_le_bytes() || pos + 5 != script.len() {
        return None;
    }
    Some((m as usize, keys))
}

pub fn is_multisig_contract(script: &[u8]) -> bool {
    parse_multisig_contract(script).is_some()
}

/// Whether `m` of `signatures` were made by distinct `keys` over `data`, in key order.
///
/// Each signature is matched against the keys after the previous match; the scan stops as
/// soon as the remaining keys cannot cover the remaining signatures.
pub fn verify_multisig(data: &[u8], keys: &[Option<PublicKey>], signatures: &[Vec<u8>]) -> bool {
    let (m, n) = (signatures.len(), keys.len());
    if m == 0 || m > n {
        return false;
    }
    let (mut i, mut j) = (0, 0);
    while i < m && j < n {
        if keys[j].is_some_and(|key| key.verify(data, &signatures[i])) {
            i += 1;
        }
        j += 1;
        if m - i > n - j {
            return false;
        }
    }
    i == m
}

fn check_sig(engine: &mut ApplicationEngine<'_>, args: &mut InteropArgs) -> Result<Option<StackItem>, VMError> {
    let key = args.bytes()?;
    let signature = args.bytes()?;
    let Some(container) = engine.container() else {
        return Ok(Some(StackItem::Boolean(false)));
    };
    let data = container.sign_data(engine.settings().network);
    let valid = PublicKey::from_slice(&key).is_some_and(|key| key.verify(&data, &signature));
    Ok(Some(StackItem::Boolean(valid)))
}

fn byte_items(engine: &ApplicationEngine<'_>, items: &[StackItem]) -> Result<Vec<Vec<u8>>, VMError> {
    let heap = engine.heap();
    items
        .iter()
        .map(|item| {
            item.get_bytes(&heap)
                .map(|bytes| bytes.to_vec())
                .map_err(|err| VMError::ArgumentError(err.to_string()))
        })
        .collect()
}

fn check_multisig(engine: &mut ApplicationEngine<'_>, args: &mut InteropArgs) -> Result<Option<StackItem>, VMError> {
    let keys = args.array()?;
    let signatures = args.array()?;
    let keys = byte_items(engine, &keys)?;
    let signatures = byte_items(engine, &signatures)?;
    let (m, n) = (signatures.len(), keys.len());
    if n == 0 {
        return Err(VMError::InvalidOperation("multisig needs at least one key".into()));
    }
    if m > n {
        return Err(VMError::InvalidOperation(format!(
            "multisig with {m} signatures for {n} keys"
        )));
    }
    engine.add_fee(
        GasCategory::Crypto,
        CHECK_SIG_PRICE * n as i64 * engine.exec_fee_factor(),
    )?;
    if m == 0 {
        return Ok(Some(StackItem::Boolean(false)));
    }
    let Some(container) = engine.container() else {
        return Ok(Some(StackItem::Boolean(false)));
    };
    let data = container.sign_data(engine.settings().network);
    let keys: Vec<Option<PublicKey>> = keys.iter().map(|key| PublicKey::from_slice(key)).collect();
    Ok(Some(StackItem::Boolean(verify_multisig(&data, &keys, &signatures))))
}

/// Parses the keys of `System.Contract.CreateMultisigAccount`.
pub(crate) fn public_keys(engine: &ApplicationEngine<'_>, items: &[StackItem]) -> Result<Vec<PublicKey>, VMError> {
    byte_items(engine, items)?
        .iter()
        .map(|bytes| {
            PublicKey::from_slice(bytes)
                .ok_or_else(|| VMError::ArgumentError("invalid public key".into()))
        })
        .collect()
}
