//! Witness checks: `System.Runtime.CheckWitness` scopes and standalone witness verification.

use crate::smart_contract::application_engine::ApplicationEngine;
use crate::smart_contract::call_flags::CallFlags;
use crate::smart_contract::container::{ScriptContainer, Witness, WitnessScope};
use crate::smart_contract::contracts::get_contract;
use crate::smart_contract::settings::{Hardfork, ProtocolSettings};
use crate::smart_contract::trigger::TriggerType;
use crate::state::{OverlayState, State};
use crate::types::address::Address;
use crate::virtual_machine::engine::VMState;
use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::script::Script;
use crate::warn;
use std::rc::Rc;

/// Whether `hash` witnessed the current execution.
///
/// The calling script always counts as a witness. Otherwise `hash` must be a signer of the
/// container whose scope covers the running script:
/// - `Global` everywhere;
/// - `CalledByEntry` in the entry script and in contracts it calls directly;
/// - `CustomContracts` inside the signer's allowed contracts.
pub fn check_witness(engine: &ApplicationEngine<'_>, hash: &Address) -> Result<bool, VMError> {
    let calling = engine.calling_script_hash()?;
    if calling.as_ref() == Some(hash) {
        return Ok(true);
    }
    let Some(container) = engine.container() else {
        return Ok(false);
    };
    let Some(signer) = container.signers().iter().find(|s| s.account == *hash) else {
        return Ok(false);
    };

    if signer.scopes.contains(WitnessScope::GLOBAL) {
        return Ok(true);
    }
    if signer.scopes.contains(WitnessScope::CALLED_BY_ENTRY) {
        let entry = engine.entry_script_hash()?;
        if calling.is_none() || calling == entry {
            return Ok(true);
        }
    }
    if signer.scopes.contains(WitnessScope::CUSTOM_CONTRACTS) {
        let current = engine.current_script_hash()?;
        if signer.allowed_contracts.contains(&current) {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Runs `witness` for `hash` under the Verification trigger.
///
/// An empty verification script defers to the `verify` method of the contract deployed at
/// `hash`; otherwise the script itself must hash to `hash`. The verification frame runs with
/// `ReadOnly` flags and the invocation frame with none. Writes go to a throwaway overlay of
/// `snapshot`. The witness holds when execution halts with exactly one truthy result.
pub fn verify_witness(
    container: &dyn ScriptContainer,
    snapshot: &dyn State,
    settings: &ProtocolSettings,
    hash: &Address,
    witness: &Witness,
    gas_limit: i64,
) -> bool {
    let mut overlay = OverlayState::new(snapshot);
    let mut engine = ApplicationEngine::create(
        TriggerType::Verification,
        Some(container),
        &mut overlay,
        None,
        settings,
        gas_limit,
    );
    if let Err(err) = load_witness(&mut engine, hash, witness) {
        warn!("witness of {hash} rejected: {err}");
        return false;
    }

    if engine.execute() != VMState::Halt {
        warn!("witness of {hash} rejected: verification faulted");
        return false;
    }
    let results = engine.result_stack();
    results.len() == 1 && results.peek(0).is_ok_and(|item| item.get_boolean().unwrap_or(false))
}

fn load_witness(engine: &mut ApplicationEngine<'_>, hash: &Address, witness: &Witness) -> Result<(), VMError> {
    let strict = engine.is_hardfork_enabled(Hardfork::Basilisk);
    if witness.verification_script.is_empty() {
        let contract = get_contract(engine.snapshot(), hash)?
            .ok_or_else(|| VMError::ContractNotFound(hash.to_string()))?;
        let method = contract
            .manifest
            .get_method("verify", None)
            .cloned()
            .ok_or_else(|| VMError::MethodNotFound {
                contract: hash.to_string(),
                method: "verify".into(),
                parameters: 0,
            })?;
        engine.load_contract(Rc::new(contract), &method, CallFlags::READ_ONLY)?;
    } else {
        if Address::from_script(&witness.verification_script) != *hash {
            return Err(VMError::InvalidOperation(
                "verification script does not match the signer".into(),
            ));
        }
        let script = Rc::new(Script::new(witness.verification_script.clone(), strict)?);
        engine.load_script_with_flags(script, -1, CallFlags::READ_ONLY)?;
    }

    if !witness.invocation_script.is_empty() {
        let script = Rc::new(Script::new(witness.invocation_script.clone(), strict)?);
        engine.load_script_with_flags(script, -1, CallFlags::NONE)?;
    }
    Ok(())
}
