//! Deployed contracts: their persisted state and the `System.Contract` interops.
//!
//! Contract states live in the snapshot under the contract-management id
//! ([`CONTRACT_MANAGEMENT_ID`]) with key `[PREFIX_CONTRACT] ++ hash`.

use crate::smart_contract::application_engine::ApplicationEngine;
use crate::smart_contract::call_flags::CallFlags;
use crate::crypto::key_pair::PublicKey;
use crate::smart_contract::crypto::{
    CHECK_SIG_PRICE, create_multisig_redeem_script, create_signature_redeem_script, public_keys,
};
use crate::smart_contract::gas::GasCategory;
use crate::smart_contract::interop::{InteropArgs, InteropDescriptor, InteropParameterType};
use crate::smart_contract::nef::NefFile;
use crate::smart_contract::settings::Hardfork;
use crate::smart_contract::storage::StorageKey;
use crate::state::State;
use crate::types::address::Address;
use crate::types::encoding::{Decode, DecodeError, Encode, EncodeSink};
use crate::virtual_machine::errors::VMError;
use crate::virtual_machine::isa::OpCode;
use crate::virtual_machine::script_builder::ScriptBuilder;
use crate::virtual_machine::stack_item::StackItem;
use contract_runtime_derive::BinaryCodec;
use num_traits::ToPrimitive;

/// Storage id owning the contract table.
pub const CONTRACT_MANAGEMENT_ID: i32 = -1;
pub const PREFIX_CONTRACT: u8 = 8;

/// Declared type of a method parameter or return value.
#[derive(Clone, Copy, Debug, Eq, PartialEq, BinaryCodec)]
pub enum ContractParameterType {
    Any = 0x00,
    Boolean = 0x10,
    Integer = 0x11,
    ByteArray = 0x12,
    String = 0x13,
    Hash160 = 0x14,
    Hash256 = 0x15,
    PublicKey = 0x16,
    Signature = 0x17,
    Array = 0x20,
    Map = 0x22,
    InteropInterface = 0x30,
    Void = 0xff,
}

#[derive(Clone, Debug, Eq, PartialEq, BinaryCodec)]
pub struct ContractMethod {
    pub name: String,
    pub parameters: Vec<ContractParameterType>,
    pub return_type: ContractParameterType,
    /// Entry point in the contract script.
    pub offset: u32,
    /// Safe methods run without write or notify permissions.
    pub safe: bool,
}

impl ContractMethod {
    pub fn new(name: impl Into<String>, parameter_count: usize, offset: u32) -> Self {
        Self {
            name: name.into(),
            parameters: vec![ContractParameterType::Any; parameter_count],
            return_type: ContractParameterType::Any,
            offset,
            safe: false,
        }
    }

    pub fn has_return_value(&self) -> bool {
        self.return_type != ContractParameterType::Void
    }
}

#[derive(Clone, Debug, Default, Eq, PartialEq, BinaryCodec)]
pub struct ContractManifest {
    pub name: String,
    pub methods: Vec<ContractMethod>,
}

impl ContractManifest {
    /// The method called `name` taking `parameter_count` arguments, or any arity when
    /// `parameter_count` is `None`.
    pub fn get_method(&self, name: &str, parameter_count: Option<usize>) -> Option<&ContractMethod> {
        self.methods.iter().find(|m| {
            m.name == name && parameter_count.is_none_or(|count| m.parameters.len() == count)
        })
    }
}

/// A deployed contract.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ContractState {
    pub id: i32,
    pub update_counter: u16,
    pub hash: Address,
    pub nef: NefFile,
    pub manifest: ContractManifest,
}

impl ContractState {
    pub fn script(&self) -> &[u8] {
        &self.nef.script
    }
}

impl Encode for ContractState {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        self.id.encode(out);
        self.update_counter.encode(out);
        self.hash.encode(out);
        self.nef.to_bytes().encode(out);
        self.manifest.encode(out);
    }
}

impl Decode for ContractState {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        let id = i32::decode(input)?;
        let update_counter = u16::decode(input)?;
        let hash = Address::decode(input)?;
        let nef_bytes = Vec::<u8>::decode(input)?;
        let nef = NefFile::from_bytes(&nef_bytes).map_err(|_| DecodeError::InvalidValue)?;
        let manifest = ContractManifest::decode(input)?;
        Ok(Self {
            id,
            update_counter,
            hash,
            nef,
            manifest,
        })
    }
}

/// Hash a contract deployed by `sender` gets, independent of later updates.
pub fn contract_hash(sender: &Address, nef_checksum: u32, name: &str) -> Address {
    let mut sb = ScriptBuilder::new();
    sb.emit(OpCode::Abort)
        .emit_push_bytes(sender.as_slice())
        .emit_push_int(nef_checksum as i64)
        .emit_push_string(name);
    Address::from_script(&sb.into_bytes())
}

fn contract_key(hash: &Address) -> Vec<u8> {
    let mut key = vec![PREFIX_CONTRACT];
    key.extend_from_slice(hash.as_slice());
    StorageKey::new(CONTRACT_MANAGEMENT_ID, key).to_vec()
}

/// Reads a contract state. A stored entry that fails to decode is an error.
pub fn get_contract(snapshot: &dyn State, hash: &Address) -> Result<Option<ContractState>, VMError> {
    match snapshot.get(&contract_key(hash)) {
        Some(bytes) => Ok(Some(ContractState::from_bytes(&bytes)?)),
        None => Ok(None),
    }
}

pub fn put_contract(snapshot: &mut dyn State, contract: &ContractState) {
    snapshot.put(contract_key(&contract.hash), contract.to_bytes());
}

pub(crate) fn descriptors() -> Vec<InteropDescriptor> {
    use InteropParameterType::*;
    vec![
        InteropDescriptor::new(
            "System.Contract.Call",
            call,
            1 << 15,
            CallFlags::READ_STATES | CallFlags::ALLOW_CALL,
            &[Hash160, String, Integer, Array],
        ),
        InteropDescriptor::new(
            "System.Contract.GetCallFlags",
            get_call_flags,
            1 << 10,
            CallFlags::NONE,
            &[],
        ),
        InteropDescriptor::new(
            "System.Contract.CreateStandardAccount",
            create_standard_account,
            0,
            CallFlags::NONE,
            &[ByteArray],
        ),
        InteropDescriptor::new(
            "System.Contract.CreateMultisigAccount",
            create_multisig_account,
            0,
            CallFlags::NONE,
            &[Integer, CountedArray],
        ),
    ]
}

fn call(engine: &mut ApplicationEngine<'_>, args: &mut InteropArgs) -> Result<Option<StackItem>, VMError> {
    let hash = args.hash160()?;
    let method = args.string()?;
    let flags = args.integer()?;
    let arguments = args.array()?;

    if method.starts_with('_') {
        return Err(VMError::ArgumentError(format!("invalid method name: {method}")));
    }
    let flags = flags
        .to_u8()
        .and_then(CallFlags::from_bits)
        .ok_or_else(|| VMError::ArgumentOutOfRange(format!("call flags {flags}")))?;
    engine.call_contract_dynamic(hash, &method, flags, arguments)?;
    Ok(None)
}

fn get_call_flags(engine: &mut ApplicationEngine<'_>, _args: &mut InteropArgs) -> Result<Option<StackItem>, VMError> {
    let flags = engine.current_state()?.call_flags;
    Ok(Some(StackItem::from_int(flags.bits())))
}

fn create_standard_account(
    engine: &mut ApplicationEngine<'_>,
    args: &mut InteropArgs,
) -> Result<Option<StackItem>, VMError> {
    let key = args.bytes()?;
    let key = PublicKey::from_slice(&key)
        .ok_or_else(|| VMError::ArgumentError("invalid public key".into()))?;
    let fee = if engine.is_hardfork_enabled(Hardfork::Aspidochelone) {
        CHECK_SIG_PRICE
    } else {
        1 << 8
    };
    engine.add_fee(GasCategory::Syscall, fee * engine.exec_fee_factor())?;
    let account = Address::from_script(&create_signature_redeem_script(&key));
    Ok(Some(StackItem::from_bytes(account.as_slice())))
}

fn create_multisig_account(
    engine: &mut ApplicationEngine<'_>,
    args: &mut InteropArgs,
) -> Result<Option<StackItem>, VMError> {
    let m = args.integer()?;
    let keys = args.array()?;
    let keys = public_keys(engine, &keys)?;
    let fee = if engine.is_hardfork_enabled(Hardfork::Aspidochelone) {
        CHECK_SIG_PRICE * keys.len() as i64
    } else {
        1 << 8
    };
    engine.add_fee(GasCategory::Syscall, fee * engine.exec_fee_factor())?;
    let m = m
        .to_usize()
        .ok_or_else(|| VMError::ArgumentOutOfRange(format!("m = {m}")))?;
    let script = create_multisig_redeem_script(m, &keys)?;
    Ok(Some(StackItem::from_bytes(Address::from_script(&script).as_slice())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::smart_contract::nef::NefFile;
    use crate::state::MemoryState;

    fn sample(hash: Address) -> ContractState {
        ContractState {
            id: 1,
            update_counter: 0,
            hash,
            nef: NefFile::new("test", "", Vec::new(), vec![0x11, 0x40]),
            manifest: ContractManifest {
                name: "sample".into(),
                methods: vec![ContractMethod::new("main", 0, 0)],
            },
        }
    }

    #[test]
    fn contract_state_persists() {
        let mut snapshot = MemoryState::new();
        let hash = contract_hash(&Address([1u8; 20]), 7, "sample");
        let contract = sample(hash);
        put_contract(&mut snapshot, &contract);

        assert_eq!(get_contract(&snapshot, &hash).unwrap(), Some(contract));
        assert_eq!(get_contract(&snapshot, &Address::zero()).unwrap(), None);
        let key = snapshot.find(&(-1i32).to_le_bytes(), Default::default());
        assert_eq!(key.len(), 1);
        assert_eq!(key[0].0[4], PREFIX_CONTRACT);
    }

    #[test]
    fn contract_hash_depends_on_sender_and_name() {
        let sender = Address([1u8; 20]);
        let a = contract_hash(&sender, 7, "sample");
        assert_eq!(a, contract_hash(&sender, 7, "sample"));
        assert_ne!(a, contract_hash(&sender, 7, "other"));
        assert_ne!(a, contract_hash(&Address([2u8; 20]), 7, "sample"));
    }

    #[test]
    fn get_method_matches_arity() {
        let manifest = ContractManifest {
            name: "m".into(),
            methods: vec![ContractMethod::new("f", 1, 0), ContractMethod::new("f", 2, 5)],
        };
        assert_eq!(manifest.get_method("f", Some(2)).map(|m| m.offset), Some(5));
        assert_eq!(manifest.get_method("f", None).map(|m| m.offset), Some(0));
        assert!(manifest.get_method("f", Some(3)).is_none());
    }
}
