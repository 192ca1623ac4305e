//! What an execution verifies and runs on behalf of: the script container, its signers
//! and the block being persisted.

use crate::types::address::Address;
use crate::types::hash::Hash;
use contract_runtime_derive::BinaryCodec;
use std::ops::BitOr;

/// Where a signer's witness is valid.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, BinaryCodec)]
pub struct WitnessScope(u8);

impl WitnessScope {
    /// Only valid for verifying the container itself.
    pub const NONE: WitnessScope = WitnessScope(0);
    /// Valid for the entry script and contracts it calls directly.
    pub const CALLED_BY_ENTRY: WitnessScope = WitnessScope(0x01);
    /// Valid inside the signer's allowed contracts.
    pub const CUSTOM_CONTRACTS: WitnessScope = WitnessScope(0x10);
    /// Valid everywhere.
    pub const GLOBAL: WitnessScope = WitnessScope(0x80);

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn contains(self, other: WitnessScope) -> bool {
        self.0 & other.0 == other.0 && other.0 != 0
    }
}

impl BitOr for WitnessScope {
    type Output = WitnessScope;

    fn bitor(self, rhs: WitnessScope) -> WitnessScope {
        WitnessScope(self.0 | rhs.0)
    }
}

/// An account that signed the container, with the scope of its witness.
#[derive(Clone, Debug, Eq, PartialEq, BinaryCodec)]
pub struct Signer {
    pub account: Address,
    pub scopes: WitnessScope,
    pub allowed_contracts: Vec<Address>,
}

impl Signer {
    pub fn new(account: Address, scopes: WitnessScope) -> Self {
        Self {
            account,
            scopes,
            allowed_contracts: Vec::new(),
        }
    }
}

/// Invocation and verification scripts proving a signer's consent.
#[derive(Clone, Debug, Default, Eq, PartialEq, BinaryCodec)]
pub struct Witness {
    /// Pushes the signatures.
    pub invocation_script: Vec<u8>,
    /// Checks them. Its hash is the signer's account.
    pub verification_script: Vec<u8>,
}

/// Height and time of the block an execution belongs to.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, BinaryCodec)]
pub struct BlockInfo {
    pub index: u32,
    /// Milliseconds since the Unix epoch.
    pub timestamp: u64,
}

/// The verifiable object an execution runs for, usually a transaction.
pub trait ScriptContainer {
    fn hash(&self) -> Hash;

    fn signers(&self) -> &[Signer];

    /// The bytes signatures are made over: network magic (LE) followed by the hash.
    fn sign_data(&self, network: u32) -> Vec<u8> {
        let mut data = Vec::with_capacity(4 + 32);
        data.extend_from_slice(&network.to_le_bytes());
        data.extend_from_slice(self.hash().as_slice());
        data
    }
}

/// Container with a fixed hash and signer list.
#[derive(Clone, Debug, Default)]
pub struct TestContainer {
    pub hash: Hash,
    pub signers: Vec<Signer>,
}

impl ScriptContainer for TestContainer {
    fn hash(&self) -> Hash {
        self.hash
    }

    fn signers(&self) -> &[Signer] {
        &self.signers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sign_data_prefixes_network() {
        let container = TestContainer {
            hash: Hash::digest(b"tx"),
            signers: Vec::new(),
        };
        let data = container.sign_data(0x0102_0304);
        assert_eq!(&data[..4], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(&data[4..], Hash::digest(b"tx").as_slice());
    }

    #[test]
    fn none_scope_contains_nothing() {
        let scopes = WitnessScope::CALLED_BY_ENTRY | WitnessScope::CUSTOM_CONTRACTS;
        assert!(scopes.contains(WitnessScope::CALLED_BY_ENTRY));
        assert!(!scopes.contains(WitnessScope::GLOBAL));
        assert!(!WitnessScope::GLOBAL.contains(WitnessScope::NONE));
    }
}
