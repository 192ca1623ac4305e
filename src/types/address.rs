//! 20-byte script hashes identifying contracts and accounts.

use crate::types::hash::Hash;
use contract_runtime_derive::BinaryCodec;
use std::fmt;

pub const ADDRESS_SIZE: usize = 20;

/// Script hash: the last 20 bytes of SHA3-256 over a script.
///
/// A contract is addressed by the hash of its deployed script, and an account by the
/// hash of its verification (redeem) script.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Ord, PartialOrd, BinaryCodec)]
pub struct Address(pub [u8; ADDRESS_SIZE]);

impl Address {
    pub fn zero() -> Self {
        Address([0u8; ADDRESS_SIZE])
    }

    pub fn from_script(script: &[u8]) -> Self {
        let full = Hash::digest(script);
        let mut addr = [0u8; ADDRESS_SIZE];
        addr.copy_from_slice(&full.0[HASH_LEN_OFFSET..]);
        Address(addr)
    }

    /// Returns `None` unless `bytes` is exactly 20 bytes long.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let arr: [u8; ADDRESS_SIZE] = bytes.try_into().ok()?;
        Some(Address(arr))
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }
}

const HASH_LEN_OFFSET: usize = crate::types::hash::HASH_LEN - ADDRESS_SIZE;

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{}", hex::encode(self.0))
    }
}
