//! Primitive types shared by the engine and the contract layer.
//!
//! - `Address`: 20-byte script hash identifying contracts and accounts
//! - `Bytes`: cheaply clonable immutable byte string
//! - `Hash`: 32-byte SHA3-256 digest
//! - `encoding`: deterministic binary encoding used by contract artifacts

pub mod address;
pub mod bytes;
pub mod encoding;
pub mod hash;
