//! Deterministic smart-contract runtime.
//!
//! Provides a reference-counted stack virtual machine, the application layer that meters
//! it and dispatches host calls, and the primitives both share.

pub mod crypto;
pub mod smart_contract;
pub mod state;
pub mod types;
pub mod utils;
pub mod virtual_machine;
