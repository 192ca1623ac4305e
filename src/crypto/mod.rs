//! Signing keys for witness and signature checks.

pub mod key_pair;
