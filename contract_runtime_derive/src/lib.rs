//! Derive macros for the contract runtime crate.
//!
//! Provides:
//! - `#[derive(BinaryCodec)]` - binary encoding for contract artifacts (NEF files, method tokens,
//!   contract states)
//! - `#[derive(Error)]` - `Display`, `Error` and `From` boilerplate for the runtime's error enums

mod binary_codec;
mod error;

use proc_macro::TokenStream;

/// Implements `Encode` and `Decode` from `crate::types::encoding` field by field.
#[proc_macro_derive(BinaryCodec)]
pub fn derive_binary_codec(input: TokenStream) -> TokenStream {
    binary_codec::derive_binary_codec(input)
}

/// Implements `Display` and `Error` for error enums, plus `From` for `#[from]` fields.
#[proc_macro_derive(Error, attributes(error, from))]
pub fn derive_error(input: TokenStream) -> TokenStream {
    error::derive_error(input)
}
