//! NEF: the executable container a contract is deployed as.
//!
//! # Layout
//!
//! | Field    | Encoding                                         |
//! |----------|--------------------------------------------------|
//! | magic    | `u32`, [`NEF_MAGIC`]                             |
//! | compiler | 64 bytes, UTF-8 padded with zeros                |
//! | source   | string, at most [`MAX_NEF_SOURCE`] bytes         |
//! | reserved | `u8`, must be 0                                  |
//! | tokens   | vector of [`MethodToken`], at most [`MAX_NEF_TOKENS`] |
//! | reserved | `u16`, must be 0                                 |
//! | script   | byte vector, non-empty, at most `max_item_size`  |
//! | checksum | `u32`, see [`NefFile::compute_checksum`]         |

use crate::smart_contract::call_flags::CallFlags;
use crate::types::address::Address;
use crate::types::encoding::{Decode, DecodeError, Encode, EncodeSink, read_array};
use crate::types::hash::Hash;
use crate::virtual_machine::engine::limits::ExecutionEngineLimits;
use contract_runtime_derive::Error;

pub const NEF_MAGIC: u32 = 0x3346_454E;
pub const MAX_NEF_SOURCE: usize = 256;
pub const MAX_NEF_TOKENS: usize = 128;
pub const COMPILER_FIELD_SIZE: usize = 64;
/// Longest method name a token may reference.
pub const MAX_TOKEN_METHOD: usize = 32;

/// Reasons a NEF file is rejected at load time.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NefError {
    #[error("wrong magic {0:#010x}")]
    InvalidMagic(u32),
    #[error("compiler field is not UTF-8")]
    InvalidCompiler,
    #[error("compiler name is longer than 64 bytes")]
    CompilerTooLong,
    #[error("source of {0} bytes exceeds the limit")]
    SourceTooLong(usize),
    #[error("reserved bytes must be 0")]
    ReservedNotZero,
    #[error("{0} method tokens exceed the limit")]
    TooManyTokens(usize),
    #[error("invalid method token: {0}")]
    InvalidToken(&'static str),
    #[error("script can't be empty")]
    EmptyScript,
    #[error("script of {size} bytes exceeds the limit {max}")]
    ScriptTooLarge { size: usize, max: usize },
    #[error("checksum mismatch: stored {stored:#010x}, computed {computed:#010x}")]
    ChecksumMismatch { stored: u32, computed: u32 },
    #[error("trailing bytes after the checksum")]
    TrailingBytes,
    #[error("malformed nef: {0}")]
    Decode(#[from] DecodeError),
}

/// A static call target resolved by `CALLT`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MethodToken {
    pub hash: Address,
    pub method: String,
    pub parameters_count: u16,
    pub has_return_value: bool,
    pub call_flags: CallFlags,
}

impl MethodToken {
    fn validate(&self) -> Result<(), NefError> {
        if self.method.starts_with('_') {
            return Err(NefError::InvalidToken("method name starts with '_'"));
        }
        if self.method.len() > MAX_TOKEN_METHOD {
            return Err(NefError::InvalidToken("method name too long"));
        }
        Ok(())
    }
}

impl Encode for MethodToken {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        self.hash.encode(out);
        self.method.encode(out);
        self.parameters_count.encode(out);
        self.has_return_value.encode(out);
        self.call_flags.bits().encode(out);
    }
}

impl Decode for MethodToken {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        Ok(Self {
            hash: Address::decode(input)?,
            method: String::decode(input)?,
            parameters_count: u16::decode(input)?,
            has_return_value: bool::decode(input)?,
            call_flags: CallFlags::from_bits(u8::decode(input)?).ok_or(DecodeError::InvalidValue)?,
        })
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NefFile {
    pub compiler: String,
    pub source: String,
    pub tokens: Vec<MethodToken>,
    pub script: Vec<u8>,
    pub checksum: u32,
}

impl NefFile {
    /// Builds a NEF and seals it with its checksum.
    pub fn new(
        compiler: impl Into<String>,
        source: impl Into<String>,
        tokens: Vec<MethodToken>,
        script: Vec<u8>,
    ) -> Self {
        let mut nef = Self {
            compiler: compiler.into(),
            source: source.into(),
            tokens,
            script,
            checksum: 0,
        };
        nef.checksum = nef.compute_checksum();
        nef
    }

    fn encode_body<S: EncodeSink>(&self, out: &mut S) {
        NEF_MAGIC.encode(out);
        let mut compiler = [0u8; COMPILER_FIELD_SIZE];
        let name = self.compiler.as_bytes();
        let len = name.len().min(COMPILER_FIELD_SIZE);
        compiler[..len].copy_from_slice(&name[..len]);
        out.write(&compiler);
        self.source.encode(out);
        0u8.encode(out);
        self.tokens.encode(out);
        0u16.encode(out);
        self.script.encode(out);
    }

    /// First four bytes, little-endian, of SHA3-256 over every field before the checksum.
    pub fn compute_checksum(&self) -> u32 {
        let mut hasher = Hash::sha3();
        self.encode_body(&mut hasher);
        hasher.finalize().prefix_u32()
    }

    /// Parses and verifies a NEF file.
    pub fn from_bytes(data: &[u8]) -> Result<Self, NefError> {
        let mut input = data;
        let magic = u32::decode(&mut input)?;
        if magic != NEF_MAGIC {
            return Err(NefError::InvalidMagic(magic));
        }

        let compiler_field = read_array::<COMPILER_FIELD_SIZE>(&mut input)?;
        let end = compiler_field
            .iter()
            .position(|b| *b == 0)
            .unwrap_or(COMPILER_FIELD_SIZE);
        if compiler_field[end..].iter().any(|b| *b != 0) {
            return Err(NefError::InvalidCompiler);
        }
        let compiler = String::from_utf8(compiler_field[..end].to_vec())
            .map_err(|_| NefError::InvalidCompiler)?;

        let source = String::decode(&mut input)?;
        if source.len() > MAX_NEF_SOURCE {
            return Err(NefError::SourceTooLong(source.len()));
        }
        if u8::decode(&mut input)? != 0 {
            return Err(NefError::ReservedNotZero);
        }

        let count = usize::decode(&mut input)?;
        if count > MAX_NEF_TOKENS {
            return Err(NefError::TooManyTokens(count));
        }
        let mut tokens = Vec::with_capacity(count);
        for _ in 0..count {
            let token = MethodToken::decode(&mut input)?;
            token.validate()?;
            tokens.push(token);
        }

        if u16::decode(&mut input)? != 0 {
            return Err(NefError::ReservedNotZero);
        }

        let max = ExecutionEngineLimits::default().max_item_size;
        let script = Vec::<u8>::decode(&mut input)?;
        if script.is_empty() {
            return Err(NefError::EmptyScript);
        }
        if script.len() > max {
            return Err(NefError::ScriptTooLarge {
                size: script.len(),
                max,
            });
        }

        let stored = u32::decode(&mut input)?;
        if !input.is_empty() {
            return Err(NefError::TrailingBytes);
        }
        let nef = Self {
            compiler,
            source,
            tokens,
            script,
            checksum: stored,
        };
        let computed = nef.compute_checksum();
        if stored != computed {
            return Err(NefError::ChecksumMismatch { stored, computed });
        }
        Ok(nef)
    }

    /// Checks the fields the encoder does not enforce.
    pub fn validate(&self) -> Result<(), NefError> {
        if self.compiler.len() > COMPILER_FIELD_SIZE {
            return Err(NefError::CompilerTooLong);
        }
        if self.source.len() > MAX_NEF_SOURCE {
            return Err(NefError::SourceTooLong(self.source.len()));
        }
        if self.tokens.len() > MAX_NEF_TOKENS {
            return Err(NefError::TooManyTokens(self.tokens.len()));
        }
        for token in &self.tokens {
            token.validate()?;
        }
        if self.script.is_empty() {
            return Err(NefError::EmptyScript);
        }
        Ok(())
    }
}

impl Encode for NefFile {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        self.encode_body(out);
        self.checksum.encode(out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> NefFile {
        NefFile::new(
            "test-compiler 1.0",
            "https://example.invalid/src",
            vec![MethodToken {
                hash: Address([9u8; 20]),
                method: "transfer".into(),
                parameters_count: 3,
                has_return_value: true,
                call_flags: CallFlags::ALL,
            }],
            vec![0x11, 0x40],
        )
    }

    #[test]
    fn encoded_nef_loads_back() {
        let nef = sample();
        let bytes = nef.to_bytes();
        assert_eq!(&bytes[..4], &NEF_MAGIC.to_le_bytes());
        assert_eq!(NefFile::from_bytes(&bytes).unwrap(), nef);
    }

    #[test]
    fn corrupted_checksum_is_rejected() {
        let mut bytes = sample().to_bytes();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        assert!(matches!(
            NefFile::from_bytes(&bytes),
            Err(NefError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn corrupted_script_is_rejected() {
        let mut bytes = sample().to_bytes();
        let script_byte = bytes.len() - 5;
        bytes[script_byte] ^= 0x01;
        assert!(matches!(
            NefFile::from_bytes(&bytes),
            Err(NefError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut bytes = sample().to_bytes();
        bytes[0] = 0;
        assert!(matches!(NefFile::from_bytes(&bytes), Err(NefError::InvalidMagic(_))));
    }

    #[test]
    fn reserved_byte_must_be_zero() {
        let nef = sample();
        let mut bytes = nef.to_bytes();
        let reserved = 4 + COMPILER_FIELD_SIZE + nef.source.encoded_size();
        bytes[reserved] = 1;
        assert_eq!(NefFile::from_bytes(&bytes), Err(NefError::ReservedNotZero));
    }

    #[test]
    fn truncated_file_is_rejected() {
        let bytes = sample().to_bytes();
        assert!(matches!(
            NefFile::from_bytes(&bytes[..bytes.len() - 2]),
            Err(NefError::Decode(DecodeError::UnexpectedEof))
        ));
    }

    #[test]
    fn empty_script_is_rejected() {
        let nef = NefFile::new("c", "", Vec::new(), Vec::new());
        assert_eq!(NefFile::from_bytes(&nef.to_bytes()), Err(NefError::EmptyScript));
    }

    #[test]
    fn underscore_token_is_rejected() {
        let mut nef = sample();
        nef.tokens[0].method = "_deploy".into();
        nef.checksum = nef.compute_checksum();
        assert!(matches!(
            NefFile::from_bytes(&nef.to_bytes()),
            Err(NefError::InvalidToken(_))
        ));
    }
}
