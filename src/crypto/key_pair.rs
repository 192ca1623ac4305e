//! Schnorr signature key pairs on secp256k1.

use crate::types::encoding::{Decode, DecodeError, Encode, EncodeSink};
use k256::schnorr::signature::{Signer, Verifier};
use k256::schnorr::{Signature, SigningKey, VerifyingKey};
use rand_core::OsRng;
use std::fmt;

/// Size of an x-only public key.
pub const PUBLIC_KEY_SIZE: usize = 32;
/// Size of a Schnorr signature.
pub const SIGNATURE_SIZE: usize = 64;

/// Private key for signing container data.
///
/// Generated using cryptographically secure randomness from the OS.
#[derive(Clone)]
pub struct PrivateKey {
    key: SigningKey,
}

/// Public key for signature verification.
///
/// Encoded as the 32-byte x-only form, which is also the form pushed by redeem scripts.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct PublicKey {
    key: VerifyingKey,
}

impl PrivateKey {
    /// Generates a new random private key using OS-provided entropy.
    pub fn new() -> Self {
        let mut rng = OsRng;
        Self {
            key: SigningKey::random(&mut rng),
        }
    }

    /// Creates a private key from raw bytes.
    ///
    /// Returns `None` if the bytes do not represent a valid scalar for secp256k1.
    pub fn from_bytes(bytes: &[u8; 32]) -> Option<Self> {
        SigningKey::from_bytes(bytes).ok().map(|key| Self { key })
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            key: *self.key.verifying_key(),
        }
    }

    /// Signs arbitrary data, producing a 64-byte Schnorr signature.
    pub fn sign(&self, data: &[u8]) -> [u8; SIGNATURE_SIZE] {
        let signature: Signature = self.key.sign(data);
        signature.to_bytes()
    }
}

impl Default for PrivateKey {
    fn default() -> Self {
        Self::new()
    }
}

impl PublicKey {
    /// Parses an x-only key. Returns `None` for anything but a valid 32-byte point.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != PUBLIC_KEY_SIZE {
            return None;
        }
        VerifyingKey::from_bytes(bytes).ok().map(|key| Self { key })
    }

    pub fn to_bytes(&self) -> [u8; PUBLIC_KEY_SIZE] {
        self.key.to_bytes().into()
    }

    /// Verifies a Schnorr signature against the given data.
    ///
    /// Malformed signatures verify as `false`.
    pub fn verify(&self, data: &[u8], signature: &[u8]) -> bool {
        match Signature::try_from(signature) {
            Ok(signature) => self.key.verify(data, &signature).is_ok(),
            Err(_) => false,
        }
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", hex::encode(self.to_bytes()))
    }
}

impl Encode for PublicKey {
    fn encode<S: EncodeSink>(&self, out: &mut S) {
        out.write(&self.to_bytes());
    }
}

impl Decode for PublicKey {
    fn decode(input: &mut &[u8]) -> Result<Self, DecodeError> {
        let key_bytes = <[u8; PUBLIC_KEY_SIZE]>::decode(input)?;
        PublicKey::from_slice(&key_bytes).ok_or(DecodeError::InvalidValue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_verify_success() {
        let private = PrivateKey::new();
        let public = private.public_key();

        let data = "Hello World".as_bytes();
        let signature = private.sign(data);
        assert!(public.verify(data, &signature));
    }

    #[test]
    fn test_sign_verify_failure() {
        let private = PrivateKey::new();
        let public = private.public_key();
        let private_2 = PrivateKey::new();

        let data = "Hello World".as_bytes();
        let signature = private_2.sign(data);
        assert!(!public.verify(data, &signature));
    }

    #[test]
    fn test_verify_tampered_data() {
        let private = PrivateKey::new();
        let public = private.public_key();

        let signature = private.sign(b"Hello World");
        assert!(!public.verify(b"Hello World!", &signature));
    }

    #[test]
    fn malformed_signature_is_rejected() {
        let private = PrivateKey::new();
        let public = private.public_key();
        let signature = private.sign(b"data");
        assert!(!public.verify(b"data", &signature[..63]));
        assert!(!public.verify(b"data", &[0xFF; 64]));
    }

    #[test]
    fn from_bytes_with_zero_key_fails() {
        assert!(PrivateKey::from_bytes(&[0u8; 32]).is_none());
    }

    #[test]
    fn from_bytes_produces_deterministic_key() {
        let key1 = PrivateKey::from_bytes(&[7u8; 32]).unwrap();
        let key2 = PrivateKey::from_bytes(&[7u8; 32]).unwrap();
        assert_eq!(key1.public_key(), key2.public_key());
        assert_ne!(key1.public_key(), PrivateKey::from_bytes(&[8u8; 32]).unwrap().public_key());
    }

    #[test]
    fn public_key_encoding_is_x_only() {
        let public = PrivateKey::new().public_key();
        let bytes = public.to_bytes();
        assert_eq!(PublicKey::from_slice(&bytes), Some(public));
        assert_eq!(PublicKey::from_bytes(&Encode::to_bytes(&public)).unwrap(), public);
        assert!(PublicKey::from_slice(&bytes[..31]).is_none());
    }
}
