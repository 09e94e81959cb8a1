//! Canonical CBOR encoding and the content signatures derived from it.
//!
//! Two structurally equal documents must sign identically on every machine, so values pass
//! through `serde_cbor::Value` (which keeps map keys sorted) before they are written, and the
//! output always starts with the self-describe tag.

use serde::Serialize;
use serde_cbor::value::Value as CborValue;
use sha2::{Digest, Sha256};
use std::fmt;
use thiserror::Error;

/// Prefix carried by every rendered signature.
pub const SIGNATURE_PREFIX: &str = "sha256:";

#[derive(Debug, Error)]
#[error("canonical encoding failed: {0}")]
pub struct EncodeError(#[from] serde_cbor::Error);

/// Encodes `value` into its canonical byte form.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, EncodeError> {
    let sorted: CborValue = serde_cbor::value::to_value(value)?;
    let mut out = Vec::with_capacity(128);
    let mut serializer = serde_cbor::ser::Serializer::new(&mut out);
    serializer.self_describe()?;
    sorted.serialize(&mut serializer)?;
    Ok(out)
}

/// Length of the canonical encoding. Size-proportional gas is charged on this.
pub fn encoded_len<T: Serialize>(value: &T) -> Result<usize, EncodeError> {
    Ok(encode(value)?.len())
}

/// SHA-256 digest of a canonical encoding.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Signature([u8; 32]);

impl Signature {
    pub fn of<T: Serialize>(value: &T) -> Result<Self, EncodeError> {
        let digest = Sha256::digest(encode(value)?);
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&digest);
        Ok(Signature(bytes))
    }

    pub fn digest(&self) -> &[u8; 32] {
        &self.0
    }

    /// Parses a `sha256:`-prefixed hex rendering.
    pub fn parse(text: &str) -> Result<Self, SignatureParseError> {
        let hex_part = text
            .strip_prefix(SIGNATURE_PREFIX)
            .ok_or(SignatureParseError::MissingPrefix)?;
        if hex_part.len() != 64 {
            return Err(SignatureParseError::InvalidLength(hex_part.len()));
        }
        let mut bytes = [0u8; 32];
        hex::decode_to_slice(hex_part, &mut bytes)?;
        Ok(Signature(bytes))
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{SIGNATURE_PREFIX}{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Signature").field(&self.to_string()).finish()
    }
}

#[derive(Debug, Error)]
pub enum SignatureParseError {
    #[error("signature is missing the '{SIGNATURE_PREFIX}' prefix")]
    MissingPrefix,
    #[error("signature digest must be 64 hex characters, got {0}")]
    InvalidLength(usize),
    #[error("invalid hex: {0}")]
    InvalidHex(#[from] hex::FromHexError),
}
