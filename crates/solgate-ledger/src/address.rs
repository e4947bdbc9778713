//! Base-58 account addresses
//!
//! Solana addresses are 32 raw bytes, written in base-58 with the Bitcoin
//! alphabet. Transaction signatures are 64 bytes in the same encoding.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{LedgerError, LedgerResult};
use crate::{ADDRESS_LEN, SIGNATURE_LEN};

/// A 32-byte account address
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Address {
    bytes: [u8; ADDRESS_LEN],
}

impl Address {
    /// Create from raw bytes
    pub fn from_bytes(bytes: [u8; ADDRESS_LEN]) -> Self {
        Self { bytes }
    }

    /// Try to create from a slice
    pub fn try_from_slice(slice: &[u8]) -> LedgerResult<Self> {
        if slice.len() != ADDRESS_LEN {
            return Err(LedgerError::InvalidAddress(format!(
                "expected {} bytes, got {}",
                ADDRESS_LEN,
                slice.len()
            )));
        }
        let mut bytes = [0u8; ADDRESS_LEN];
        bytes.copy_from_slice(slice);
        Ok(Self { bytes })
    }

    /// Get raw bytes
    pub fn as_bytes(&self) -> &[u8; ADDRESS_LEN] {
        &self.bytes
    }

    /// Base-58 form
    pub fn to_base58(&self) -> String {
        bs58::encode(self.bytes).into_string()
    }
}

impl FromStr for Address {
    type Err = LedgerError;

    fn from_str(s: &str) -> LedgerResult<Self> {
        // 32 bytes encode to 32..=44 base-58 characters
        if s.len() < 32 || s.len() > 44 {
            return Err(LedgerError::InvalidAddress(format!(
                "bad length {} for {:?}",
                s.len(),
                s
            )));
        }

        let decoded = bs58::decode(s)
            .into_vec()
            .map_err(|e| LedgerError::InvalidAddress(format!("{}: {}", s, e)))?;

        Self::try_from_slice(&decoded)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_base58())
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let encoded = self.to_base58();
        write!(f, "Address({}...)", &encoded[..8.min(encoded.len())])
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Check that a string is a base-58 encoded 64-byte transaction signature
pub fn validate_signature(signature: &str) -> LedgerResult<()> {
    let decoded = bs58::decode(signature)
        .into_vec()
        .map_err(|e| LedgerError::InvalidSignature(format!("{}: {}", signature, e)))?;

    if decoded.len() != SIGNATURE_LEN {
        return Err(LedgerError::InvalidSignature(format!(
            "expected {} bytes, got {}",
            SIGNATURE_LEN,
            decoded.len()
        )));
    }

    Ok(())
}
