//! Payment references
//!
//! A reference is 32 random bytes in address form. The client adds it to the
//! transfer instruction as a read-only, non-signing account, which binds the
//! on-chain transfer to exactly one payment intent.

use rand::rngs::OsRng;
use rand::RngCore;

use solgate_ledger::{Address, ADDRESS_LEN};

use crate::error::{PaymentError, PaymentResult};

/// Generate a fresh reference from the OS random source
pub fn generate_reference() -> Address {
    let mut bytes = [0u8; ADDRESS_LEN];
    OsRng.fill_bytes(&mut bytes);
    Address::from_bytes(bytes)
}

/// Parse a reference submitted by a client
pub fn parse_reference(reference: &str) -> PaymentResult<Address> {
    reference
        .parse()
        .map_err(|_| PaymentError::InvalidReference(reference.to_string()))
}
