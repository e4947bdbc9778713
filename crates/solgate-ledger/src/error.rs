//! Ledger error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    #[error("Invalid transaction signature: {0}")]
    InvalidSignature(String),

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Malformed RPC response: {0}")]
    MalformedResponse(String),
}

pub type LedgerResult<T> = Result<T, LedgerError>;
