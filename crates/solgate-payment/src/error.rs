//! Payment error types

use solgate_ledger::LedgerError;
use thiserror::Error;

/// How a caller should react to an error
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed input, rejected before any side effect
    Input,
    /// Intent or site state forbids the request; do not retry
    State,
    /// Transaction does not satisfy the intent; retry with another transaction
    Mismatch,
    /// Ledger unreachable or transaction not finalized yet; retry with backoff
    Transient,
    /// Operator must fix the deployment
    Configuration,
    /// Storage or runtime failure
    Internal,
}

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("Invalid wallet: {0}")]
    InvalidWallet(String),

    #[error("Invalid payment reference: {0}")]
    InvalidReference(String),

    #[error("Invalid transaction signature: {0}")]
    InvalidSignature(String),

    #[error("Subscriptions are currently paused")]
    SubscriptionsPaused { message: String },

    #[error("Payment reference not found: {0}")]
    IntentNotFound(String),

    #[error("Payment already processed: {0}")]
    AlreadyProcessed(String),

    #[error("Payment reference expired: {0}")]
    IntentExpired(String),

    #[error("Payment {reference} failed: {reason}")]
    IntentFailed { reference: String, reason: String },

    #[error("Transaction not found: {0}")]
    TransactionNotFound(String),

    #[error("Transaction failed: {0}")]
    TransactionFailed(String),

    #[error("No transfer found in transaction")]
    NoTransferFound,

    #[error("Invalid recipient: expected {expected}, got {actual}")]
    InvalidRecipient { expected: String, actual: String },

    #[error("Invalid amount: expected {expected}, got {actual} lamports")]
    InvalidAmount { expected: u64, actual: u64 },

    #[error("Reference not found in transaction")]
    ReferenceNotFound,

    #[error("Ledger read timed out after {0}s")]
    LedgerTimeout(u64),

    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("Treasury wallet not configured")]
    TreasuryNotConfigured,

    #[error("Invalid treasury wallet: {0}")]
    InvalidTreasury(String),

    #[error("Invalid setting {key}: {value}")]
    InvalidSetting { key: String, value: String },

    #[error("Duplicate payment reference: {0}")]
    DuplicateReference(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl PaymentError {
    /// Classify the error
    pub fn kind(&self) -> ErrorKind {
        match self {
            PaymentError::InvalidWallet(_)
            | PaymentError::InvalidReference(_)
            | PaymentError::InvalidSignature(_) => ErrorKind::Input,

            PaymentError::SubscriptionsPaused { .. }
            | PaymentError::IntentNotFound(_)
            | PaymentError::AlreadyProcessed(_)
            | PaymentError::IntentExpired(_)
            | PaymentError::IntentFailed { .. } => ErrorKind::State,

            PaymentError::TransactionFailed(_)
            | PaymentError::NoTransferFound
            | PaymentError::InvalidRecipient { .. }
            | PaymentError::InvalidAmount { .. }
            | PaymentError::ReferenceNotFound => ErrorKind::Mismatch,

            PaymentError::TransactionNotFound(_) | PaymentError::LedgerTimeout(_) => {
                ErrorKind::Transient
            }
            PaymentError::Ledger(e) => match e {
                LedgerError::Rpc { .. }
                | LedgerError::NetworkError(_)
                | LedgerError::MalformedResponse(_) => ErrorKind::Transient,
                LedgerError::InvalidAddress(_)
                | LedgerError::InvalidSignature(_)
                | LedgerError::InvalidAmount(_) => ErrorKind::Input,
            },

            PaymentError::TreasuryNotConfigured
            | PaymentError::InvalidTreasury(_)
            | PaymentError::InvalidSetting { .. } => ErrorKind::Configuration,

            PaymentError::DuplicateReference(_)
            | PaymentError::Storage(_)
            | PaymentError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Worth retrying the same request later
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }
}

pub type PaymentResult<T> = Result<T, PaymentError>;
