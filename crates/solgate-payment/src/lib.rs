//! SolGate Payment Verification
//!
//! Turns a SOL transfer into subscription time, without custody and
//! without trusting the client:
//! 1. Client asks for a payment intent; the price is locked and a random
//!    reference is issued, valid for a short window
//! 2. Client sends SOL to the treasury, adding the reference as a
//!    read-only account key
//! 3. Client submits the transaction signature
//! 4. The finalized transaction is checked against the intent
//! 5. The intent is completed and the wallet's subscription extended, once
//!
//! Storage sits behind [`PaymentStore`], the ledger behind
//! [`solgate_ledger::LedgerReader`], and settings behind
//! [`SettingsProvider`].

pub mod clock;
pub mod coordinator;
pub mod error;
pub mod intent;
pub mod reference;
pub mod settings;
pub mod store;
pub mod verifier;

#[cfg(test)]
mod testing;

pub use clock::{Clock, SystemClock};
pub use coordinator::{
    CoordinatorConfig, CreatedPayment, FailurePolicy, PaymentCoordinator, VerifiedPayment,
};
pub use error::{ErrorKind, PaymentError, PaymentResult};
pub use intent::{IntentStatus, PaymentIntent, Subscription, SubscriptionStatus};
pub use reference::{generate_reference, parse_reference};
pub use settings::{validate_setting, SettingsProvider, SiteSettings, SETTING_KEYS};
pub use store::{PaymentStore, Settlement, SqliteStore};
pub use verifier::{ExpectedPayment, TransactionVerifier, VerifiedTransfer};

/// Payment window of an intent
pub const DEFAULT_INTENT_TTL_MINUTES: i64 = 15;

/// Longest payment window (one day)
pub const MAX_INTENT_TTL_MINUTES: i64 = 24 * 60;

/// Days added per payment when unset
pub const DEFAULT_SUBSCRIPTION_DAYS: u32 = 30;

/// Longest period a single payment may add (100 years)
pub const MAX_SUBSCRIPTION_DAYS: u32 = 36_500;

/// Price per period when unset (0.5 SOL)
pub const DEFAULT_PRICE_LAMPORTS: u64 = 500_000_000;

/// Accepted amount difference (0.001 SOL)
pub const DEFAULT_AMOUNT_TOLERANCE_LAMPORTS: u64 = 1_000_000;

/// Upper bound on a single ledger read
pub const DEFAULT_LEDGER_TIMEOUT_SECS: u64 = 20;

/// Fresh references tried before giving up on a collision
pub const MAX_REFERENCE_ATTEMPTS: usize = 3;
