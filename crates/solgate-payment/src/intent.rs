//! Payment intents and subscriptions

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use solgate_ledger::lamports_to_sol;

use crate::error::{PaymentError, PaymentResult};

/// Payment intent status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntentStatus {
    /// Waiting for a verified transaction
    Pending,
    /// Credited; immutable from here on
    Completed,
    /// Rejected under single-attempt semantics
    Failed,
    /// Window closed before a verified transaction arrived
    Expired,
}

impl IntentStatus {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Expired => "expired",
        }
    }

    /// Parse the stored form. Unknown values are not accepted.
    pub fn from_str_checked(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }
}

impl std::fmt::Display for IntentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A request to pay, with a locked price and a short window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentIntent {
    /// Correlation key between the intent and the on-chain transfer
    pub reference: String,
    /// Paying wallet
    pub wallet: String,
    /// Price locked at creation
    pub amount_lamports: u64,
    pub status: IntentStatus,
    /// Set only once verified
    pub tx_signature: Option<String>,
    /// Subscription expiry produced by this payment
    pub granted_until: Option<DateTime<Utc>>,
    /// Verification attempts that reached the ledger
    pub attempts: u32,
    /// Reason of the last rejected attempt
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl PaymentIntent {
    /// New pending intent. Fails if the window runs past the representable range.
    pub fn new(
        reference: String,
        wallet: String,
        amount_lamports: u64,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> PaymentResult<Self> {
        let expires_at = now.checked_add_signed(ttl).ok_or_else(|| {
            PaymentError::InvalidSetting {
                key: "intent_ttl_minutes".into(),
                value: ttl.num_minutes().to_string(),
            }
        })?;

        Ok(Self {
            reference,
            wallet,
            amount_lamports,
            status: IntentStatus::Pending,
            tx_signature: None,
            granted_until: None,
            attempts: 0,
            last_error: None,
            created_at: now,
            expires_at,
            completed_at: None,
        })
    }

    /// Window has closed at `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }

    /// Amount in SOL
    pub fn amount_sol(&self) -> f64 {
        lamports_to_sol(self.amount_lamports)
    }
}

/// Stored subscription row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub wallet: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Subscription status as reported to clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionStatus {
    pub is_active: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub days_remaining: Option<i64>,
}

impl SubscriptionStatus {
    /// Status of a (possibly absent) subscription at `now`
    pub fn at(expires_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> Self {
        let Some(expires_at) = expires_at else {
            return Self {
                is_active: false,
                expires_at: None,
                days_remaining: None,
            };
        };

        let is_active = expires_at > now;
        let days_remaining = if is_active {
            // Partial days count as a whole day
            let remaining = (expires_at - now).num_milliseconds();
            let day = Duration::days(1).num_milliseconds();
            (remaining + day - 1) / day
        } else {
            0
        };

        Self {
            is_active,
            expires_at: Some(expires_at),
            days_remaining: Some(days_remaining),
        }
    }
}
