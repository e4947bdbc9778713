//! Payment coordinator
//!
//! Drives an intent through its lifecycle:
//! `pending -> (verifying) -> completed | failed | expired`.
//!
//! The coordinator holds no per-intent state of its own. Every decision that
//! must be exclusive (completing an intent, extending a subscription) is
//! made by the store, so any number of coordinators, in any number of
//! processes, can serve the same database.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use solgate_ledger::{format_sol, validate_signature, Address, LedgerReader, NodeHealth};

use crate::clock::{Clock, SystemClock};
use crate::error::{ErrorKind, PaymentError, PaymentResult};
use crate::intent::{IntentStatus, PaymentIntent, SubscriptionStatus};
use crate::reference::{generate_reference, parse_reference};
use crate::settings::SettingsProvider;
use crate::store::{PaymentStore, Settlement};
use crate::verifier::{ExpectedPayment, TransactionVerifier};
use crate::{
    DEFAULT_AMOUNT_TOLERANCE_LAMPORTS, DEFAULT_INTENT_TTL_MINUTES, DEFAULT_LEDGER_TIMEOUT_SECS,
    MAX_INTENT_TTL_MINUTES, MAX_REFERENCE_ATTEMPTS,
};

/// What happens to an intent when a submitted transaction does not match it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Count the attempt and keep the intent open until it expires
    #[default]
    RetainPending,
    /// Fail the intent on the first mismatch
    MarkFailed,
}

/// Coordinator configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Treasury wallet receiving payments
    pub treasury: Option<String>,
    /// Payment window of a new intent
    pub intent_ttl_minutes: i64,
    /// Accepted amount difference
    pub amount_tolerance_lamports: u64,
    /// Upper bound on a single ledger read
    pub ledger_timeout_secs: u64,
    pub failure_policy: FailurePolicy,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            treasury: None,
            intent_ttl_minutes: DEFAULT_INTENT_TTL_MINUTES,
            amount_tolerance_lamports: DEFAULT_AMOUNT_TOLERANCE_LAMPORTS,
            ledger_timeout_secs: DEFAULT_LEDGER_TIMEOUT_SECS,
            failure_policy: FailurePolicy::default(),
        }
    }
}

/// A new payment intent, as returned to the client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedPayment {
    pub reference: String,
    pub wallet: String,
    /// Price in SOL
    pub amount: f64,
    pub lamports: u64,
    /// Treasury to pay, if one is configured
    pub recipient: Option<String>,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Outcome of a successful verification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifiedPayment {
    pub success: bool,
    pub tx_signature: String,
    pub new_expiry: DateTime<Utc>,
}

/// Payment coordinator service
pub struct PaymentCoordinator {
    config: CoordinatorConfig,
    /// Canonical treasury address
    treasury: Option<String>,
    store: Arc<dyn PaymentStore>,
    settings: Arc<dyn SettingsProvider>,
    ledger: Arc<dyn LedgerReader>,
    verifier: TransactionVerifier,
    clock: Arc<dyn Clock>,
}

impl PaymentCoordinator {
    /// Create a coordinator. A treasury that is set but malformed is an error.
    pub fn new(
        config: CoordinatorConfig,
        store: Arc<dyn PaymentStore>,
        settings: Arc<dyn SettingsProvider>,
        ledger: Arc<dyn LedgerReader>,
    ) -> PaymentResult<Self> {
        let treasury = match config.treasury.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(raw) => {
                let address: Address = raw
                    .parse()
                    .map_err(|_| PaymentError::InvalidTreasury(raw.to_string()))?;
                Some(address.to_string())
            }
        };

        if !(1..=MAX_INTENT_TTL_MINUTES).contains(&config.intent_ttl_minutes) {
            return Err(PaymentError::InvalidSetting {
                key: "intent_ttl_minutes".into(),
                value: config.intent_ttl_minutes.to_string(),
            });
        }

        if treasury.is_none() {
            warn!("No treasury wallet configured; payments cannot be verified");
        }

        let verifier = TransactionVerifier::new(ledger.clone(), config.amount_tolerance_lamports);

        Ok(Self {
            config,
            treasury,
            store,
            settings,
            ledger,
            verifier,
            clock: Arc::new(SystemClock),
        })
    }

    /// Replace the time source
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Check ledger node health
    pub async fn check_health(&self) -> PaymentResult<NodeHealth> {
        Ok(self.ledger.health().await?)
    }

    /// Create a payment intent for `wallet` at the current price
    pub async fn create_payment(&self, wallet: &str) -> PaymentResult<CreatedPayment> {
        let wallet = parse_wallet(wallet)?;

        let settings = self.settings.current().await?;
        if settings.is_paused {
            return Err(PaymentError::SubscriptionsPaused {
                message: settings.pause_message,
            });
        }

        let now = self.clock.now();
        let ttl = Duration::minutes(self.config.intent_ttl_minutes);

        let mut attempt = 0;
        let intent = loop {
            attempt += 1;
            let intent = PaymentIntent::new(
                generate_reference().to_string(),
                wallet.clone(),
                settings.price_lamports,
                now,
                ttl,
            )?;

            match self.store.insert_intent(&intent).await {
                Ok(()) => break intent,
                Err(PaymentError::DuplicateReference(reference)) if attempt < MAX_REFERENCE_ATTEMPTS => {
                    warn!("Reference collision on {}, drawing another", reference);
                }
                Err(e) => return Err(e),
            }
        };

        info!(
            "Created payment intent {} for {} ({}, expires {})",
            intent.reference,
            intent.wallet,
            format_sol(intent.amount_lamports),
            intent.expires_at
        );

        Ok(CreatedPayment {
            amount: intent.amount_sol(),
            lamports: intent.amount_lamports,
            recipient: self.treasury.clone(),
            created_at: intent.created_at,
            expires_at: intent.expires_at,
            reference: intent.reference,
            wallet: intent.wallet,
        })
    }

    /// Verify `tx_signature` against the intent behind `reference` and, if it
    /// pays it, extend the wallet's subscription
    pub async fn verify_payment(
        &self,
        reference: &str,
        tx_signature: &str,
    ) -> PaymentResult<VerifiedPayment> {
        parse_reference(reference)?;
        validate_signature(tx_signature)
            .map_err(|_| PaymentError::InvalidSignature(tx_signature.to_string()))?;

        let intent = self
            .store
            .get_intent(reference)
            .await?
            .ok_or_else(|| PaymentError::IntentNotFound(reference.to_string()))?;

        match intent.status {
            IntentStatus::Pending => {}
            IntentStatus::Completed => {
                return Err(PaymentError::AlreadyProcessed(reference.to_string()))
            }
            IntentStatus::Expired => return Err(PaymentError::IntentExpired(reference.to_string())),
            IntentStatus::Failed => {
                return Err(PaymentError::IntentFailed {
                    reference: reference.to_string(),
                    reason: intent.last_error.unwrap_or_default(),
                })
            }
        }

        // The window is checked once, before the ledger read. A payment found
        // during that read is still credited even if the window closed meanwhile.
        if intent.is_expired_at(self.clock.now()) {
            if self.store.mark_expired(reference).await? {
                info!("Payment intent {} expired before verification", reference);
            }
            return Err(PaymentError::IntentExpired(reference.to_string()));
        }

        let treasury = self
            .treasury
            .as_deref()
            .ok_or(PaymentError::TreasuryNotConfigured)?;

        let expected = ExpectedPayment {
            reference: &intent.reference,
            lamports: intent.amount_lamports,
            recipient: treasury,
        };

        let timeout = StdDuration::from_secs(self.config.ledger_timeout_secs);
        let outcome = match tokio::time::timeout(timeout, self.verifier.verify(tx_signature, &expected)).await {
            Ok(result) => result,
            Err(_) => Err(PaymentError::LedgerTimeout(self.config.ledger_timeout_secs)),
        };

        let transfer = match outcome {
            Ok(transfer) => transfer,
            Err(e) => {
                self.reject(&intent, tx_signature, &e).await;
                return Err(e);
            }
        };

        let settings = self.settings.current().await?;
        let settlement = self
            .store
            .settle(reference, tx_signature, settings.period_days, self.clock.now())
            .await?;

        match settlement {
            Settlement::Credited { new_expiry } => info!(
                "Payment {} credited {} from {} to {}; subscription until {}",
                reference,
                format_sol(transfer.lamports),
                transfer.source,
                intent.wallet,
                new_expiry
            ),
            Settlement::Replayed { .. } => {
                debug!("Payment {} already settled by a concurrent request", reference)
            }
        }

        Ok(VerifiedPayment {
            success: true,
            tx_signature: tx_signature.to_string(),
            new_expiry: settlement.new_expiry(),
        })
    }

    /// Apply the failure policy to a rejected transaction
    async fn reject(&self, intent: &PaymentIntent, tx_signature: &str, error: &PaymentError) {
        if error.kind() != ErrorKind::Mismatch {
            debug!(
                "Verification of {} for {} inconclusive: {}",
                tx_signature, intent.reference, error
            );
            return;
        }

        info!(
            "Transaction {} rejected for {}: {}",
            tx_signature, intent.reference, error
        );

        let reason = error.to_string();
        let recorded = match self.config.failure_policy {
            FailurePolicy::RetainPending => self.store.record_attempt(&intent.reference, &reason).await,
            FailurePolicy::MarkFailed => self.store.mark_failed(&intent.reference, &reason).await,
        };

        if let Err(e) = recorded {
            warn!("Could not record rejection of {}: {}", intent.reference, e);
        }
    }

    /// Subscription status of `wallet` right now
    pub async fn subscription_status(&self, wallet: &str) -> PaymentResult<SubscriptionStatus> {
        let wallet = parse_wallet(wallet)?;
        let subscription = self.store.subscription(&wallet).await?;
        Ok(SubscriptionStatus::at(
            subscription.map(|s| s.expires_at),
            self.clock.now(),
        ))
    }

    /// Look up an intent
    pub async fn get_intent(&self, reference: &str) -> PaymentResult<Option<PaymentIntent>> {
        parse_reference(reference)?;
        self.store.get_intent(reference).await
    }

    /// All intents of `wallet`, newest first
    pub async fn payment_history(&self, wallet: &str) -> PaymentResult<Vec<PaymentIntent>> {
        let wallet = parse_wallet(wallet)?;
        self.store.intents_for_wallet(&wallet).await
    }

    /// Mark every intent whose window has closed as expired
    pub async fn sweep_expired(&self) -> PaymentResult<usize> {
        self.store.expire_stale(self.clock.now()).await
    }

    /// Start background sweep task
    pub fn spawn_sweep_task(self: Arc<Self>, interval: StdDuration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);

            loop {
                ticker.tick().await;
                match self.sweep_expired().await {
                    Ok(0) => {}
                    Ok(count) => info!("Sweep expired {} payment intents", count),
                    Err(e) => warn!("Sweep failed: {}", e),
                }
            }
        })
    }
}

/// Canonical form of a client supplied wallet
fn parse_wallet(wallet: &str) -> PaymentResult<String> {
    wallet
        .trim()
        .parse::<Address>()
        .map(|address| address.to_string())
        .map_err(|_| PaymentError::InvalidWallet(wallet.to_string()))
}
