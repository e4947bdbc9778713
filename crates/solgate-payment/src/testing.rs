//! Shared test fixtures

use std::sync::Mutex;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::Barrier;

use solgate_ledger::{
    Address, LedgerReader, LedgerResult, LedgerTransaction, MemoryLedger, ParsedInstruction,
    Transfer, SIGNATURE_LEN, SYSTEM_PROGRAM_ID,
};

use crate::clock::Clock;

/// Clock that only moves when told to
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Starts at the current millisecond, matching stored precision
    pub fn new() -> Self {
        let now = DateTime::from_timestamp_millis(Utc::now().timestamp_millis()).unwrap();
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn advance(&self, by: Duration) {
        *self.now.lock().unwrap() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

/// Deterministic wallet address. `n` must be non-zero.
pub fn wallet(n: u8) -> String {
    Address::from_bytes([n; 32]).to_string()
}

/// Deterministic transaction signature
pub fn signature(n: u8) -> String {
    bs58::encode([n; SIGNATURE_LEN]).into_string()
}

/// Successful transaction paying `lamports` from `payer` to `recipient`,
/// optionally tagged with a reference account
pub fn payment_tx(
    sig: &str,
    payer: &str,
    recipient: &str,
    lamports: u64,
    reference: Option<&str>,
) -> LedgerTransaction {
    let mut account_keys = vec![payer.to_string(), recipient.to_string()];
    if let Some(reference) = reference {
        account_keys.push(reference.to_string());
    }
    account_keys.push(SYSTEM_PROGRAM_ID.to_string());

    LedgerTransaction {
        signature: sig.to_string(),
        slot: 250_000_000,
        block_time: Some(Utc::now()),
        error: None,
        instructions: vec![ParsedInstruction::SystemTransfer(Transfer {
            source: payer.to_string(),
            destination: recipient.to_string(),
            lamports,
        })],
        account_keys,
    }
}

/// Ledger whose reads wait until `parties` readers have arrived
pub struct GatedLedger {
    inner: MemoryLedger,
    gate: Barrier,
}

impl GatedLedger {
    pub fn new(parties: usize) -> Self {
        Self {
            inner: MemoryLedger::new(),
            gate: Barrier::new(parties),
        }
    }

    pub fn insert(&self, tx: LedgerTransaction) {
        self.inner.insert(tx);
    }
}

#[async_trait]
impl LedgerReader for GatedLedger {
    async fn fetch_transaction(&self, signature: &str) -> LedgerResult<Option<LedgerTransaction>> {
        self.gate.wait().await;
        self.inner.fetch_transaction(signature).await
    }
}

/// Ledger that never answers within `delay`
pub struct SlowLedger {
    pub delay: StdDuration,
}

#[async_trait]
impl LedgerReader for SlowLedger {
    async fn fetch_transaction(&self, _signature: &str) -> LedgerResult<Option<LedgerTransaction>> {
        tokio::time::sleep(self.delay).await;
        Ok(None)
    }
}
