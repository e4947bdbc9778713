//! Ledger reader abstraction

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::{LedgerError, LedgerResult};
use crate::transaction::LedgerTransaction;

/// Node health as reported by the reader
#[derive(Debug, Clone, Serialize)]
pub struct NodeHealth {
    pub healthy: bool,
    pub slot: Option<u64>,
    pub detail: Option<String>,
}

/// Read access to finalized transactions
#[async_trait]
pub trait LedgerReader: Send + Sync {
    /// Fetch a transaction by signature.
    ///
    /// `Ok(None)` means the node does not know the transaction at the
    /// reader's commitment level, either because it never landed or
    /// because it has not been finalized yet.
    async fn fetch_transaction(&self, signature: &str) -> LedgerResult<Option<LedgerTransaction>>;

    /// Report node health
    async fn health(&self) -> LedgerResult<NodeHealth> {
        Ok(NodeHealth {
            healthy: true,
            slot: None,
            detail: None,
        })
    }
}

/// In-process ledger holding a fixed set of transactions
#[derive(Default)]
pub struct MemoryLedger {
    transactions: RwLock<HashMap<String, LedgerTransaction>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a transaction visible to readers
    pub fn insert(&self, tx: LedgerTransaction) {
        if let Ok(mut txs) = self.transactions.write() {
            txs.insert(tx.signature.clone(), tx);
        }
    }

    /// Number of stored transactions
    pub fn len(&self) -> usize {
        self.transactions.read().map(|txs| txs.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl LedgerReader for MemoryLedger {
    async fn fetch_transaction(&self, signature: &str) -> LedgerResult<Option<LedgerTransaction>> {
        let txs = self
            .transactions
            .read()
            .map_err(|e| LedgerError::NetworkError(format!("ledger lock poisoned: {}", e)))?;
        Ok(txs.get(signature).cloned())
    }
}
