//! Solana JSON-RPC client
//!
//! Only the handful of calls payment verification needs:
//! - `getTransaction` (jsonParsed) for reading a payment back
//! - `getHealth` / `getSlot` for readiness checks

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::error::{LedgerError, LedgerResult};
use crate::reader::{LedgerReader, NodeHealth};
use crate::transaction::{parse_transaction, LedgerTransaction};

/// Public Solana cluster
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cluster {
    Mainnet,
    Devnet,
    Testnet,
}

impl Cluster {
    /// Public RPC endpoint
    pub fn rpc_url(&self) -> &'static str {
        match self {
            Cluster::Mainnet => "https://api.mainnet-beta.solana.com",
            Cluster::Devnet => "https://api.devnet.solana.com",
            Cluster::Testnet => "https://api.testnet.solana.com",
        }
    }
}

/// Commitment level for reads.
///
/// `getTransaction` does not accept `processed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Commitment {
    Confirmed,
    Finalized,
}

impl Commitment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Commitment::Confirmed => "confirmed",
            Commitment::Finalized => "finalized",
        }
    }
}

impl Default for Commitment {
    fn default() -> Self {
        Commitment::Finalized
    }
}

/// Solana RPC client
pub struct SolanaRpcClient {
    /// HTTP client
    client: Client,
    /// RPC endpoint URL
    endpoint: String,
    /// Commitment for transaction reads
    commitment: Commitment,
}

impl SolanaRpcClient {
    /// Create a new RPC client
    pub fn new(endpoint: &str, timeout: Duration, commitment: Commitment) -> LedgerResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LedgerError::NetworkError(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: endpoint.to_string(),
            commitment,
        })
    }

    /// RPC endpoint
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Make a JSON-RPC call. A `null` result is returned as `Value::Null`.
    async fn rpc_call(&self, method: &str, params: Value) -> LedgerResult<Value> {
        let request = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params
        });

        debug!("Solana RPC call: {} -> {:?}", method, params);

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| LedgerError::NetworkError(format!("RPC request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(LedgerError::NetworkError(format!(
                "RPC node returned status: {}",
                response.status()
            )));
        }

        let result: JsonRpcResponse = response
            .json()
            .await
            .map_err(|e| LedgerError::MalformedResponse(format!("Failed to parse response: {}", e)))?;

        if let Some(error) = result.error {
            return Err(LedgerError::Rpc {
                code: error.code,
                message: error.message,
            });
        }

        Ok(result.result.unwrap_or(Value::Null))
    }

    /// Get a transaction by signature at the configured commitment
    pub async fn get_transaction(&self, signature: &str) -> LedgerResult<Option<LedgerTransaction>> {
        let result = self
            .rpc_call(
                "getTransaction",
                json!([
                    signature,
                    {
                        "encoding": "jsonParsed",
                        "commitment": self.commitment.as_str(),
                        "maxSupportedTransactionVersion": 0
                    }
                ]),
            )
            .await?;

        if result.is_null() {
            debug!("Transaction {} not found at {}", signature, self.commitment.as_str());
            return Ok(None);
        }

        parse_transaction(signature, &result).map(Some)
    }

    /// Current slot
    pub async fn get_slot(&self) -> LedgerResult<u64> {
        let result = self
            .rpc_call("getSlot", json!([{ "commitment": self.commitment.as_str() }]))
            .await?;

        result
            .as_u64()
            .ok_or_else(|| LedgerError::MalformedResponse("Invalid slot response".into()))
    }

    /// Node health. An unhealthy node answers with an RPC error rather
    /// than a result, which is reported here as `healthy: false`.
    pub async fn get_health(&self) -> LedgerResult<NodeHealth> {
        match self.rpc_call("getHealth", json!([])).await {
            Ok(result) => {
                let healthy = result.as_str() == Some("ok");
                let slot = if healthy { self.get_slot().await.ok() } else { None };
                Ok(NodeHealth {
                    healthy,
                    slot,
                    detail: None,
                })
            }
            Err(LedgerError::Rpc { code, message }) => {
                warn!("RPC node unhealthy ({}): {}", code, message);
                Ok(NodeHealth {
                    healthy: false,
                    slot: None,
                    detail: Some(message),
                })
            }
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl LedgerReader for SolanaRpcClient {
    async fn fetch_transaction(&self, signature: &str) -> LedgerResult<Option<LedgerTransaction>> {
        self.get_transaction(signature).await
    }

    async fn health(&self) -> LedgerResult<NodeHealth> {
        self.get_health().await
    }
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    result: Option<Value>,
    error: Option<JsonRpcError>,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}
