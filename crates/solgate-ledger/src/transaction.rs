//! Finalized transaction model
//!
//! `getTransaction` with `jsonParsed` encoding returns a loosely typed
//! document whose shape depends on the program behind each instruction.
//! It is reduced here to [`LedgerTransaction`], with instructions modelled
//! as [`ParsedInstruction`] so callers never touch raw JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{LedgerError, LedgerResult};

/// Native SOL transfer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transfer {
    /// Funding account
    pub source: String,
    /// Receiving account
    pub destination: String,
    /// Amount in lamports
    pub lamports: u64,
}

/// Top-level instruction, by kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ParsedInstruction {
    /// System program `transfer`
    SystemTransfer(Transfer),
    /// SPL memo
    Memo { text: String },
    /// Anything else
    Other {
        program_id: String,
        program: Option<String>,
    },
}

/// A transaction as read back from the ledger
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerTransaction {
    /// First signature (transaction id)
    pub signature: String,
    /// Slot the transaction landed in
    pub slot: u64,
    /// Block time, if the node reports one
    pub block_time: Option<DateTime<Utc>>,
    /// Execution error as reported by the node; `None` means success
    pub error: Option<String>,
    /// Top-level instructions in message order
    pub instructions: Vec<ParsedInstruction>,
    /// Every account key in the message
    pub account_keys: Vec<String>,
}

impl LedgerTransaction {
    /// Did execution succeed
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }

    /// All native transfers in message order
    pub fn transfers(&self) -> impl Iterator<Item = &Transfer> {
        self.instructions.iter().filter_map(|ix| match ix {
            ParsedInstruction::SystemTransfer(t) => Some(t),
            _ => None,
        })
    }

    /// First native transfer
    pub fn first_transfer(&self) -> Option<&Transfer> {
        self.transfers().next()
    }

    /// Whether `key` is one of the message's account keys
    pub fn has_account(&self, key: &str) -> bool {
        self.account_keys.iter().any(|k| k == key)
    }

    /// Memo texts in message order
    pub fn memos(&self) -> Vec<&str> {
        self.instructions
            .iter()
            .filter_map(|ix| match ix {
                ParsedInstruction::Memo { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }
}

/// Parse the `result` object of a `getTransaction` call
pub fn parse_transaction(signature: &str, result: &Value) -> LedgerResult<LedgerTransaction> {
    let message = &result["transaction"]["message"];
    if !message.is_object() {
        return Err(LedgerError::MalformedResponse(
            "transaction.message missing".into(),
        ));
    }

    let error = match &result["meta"]["err"] {
        Value::Null => None,
        err => Some(err.to_string()),
    };

    let account_keys = message["accountKeys"]
        .as_array()
        .map(|keys| keys.iter().filter_map(parse_account_key).collect())
        .unwrap_or_default();

    let instructions = message["instructions"]
        .as_array()
        .map(|ixs| ixs.iter().map(parse_instruction).collect())
        .unwrap_or_default();

    Ok(LedgerTransaction {
        signature: signature.to_string(),
        slot: result["slot"].as_u64().unwrap_or(0),
        block_time: result["blockTime"]
            .as_i64()
            .and_then(|t| DateTime::from_timestamp(t, 0)),
        error,
        instructions,
        account_keys,
    })
}

/// Legacy messages list plain strings, parsed ones list `{ pubkey, .. }`
fn parse_account_key(key: &Value) -> Option<String> {
    match key {
        Value::String(s) => Some(s.clone()),
        Value::Object(obj) => obj.get("pubkey").and_then(Value::as_str).map(str::to_string),
        _ => None,
    }
}

fn parse_instruction(ix: &Value) -> ParsedInstruction {
    let program = ix["program"].as_str();
    let program_id = ix["programId"].as_str().unwrap_or("").to_string();
    let parsed = &ix["parsed"];

    match program {
        Some("system") if parsed["type"].as_str() == Some("transfer") => {
            let info = &parsed["info"];
            match (
                info["source"].as_str(),
                info["destination"].as_str(),
                info["lamports"].as_u64(),
            ) {
                (Some(source), Some(destination), Some(lamports)) => {
                    return ParsedInstruction::SystemTransfer(Transfer {
                        source: source.to_string(),
                        destination: destination.to_string(),
                        lamports,
                    });
                }
                _ => {}
            }
        }
        Some("spl-memo") => {
            if let Some(text) = parsed.as_str() {
                return ParsedInstruction::Memo {
                    text: text.to_string(),
                };
            }
        }
        _ => {}
    }

    ParsedInstruction::Other {
        program_id,
        program: program.map(str::to_string),
    }
}
