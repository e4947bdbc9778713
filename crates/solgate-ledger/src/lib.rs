//! SolGate Ledger Access
//!
//! Read-only access to the Solana ledger for payment verification.
//!
//! The payment core never talks to an RPC node directly. It depends on the
//! [`LedgerReader`] contract, which returns a finalized transaction reduced
//! to the parts verification cares about:
//! 1. Whether execution succeeded
//! 2. The top-level instructions, as a tagged union of parsed kinds
//! 3. The account keys referenced by the message
//!
//! [`SolanaRpcClient`] implements the contract over JSON-RPC
//! (`getTransaction` with `jsonParsed` encoding).

pub mod address;
pub mod amount;
pub mod error;
pub mod reader;
pub mod rpc;
pub mod transaction;

pub use address::{validate_signature, Address};
pub use amount::{format_sol, lamports_to_sol, sol_to_lamports, LAMPORTS_PER_SOL};
pub use error::{LedgerError, LedgerResult};
pub use reader::{LedgerReader, MemoryLedger, NodeHealth};
pub use rpc::{Cluster, Commitment, SolanaRpcClient};
pub use transaction::{parse_transaction, LedgerTransaction, ParsedInstruction, Transfer};

/// Length of an account address in bytes
pub const ADDRESS_LEN: usize = 32;

/// Length of a transaction signature in bytes
pub const SIGNATURE_LEN: usize = 64;

/// Native system program
pub const SYSTEM_PROGRAM_ID: &str = "11111111111111111111111111111111";
