//! Lamport conversion (1 SOL = 10^9 lamports)

use crate::error::{LedgerError, LedgerResult};

pub const LAMPORTS_PER_SOL: u64 = 1_000_000_000;

/// Convert SOL to lamports, rounding to the nearest lamport
pub fn sol_to_lamports(sol: f64) -> LedgerResult<u64> {
    if !sol.is_finite() || sol < 0.0 {
        return Err(LedgerError::InvalidAmount(format!("{} SOL", sol)));
    }

    let lamports = (sol * LAMPORTS_PER_SOL as f64).round();
    if lamports > u64::MAX as f64 {
        return Err(LedgerError::InvalidAmount(format!("{} SOL overflows", sol)));
    }

    Ok(lamports as u64)
}

/// Convert lamports to SOL
pub fn lamports_to_sol(lamports: u64) -> f64 {
    lamports as f64 / LAMPORTS_PER_SOL as f64
}

/// Format lamports as a SOL string
pub fn format_sol(lamports: u64) -> String {
    format!("{:.9} SOL", lamports_to_sol(lamports))
}
