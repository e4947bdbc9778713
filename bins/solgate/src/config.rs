//! Operator configuration

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use solgate_ledger::{Address, Cluster, Commitment};
use solgate_payment::{CoordinatorConfig, FailurePolicy, MAX_INTENT_TTL_MINUTES};

/// Overrides `payment.treasury`
pub const ENV_TREASURY: &str = "SOLGATE_TREASURY";
/// Overrides `solana.rpc_url`
pub const ENV_RPC_URL: &str = "SOLGATE_RPC_URL";

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SolgateConfig {
    /// Database configuration
    pub database: DatabaseConfig,
    /// Solana RPC configuration
    pub solana: SolanaConfig,
    /// Payment configuration
    pub payment: PaymentConfig,
    /// Expiry sweep configuration
    pub sweep: SweepConfig,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite file
    pub path: PathBuf,
}

/// Solana RPC configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SolanaConfig {
    /// JSON-RPC endpoint
    pub rpc_url: String,
    /// Read commitment
    pub commitment: Commitment,
    /// HTTP request timeout (seconds)
    pub request_timeout_secs: u64,
}

/// Payment configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PaymentConfig {
    /// Treasury wallet (base-58)
    pub treasury: Option<String>,
    /// Payment window (minutes)
    pub intent_ttl_minutes: i64,
    /// Accepted amount difference
    pub amount_tolerance_lamports: u64,
    /// Ledger read bound (seconds)
    pub ledger_timeout_secs: u64,
    /// `retain-pending` or `mark-failed`
    pub failure_policy: FailurePolicy,
}

/// Expiry sweep configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    /// Sweep interval (seconds)
    pub interval_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("solgate.db"),
        }
    }
}

impl Default for SolanaConfig {
    fn default() -> Self {
        Self {
            rpc_url: Cluster::Mainnet.rpc_url().to_string(),
            commitment: Commitment::Finalized,
            request_timeout_secs: 30,
        }
    }
}

impl Default for PaymentConfig {
    fn default() -> Self {
        let payment = CoordinatorConfig::default();
        Self {
            treasury: payment.treasury,
            intent_ttl_minutes: payment.intent_ttl_minutes,
            amount_tolerance_lamports: payment.amount_tolerance_lamports,
            ledger_timeout_secs: payment.ledger_timeout_secs,
            failure_policy: payment.failure_policy,
        }
    }
}

impl Default for SweepConfig {
    fn default() -> Self {
        Self { interval_secs: 60 }
    }
}

impl SolgateConfig {
    /// Load configuration from file
    pub async fn load(path: &Path) -> Result<Self> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read config file {:?}", path))?;

        toml::from_str(&contents).context("Failed to parse config file")
    }

    /// Load or create default configuration
    pub async fn load_or_create(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path).await
        } else {
            let config = Self::default();
            config.save(path).await?;
            Ok(config)
        }
    }

    /// Save configuration to file
    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let contents = toml::to_string_pretty(self)?;
        tokio::fs::write(path, contents).await?;
        Ok(())
    }

    /// Apply environment overrides
    pub fn apply_env(&mut self) {
        self.apply_overrides(
            std::env::var(ENV_TREASURY).ok(),
            std::env::var(ENV_RPC_URL).ok(),
        );
    }

    fn apply_overrides(&mut self, treasury: Option<String>, rpc_url: Option<String>) {
        if let Some(treasury) = treasury.filter(|t| !t.trim().is_empty()) {
            self.payment.treasury = Some(treasury);
        }
        if let Some(rpc_url) = rpc_url.filter(|u| !u.trim().is_empty()) {
            self.solana.rpc_url = rpc_url;
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if !self.solana.rpc_url.starts_with("http://") && !self.solana.rpc_url.starts_with("https://") {
            anyhow::bail!("rpc_url must be an http(s) URL");
        }

        if self.solana.request_timeout_secs == 0 {
            anyhow::bail!("request_timeout_secs must be positive");
        }

        if let Some(treasury) = &self.payment.treasury {
            treasury
                .parse::<Address>()
                .with_context(|| format!("treasury is not a valid address: {}", treasury))?;
        }

        if !(1..=MAX_INTENT_TTL_MINUTES).contains(&self.payment.intent_ttl_minutes) {
            anyhow::bail!(
                "intent_ttl_minutes must be between 1 and {}",
                MAX_INTENT_TTL_MINUTES
            );
        }

        if self.payment.ledger_timeout_secs == 0 {
            anyhow::bail!("ledger_timeout_secs must be positive");
        }

        if self.sweep.interval_secs == 0 {
            anyhow::bail!("sweep interval_secs must be positive");
        }

        Ok(())
    }

    /// Coordinator view of the payment section
    pub fn coordinator(&self) -> CoordinatorConfig {
        CoordinatorConfig {
            treasury: self.payment.treasury.clone(),
            intent_ttl_minutes: self.payment.intent_ttl_minutes,
            amount_tolerance_lamports: self.payment.amount_tolerance_lamports,
            ledger_timeout_secs: self.payment.ledger_timeout_secs,
            failure_policy: self.payment.failure_policy,
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.solana.request_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep.interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = SolgateConfig::default();
        config.validate().unwrap();
        assert_eq!(config.payment.intent_ttl_minutes, 15);
        assert_eq!(config.payment.failure_policy, FailurePolicy::RetainPending);
        assert_eq!(config.solana.commitment, Commitment::Finalized);
    }

    #[test]
    fn test_partial_section_keeps_defaults() {
        let config: SolgateConfig = toml::from_str(
            r#"
            [payment]
            treasury = "11111111111111111111111111111112"

            [solana]
            rpc_url = "http://127.0.0.1:8899"
            "#,
        )
        .unwrap();

        assert_eq!(config.payment.treasury.as_deref(), Some("11111111111111111111111111111112"));
        assert_eq!(config.payment.intent_ttl_minutes, 15);
        assert_eq!(config.payment.amount_tolerance_lamports, 1_000_000);
        assert_eq!(config.payment.failure_policy, FailurePolicy::RetainPending);
        assert_eq!(config.solana.rpc_url, "http://127.0.0.1:8899");
        assert_eq!(config.solana.commitment, Commitment::Finalized);
        assert_eq!(config.solana.request_timeout_secs, 30);
        config.validate().unwrap();
    }

    #[test]
    fn test_full_payment_section() {
        let config: SolgateConfig = toml::from_str(
            r#"
            [payment]
            treasury = "11111111111111111111111111111112"
            intent_ttl_minutes = 30
            amount_tolerance_lamports = 0
            ledger_timeout_secs = 5
            failure_policy = "mark-failed"
            "#,
        )
        .unwrap();

        assert_eq!(config.payment.intent_ttl_minutes, 30);
        assert_eq!(config.payment.failure_policy, FailurePolicy::MarkFailed);
        assert_eq!(config.sweep.interval_secs, 60);
        assert_eq!(config.database.path, PathBuf::from("solgate.db"));
        config.validate().unwrap();
    }

    #[test]
    fn test_env_overrides_file() {
        let mut config = SolgateConfig::default();
        config.apply_overrides(
            Some("11111111111111111111111111111112".into()),
            Some("http://127.0.0.1:8899".into()),
        );
        assert_eq!(config.payment.treasury.as_deref(), Some("11111111111111111111111111111112"));
        assert_eq!(config.solana.rpc_url, "http://127.0.0.1:8899");

        // Blank values are ignored
        config.apply_overrides(Some(" ".into()), None);
        assert!(config.payment.treasury.is_some());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = SolgateConfig::default();
        config.payment.treasury = Some("not-an-address".into());
        assert!(config.validate().is_err());

        let mut config = SolgateConfig::default();
        config.solana.rpc_url = "ftp://node".into();
        assert!(config.validate().is_err());

        let mut config = SolgateConfig::default();
        config.payment.intent_ttl_minutes = 0;
        assert!(config.validate().is_err());

        let mut config = SolgateConfig::default();
        config.payment.intent_ttl_minutes = MAX_INTENT_TTL_MINUTES;
        assert!(config.validate().is_ok());
        config.payment.intent_ttl_minutes = MAX_INTENT_TTL_MINUTES + 1;
        assert!(config.validate().is_err());
        config.payment.intent_ttl_minutes = i64::MAX;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_roundtrips_through_toml() {
        let config = SolgateConfig::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let back: SolgateConfig = toml::from_str(&text).unwrap();
        assert_eq!(back.solana.rpc_url, config.solana.rpc_url);
        assert_eq!(back.coordinator(), config.coordinator());
    }
}
