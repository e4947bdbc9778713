//! Site settings
//!
//! Settings are stored as key/value pairs and read fresh for every new
//! intent. The intent keeps its own copy of the price, so a price change
//! never affects payments already in flight.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use solgate_ledger::{lamports_to_sol, sol_to_lamports};

use crate::error::{PaymentError, PaymentResult};
use crate::{DEFAULT_PRICE_LAMPORTS, DEFAULT_SUBSCRIPTION_DAYS, MAX_SUBSCRIPTION_DAYS};

pub const KEY_IS_PAUSED: &str = "is_paused";
pub const KEY_PAUSE_MESSAGE: &str = "pause_message";
pub const KEY_PRICE_SOL: &str = "price_sol";
pub const KEY_SUBSCRIPTION_DAYS: &str = "subscription_days";

/// Known setting keys
pub const SETTING_KEYS: [&str; 4] = [
    KEY_IS_PAUSED,
    KEY_PAUSE_MESSAGE,
    KEY_PRICE_SOL,
    KEY_SUBSCRIPTION_DAYS,
];

/// Settings snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteSettings {
    /// New intents are refused while paused
    pub is_paused: bool,
    /// Shown to users while paused
    pub pause_message: String,
    /// Price of one period
    pub price_lamports: u64,
    /// Days added per payment
    pub period_days: u32,
}

impl Default for SiteSettings {
    fn default() -> Self {
        Self {
            is_paused: false,
            pause_message: String::new(),
            price_lamports: DEFAULT_PRICE_LAMPORTS,
            period_days: DEFAULT_SUBSCRIPTION_DAYS,
        }
    }
}

impl SiteSettings {
    /// Build from stored pairs; missing keys keep their defaults
    pub fn from_pairs<'a, I>(pairs: I) -> PaymentResult<Self>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut settings = Self::default();

        for (key, value) in pairs {
            match key {
                KEY_IS_PAUSED => settings.is_paused = value == "true",
                KEY_PAUSE_MESSAGE => settings.pause_message = value.to_string(),
                KEY_PRICE_SOL => settings.price_lamports = parse_price(value)?,
                KEY_SUBSCRIPTION_DAYS => settings.period_days = parse_days(value)?,
                _ => {}
            }
        }

        Ok(settings)
    }

    /// Price in SOL
    pub fn price_sol(&self) -> f64 {
        lamports_to_sol(self.price_lamports)
    }
}

/// Check a value before it is stored
pub fn validate_setting(key: &str, value: &str) -> PaymentResult<()> {
    match key {
        KEY_IS_PAUSED if value == "true" || value == "false" => Ok(()),
        KEY_PAUSE_MESSAGE => Ok(()),
        KEY_PRICE_SOL => parse_price(value).map(|_| ()),
        KEY_SUBSCRIPTION_DAYS => parse_days(value).map(|_| ()),
        _ => Err(invalid(key, value)),
    }
}

fn parse_price(value: &str) -> PaymentResult<u64> {
    let sol: f64 = value.trim().parse().map_err(|_| invalid(KEY_PRICE_SOL, value))?;
    match sol_to_lamports(sol) {
        Ok(lamports) if lamports > 0 => Ok(lamports),
        _ => Err(invalid(KEY_PRICE_SOL, value)),
    }
}

fn parse_days(value: &str) -> PaymentResult<u32> {
    match value.trim().parse::<u32>() {
        Ok(days) if (1..=MAX_SUBSCRIPTION_DAYS).contains(&days) => Ok(days),
        _ => Err(invalid(KEY_SUBSCRIPTION_DAYS, value)),
    }
}

fn invalid(key: &str, value: &str) -> PaymentError {
    PaymentError::InvalidSetting {
        key: key.to_string(),
        value: value.to_string(),
    }
}

/// Source of the current settings
#[async_trait]
pub trait SettingsProvider: Send + Sync {
    async fn current(&self) -> PaymentResult<SiteSettings>;
}
