//! SolGate
//!
//! Operator CLI for the SOL subscription payment core: create and verify
//! payment intents, inspect subscriptions, sweep expired intents and manage
//! site settings against the local database.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use solgate_ledger::SolanaRpcClient;
use solgate_payment::{PaymentCoordinator, SettingsProvider, SqliteStore, SETTING_KEYS};

mod config;

use config::SolgateConfig;

/// SolGate - SOL payments for gated content
#[derive(Parser)]
#[command(name = "solgate")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "~/.solgate/config.toml")]
    config: PathBuf,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a payment intent for a wallet
    Create {
        /// Paying wallet (base-58)
        wallet: String,
    },

    /// Verify a transaction against a payment intent
    Verify {
        /// Payment reference
        reference: String,
        /// Transaction signature
        signature: String,
    },

    /// Show a wallet's subscription status
    Status {
        /// Wallet (base-58)
        wallet: String,
    },

    /// Show a payment intent
    Intent {
        /// Payment reference
        reference: String,
    },

    /// List a wallet's payment intents
    History {
        /// Wallet (base-58)
        wallet: String,
    },

    /// Expire intents whose window has closed
    Sweep,

    /// Sweep periodically until interrupted
    Watch {
        /// Interval override (seconds)
        #[arg(short, long)]
        interval: Option<u64>,
    },

    /// Show or change site settings
    Settings {
        #[command(subcommand)]
        action: SettingsAction,
    },

    /// Check RPC node health
    Health,

    /// Write a default configuration file
    GenConfig {
        /// Output path (defaults to --config)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Force overwrite existing file
        #[arg(short, long)]
        force: bool,
    },
}

#[derive(Subcommand)]
enum SettingsAction {
    /// Show current settings
    Show,
    /// Set a setting
    Set {
        /// One of is_paused, pause_message, price_sol, subscription_days
        key: String,
        value: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = match cli.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_writer(std::io::stderr)
        .compact()
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    let config_path = expand_path(&cli.config)?;

    match cli.command {
        Commands::GenConfig { output, force } => {
            cmd_gen_config(output.unwrap_or(config_path), force).await
        }
        Commands::Settings { action } => cmd_settings(&config_path, action).await,
        command => {
            let app = App::open(&config_path).await?;
            match command {
                Commands::Create { wallet } => print_json(&app.coordinator.create_payment(&wallet).await?),
                Commands::Verify { reference, signature } => {
                    print_json(&app.coordinator.verify_payment(&reference, &signature).await?)
                }
                Commands::Status { wallet } => {
                    print_json(&app.coordinator.subscription_status(&wallet).await?)
                }
                Commands::Intent { reference } => match app.coordinator.get_intent(&reference).await? {
                    Some(intent) => print_json(&intent),
                    None => anyhow::bail!("No payment intent with reference {}", reference),
                },
                Commands::History { wallet } => {
                    print_json(&app.coordinator.payment_history(&wallet).await?)
                }
                Commands::Sweep => {
                    let expired = app.coordinator.sweep_expired().await?;
                    print_json(&serde_json::json!({ "expired": expired }))
                }
                Commands::Watch { interval } => cmd_watch(app, interval).await,
                Commands::Health => print_json(&app.coordinator.check_health().await?),
                Commands::GenConfig { .. } | Commands::Settings { .. } => Ok(()),
            }
        }
    }
}

/// Wired services for commands that touch payments
struct App {
    config: SolgateConfig,
    coordinator: Arc<PaymentCoordinator>,
}

impl App {
    async fn open(config_path: &Path) -> Result<Self> {
        let config = load_config(config_path).await?;
        let store = open_store(&config)?;

        let ledger = SolanaRpcClient::new(
            &config.solana.rpc_url,
            config.request_timeout(),
            config.solana.commitment,
        )
        .context("Failed to create RPC client")?;

        let coordinator = PaymentCoordinator::new(
            config.coordinator(),
            store.clone(),
            store,
            Arc::new(ledger),
        )
        .context("Failed to create payment coordinator")?;

        Ok(Self {
            config,
            coordinator: Arc::new(coordinator),
        })
    }
}

async fn load_config(config_path: &Path) -> Result<SolgateConfig> {
    let mut config = SolgateConfig::load_or_create(config_path).await?;
    config.apply_env();
    config.validate()?;
    Ok(config)
}

fn open_store(config: &SolgateConfig) -> Result<Arc<SqliteStore>> {
    let store = SqliteStore::open(&config.database.path)
        .with_context(|| format!("Failed to open database {:?}", config.database.path))?;
    Ok(Arc::new(store))
}

async fn cmd_watch(app: App, interval: Option<u64>) -> Result<()> {
    let interval = interval
        .map(std::time::Duration::from_secs)
        .unwrap_or_else(|| app.config.sweep_interval());
    if interval.is_zero() {
        anyhow::bail!("interval must be positive");
    }

    info!("Sweeping expired intents every {:?}", interval);
    let task = app.coordinator.clone().spawn_sweep_task(interval);

    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");
    task.abort();
    Ok(())
}

async fn cmd_settings(config_path: &Path, action: SettingsAction) -> Result<()> {
    let config = load_config(config_path).await?;
    let store = open_store(&config)?;

    match action {
        SettingsAction::Show => print_json(&store.current().await?),
        SettingsAction::Set { key, value } => {
            if !SETTING_KEYS.contains(&key.as_str()) {
                anyhow::bail!("Unknown setting {}; expected one of {:?}", key, SETTING_KEYS);
            }
            store.put_setting(&key, &value, chrono::Utc::now()).await?;
            info!("Set {} = {}", key, value);
            print_json(&store.current().await?)
        }
    }
}

async fn cmd_gen_config(path: PathBuf, force: bool) -> Result<()> {
    if path.exists() && !force {
        anyhow::bail!(
            "Config already exists at {:?}. Use --force to overwrite.",
            path
        );
    }

    SolgateConfig::default().save(&path).await?;
    println!("Wrote default configuration to {:?}", path);
    Ok(())
}

// Helper functions

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn expand_path(path: &Path) -> Result<PathBuf> {
    let path_str = path.to_string_lossy();
    if let Some(rest) = path_str.strip_prefix("~/") {
        let home = directories::BaseDirs::new()
            .context("Failed to get home directory")?
            .home_dir()
            .to_path_buf();
        Ok(home.join(rest))
    } else {
        Ok(path.to_path_buf())
    }
}
