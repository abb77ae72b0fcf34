use std::path::PathBuf;

use alloy_primitives::U256;
use clap::{Args, Parser, Subcommand};
use tracing::Level;

/// Output format of the log subscriber
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("Unknown log format: {s}. Use 'text' or 'json'")),
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "txflood", author, version)]
#[command(
    about = "Transaction load generator - funds a pool of accounts and floods JSON-RPC endpoints with signed transfers at a target rate"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Log level (overridden by RUST_LOG when set)
    #[arg(long, global = true, env = "TXFLOOD_LOG_LEVEL", default_value_t = Level::INFO)]
    pub log_level: Level,

    /// Log format (text|json)
    #[arg(long, global = true, env = "TXFLOOD_LOG_FORMAT", default_value = "text")]
    pub log_format: LogFormat,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fund the account pool, then run the timed load phase
    Run(RunArgs),
    /// Scan the account pool for nonce gaps and fill them
    Audit(AuditArgs),
    /// Show balance and nonces of every account
    Status(StatusArgs),
}

/// Endpoints and account file, shared by every subcommand.
#[derive(Debug, Clone, Default, Args)]
pub struct TargetArgs {
    /// Comma-separated list of JSON-RPC endpoint URLs
    #[arg(long, env = "TXFLOOD_ENDPOINTS", value_delimiter = ',')]
    pub endpoints: Vec<String>,

    /// Path to the JSON account file
    #[arg(long, env = "TXFLOOD_ACCOUNTS")]
    pub accounts: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Args)]
pub struct RunArgs {
    /// YAML file providing values for options not given on the command line
    #[arg(long, env = "TXFLOOD_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub target: TargetArgs,

    // ========== Load ==========
    /// Target transactions per second
    #[arg(long, env = "TXFLOOD_TPS")]
    pub tps: Option<u32>,

    /// Length of the timed phase (e.g. "60s", "5m", or plain seconds)
    #[arg(long, env = "TXFLOOD_DURATION")]
    pub duration: Option<String>,

    /// Maximum in-flight submissions across all workers
    #[arg(long, env = "TXFLOOD_MAX_CONCURRENT")]
    pub max_concurrent: Option<usize>,

    /// Dispatch tick interval in milliseconds
    #[arg(long, env = "TXFLOOD_TICK_INTERVAL_MS")]
    pub tick_interval_ms: Option<u64>,

    // ========== Transactions ==========
    /// Chain id; fetched from the first reachable endpoint when absent
    #[arg(long, env = "TXFLOOD_CHAIN_ID")]
    pub chain_id: Option<u64>,

    /// Legacy gas price in wei
    #[arg(long, env = "TXFLOOD_GAS_PRICE")]
    pub gas_price: Option<u128>,

    /// Gas limit of every transfer
    #[arg(long, env = "TXFLOOD_GAS_LIMIT")]
    pub gas_limit: Option<u64>,

    // ========== Funding ==========
    /// Comma-separated funder private keys (hex, with or without 0x prefix)
    #[arg(long, env = "TXFLOOD_FUNDERS", value_delimiter = ',', hide_env_values = true)]
    pub funders: Vec<String>,

    /// Amount sent to each under-funded account (in wei)
    #[arg(long, env = "TXFLOOD_FUND_AMOUNT")]
    pub fund_amount: Option<U256>,

    /// Accounts holding at least this balance are not funded (in wei)
    #[arg(long, env = "TXFLOOD_MIN_BALANCE")]
    pub min_balance: Option<U256>,

    /// Skip the funding phase
    #[arg(long, env = "TXFLOOD_SKIP_FUNDING")]
    pub skip_funding: bool,

    // ========== Settlement gate ==========
    /// Interval between pool status polls in milliseconds
    #[arg(long, env = "TXFLOOD_SETTLE_POLL_MS")]
    pub settle_poll_ms: Option<u64>,

    /// Consecutive empty polls required before the load phase starts
    #[arg(long, env = "TXFLOOD_SETTLE_CHECKS")]
    pub settle_checks: Option<u32>,

    /// Upper bound on the settlement wait (e.g. "2m")
    #[arg(long, env = "TXFLOOD_SETTLE_MAX_WAIT")]
    pub settle_max_wait: Option<String>,

    /// Fixed wait used when pool status is unavailable (e.g. "5s")
    #[arg(long, env = "TXFLOOD_SETTLE_FALLBACK")]
    pub settle_fallback: Option<String>,
}

#[derive(Debug, Clone, Default, Args)]
pub struct AuditArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Chain id; fetched from the first endpoint when absent
    #[arg(long, env = "TXFLOOD_CHAIN_ID")]
    pub chain_id: Option<u64>,

    /// Legacy gas price in wei
    #[arg(long, env = "TXFLOOD_GAS_PRICE")]
    pub gas_price: Option<u128>,

    /// Gas limit of every filler transaction
    #[arg(long, env = "TXFLOOD_GAS_LIMIT")]
    pub gas_limit: Option<u64>,

    /// Gaps larger than this are reported but not filled
    #[arg(long, env = "TXFLOOD_MAX_GAP")]
    pub max_gap: Option<u64>,

    /// Only report gaps, send nothing
    #[arg(long, env = "TXFLOOD_DRY_RUN")]
    pub dry_run: bool,
}

#[derive(Debug, Clone, Default, Args)]
pub struct StatusArgs {
    #[command(flatten)]
    pub target: TargetArgs,
}
