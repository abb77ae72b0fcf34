//! Resolved settings for each subcommand.
//!
//! `run` merges three layers: command-line arguments (including their
//! `TXFLOOD_*` environment variables), then the optional YAML file, then
//! built-in defaults.

use std::{
    path::{Path, PathBuf},
    time::Duration,
};

use alloy_primitives::U256;
use anyhow::{Context, Result, bail, ensure};
use serde::Deserialize;

use crate::{
    audit::DEFAULT_MAX_GAP,
    cli::{AuditArgs, RunArgs, TargetArgs},
    dispatcher::{
        DEFAULT_MAX_CONCURRENT, DEFAULT_REPORT_INTERVAL, DEFAULT_SEED_CONCURRENCY,
        DEFAULT_TICK_INTERVAL, DispatchConfig, RetryPolicy,
    },
    funder::{FundingConfig, SettlementGate},
    tx::{TRANSFER_GAS_LIMIT, TransferParams},
};

/// 20 gwei
pub const DEFAULT_GAS_PRICE: u128 = 20_000_000_000;

/// 1 ether
pub fn default_fund_amount() -> U256 {
    U256::from(1_000_000_000_000_000_000u128)
}

/// 0.5 ether
pub fn default_min_balance() -> U256 {
    U256::from(500_000_000_000_000_000u128)
}

/// Optional YAML config for `txflood run`. Every field may be omitted.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub tps: Option<u32>,
    pub duration: Option<String>,
    #[serde(default)]
    pub endpoints: Vec<String>,
    pub accounts: Option<PathBuf>,
    #[serde(default)]
    pub funders: Vec<String>,
    /// Wei, decimal or 0x-hex
    pub fund_amount: Option<String>,
    pub min_balance: Option<String>,
    pub chain_id: Option<u64>,
    pub gas_price: Option<String>,
    pub gas_limit: Option<u64>,
    #[serde(default)]
    pub skip_funding: bool,
    pub max_concurrent: Option<usize>,
    pub tick_interval_ms: Option<u64>,
    pub seed_concurrency: Option<usize>,
    pub report_interval: Option<String>,
    pub settle_poll_ms: Option<u64>,
    pub settle_checks: Option<u32>,
    pub settle_max_wait: Option<String>,
    pub settle_fallback: Option<String>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        serde_yaml::from_str(&contents).context("failed to parse config YAML")
    }
}

/// Everything `txflood run` needs.
#[derive(Debug, Clone)]
pub struct LoadTestConfig {
    pub endpoints: Vec<String>,
    pub accounts_path: PathBuf,
    pub target_tps: u32,
    pub duration: Duration,
    pub funder_keys: Vec<String>,
    pub fund_amount: U256,
    pub min_balance: U256,
    pub chain_id: Option<u64>,
    pub gas_price: u128,
    pub gas_limit: u64,
    pub skip_funding: bool,
    pub max_concurrent: usize,
    pub tick_interval: Duration,
    pub seed_concurrency: usize,
    pub report_interval: Duration,
    pub settlement: SettlementGate,
}

impl LoadTestConfig {
    /// Reads the config file named by `args`, if any, and merges it.
    pub fn from_args(args: &RunArgs) -> Result<Self> {
        let file = match &args.config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };
        Self::resolve(args, file)
    }

    /// Merges `args` over `file` over defaults and validates the result.
    pub fn resolve(args: &RunArgs, file: FileConfig) -> Result<Self> {
        let endpoints = first_non_empty(&args.target.endpoints, file.endpoints);
        ensure!(!endpoints.is_empty(), "at least one endpoint is required (--endpoints)");

        let accounts_path = args
            .target
            .accounts
            .clone()
            .or(file.accounts)
            .context("an account file is required (--accounts)")?;

        let target_tps = args.tps.or(file.tps).context("a target rate is required (--tps)")?;
        ensure!(target_tps > 0, "--tps must be greater than zero");

        let duration = args
            .duration
            .clone()
            .or(file.duration)
            .context("a test duration is required (--duration)")?;
        let duration = parse_duration(&duration)?;
        ensure!(!duration.is_zero(), "--duration must be greater than zero");

        let fund_amount = match (args.fund_amount, file.fund_amount) {
            (Some(amount), _) => amount,
            (None, Some(amount)) => parse_wei(&amount).context("invalid fund_amount")?,
            (None, None) => default_fund_amount(),
        };
        let min_balance = match (args.min_balance, file.min_balance) {
            (Some(amount), _) => amount,
            (None, Some(amount)) => parse_wei(&amount).context("invalid min_balance")?,
            (None, None) => default_min_balance(),
        };
        let gas_price = match (args.gas_price, file.gas_price) {
            (Some(price), _) => price,
            (None, Some(price)) => {
                price.trim().parse().with_context(|| format!("invalid gas_price: {price}"))?
            }
            (None, None) => DEFAULT_GAS_PRICE,
        };

        let defaults = SettlementGate::default();
        let settlement = SettlementGate {
            poll_interval: args
                .settle_poll_ms
                .or(file.settle_poll_ms)
                .map_or(defaults.poll_interval, Duration::from_millis),
            required_consecutive: args
                .settle_checks
                .or(file.settle_checks)
                .unwrap_or(defaults.required_consecutive)
                .max(1),
            max_wait: optional_duration(args.settle_max_wait.clone().or(file.settle_max_wait))?
                .unwrap_or(defaults.max_wait),
            fallback_delay: optional_duration(
                args.settle_fallback.clone().or(file.settle_fallback),
            )?
            .unwrap_or(defaults.fallback_delay),
        };

        let tick_interval = args
            .tick_interval_ms
            .or(file.tick_interval_ms)
            .map_or(DEFAULT_TICK_INTERVAL, Duration::from_millis);
        ensure!(!tick_interval.is_zero(), "--tick-interval-ms must be greater than zero");

        let skip_funding = args.skip_funding || file.skip_funding;
        let funder_keys = first_non_empty(&args.funders, file.funders);
        if !skip_funding && funder_keys.is_empty() {
            bail!("funding is enabled but no funder keys were given (--funders or --skip-funding)");
        }

        Ok(Self {
            endpoints,
            accounts_path,
            target_tps,
            duration,
            funder_keys,
            fund_amount,
            min_balance,
            chain_id: args.chain_id.or(file.chain_id),
            gas_price,
            gas_limit: args.gas_limit.or(file.gas_limit).unwrap_or(TRANSFER_GAS_LIMIT),
            skip_funding,
            max_concurrent: args
                .max_concurrent
                .or(file.max_concurrent)
                .unwrap_or(DEFAULT_MAX_CONCURRENT)
                .max(1),
            tick_interval,
            seed_concurrency: file.seed_concurrency.unwrap_or(DEFAULT_SEED_CONCURRENCY).max(1),
            report_interval: optional_duration(file.report_interval)?
                .unwrap_or(DEFAULT_REPORT_INTERVAL),
            settlement,
        })
    }

    pub const fn transfer(&self, chain_id: u64) -> TransferParams {
        TransferParams { chain_id, gas_price: self.gas_price, gas_limit: self.gas_limit }
    }

    pub fn dispatch(&self, chain_id: u64) -> DispatchConfig {
        DispatchConfig {
            target_tps: self.target_tps,
            duration: self.duration,
            tick_interval: self.tick_interval,
            max_concurrent: self.max_concurrent,
            seed_concurrency: self.seed_concurrency,
            report_interval: self.report_interval,
            transfer: self.transfer(chain_id),
            retry: RetryPolicy::default(),
        }
    }

    pub fn funding(&self, chain_id: u64) -> FundingConfig {
        FundingConfig {
            amount: self.fund_amount,
            min_balance: self.min_balance,
            transfer: self.transfer(chain_id),
            gate: self.settlement,
        }
    }
}

/// Endpoints and account file for `audit` and `status`.
#[derive(Debug, Clone)]
pub struct TargetConfig {
    pub endpoints: Vec<String>,
    pub accounts_path: PathBuf,
}

impl TargetConfig {
    pub fn from_args(args: &TargetArgs) -> Result<Self> {
        ensure!(!args.endpoints.is_empty(), "at least one endpoint is required (--endpoints)");
        let accounts_path =
            args.accounts.clone().context("an account file is required (--accounts)")?;
        Ok(Self { endpoints: args.endpoints.clone(), accounts_path })
    }
}

#[derive(Debug, Clone)]
pub struct AuditConfig {
    pub target: TargetConfig,
    pub chain_id: Option<u64>,
    pub gas_price: u128,
    pub gas_limit: u64,
    pub max_gap: u64,
    pub dry_run: bool,
}

impl AuditConfig {
    pub fn from_args(args: &AuditArgs) -> Result<Self> {
        Ok(Self {
            target: TargetConfig::from_args(&args.target)?,
            chain_id: args.chain_id,
            gas_price: args.gas_price.unwrap_or(DEFAULT_GAS_PRICE),
            gas_limit: args.gas_limit.unwrap_or(TRANSFER_GAS_LIMIT),
            max_gap: args.max_gap.unwrap_or(DEFAULT_MAX_GAP),
            dry_run: args.dry_run,
        })
    }
}

fn first_non_empty(cli: &[String], file: Vec<String>) -> Vec<String> {
    let pick = if cli.is_empty() { file } else { cli.to_vec() };
    pick.into_iter().map(|s| s.trim().to_string()).filter(|s| !s.is_empty()).collect()
}

/// Accepts plain seconds ("30") or a humantime string ("1m 30s").
pub fn parse_duration(value: &str) -> Result<Duration> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(value).with_context(|| format!("invalid duration: {value}"))
}

fn optional_duration(value: Option<String>) -> Result<Option<Duration>> {
    value.as_deref().map(parse_duration).transpose()
}

/// Parses a wei amount, decimal or 0x-prefixed hex.
pub fn parse_wei(value: &str) -> Result<U256> {
    value.trim().parse::<U256>().with_context(|| format!("invalid wei amount: {value}"))
}
