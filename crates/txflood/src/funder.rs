//! Pre-funds the account pool from a set of funder keys, then waits for the
//! funding transfers to leave the pools before the timed phase starts.

use std::{ops::Range, sync::Arc, time::Duration};

use alloy_network::EthereumWallet;
use alloy_primitives::{Address, U256};
use anyhow::{Context, Result, ensure};
use tokio::{task::JoinSet, time::Instant};
use tracing::{debug, info, warn};

use crate::{
    accounts::{AccountPool, parse_private_key},
    client::ChainClient,
    endpoints::EndpointPool,
    error::ClientError,
    tx::{TransferParams, sign_transfer},
};

/// A funder logs its progress every this many accounts.
pub const PROGRESS_EVERY: usize = 500;

/// Splits `len` accounts into `parts` contiguous slices of `len / parts`; the
/// last slice absorbs the remainder.
pub fn partition(len: usize, parts: usize) -> Vec<Range<usize>> {
    if parts == 0 {
        return Vec::new();
    }
    let per_part = len / parts;
    (0..parts)
        .map(|i| {
            let start = i * per_part;
            let end = if i == parts - 1 { len } else { start + per_part };
            start..end
        })
        .collect()
}

#[derive(Debug, Clone)]
pub struct FundingConfig {
    /// Value of each funding transfer, in wei
    pub amount: U256,
    /// Accounts holding at least this much are skipped
    pub min_balance: U256,
    pub transfer: TransferParams,
    pub gate: SettlementGate,
}

/// Per-funder (or summed) funding counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FundingOutcome {
    pub funded: u64,
    pub skipped: u64,
    pub failed: u64,
}

impl std::ops::AddAssign for FundingOutcome {
    fn add_assign(&mut self, other: Self) {
        self.funded += other.funded;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }
}

/// Funds every account below `min_balance`, one task per funder key.
///
/// Funder `i` handles the `i`-th slice of [`partition`] through endpoint
/// `i mod endpoints`. A funder that cannot start (bad key, unreachable
/// endpoint) abandons its slice without affecting the others. Returns once the
/// settlement gate has been passed.
pub async fn fund_accounts<C: ChainClient>(
    accounts: Arc<AccountPool>,
    funder_keys: &[String],
    endpoints: &EndpointPool<C>,
    config: &FundingConfig,
) -> Result<FundingOutcome> {
    ensure!(!funder_keys.is_empty(), "funding is enabled but no funder keys were given");

    let slices = partition(accounts.len(), funder_keys.len());
    info!(
        accounts = accounts.len(),
        funders = funder_keys.len(),
        endpoints = endpoints.len(),
        amount = %config.amount,
        "Funding accounts"
    );

    let mut tasks = JoinSet::new();
    for (index, (key, slice)) in funder_keys.iter().zip(slices).enumerate() {
        let job = FundingJob {
            funder_index: index,
            funder_key: key.clone(),
            client: endpoints.for_slot(index),
            accounts: Arc::clone(&accounts),
            slice,
            config: config.clone(),
        };
        tasks.spawn(job.run());
    }

    let mut total = FundingOutcome::default();
    while let Some(result) = tasks.join_next().await {
        match result {
            Ok(outcome) => total += outcome,
            Err(e) => warn!(error = %e, "Funder task panicked"),
        }
    }

    info!(
        funded = total.funded,
        skipped = total.skipped,
        failed = total.failed,
        "Funding transactions submitted"
    );

    let settlement = config.gate.wait_for_settlement(endpoints).await;
    info!(%settlement, "Funding phase complete");
    Ok(total)
}

/// One funder key working through its slice of the pool.
struct FundingJob<C> {
    funder_index: usize,
    funder_key: String,
    client: Arc<C>,
    accounts: Arc<AccountPool>,
    slice: Range<usize>,
    config: FundingConfig,
}

impl<C: ChainClient> FundingJob<C> {
    async fn run(self) -> FundingOutcome {
        let funder = self.funder_index;
        let slice = self.slice.clone();
        match self.fund_slice().await {
            Ok(outcome) => {
                info!(
                    funder,
                    funded = outcome.funded,
                    skipped = outcome.skipped,
                    failed = outcome.failed,
                    "Funder finished"
                );
                outcome
            }
            Err(e) => {
                warn!(
                    funder,
                    start = slice.start,
                    end = slice.end,
                    error = format!("{e:#}"),
                    "Funder abandoned its accounts"
                );
                FundingOutcome::default()
            }
        }
    }

    async fn fund_slice(&self) -> Result<FundingOutcome> {
        let signer = parse_private_key(&self.funder_key)
            .with_context(|| format!("funder {}: invalid private key", self.funder_index))?;
        let funder_address = signer.address();
        let wallet = EthereumWallet::from(signer);

        let mut nonce = self
            .client
            .pending_nonce(funder_address)
            .await
            .with_context(|| format!("funder {}: failed to fetch nonce", self.funder_index))?;

        info!(
            funder = self.funder_index,
            address = %funder_address,
            endpoint = self.client.name(),
            nonce,
            accounts = self.slice.len(),
            "Funder starting"
        );

        let mut outcome = FundingOutcome::default();
        for (done, index) in self.slice.clone().enumerate() {
            let recipient = self.accounts.get(index).address;
            match self.fund_one(&wallet, funder_address, recipient, nonce).await {
                Ok(FundStep::Skipped) => outcome.skipped += 1,
                Ok(FundStep::Funded) => {
                    outcome.funded += 1;
                    nonce += 1;
                }
                Err(e) => {
                    debug!(funder = self.funder_index, account = index, error = %e, "Funding failed");
                    outcome.failed += 1;
                }
            }

            if (done + 1) % PROGRESS_EVERY == 0 {
                info!(
                    funder = self.funder_index,
                    processed = done + 1,
                    total = self.slice.len(),
                    funded = outcome.funded,
                    "Funding progress"
                );
            }
        }

        Ok(outcome)
    }

    async fn fund_one(
        &self,
        wallet: &EthereumWallet,
        funder: Address,
        recipient: Address,
        nonce: u64,
    ) -> Result<FundStep> {
        let balance = self.client.balance(recipient).await.context("balance query failed")?;
        if balance >= self.config.min_balance {
            return Ok(FundStep::Skipped);
        }

        let signed =
            sign_transfer(wallet, funder, recipient, self.config.amount, nonce, &self.config.transfer)
                .await?;
        self.client.send_raw_transaction(signed.raw_bytes).await.context("submission failed")?;
        Ok(FundStep::Funded)
    }
}

enum FundStep {
    Funded,
    Skipped,
}

pub const DEFAULT_SETTLE_POLL: Duration = Duration::from_secs(1);
pub const DEFAULT_SETTLE_CHECKS: u32 = 3;
pub const DEFAULT_SETTLE_MAX_WAIT: Duration = Duration::from_secs(120);
pub const DEFAULT_SETTLE_FALLBACK: Duration = Duration::from_secs(5);

/// How the settlement gate was passed
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display)]
pub enum Settlement {
    /// Every pool reported empty for the required number of polls
    #[display("settled")]
    Settled,
    #[display("timed out")]
    TimedOut,
    /// An endpoint does not expose pool counters
    #[display("unsupported")]
    Unsupported,
}

/// Bounded poll until every endpoint's pool drains.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SettlementGate {
    pub poll_interval: Duration,
    /// Consecutive empty polls needed to pass
    pub required_consecutive: u32,
    pub max_wait: Duration,
    /// Fixed sleep used when the pools cannot be observed
    pub fallback_delay: Duration,
}

impl Default for SettlementGate {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_SETTLE_POLL,
            required_consecutive: DEFAULT_SETTLE_CHECKS,
            max_wait: DEFAULT_SETTLE_MAX_WAIT,
            fallback_delay: DEFAULT_SETTLE_FALLBACK,
        }
    }
}

impl SettlementGate {
    /// Polls the pools, sleeping `fallback_delay` when they never settle or
    /// cannot be queried.
    pub async fn wait_for_settlement<C: ChainClient>(&self, endpoints: &EndpointPool<C>) -> Settlement {
        let settlement = self.poll(endpoints).await;
        match settlement {
            Settlement::Settled => {}
            Settlement::TimedOut => {
                warn!(
                    max_wait_secs = self.max_wait.as_secs(),
                    fallback_secs = self.fallback_delay.as_secs(),
                    "Pools did not settle, falling back to a fixed wait"
                );
                tokio::time::sleep(self.fallback_delay).await;
            }
            Settlement::Unsupported => {
                info!(
                    fallback_secs = self.fallback_delay.as_secs(),
                    "Pool status unavailable, falling back to a fixed wait"
                );
                tokio::time::sleep(self.fallback_delay).await;
            }
        }
        settlement
    }

    async fn poll<C: ChainClient>(&self, endpoints: &EndpointPool<C>) -> Settlement {
        let started = Instant::now();
        let mut streak = 0u32;

        loop {
            match pooled_total(endpoints).await {
                Ok(0) => {
                    streak += 1;
                    debug!(streak, required = self.required_consecutive, "Pools empty");
                    if streak >= self.required_consecutive {
                        return Settlement::Settled;
                    }
                }
                Ok(total) => {
                    debug!(pooled = total, "Waiting for pools to drain");
                    streak = 0;
                }
                Err(e) if e.is_unsupported() => return Settlement::Unsupported,
                Err(e) => {
                    debug!(error = %e, "Pool status query failed");
                    streak = 0;
                }
            }

            if started.elapsed() + self.poll_interval > self.max_wait {
                return Settlement::TimedOut;
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

/// Sum of `pending + queued` across every endpoint.
async fn pooled_total<C: ChainClient>(endpoints: &EndpointPool<C>) -> Result<u64, ClientError> {
    let mut total = 0;
    for client in endpoints.clients() {
        total += client.txpool_status().await?.total();
    }
    Ok(total)
}
