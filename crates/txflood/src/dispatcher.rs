//! Timed phase: seeds nonces, then pushes a fixed number of transfers per
//! tick through a bounded set of concurrent workers.

use std::{fmt, sync::Arc, time::Duration};

use alloy_primitives::{Bytes, U256};
use futures_util::stream::{self, StreamExt};
use rand::Rng;
use tokio::{
    sync::{OwnedSemaphorePermit, Semaphore},
    time::{Instant, MissedTickBehavior},
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, info, warn};

use crate::{
    accounts::AccountPool,
    client::ChainClient,
    endpoints::EndpointPool,
    error::ClientError,
    nonce::NonceTracker,
    stats::{RunReport, StatsAggregator, run_stats_reporter},
    tx::{TransferParams, sign_transfer},
};

pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(100);
pub const DEFAULT_MAX_CONCURRENT: usize = 1000;
pub const DEFAULT_SEED_CONCURRENCY: usize = 100;
pub const DEFAULT_REPORT_INTERVAL: Duration = Duration::from_secs(10);

/// Value sent by every load transfer, in wei.
const TRANSFER_VALUE: u64 = 1;

/// Lifecycle of a timed run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Init,
    Seeding,
    Running,
    Draining,
    Done,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Init => write!(f, "Init"),
            Self::Seeding => write!(f, "Seeding"),
            Self::Running => write!(f, "Running"),
            Self::Draining => write!(f, "Draining"),
            Self::Done => write!(f, "Done"),
        }
    }
}

/// How submissions are retried after transient failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Backoff before attempt `n + 1` is `backoff_step * n`
    pub backoff_step: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3, backoff_step: Duration::from_millis(50) }
    }
}

impl RetryPolicy {
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.backoff_step * attempt
    }
}

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub target_tps: u32,
    pub duration: Duration,
    pub tick_interval: Duration,
    /// Ceiling on simultaneously in-flight submissions
    pub max_concurrent: usize,
    /// Ceiling on simultaneous nonce queries while seeding
    pub seed_concurrency: usize,
    pub report_interval: Duration,
    pub transfer: TransferParams,
    pub retry: RetryPolicy,
}

impl DispatchConfig {
    pub fn new(target_tps: u32, duration: Duration, transfer: TransferParams) -> Self {
        Self {
            target_tps,
            duration,
            tick_interval: DEFAULT_TICK_INTERVAL,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            seed_concurrency: DEFAULT_SEED_CONCURRENCY,
            report_interval: DEFAULT_REPORT_INTERVAL,
            transfer,
            retry: RetryPolicy::default(),
        }
    }

    /// Transfers issued per tick: `target_tps * tick_ms / 1000`, at least one.
    pub fn batch_size(&self) -> usize {
        let tick_ms = self.tick_interval.as_millis();
        let per_tick = u128::from(self.target_tps) * tick_ms / 1000;
        usize::try_from(per_tick).unwrap_or(usize::MAX).max(1)
    }
}

/// Drives the timed load phase.
pub struct Dispatcher<C> {
    accounts: Arc<AccountPool>,
    endpoints: Arc<EndpointPool<C>>,
    config: DispatchConfig,
    nonces: Arc<NonceTracker>,
    stats: Arc<StatsAggregator>,
    permits: Arc<Semaphore>,
    phase: Phase,
}

impl<C: ChainClient> Dispatcher<C> {
    pub fn new(
        accounts: Arc<AccountPool>,
        endpoints: Arc<EndpointPool<C>>,
        config: DispatchConfig,
    ) -> Self {
        let nonces = Arc::new(NonceTracker::new(accounts.len()));
        let permits = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
        Self {
            accounts,
            endpoints,
            config,
            nonces,
            stats: Arc::new(StatsAggregator::new()),
            permits,
            phase: Phase::Init,
        }
    }

    pub const fn phase(&self) -> Phase {
        self.phase
    }

    /// Submissions currently holding a concurrency permit.
    pub fn in_flight(&self) -> usize {
        self.config.max_concurrent.max(1) - self.permits.available_permits()
    }

    fn enter(&mut self, phase: Phase) {
        debug!(from = %self.phase, to = %phase, "Dispatcher phase change");
        self.phase = phase;
    }

    /// Runs every phase and returns the final report.
    pub async fn run(mut self) -> RunReport {
        self.enter(Phase::Seeding);
        self.seed_nonces().await;

        self.enter(Phase::Running);
        let tracker = TaskTracker::new();
        let started = Instant::now();
        let reporter_shutdown = CancellationToken::new();
        let reporter = tokio::spawn(run_stats_reporter(
            Arc::clone(&self.stats),
            started,
            self.config.report_interval,
            reporter_shutdown.clone(),
        ));

        let batches = self.dispatch_until_deadline(&tracker, started).await;

        self.enter(Phase::Draining);
        info!(in_flight = self.in_flight(), "Waiting for remaining transactions to complete");
        tracker.close();
        tracker.wait().await;
        reporter_shutdown.cancel();
        if let Err(e) = reporter.await {
            warn!(error = %e, "Stats reporter panicked");
        }

        self.enter(Phase::Done);
        RunReport {
            stats: self.stats.snapshot(),
            elapsed: started.elapsed(),
            target_tps: self.config.target_tps,
            batches,
        }
    }

    /// Seeds every account's nonce from its pending transaction count.
    async fn seed_nonces(&self) {
        let total = self.accounts.len();
        info!(accounts = total, concurrency = self.config.seed_concurrency, "Fetching nonces");

        let failures: usize = stream::iter(0..total)
            .map(|index| {
                let client = self.endpoints.select();
                let address = self.accounts.get(index).address;
                async move { (index, client.pending_nonce(address).await) }
            })
            .buffer_unordered(self.config.seed_concurrency.max(1))
            .map(|(index, result)| match result {
                Ok(nonce) => {
                    self.nonces.seed(index, nonce);
                    0
                }
                Err(e) => {
                    warn!(account = index, error = %e, "Failed to fetch nonce, starting at 0");
                    self.nonces.seed(index, 0);
                    1
                }
            })
            .fold(0, |acc, failed| async move { acc + failed })
            .await;

        info!(accounts = total, failures, "All accounts prepared with nonces");
    }

    /// The tick loop. Returns the number of batches issued.
    async fn dispatch_until_deadline(&self, tracker: &TaskTracker, started: Instant) -> u64 {
        if self.accounts.is_empty() {
            warn!("Account pool is empty, nothing to send");
            return 0;
        }

        let deadline = started + self.config.duration;
        let batch_size = self.config.batch_size();
        info!(
            batch_size,
            interval_ms = self.config.tick_interval.as_millis() as u64,
            target_tps = self.config.target_tps,
            max_concurrent = self.config.max_concurrent,
            "Starting transaction sending"
        );

        let mut ticker = tokio::time::interval_at(started, self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut next_account = 0usize;
        let mut batches = 0u64;

        loop {
            tokio::select! {
                biased;
                _ = tokio::time::sleep_until(deadline) => break,
                _ = ticker.tick() => {
                    batches += 1;
                    for _ in 0..batch_size {
                        if Instant::now() >= deadline {
                            break;
                        }
                        let index = next_account % self.accounts.len();
                        next_account = next_account.wrapping_add(1);
                        self.dispatch_one(tracker, index).await;
                    }
                }
            }
        }

        batches
    }

    /// Reserves a nonce for `index`, waits for a permit and spawns the worker.
    async fn dispatch_one(&self, tracker: &TaskTracker, index: usize) {
        // reserved on the dispatch loop so issuance per account stays ordered
        let nonce = self.nonces.reserve_next(index);
        let client = self.endpoints.select();

        let permit = match Arc::clone(&self.permits).acquire_owned().await {
            Ok(permit) => permit,
            Err(e) => {
                // the semaphore is never closed while the dispatcher lives
                warn!(error = %e, "Concurrency limiter closed");
                return;
            }
        };

        let worker = Worker {
            accounts: Arc::clone(&self.accounts),
            stats: Arc::clone(&self.stats),
            client,
            transfer: self.config.transfer,
            retry: self.config.retry,
        };
        tracker.spawn(worker.run(index, nonce, permit));
    }
}

/// One in-flight transfer: build, sign, submit, record.
struct Worker<C> {
    accounts: Arc<AccountPool>,
    stats: Arc<StatsAggregator>,
    client: Arc<C>,
    transfer: TransferParams,
    retry: RetryPolicy,
}

impl<C: ChainClient> Worker<C> {
    async fn run(self, index: usize, nonce: u64, permit: OwnedSemaphorePermit) {
        self.stats.record_attempt();

        let sender = self.accounts.get(index);
        let recipient_index = rand::thread_rng().gen_range(0..self.accounts.len());
        let recipient = self.accounts.get(recipient_index).address;

        let signed = match sign_transfer(
            &sender.wallet,
            sender.address,
            recipient,
            U256::from(TRANSFER_VALUE),
            nonce,
            &self.transfer,
        )
        .await
        {
            Ok(signed) => signed,
            Err(e) => {
                debug!(account = index, nonce, error = %e, "Failed to sign transaction");
                self.stats.record_failure(&format!("{e:#}"));
                drop(permit);
                return;
            }
        };

        match submit_with_retry(self.client.as_ref(), &signed.raw_bytes, &self.retry, &self.stats)
            .await
        {
            Ok(()) => self.stats.record_success(),
            Err(e) => {
                debug!(
                    account = index,
                    nonce,
                    endpoint = self.client.name(),
                    error = %e,
                    "Transaction failed"
                );
                self.stats.record_failure(&e.message);
            }
        }
        drop(permit);
    }
}

/// Submits `raw`, retrying transient failures with linear backoff.
pub async fn submit_with_retry<C: ChainClient + ?Sized>(
    client: &C,
    raw: &Bytes,
    policy: &RetryPolicy,
    stats: &StatsAggregator,
) -> Result<(), ClientError> {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match client.send_raw_transaction(raw.clone()).await {
            Ok(_) => return Ok(()),
            Err(e) if e.is_transient() && attempt < max_attempts => {
                tokio::time::sleep(policy.backoff(attempt)).await;
                stats.record_retry();
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

    use alloy_primitives::{Address, B256};
    use alloy_signer_local::PrivateKeySigner;
    use async_trait::async_trait;

    use super::*;
    use crate::{accounts::Account, tx::TRANSFER_GAS_LIMIT};

    const PARAMS: TransferParams =
        TransferParams { chain_id: 1337, gas_price: 1_000_000_000, gas_limit: TRANSFER_GAS_LIMIT };

    /// Counts calls and fails with a fixed error, or succeeds when `error` is None.
    struct ScriptedClient {
        error: Option<ClientError>,
        sends: AtomicU32,
    }

    #[async_trait]
    impl ChainClient for ScriptedClient {
        fn name(&self) -> &str {
            "scripted"
        }
        async fn chain_id(&self) -> Result<u64, ClientError> {
            Ok(1337)
        }
        async fn balance(&self, _address: Address) -> Result<U256, ClientError> {
            Ok(U256::ZERO)
        }
        async fn confirmed_nonce(&self, _address: Address) -> Result<u64, ClientError> {
            Ok(0)
        }
        async fn pending_nonce(&self, _address: Address) -> Result<u64, ClientError> {
            Ok(0)
        }
        async fn send_raw_transaction(&self, _raw: Bytes) -> Result<B256, ClientError> {
            self.sends.fetch_add(1, Ordering::SeqCst);
            match &self.error {
                Some(e) => Err(e.clone()),
                None => Ok(B256::ZERO),
            }
        }
    }

    fn scripted(error: Option<ClientError>) -> ScriptedClient {
        ScriptedClient { error, sends: AtomicU32::new(0) }
    }

    #[test]
    fn test_batch_size() {
        let mut config = DispatchConfig::new(1000, Duration::from_secs(1), PARAMS);
        assert_eq!(config.batch_size(), 100);

        config.target_tps = 5;
        assert_eq!(config.batch_size(), 1);

        config.tick_interval = Duration::from_secs(1);
        assert_eq!(config.batch_size(), 5);

        config.target_tps = 0;
        assert_eq!(config.batch_size(), 1);
    }

    #[test]
    fn test_linear_backoff() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_millis(50));
        assert_eq!(policy.backoff(2), Duration::from_millis(100));
    }

    #[test]
    fn test_phase_display() {
        assert_eq!(Phase::Draining.to_string(), "Draining");
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_retried_to_limit() {
        let client = scripted(Some(ClientError::transient("request timeout")));
        let stats = StatsAggregator::new();
        let result =
            submit_with_retry(&client, &Bytes::new(), &RetryPolicy::default(), &stats).await;

        assert!(result.unwrap_err().is_transient());
        assert_eq!(client.sends.load(Ordering::SeqCst), 3);
        assert_eq!(stats.snapshot().retries, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejections_not_retried() {
        let client = scripted(Some(ClientError::rejected("nonce too low")));
        let stats = StatsAggregator::new();
        let result =
            submit_with_retry(&client, &Bytes::new(), &RetryPolicy::default(), &stats).await;

        assert_eq!(result.unwrap_err().message, "nonce too low");
        assert_eq!(client.sends.load(Ordering::SeqCst), 1);
        assert_eq!(stats.snapshot().retries, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_sends_once() {
        let client = scripted(None);
        let stats = StatsAggregator::new();
        submit_with_retry(&client, &Bytes::new(), &RetryPolicy::default(), &stats).await.unwrap();
        assert_eq!(client.sends.load(Ordering::SeqCst), 1);
    }

    /// Holds every submission for a while and records the peak concurrency.
    struct SlowClient {
        current: AtomicUsize,
        peak: AtomicUsize,
        submissions: AtomicUsize,
    }

    #[async_trait]
    impl ChainClient for SlowClient {
        fn name(&self) -> &str {
            "slow"
        }
        async fn chain_id(&self) -> Result<u64, ClientError> {
            Ok(1337)
        }
        async fn balance(&self, _address: Address) -> Result<U256, ClientError> {
            Ok(U256::ZERO)
        }
        async fn confirmed_nonce(&self, _address: Address) -> Result<u64, ClientError> {
            Ok(0)
        }
        async fn pending_nonce(&self, _address: Address) -> Result<u64, ClientError> {
            Ok(3)
        }
        async fn send_raw_transaction(&self, _raw: Bytes) -> Result<B256, ClientError> {
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            self.submissions.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(500)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            Ok(B256::ZERO)
        }
    }

    fn pool(size: usize) -> Arc<AccountPool> {
        Arc::new(AccountPool::new(
            (0..size).map(|_| Account::from_signer(PrivateKeySigner::random())).collect(),
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_exceeds_concurrency_ceiling() {
        let client = Arc::new(SlowClient {
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            submissions: AtomicUsize::new(0),
        });
        let endpoints = Arc::new(EndpointPool::new(vec![Arc::clone(&client)]).unwrap());

        let mut config = DispatchConfig::new(1000, Duration::from_secs(2), PARAMS);
        config.max_concurrent = 4;
        let report = Dispatcher::new(pool(5), endpoints, config).run().await;

        assert!(client.peak.load(Ordering::SeqCst) <= 4);
        assert!(client.peak.load(Ordering::SeqCst) > 0);
        assert_eq!(report.stats.failed, 0);
        assert_eq!(report.stats.succeeded, report.stats.attempted);
        assert_eq!(report.stats.attempted as usize, client.submissions.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_pool_sends_nothing() {
        let client = Arc::new(scripted(None));
        let endpoints = Arc::new(EndpointPool::new(vec![Arc::clone(&client)]).unwrap());
        let config = DispatchConfig::new(100, Duration::from_secs(1), PARAMS);

        let dispatcher = Dispatcher::new(Arc::new(AccountPool::default()), endpoints, config);
        assert_eq!(dispatcher.phase(), Phase::Init);
        let report = dispatcher.run().await;

        assert_eq!(report.stats.attempted, 0);
        assert_eq!(report.batches, 0);
        assert_eq!(client.sends.load(Ordering::SeqCst), 0);
    }
}
