//! Read-only inspection of the account pool, plus the gap filler that
//! unblocks accounts whose pending transactions sit behind a missing nonce.

use alloy_primitives::{Address, U256, utils::format_ether};
use futures_util::stream::{self, StreamExt};
use tracing::{info, warn};

use crate::{
    accounts::{Account, AccountPool},
    client::ChainClient,
    endpoints::EndpointPool,
    error::ClientError,
    tx::{TransferParams, sign_transfer},
};

/// Simultaneous account queries while auditing.
pub const DEFAULT_AUDIT_CONCURRENCY: usize = 100;
/// Gaps larger than this are reported but never filled.
pub const DEFAULT_MAX_GAP: u64 = 100;

/// An account whose pending nonce runs ahead of its confirmed nonce
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NonceGap {
    pub index: usize,
    pub address: Address,
    pub confirmed: u64,
    pub pending: u64,
}

impl NonceGap {
    pub const fn size(&self) -> u64 {
        self.pending - self.confirmed
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GapReport {
    pub checked: usize,
    /// Accounts skipped because a nonce query failed
    pub query_failures: usize,
    /// Sorted by account index
    pub gaps: Vec<NonceGap>,
}

/// Compares confirmed and pending nonces of every account.
pub async fn scan_nonce_gaps<C: ChainClient>(
    accounts: &AccountPool,
    endpoints: &EndpointPool<C>,
    concurrency: usize,
) -> GapReport {
    info!(accounts = accounts.len(), "Scanning for nonce gaps");

    let results: Vec<_> = stream::iter(accounts.iter().enumerate())
        .map(|(index, account)| {
            let client = endpoints.select();
            let address = account.address;
            async move {
                let confirmed = client.confirmed_nonce(address).await?;
                let pending = client.pending_nonce(address).await?;
                Ok::<_, ClientError>(NonceGap { index, address, confirmed, pending })
            }
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    let mut report = GapReport { checked: accounts.len(), ..GapReport::default() };
    for result in results {
        match result {
            Ok(entry) if entry.pending > entry.confirmed => report.gaps.push(entry),
            Ok(_) => {}
            Err(e) => {
                warn!(error = %e, "Nonce query failed, skipping account");
                report.query_failures += 1;
            }
        }
    }
    report.gaps.sort_by_key(|gap| gap.index);
    report
}

#[derive(Debug, Clone, Copy)]
pub struct FillConfig {
    pub max_gap: u64,
    /// Count the would-be fills without sending anything
    pub dry_run: bool,
    pub transfer: TransferParams,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FillSummary {
    pub accounts_with_gaps: usize,
    /// Gaps above `max_gap`, left untouched
    pub skipped_large: usize,
    /// Nonces filled (or that would be filled on a dry run)
    pub filled: u64,
    pub failed: u64,
}

/// Sends a zero-value self-transfer for every missing nonce of every gap no
/// larger than `max_gap`.
pub async fn fill_nonce_gaps<C: ChainClient>(
    accounts: &AccountPool,
    endpoints: &EndpointPool<C>,
    report: &GapReport,
    config: &FillConfig,
) -> FillSummary {
    let mut summary =
        FillSummary { accounts_with_gaps: report.gaps.len(), ..FillSummary::default() };

    let fillable: Vec<&NonceGap> = report
        .gaps
        .iter()
        .filter(|gap| {
            if gap.size() > config.max_gap {
                warn!(
                    address = %gap.address,
                    confirmed = gap.confirmed,
                    pending = gap.pending,
                    gap = gap.size(),
                    "Large gap detected, skipping"
                );
                false
            } else {
                info!(
                    address = %gap.address,
                    confirmed = gap.confirmed,
                    pending = gap.pending,
                    gap = gap.size(),
                    "Gap found"
                );
                true
            }
        })
        .collect();
    summary.skipped_large = report.gaps.len() - fillable.len();

    if config.dry_run {
        summary.filled = fillable.iter().map(|gap| gap.size()).sum();
        return summary;
    }

    let outcomes: Vec<(u64, u64)> = stream::iter(fillable)
        .map(|gap| {
            let client = endpoints.select();
            let account = accounts.get(gap.index);
            async move { fill_gap(client.as_ref(), account, gap, &config.transfer).await }
        })
        .buffer_unordered(DEFAULT_AUDIT_CONCURRENCY)
        .collect()
        .await;

    for (filled, failed) in outcomes {
        summary.filled += filled;
        summary.failed += failed;
    }
    summary
}

/// Returns `(filled, failed)` for one account.
async fn fill_gap<C: ChainClient>(
    client: &C,
    account: &Account,
    gap: &NonceGap,
    transfer: &TransferParams,
) -> (u64, u64) {
    let mut filled = 0;
    let mut failed = 0;
    for nonce in gap.confirmed..gap.pending {
        let signed = match sign_transfer(
            &account.wallet,
            account.address,
            account.address,
            U256::ZERO,
            nonce,
            transfer,
        )
        .await
        {
            Ok(signed) => signed,
            Err(e) => {
                warn!(address = %account.address, nonce, error = format!("{e:#}"), "Failed to sign filler");
                failed += 1;
                continue;
            }
        };

        match client.send_raw_transaction(signed.raw_bytes).await {
            Ok(_) => {
                info!(address = %account.address, nonce, "Filled gap");
                filled += 1;
            }
            Err(e) => {
                warn!(address = %account.address, nonce, error = %e, "Failed to send filler");
                failed += 1;
            }
        }
    }
    (filled, failed)
}

pub fn log_fill_summary(report: &GapReport, summary: &FillSummary, dry_run: bool) {
    info!("=== Summary ===");
    info!(
        checked = report.checked,
        query_failures = report.query_failures,
        accounts_with_gaps = summary.accounts_with_gaps,
        skipped_large = summary.skipped_large,
        nonces_filled = summary.filled,
        failed = summary.failed,
        "Nonce gap audit"
    );
    if dry_run {
        info!("Dry run, no transactions were sent");
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountStatus {
    pub index: usize,
    pub address: Address,
    pub balance: U256,
    pub confirmed: u64,
    pub pending: u64,
}

impl AccountStatus {
    pub const fn gap(&self) -> u64 {
        self.pending.saturating_sub(self.confirmed)
    }
}

#[derive(Debug, Clone, Default)]
pub struct StatusReport {
    pub total: usize,
    pub query_failures: usize,
    /// Sorted by account index
    pub statuses: Vec<AccountStatus>,
}

impl StatusReport {
    pub fn with_balance(&self) -> usize {
        self.statuses.iter().filter(|s| !s.balance.is_zero()).count()
    }

    pub fn zero_balance(&self) -> usize {
        self.statuses.len() - self.with_balance()
    }

    pub fn non_zero_nonce(&self) -> usize {
        self.statuses.iter().filter(|s| s.confirmed > 0).count()
    }

    pub fn gaps(&self) -> impl Iterator<Item = &AccountStatus> {
        self.statuses.iter().filter(|s| s.gap() > 0)
    }
}

/// Balance and nonces of every account. A failed pending-nonce query falls
/// back to the confirmed nonce; other failures skip the account.
pub async fn account_statuses<C: ChainClient>(
    accounts: &AccountPool,
    endpoints: &EndpointPool<C>,
    concurrency: usize,
) -> StatusReport {
    let results: Vec<_> = stream::iter(accounts.iter().enumerate())
        .map(|(index, account)| {
            let client = endpoints.select();
            let address = account.address;
            async move {
                let balance = client.balance(address).await?;
                let confirmed = client.confirmed_nonce(address).await?;
                let pending = client.pending_nonce(address).await.unwrap_or(confirmed);
                Ok::<_, ClientError>(AccountStatus {
                    index,
                    address,
                    balance,
                    confirmed,
                    pending,
                })
            }
        })
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    let mut report = StatusReport { total: accounts.len(), ..StatusReport::default() };
    for result in results {
        match result {
            Ok(status) => report.statuses.push(status),
            Err(e) => {
                warn!(error = %e, "Account query failed");
                report.query_failures += 1;
            }
        }
    }
    report.statuses.sort_by_key(|s| s.index);
    report
}

pub fn log_status_report(report: &StatusReport) {
    info!("=== Summary ===");
    info!(
        total = report.total,
        with_balance = report.with_balance(),
        zero_balance = report.zero_balance(),
        non_zero_nonce = report.non_zero_nonce(),
        query_failures = report.query_failures,
        "Account status"
    );

    info!("=== All Accounts ===");
    for status in &report.statuses {
        info!(
            index = status.index,
            address = %status.address,
            balance_eth = format_ether(status.balance),
            nonce = status.confirmed,
            pending = status.pending,
            "Account"
        );
    }

    info!("=== Accounts with Nonce Gaps ===");
    let mut gaps = 0;
    for status in report.gaps() {
        info!(
            address = %status.address,
            nonce = status.confirmed,
            pending = status.pending,
            gap = status.gap(),
            "Nonce gap"
        );
        gaps += 1;
    }
    if gaps == 0 {
        info!("No nonce gaps found");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use alloy_signer_local::PrivateKeySigner;

    use super::*;
    use crate::{mock::MockClient, tx::TRANSFER_GAS_LIMIT};

    const TRANSFER: TransferParams =
        TransferParams { chain_id: 1337, gas_price: 20_000_000_000, gas_limit: TRANSFER_GAS_LIMIT };

    fn pool(size: usize) -> AccountPool {
        AccountPool::new((0..size).map(|_| Account::from_signer(PrivateKeySigner::random())).collect())
    }

    /// Account 0 has no gap, 1 a gap of 2, 2 a gap of 150.
    fn gapped(accounts: &AccountPool) -> MockClient {
        MockClient::new("node")
            .with_nonces(accounts.get(0).address, 4, 4)
            .with_nonces(accounts.get(1).address, 3, 5)
            .with_nonces(accounts.get(2).address, 10, 160)
            .with_balance(accounts.get(1).address, U256::from(1))
    }

    #[tokio::test]
    async fn test_scan_finds_gaps_in_order() {
        let accounts = pool(3);
        let endpoints = EndpointPool::new(vec![Arc::new(gapped(&accounts))]).unwrap();

        let report = scan_nonce_gaps(&accounts, &endpoints, 2).await;
        assert_eq!(report.checked, 3);
        assert_eq!(report.query_failures, 0);
        assert_eq!(report.gaps.iter().map(|g| (g.index, g.size())).collect::<Vec<_>>(), vec![
            (1, 2),
            (2, 150)
        ]);
    }

    #[tokio::test]
    async fn test_scan_counts_failures() {
        let accounts = pool(2);
        let endpoints =
            EndpointPool::new(vec![Arc::new(MockClient::new("down").unreachable())]).unwrap();
        let report = scan_nonce_gaps(&accounts, &endpoints, 10).await;
        assert_eq!(report.query_failures, 2);
        assert!(report.gaps.is_empty());
    }

    #[tokio::test]
    async fn test_dry_run_sends_nothing() {
        let accounts = pool(3);
        let client = Arc::new(gapped(&accounts));
        let endpoints = EndpointPool::new(vec![Arc::clone(&client)]).unwrap();
        let report = scan_nonce_gaps(&accounts, &endpoints, 10).await;

        let config = FillConfig { max_gap: DEFAULT_MAX_GAP, dry_run: true, transfer: TRANSFER };
        let summary = fill_nonce_gaps(&accounts, &endpoints, &report, &config).await;

        assert_eq!(summary, FillSummary {
            accounts_with_gaps: 2,
            skipped_large: 1,
            filled: 2,
            failed: 0
        });
        assert!(client.sent().is_empty());
    }

    #[tokio::test]
    async fn test_fill_sends_self_transfers_for_missing_nonces() {
        let accounts = pool(3);
        let client = Arc::new(gapped(&accounts));
        let endpoints = EndpointPool::new(vec![Arc::clone(&client)]).unwrap();
        let report = scan_nonce_gaps(&accounts, &endpoints, 10).await;

        let config = FillConfig { max_gap: DEFAULT_MAX_GAP, dry_run: false, transfer: TRANSFER };
        let summary = fill_nonce_gaps(&accounts, &endpoints, &report, &config).await;
        assert_eq!(summary.filled, 2);
        assert_eq!(summary.skipped_large, 1);

        let sent = client.sent();
        assert_eq!(sent.iter().map(|tx| tx.nonce).collect::<Vec<_>>(), vec![3, 4]);
        assert!(sent.iter().all(|tx| tx.to == Some(accounts.get(1).address)));
        assert!(sent.iter().all(|tx| tx.value.is_zero()));
    }

    #[tokio::test]
    async fn test_status_report() {
        let accounts = pool(3);
        let endpoints = EndpointPool::new(vec![Arc::new(gapped(&accounts))]).unwrap();

        let report = account_statuses(&accounts, &endpoints, 10).await;
        assert_eq!(report.statuses.len(), 3);
        assert_eq!(report.with_balance(), 1);
        assert_eq!(report.zero_balance(), 2);
        assert_eq!(report.non_zero_nonce(), 3);
        assert_eq!(report.gaps().map(|s| s.index).collect::<Vec<_>>(), vec![1, 2]);
        log_status_report(&report);
    }
}
