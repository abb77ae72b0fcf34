mod accounts;
mod audit;
mod cli;
mod client;
mod config;
mod dispatcher;
mod endpoints;
mod error;
mod funder;
mod nonce;
mod runner;
mod stats;
mod tx;

#[cfg(test)]
mod mock;

pub use accounts::{Account, AccountPool, parse_private_key};
pub use audit::{
    AccountStatus, FillConfig, FillSummary, GapReport, NonceGap, StatusReport, account_statuses,
    fill_nonce_gaps, scan_nonce_gaps,
};
pub use cli::{AuditArgs, Cli, Command, LogFormat, RunArgs, StatusArgs, TargetArgs};
pub use client::{AlloyClient, ChainClient, TxpoolStatus, create_shared_client};
pub use config::{AuditConfig, FileConfig, LoadTestConfig, TargetConfig};
pub use dispatcher::{DispatchConfig, Dispatcher, Phase, RetryPolicy, submit_with_retry};
pub use endpoints::EndpointPool;
pub use error::{ClientError, ErrorKind, classify_message};
pub use funder::{
    FundingConfig, FundingOutcome, Settlement, SettlementGate, fund_accounts, partition,
};
pub use nonce::NonceTracker;
pub use runner::{
    probe_endpoints, run_audit, run_audit_with, run_load_test, run_load_test_with, run_status,
};
pub use stats::{RunReport, RunStats, StatsAggregator, print_final_report};
pub use tx::{SignedTransfer, TRANSFER_GAS_LIMIT, TransferParams, sign_transfer};
