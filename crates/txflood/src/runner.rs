use std::sync::Arc;

use anyhow::{Context, Result, bail, ensure};
use futures_util::future::join_all;
use tracing::{info, warn};

use crate::{
    accounts::AccountPool,
    audit::{
        DEFAULT_AUDIT_CONCURRENCY, FillConfig, FillSummary, StatusReport, account_statuses,
        fill_nonce_gaps, log_fill_summary, log_status_report, scan_nonce_gaps,
    },
    client::{AlloyClient, ChainClient, create_shared_client},
    config::{AuditConfig, LoadTestConfig, TargetConfig},
    dispatcher::Dispatcher,
    endpoints::EndpointPool,
    funder::fund_accounts,
    stats::{RunReport, print_final_report},
    tx::TransferParams,
};

/// Loads the account file and connects every endpoint of `endpoints`.
fn connect(
    accounts_path: &std::path::Path,
    endpoints: &[String],
) -> Result<(Arc<AccountPool>, EndpointPool<AlloyClient>)> {
    let accounts = AccountPool::load(accounts_path).context("Failed to load accounts")?;
    info!(accounts = accounts.len(), path = %accounts_path.display(), "Loaded accounts");

    let http_client = create_shared_client()?;
    let pool = EndpointPool::from_urls(&http_client, endpoints)?;
    info!(endpoints = pool.len(), "Created endpoint pool");
    Ok((Arc::new(accounts), pool))
}

/// Entry point of `txflood run`.
pub async fn run_load_test(config: LoadTestConfig) -> Result<RunReport> {
    info!("Starting txflood load test");
    let (accounts, endpoints) = connect(&config.accounts_path, &config.endpoints)?;
    run_load_test_with(&config, accounts, endpoints).await
}

/// Runs funding and the timed phase against already-built endpoints.
pub async fn run_load_test_with<C: ChainClient>(
    config: &LoadTestConfig,
    accounts: Arc<AccountPool>,
    endpoints: EndpointPool<C>,
) -> Result<RunReport> {
    ensure!(!accounts.is_empty(), "account pool is empty");

    let (endpoints, probed_chain_id) = probe_endpoints(endpoints).await?;
    let chain_id = match config.chain_id {
        Some(chain_id) => {
            if probed_chain_id != chain_id {
                warn!(configured = chain_id, reported = probed_chain_id, "Chain id mismatch");
            }
            chain_id
        }
        None => probed_chain_id,
    };
    let endpoints = Arc::new(endpoints);

    info!(
        chain_id,
        endpoints = endpoints.len(),
        accounts = accounts.len(),
        target_tps = config.target_tps,
        duration_secs = config.duration.as_secs(),
        max_concurrent = config.max_concurrent,
        "Configuration loaded"
    );

    if config.skip_funding {
        info!("Skipping funding phase");
    } else {
        fund_accounts(
            Arc::clone(&accounts),
            &config.funder_keys,
            &endpoints,
            &config.funding(chain_id),
        )
        .await
        .context("Funding phase failed")?;
    }

    let report = Dispatcher::new(accounts, endpoints, config.dispatch(chain_id)).run().await;
    print_final_report(&report);
    Ok(report)
}

/// Keeps the endpoints that answer a chain id query, in their original order.
///
/// Returns the reduced pool and the chain id reported by the first reachable
/// endpoint. Fails when no endpoint is reachable.
pub async fn probe_endpoints<C: ChainClient>(
    endpoints: EndpointPool<C>,
) -> Result<(EndpointPool<C>, u64)> {
    let answers =
        join_all(endpoints.clients().iter().map(|client| async move { client.chain_id().await }))
            .await;

    let mut reachable = Vec::with_capacity(answers.len());
    let mut chain_id = None;
    for (client, answer) in endpoints.clients().iter().zip(answers) {
        match answer {
            Ok(id) => {
                chain_id.get_or_insert(id);
                reachable.push(Arc::clone(client));
            }
            Err(e) => warn!(endpoint = client.name(), error = %e, "Endpoint unreachable, dropping it"),
        }
    }

    let Some(chain_id) = chain_id else {
        bail!("none of the {} endpoints is reachable", endpoints.len());
    };
    info!(reachable = reachable.len(), total = endpoints.len(), chain_id, "Probed endpoints");
    Ok((EndpointPool::new(reachable)?, chain_id))
}

/// Entry point of `txflood audit`.
pub async fn run_audit(config: AuditConfig) -> Result<FillSummary> {
    let (accounts, endpoints) = connect(&config.target.accounts_path, &config.target.endpoints)?;
    run_audit_with(&config, &accounts, endpoints).await
}

pub async fn run_audit_with<C: ChainClient>(
    config: &AuditConfig,
    accounts: &AccountPool,
    endpoints: EndpointPool<C>,
) -> Result<FillSummary> {
    let (endpoints, probed_chain_id) = probe_endpoints(endpoints).await?;
    let transfer = TransferParams {
        chain_id: config.chain_id.unwrap_or(probed_chain_id),
        gas_price: config.gas_price,
        gas_limit: config.gas_limit,
    };

    let report = scan_nonce_gaps(accounts, &endpoints, DEFAULT_AUDIT_CONCURRENCY).await;
    let fill = FillConfig { max_gap: config.max_gap, dry_run: config.dry_run, transfer };
    let summary = fill_nonce_gaps(accounts, &endpoints, &report, &fill).await;
    log_fill_summary(&report, &summary, config.dry_run);
    Ok(summary)
}

/// Entry point of `txflood status`.
pub async fn run_status(config: TargetConfig) -> Result<StatusReport> {
    let (accounts, endpoints) = connect(&config.accounts_path, &config.endpoints)?;
    let (endpoints, _) = probe_endpoints(endpoints).await?;

    let report = account_statuses(&accounts, &endpoints, DEFAULT_AUDIT_CONCURRENCY).await;
    log_status_report(&report);
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockClient;

    #[tokio::test]
    async fn test_probe_drops_unreachable_endpoints() {
        let pool = EndpointPool::new(vec![
            Arc::new(MockClient::new("down").unreachable()),
            Arc::new(MockClient::new("up")),
        ])
        .unwrap();

        let (pool, chain_id) = probe_endpoints(pool).await.unwrap();
        assert_eq!(chain_id, 1337);
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.primary().name(), "up");
    }

    #[tokio::test]
    async fn test_probe_fails_when_nothing_reachable() {
        let pool = EndpointPool::new(vec![
            Arc::new(MockClient::new("a").unreachable()),
            Arc::new(MockClient::new("b").unreachable()),
        ])
        .unwrap();

        let err = probe_endpoints(pool).await.unwrap_err();
        assert!(err.to_string().contains("none of the 2 endpoints"));
    }
}
