use std::time::Duration;

use alloy_primitives::{Address, B256, Bytes, U256};
use alloy_provider::{Provider, RootProvider, ext::TxPoolApi};
use alloy_rpc_client::RpcClient;
use alloy_rpc_types_eth::BlockNumberOrTag;
use alloy_transport_http::Http;
use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::error::ClientError;

/// Snapshot of a node's transaction pool counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TxpoolStatus {
    pub pending: u64,
    pub queued: u64,
}

impl TxpoolStatus {
    pub const fn total(&self) -> u64 {
        self.pending + self.queued
    }
}

/// The RPC calls the load generator needs from one backend node.
///
/// Implementations must tolerate concurrent use from many tasks.
#[async_trait]
pub trait ChainClient: Send + Sync + 'static {
    /// Label used in logs.
    fn name(&self) -> &str;

    async fn chain_id(&self) -> Result<u64, ClientError>;

    /// Balance at the latest block, in wei.
    async fn balance(&self, address: Address) -> Result<U256, ClientError>;

    /// Transaction count at the latest block.
    async fn confirmed_nonce(&self, address: Address) -> Result<u64, ClientError>;

    /// Transaction count including transactions still in the pool.
    async fn pending_nonce(&self, address: Address) -> Result<u64, ClientError>;

    async fn send_raw_transaction(&self, raw: Bytes) -> Result<B256, ClientError>;

    /// Pool counters. Optional capability: the default reports `Unsupported`.
    async fn txpool_status(&self) -> Result<TxpoolStatus, ClientError> {
        Err(ClientError::unsupported(format!("{}: txpool_status not available", self.name())))
    }
}

/// Creates a shared HTTP client with connection pooling so many endpoints and
/// workers reuse the same sockets.
pub fn create_shared_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .pool_max_idle_per_host(1000)
        .pool_idle_timeout(Duration::from_secs(90))
        .tcp_keepalive(Duration::from_secs(60))
        .connect_timeout(Duration::from_secs(10))
        .timeout(Duration::from_secs(30))
        .build()
        .context("Failed to build HTTP client")
}

/// [`ChainClient`] backed by an alloy HTTP provider.
#[derive(Clone)]
pub struct AlloyClient {
    name: String,
    provider: RootProvider,
}

impl AlloyClient {
    pub fn new(http_client: reqwest::Client, rpc_url: &str, name: impl Into<String>) -> Result<Self> {
        let url: url::Url =
            rpc_url.parse().with_context(|| format!("Invalid RPC URL: {rpc_url}"))?;
        let http = Http::with_client(http_client, url);
        let rpc_client = RpcClient::new(http, false);
        Ok(Self { name: name.into(), provider: RootProvider::new(rpc_client) })
    }

    async fn transaction_count(
        &self,
        address: Address,
        tag: BlockNumberOrTag,
    ) -> Result<u64, ClientError> {
        self.provider
            .get_transaction_count(address)
            .block_id(tag.into())
            .await
            .map_err(ClientError::from_rpc)
    }
}

#[async_trait]
impl ChainClient for AlloyClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn chain_id(&self) -> Result<u64, ClientError> {
        self.provider.get_chain_id().await.map_err(ClientError::from_rpc)
    }

    async fn balance(&self, address: Address) -> Result<U256, ClientError> {
        self.provider.get_balance(address).await.map_err(ClientError::from_rpc)
    }

    async fn confirmed_nonce(&self, address: Address) -> Result<u64, ClientError> {
        self.transaction_count(address, BlockNumberOrTag::Latest).await
    }

    async fn pending_nonce(&self, address: Address) -> Result<u64, ClientError> {
        self.transaction_count(address, BlockNumberOrTag::Pending).await
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> Result<B256, ClientError> {
        let pending =
            self.provider.send_raw_transaction(&raw).await.map_err(ClientError::from_rpc)?;
        Ok(*pending.tx_hash())
    }

    async fn txpool_status(&self) -> Result<TxpoolStatus, ClientError> {
        let status = self.provider.txpool_status().await.map_err(ClientError::from_rpc)?;
        Ok(TxpoolStatus { pending: status.pending, queued: status.queued })
    }
}
