//! Round-robin pool of backend connections.

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use anyhow::{Result, bail};

use crate::client::{AlloyClient, ChainClient};

/// Fixed set of backend connections shared by every task.
#[derive(Debug)]
pub struct EndpointPool<C> {
    clients: Vec<Arc<C>>,
    /// Counter for round-robin selection
    counter: AtomicUsize,
}

impl<C: ChainClient> EndpointPool<C> {
    /// Creates a pool from already-connected clients. Fails on an empty list.
    pub fn new(clients: Vec<Arc<C>>) -> Result<Self> {
        if clients.is_empty() {
            bail!("endpoint pool requires at least one endpoint");
        }
        Ok(Self { clients, counter: AtomicUsize::new(0) })
    }

    /// Returns the number of endpoints
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Always false once constructed.
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }

    /// Next endpoint in round-robin order.
    pub fn select(&self) -> Arc<C> {
        let idx = self.counter.fetch_add(1, Ordering::Relaxed) % self.clients.len();
        Arc::clone(&self.clients[idx])
    }

    /// Endpoint assigned to a fixed slot, e.g. funder `i` uses `i mod len`.
    pub fn for_slot(&self, slot: usize) -> Arc<C> {
        Arc::clone(&self.clients[slot % self.clients.len()])
    }

    /// The first endpoint, used for one-off queries such as the chain id.
    pub fn primary(&self) -> Arc<C> {
        self.for_slot(0)
    }

    pub fn clients(&self) -> &[Arc<C>] {
        &self.clients
    }
}

impl EndpointPool<AlloyClient> {
    /// Builds alloy clients for every URL, sharing one HTTP connection pool.
    pub fn from_urls(http_client: &reqwest::Client, urls: &[String]) -> Result<Self> {
        let clients = urls
            .iter()
            .enumerate()
            .map(|(i, url)| {
                AlloyClient::new(http_client.clone(), url, format!("endpoint-{i}")).map(Arc::new)
            })
            .collect::<Result<Vec<_>>>()?;
        Self::new(clients)
    }
}
