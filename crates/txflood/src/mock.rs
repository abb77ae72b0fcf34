//! In-memory [`ChainClient`] used by unit tests.

use std::{
    collections::{HashMap, VecDeque},
    sync::Mutex,
};

use alloy_consensus::{Transaction, TxEnvelope};
use alloy_network::eip2718::Decodable2718;
use alloy_primitives::{Address, B256, Bytes, U256};
use async_trait::async_trait;

use crate::{
    client::{ChainClient, TxpoolStatus},
    error::ClientError,
};

/// A transaction the mock accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SentTx {
    pub to: Option<Address>,
    pub value: U256,
    pub nonce: u64,
}

#[derive(Debug, Default)]
pub(crate) struct MockClient {
    name: String,
    unreachable: bool,
    balances: HashMap<Address, U256>,
    nonces: HashMap<Address, (u64, u64)>,
    send_error: Option<ClientError>,
    txpool: Mutex<VecDeque<Result<TxpoolStatus, ClientError>>>,
    sent: Mutex<Vec<SentTx>>,
}

impl MockClient {
    pub(crate) fn new(name: &str) -> Self {
        Self { name: name.to_string(), ..Self::default() }
    }

    /// Every call fails with a transient error.
    pub(crate) fn unreachable(mut self) -> Self {
        self.unreachable = true;
        self
    }

    pub(crate) fn with_balance(mut self, address: Address, balance: U256) -> Self {
        self.balances.insert(address, balance);
        self
    }

    pub(crate) fn with_nonces(mut self, address: Address, confirmed: u64, pending: u64) -> Self {
        self.nonces.insert(address, (confirmed, pending));
        self
    }

    pub(crate) fn with_send_error(mut self, error: ClientError) -> Self {
        self.send_error = Some(error);
        self
    }

    /// Pool answers returned in order; the last one repeats. None queued means
    /// the capability is unsupported.
    pub(crate) fn with_txpool(self, answers: Vec<Result<TxpoolStatus, ClientError>>) -> Self {
        *self.txpool.lock().unwrap() = answers.into();
        self
    }

    pub(crate) fn sent(&self) -> Vec<SentTx> {
        self.sent.lock().unwrap().clone()
    }

    fn check_reachable(&self) -> Result<(), ClientError> {
        if self.unreachable {
            Err(ClientError::transient(format!("{}: connection refused", self.name)))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl ChainClient for MockClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn chain_id(&self) -> Result<u64, ClientError> {
        self.check_reachable()?;
        Ok(1337)
    }

    async fn balance(&self, address: Address) -> Result<U256, ClientError> {
        self.check_reachable()?;
        Ok(self.balances.get(&address).copied().unwrap_or_default())
    }

    async fn confirmed_nonce(&self, address: Address) -> Result<u64, ClientError> {
        self.check_reachable()?;
        Ok(self.nonces.get(&address).map_or(0, |(confirmed, _)| *confirmed))
    }

    async fn pending_nonce(&self, address: Address) -> Result<u64, ClientError> {
        self.check_reachable()?;
        Ok(self.nonces.get(&address).map_or(0, |(_, pending)| *pending))
    }

    async fn send_raw_transaction(&self, raw: Bytes) -> Result<B256, ClientError> {
        self.check_reachable()?;
        if let Some(e) = &self.send_error {
            return Err(e.clone());
        }
        let envelope = TxEnvelope::decode_2718(&mut raw.as_ref())
            .map_err(|e| ClientError::rejected(format!("invalid transaction: {e}")))?;
        self.sent.lock().unwrap().push(SentTx {
            to: envelope.to(),
            value: envelope.value(),
            nonce: envelope.nonce(),
        });
        Ok(*envelope.tx_hash())
    }

    async fn txpool_status(&self) -> Result<TxpoolStatus, ClientError> {
        self.check_reachable()?;
        let mut answers = self.txpool.lock().unwrap();
        match answers.len() {
            0 => Err(ClientError::unsupported("txpool_status not available")),
            1 => answers[0].clone(),
            _ => answers.pop_front().unwrap(),
        }
    }
}
