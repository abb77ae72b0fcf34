use alloy_consensus::TxEnvelope;
use alloy_network::{Ethereum, EthereumWallet, NetworkWallet, TransactionBuilder, eip2718::Encodable2718};
use alloy_primitives::{Address, B256, Bytes, U256};
use alloy_rpc_types_eth::TransactionRequest;
use anyhow::{Context, Result};

/// Gas limit of a plain value transfer.
pub const TRANSFER_GAS_LIMIT: u64 = 21_000;

/// Fee and chain parameters shared by every transfer of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferParams {
    pub chain_id: u64,
    /// Legacy gas price in wei
    pub gas_price: u128,
    pub gas_limit: u64,
}

/// Signed transaction ready to send
#[derive(Debug, Clone)]
pub struct SignedTransfer {
    pub raw_bytes: Bytes,
    pub tx_hash: B256,
    pub nonce: u64,
}

/// Builds a legacy (EIP-155) value transfer and signs it with `wallet`.
pub async fn sign_transfer(
    wallet: &EthereumWallet,
    from: Address,
    to: Address,
    value: U256,
    nonce: u64,
    params: &TransferParams,
) -> Result<SignedTransfer> {
    let tx = TransactionRequest::default()
        .with_from(from)
        .with_to(to)
        .with_value(value)
        .with_nonce(nonce)
        .with_chain_id(params.chain_id)
        .with_gas_price(params.gas_price)
        .with_gas_limit(params.gas_limit);

    let envelope: TxEnvelope = <EthereumWallet as NetworkWallet<Ethereum>>::sign_request(wallet, tx)
        .await
        .context("Failed to sign transaction")?;

    Ok(SignedTransfer {
        tx_hash: *envelope.tx_hash(),
        raw_bytes: Bytes::from(envelope.encoded_2718()),
        nonce,
    })
}
