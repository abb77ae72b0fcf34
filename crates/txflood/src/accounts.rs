use std::path::Path;

use alloy_network::EthereumWallet;
use alloy_primitives::Address;
use alloy_signer_local::PrivateKeySigner;
use anyhow::{Context, Result, bail, ensure};
use serde::Deserialize;

/// One record of the account file.
#[derive(Debug, Deserialize)]
struct AccountRecord {
    address: String,
    private_key: String,
}

/// A test account: its address and a wallet able to sign for it.
#[derive(Clone)]
pub struct Account {
    pub address: Address,
    pub wallet: EthereumWallet,
}

impl Account {
    pub fn from_signer(signer: PrivateKeySigner) -> Self {
        Self { address: signer.address(), wallet: EthereumWallet::from(signer) }
    }
}

impl std::fmt::Debug for Account {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Account").field("address", &self.address).finish_non_exhaustive()
    }
}

/// Immutable set of accounts loaded once at startup.
#[derive(Debug, Default)]
pub struct AccountPool {
    accounts: Vec<Account>,
}

impl AccountPool {
    pub fn new(accounts: Vec<Account>) -> Self {
        Self { accounts }
    }

    /// Loads a JSON array of `{"address", "private_key"}` records.
    ///
    /// Every key must parse and derive the address it is listed with, and the
    /// file must hold at least one account.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read account file: {}", path.display()))?;
        let pool = Self::from_json(&contents)
            .with_context(|| format!("invalid account file: {}", path.display()))?;
        ensure!(!pool.is_empty(), "account file {} contains no accounts", path.display());
        Ok(pool)
    }

    /// Parses account records from JSON text. An empty array is allowed here.
    pub fn from_json(contents: &str) -> Result<Self> {
        let records: Vec<AccountRecord> =
            serde_json::from_str(contents).context("failed to parse account records")?;

        let accounts = records
            .into_iter()
            .enumerate()
            .map(|(i, record)| {
                let account = Account::from_signer(
                    parse_private_key(&record.private_key)
                        .with_context(|| format!("account {i}: invalid private key"))?,
                );
                let listed: Address = record
                    .address
                    .trim()
                    .parse()
                    .with_context(|| format!("account {i}: invalid address {}", record.address))?;
                if listed != account.address {
                    bail!(
                        "account {i}: key derives {} but the file lists {listed}",
                        account.address
                    );
                }
                Ok(account)
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self::new(accounts))
    }

    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }

    /// # Panics
    ///
    /// Panics if `index` is out of range.
    pub fn get(&self, index: usize) -> &Account {
        &self.accounts[index]
    }

    pub fn accounts(&self) -> &[Account] {
        &self.accounts
    }

    pub fn iter(&self) -> impl Iterator<Item = &Account> {
        self.accounts.iter()
    }
}

/// Parses a private key from hex string (with or without 0x prefix)
pub fn parse_private_key(hex_key: &str) -> Result<PrivateKeySigner> {
    let trimmed = hex_key.trim();
    let key = trimmed.strip_prefix("0x").unwrap_or(trimmed);
    key.parse::<PrivateKeySigner>().context("failed to parse private key")
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    const KEY_A: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
    const ADDR_A: &str = "0xf39Fd6e51aad88F6F4ce6aB8827279cffFb92266";
    const KEY_B: &str = "59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d";
    const ADDR_B: &str = "0x70997970C51812dc3A010C7d01b50e0d17dc79C8";

    fn records(entries: &[(&str, &str)]) -> String {
        let items: Vec<serde_json::Value> = entries
            .iter()
            .map(|(address, key)| serde_json::json!({ "address": address, "private_key": key }))
            .collect();
        serde_json::Value::Array(items).to_string()
    }

    #[test]
    fn test_parses_records_in_order() {
        let pool = AccountPool::from_json(&records(&[(ADDR_A, KEY_A), (ADDR_B, KEY_B)])).unwrap();
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.get(0).address, ADDR_A.parse::<Address>().unwrap());
        assert_eq!(pool.get(1).address, ADDR_B.parse::<Address>().unwrap());
    }

    #[test]
    fn test_lowercase_address_accepted() {
        let lower = ADDR_A.to_lowercase();
        let pool = AccountPool::from_json(&records(&[(&lower, KEY_A)])).unwrap();
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_mismatched_address_rejected() {
        let err = AccountPool::from_json(&records(&[(ADDR_B, KEY_A)])).unwrap_err();
        assert!(format!("{err:#}").contains("account 0"));
    }

    #[test]
    fn test_invalid_key_rejected() {
        assert!(AccountPool::from_json(&records(&[(ADDR_A, "0xnothex")])).is_err());
    }

    #[test]
    fn test_malformed_json_rejected() {
        assert!(AccountPool::from_json("{\"address\": 1}").is_err());
    }

    #[test]
    fn test_load_empty_file_is_fatal() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"[]").unwrap();
        let err = AccountPool::load(file.path()).unwrap_err();
        assert!(err.to_string().contains("no accounts"));
    }

    #[test]
    fn test_load_missing_file() {
        assert!(AccountPool::load("/nonexistent/accounts.json").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(records(&[(ADDR_A, KEY_A)]).as_bytes()).unwrap();
        let pool = AccountPool::load(file.path()).unwrap();
        assert_eq!(pool.iter().count(), 1);
    }

    #[test]
    fn test_parse_private_key_prefix_optional() {
        let with = parse_private_key(KEY_A).unwrap();
        let without = parse_private_key(KEY_A.trim_start_matches("0x")).unwrap();
        assert_eq!(with.address(), without.address());
    }
}
