//! Client configuration, read once from the environment.
//!
//! | variable                     | default                                                  |
//! |------------------------------|----------------------------------------------------------|
//! | `MINT_RPC_URL`               | unset (no provider, read-only mode)                      |
//! | `MINT_CONTRACT_ADDRESS`      | `0x81A83C526964470583450F6474EB631b0981ECCA`             |
//! | `MINT_EXPECTED_CHAIN_ID`     | `4`                                                      |
//! | `MINT_CAP`                   | `50` (display only)                                      |
//! | `MINT_ABI_PATH`              | bundled interface                                        |
//! | `MINT_POLL_INTERVAL_MS`      | `4000`                                                   |
//! | `MINT_EXPLORER_TX_URL`       | `https://rinkeby.etherscan.io/tx`                        |
//! | `MINT_MARKETPLACE_ASSET_URL` | `https://testnets.opensea.io/assets`                     |
//! | `MINT_COLLECTION_URL`        | `https://testnets.opensea.io/collection/narutokunv1-v2`  |

use alloy_primitives::address;
use anyhow::{Context, Result};
use ml_api_types::{Address, ChainId, TxHash};
use ml_contract::{ContractSpec, EntryPoints, InterfaceDescription};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

pub const DEFAULT_CONTRACT_ADDRESS: Address = address!("81A83C526964470583450F6474EB631b0981ECCA");
pub const DEFAULT_CHAIN_ID: &str = "4";
pub const DEFAULT_MINT_CAP: u64 = 50;
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 4_000;

#[derive(Debug, Clone)]
pub struct MintConfig {
    pub rpc_url: Option<String>,
    pub contract_address: Address,
    pub expected_chain_id: ChainId,
    pub mint_cap: u64,
    pub abi_path: Option<PathBuf>,
    pub poll_interval: Duration,
    pub explorer_tx_url: String,
    pub marketplace_asset_url: String,
    pub collection_url: String,
}

impl Default for MintConfig {
    fn default() -> Self {
        Self {
            rpc_url: None,
            contract_address: DEFAULT_CONTRACT_ADDRESS,
            expected_chain_id: ChainId(DEFAULT_CHAIN_ID.to_owned()),
            mint_cap: DEFAULT_MINT_CAP,
            abi_path: None,
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            explorer_tx_url: "https://rinkeby.etherscan.io/tx".to_owned(),
            marketplace_asset_url: "https://testnets.opensea.io/assets".to_owned(),
            collection_url: "https://testnets.opensea.io/collection/narutokunv1-v2".to_owned(),
        }
    }
}

impl MintConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_owned()).filter(|v| !v.is_empty());
        let defaults = Self::default();

        let mint_cap = match get("MINT_CAP") {
            Some(raw) => raw.parse().with_context(|| format!("MINT_CAP '{raw}' is not a number"))?,
            None => defaults.mint_cap,
        };
        let poll_interval = match get("MINT_POLL_INTERVAL_MS") {
            Some(raw) => {
                let ms: u64 = raw
                    .parse()
                    .with_context(|| format!("MINT_POLL_INTERVAL_MS '{raw}' is not a number"))?;
                anyhow::ensure!(ms > 0, "MINT_POLL_INTERVAL_MS must be greater than 0");
                Duration::from_millis(ms)
            }
            None => defaults.poll_interval,
        };

        let contract_address = match get("MINT_CONTRACT_ADDRESS") {
            Some(raw) => raw
                .parse::<Address>()
                .with_context(|| format!("MINT_CONTRACT_ADDRESS '{raw}' is not an address"))?,
            None => defaults.contract_address,
        };

        let config = Self {
            rpc_url: get("MINT_RPC_URL"),
            contract_address,
            expected_chain_id: get("MINT_EXPECTED_CHAIN_ID")
                .map(ChainId)
                .unwrap_or(defaults.expected_chain_id),
            mint_cap,
            abi_path: get("MINT_ABI_PATH").map(PathBuf::from),
            poll_interval,
            explorer_tx_url: get("MINT_EXPLORER_TX_URL")
                .map(trim_slash)
                .unwrap_or(defaults.explorer_tx_url),
            marketplace_asset_url: get("MINT_MARKETPLACE_ASSET_URL")
                .map(trim_slash)
                .unwrap_or(defaults.marketplace_asset_url),
            collection_url: get("MINT_COLLECTION_URL").unwrap_or(defaults.collection_url),
        };

        info!(
            contract = %config.contract_address,
            chain = %config.expected_chain_id,
            provider = config.rpc_url.is_some(),
            "mint client configured"
        );
        Ok(config)
    }

    /// Resolves the contract spec from `abi_path` or the bundled interface.
    pub fn contract_spec(&self) -> Result<ContractSpec> {
        let spec = match &self.abi_path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("reading interface description {}", path.display()))?;
                let interface = InterfaceDescription::from_json(&raw)?;
                ContractSpec::new(self.contract_address, &interface, &EntryPoints::default())?
            }
            None => ContractSpec::bundled(self.contract_address)?,
        };
        Ok(spec)
    }

    pub fn tx_url(&self, tx_hash: &TxHash) -> String {
        format!("{}/{}", self.explorer_tx_url, tx_hash)
    }
}

fn trim_slash(url: String) -> String {
    url.trim_end_matches('/').to_owned()
}
