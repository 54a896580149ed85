use serde::{Deserialize, Serialize};
use std::fmt;

pub use alloy_primitives::{Address, TxHash, U256};

/// Network id as the wallet reports it (`net_version`, a decimal string).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct ChainId(pub String);

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Payload of the contract's mint-completed event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MintCompleted {
    pub from: Address,
    pub token_id: U256,
    pub new_total_count: U256,
}

/// Read model consumed by the presentation layer.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProjectionSnapshot {
    pub account: Option<Address>,
    pub network_ok: bool,
    pub minting: bool,
    pub minted_count: U256,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MintConfigResponse {
    pub contract_address: Address,
    pub expected_chain_id: ChainId,
    pub mint_cap: u64,
    pub collection_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectResponse {
    pub account: Address,
    pub network_ok: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MintResponse {
    Confirmed {
        tx_hash: TxHash,
        block_number: Option<u64>,
        explorer_url: String,
    },
    AlreadyInFlight,
}

/// Out-of-band messages for the user (alerts in a browser UI).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notice {
    ProviderMissing,
    NetworkMismatch {
        expected: ChainId,
        actual: ChainId,
    },
    TokenMinted {
        from: Address,
        token_id: U256,
        total: U256,
        asset_url: String,
    },
}
