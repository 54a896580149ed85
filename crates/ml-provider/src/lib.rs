use alloy_primitives::{B256, Bytes};
use async_trait::async_trait;
use ml_api_types::{Address, ChainId, TxHash};
use std::sync::Arc;

mod memory;

pub use memory::InMemoryProvider;

/// EIP-1193 error code for a request the user declined in the wallet.
pub const USER_REJECTED_CODE: i64 = 4001;

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("no wallet provider is present")]
    NotPresent,
    #[error("request rejected by user: {0}")]
    UserRejected(String),
    #[error("provider rpc error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("provider transport error: {0}")]
    Transport(String),
    #[error("invalid provider response: {0}")]
    InvalidResponse(String),
}

impl ProviderError {
    pub fn from_rpc(code: i64, message: impl Into<String>) -> Self {
        let message = message.into();
        if code == USER_REJECTED_CODE {
            Self::UserRejected(message)
        } else {
            Self::Rpc { code, message }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRequest {
    pub from: Address,
    pub to: Address,
    pub data: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRequest {
    pub to: Address,
    pub data: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxReceipt {
    pub tx_hash: TxHash,
    pub block_number: Option<u64>,
    pub success: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Log {
    pub address: Address,
    pub topics: Vec<B256>,
    pub data: Bytes,
    pub block_number: u64,
    pub tx_hash: Option<TxHash>,
}

/// Logs emitted by one contract under one event signature, inclusive block range.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFilter {
    pub address: Address,
    pub topic0: B256,
    pub from_block: u64,
    pub to_block: u64,
}

#[async_trait]
pub trait WalletProvider: Send + Sync {
    fn is_present(&self) -> bool;
    async fn authorized_accounts(&self) -> Result<Vec<Address>, ProviderError>;
    async fn request_accounts(&self) -> Result<Vec<Address>, ProviderError>;
    async fn current_chain_id(&self) -> Result<ChainId, ProviderError>;
    async fn send_transaction(&self, req: TransactionRequest) -> Result<TxHash, ProviderError>;
    async fn call(&self, req: CallRequest) -> Result<Bytes, ProviderError>;
    async fn transaction_receipt(&self, tx_hash: &TxHash) -> Result<Option<TxReceipt>, ProviderError>;
    async fn block_number(&self) -> Result<u64, ProviderError>;
    async fn logs(&self, filter: &LogFilter) -> Result<Vec<Log>, ProviderError>;
}

/// Signing capability for one account, derived from a present provider.
#[derive(Clone)]
pub struct Signer {
    provider: Arc<dyn WalletProvider>,
    account: Address,
}

impl Signer {
    pub fn new(provider: Arc<dyn WalletProvider>, account: Address) -> Result<Self, ProviderError> {
        if !provider.is_present() {
            return Err(ProviderError::NotPresent);
        }
        Ok(Self { provider, account })
    }

    pub fn account(&self) -> &Address {
        &self.account
    }

    pub fn provider(&self) -> &Arc<dyn WalletProvider> {
        &self.provider
    }
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer").field("account", &self.account).finish()
    }
}
