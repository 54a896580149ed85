use ml_api_types::{ChainId, TxHash};
use ml_contract::ContractError;
use ml_provider::ProviderError;

/// Failures surfaced to the presentation layer. None of them is fatal; each
/// leaves the orchestrator idle and ready for a fresh attempt.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum MintClientError {
    #[error("no wallet provider found; install a browser wallet such as MetaMask")]
    NoProvider,
    #[error("wallet authorization rejected: {0}")]
    AuthorizationRejected(String),
    #[error("wallet is on chain {actual} but this collection lives on chain {expected}")]
    NetworkMismatch { expected: ChainId, actual: ChainId },
    #[error("no wallet connected")]
    NotConnected,
    #[error("mint transaction was not submitted: {0}")]
    TransactionSubmission(String),
    #[error("mint transaction {tx_hash} failed: {reason}")]
    TransactionConfirmation { tx_hash: TxHash, reason: String },
    #[error("total-minted query failed: {0}")]
    Query(String),
    #[error("wallet provider error: {0}")]
    Provider(String),
    #[error("contract interface error: {0}")]
    Interface(String),
    #[error("mint task failed: {0}")]
    Internal(String),
}

impl MintClientError {
    /// Stable identifier for API consumers.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NoProvider => "no_provider",
            Self::AuthorizationRejected(_) => "authorization_rejected",
            Self::NetworkMismatch { .. } => "network_mismatch",
            Self::NotConnected => "not_connected",
            Self::TransactionSubmission(_) => "transaction_submission",
            Self::TransactionConfirmation { .. } => "transaction_confirmation",
            Self::Query(_) => "query",
            Self::Provider(_) => "provider",
            Self::Interface(_) => "interface",
            Self::Internal(_) => "internal",
        }
    }
}

impl From<ProviderError> for MintClientError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::NotPresent => Self::NoProvider,
            ProviderError::UserRejected(message) => Self::AuthorizationRejected(message),
            other => Self::Provider(other.to_string()),
        }
    }
}

impl From<ContractError> for MintClientError {
    fn from(err: ContractError) -> Self {
        match err {
            ContractError::NoProvider => Self::NoProvider,
            ContractError::Interface(message) => Self::Interface(message),
            ContractError::Submission(inner) => Self::TransactionSubmission(inner.to_string()),
            ContractError::Confirmation { tx_hash, reason } => {
                Self::TransactionConfirmation { tx_hash, reason }
            }
            ContractError::Query(inner) => Self::Query(inner.to_string()),
            ContractError::Decode(message) => Self::Query(message),
        }
    }
}
