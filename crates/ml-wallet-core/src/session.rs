use ml_api_types::Address;
use ml_contract::{ContractError, ContractProxy, ContractSpec};
use ml_provider::{ProviderError, WalletProvider};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::MintClientError;

/// The authenticated account together with the provider that signs for it.
#[derive(Clone)]
pub struct WalletSession {
    provider: Arc<dyn WalletProvider>,
    account: Address,
}

impl WalletSession {
    pub fn account(&self) -> &Address {
        &self.account
    }

    pub fn provider(&self) -> &Arc<dyn WalletProvider> {
        &self.provider
    }

    /// Binds a fresh contract handle to this session's signer.
    pub fn bind_contract(
        &self,
        spec: &ContractSpec,
        poll_interval: Duration,
    ) -> Result<ContractProxy, ContractError> {
        ContractProxy::bind(spec, Arc::clone(&self.provider), self.account, poll_interval)
    }
}

pub struct WalletSessionManager {
    provider: Arc<dyn WalletProvider>,
    current: RwLock<Option<WalletSession>>,
}

impl WalletSessionManager {
    pub fn new(provider: Arc<dyn WalletProvider>) -> Self {
        Self {
            provider,
            current: RwLock::new(None),
        }
    }

    pub async fn current(&self) -> Option<WalletSession> {
        self.current.read().await.clone()
    }

    /// Looks for an account the wallet already authorized, without prompting.
    /// Never fails: without a provider the client stays in read-only mode.
    pub async fn detect_existing_session(&self) -> Option<WalletSession> {
        if !self.provider.is_present() {
            warn!("no wallet provider present; running read-only");
            return None;
        }

        let accounts = match self.provider.authorized_accounts().await {
            Ok(accounts) => accounts,
            Err(err) => {
                warn!("could not read authorized accounts: {err}");
                return None;
            }
        };

        let Some(account) = accounts.into_iter().next() else {
            info!("no authorized account found");
            return None;
        };

        info!(%account, "found an authorized account");
        Some(self.establish(account).await)
    }

    /// Prompts the wallet for authorization. A rejection is final for this
    /// attempt; nothing is retried.
    pub async fn request_session(&self) -> Result<WalletSession, MintClientError> {
        if !self.provider.is_present() {
            return Err(MintClientError::NoProvider);
        }

        let accounts = self.provider.request_accounts().await.map_err(|err| {
            warn!("account request failed: {err}");
            match err {
                ProviderError::NotPresent => MintClientError::NoProvider,
                ProviderError::UserRejected(message) => MintClientError::AuthorizationRejected(message),
                other => MintClientError::Provider(other.to_string()),
            }
        })?;

        let account = accounts.into_iter().next().ok_or_else(|| {
            MintClientError::AuthorizationRejected("wallet returned no accounts".to_owned())
        })?;

        info!(%account, "connected");
        Ok(self.establish(account).await)
    }

    async fn establish(&self, account: Address) -> WalletSession {
        let session = WalletSession {
            provider: Arc::clone(&self.provider),
            account,
        };
        *self.current.write().await = Some(session.clone());
        session
    }
}
