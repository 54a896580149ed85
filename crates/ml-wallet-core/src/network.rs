use ml_api_types::{ChainId, Notice};
use ml_provider::WalletProvider;
use tracing::{info, warn};

use crate::{MintClientError, NoticeBus};

/// Advisory check of the wallet's chain. A mismatch is reported, never
/// enforced: calls on the wrong chain fail on their own.
pub struct NetworkGuard {
    expected: ChainId,
}

impl NetworkGuard {
    pub fn new(expected: ChainId) -> Self {
        Self { expected }
    }

    pub fn check(&self, actual: &ChainId) -> Result<(), MintClientError> {
        if actual == &self.expected {
            Ok(())
        } else {
            Err(MintClientError::NetworkMismatch {
                expected: self.expected.clone(),
                actual: actual.clone(),
            })
        }
    }

    /// Returns whether the wallet is on the expected chain. A mismatch is
    /// published as a notice unless `quiet`.
    pub async fn validate(&self, provider: &dyn WalletProvider, notices: &NoticeBus, quiet: bool) -> bool {
        let actual = match provider.current_chain_id().await {
            Ok(actual) => actual,
            Err(err) => {
                warn!("could not read chain id: {err}");
                return false;
            }
        };

        match self.check(&actual) {
            Ok(()) => {
                info!(chain = %actual, "wallet on expected chain");
                true
            }
            Err(MintClientError::NetworkMismatch { expected, actual }) => {
                if !quiet {
                    notices.publish(Notice::NetworkMismatch { expected, actual });
                }
                false
            }
            Err(err) => {
                warn!("{err}");
                false
            }
        }
    }
}
