use ml_api_types::TxHash;
use ml_provider::{TxReceipt, WalletProvider};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::ContractError;

/// Consecutive receipt lookups that may fail before the wait gives up.
const MAX_LOOKUP_FAILURES: u32 = 3;

/// A submitted transaction awaiting inclusion.
pub struct PendingTransaction {
    tx_hash: TxHash,
    provider: Arc<dyn WalletProvider>,
    poll_interval: Duration,
}

impl std::fmt::Debug for PendingTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingTransaction")
            .field("tx_hash", &self.tx_hash)
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}

impl PendingTransaction {
    pub fn new(tx_hash: TxHash, provider: Arc<dyn WalletProvider>, poll_interval: Duration) -> Self {
        Self {
            tx_hash,
            provider,
            poll_interval,
        }
    }

    pub fn tx_hash(&self) -> &TxHash {
        &self.tx_hash
    }

    /// Polls for the receipt until the transaction is mined. No timeout is
    /// applied here; a reverted receipt or repeated lookup failures end the wait.
    pub async fn wait(self) -> Result<TxReceipt, ContractError> {
        let mut failures = 0;
        loop {
            match self.provider.transaction_receipt(&self.tx_hash).await {
                Ok(Some(receipt)) if receipt.success => return Ok(receipt),
                Ok(Some(receipt)) => {
                    return Err(ContractError::Confirmation {
                        tx_hash: self.tx_hash,
                        reason: format!(
                            "reverted in block {}",
                            receipt
                                .block_number
                                .map(|n| n.to_string())
                                .unwrap_or_else(|| "?".to_owned())
                        ),
                    });
                }
                Ok(None) => {
                    failures = 0;
                    debug!(tx_hash = %self.tx_hash, "transaction still pending");
                }
                Err(err) => {
                    failures += 1;
                    if failures >= MAX_LOOKUP_FAILURES {
                        return Err(ContractError::Confirmation {
                            tx_hash: self.tx_hash,
                            reason: err.to_string(),
                        });
                    }
                    warn!(tx_hash = %self.tx_hash, "receipt lookup failed ({failures}): {err}");
                }
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::Bytes;
    use ml_api_types::Address;
    use ml_provider::{InMemoryProvider, ProviderError, TransactionRequest};

    async fn submit(provider: &InMemoryProvider) -> anyhow::Result<TxHash> {
        Ok(provider
            .send_transaction(TransactionRequest {
                from: Address::with_last_byte(0xab),
                to: Address::with_last_byte(0xcd),
                data: Bytes::from(vec![0; 4]),
            })
            .await?)
    }

    #[tokio::test]
    async fn resolves_once_mined() -> anyhow::Result<()> {
        let provider = Arc::new(InMemoryProvider::new("4"));
        let tx_hash = submit(&provider).await?;
        let pending = PendingTransaction::new(tx_hash, provider.clone(), Duration::from_millis(2));

        let waiter = tokio::spawn(pending.wait());
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        provider.settle(&tx_hash, true).await;
        let receipt = waiter.await??;
        assert_eq!(receipt.tx_hash, tx_hash);
        Ok(())
    }

    #[tokio::test]
    async fn reverted_receipt_is_a_confirmation_error() -> anyhow::Result<()> {
        let provider = Arc::new(InMemoryProvider::new("4"));
        let tx_hash = submit(&provider).await?;
        provider.settle(&tx_hash, false).await;

        let err = PendingTransaction::new(tx_hash, provider, Duration::from_millis(2))
            .wait()
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ContractError::Confirmation {
                tx_hash,
                reason: "reverted in block 1".to_owned(),
            }
        );
        Ok(())
    }

    #[tokio::test]
    async fn repeated_lookup_failures_end_the_wait() -> anyhow::Result<()> {
        let provider = Arc::new(InMemoryProvider::new("4"));
        let tx_hash = submit(&provider).await?;
        provider
            .fail_receipts(Some(ProviderError::Transport("connection refused".to_owned())))
            .await;

        let err = tokio::time::timeout(
            Duration::from_secs(1),
            PendingTransaction::new(tx_hash, provider, Duration::from_millis(2)).wait(),
        )
        .await?
        .unwrap_err();
        assert_eq!(
            err,
            ContractError::Confirmation {
                tx_hash,
                reason: "provider transport error: connection refused".to_owned(),
            }
        );
        Ok(())
    }
}
