//! Lifecycle of a single mint attempt.
//!
//! `Idle → Submitting → Pending → Confirmed` on success, `Submitting → Failed`
//! or `Pending → Failed` otherwise. Confirmed and Failed are reported to the
//! caller and the coordinator drops straight back to `Idle`.
//!
//! The attempt runs on its own task. A caller that stops waiting does not end
//! it: the transaction is already with the wallet, so the coordinator stays
//! busy until the wait resolves.

use ml_api_types::TxHash;
use ml_contract::ContractSpec;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, SystemTime};
use tracing::{info, warn};
use uuid::Uuid;

use crate::projection::StateProjection;
use crate::session::WalletSession;
use crate::MintClientError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MintState {
    Idle,
    Submitting { attempt: Uuid },
    Pending { attempt: Uuid, tx_hash: TxHash },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MintReceipt {
    pub tx_hash: TxHash,
    pub block_number: Option<u64>,
    pub submitted_at: SystemTime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MintOutcome {
    Confirmed(MintReceipt),
    /// Another attempt was already open; this trigger did nothing.
    AlreadyInFlight,
}

pub struct MintCoordinator {
    spec: ContractSpec,
    poll_interval: Duration,
    projection: Arc<StateProjection>,
    state: Arc<Mutex<MintState>>,
}

impl MintCoordinator {
    pub fn new(spec: ContractSpec, poll_interval: Duration, projection: Arc<StateProjection>) -> Self {
        Self {
            spec,
            poll_interval,
            projection,
            state: Arc::new(Mutex::new(MintState::Idle)),
        }
    }

    pub fn state(&self) -> MintState {
        lock(&self.state).clone()
    }

    /// Starts an attempt and waits for its result. Failures come back as
    /// errors after the coordinator has returned to `Idle`.
    pub async fn mint(&self, session: &WalletSession) -> Result<MintOutcome, MintClientError> {
        let Some(attempt) = self.begin() else {
            info!("mint already in flight; ignoring trigger");
            return Ok(MintOutcome::AlreadyInFlight);
        };

        let task = tokio::spawn(attempt.run(session.clone(), self.spec.clone(), self.poll_interval));
        task.await.map_err(|err| MintClientError::Internal(err.to_string()))?
    }

    fn begin(&self) -> Option<Attempt> {
        let mut state = lock(&self.state);
        if *state != MintState::Idle {
            return None;
        }
        let id = Uuid::new_v4();
        *state = MintState::Submitting { attempt: id };
        Some(Attempt {
            id,
            state: Arc::clone(&self.state),
            projection: Arc::clone(&self.projection),
        })
    }
}

fn lock(state: &Mutex<MintState>) -> MutexGuard<'_, MintState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// An open attempt. Dropping it, on any path, returns the coordinator to
/// `Idle` and clears the minting flag.
struct Attempt {
    id: Uuid,
    state: Arc<Mutex<MintState>>,
    projection: Arc<StateProjection>,
}

impl Attempt {
    async fn run(
        self,
        session: WalletSession,
        spec: ContractSpec,
        poll_interval: Duration,
    ) -> Result<MintOutcome, MintClientError> {
        let submitted_at = SystemTime::now();

        info!(attempt = %self.id, account = %session.account(), "requesting wallet signature for mint");
        let pending = match session.bind_contract(&spec, poll_interval) {
            Ok(proxy) => proxy.mint().await,
            Err(err) => Err(err),
        };
        let pending = pending.map_err(|err| {
            warn!(attempt = %self.id, "mint submission failed: {err}");
            MintClientError::from(err)
        })?;

        self.pending(*pending.tx_hash());
        info!(attempt = %self.id, tx_hash = %pending.tx_hash(), "mining");

        let receipt = pending.wait().await.map_err(|err| {
            warn!(attempt = %self.id, "mint failed to confirm: {err}");
            MintClientError::from(err)
        })?;

        info!(
            attempt = %self.id,
            tx_hash = %receipt.tx_hash,
            block = ?receipt.block_number,
            "mint confirmed"
        );
        Ok(MintOutcome::Confirmed(MintReceipt {
            tx_hash: receipt.tx_hash,
            block_number: receipt.block_number,
            submitted_at,
        }))
    }

    fn pending(&self, tx_hash: TxHash) {
        *lock(&self.state) = MintState::Pending {
            attempt: self.id,
            tx_hash,
        };
        self.projection.set_minting(true);
    }
}

impl Drop for Attempt {
    fn drop(&mut self) {
        *lock(&self.state) = MintState::Idle;
        self.projection.set_minting(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::WalletSessionManager;
    use ml_api_types::Address;
    use ml_provider::{InMemoryProvider, ProviderError};

    const CONTRACT: &str = "0x81A83C526964470583450F6474EB631b0981ECCA";

    struct Fixture {
        provider: Arc<InMemoryProvider>,
        projection: Arc<StateProjection>,
        coordinator: Arc<MintCoordinator>,
        session: WalletSession,
    }

    async fn fixture() -> anyhow::Result<Fixture> {
        let provider = Arc::new(InMemoryProvider::new("4"));
        provider.set_authorized(vec![Address::with_last_byte(0xab)]).await;
        let session = WalletSessionManager::new(provider.clone())
            .detect_existing_session()
            .await
            .expect("authorized account");
        let projection = Arc::new(StateProjection::new());
        let coordinator = Arc::new(MintCoordinator::new(
            ContractSpec::bundled(CONTRACT.parse()?)?,
            Duration::from_millis(2),
            projection.clone(),
        ));
        Ok(Fixture {
            provider,
            projection,
            coordinator,
            session,
        })
    }

    impl Fixture {
        fn spawn_mint(&self) -> tokio::task::JoinHandle<Result<MintOutcome, MintClientError>> {
            let coordinator = self.coordinator.clone();
            let session = self.session.clone();
            tokio::spawn(async move { coordinator.mint(&session).await })
        }
    }

    async fn wait_for_pending(coordinator: &MintCoordinator) -> anyhow::Result<TxHash> {
        tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                if let MintState::Pending { tx_hash, .. } = coordinator.state() {
                    return tx_hash;
                }
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .map_err(Into::into)
    }

    async fn wait_for_idle(coordinator: &MintCoordinator) -> anyhow::Result<()> {
        tokio::time::timeout(Duration::from_secs(1), async {
            while coordinator.state() != MintState::Idle {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .map_err(Into::into)
    }

    #[tokio::test]
    async fn confirmed_mint_resets_to_idle() -> anyhow::Result<()> {
        let f = fixture().await?;
        let run = f.spawn_mint();

        let tx_hash = wait_for_pending(&f.coordinator).await?;
        assert!(f.projection.snapshot().minting);

        f.provider.settle(&tx_hash, true).await;
        let receipt = match run.await?? {
            MintOutcome::Confirmed(receipt) => receipt,
            other => panic!("expected a confirmed mint, got {other:?}"),
        };
        assert_eq!(receipt.tx_hash, tx_hash);
        assert_eq!(f.coordinator.state(), MintState::Idle);
        assert!(!f.projection.snapshot().minting);
        Ok(())
    }

    #[tokio::test]
    async fn triggers_while_pending_do_not_submit_again() -> anyhow::Result<()> {
        let f = fixture().await?;
        let run = f.spawn_mint();
        let tx_hash = wait_for_pending(&f.coordinator).await?;

        for _ in 0..5 {
            assert_eq!(
                f.coordinator.mint(&f.session).await?,
                MintOutcome::AlreadyInFlight
            );
        }
        assert_eq!(f.provider.sent_transactions().await.len(), 1);

        f.provider.settle(&tx_hash, true).await;
        run.await??;
        Ok(())
    }

    #[tokio::test]
    async fn triggers_while_submitting_do_not_submit_again() -> anyhow::Result<()> {
        let f = fixture().await?;
        f.provider.hold_sends().await;
        let run = f.spawn_mint();

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(matches!(f.coordinator.state(), MintState::Submitting { .. }));
        assert!(!f.projection.snapshot().minting);
        assert_eq!(
            f.coordinator.mint(&f.session).await?,
            MintOutcome::AlreadyInFlight
        );

        f.provider.release_sends().await;
        let tx_hash = wait_for_pending(&f.coordinator).await?;
        f.provider.settle(&tx_hash, true).await;
        run.await??;
        assert_eq!(f.provider.sent_transactions().await.len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn submission_failure_is_returned_and_resets() -> anyhow::Result<()> {
        let f = fixture().await?;
        f.provider
            .fail_sends(Some(ProviderError::UserRejected("User denied transaction signature".to_owned())))
            .await;

        let err = f.coordinator.mint(&f.session).await.unwrap_err();
        assert_eq!(err.kind(), "transaction_submission");
        assert_eq!(f.coordinator.state(), MintState::Idle);
        assert!(!f.projection.snapshot().minting);

        f.provider.fail_sends(None).await;
        let retry = f.spawn_mint();
        let tx_hash = wait_for_pending(&f.coordinator).await?;
        f.provider.settle(&tx_hash, true).await;
        assert!(matches!(retry.await??, MintOutcome::Confirmed(_)));
        Ok(())
    }

    #[tokio::test]
    async fn reverted_mint_is_a_confirmation_error() -> anyhow::Result<()> {
        let f = fixture().await?;
        let run = f.spawn_mint();

        let tx_hash = wait_for_pending(&f.coordinator).await?;
        f.provider.settle(&tx_hash, false).await;

        let err = run.await?.unwrap_err();
        assert_eq!(
            err,
            MintClientError::TransactionConfirmation {
                tx_hash,
                reason: "reverted in block 1".to_owned(),
            }
        );
        assert_eq!(f.coordinator.state(), MintState::Idle);
        assert!(!f.projection.snapshot().minting);
        Ok(())
    }

    #[tokio::test]
    async fn lost_receipts_fail_the_attempt() -> anyhow::Result<()> {
        let f = fixture().await?;
        let run = f.spawn_mint();

        let tx_hash = wait_for_pending(&f.coordinator).await?;
        f.provider
            .fail_receipts(Some(ProviderError::Transport("connection refused".to_owned())))
            .await;

        let err = tokio::time::timeout(Duration::from_secs(1), run).await??.unwrap_err();
        assert_eq!(err.kind(), "transaction_confirmation");
        assert!(matches!(
            err,
            MintClientError::TransactionConfirmation { tx_hash: failed, .. } if failed == tx_hash
        ));
        assert_eq!(f.coordinator.state(), MintState::Idle);
        assert!(!f.projection.snapshot().minting);
        Ok(())
    }

    #[tokio::test]
    async fn abandoned_caller_leaves_the_attempt_open() -> anyhow::Result<()> {
        let f = fixture().await?;
        let run = f.spawn_mint();
        let tx_hash = wait_for_pending(&f.coordinator).await?;

        run.abort();
        let _ = run.await;
        assert!(matches!(f.coordinator.state(), MintState::Pending { .. }));
        assert!(f.projection.snapshot().minting);
        assert_eq!(
            f.coordinator.mint(&f.session).await?,
            MintOutcome::AlreadyInFlight
        );
        assert_eq!(f.provider.sent_transactions().await.len(), 1);

        f.provider.settle(&tx_hash, true).await;
        wait_for_idle(&f.coordinator).await?;
        assert!(!f.projection.snapshot().minting);
        Ok(())
    }
}
