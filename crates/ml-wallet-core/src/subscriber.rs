use ml_api_types::Notice;
use ml_contract::ContractSpec;
use ml_provider::{Log, WalletProvider};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::projection::CountUpdate;
use crate::{MintClientError, NoticeBus};

/// Widest block range asked of `logs` in one request; hosted nodes refuse
/// larger ones.
pub const MAX_LOG_RANGE: u64 = 1_000;

/// Follows the contract's mint event and forwards every new total, whoever
/// minted, to the projection reconciler.
pub struct EventSubscriber {
    spec: ContractSpec,
    poll_interval: Duration,
    updates: mpsc::Sender<CountUpdate>,
    notices: NoticeBus,
    asset_url_base: String,
}

impl EventSubscriber {
    pub fn new(
        spec: ContractSpec,
        poll_interval: Duration,
        updates: mpsc::Sender<CountUpdate>,
        notices: NoticeBus,
        marketplace_asset_url: &str,
    ) -> Self {
        let asset_url_base = format!("{}/{}", marketplace_asset_url, spec.address());
        Self {
            spec,
            poll_interval,
            updates,
            notices,
            asset_url_base,
        }
    }

    /// Starts following events emitted after the current block.
    pub async fn subscribe(
        &self,
        provider: Arc<dyn WalletProvider>,
    ) -> Result<SubscriptionHandle, MintClientError> {
        let start = provider.block_number().await?;
        let id = Uuid::new_v4();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let follower = Follower {
            id,
            spec: self.spec.clone(),
            provider,
            poll_interval: self.poll_interval,
            updates: self.updates.clone(),
            notices: self.notices.clone(),
            asset_url_base: self.asset_url_base.clone(),
            next_block: start + 1,
        };
        let task = tokio::spawn(follower.run(shutdown_rx));
        info!(subscription = %id, from_block = start + 1, "subscribed to mint events");

        Ok(SubscriptionHandle {
            id,
            shutdown: Some(shutdown_tx),
            task: Some(task),
        })
    }
}

/// Owns a running subscription. Dropping the handle stops it.
pub struct SubscriptionHandle {
    id: Uuid,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl SubscriptionHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stops the subscription and waits for its task to exit.
    pub async fn unsubscribe(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        info!(subscription = %self.id, "unsubscribed from mint events");
    }
}

impl Drop for SubscriptionHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

struct Follower {
    id: Uuid,
    spec: ContractSpec,
    provider: Arc<dyn WalletProvider>,
    poll_interval: Duration,
    updates: mpsc::Sender<CountUpdate>,
    notices: NoticeBus,
    asset_url_base: String,
    next_block: u64,
}

impl Follower {
    async fn run(mut self, mut shutdown: oneshot::Receiver<()>) {
        loop {
            if !self.poll().await {
                debug!(subscription = %self.id, "projection gone; stopping");
                return;
            }
            tokio::select! {
                _ = &mut shutdown => return,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    /// One polling round, walking from `next_block` to the head one window
    /// at a time. Returns false once the update channel is closed.
    async fn poll(&mut self) -> bool {
        let latest = match self.provider.block_number().await {
            Ok(latest) => latest,
            Err(err) => {
                warn!(subscription = %self.id, "block number lookup failed: {err}");
                return true;
            }
        };

        while self.next_block <= latest {
            let to_block = latest.min(self.next_block.saturating_add(MAX_LOG_RANGE - 1));
            let filter = self.spec.mint_event_filter(self.next_block, to_block);
            let logs = match self.provider.logs(&filter).await {
                Ok(logs) => logs,
                Err(err) => {
                    warn!(
                        subscription = %self.id,
                        from_block = self.next_block,
                        to_block,
                        "mint event lookup failed: {err}"
                    );
                    return true;
                }
            };

            for log in logs {
                if !self.deliver(&log).await {
                    return false;
                }
            }
            self.next_block = to_block + 1;
        }
        true
    }

    async fn deliver(&self, log: &Log) -> bool {
        let event = match self.spec.decode_mint_event(log) {
            Ok(event) => event,
            Err(err) => {
                warn!(subscription = %self.id, block = log.block_number, "skipping mint event: {err}");
                return true;
            }
        };

        if self
            .updates
            .send(CountUpdate::Observed {
                value: event.new_total_count,
            })
            .await
            .is_err()
        {
            return false;
        }

        self.notices.publish(Notice::TokenMinted {
            asset_url: format!("{}/{}", self.asset_url_base, event.token_id),
            from: event.from,
            token_id: event.token_id,
            total: event.new_total_count,
        });
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ml_api_types::{Address, MintCompleted, U256};
    use ml_provider::{InMemoryProvider, ProviderError};

    const CONTRACT: &str = "0x81A83C526964470583450F6474EB631b0981ECCA";

    fn mint_event(token_id: u64, total: u64) -> MintCompleted {
        MintCompleted {
            from: Address::with_last_byte(0xbc),
            token_id: U256::from(token_id),
            new_total_count: U256::from(total),
        }
    }

    fn subscriber(spec: &ContractSpec) -> (EventSubscriber, mpsc::Receiver<CountUpdate>, NoticeBus) {
        let (tx, rx) = mpsc::channel(16);
        let notices = NoticeBus::new(16);
        let subscriber = EventSubscriber::new(
            spec.clone(),
            Duration::from_millis(5),
            tx,
            notices.clone(),
            "https://testnets.opensea.io/assets",
        );
        (subscriber, rx, notices)
    }

    #[tokio::test]
    async fn forwards_new_totals_and_announces_tokens() -> anyhow::Result<()> {
        let provider = Arc::new(InMemoryProvider::new("4"));
        let spec = ContractSpec::bundled(CONTRACT.parse()?)?;
        let (subscriber, mut updates, notices) = subscriber(&spec);
        let mut notice_rx = notices.subscribe();

        let handle = subscriber.subscribe(provider.clone()).await?;
        provider.emit_log(spec.encode_mint_event(&mint_event(7, 43))?).await;

        let update = tokio::time::timeout(Duration::from_secs(1), updates.recv()).await?;
        assert_eq!(update, Some(CountUpdate::Observed { value: U256::from(43) }));

        let notice = tokio::time::timeout(Duration::from_secs(1), notice_rx.recv()).await??;
        assert_eq!(
            notice,
            Notice::TokenMinted {
                from: Address::with_last_byte(0xbc),
                token_id: U256::from(7),
                total: U256::from(43),
                asset_url: format!("https://testnets.opensea.io/assets/{}/7", spec.address()),
            }
        );

        handle.unsubscribe().await;
        Ok(())
    }

    #[tokio::test]
    async fn history_before_subscribing_is_ignored() -> anyhow::Result<()> {
        let provider = Arc::new(InMemoryProvider::new("4"));
        let spec = ContractSpec::bundled(CONTRACT.parse()?)?;
        provider.emit_log(spec.encode_mint_event(&mint_event(1, 1))?).await;

        let (subscriber, mut updates, _notices) = subscriber(&spec);
        let handle = subscriber.subscribe(provider.clone()).await?;
        provider.emit_log(spec.encode_mint_event(&mint_event(2, 2))?).await;

        let update = tokio::time::timeout(Duration::from_secs(1), updates.recv()).await?;
        assert_eq!(update, Some(CountUpdate::Observed { value: U256::from(2) }));
        handle.unsubscribe().await;
        Ok(())
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() -> anyhow::Result<()> {
        let provider = Arc::new(InMemoryProvider::new("4"));
        let spec = ContractSpec::bundled(CONTRACT.parse()?)?;
        let (subscriber, mut updates, _notices) = subscriber(&spec);

        let handle = subscriber.subscribe(provider.clone()).await?;
        assert!(handle.is_active());
        handle.unsubscribe().await;

        provider.emit_log(spec.encode_mint_event(&mint_event(3, 3))?).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(updates.try_recv().is_err());
        Ok(())
    }

    #[tokio::test]
    async fn subscribe_without_provider_fails() -> anyhow::Result<()> {
        let spec = ContractSpec::bundled(CONTRACT.parse()?)?;
        let (subscriber, _updates, _notices) = subscriber(&spec);
        let err = subscriber
            .subscribe(Arc::new(InMemoryProvider::absent()))
            .await
            .err();
        assert_eq!(err, Some(MintClientError::NoProvider));
        Ok(())
    }

    #[tokio::test]
    async fn catches_up_in_bounded_windows_after_an_outage() -> anyhow::Result<()> {
        let provider = Arc::new(InMemoryProvider::new("4"));
        provider.limit_log_range(MAX_LOG_RANGE).await;
        let spec = ContractSpec::bundled(CONTRACT.parse()?)?;
        let (subscriber, mut updates, _notices) = subscriber(&spec);
        let handle = subscriber.subscribe(provider.clone()).await?;

        provider
            .fail_logs(Some(ProviderError::Transport("connection reset".to_owned())))
            .await;
        provider.advance_blocks(2 * MAX_LOG_RANGE + 5).await;
        provider.emit_log(spec.encode_mint_event(&mint_event(8, 44))?).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(updates.try_recv().is_err());

        provider.fail_logs(None).await;
        let update = tokio::time::timeout(Duration::from_secs(1), updates.recv()).await?;
        assert_eq!(update, Some(CountUpdate::Observed { value: U256::from(44) }));
        assert!(handle.is_active());
        handle.unsubscribe().await;
        Ok(())
    }
}
