//! Client-side mint orchestration.
//!
//! [`MintOrchestrator`] sequences wallet authorization, the chain check,
//! mint submission and confirmation, and keeps the minted count in step with
//! the contract's events. The presentation layer reads a
//! [`ProjectionSnapshot`] and calls [`MintOrchestrator::connect`] and
//! [`MintOrchestrator::mint`].

pub mod config;
pub mod coordinator;
mod error;
pub mod network;
mod notices;
pub mod projection;
pub mod session;
pub mod subscriber;

use ml_api_types::{Address, ConnectResponse, Notice, ProjectionSnapshot, U256};
use ml_contract::ContractSpec;
use ml_provider::WalletProvider;
use std::sync::Arc;
use tokio::sync::{Mutex, broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

pub use config::MintConfig;
pub use coordinator::{MintCoordinator, MintOutcome, MintReceipt, MintState};
pub use error::MintClientError;
pub use network::NetworkGuard;
pub use notices::NoticeBus;
pub use projection::{CountUpdate, StateProjection};
pub use session::{WalletSession, WalletSessionManager};
pub use subscriber::{EventSubscriber, SubscriptionHandle};

const UPDATE_CHANNEL_CAPACITY: usize = 64;
const NOTICE_CAPACITY: usize = 32;

pub struct MintOrchestrator {
    config: MintConfig,
    spec: ContractSpec,
    sessions: WalletSessionManager,
    guard: NetworkGuard,
    coordinator: MintCoordinator,
    subscriber: EventSubscriber,
    projection: Arc<StateProjection>,
    notices: NoticeBus,
    updates: mpsc::Sender<CountUpdate>,
    subscription: Mutex<Option<SubscriptionHandle>>,
    reconciler: JoinHandle<()>,
}

impl MintOrchestrator {
    /// Must be called inside a tokio runtime; the count reconciler is spawned here.
    pub fn new(config: MintConfig, provider: Arc<dyn WalletProvider>) -> anyhow::Result<Self> {
        let spec = config.contract_spec()?;
        let projection = Arc::new(StateProjection::new());
        let notices = NoticeBus::new(NOTICE_CAPACITY);
        let (updates, updates_rx) = mpsc::channel(UPDATE_CHANNEL_CAPACITY);
        let reconciler = projection::spawn_reconciler(Arc::clone(&projection), updates_rx);

        Ok(Self {
            sessions: WalletSessionManager::new(provider),
            guard: NetworkGuard::new(config.expected_chain_id.clone()),
            coordinator: MintCoordinator::new(
                spec.clone(),
                config.poll_interval,
                Arc::clone(&projection),
            ),
            subscriber: EventSubscriber::new(
                spec.clone(),
                config.poll_interval,
                updates.clone(),
                notices.clone(),
                &config.marketplace_asset_url,
            ),
            spec,
            projection,
            notices,
            updates,
            subscription: Mutex::new(None),
            reconciler,
            config,
        })
    }

    pub fn config(&self) -> &MintConfig {
        &self.config
    }

    pub fn snapshot(&self) -> ProjectionSnapshot {
        self.projection.snapshot()
    }

    pub fn watch(&self) -> watch::Receiver<ProjectionSnapshot> {
        self.projection.subscribe()
    }

    pub fn notices(&self) -> broadcast::Receiver<Notice> {
        self.notices.subscribe()
    }

    pub fn mint_state(&self) -> MintState {
        self.coordinator.state()
    }

    pub async fn subscription_id(&self) -> Option<Uuid> {
        self.subscription.lock().await.as_ref().map(SubscriptionHandle::id)
    }

    /// Silent start-up check. When the wallet already authorized an account,
    /// follows mint events and loads the count.
    pub async fn detect_existing_session(&self) -> Option<Address> {
        let session = self.sessions.detect_existing_session().await?;
        self.projection.set_account(Some(*session.account()));

        let network_ok = self
            .guard
            .validate(session.provider().as_ref(), &self.notices, true)
            .await;
        self.projection.set_network_ok(network_ok);

        self.resubscribe(&session).await;
        if let Err(err) = self.refresh_count().await {
            warn!("initial count query failed: {err}");
        }
        Some(*session.account())
    }

    /// User-triggered authorization, followed by the chain check and a fresh
    /// event subscription.
    pub async fn connect(&self) -> Result<ConnectResponse, MintClientError> {
        let session = match self.sessions.request_session().await {
            Ok(session) => session,
            Err(MintClientError::NoProvider) => {
                self.notices.publish(Notice::ProviderMissing);
                return Err(MintClientError::NoProvider);
            }
            Err(err) => return Err(err),
        };
        self.projection.set_account(Some(*session.account()));

        let network_ok = self
            .guard
            .validate(session.provider().as_ref(), &self.notices, false)
            .await;
        self.projection.set_network_ok(network_ok);

        self.resubscribe(&session).await;
        if let Err(err) = self.refresh_count().await {
            warn!("count query after connect failed: {err}");
        }

        Ok(ConnectResponse {
            account: *session.account(),
            network_ok,
        })
    }

    pub async fn mint(&self) -> Result<MintOutcome, MintClientError> {
        let session = self
            .sessions
            .current()
            .await
            .ok_or(MintClientError::NotConnected)?;
        self.coordinator.mint(&session).await
    }

    /// One-shot count query. The result reaches the projection through the
    /// reconciler and is dropped there if a mint event overtook it.
    pub async fn refresh_count(&self) -> Result<U256, MintClientError> {
        let session = self
            .sessions
            .current()
            .await
            .ok_or(MintClientError::NotConnected)?;

        let ticket = self.projection.query_ticket();
        let proxy = session.bind_contract(&self.spec, self.config.poll_interval)?;
        let value = proxy.total_minted().await?;

        if self
            .updates
            .send(CountUpdate::Queried { value, ticket })
            .await
            .is_err()
        {
            warn!("count reconciler stopped; dropping query result");
        }
        Ok(value)
    }

    pub async fn unsubscribe(&self) {
        let previous = self.subscription.lock().await.take();
        if let Some(handle) = previous {
            handle.unsubscribe().await;
        }
    }

    async fn resubscribe(&self, session: &WalletSession) {
        let mut slot = self.subscription.lock().await;
        if let Some(previous) = slot.take() {
            previous.unsubscribe().await;
        }
        match self.subscriber.subscribe(Arc::clone(session.provider())).await {
            Ok(handle) => {
                info!(subscription = %handle.id(), "following mint events");
                *slot = Some(handle);
            }
            Err(err) => warn!("could not subscribe to mint events: {err}"),
        }
    }
}

impl Drop for MintOrchestrator {
    fn drop(&mut self) {
        self.reconciler.abort();
    }
}
