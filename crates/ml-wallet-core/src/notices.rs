use ml_api_types::Notice;
use tokio::sync::broadcast;
use tracing::{info, warn};

/// Fan-out of user-facing notices. Publishing never blocks and never fails;
/// notices with no listener are dropped.
#[derive(Clone)]
pub struct NoticeBus {
    tx: broadcast::Sender<Notice>,
}

impl NoticeBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notice> {
        self.tx.subscribe()
    }

    pub fn publish(&self, notice: Notice) {
        match &notice {
            Notice::ProviderMissing => warn!("no wallet provider; install one to connect"),
            Notice::NetworkMismatch { expected, actual } => {
                warn!(%expected, %actual, "wallet connected to an unexpected chain")
            }
            Notice::TokenMinted {
                from,
                token_id,
                total,
                asset_url,
            } => info!(%from, %token_id, %total, %asset_url, "token minted"),
        }
        let _ = self.tx.send(notice);
    }
}
