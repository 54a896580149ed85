//! The read model handed to the presentation layer.
//!
//! The minted count has two writers: queries (pull) and contract events
//! (push). Both carry absolute values and are applied by a single reconciler
//! task. A query result is stale, and dropped, if any event was applied after
//! the query was issued.

use ml_api_types::{Address, ProjectionSnapshot, U256};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::debug;

/// Count of applied events at the moment a query was issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryTicket(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountUpdate {
    Queried { value: U256, ticket: QueryTicket },
    Observed { value: U256 },
}

pub struct StateProjection {
    snapshot: watch::Sender<ProjectionSnapshot>,
    observed: AtomicU64,
}

impl Default for StateProjection {
    fn default() -> Self {
        Self::new()
    }
}

impl StateProjection {
    pub fn new() -> Self {
        let (snapshot, _) = watch::channel(ProjectionSnapshot::default());
        Self {
            snapshot,
            observed: AtomicU64::new(0),
        }
    }

    pub fn snapshot(&self) -> ProjectionSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ProjectionSnapshot> {
        self.snapshot.subscribe()
    }

    pub fn set_account(&self, account: Option<Address>) {
        self.snapshot.send_if_modified(|s| replace(&mut s.account, account));
    }

    pub fn set_network_ok(&self, network_ok: bool) {
        self.snapshot.send_if_modified(|s| replace(&mut s.network_ok, network_ok));
    }

    pub fn set_minting(&self, minting: bool) {
        self.snapshot.send_if_modified(|s| replace(&mut s.minting, minting));
    }

    pub fn query_ticket(&self) -> QueryTicket {
        QueryTicket(self.observed.load(Ordering::SeqCst))
    }

    /// Applies a count update; returns false when a stale query was dropped.
    pub fn apply(&self, update: CountUpdate) -> bool {
        let mut applied = true;
        self.snapshot.send_if_modified(|s| match update {
            CountUpdate::Observed { value } => {
                self.observed.fetch_add(1, Ordering::SeqCst);
                replace(&mut s.minted_count, value)
            }
            CountUpdate::Queried { value, ticket } => {
                if self.observed.load(Ordering::SeqCst) != ticket.0 {
                    applied = false;
                    return false;
                }
                replace(&mut s.minted_count, value)
            }
        });
        applied
    }
}

fn replace<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        return false;
    }
    *slot = value;
    true
}

/// Drains count updates into the projection until every sender is gone.
pub fn spawn_reconciler(
    projection: Arc<StateProjection>,
    mut updates: mpsc::Receiver<CountUpdate>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(update) = updates.recv().await {
            if !projection.apply(update) {
                debug!(?update, "dropped count query overtaken by a mint event");
            }
        }
    })
}
