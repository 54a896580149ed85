use alloy_primitives::Bytes;
use async_trait::async_trait;
use ml_api_types::{Address, ChainId, TxHash};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, Notify};

use crate::{
    CallRequest, Log, LogFilter, ProviderError, TransactionRequest, TxReceipt, WalletProvider,
};

/// Scriptable in-process provider. Transactions stay pending until `settle` is called,
/// and calls or sends can be held open to exercise interleavings.
pub struct InMemoryProvider {
    present: bool,
    state: Mutex<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    authorized: Vec<Address>,
    requestable: Vec<Address>,
    reject_requests: bool,
    request_count: usize,
    chain_id: ChainId,
    call_result: Bytes,
    call_failure: Option<ProviderError>,
    call_gate: Option<Arc<Notify>>,
    send_failure: Option<ProviderError>,
    send_gate: Option<Arc<Notify>>,
    receipt_failure: Option<ProviderError>,
    log_failure: Option<ProviderError>,
    max_log_range: Option<u64>,
    sent: Vec<TransactionRequest>,
    receipts: HashMap<TxHash, TxReceipt>,
    logs: Vec<Log>,
    block_number: u64,
}

impl InMemoryProvider {
    pub fn new(chain_id: &str) -> Self {
        Self {
            present: true,
            state: Mutex::new(MemoryState {
                chain_id: ChainId(chain_id.to_owned()),
                call_result: Bytes::from(vec![0; 32]),
                ..MemoryState::default()
            }),
        }
    }

    pub fn absent() -> Self {
        Self {
            present: false,
            state: Mutex::new(MemoryState::default()),
        }
    }

    pub async fn set_authorized(&self, accounts: Vec<Address>) {
        self.state.lock().await.authorized = accounts;
    }

    /// Accounts returned once the user approves a `request_accounts` prompt.
    pub async fn set_requestable(&self, accounts: Vec<Address>) {
        self.state.lock().await.requestable = accounts;
    }

    pub async fn reject_requests(&self, reject: bool) {
        self.state.lock().await.reject_requests = reject;
    }

    pub async fn request_count(&self) -> usize {
        self.state.lock().await.request_count
    }

    pub async fn set_call_result(&self, data: Bytes) {
        self.state.lock().await.call_result = data;
    }

    pub async fn fail_calls(&self, err: Option<ProviderError>) {
        self.state.lock().await.call_failure = err;
    }

    pub async fn fail_sends(&self, err: Option<ProviderError>) {
        self.state.lock().await.send_failure = err;
    }

    pub async fn fail_receipts(&self, err: Option<ProviderError>) {
        self.state.lock().await.receipt_failure = err;
    }

    pub async fn fail_logs(&self, err: Option<ProviderError>) {
        self.state.lock().await.log_failure = err;
    }

    /// Rejects `logs` queries spanning more than `blocks` blocks, as hosted nodes do.
    pub async fn limit_log_range(&self, blocks: u64) {
        self.state.lock().await.max_log_range = Some(blocks);
    }

    /// Holds every `call` until `release_calls`.
    pub async fn hold_calls(&self) {
        self.state.lock().await.call_gate = Some(Arc::new(Notify::new()));
    }

    pub async fn release_calls(&self) {
        if let Some(gate) = self.state.lock().await.call_gate.take() {
            gate.notify_waiters();
            gate.notify_one();
        }
    }

    /// Holds every `send_transaction` until `release_sends`.
    pub async fn hold_sends(&self) {
        self.state.lock().await.send_gate = Some(Arc::new(Notify::new()));
    }

    pub async fn release_sends(&self) {
        if let Some(gate) = self.state.lock().await.send_gate.take() {
            gate.notify_waiters();
            gate.notify_one();
        }
    }

    pub async fn sent_transactions(&self) -> Vec<TransactionRequest> {
        self.state.lock().await.sent.clone()
    }

    /// Mines a pending transaction into a new block.
    pub async fn settle(&self, tx_hash: &TxHash, success: bool) {
        let mut state = self.state.lock().await;
        state.block_number += 1;
        let block_number = state.block_number;
        state.receipts.insert(
            *tx_hash,
            TxReceipt {
                tx_hash: *tx_hash,
                block_number: Some(block_number),
                success,
            },
        );
    }

    /// Appends a log in a new block.
    pub async fn emit_log(&self, mut log: Log) {
        let mut state = self.state.lock().await;
        state.block_number += 1;
        log.block_number = state.block_number;
        state.logs.push(log);
    }

    /// Mines `blocks` empty blocks.
    pub async fn advance_blocks(&self, blocks: u64) {
        self.state.lock().await.block_number += blocks;
    }

    fn ensure_present(&self) -> Result<(), ProviderError> {
        if self.present {
            Ok(())
        } else {
            Err(ProviderError::NotPresent)
        }
    }
}

#[async_trait]
impl WalletProvider for InMemoryProvider {
    fn is_present(&self) -> bool {
        self.present
    }

    async fn authorized_accounts(&self) -> Result<Vec<Address>, ProviderError> {
        self.ensure_present()?;
        Ok(self.state.lock().await.authorized.clone())
    }

    async fn request_accounts(&self) -> Result<Vec<Address>, ProviderError> {
        self.ensure_present()?;
        let mut state = self.state.lock().await;
        state.request_count += 1;
        if state.reject_requests {
            return Err(ProviderError::UserRejected(
                "User denied account authorization".to_owned(),
            ));
        }
        let approved = state.requestable.clone();
        for account in &approved {
            if !state.authorized.contains(account) {
                state.authorized.push(*account);
            }
        }
        Ok(approved)
    }

    async fn current_chain_id(&self) -> Result<ChainId, ProviderError> {
        self.ensure_present()?;
        Ok(self.state.lock().await.chain_id.clone())
    }

    async fn send_transaction(&self, req: TransactionRequest) -> Result<TxHash, ProviderError> {
        self.ensure_present()?;
        let gate = self.state.lock().await.send_gate.clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let mut state = self.state.lock().await;
        if let Some(err) = state.send_failure.clone() {
            return Err(err);
        }
        state.sent.push(req);
        let nonce = state.sent.len() as u64;
        Ok(TxHash::left_padding_from(&nonce.to_be_bytes()))
    }

    async fn call(&self, _req: CallRequest) -> Result<Bytes, ProviderError> {
        self.ensure_present()?;
        let gate = self.state.lock().await.call_gate.clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let state = self.state.lock().await;
        if let Some(err) = state.call_failure.clone() {
            return Err(err);
        }
        Ok(state.call_result.clone())
    }

    async fn transaction_receipt(&self, tx_hash: &TxHash) -> Result<Option<TxReceipt>, ProviderError> {
        self.ensure_present()?;
        let state = self.state.lock().await;
        if let Some(err) = state.receipt_failure.clone() {
            return Err(err);
        }
        Ok(state.receipts.get(tx_hash).cloned())
    }

    async fn block_number(&self) -> Result<u64, ProviderError> {
        self.ensure_present()?;
        Ok(self.state.lock().await.block_number)
    }

    async fn logs(&self, filter: &LogFilter) -> Result<Vec<Log>, ProviderError> {
        self.ensure_present()?;
        let state = self.state.lock().await;
        if let Some(err) = state.log_failure.clone() {
            return Err(err);
        }
        if let Some(limit) = state.max_log_range {
            let span = filter.to_block.saturating_sub(filter.from_block) + 1;
            if span > limit {
                return Err(ProviderError::Rpc {
                    code: -32005,
                    message: format!("block range {span} exceeds limit of {limit}"),
                });
            }
        }
        Ok(state
            .logs
            .iter()
            .filter(|log| log.address == filter.address)
            .filter(|log| log.topics.first() == Some(&filter.topic0))
            .filter(|log| log.block_number >= filter.from_block && log.block_number <= filter.to_block)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::B256;

    fn log_at(contract: Address, topic: B256) -> Log {
        Log {
            address: contract,
            topics: vec![topic],
            data: Bytes::new(),
            block_number: 0,
            tx_hash: None,
        }
    }

    #[tokio::test]
    async fn approved_request_authorizes_accounts() -> anyhow::Result<()> {
        let provider = InMemoryProvider::new("4");
        let account = Address::with_last_byte(0xab);
        provider.set_requestable(vec![account]).await;

        assert!(provider.authorized_accounts().await?.is_empty());
        assert_eq!(provider.request_accounts().await?, vec![account]);
        assert_eq!(provider.authorized_accounts().await?, vec![account]);
        assert_eq!(provider.request_count().await, 1);
        Ok(())
    }

    #[tokio::test]
    async fn absent_provider_refuses_every_request() {
        let provider = InMemoryProvider::absent();
        assert!(!provider.is_present());
        assert_eq!(
            provider.authorized_accounts().await.unwrap_err(),
            ProviderError::NotPresent
        );
        assert_eq!(
            provider.current_chain_id().await.unwrap_err(),
            ProviderError::NotPresent
        );
    }

    #[tokio::test]
    async fn receipts_appear_only_after_settle() -> anyhow::Result<()> {
        let provider = InMemoryProvider::new("4");
        let tx_hash = provider
            .send_transaction(TransactionRequest {
                from: Address::with_last_byte(0xab),
                to: Address::with_last_byte(0xcd),
                data: Bytes::from(vec![1, 2, 3, 4]),
            })
            .await?;
        assert_eq!(tx_hash, TxHash::with_last_byte(1));

        assert!(provider.transaction_receipt(&tx_hash).await?.is_none());
        provider.settle(&tx_hash, true).await;
        let receipt = provider
            .transaction_receipt(&tx_hash)
            .await?
            .expect("receipt should exist after settle");
        assert!(receipt.success);
        assert_eq!(receipt.block_number, Some(1));

        provider
            .fail_receipts(Some(ProviderError::Transport("connection reset".to_owned())))
            .await;
        assert!(provider.transaction_receipt(&tx_hash).await.is_err());
        Ok(())
    }

    #[tokio::test]
    async fn logs_filter_by_address_topic_and_range() -> anyhow::Result<()> {
        let provider = InMemoryProvider::new("4");
        let contract = Address::with_last_byte(0xee);
        let topic = B256::repeat_byte(7);
        for _ in 0..3 {
            provider.emit_log(log_at(contract, topic)).await;
        }
        provider.emit_log(log_at(Address::with_last_byte(0xef), topic)).await;

        let logs = provider
            .logs(&LogFilter {
                address: contract,
                topic0: topic,
                from_block: 2,
                to_block: 4,
            })
            .await?;
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].block_number, 2);
        Ok(())
    }

    #[tokio::test]
    async fn wide_log_ranges_are_refused_when_limited() -> anyhow::Result<()> {
        let provider = InMemoryProvider::new("4");
        provider.limit_log_range(10).await;
        provider.advance_blocks(50).await;

        let filter = |from_block, to_block| LogFilter {
            address: Address::with_last_byte(0xee),
            topic0: B256::ZERO,
            from_block,
            to_block,
        };
        assert!(provider.logs(&filter(1, 10)).await.is_ok());
        assert!(matches!(
            provider.logs(&filter(1, 11)).await,
            Err(ProviderError::Rpc { code: -32005, .. })
        ));
        Ok(())
    }
}
