use alloy_primitives::{B256, Bytes, U64};
use async_trait::async_trait;
use ml_api_types::{Address, ChainId, TxHash};
use ml_provider::{
    CallRequest, Log, LogFilter, ProviderError, TransactionRequest, TxReceipt, WalletProvider,
};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

pub const RPC_URL_ENV: &str = "MINT_RPC_URL";

/// Wallet provider speaking the EIP-1193 method set over HTTP JSON-RPC.
///
/// Without an endpoint the provider reports itself absent, which keeps the
/// orchestrator in read-only mode.
pub struct JsonRpcProvider {
    endpoint: Option<String>,
    http: reqwest::Client,
    next_id: AtomicU64,
}

impl JsonRpcProvider {
    /// Uses `endpoint`, falling back to `MINT_RPC_URL`.
    pub fn new(endpoint: Option<String>) -> Self {
        let endpoint = endpoint
            .or_else(|| std::env::var(RPC_URL_ENV).ok())
            .map(|url| url.trim().trim_end_matches('/').to_string())
            .filter(|url| !url.is_empty());
        Self {
            endpoint,
            http: reqwest::Client::new(),
            next_id: AtomicU64::new(1),
        }
    }

    async fn request<T: DeserializeOwned>(&self, method: &str, params: Value) -> Result<T, ProviderError> {
        let Some(endpoint) = self.endpoint.as_deref() else {
            return Err(ProviderError::NotPresent);
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": method,
            "params": params,
        });
        debug!(method, id, "provider request");

        let response = self
            .http
            .post(endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|err| ProviderError::Transport(format!("{method}: {err}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(ProviderError::Transport(format!("{method} HTTP {status}: {text}")));
        }

        let envelope: RpcEnvelope = response
            .json()
            .await
            .map_err(|err| ProviderError::InvalidResponse(format!("{method}: {err}")))?;

        if let Some(error) = envelope.error {
            return Err(ProviderError::from_rpc(error.code, error.message));
        }

        serde_json::from_value(envelope.result.unwrap_or(Value::Null))
            .map_err(|err| ProviderError::InvalidResponse(format!("{method}: {err}")))
    }
}

// ── JSON-RPC wire types ─────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RpcEnvelope {
    result: Option<Value>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcReceipt {
    transaction_hash: TxHash,
    block_number: Option<U64>,
    status: Option<U64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RpcLog {
    address: Address,
    topics: Vec<B256>,
    data: Bytes,
    block_number: Option<U64>,
    transaction_hash: Option<TxHash>,
}

impl From<RpcLog> for Log {
    fn from(log: RpcLog) -> Self {
        Self {
            address: log.address,
            topics: log.topics,
            data: log.data,
            block_number: log.block_number.map(|n| n.to::<u64>()).unwrap_or_default(),
            tx_hash: log.transaction_hash,
        }
    }
}

#[async_trait]
impl WalletProvider for JsonRpcProvider {
    fn is_present(&self) -> bool {
        self.endpoint.is_some()
    }

    async fn authorized_accounts(&self) -> Result<Vec<Address>, ProviderError> {
        self.request("eth_accounts", json!([])).await
    }

    async fn request_accounts(&self) -> Result<Vec<Address>, ProviderError> {
        self.request("eth_requestAccounts", json!([])).await
    }

    async fn current_chain_id(&self) -> Result<ChainId, ProviderError> {
        // net_version is the decimal network id wallets expose as `networkVersion`.
        let version: String = self.request("net_version", json!([])).await?;
        Ok(ChainId(version))
    }

    async fn send_transaction(&self, req: TransactionRequest) -> Result<TxHash, ProviderError> {
        self.request(
            "eth_sendTransaction",
            json!([{ "from": req.from, "to": req.to, "data": req.data }]),
        )
        .await
    }

    async fn call(&self, req: CallRequest) -> Result<Bytes, ProviderError> {
        self.request("eth_call", json!([{ "to": req.to, "data": req.data }, "latest"]))
            .await
    }

    async fn transaction_receipt(&self, tx_hash: &TxHash) -> Result<Option<TxReceipt>, ProviderError> {
        let receipt: Option<RpcReceipt> = self
            .request("eth_getTransactionReceipt", json!([tx_hash]))
            .await?;

        Ok(receipt.map(|receipt| TxReceipt {
            tx_hash: receipt.transaction_hash,
            block_number: receipt.block_number.map(|n| n.to::<u64>()),
            // Pre-Byzantium receipts carry no status; treat inclusion as success.
            success: receipt.status.is_none_or(|status| status == U64::from(1)),
        }))
    }

    async fn block_number(&self) -> Result<u64, ProviderError> {
        let number: U64 = self.request("eth_blockNumber", json!([])).await?;
        Ok(number.to::<u64>())
    }

    async fn logs(&self, filter: &LogFilter) -> Result<Vec<Log>, ProviderError> {
        let logs: Vec<RpcLog> = self
            .request(
                "eth_getLogs",
                json!([{
                    "address": filter.address,
                    "topics": [filter.topic0],
                    "fromBlock": U64::from(filter.from_block),
                    "toBlock": U64::from(filter.to_block),
                }]),
            )
            .await?;
        Ok(logs.into_iter().map(Log::from).collect())
    }
}
