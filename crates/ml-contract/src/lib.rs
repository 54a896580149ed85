//! Contract proxy for the minting contract.
//!
//! A [`ContractSpec`] is the immutable half (address plus interface
//! description); a [`ContractProxy`] is that spec bound to a signer. Proxies
//! are cheap and meant to be rebuilt for every call.

pub mod abi;
mod pending;

use alloy_dyn_abi::{DynSolType, DynSolValue, EventExt, FunctionExt, JsonAbiExt};
use alloy_json_abi::{Event, StateMutability};
use alloy_primitives::{B256, Bytes};
use ml_api_types::{Address, MintCompleted, TxHash, U256};
use ml_provider::{CallRequest, Log, LogFilter, ProviderError, Signer, TransactionRequest, WalletProvider};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub use abi::InterfaceDescription;
pub use pending::PendingTransaction;

/// Interface description bundled with the client.
pub const BUNDLED_INTERFACE: &str = include_str!("../abi/MyEpicNFT.json");

pub const DEFAULT_MINT_FUNCTION: &str = "makeAnEpicNFT";
pub const DEFAULT_COUNT_FUNCTION: &str = "getTotalNFTsMintedSoFar";
pub const DEFAULT_MINT_EVENT: &str = "NewEpicNFTMinted";

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum ContractError {
    #[error("no wallet provider is available to sign")]
    NoProvider,
    #[error("contract interface error: {0}")]
    Interface(String),
    #[error("transaction submission failed: {0}")]
    Submission(ProviderError),
    #[error("transaction {tx_hash} failed to confirm: {reason}")]
    Confirmation { tx_hash: TxHash, reason: String },
    #[error("contract query failed: {0}")]
    Query(ProviderError),
    #[error("failed to decode contract data: {0}")]
    Decode(String),
}

/// Names of the three interface members the client uses.
#[derive(Debug, Clone)]
pub struct EntryPoints {
    pub mint_function: String,
    pub count_function: String,
    pub mint_event: String,
}

impl Default for EntryPoints {
    fn default() -> Self {
        Self {
            mint_function: DEFAULT_MINT_FUNCTION.to_owned(),
            count_function: DEFAULT_COUNT_FUNCTION.to_owned(),
            mint_event: DEFAULT_MINT_EVENT.to_owned(),
        }
    }
}

/// Fixed contract address plus the resolved entry points.
#[derive(Debug, Clone)]
pub struct ContractSpec {
    address: Address,
    mint_calldata: Bytes,
    count: alloy_json_abi::Function,
    count_calldata: Bytes,
    event: Event,
}

impl ContractSpec {
    /// Resolves the entry points against the interface and checks their shapes:
    /// both functions take no arguments, the count returns one unsigned integer,
    /// and the event is `(address, uint, uint)`.
    pub fn new(
        address: Address,
        interface: &InterfaceDescription,
        entry_points: &EntryPoints,
    ) -> Result<Self, ContractError> {
        let mint = interface.function(&entry_points.mint_function)?;
        if !mint.inputs.is_empty() {
            return Err(ContractError::Interface(format!(
                "mint function '{}' must take no arguments",
                mint.name
            )));
        }
        if matches!(mint.state_mutability, StateMutability::View | StateMutability::Pure) {
            return Err(ContractError::Interface(format!(
                "mint function '{}' is read-only",
                mint.name
            )));
        }

        let count = interface.function(&entry_points.count_function)?;
        let count_shape_ok =
            count.inputs.is_empty() && count.outputs.len() == 1 && is_uint(&count.outputs[0].ty);
        if !count_shape_ok {
            return Err(ContractError::Interface(format!(
                "count function '{}' must take no arguments and return one unsigned integer",
                count.name
            )));
        }

        let event = interface.event(&entry_points.mint_event)?;
        let kinds: Vec<&str> = event.inputs.iter().map(|p| p.ty.as_str()).collect();
        let event_shape_ok = !event.anonymous
            && kinds.len() == 3
            && kinds[0] == "address"
            && is_uint(kinds[1])
            && is_uint(kinds[2]);
        if !event_shape_ok {
            return Err(ContractError::Interface(format!(
                "event '{}' must be (address, uint, uint), found ({})",
                event.name,
                kinds.join(",")
            )));
        }

        let encode = |function: &alloy_json_abi::Function| {
            function
                .abi_encode_input(&[])
                .map(Bytes::from)
                .map_err(|err| ContractError::Interface(format!("{}: {err}", function.name)))
        };

        Ok(Self {
            address,
            mint_calldata: encode(mint)?,
            count_calldata: encode(count)?,
            count: count.clone(),
            event: event.clone(),
        })
    }

    pub fn bundled(address: Address) -> Result<Self, ContractError> {
        let interface = InterfaceDescription::from_json(BUNDLED_INTERFACE)?;
        Self::new(address, &interface, &EntryPoints::default())
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn mint_event_filter(&self, from_block: u64, to_block: u64) -> LogFilter {
        LogFilter {
            address: self.address,
            topic0: self.event.selector(),
            from_block,
            to_block,
        }
    }

    pub fn decode_mint_event(&self, log: &Log) -> Result<MintCompleted, ContractError> {
        if log.address != self.address {
            return Err(ContractError::Decode("log is not from this contract".to_owned()));
        }
        let decoded = self
            .event
            .decode_log_parts(log.topics.iter().copied(), &log.data, true)
            .map_err(|err| ContractError::Decode(format!("{}: {err}", self.event.name)))?;

        // Reassemble declaration order from the indexed and body halves.
        let mut indexed = decoded.indexed.into_iter();
        let mut body = decoded.body.into_iter();
        let values = self
            .event
            .inputs
            .iter()
            .map(|param| if param.indexed { indexed.next() } else { body.next() })
            .collect::<Option<Vec<_>>>()
            .ok_or_else(|| ContractError::Decode("mint event is truncated".to_owned()))?;

        let uint = |value: &DynSolValue| {
            value
                .as_uint()
                .map(|(value, _)| value)
                .ok_or_else(|| ContractError::Decode("expected an unsigned integer".to_owned()))
        };
        Ok(MintCompleted {
            from: values[0]
                .as_address()
                .ok_or_else(|| ContractError::Decode("expected an address".to_owned()))?,
            token_id: uint(&values[1])?,
            new_total_count: uint(&values[2])?,
        })
    }

    /// Builds the log this contract would emit for `event`. Used by fakes.
    pub fn encode_mint_event(&self, event: &MintCompleted) -> Result<Log, ContractError> {
        let values = [
            DynSolValue::Address(event.from),
            DynSolValue::Uint(event.token_id, 256),
            DynSolValue::Uint(event.new_total_count, 256),
        ];
        let mut topics = vec![self.event.selector()];
        let mut body = Vec::new();
        for (param, value) in self.event.inputs.iter().zip(values) {
            if param.indexed {
                let word = B256::try_from(value.abi_encode().as_slice())
                    .map_err(|err| ContractError::Decode(format!("indexed {}: {err}", param.name)))?;
                topics.push(word);
            } else {
                body.push(value);
            }
        }
        Ok(Log {
            address: self.address,
            topics,
            data: DynSolValue::Tuple(body).abi_encode_params().into(),
            block_number: 0,
            tx_hash: None,
        })
    }
}

fn is_uint(ty: &str) -> bool {
    matches!(DynSolType::parse(ty), Ok(DynSolType::Uint(_)))
}

/// A [`ContractSpec`] bound to the signer of the current session.
pub struct ContractProxy {
    spec: ContractSpec,
    signer: Signer,
    poll_interval: Duration,
}

impl ContractProxy {
    /// Pure construction; fails only when no provider can sign.
    pub fn bind(
        spec: &ContractSpec,
        provider: Arc<dyn WalletProvider>,
        account: Address,
        poll_interval: Duration,
    ) -> Result<Self, ContractError> {
        let signer = Signer::new(provider, account).map_err(|_| ContractError::NoProvider)?;
        Ok(Self {
            spec: spec.clone(),
            signer,
            poll_interval,
        })
    }

    pub async fn mint(&self) -> Result<PendingTransaction, ContractError> {
        let tx_hash = self
            .signer
            .provider()
            .send_transaction(TransactionRequest {
                from: *self.signer.account(),
                to: self.spec.address,
                data: self.spec.mint_calldata.clone(),
            })
            .await
            .map_err(|err| match err {
                ProviderError::NotPresent => ContractError::NoProvider,
                other => ContractError::Submission(other),
            })?;

        info!(tx_hash = %tx_hash, from = %self.signer.account(), "mint transaction submitted");
        Ok(PendingTransaction::new(
            tx_hash,
            Arc::clone(self.signer.provider()),
            self.poll_interval,
        ))
    }

    pub async fn total_minted(&self) -> Result<U256, ContractError> {
        let data = self
            .signer
            .provider()
            .call(CallRequest {
                to: self.spec.address,
                data: self.spec.count_calldata.clone(),
            })
            .await
            .map_err(ContractError::Query)?;

        let outputs = self
            .spec
            .count
            .abi_decode_output(&data, true)
            .map_err(|err| ContractError::Decode(format!("{} returned {} bytes: {err}", self.spec.count.name, data.len())))?;
        outputs
            .first()
            .and_then(DynSolValue::as_uint)
            .map(|(value, _)| value)
            .ok_or_else(|| ContractError::Decode("count result is not an unsigned integer".to_owned()))
    }
}
