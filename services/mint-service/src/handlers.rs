use axum::{Json, extract::State};
use ml_api_types::{ConnectResponse, MintConfigResponse, MintResponse, Notice, ProjectionSnapshot};
use ml_wallet_core::MintOutcome;
use serde::Serialize;

use crate::{ApiResult, AppState, client_error};

#[derive(Debug, Serialize)]
pub(crate) struct HealthResponse {
    service: &'static str,
    status: &'static str,
}

#[derive(Debug, Serialize)]
pub(crate) struct VersionResponse {
    service: &'static str,
    version: &'static str,
}

#[derive(Debug, Serialize)]
pub(crate) struct NoticesResponse {
    notices: Vec<Notice>,
}

pub(crate) async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        service: "mint-service",
        status: "ok",
    })
}

pub(crate) async fn version() -> Json<VersionResponse> {
    Json(VersionResponse {
        service: "mint-service",
        version: env!("CARGO_PKG_VERSION"),
    })
}

pub(crate) async fn mint_config(State(state): State<AppState>) -> Json<MintConfigResponse> {
    let config = state.orchestrator.config();
    Json(MintConfigResponse {
        contract_address: config.contract_address,
        expected_chain_id: config.expected_chain_id.clone(),
        mint_cap: config.mint_cap,
        collection_url: config.collection_url.clone(),
    })
}

pub(crate) async fn state(State(state): State<AppState>) -> Json<ProjectionSnapshot> {
    Json(state.orchestrator.snapshot())
}

/// Most recent notices, oldest first.
pub(crate) async fn notices(State(state): State<AppState>) -> Json<NoticesResponse> {
    let notices = state.notice_log.read().await.iter().cloned().collect();
    Json(NoticesResponse { notices })
}

pub(crate) async fn connect(State(state): State<AppState>) -> ApiResult<ConnectResponse> {
    let response = state.orchestrator.connect().await.map_err(client_error)?;
    Ok(Json(response))
}

/// Blocks until the mint is confirmed or fails; `/state` reports progress meanwhile.
pub(crate) async fn mint(State(state): State<AppState>) -> ApiResult<MintResponse> {
    let outcome = state.orchestrator.mint().await.map_err(client_error)?;
    let response = match outcome {
        MintOutcome::Confirmed(receipt) => MintResponse::Confirmed {
            explorer_url: state.orchestrator.config().tx_url(&receipt.tx_hash),
            tx_hash: receipt.tx_hash,
            block_number: receipt.block_number,
        },
        MintOutcome::AlreadyInFlight => MintResponse::AlreadyInFlight,
    };
    Ok(Json(response))
}
