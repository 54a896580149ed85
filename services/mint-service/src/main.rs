use axum::{
    Json, Router,
    http::StatusCode,
    routing::{get, post},
};
use ml_api_types::Notice;
use ml_provider::WalletProvider;
use ml_provider_jsonrpc::JsonRpcProvider;
use ml_wallet_core::{MintClientError, MintConfig, MintOrchestrator};
use serde::Serialize;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{RwLock, broadcast};
use tower_http::cors::CorsLayer;
use tracing::{info, warn};

mod handlers;

const NOTICE_LOG_LIMIT: usize = 20;
const DEFAULT_ADDR: &str = "0.0.0.0:8080";

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
    kind: &'static str,
}

type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ErrorResponse>)>;

#[derive(Clone)]
struct AppState {
    orchestrator: Arc<MintOrchestrator>,
    notice_log: Arc<RwLock<VecDeque<Notice>>>,
}

impl AppState {
    /// Spawns the task that keeps the most recent notices for polling clients.
    fn new(orchestrator: Arc<MintOrchestrator>) -> Self {
        let notice_log = Arc::new(RwLock::new(VecDeque::with_capacity(NOTICE_LOG_LIMIT)));
        let mut notices = orchestrator.notices();
        let log = Arc::clone(&notice_log);
        tokio::spawn(async move {
            loop {
                match notices.recv().await {
                    Ok(notice) => {
                        let mut log = log.write().await;
                        if log.len() == NOTICE_LOG_LIMIT {
                            log.pop_front();
                        }
                        log.push_back(notice);
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("notice log lagged; {skipped} notices skipped");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Self {
            orchestrator,
            notice_log,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = MintConfig::from_env()?;
    let provider: Arc<dyn WalletProvider> = Arc::new(JsonRpcProvider::new(config.rpc_url.clone()));
    let orchestrator = Arc::new(MintOrchestrator::new(config, provider)?);
    let state = AppState::new(Arc::clone(&orchestrator));

    match orchestrator.detect_existing_session().await {
        Some(account) => info!(%account, "resumed wallet session"),
        None => info!("no wallet session; waiting for connect"),
    }

    let addr: SocketAddr = std::env::var("MINT_SERVICE_ADDR")
        .unwrap_or_else(|_| DEFAULT_ADDR.to_owned())
        .parse()?;
    info!("mint-service listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    orchestrator.unsubscribe().await;
    Ok(())
}

fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/version", get(handlers::version))
        .route("/config", get(handlers::mint_config))
        .route("/state", get(handlers::state))
        .route("/notices", get(handlers::notices))
        .route("/connect", post(handlers::connect))
        .route("/mint", post(handlers::mint))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for shutdown signal: {err}");
    }
}

fn client_error(err: MintClientError) -> (StatusCode, Json<ErrorResponse>) {
    let status = match &err {
        MintClientError::NoProvider => StatusCode::PRECONDITION_FAILED,
        MintClientError::AuthorizationRejected(_) => StatusCode::FORBIDDEN,
        MintClientError::NotConnected | MintClientError::NetworkMismatch { .. } => StatusCode::CONFLICT,
        MintClientError::TransactionSubmission(_)
        | MintClientError::TransactionConfirmation { .. }
        | MintClientError::Query(_)
        | MintClientError::Provider(_) => StatusCode::BAD_GATEWAY,
        MintClientError::Interface(_) | MintClientError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(ErrorResponse {
            error: err.to_string(),
            kind: err.kind(),
        }),
    )
}
