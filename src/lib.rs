pub mod api;
pub mod app_state;
pub mod claim;
pub mod config;
pub mod error;
pub mod rate_limit;
pub mod registry;
pub mod store;
pub mod token;

use anyhow::Context;
use axum::Router;
use axum::extract::Extension;
use axum::http::Method;
use axum::routing::{get, post};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

//
// Re-export
//
pub use api::{claim as claim_handler, click, clicks, index, log_request_errors, signer};
pub use app_state::{AppState, ClickAccepted, ClickRejected};
pub use claim::{
    Address, ClaimSigner, EnvKeyProvider, KeyError, KeyProvider, Keystore, KeystoreKeyProvider,
    Passphrase, Signature, SignedClaim, StaticKeyProvider,
};
pub use config::Config;
pub use error::GatewayError;
pub use rate_limit::ClickRateLimiter;
pub use registry::{TokenGuard, TokenRegistry};
pub use store::{CounterStore, MemoryCounterStore, RedisCounterStore, StoreBackend};
pub use token::SessionToken;

/// The gateway's routes with logging, CORS and shared state attached
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/", get(index))
        .route("/click", post(click))
        .route("/clicks/{token}", get(clicks))
        .route("/claim", post(claim_handler))
        .route("/signer", get(signer))
        .layer(axum::middleware::from_fn(api::log_request_errors))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(Extension(state))
}

/// Serve the gateway on an already bound listener
pub async fn serve(listener: TcpListener, state: AppState) -> anyhow::Result<()> {
    let app = router(state);
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("Gateway server error")
}

pub async fn run(config: Config) -> anyhow::Result<()> {
    // Key unlock and store connection both happen before binding
    let state = AppState::from_config(&config).await?;
    state
        .rate_limiter
        .start_cleanup_task(config.rate_limit_idle());

    let addr = config.listen_addr();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!(
        %addr,
        signer = %state.signer_address(),
        min_click_interval = ?state.rate_limiter.min_interval(),
        "Claim signer listening"
    );

    serve(listener, state).await
}
