//! BasedCart coordinator: entry point.
//!
//! Loads the viewer session from the environment, primes the cart roster
//! from the factory, and exposes the cart lifecycle over a small Axum REST
//! API. Transactions are signed by the node behind `RPC_URL`.

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use reqwest::Client;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use coordinator::api::{self, ApiState};
use coordinator::config::Config;
use coordinator::coordinator::Coordinator;
use coordinator::rpc::RpcGateway;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise structured logging (RUST_LOG controls verbosity).
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    // Load optional .env file (ignored if missing).
    let _ = dotenvy::dotenv();

    let config = Config::from_env().map_err(|e| anyhow::anyhow!("{e}"))?;
    info!(
        "Acting for {} on chain {} via {}",
        config.viewer_address, config.chain_id, config.rpc_url
    );

    let client = Client::builder().timeout(config.http_timeout()).build()?;
    let gateway = RpcGateway::new(
        client,
        config.rpc_url.clone(),
        config.contracts(),
        config.chain_id,
        config.receipt_poll_interval(),
    );

    let coordinator = Coordinator::new(
        config.viewer_address,
        Arc::new(gateway),
        config.contracts(),
        config.confirmation_timeout(),
    );

    // A node that is down at startup is not fatal; GET /roster retries.
    match coordinator.refresh().await {
        Ok(roster) => info!(
            "Loaded roster: {} owned, {} others",
            roster.mine.len(),
            roster.others.len()
        ),
        Err(e) => warn!("Initial roster load failed: {e}"),
    }

    // ─── REST API ─────────────────────────────────────────
    let api_state = Arc::new(ApiState { coordinator });

    let app = Router::new()
        .route("/health", get(api::health))
        .route("/roster", get(api::get_roster))
        .route("/roster/refresh", post(api::refresh_roster))
        .route("/carts", post(api::create_cart))
        .route("/carts/:address/actions", get(api::get_cart_actions))
        .route("/carts/:address/deposit", post(api::deposit))
        .route("/carts/:address/claim", post(api::claim))
        .route("/carts/:address/forfeit", post(api::forfeit))
        .route("/carts/:address/items/delete", post(api::delete_items))
        .route("/carts/:address/close", post(api::close))
        .route("/pending", get(api::get_pending))
        .route("/pending/cancel", post(api::cancel_pending))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(api_state);

    let addr = format!("0.0.0.0:{}", config.api_port);
    info!("API listening on http://{addr}");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
