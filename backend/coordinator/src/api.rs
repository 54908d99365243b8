//! Axum REST API handlers.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::coordinator::{CartActions, Coordinator, Mutation};
use crate::errors::CartError;
use crate::rpc::RpcGateway;
use crate::types::{Address, Cart, CartAction};

pub struct ApiState {
    pub coordinator: Coordinator<RpcGateway>,
}

// ─────────────────────────────────────────────────────────
// Request / response shapes
// ─────────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub viewer: Address,
}

#[derive(Serialize)]
pub struct RosterResponse {
    pub viewer: Address,
    pub generation: u64,
    pub fetched_at: Option<DateTime<Utc>>,
    pub stale: bool,
    pub mine: Vec<Cart>,
    pub others: Vec<Cart>,
    pub claimed_by_me: Vec<Address>,
}

#[derive(Serialize)]
pub struct PendingEntry {
    pub target: Address,
    pub action: CartAction,
}

#[derive(Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub kind: &'static str,
}

#[derive(Deserialize)]
pub struct CreateCartRequest {
    pub name: String,
    pub amount: String,
    pub items: Vec<String>,
}

#[derive(Deserialize)]
pub struct DepositRequest {
    pub amount: String,
}

#[derive(Deserialize)]
pub struct DeleteItemsRequest {
    pub items: Vec<String>,
    #[serde(default)]
    pub confirmed: bool,
}

#[derive(Deserialize)]
pub struct CloseRequest {
    #[serde(default)]
    pub acknowledged: bool,
}

// ─────────────────────────────────────────────────────────
// Errors
// ─────────────────────────────────────────────────────────

pub struct ApiError(CartError);

impl From<CartError> for ApiError {
    fn from(e: CartError) -> Self {
        Self(e)
    }
}

/// HTTP status for a coordinator error. Wrapped sequence failures take the
/// status of their cause.
pub fn status_for(error: &CartError) -> StatusCode {
    match error {
        CartError::AmountInvalid { .. } | CartError::InvalidField { .. } => StatusCode::BAD_REQUEST,
        CartError::ActionNotPermitted(_) | CartError::ActionPending { .. } => StatusCode::CONFLICT,
        CartError::ConfirmationTimeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        CartError::SubmissionRejected(_)
        | CartError::Reverted { .. }
        | CartError::ReadUnavailable(_) => StatusCode::BAD_GATEWAY,
        CartError::AllowanceRejected(cause) | CartError::DependentActionFailed(cause) => {
            status_for(cause)
        }
        CartError::Sequence(_) | CartError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            warn!("Request failed: {}", self.0);
        }
        (
            status,
            Json(ErrorResponse {
                error: self.0.to_string(),
                kind: self.0.kind(),
            }),
        )
            .into_response()
    }
}

type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

fn cart_address(raw: &str) -> Result<Address, ApiError> {
    Ok(raw.parse()?)
}

// ─────────────────────────────────────────────────────────
// Handlers
// ─────────────────────────────────────────────────────────

/// `GET /health`
pub async fn health(State(state): State<Arc<ApiState>>) -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        viewer: state.coordinator.viewer(),
    })
}

/// `GET /roster`
///
/// Serves the cached roster, loading it first if it was never fetched.
pub async fn get_roster(State(state): State<Arc<ApiState>>) -> ApiResult<RosterResponse> {
    let coordinator = &state.coordinator;
    if coordinator.snapshot().await.generation == 0 {
        coordinator.refresh().await?;
    }
    Ok(Json(roster_response(coordinator).await))
}

/// `POST /roster/refresh`
pub async fn refresh_roster(State(state): State<Arc<ApiState>>) -> ApiResult<RosterResponse> {
    state.coordinator.refresh().await?;
    Ok(Json(roster_response(&state.coordinator).await))
}

async fn roster_response(coordinator: &Coordinator<RpcGateway>) -> RosterResponse {
    let snapshot = coordinator.snapshot().await;
    let roster = crate::roster::project(&snapshot, Some(coordinator.viewer()));
    let claimed_by_me = roster.claimed_by_me().map(|cart| cart.address).collect();
    RosterResponse {
        viewer: coordinator.viewer(),
        generation: snapshot.generation,
        fetched_at: snapshot.fetched_at,
        stale: snapshot.stale,
        mine: roster.mine,
        others: roster.others,
        claimed_by_me,
    }
}

/// `GET /carts/:address/actions`
pub async fn get_cart_actions(
    State(state): State<Arc<ApiState>>,
    Path(address): Path<String>,
) -> Response {
    let address = match cart_address(&address) {
        Ok(address) => address,
        Err(e) => return e.into_response(),
    };
    match state.coordinator.cart_actions(address).await {
        Some(actions) => (StatusCode::OK, Json::<CartActions>(actions)).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(ErrorResponse {
                error: format!("Cart {address} is not in the roster"),
                kind: "not_found",
            }),
        )
            .into_response(),
    }
}

/// `POST /carts`
pub async fn create_cart(
    State(state): State<Arc<ApiState>>,
    Json(body): Json<CreateCartRequest>,
) -> ApiResult<Mutation> {
    let mutation = state
        .coordinator
        .create_cart(&body.name, &body.amount, &body.items)
        .await?;
    Ok(Json(mutation))
}

/// `POST /carts/:address/deposit`
pub async fn deposit(
    State(state): State<Arc<ApiState>>,
    Path(address): Path<String>,
    Json(body): Json<DepositRequest>,
) -> ApiResult<Mutation> {
    let cart = cart_address(&address)?;
    Ok(Json(state.coordinator.deposit(cart, &body.amount).await?))
}

/// `POST /carts/:address/claim`
pub async fn claim(
    State(state): State<Arc<ApiState>>,
    Path(address): Path<String>,
) -> ApiResult<Mutation> {
    let cart = cart_address(&address)?;
    Ok(Json(state.coordinator.claim(cart).await?))
}

/// `POST /carts/:address/forfeit`
pub async fn forfeit(
    State(state): State<Arc<ApiState>>,
    Path(address): Path<String>,
) -> ApiResult<Mutation> {
    let cart = cart_address(&address)?;
    Ok(Json(state.coordinator.forfeit(cart).await?))
}

/// `POST /carts/:address/items/delete`
pub async fn delete_items(
    State(state): State<Arc<ApiState>>,
    Path(address): Path<String>,
    Json(body): Json<DeleteItemsRequest>,
) -> ApiResult<Mutation> {
    let cart = cart_address(&address)?;
    let mutation = state
        .coordinator
        .delete_items(cart, &body.items, body.confirmed)
        .await?;
    Ok(Json(mutation))
}

/// `POST /carts/:address/close`
pub async fn close(
    State(state): State<Arc<ApiState>>,
    Path(address): Path<String>,
    Json(body): Json<CloseRequest>,
) -> ApiResult<Mutation> {
    let cart = cart_address(&address)?;
    Ok(Json(state.coordinator.close(cart, body.acknowledged).await?))
}

/// `GET /pending`
pub async fn get_pending(State(state): State<Arc<ApiState>>) -> Json<Vec<PendingEntry>> {
    let pending = state
        .coordinator
        .pending()
        .into_iter()
        .map(|(target, action)| PendingEntry { target, action })
        .collect();
    Json(pending)
}

/// `POST /pending/cancel`
///
/// Stops awaiting every outstanding confirmation.
pub async fn cancel_pending(State(state): State<Arc<ApiState>>) -> StatusCode {
    state.coordinator.cancel_pending();
    StatusCode::NO_CONTENT
}
