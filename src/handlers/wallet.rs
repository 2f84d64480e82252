use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    Extension, Json,
};
use serde::{Deserialize, Serialize};

use crate::entities::{ledger_transaction, wallet};
use crate::error::AppResult;
use crate::principal::Principal;
use crate::services::gateway;
use crate::services::ledger::{self, GatewayCallback};
use crate::AppState;

const WEBHOOK_SECRET_HEADER: &str = "x-webhook-secret";
const DEFAULT_TRANSACTION_LIMIT: u64 = 50;
const MAX_TRANSACTION_LIMIT: u64 = 500;

/// Wallet of the caller, created empty on first access
pub async fn get_wallet(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> AppResult<Json<wallet::Model>> {
    Ok(Json(
        ledger::get_wallet(&state.db, principal.id, principal.role).await?,
    ))
}

#[derive(Debug, Default, Deserialize)]
pub struct TransactionQuery {
    pub limit: Option<u64>,
}

pub async fn transactions(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Query(query): Query<TransactionQuery>,
) -> AppResult<Json<Vec<ledger_transaction::Model>>> {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_TRANSACTION_LIMIT)
        .clamp(1, MAX_TRANSACTION_LIMIT);
    Ok(Json(
        ledger::list_transactions(&state.db, principal.id, principal.role, limit).await?,
    ))
}

// ============ Gateway-backed movements ============

#[derive(Debug, Deserialize)]
pub struct MovementRequest {
    pub amount: f64,
    #[serde(default = "default_method")]
    pub method: String,
}

fn default_method() -> String {
    "gateway".to_string()
}

#[derive(Debug, Serialize)]
pub struct MovementResponse {
    pub transaction: ledger_transaction::Model,
    pub gateway_configured: bool,
}

pub async fn topup(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(payload): Json<MovementRequest>,
) -> AppResult<(StatusCode, Json<MovementResponse>)> {
    let transaction = ledger::open_topup(
        &state.db,
        &state.gateway,
        &principal,
        payload.amount,
        &payload.method,
    )
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(MovementResponse {
            transaction,
            gateway_configured: state.gateway.is_configured(),
        }),
    ))
}

pub async fn withdraw(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(payload): Json<MovementRequest>,
) -> AppResult<(StatusCode, Json<MovementResponse>)> {
    let transaction = ledger::open_withdrawal(
        &state.db,
        &state.gateway,
        &principal,
        payload.amount,
        &payload.method,
    )
    .await?;

    Ok((
        StatusCode::CREATED,
        Json(MovementResponse {
            transaction,
            gateway_configured: state.gateway.is_configured(),
        }),
    ))
}

/// Gateway notification, authenticated by a shared secret header.
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(payload): Json<GatewayCallback>,
) -> AppResult<Json<ledger_transaction::Model>> {
    let provided = headers
        .get(WEBHOOK_SECRET_HEADER)
        .and_then(|v| v.to_str().ok());
    gateway::verify_webhook_secret(
        state.config.gateway_webhook_secret.as_deref(),
        provided,
        state.config.allow_unsigned_webhooks,
    )?;

    Ok(Json(ledger::apply_gateway_callback(&state.db, payload).await?))
}
