use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use sea_orm::TransactionTrait;
use serde::Deserialize;
use uuid::Uuid;

use crate::entities::role::Role;
use crate::entities::settlement::{self, SettlementStatus};
use crate::entities::{commission_rate, driver, tariff, trip};
use crate::error::AppResult;
use crate::principal::Principal;
use crate::services::fare::{self, Tariff};
use crate::services::ledger::{self, ReconcileReport, WalletAudit};
use crate::services::lifecycle::{self, NearbyQuery};
use crate::services::matcher::Match;
use crate::AppState;

// ============ Dispatch ============

#[derive(Debug, Deserialize)]
pub struct AssignRequest {
    pub driver_id: Uuid,
}

/// Assign a requested trip to a driver, subject to the same claim rules as accept
pub async fn assign_trip(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(trip_id): Path<Uuid>,
    Json(payload): Json<AssignRequest>,
) -> AppResult<Json<trip::Model>> {
    Ok(Json(
        lifecycle::assign_trip(&state, &principal, trip_id, payload.driver_id).await?,
    ))
}

pub async fn nearby_drivers(
    State(state): State<AppState>,
    Query(query): Query<NearbyQuery>,
) -> AppResult<Json<Vec<Match<driver::Model>>>> {
    Ok(Json(lifecycle::nearby_drivers(&state, &query).await?))
}

// ============ Pricing ============

#[derive(Debug, Deserialize)]
pub struct TariffRequest {
    #[serde(default)]
    pub vehicle_class: Option<String>,
    #[serde(flatten)]
    pub tariff: Tariff,
}

pub async fn set_tariff(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(payload): Json<TariffRequest>,
) -> AppResult<Json<tariff::Model>> {
    let class = fare::normalize_vehicle_class(payload.vehicle_class.as_deref());
    let txn = state.db.begin().await?;
    let row = fare::set_tariff(&txn, &class, payload.tariff).await?;
    txn.commit().await?;
    tracing::info!(admin_id = %principal.id, vehicle_class = %row.vehicle_class, "Tariff updated");
    Ok(Json(row))
}

#[derive(Debug, Deserialize)]
pub struct CommissionRequest {
    pub percentage: f64,
}

pub async fn set_commission(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(payload): Json<CommissionRequest>,
) -> AppResult<Json<commission_rate::Model>> {
    let row = ledger::set_commission_rate(&state.db, payload.percentage).await?;
    tracing::info!(admin_id = %principal.id, percentage = row.percentage, "Commission rate updated");
    Ok(Json(row))
}

// ============ Settlement ============

#[derive(Debug, Default, Deserialize)]
pub struct SettlementQuery {
    pub status: Option<SettlementStatus>,
}

pub async fn list_settlements(
    State(state): State<AppState>,
    Query(query): Query<SettlementQuery>,
) -> AppResult<Json<Vec<settlement::Model>>> {
    Ok(Json(ledger::list_settlements(&state.db, query.status).await?))
}

pub async fn reconcile(State(state): State<AppState>) -> AppResult<Json<ReconcileReport>> {
    let report = ledger::reconcile(
        &state.db,
        state.config.settlement.default_commission_rate,
    )
    .await?;
    Ok(Json(report))
}

pub async fn audit_wallet(
    State(state): State<AppState>,
    Path((user_id, role)): Path<(Uuid, Role)>,
) -> AppResult<Json<WalletAudit>> {
    Ok(Json(ledger::audit_wallet(&state.db, user_id, role).await?))
}
