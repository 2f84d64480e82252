use axum::{
    extract::{Path, Query, State},
    Extension, Json,
};
use uuid::Uuid;

use crate::entities::{driver, trip};
use crate::error::AppResult;
use crate::handlers::passenger::CancelRequest;
use crate::principal::Principal;
use crate::services::lifecycle::{self, CompletionReport, Heartbeat, NearbyQuery, Rating};
use crate::services::matcher::Match;
use crate::AppState;

/// Heartbeat: location fix and/or availability toggle
pub async fn update_status(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(payload): Json<Heartbeat>,
) -> AppResult<Json<driver::Model>> {
    Ok(Json(
        lifecycle::driver_heartbeat(&state, &principal, &payload).await?,
    ))
}

/// List trips assigned to the logged-in driver
pub async fn my_trips(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> AppResult<Json<Vec<trip::Model>>> {
    Ok(Json(lifecycle::driver_trips(&state, &principal).await?))
}

pub async fn nearby_trips(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Query(query): Query<NearbyQuery>,
) -> AppResult<Json<Vec<Match<trip::Model>>>> {
    Ok(Json(
        lifecycle::nearby_trips_for_driver(&state, &principal, &query).await?,
    ))
}

// ============ Trip transitions ============

pub async fn accept_trip(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(trip_id): Path<Uuid>,
) -> AppResult<Json<trip::Model>> {
    Ok(Json(lifecycle::accept_trip(&state, &principal, trip_id).await?))
}

pub async fn start_trip(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(trip_id): Path<Uuid>,
) -> AppResult<Json<trip::Model>> {
    Ok(Json(lifecycle::start_trip(&state, &principal, trip_id).await?))
}

pub async fn complete_trip(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(trip_id): Path<Uuid>,
) -> AppResult<Json<CompletionReport>> {
    Ok(Json(
        lifecycle::complete_trip(&state, &principal, trip_id).await?,
    ))
}

pub async fn cancel_trip(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(trip_id): Path<Uuid>,
    payload: Option<Json<CancelRequest>>,
) -> AppResult<Json<trip::Model>> {
    let reason = payload.and_then(|Json(p)| p.reason);
    Ok(Json(
        lifecycle::cancel_trip(&state, &principal, trip_id, reason).await?,
    ))
}

pub async fn rate_passenger(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(trip_id): Path<Uuid>,
    Json(payload): Json<Rating>,
) -> AppResult<Json<trip::Model>> {
    Ok(Json(
        lifecycle::rate_passenger(&state, &principal, trip_id, &payload).await?,
    ))
}
