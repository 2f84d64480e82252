use axum::{
    extract::{Path, State},
    Extension, Json,
};
use uuid::Uuid;

use crate::entities::trip;
use crate::error::AppResult;
use crate::principal::Principal;
use crate::services::fare::FareEstimate;
use crate::services::lifecycle::{self, TripRequest, TripTrace};
use crate::AppState;

/// Public fare estimate, no trip is created
pub async fn estimate_fare(
    State(state): State<AppState>,
    Json(payload): Json<TripRequest>,
) -> AppResult<Json<FareEstimate>> {
    Ok(Json(lifecycle::estimate_fare(&state, &payload).await?))
}

pub async fn get_trip(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(trip_id): Path<Uuid>,
) -> AppResult<Json<trip::Model>> {
    Ok(Json(lifecycle::get_trip(&state, &principal, trip_id).await?))
}

/// Location trace and terminal record of a trip
pub async fn trip_history(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(trip_id): Path<Uuid>,
) -> AppResult<Json<TripTrace>> {
    Ok(Json(lifecycle::trip_trace(&state, &principal, trip_id).await?))
}
