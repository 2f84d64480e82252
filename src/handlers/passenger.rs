use axum::{
    extract::{Path, State},
    http::StatusCode,
    Extension, Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::{passenger, trip};
use crate::error::AppResult;
use crate::principal::Principal;
use crate::services::lifecycle::{self, Rating, TripRequest};
use crate::utils::geo::GeoPoint;
use crate::AppState;

/// Request a trip
pub async fn create_trip(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(payload): Json<TripRequest>,
) -> AppResult<(StatusCode, Json<trip::Model>)> {
    let trip = lifecycle::create_trip(&state, &principal, &payload).await?;
    Ok((StatusCode::CREATED, Json(trip)))
}

/// List the logged-in passenger's trips, newest first
pub async fn my_trips(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
) -> AppResult<Json<Vec<trip::Model>>> {
    Ok(Json(lifecycle::passenger_trips(&state, &principal).await?))
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelRequest {
    #[serde(default)]
    pub reason: Option<String>,
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

pub async fn rate_driver(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Path(trip_id): Path<Uuid>,
    Json(payload): Json<Rating>,
) -> AppResult<Json<trip::Model>> {
    Ok(Json(
        lifecycle::rate_driver(&state, &principal, trip_id, &payload).await?,
    ))
}

#[derive(Debug, Serialize)]
pub struct LocationResponse {
    pub passenger_id: Uuid,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
}

impl From<passenger::Model> for LocationResponse {
    fn from(p: passenger::Model) -> Self {
        Self {
            passenger_id: p.id,
            lat: p.last_lat,
            lon: p.last_lon,
        }
    }
}

pub async fn update_location(
    State(state): State<AppState>,
    Extension(principal): Extension<Principal>,
    Json(point): Json<GeoPoint>,
) -> AppResult<Json<LocationResponse>> {
    let passenger = lifecycle::update_passenger_location(&state, &principal, &point).await?;
    Ok(Json(passenger.into()))
}
