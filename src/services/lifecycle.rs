use sea_orm::{
    sea_query::{Expr, OnConflict},
    ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, PaginatorTrait, QueryFilter,
    QueryOrder, QuerySelect, QueryTrait, Set, SqlErr, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::{
    driver, passenger,
    role::Role,
    trip::{self, TripStatus},
    trip_history, trip_location,
};
use crate::error::{AppError, AppResult};
use crate::principal::Principal;
use crate::services::fare::{self, FareEstimate};
use crate::services::ledger::{self, SettlementOutcome};
use crate::services::matcher::{self, DriverSearch, Match};
use crate::services::tracker;
use crate::utils::geo::{path_distance_km, GeoPoint};
use crate::utils::time::{self, stamp_after};
use crate::AppState;

// ============ Inputs and reports ============

#[derive(Debug, Clone, Deserialize)]
pub struct TripRequest {
    #[serde(default)]
    pub vehicle_class: Option<String>,
    pub pickup: GeoPoint,
    pub dropoff: GeoPoint,
}

/// Driver heartbeat: any combination of a position fix and an
/// availability toggle.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Heartbeat {
    #[serde(default)]
    pub available: Option<bool>,
    #[serde(default)]
    pub lat: Option<f64>,
    #[serde(default)]
    pub lon: Option<f64>,
    #[serde(default)]
    pub bearing: Option<f64>,
    #[serde(default)]
    pub vehicle_class: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Rating {
    pub rating: i32,
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CompletionReport {
    pub trip: trip::Model,
    pub settlement: SettlementOutcome,
    pub reward_points: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TripTrace {
    pub trip_id: Uuid,
    pub path_distance_km: f64,
    pub samples: Vec<trip_location::Model>,
    pub history: Option<trip_history::Model>,
}

fn validated(point: &GeoPoint) -> AppResult<GeoPoint> {
    GeoPoint::new(point.lat, point.lon)
}

fn validate_rating(rating: &Rating) -> AppResult<()> {
    if !(1..=5).contains(&rating.rating) {
        return Err(AppError::Validation("Rating must be between 1 and 5".to_string()));
    }
    Ok(())
}

async fn find_trip<C: ConnectionTrait>(db: &C, trip_id: Uuid) -> AppResult<trip::Model> {
    trip::Entity::find_by_id(trip_id)
        .one(db)
        .await?
        .ok_or_else(|| AppError::NotFound("Trip not found".to_string()))
}

fn ensure_not_terminal(trip: &trip::Model) -> AppResult<()> {
    if trip.status.is_terminal() {
        return Err(AppError::Conflict(format!(
            "Trip is already {}",
            trip.status.as_str()
        )));
    }
    Ok(())
}

fn ensure_assigned_driver(trip: &trip::Model, principal: &Principal) -> AppResult<()> {
    if trip.driver_id != Some(principal.id) {
        return Err(AppError::Forbidden(
            "Only the assigned driver can do this".to_string(),
        ));
    }
    Ok(())
}

fn ensure_can_view(trip: &trip::Model, principal: &Principal) -> AppResult<()> {
    if principal.is_admin() || trip.is_member(principal.id) {
        return Ok(());
    }
    Err(AppError::Forbidden("Not a member of this trip".to_string()))
}

// ============ Estimates and lookups ============

pub async fn estimate_fare(state: &AppState, request: &TripRequest) -> AppResult<FareEstimate> {
    let class = fare::normalize_vehicle_class(request.vehicle_class.as_deref());
    let pickup = validated(&request.pickup)?;
    let dropoff = validated(&request.dropoff)?;
    fare::estimate(&state.db, &class, &pickup, &dropoff).await
}

pub async fn get_trip(state: &AppState, principal: &Principal, trip_id: Uuid) -> AppResult<trip::Model> {
    let trip = find_trip(&state.db, trip_id).await?;
    ensure_can_view(&trip, principal)?;
    Ok(trip)
}

pub async fn trip_trace(state: &AppState, principal: &Principal, trip_id: Uuid) -> AppResult<TripTrace> {
    let trip = get_trip(state, principal, trip_id).await?;
    let samples = tracker::trace(&state.db, trip.id).await?;
    let history = trip_history::Entity::find()
        .filter(trip_history::Column::TripId.eq(trip.id))
        .one(&state.db)
        .await?;

    Ok(TripTrace {
        trip_id: trip.id,
        path_distance_km: path_distance_km(&tracker::trace_points(&samples)),
        samples,
        history,
    })
}

pub async fn passenger_trips(state: &AppState, principal: &Principal) -> AppResult<Vec<trip::Model>> {
    Ok(trip::Entity::find()
        .filter(trip::Column::PassengerId.eq(principal.id))
        .order_by_desc(trip::Column::CreatedAt)
        .all(&state.db)
        .await?)
}

pub async fn driver_trips(state: &AppState, principal: &Principal) -> AppResult<Vec<trip::Model>> {
    Ok(trip::Entity::find()
        .filter(trip::Column::DriverId.eq(principal.id))
        .order_by_desc(trip::Column::CreatedAt)
        .all(&state.db)
        .await?)
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NearbyQuery {
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    pub radius_km: Option<f64>,
    pub vehicle_class: Option<String>,
    pub limit: Option<usize>,
}

/// Open trips of the driver's class around the given point, or around the
/// driver's last reported position.
pub async fn nearby_trips_for_driver(
    state: &AppState,
    principal: &Principal,
    query: &NearbyQuery,
) -> AppResult<Vec<Match<trip::Model>>> {
    let driver = driver::Entity::find_by_id(principal.id)
        .one(&state.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Driver profile not found".to_string()))?;

    let origin = match (query.lat, query.lon) {
        (Some(lat), Some(lon)) => GeoPoint::new(lat, lon)?,
        _ => GeoPoint::from_parts(driver.last_lat, driver.last_lon).ok_or_else(|| {
            AppError::Validation("Location is required to search nearby trips".to_string())
        })?,
    };

    matcher::nearby_open_trips(
        &state.db,
        &origin,
        query.radius_km.unwrap_or(state.config.dispatch.broadcast_radius_km),
        Some(driver.vehicle_class.as_str()),
        query.limit.unwrap_or(10),
    )
    .await
}

pub async fn nearby_drivers(state: &AppState, query: &NearbyQuery) -> AppResult<Vec<Match<driver::Model>>> {
    let (Some(lat), Some(lon)) = (query.lat, query.lon) else {
        return Err(AppError::Validation(
            "Valid latitude and longitude are required".to_string(),
        ));
    };
    let class = query
        .vehicle_class
        .as_deref()
        .map(|c| fare::normalize_vehicle_class(Some(c)));

    matcher::nearby_drivers(
        &state.db,
        DriverSearch {
            lat,
            lon,
            radius_km: query.radius_km.unwrap_or(state.config.dispatch.broadcast_radius_km),
            class_filter: class.as_deref(),
            limit: query.limit.unwrap_or(state.config.dispatch.driver_fanout),
            exclude: &[],
            correct_origin: state.config.dispatch.coordinate_correction,
        },
    )
    .await
}

// ============ Participants ============

/// Make sure a passenger row exists with a usable name and phone, taking
/// fresh values from the token when it carries them.
async fn upsert_passenger(state: &AppState, principal: &Principal) -> AppResult<passenger::Model> {
    let existing = passenger::Entity::find_by_id(principal.id).one(&state.db).await?;

    let name = principal
        .name
        .clone()
        .or_else(|| existing.as_ref().map(|p| p.name.clone()))
        .filter(|n| !n.trim().is_empty());
    let phone = principal
        .phone
        .clone()
        .or_else(|| existing.as_ref().map(|p| p.phone.clone()))
        .filter(|p| !p.trim().is_empty());

    let (Some(name), Some(phone)) = (name, phone) else {
        return Err(AppError::Integration(
            "Passenger identity is missing a name or phone number".to_string(),
        ));
    };

    match existing {
        Some(row) if row.name == name && row.phone == phone => Ok(row),
        Some(row) => {
            let mut active: passenger::ActiveModel = row.into();
            active.name = Set(name);
            active.phone = Set(phone);
            Ok(active.update(&state.db).await?)
        }
        None => {
            let row = passenger::ActiveModel {
                id: Set(principal.id),
                name: Set(name),
                phone: Set(phone),
                last_lat: Set(None),
                last_lon: Set(None),
                location_updated_at: Set(None),
                reward_points: Set(0),
                created_at: Set(time::now()),
            };
            // First requests may race; whichever insert lands first wins
            passenger::Entity::insert(row)
                .on_conflict(OnConflict::column(passenger::Column::Id).do_nothing().to_owned())
                .exec_without_returning(&state.db)
                .await?;
            passenger::Entity::find_by_id(principal.id)
                .one(&state.db)
                .await?
                .ok_or_else(|| AppError::Internal("Passenger missing after insert".to_string()))
        }
    }
}

async fn upsert_driver(
    state: &AppState,
    principal: &Principal,
    vehicle_class: Option<&str>,
) -> AppResult<driver::Model> {
    if let Some(row) = driver::Entity::find_by_id(principal.id).one(&state.db).await? {
        return Ok(row);
    }

    let fresh = driver::ActiveModel {
        id: Set(principal.id),
        name: Set(principal.name.clone().unwrap_or_else(|| "Driver".to_string())),
        phone: Set(principal.phone.clone()),
        vehicle_class: Set(fare::normalize_vehicle_class(vehicle_class)),
        available: Set(false),
        last_lat: Set(None),
        last_lon: Set(None),
        last_bearing: Set(None),
        location_updated_at: Set(None),
        rating: Set(0.0),
        rating_count: Set(0),
        reward_points: Set(0),
        created_at: Set(time::now()),
    };
    let inserted = driver::Entity::insert(fresh)
        .on_conflict(OnConflict::column(driver::Column::Id).do_nothing().to_owned())
        .exec_without_returning(&state.db)
        .await?;
    let row = driver::Entity::find_by_id(principal.id)
        .one(&state.db)
        .await?
        .ok_or_else(|| AppError::Internal("Driver missing after insert".to_string()))?;
    if inserted > 0 {
        tracing::info!(driver_id = %row.id, vehicle_class = %row.vehicle_class, "Driver registered");
    }
    Ok(row)
}

pub async fn update_passenger_location(
    state: &AppState,
    principal: &Principal,
    point: &GeoPoint,
) -> AppResult<passenger::Model> {
    let point = validated(point)?;
    let row = upsert_passenger(state, principal).await?;

    let mut active: passenger::ActiveModel = row.into();
    active.last_lat = Set(Some(point.lat));
    active.last_lon = Set(Some(point.lon));
    active.location_updated_at = Set(Some(time::now()));
    Ok(active.update(&state.db).await?)
}

/// Driver heartbeat. Availability may only be toggled while the driver
/// holds no accepted or ongoing trip.
pub async fn driver_heartbeat(
    state: &AppState,
    principal: &Principal,
    beat: &Heartbeat,
) -> AppResult<driver::Model> {
    principal.require_role(Role::Driver)?;

    let point = match (beat.lat, beat.lon) {
        (Some(lat), Some(lon)) => Some(GeoPoint::new(lat, lon)?),
        (None, None) => None,
        _ => {
            return Err(AppError::Validation(
                "Both latitude and longitude are required".to_string(),
            ))
        }
    };
    if let Some(bearing) = beat.bearing {
        if !bearing.is_finite() {
            return Err(AppError::Validation("Bearing must be a number".to_string()));
        }
    }

    let row = upsert_driver(state, principal, beat.vehicle_class.as_deref()).await?;
    let txn = state.db.begin().await?;

    if let Some(available) = beat.available {
        let busy = trip::Entity::find()
            .select_only()
            .column(trip::Column::DriverId)
            .filter(trip::Column::DriverId.eq(row.id))
            .filter(trip::Column::Status.is_in(TripStatus::ACTIVE_FOR_DRIVER))
            .into_query();

        let toggled = driver::Entity::update_many()
            .col_expr(driver::Column::Available, Expr::value(available))
            .filter(driver::Column::Id.eq(row.id))
            .filter(driver::Column::Id.not_in_subquery(busy))
            .exec(&txn)
            .await?;
        if toggled.rows_affected == 0 {
            return Err(AppError::Conflict(
                "Availability cannot change during an active trip".to_string(),
            ));
        }
    }

    if let Some(point) = point {
        driver::Entity::update_many()
            .col_expr(driver::Column::LastLat, Expr::value(Some(point.lat)))
            .col_expr(driver::Column::LastLon, Expr::value(Some(point.lon)))
            .col_expr(driver::Column::LastBearing, Expr::value(beat.bearing))
            .col_expr(driver::Column::LocationUpdatedAt, Expr::value(Some(time::now())))
            .filter(driver::Column::Id.eq(row.id))
            .exec(&txn)
            .await?;
    }

    txn.commit().await?;

    if let Some(point) = point {
        let active = trip::Entity::find()
            .filter(trip::Column::DriverId.eq(row.id))
            .filter(trip::Column::Status.is_in(TripStatus::ACTIVE_FOR_DRIVER))
            .one(&state.db)
            .await;
        match active {
            Ok(Some(trip)) => {
                state.dispatcher.driver_moved(row.id, &trip, point, beat.bearing);
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(driver_id = %row.id, error = %e, "Failed to look up active trip for position relay");
            }
        }
    }

    driver::Entity::find_by_id(row.id)
        .one(&state.db)
        .await?
        .ok_or_else(|| AppError::NotFound("Driver profile not found".to_string()))
}

// ============ Transitions ============

/// Create a `requested` trip and offer it to nearby drivers.
pub async fn create_trip(
    state: &AppState,
    principal: &Principal,
    request: &TripRequest,
) -> AppResult<trip::Model> {
    principal.require_role(Role::Passenger)?;
    let pickup = validated(&request.pickup)?;
    let dropoff = validated(&request.dropoff)?;
    let class = fare::normalize_vehicle_class(request.vehicle_class.as_deref());

    let passenger = upsert_passenger(state, principal).await?;

    let open = trip::Entity::find()
        .filter(trip::Column::PassengerId.eq(passenger.id))
        .filter(trip::Column::Status.is_in(TripStatus::OPEN))
        .count(&state.db)
        .await?;
    if open > 0 {
        return Err(AppError::Conflict(
            "Passenger already has an open trip".to_string(),
        ));
    }

    let estimate = fare::estimate(&state.db, &class, &pickup, &dropoff).await?;

    let trip = trip::ActiveModel {
        id: Set(Uuid::new_v4()),
        passenger_id: Set(passenger.id),
        passenger_name: Set(passenger.name.clone()),
        passenger_phone: Set(passenger.phone.clone()),
        driver_id: Set(None),
        vehicle_class: Set(class),
        pickup_lat: Set(pickup.lat),
        pickup_lon: Set(pickup.lon),
        dropoff_lat: Set(dropoff.lat),
        dropoff_lon: Set(dropoff.lon),
        distance_km: Set(estimate.distance_km),
        fare_estimated: Set(estimate.fare_estimated),
        fare_final: Set(None),
        base_fare: Set(estimate.breakdown.base),
        distance_cost: Set(estimate.breakdown.distance_cost),
        time_cost: Set(estimate.breakdown.time_cost),
        waiting_cost: Set(estimate.breakdown.waiting_cost),
        surge_multiplier: Set(estimate.breakdown.surge_multiplier),
        status: Set(TripStatus::Requested),
        created_at: Set(time::now()),
        accepted_at: Set(None),
        started_at: Set(None),
        completed_at: Set(None),
        canceled_at: Set(None),
        canceled_by: Set(None),
        cancel_reason: Set(None),
        driver_rating: Set(None),
        driver_comment: Set(None),
        passenger_rating: Set(None),
        passenger_comment: Set(None),
    }
    .insert(&state.db)
    .await
    .map_err(|e| match e.sql_err() {
        // A concurrent request won the open-trip slot
        Some(SqlErr::UniqueConstraintViolation(_)) => {
            AppError::Conflict("Passenger already has an open trip".to_string())
        }
        _ => AppError::from(e),
    })?;

    tracing::info!(
        trip_id = %trip.id,
        passenger_id = %trip.passenger_id,
        vehicle_class = %trip.vehicle_class,
        fare_estimated = trip.fare_estimated,
        "Trip requested"
    );
    state.dispatcher.announce_trip(trip.clone());
    Ok(trip)
}

/// The single-winner claim shared by driver accept and admin assignment.
async fn claim(state: &AppState, trip_id: Uuid, driver_id: Uuid) -> AppResult<trip::Model> {
    let txn = state.db.begin().await?;

    let trip = find_trip(&txn, trip_id).await?;
    ensure_not_terminal(&trip)?;
    if trip.status != TripStatus::Requested || trip.driver_id.is_some() {
        return Err(AppError::Conflict("Trip has already been taken".to_string()));
    }

    driver::Entity::find_by_id(driver_id)
        .one(&txn)
        .await?
        .ok_or_else(|| AppError::NotFound("Driver not found".to_string()))?;

    let reserved = driver::Entity::update_many()
        .col_expr(driver::Column::Available, Expr::value(false))
        .filter(driver::Column::Id.eq(driver_id))
        .filter(driver::Column::Available.eq(true))
        .exec(&txn)
        .await?;
    if reserved.rows_affected == 0 {
        return Err(AppError::Conflict("Driver is not available".to_string()));
    }

    let busy = trip::Entity::find()
        .filter(trip::Column::DriverId.eq(driver_id))
        .filter(trip::Column::Status.is_in(TripStatus::ACTIVE_FOR_DRIVER))
        .count(&txn)
        .await?;
    if busy > 0 {
        return Err(AppError::Conflict("Driver already has an active trip".to_string()));
    }

    let claimed = trip::Entity::update_many()
        .set(trip::ActiveModel {
            driver_id: Set(Some(driver_id)),
            status: Set(TripStatus::Accepted),
            accepted_at: Set(Some(stamp_after(trip.created_at))),
            ..Default::default()
        })
        .filter(trip::Column::Id.eq(trip_id))
        .filter(trip::Column::Status.eq(TripStatus::Requested))
        .filter(trip::Column::DriverId.is_null())
        .exec(&txn)
        .await?;
    if claimed.rows_affected == 0 {
        return Err(AppError::Conflict("Trip has already been taken".to_string()));
    }

    let trip = find_trip(&txn, trip_id).await?;
    txn.commit().await?;

    tracing::info!(trip_id = %trip.id, driver_id = %driver_id, "Trip accepted");
    state.dispatcher.withdraw_offer(trip.clone(), driver_id);
    Ok(trip)
}

pub async fn accept_trip(state: &AppState, principal: &Principal, trip_id: Uuid) -> AppResult<trip::Model> {
    principal.require_role(Role::Driver)?;
    claim(state, trip_id, principal.id).await
}

pub async fn assign_trip(
    state: &AppState,
    principal: &Principal,
    trip_id: Uuid,
    driver_id: Uuid,
) -> AppResult<trip::Model> {
    principal.require_role(Role::Admin)?;
    let trip = claim(state, trip_id, driver_id).await?;
    tracing::info!(trip_id = %trip.id, driver_id = %driver_id, admin_id = %principal.id, "Trip assigned by admin");
    Ok(trip)
}

pub async fn start_trip(state: &AppState, principal: &Principal, trip_id: Uuid) -> AppResult<trip::Model> {
    let trip = find_trip(&state.db, trip_id).await?;
    ensure_not_terminal(&trip)?;
    ensure_assigned_driver(&trip, principal)?;
    let accepted_at = match (trip.status, trip.accepted_at) {
        (TripStatus::Accepted, Some(at)) => at,
        _ => {
            return Err(AppError::Conflict(format!(
                "Cannot start a trip that is {}",
                trip.status.as_str()
            )))
        }
    };

    let started = trip::Entity::update_many()
        .set(trip::ActiveModel {
            status: Set(TripStatus::Ongoing),
            started_at: Set(Some(stamp_after(accepted_at))),
            ..Default::default()
        })
        .filter(trip::Column::Id.eq(trip_id))
        .filter(trip::Column::Status.eq(TripStatus::Accepted))
        .filter(trip::Column::DriverId.eq(principal.id))
        .exec(&state.db)
        .await?;
    if started.rows_affected == 0 {
        return Err(AppError::Conflict("Trip changed state, retry".to_string()));
    }
    state.tracker.start(state.db.clone(), trip_id, principal.id);

    let trip = find_trip(&state.db, trip_id).await?;
    tracing::info!(trip_id = %trip.id, driver_id = %principal.id, "Trip started");
    state.dispatcher.trip_updated(trip.clone());
    Ok(trip)
}

fn history_row(
    trip: &trip::Model,
    status: TripStatus,
    samples: &[trip_location::Model],
    ended_at: sea_orm::prelude::DateTimeWithTimeZone,
) -> trip_history::ActiveModel {
    let points = tracker::trace_points(samples);
    trip_history::ActiveModel {
        trip_id: Set(trip.id),
        driver_id: Set(trip.driver_id),
        passenger_id: Set(trip.passenger_id),
        vehicle_class: Set(trip.vehicle_class.clone()),
        status: Set(status),
        path_distance_km: Set(path_distance_km(&points)),
        sample_count: Set(samples.len() as i32),
        duration_seconds: Set(trip.started_at.map(|s| (ended_at - s).num_seconds())),
        started_at: Set(trip.started_at),
        ended_at: Set(ended_at),
        ..Default::default()
    }
}

/// Final fare: the estimate, or the traced path priced with the active
/// tariff when trace billing is on and the trace has at least two samples.
async fn final_fare(state: &AppState, trip: &trip::Model, samples: &[trip_location::Model]) -> AppResult<f64> {
    if !state.config.dispatch.fare_from_trace || samples.len() < 2 {
        return Ok(trip.fare_estimated);
    }
    let tariff = fare::active_tariff(&state.db, &trip.vehicle_class).await?;
    let traced = path_distance_km(&tracker::trace_points(samples));
    Ok(fare::price_distance(&tariff, traced).fare_estimated)
}

pub async fn complete_trip(
    state: &AppState,
    principal: &Principal,
    trip_id: Uuid,
) -> AppResult<CompletionReport> {
    let trip = find_trip(&state.db, trip_id).await?;
    ensure_not_terminal(&trip)?;
    ensure_assigned_driver(&trip, principal)?;
    let started_at = match (trip.status, trip.started_at) {
        (TripStatus::Ongoing, Some(at)) => at,
        _ => {
            return Err(AppError::Conflict(format!(
                "Cannot complete a trip that is {}",
                trip.status.as_str()
            )))
        }
    };

    if let Err(e) = tracker::record_sample(&state.db, trip.id, principal.id).await {
        tracing::warn!(trip_id = %trip.id, error = %e, "Failed to record final trip sample");
    }
    let samples = tracker::trace(&state.db, trip.id).await?;
    let fare_final = final_fare(state, &trip, &samples).await?;
    let completed_at = stamp_after(started_at);

    let txn = state.db.begin().await?;
    let completed = trip::Entity::update_many()
        .set(trip::ActiveModel {
            status: Set(TripStatus::Completed),
            completed_at: Set(Some(completed_at)),
            fare_final: Set(Some(fare_final)),
            ..Default::default()
        })
        .filter(trip::Column::Id.eq(trip_id))
        .filter(trip::Column::Status.eq(TripStatus::Ongoing))
        .filter(trip::Column::DriverId.eq(principal.id))
        .exec(&txn)
        .await?;
    if completed.rows_affected == 0 {
        return Err(AppError::Conflict("Trip changed state, retry".to_string()));
    }

    driver::Entity::update_many()
        .col_expr(driver::Column::Available, Expr::value(true))
        .filter(driver::Column::Id.eq(principal.id))
        .exec(&txn)
        .await?;

    let trip = find_trip(&txn, trip_id).await?;
    history_row(&trip, TripStatus::Completed, &samples, completed_at)
        .insert(&txn)
        .await?;
    ledger::enqueue_settlement(&txn, &trip, state.config.settlement.default_commission_rate).await?;
    txn.commit().await?;

    state.tracker.stop(trip.id);
    state.dispatcher.throttle().forget(principal.id);
    tracing::info!(trip_id = %trip.id, driver_id = %principal.id, fare_final, "Trip completed");

    let settlement = match ledger::settle(
        &state.db,
        trip.id,
        state.config.settlement.default_commission_rate,
    )
    .await
    {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::error!(trip_id = %trip.id, error = %e, "Settlement could not be attempted");
            SettlementOutcome::Failed {
                error: e.to_string(),
            }
        }
    };

    let reward_points = match ledger::credit_rewards(&state.db, &trip).await {
        Ok(points) => points,
        Err(e) => {
            tracing::warn!(trip_id = %trip.id, error = %e, "Failed to credit reward points");
            0
        }
    };

    state.dispatcher.trip_completed(trip.clone(), settlement.clone());
    Ok(CompletionReport {
        trip,
        settlement,
        reward_points,
    })
}

pub async fn cancel_trip(
    state: &AppState,
    principal: &Principal,
    trip_id: Uuid,
    reason: Option<String>,
) -> AppResult<trip::Model> {
    let trip = find_trip(&state.db, trip_id).await?;
    if !principal.is_admin() && !trip.is_member(principal.id) {
        return Err(AppError::Forbidden(
            "Only the passenger, the assigned driver or an admin can cancel".to_string(),
        ));
    }
    ensure_not_terminal(&trip)?;

    let canceled_at = stamp_after(trip.last_transition_at());
    let samples = tracker::trace(&state.db, trip.id).await?;

    let txn = state.db.begin().await?;
    let canceled = trip::Entity::update_many()
        .set(trip::ActiveModel {
            status: Set(TripStatus::Canceled),
            canceled_at: Set(Some(canceled_at)),
            canceled_by: Set(Some(principal.role.as_str().to_string())),
            cancel_reason: Set(reason.filter(|r| !r.trim().is_empty())),
            ..Default::default()
        })
        .filter(trip::Column::Id.eq(trip_id))
        .filter(trip::Column::Status.eq(trip.status))
        .exec(&txn)
        .await?;
    if canceled.rows_affected == 0 {
        return Err(AppError::Conflict("Trip changed state, retry".to_string()));
    }

    if let Some(driver_id) = trip.driver_id {
        driver::Entity::update_many()
            .col_expr(driver::Column::Available, Expr::value(true))
            .filter(driver::Column::Id.eq(driver_id))
            .exec(&txn)
            .await?;
    }

    let trip = find_trip(&txn, trip_id).await?;
    history_row(&trip, TripStatus::Canceled, &samples, canceled_at)
        .insert(&txn)
        .await?;
    txn.commit().await?;

    state.tracker.stop(trip.id);
    if let Some(driver_id) = trip.driver_id {
        state.dispatcher.throttle().forget(driver_id);
    }
    tracing::info!(
        trip_id = %trip.id,
        canceled_by = principal.role.as_str(),
        "Trip canceled"
    );
    state.dispatcher.trip_updated(trip.clone());
    Ok(trip)
}

// ============ Ratings ============

/// Passenger rates the driver of a completed trip, once.
pub async fn rate_driver(
    state: &AppState,
    principal: &Principal,
    trip_id: Uuid,
    rating: &Rating,
) -> AppResult<trip::Model> {
    validate_rating(rating)?;
    let trip = find_trip(&state.db, trip_id).await?;
    if trip.passenger_id != principal.id {
        return Err(AppError::Forbidden("Only the passenger can rate the driver".to_string()));
    }
    if trip.status != TripStatus::Completed {
        return Err(AppError::Conflict("Only completed trips can be rated".to_string()));
    }
    let driver_id = trip
        .driver_id
        .ok_or_else(|| AppError::Conflict("Trip has no driver".to_string()))?;

    let txn = state.db.begin().await?;
    let rated = trip::Entity::update_many()
        .set(trip::ActiveModel {
            driver_rating: Set(Some(rating.rating)),
            driver_comment: Set(rating.comment.clone()),
            ..Default::default()
        })
        .filter(trip::Column::Id.eq(trip_id))
        .filter(trip::Column::DriverRating.is_null())
        .exec(&txn)
        .await?;
    if rated.rows_affected == 0 {
        return Err(AppError::Conflict("Driver already rated for this trip".to_string()));
    }

    // Running mean: (rating * count + new) / (count + 1)
    let total = Expr::expr(
        Expr::col(driver::Column::Rating).mul(Expr::col(driver::Column::RatingCount)),
    )
    .add(rating.rating as f64);
    let mean = Expr::expr(total).div(Expr::col(driver::Column::RatingCount).add(1));
    driver::Entity::update_many()
        .col_expr(driver::Column::Rating, mean)
        .col_expr(driver::Column::RatingCount, Expr::col(driver::Column::RatingCount).add(1))
        .filter(driver::Column::Id.eq(driver_id))
        .exec(&txn)
        .await?;

    let trip = find_trip(&txn, trip_id).await?;
    txn.commit().await?;
    tracing::info!(trip_id = %trip.id, driver_id = %driver_id, rating = rating.rating, "Driver rated");
    Ok(trip)
}

/// Driver rates the passenger of a completed trip, once.
pub async fn rate_passenger(
    state: &AppState,
    principal: &Principal,
    trip_id: Uuid,
    rating: &Rating,
) -> AppResult<trip::Model> {
    validate_rating(rating)?;
    let trip = find_trip(&state.db, trip_id).await?;
    ensure_assigned_driver(&trip, principal)?;
    if trip.status != TripStatus::Completed {
        return Err(AppError::Conflict("Only completed trips can be rated".to_string()));
    }

    let rated = trip::Entity::update_many()
        .set(trip::ActiveModel {
            passenger_rating: Set(Some(rating.rating)),
            passenger_comment: Set(rating.comment.clone()),
            ..Default::default()
        })
        .filter(trip::Column::Id.eq(trip_id))
        .filter(trip::Column::PassengerRating.is_null())
        .exec(&state.db)
        .await?;
    if rated.rows_affected == 0 {
        return Err(AppError::Conflict("Passenger already rated for this trip".to_string()));
    }

    find_trip(&state.db, trip_id).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rating_bounds() {
        let ok = Rating { rating: 5, comment: None };
        let low = Rating { rating: 0, comment: None };
        let high = Rating { rating: 6, comment: None };
        assert!(validate_rating(&ok).is_ok());
        assert!(validate_rating(&low).is_err());
        assert!(validate_rating(&high).is_err());
    }
}
