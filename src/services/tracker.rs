use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set,
};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::entities::{driver, trip, trip::TripStatus, trip_location};
use crate::error::AppResult;
use crate::utils::geo::GeoPoint;
use crate::utils::time;

/// Registry of per-trip location tracers. A tracer samples the driver's
/// last reported position into `trip_location` until it is stopped or
/// finds the trip no longer ongoing.
#[derive(Clone)]
pub struct TripTracker {
    interval: Duration,
    tasks: Arc<Mutex<HashMap<Uuid, JoinHandle<()>>>>,
}

impl TripTracker {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            tasks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn tasks(&self) -> std::sync::MutexGuard<'_, HashMap<Uuid, JoinHandle<()>>> {
        self.tasks.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn start(&self, db: DatabaseConnection, trip_id: Uuid, driver_id: Uuid) {
        let mut tasks = self.tasks();
        if tasks.contains_key(&trip_id) {
            tracing::warn!(trip_id = %trip_id, "Trip tracer already running");
            return;
        }

        let period = self.interval;
        let registry = Arc::clone(&self.tasks);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                match is_ongoing(&db, trip_id).await {
                    Ok(true) => {}
                    Ok(false) => break,
                    Err(e) => {
                        tracing::warn!(trip_id = %trip_id, error = %e, "Failed to check trip status");
                        continue;
                    }
                }
                if let Err(e) = record_sample(&db, trip_id, driver_id).await {
                    tracing::warn!(trip_id = %trip_id, error = %e, "Failed to record trip sample");
                }
            }
            registry.lock().unwrap_or_else(|e| e.into_inner()).remove(&trip_id);
            tracing::info!(trip_id = %trip_id, "Trip no longer ongoing, tracer exited");
        });

        tasks.insert(trip_id, handle);
        tracing::info!(trip_id = %trip_id, driver_id = %driver_id, "Trip tracer started");
    }

    /// Abort the tracer for a trip. Returns whether one was running.
    pub fn stop(&self, trip_id: Uuid) -> bool {
        match self.tasks().remove(&trip_id) {
            Some(handle) => {
                handle.abort();
                tracing::info!(trip_id = %trip_id, "Trip tracer stopped");
                true
            }
            None => false,
        }
    }

    pub fn is_tracking(&self, trip_id: Uuid) -> bool {
        self.tasks().contains_key(&trip_id)
    }

    pub fn active_trips(&self) -> Vec<Uuid> {
        self.tasks().keys().copied().collect()
    }

    pub fn shutdown_all(&self) {
        let drained: Vec<(Uuid, JoinHandle<()>)> = self.tasks().drain().collect();
        for (_, handle) in &drained {
            handle.abort();
        }
        tracing::info!(active_trips = drained.len(), "Trip tracers shut down");
    }
}

async fn is_ongoing<C: ConnectionTrait>(db: &C, trip_id: Uuid) -> AppResult<bool> {
    let found = trip::Entity::find_by_id(trip_id).one(db).await?;
    Ok(found.is_some_and(|t| t.status == TripStatus::Ongoing))
}

/// Append the driver's last known position to the trip's trace, if any.
pub async fn record_sample<C: ConnectionTrait>(
    db: &C,
    trip_id: Uuid,
    driver_id: Uuid,
) -> AppResult<Option<trip_location::Model>> {
    let Some(driver) = driver::Entity::find_by_id(driver_id).one(db).await? else {
        return Ok(None);
    };
    let Some(point) = GeoPoint::from_parts(driver.last_lat, driver.last_lon) else {
        return Ok(None);
    };

    let sample = trip_location::ActiveModel {
        trip_id: Set(trip_id),
        driver_id: Set(driver_id),
        lat: Set(point.lat),
        lon: Set(point.lon),
        bearing: Set(driver.last_bearing),
        recorded_at: Set(time::now()),
        ..Default::default()
    }
    .insert(db)
    .await?;

    Ok(Some(sample))
}

/// Ordered trace of a trip.
pub async fn trace<C: ConnectionTrait>(db: &C, trip_id: Uuid) -> AppResult<Vec<trip_location::Model>> {
    Ok(trip_location::Entity::find()
        .filter(trip_location::Column::TripId.eq(trip_id))
        .order_by_asc(trip_location::Column::RecordedAt)
        .order_by_asc(trip_location::Column::Id)
        .all(db)
        .await?)
}

pub fn trace_points(samples: &[trip_location::Model]) -> Vec<GeoPoint> {
    samples
        .iter()
        .filter_map(|s| GeoPoint::from_parts(Some(s.lat), Some(s.lon)))
        .collect()
}
