use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::config::DispatchConfig;
use crate::entities::{role::Role, trip};
use crate::error::{AppError, AppResult};
use crate::principal::Principal;
use crate::services::ledger::SettlementOutcome;
use crate::services::matcher::{self, DriverSearch};
use crate::utils::geo::GeoPoint;

// ============ Events ============

/// Full offer pushed to candidate drivers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TripOffer {
    pub trip_id: Uuid,
    pub passenger_name: String,
    pub vehicle_class: String,
    pub pickup: GeoPoint,
    pub dropoff: GeoPoint,
    pub distance_km: f64,
    pub fare_estimated: f64,
    pub distance_to_pickup_km: f64,
}

/// Lower-detail notice for passengers near a new request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NearbyTrip {
    pub trip_id: Uuid,
    pub vehicle_class: String,
    pub distance_km: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionUpdate {
    pub trip_id: Uuid,
    pub driver_id: Uuid,
    pub lat: f64,
    pub lon: f64,
    pub bearing: Option<f64>,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionSummary {
    pub trip_id: Uuid,
    pub fare_final: f64,
    pub settlement: SettlementOutcome,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorReply {
    pub error: String,
    pub message: String,
}

impl From<&AppError> for ErrorReply {
    fn from(err: &AppError) -> Self {
        Self {
            error: err.kind().to_string(),
            message: err.to_string(),
        }
    }
}

/// Server to client traffic, serialized as `{"event": name, "data": payload}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum TripEvent {
    #[serde(rename = "trip:new")]
    New(TripOffer),
    #[serde(rename = "trip:nearby")]
    Nearby(NearbyTrip),
    #[serde(rename = "trip:offer_withdrawn")]
    OfferWithdrawn { trip_id: Uuid },
    #[serde(rename = "trip:update")]
    Update(Box<trip::Model>),
    #[serde(rename = "trip:position")]
    Position(PositionUpdate),
    #[serde(rename = "trip:completed")]
    Completed(CompletionSummary),
    #[serde(rename = "trip:status")]
    Status(Box<trip::Model>),
    #[serde(rename = "trip:error")]
    Error(ErrorReply),
}

impl TripEvent {
    pub fn name(&self) -> &'static str {
        match self {
            TripEvent::New(_) => "trip:new",
            TripEvent::Nearby(_) => "trip:nearby",
            TripEvent::OfferWithdrawn { .. } => "trip:offer_withdrawn",
            TripEvent::Update(_) => "trip:update",
            TripEvent::Position(_) => "trip:position",
            TripEvent::Completed(_) => "trip:completed",
            TripEvent::Status(_) => "trip:status",
            TripEvent::Error(_) => "trip:error",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Audience {
    Driver(Uuid),
    Passenger(Uuid),
    /// Everyone attached to a trip at the time of publishing.
    Trip { trip_id: Uuid, members: Vec<Uuid> },
}

impl Audience {
    pub fn for_trip(trip: &trip::Model) -> Self {
        Audience::Trip {
            trip_id: trip.id,
            members: trip.members(),
        }
    }

    pub fn includes(&self, principal: &Principal) -> bool {
        match self {
            Audience::Driver(id) => principal.role == Role::Driver && principal.id == *id,
            Audience::Passenger(id) => principal.role == Role::Passenger && principal.id == *id,
            Audience::Trip { members, .. } => members.contains(&principal.id),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Envelope {
    pub audience: Audience,
    pub event: TripEvent,
}

// ============ Broadcaster ============

/// Best-effort push channel. Implementations may drop events.
#[async_trait]
pub trait Broadcaster: Send + Sync {
    async fn publish(&self, audience: Audience, event: TripEvent) -> AppResult<()>;
}

/// In-process hub that WebSocket sessions subscribe to.
#[derive(Clone)]
pub struct EventHub {
    sender: broadcast::Sender<Arc<Envelope>>,
}

impl EventHub {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<Envelope>> {
        self.sender.subscribe()
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl Broadcaster for EventHub {
    async fn publish(&self, audience: Audience, event: TripEvent) -> AppResult<()> {
        let name = event.name();
        // An error only means nobody is connected right now
        if self.sender.send(Arc::new(Envelope { audience, event })).is_err() {
            tracing::debug!(event = name, "No subscribers for event");
        }
        Ok(())
    }
}

// ============ Position throttle ============

/// Admits at most one position broadcast per driver per interval.
#[derive(Clone)]
pub struct PositionThrottle {
    min_interval: Duration,
    last_sent: Arc<Mutex<HashMap<Uuid, Instant>>>,
}

impl PositionThrottle {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last_sent: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn admit(&self, driver_id: Uuid) -> bool {
        self.admit_at(driver_id, Instant::now())
    }

    pub fn admit_at(&self, driver_id: Uuid, now: Instant) -> bool {
        let mut last_sent = self.last_sent.lock().unwrap_or_else(|e| e.into_inner());
        match last_sent.get(&driver_id) {
            Some(prev) if now.saturating_duration_since(*prev) < self.min_interval => false,
            _ => {
                last_sent.insert(driver_id, now);
                true
            }
        }
    }

    pub fn is_tracking(&self, driver_id: Uuid) -> bool {
        self.last_sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(&driver_id)
    }

    pub fn forget(&self, driver_id: Uuid) {
        self.last_sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&driver_id);
    }
}

// ============ Fan-out ============

/// Lifecycle-facing side of dispatch. Every method spawns its work and
/// returns immediately; failures are logged, never propagated.
#[derive(Clone)]
pub struct Dispatcher {
    db: DatabaseConnection,
    broadcaster: Arc<dyn Broadcaster>,
    throttle: PositionThrottle,
    config: DispatchConfig,
}

impl Dispatcher {
    pub fn new(
        db: DatabaseConnection,
        broadcaster: Arc<dyn Broadcaster>,
        config: DispatchConfig,
    ) -> Self {
        let throttle = PositionThrottle::new(config.location_throttle);
        Self {
            db,
            broadcaster,
            throttle,
            config,
        }
    }

    pub fn throttle(&self) -> &PositionThrottle {
        &self.throttle
    }

    fn spawn<F>(&self, what: &'static str, trip_id: Uuid, work: F) -> JoinHandle<()>
    where
        F: std::future::Future<Output = AppResult<()>> + Send + 'static,
    {
        tokio::spawn(async move {
            if let Err(e) = work.await {
                tracing::warn!(trip_id = %trip_id, error = %e, "Dispatch {} failed", what);
            }
        })
    }

    /// Offer a new trip to nearby drivers and let nearby passengers know.
    pub fn announce_trip(&self, trip: trip::Model) -> JoinHandle<()> {
        let this = self.clone();
        self.spawn("announce", trip.id, async move {
            let pickup = GeoPoint::new(trip.pickup_lat, trip.pickup_lon)?;
            let dropoff = GeoPoint::new(trip.dropoff_lat, trip.dropoff_lon)?;

            let drivers = matcher::nearby_drivers(
                &this.db,
                DriverSearch {
                    lat: pickup.lat,
                    lon: pickup.lon,
                    radius_km: this.config.broadcast_radius_km,
                    class_filter: Some(trip.vehicle_class.as_str()),
                    limit: this.config.driver_fanout,
                    exclude: &[],
                    correct_origin: false,
                },
            )
            .await?;

            for candidate in &drivers {
                let offer = TripOffer {
                    trip_id: trip.id,
                    passenger_name: trip.passenger_name.clone(),
                    vehicle_class: trip.vehicle_class.clone(),
                    pickup,
                    dropoff,
                    distance_km: trip.distance_km,
                    fare_estimated: trip.fare_estimated,
                    distance_to_pickup_km: candidate.distance_km,
                };
                this.publish_logged(Audience::Driver(candidate.entity.id), TripEvent::New(offer))
                    .await;
            }

            let passengers = matcher::nearby_passengers(
                &this.db,
                &pickup,
                this.config.broadcast_radius_km,
                this.config.nearby_passenger_limit,
                &[trip.passenger_id],
            )
            .await?;

            for nearby in &passengers {
                let notice = NearbyTrip {
                    trip_id: trip.id,
                    vehicle_class: trip.vehicle_class.clone(),
                    distance_km: nearby.distance_km,
                };
                this.publish_logged(
                    Audience::Passenger(nearby.entity.id),
                    TripEvent::Nearby(notice),
                )
                .await;
            }

            tracing::info!(
                trip_id = %trip.id,
                drivers = drivers.len(),
                passengers = passengers.len(),
                "Trip announced"
            );
            Ok(())
        })
    }

    /// Retract the offer from other nearby drivers once a winner holds the trip.
    pub fn withdraw_offer(&self, trip: trip::Model, winner: Uuid) -> JoinHandle<()> {
        let this = self.clone();
        self.spawn("withdraw", trip.id, async move {
            let losers = matcher::nearby_drivers(
                &this.db,
                DriverSearch {
                    lat: trip.pickup_lat,
                    lon: trip.pickup_lon,
                    radius_km: this.config.broadcast_radius_km,
                    class_filter: Some(trip.vehicle_class.as_str()),
                    limit: usize::MAX,
                    exclude: &[winner],
                    correct_origin: false,
                },
            )
            .await?;

            for loser in &losers {
                this.publish_logged(
                    Audience::Driver(loser.entity.id),
                    TripEvent::OfferWithdrawn { trip_id: trip.id },
                )
                .await;
            }

            this.publish_logged(Audience::for_trip(&trip), TripEvent::Update(Box::new(trip)))
                .await;
            Ok(())
        })
    }

    pub fn trip_updated(&self, trip: trip::Model) -> JoinHandle<()> {
        let this = self.clone();
        self.spawn("update", trip.id, async move {
            this.publish_logged(Audience::for_trip(&trip), TripEvent::Update(Box::new(trip)))
                .await;
            Ok(())
        })
    }

    pub fn trip_completed(&self, trip: trip::Model, settlement: SettlementOutcome) -> JoinHandle<()> {
        let this = self.clone();
        self.spawn("completion", trip.id, async move {
            let summary = CompletionSummary {
                trip_id: trip.id,
                fare_final: trip.fare_final.unwrap_or(trip.fare_estimated),
                settlement,
            };
            this.publish_logged(Audience::for_trip(&trip), TripEvent::Completed(summary))
                .await;
            Ok(())
        })
    }

    /// Relay a driver heartbeat to the riders of its active trip, if the
    /// throttle admits it. Only drivers on a trip consume throttle slots.
    pub fn driver_moved(
        &self,
        driver_id: Uuid,
        active: &trip::Model,
        point: GeoPoint,
        bearing: Option<f64>,
    ) -> Option<JoinHandle<()>> {
        if active.driver_id != Some(driver_id) || !self.throttle.admit(driver_id) {
            return None;
        }

        let this = self.clone();
        let trip = active.clone();
        Some(self.spawn("position", driver_id, async move {
            let update = PositionUpdate {
                trip_id: trip.id,
                driver_id,
                lat: point.lat,
                lon: point.lon,
                bearing,
                recorded_at: Utc::now(),
            };
            this.publish_logged(Audience::for_trip(&trip), TripEvent::Position(update))
                .await;
            Ok(())
        }))
    }

    async fn publish_logged(&self, audience: Audience, event: TripEvent) {
        let name = event.name();
        if let Err(e) = self.broadcaster.publish(audience, event).await {
            tracing::warn!(event = name, error = %e, "Failed to publish event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn principal(role: Role) -> Principal {
        Principal {
            id: Uuid::new_v4(),
            role,
            name: None,
            phone: None,
        }
    }

    #[test]
    fn test_event_wire_format() {
        let trip_id = Uuid::new_v4();
        let json = serde_json::to_value(TripEvent::OfferWithdrawn { trip_id }).unwrap();
        assert_eq!(json["event"], "trip:offer_withdrawn");
        assert_eq!(json["data"]["trip_id"], trip_id.to_string());

        let err = TripEvent::Error(ErrorReply::from(&AppError::Conflict("taken".into())));
        let json = serde_json::to_value(err).unwrap();
        assert_eq!(json["event"], "trip:error");
        assert_eq!(json["data"]["error"], "conflict");
    }

    #[test]
    fn test_audience_membership() {
        let driver = principal(Role::Driver);
        let rider = principal(Role::Passenger);

        assert!(Audience::Driver(driver.id).includes(&driver));
        assert!(!Audience::Passenger(driver.id).includes(&driver));
        let trip = Audience::Trip {
            trip_id: Uuid::new_v4(),
            members: vec![rider.id],
        };
        assert!(trip.includes(&rider));
        assert!(!trip.includes(&driver));
    }

    #[test]
    fn test_throttle_admits_once_per_interval() {
        let throttle = PositionThrottle::new(Duration::from_millis(3000));
        let driver = Uuid::new_v4();
        let t0 = Instant::now();

        assert!(throttle.admit_at(driver, t0));
        assert!(!throttle.admit_at(driver, t0 + Duration::from_millis(1000)));
        assert!(throttle.admit_at(driver, t0 + Duration::from_millis(3000)));
        // Other drivers are independent
        assert!(throttle.admit_at(Uuid::new_v4(), t0 + Duration::from_millis(3001)));
    }

    #[test]
    fn test_throttle_forget_resets() {
        let throttle = PositionThrottle::new(Duration::from_secs(60));
        let driver = Uuid::new_v4();
        assert!(throttle.admit(driver));
        assert!(!throttle.admit(driver));
        throttle.forget(driver);
        assert!(throttle.admit(driver));
    }

    #[tokio::test]
    async fn test_hub_delivers_to_subscribers() {
        let hub = EventHub::new(8);
        let mut rx = hub.subscribe();
        let trip_id = Uuid::new_v4();

        hub.publish(Audience::Driver(Uuid::nil()), TripEvent::OfferWithdrawn { trip_id })
            .await
            .unwrap();

        let envelope = rx.recv().await.unwrap();
        assert_eq!(envelope.event, TripEvent::OfferWithdrawn { trip_id });
    }

    #[tokio::test]
    async fn test_hub_without_subscribers_is_ok() {
        let hub = EventHub::new(8);
        let result = hub
            .publish(
                Audience::Passenger(Uuid::nil()),
                TripEvent::OfferWithdrawn { trip_id: Uuid::nil() },
            )
            .await;
        assert!(result.is_ok());
    }
}
