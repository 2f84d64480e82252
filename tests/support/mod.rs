#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use sea_orm_migration::MigratorTrait;
use uuid::Uuid;

use ride_dispatch::config::{Config, DispatchConfig, SettlementConfig};
use ride_dispatch::entities::{driver, role::Role, trip};
use ride_dispatch::principal::Principal;
use ride_dispatch::services::dispatch::{Audience, Broadcaster, EventHub, TripEvent};
use ride_dispatch::services::lifecycle::{self, Heartbeat, TripRequest};
use ride_dispatch::utils::geo::GeoPoint;
use ride_dispatch::utils::jwt::create_token;
use ride_dispatch::{AppError, AppResult, AppState};

pub const JWT_SECRET: &str = "test-secret";

/// Pickup and dropoff of the reference city hop.
pub const PICKUP: (f64, f64) = (9.03, 38.74);
pub const DROPOFF: (f64, f64) = (9.05, 38.76);

pub fn test_config() -> Config {
    Config {
        database_url: "sqlite::memory:".to_string(),
        jwt_secret: JWT_SECRET.to_string(),
        server_host: "127.0.0.1".to_string(),
        server_port: 0,
        dispatch: DispatchConfig {
            trace_interval: Duration::from_secs(3600),
            ..DispatchConfig::default()
        },
        settlement: SettlementConfig::default(),
        gateway_url: None,
        gateway_webhook_secret: None,
        allow_unsigned_webhooks: false,
    }
}

/// Fresh in-memory database with the schema applied. A single pooled
/// connection keeps every query on the same in-memory instance.
pub async fn connect() -> DatabaseConnection {
    let mut options = ConnectOptions::new("sqlite::memory:".to_string());
    options
        .max_connections(1)
        .min_connections(1)
        .sqlx_logging(false);
    let db = Database::connect(options).await.unwrap();
    migration::Migrator::up(&db, None).await.unwrap();
    db
}

pub async fn app() -> AppState {
    app_with(test_config()).await
}

pub async fn app_with(config: Config) -> AppState {
    AppState::new(connect().await, config)
}

/// Broadcaster that keeps every published event for inspection.
#[derive(Clone, Default)]
pub struct RecordingBroadcaster {
    pub events: Arc<Mutex<Vec<(Audience, TripEvent)>>>,
}

impl RecordingBroadcaster {
    pub fn names(&self) -> Vec<&'static str> {
        self.events.lock().unwrap().iter().map(|(_, e)| e.name()).collect()
    }

    pub fn take(&self) -> Vec<(Audience, TripEvent)> {
        std::mem::take(&mut *self.events.lock().unwrap())
    }
}

#[async_trait]
impl Broadcaster for RecordingBroadcaster {
    async fn publish(&self, audience: Audience, event: TripEvent) -> AppResult<()> {
        self.events.lock().unwrap().push((audience, event));
        Ok(())
    }
}

/// Broadcaster whose every publish fails.
pub struct FailingBroadcaster;

#[async_trait]
impl Broadcaster for FailingBroadcaster {
    async fn publish(&self, _audience: Audience, _event: TripEvent) -> AppResult<()> {
        Err(AppError::Internal("push channel down".to_string()))
    }
}

pub async fn app_with_broadcaster(broadcaster: Arc<dyn Broadcaster>) -> AppState {
    AppState::with_broadcaster(connect().await, test_config(), EventHub::default(), broadcaster)
}

// ============ Principals ============

pub fn passenger(name: &str) -> Principal {
    Principal {
        id: Uuid::new_v4(),
        role: Role::Passenger,
        name: Some(name.to_string()),
        phone: Some("+251911000000".to_string()),
    }
}

pub fn driver_principal(name: &str) -> Principal {
    Principal {
        id: Uuid::new_v4(),
        role: Role::Driver,
        name: Some(name.to_string()),
        phone: None,
    }
}

pub fn admin() -> Principal {
    Principal {
        id: Uuid::new_v4(),
        role: Role::Admin,
        name: Some("Ops".to_string()),
        phone: None,
    }
}

pub fn token_for(principal: &Principal) -> String {
    create_token(
        principal.id,
        principal.role,
        principal.name.as_deref(),
        principal.phone.as_deref(),
        JWT_SECRET,
        1,
    )
    .unwrap()
}

// ============ Seeding ============

/// Register an available driver at the given position through the heartbeat path.
pub async fn online_driver(state: &AppState, name: &str, lat: f64, lon: f64) -> (Principal, driver::Model) {
    let principal = driver_principal(name);
    let row = lifecycle::driver_heartbeat(
        state,
        &principal,
        &Heartbeat {
            available: Some(true),
            lat: Some(lat),
            lon: Some(lon),
            ..Default::default()
        },
    )
    .await
    .unwrap();
    (principal, row)
}

pub fn city_hop() -> TripRequest {
    TripRequest {
        vehicle_class: None,
        pickup: GeoPoint {
            lat: PICKUP.0,
            lon: PICKUP.1,
        },
        dropoff: GeoPoint {
            lat: DROPOFF.0,
            lon: DROPOFF.1,
        },
    }
}

pub async fn requested_trip(state: &AppState, rider: &Principal) -> trip::Model {
    lifecycle::create_trip(state, rider, &city_hop()).await.unwrap()
}

/// Drive a fresh trip all the way to `ongoing`.
pub async fn ongoing_trip(state: &AppState) -> (Principal, Principal, trip::Model) {
    let rider = passenger("Abebe");
    let (driver, _) = online_driver(state, "Kebede", PICKUP.0, PICKUP.1).await;
    let trip = requested_trip(state, &rider).await;
    lifecycle::accept_trip(state, &driver, trip.id).await.unwrap();
    let trip = lifecycle::start_trip(state, &driver, trip.id).await.unwrap();
    (rider, driver, trip)
}

pub fn assert_conflict<T: std::fmt::Debug>(result: AppResult<T>) {
    match result {
        Err(AppError::Conflict(_)) => {}
        other => panic!("expected conflict, got {:?}", other),
    }
}

/// Poll until `condition` holds; fan-out runs on spawned tasks.
pub async fn wait_until<F: Fn() -> bool>(condition: F) {
    for _ in 0..300 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not met in time");
}
