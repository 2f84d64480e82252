pub mod config;
pub mod db;
pub mod entities;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod principal;
pub mod routes;
pub mod services;
pub mod utils;

use std::sync::Arc;

use sea_orm::DatabaseConnection;

pub use config::Config;
pub use error::{AppError, AppResult};

use services::dispatch::{Broadcaster, Dispatcher, EventHub};
use services::gateway::GatewayClient;
use services::tracker::TripTracker;

#[derive(Clone)]
pub struct AppState {
    pub db: DatabaseConnection,
    pub config: Config,
    /// Fan-out used by lifecycle transitions
    pub dispatcher: Dispatcher,
    /// Source that WebSocket sessions subscribe to
    pub hub: EventHub,
    pub tracker: TripTracker,
    pub gateway: GatewayClient,
}

impl AppState {
    /// State whose broadcaster is the in-process hub.
    pub fn new(db: DatabaseConnection, config: Config) -> Self {
        let hub = EventHub::default();
        Self::with_broadcaster(db, config, hub.clone(), Arc::new(hub))
    }

    pub fn with_broadcaster(
        db: DatabaseConnection,
        config: Config,
        hub: EventHub,
        broadcaster: Arc<dyn Broadcaster>,
    ) -> Self {
        let dispatcher = Dispatcher::new(db.clone(), broadcaster, config.dispatch.clone());
        let tracker = TripTracker::new(config.dispatch.trace_interval);
        let gateway = GatewayClient::new(config.gateway_url.clone());
        Self {
            db,
            config,
            dispatcher,
            hub,
            tracker,
            gateway,
        }
    }
}
