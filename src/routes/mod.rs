use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};

use crate::handlers::{admin, driver, passenger, realtime, trips, wallet};
use crate::middleware::auth::{auth_middleware, require_admin, require_driver, require_passenger};
use crate::middleware::rate_limit::{create_public_governor, log_request};
use crate::middleware::role_rate_limit::{create_role_governor, RateLimitedRole};
use crate::AppState;

pub fn create_router(state: AppState) -> Router {
    // Role-specific governors key on the authenticated principal
    let driver_governor = create_role_governor(RateLimitedRole::Driver);
    let passenger_governor = create_role_governor(RateLimitedRole::Passenger);
    // Unauthenticated routes are limited per IP
    let public_governor = create_public_governor();

    let public_routes = Router::new()
        .route("/fares/estimate", post(trips::estimate_fare))
        .route("/payments/webhook", post(wallet::payment_webhook))
        .layer(public_governor);

    // Admin routes are not rate limited beyond the global governor
    let admin_routes = Router::new()
        .route("/trips/{id}/assign", post(admin::assign_trip))
        .route("/tariffs", put(admin::set_tariff))
        .route("/commission", put(admin::set_commission))
        .route("/drivers/nearby", get(admin::nearby_drivers))
        .route("/settlements", get(admin::list_settlements))
        .route("/settlements/reconcile", post(admin::reconcile))
        .route("/wallets/{user_id}/{role}/audit", get(admin::audit_wallet))
        .layer(middleware::from_fn(require_admin))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    // Heartbeats arrive every few seconds, hence the larger burst
    let driver_routes = Router::new()
        .route("/status", put(driver::update_status))
        .route("/trips", get(driver::my_trips))
        .route("/trips/nearby", get(driver::nearby_trips))
        .route("/trips/{id}/accept", post(driver::accept_trip))
        .route("/trips/{id}/start", post(driver::start_trip))
        .route("/trips/{id}/complete", post(driver::complete_trip))
        .route("/trips/{id}/cancel", post(driver::cancel_trip))
        .route("/trips/{id}/rate", post(driver::rate_passenger))
        .layer(driver_governor)
        .layer(middleware::from_fn(require_driver))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    let passenger_routes = Router::new()
        .route("/trips", post(passenger::create_trip).get(passenger::my_trips))
        .route("/trips/{id}/cancel", post(passenger::cancel_trip))
        .route("/trips/{id}/rate", post(passenger::rate_driver))
        .route("/location", put(passenger::update_location))
        .layer(passenger_governor)
        .layer(middleware::from_fn(require_passenger))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    // Any authenticated principal
    let shared_routes = Router::new()
        .route("/trips/{id}", get(trips::get_trip))
        .route("/trips/{id}/history", get(trips::trip_history))
        .route("/ws", get(realtime::connect))
        .route("/wallet", get(wallet::get_wallet))
        .route("/wallet/transactions", get(wallet::transactions))
        .route("/wallet/topup", post(wallet::topup))
        .route("/wallet/withdraw", post(wallet::withdraw))
        .layer(middleware::from_fn_with_state(state.clone(), auth_middleware));

    Router::new()
        .nest("/api/admin", admin_routes)
        .nest("/api/driver", driver_routes)
        .nest("/api/passenger", passenger_routes)
        .nest("/api", public_routes.merge(shared_routes))
        .layer(middleware::from_fn(log_request))
        .with_state(state)
}
