mod support;

use ride_dispatch::entities::ledger_transaction::{Direction, TransactionStatus};
use ride_dispatch::entities::role::Role;
use ride_dispatch::entities::settlement::{self, SettlementStatus};
use ride_dispatch::entities::{driver, platform_earning, wallet};
use ride_dispatch::services::fare::{self, Tariff};
use ride_dispatch::services::ledger::{self, GatewayCallback, SettlementOutcome};
use ride_dispatch::services::lifecycle;
use ride_dispatch::utils::time;
use ride_dispatch::{AppError, AppState};
use sea_orm::sea_query::Expr;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter, Set};
use uuid::Uuid;

use support::*;

/// Every trip costs exactly `fare`, whatever the distance.
async fn flat_fare(state: &AppState, fare: f64) {
    fare::set_tariff(
        &state.db,
        "mini",
        Tariff {
            base_fare: fare,
            per_km: 0.0,
            per_minute: 0.0,
            waiting_per_minute: 0.0,
            surge_multiplier: 1.0,
        },
    )
    .await
    .unwrap();
}

#[tokio::test]
async fn test_fifteen_percent_of_hundred() {
    let state = app().await;
    flat_fare(&state, 100.0).await;
    ledger::set_commission_rate(&state.db, 15.0).await.unwrap();

    let (_, driver, trip) = ongoing_trip(&state).await;
    let report = lifecycle::complete_trip(&state, &driver, trip.id).await.unwrap();

    assert_eq!(report.trip.fare_final, Some(100.0));
    assert_eq!(
        report.settlement,
        SettlementOutcome::Settled {
            commission_rate: 15.0,
            commission_amount: 15.0,
            net_earnings: 85.0,
        }
    );

    let wallet = ledger::get_wallet(&state.db, driver.id, Role::Driver).await.unwrap();
    assert_eq!(wallet.balance, 85.0);
    assert_eq!(wallet.total_earnings, 85.0);

    let entries = ledger::list_transactions(&state.db, driver.id, Role::Driver, 10).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].amount, 85.0);
    assert_eq!(entries[0].direction, Direction::Credit);
    assert_eq!(entries[0].status, TransactionStatus::Success);
    assert_eq!(entries[0].method, ledger::TRIP_EARNING_METHOD);
    assert_eq!(entries[0].trip_id, Some(trip.id));

    let earning = platform_earning::Entity::find()
        .filter(platform_earning::Column::TripId.eq(trip.id))
        .one(&state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(earning.commission_amount, 15.0);
}

#[tokio::test]
async fn test_balance_is_sum_of_net_earnings() {
    let state = app().await;
    let (driver, _) = online_driver(&state, "Earner", PICKUP.0, PICKUP.1).await;

    let mut expected = 0.0;
    for fare in [40.0, 55.5, 12.25] {
        flat_fare(&state, fare).await;
        let rider = passenger("Rider");
        let trip = requested_trip(&state, &rider).await;
        lifecycle::accept_trip(&state, &driver, trip.id).await.unwrap();
        lifecycle::start_trip(&state, &driver, trip.id).await.unwrap();
        let report = lifecycle::complete_trip(&state, &driver, trip.id).await.unwrap();
        match report.settlement {
            SettlementOutcome::Settled { net_earnings, .. } => expected += net_earnings,
            other => panic!("settlement failed: {:?}", other),
        }
    }

    let wallet = ledger::get_wallet(&state.db, driver.id, Role::Driver).await.unwrap();
    assert!((wallet.balance - expected).abs() < 1e-6);

    let audit = ledger::audit_wallet(&state.db, driver.id, Role::Driver).await.unwrap();
    assert!(audit.consistent);
    assert_eq!(audit.discrepancy, 0.0);
}

#[tokio::test]
async fn test_settle_is_idempotent() {
    let state = app().await;
    flat_fare(&state, 20.0).await;
    let (_, driver, trip) = ongoing_trip(&state).await;
    let report = lifecycle::complete_trip(&state, &driver, trip.id).await.unwrap();

    let rate = state.config.settlement.default_commission_rate;
    let again = ledger::settle(&state.db, trip.id, rate).await.unwrap();
    assert_eq!(again, report.settlement);
    ledger::reconcile(&state.db, rate).await.unwrap();

    let wallet = ledger::get_wallet(&state.db, driver.id, Role::Driver).await.unwrap();
    assert_eq!(wallet.balance, 17.0);
    let entries = ledger::list_transactions(&state.db, driver.id, Role::Driver, 10).await.unwrap();
    assert_eq!(entries.len(), 1);
}

#[tokio::test]
async fn test_failed_settlement_is_recorded_and_reconciled() {
    let state = app().await;
    flat_fare(&state, 100.0).await;
    let (_, driver, trip) = ongoing_trip(&state).await;

    // A stray earning row for this trip makes the ledger write fail
    platform_earning::ActiveModel {
        id: Set(Uuid::new_v4()),
        trip_id: Set(trip.id),
        driver_id: Set(driver.id),
        gross_fare: Set(0.0),
        commission_rate: Set(0.0),
        commission_amount: Set(0.0),
        net_earnings: Set(0.0),
        created_at: Set(time::now()),
    }
    .insert(&state.db)
    .await
    .unwrap();

    let report = lifecycle::complete_trip(&state, &driver, trip.id).await.unwrap();
    assert_eq!(report.trip.status, ride_dispatch::entities::trip::TripStatus::Completed);
    assert!(matches!(report.settlement, SettlementOutcome::Failed { .. }));

    let row = settlement::Entity::find_by_id(trip.id).one(&state.db).await.unwrap().unwrap();
    assert_eq!(row.status, SettlementStatus::Failed);
    assert_eq!(row.attempts, 1);
    assert!(row.last_error.is_some());

    let wallet = ledger::get_wallet(&state.db, driver.id, Role::Driver).await.unwrap();
    assert_eq!(wallet.balance, 0.0);

    let failed = ledger::list_settlements(&state.db, Some(SettlementStatus::Failed)).await.unwrap();
    assert_eq!(failed.len(), 1);

    platform_earning::Entity::delete_many()
        .filter(platform_earning::Column::TripId.eq(trip.id))
        .exec(&state.db)
        .await
        .unwrap();

    let report = ledger::reconcile(&state.db, 15.0).await.unwrap();
    assert_eq!(report.attempted, 1);
    assert_eq!(report.settled, 1);
    assert_eq!(report.failed, 0);

    let wallet = ledger::get_wallet(&state.db, driver.id, Role::Driver).await.unwrap();
    assert_eq!(wallet.balance, 85.0);
    let row = settlement::Entity::find_by_id(trip.id).one(&state.db).await.unwrap().unwrap();
    assert_eq!(row.status, SettlementStatus::Settled);
    assert_eq!(row.attempts, 2);
}

#[tokio::test]
async fn test_retry_keeps_completion_time_rate() {
    let state = app().await;
    flat_fare(&state, 100.0).await;
    ledger::set_commission_rate(&state.db, 15.0).await.unwrap();
    let (_, driver, trip) = ongoing_trip(&state).await;

    platform_earning::ActiveModel {
        id: Set(Uuid::new_v4()),
        trip_id: Set(trip.id),
        driver_id: Set(driver.id),
        gross_fare: Set(0.0),
        commission_rate: Set(0.0),
        commission_amount: Set(0.0),
        net_earnings: Set(0.0),
        created_at: Set(time::now()),
    }
    .insert(&state.db)
    .await
    .unwrap();

    let report = lifecycle::complete_trip(&state, &driver, trip.id).await.unwrap();
    assert!(matches!(report.settlement, SettlementOutcome::Failed { .. }));
    let row = settlement::Entity::find_by_id(trip.id).one(&state.db).await.unwrap().unwrap();
    assert_eq!(row.commission_rate, Some(15.0));
    assert_eq!(row.net_earnings, Some(85.0));

    // Rate changes between the failed attempt and the retry
    ledger::set_commission_rate(&state.db, 30.0).await.unwrap();
    platform_earning::Entity::delete_many()
        .filter(platform_earning::Column::TripId.eq(trip.id))
        .exec(&state.db)
        .await
        .unwrap();
    let report = ledger::reconcile(&state.db, 15.0).await.unwrap();
    assert_eq!(report.settled, 1);

    let wallet = ledger::get_wallet(&state.db, driver.id, Role::Driver).await.unwrap();
    assert_eq!(wallet.balance, 85.0);
    let earning = platform_earning::Entity::find()
        .filter(platform_earning::Column::TripId.eq(trip.id))
        .one(&state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(earning.commission_rate, 15.0);
    assert_eq!(earning.commission_amount, 15.0);
}

#[tokio::test]
async fn test_audit_flags_drifted_balance() {
    let state = app().await;
    flat_fare(&state, 10.0).await;
    let (_, driver, trip) = ongoing_trip(&state).await;
    lifecycle::complete_trip(&state, &driver, trip.id).await.unwrap();

    wallet::Entity::update_many()
        .col_expr(wallet::Column::Balance, Expr::col(wallet::Column::Balance).add(10.0))
        .filter(wallet::Column::UserId.eq(driver.id))
        .exec(&state.db)
        .await
        .unwrap();

    let audit = ledger::audit_wallet(&state.db, driver.id, Role::Driver).await.unwrap();
    assert!(!audit.consistent);
    assert!((audit.discrepancy - 10.0).abs() < 1e-9);
}

#[tokio::test]
async fn test_rewards_credited_on_completion() {
    let state = app().await;
    let (rider, driver, trip) = ongoing_trip(&state).await;
    let report = lifecycle::complete_trip(&state, &driver, trip.id).await.unwrap();

    // About 3.1 km earns one block of ten points
    assert_eq!(report.reward_points, 10);
    let row = driver::Entity::find_by_id(driver.id).one(&state.db).await.unwrap().unwrap();
    assert_eq!(row.reward_points, 10);
    let rider_row = ride_dispatch::entities::passenger::Entity::find_by_id(rider.id)
        .one(&state.db)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(rider_row.reward_points, 10);
}

#[tokio::test]
async fn test_commission_rate_bounds() {
    let state = app().await;
    let result = ledger::set_commission_rate(&state.db, 120.0).await;
    assert!(matches!(result, Err(AppError::Validation(_))));

    ledger::set_commission_rate(&state.db, 10.0).await.unwrap();
    ledger::set_commission_rate(&state.db, 12.5).await.unwrap();
    let rate = ledger::current_commission_rate(&state.db, 15.0).await.unwrap();
    assert_eq!(rate, 12.5);
}

// ============ Gateway-backed movements ============

fn callback(id: Uuid, status: &str) -> GatewayCallback {
    GatewayCallback {
        transaction_id: Some(id),
        reference: Some(format!("gw-{}", id)),
        status: status.to_string(),
        payload: serde_json::json!({ "source": "test" }),
    }
}

#[tokio::test]
async fn test_topup_finalizes_once() {
    let state = app().await;
    let rider = passenger("Topper");

    let pending = ledger::open_topup(&state.db, &state.gateway, &rider, 50.0, "card").await.unwrap();
    assert_eq!(pending.status, TransactionStatus::Pending);
    assert_eq!(pending.direction, Direction::Credit);

    let wallet = ledger::get_wallet(&state.db, rider.id, Role::Passenger).await.unwrap();
    assert_eq!(wallet.balance, 0.0);

    let done = ledger::apply_gateway_callback(&state.db, callback(pending.id, "COMPLETED"))
        .await
        .unwrap();
    assert_eq!(done.status, TransactionStatus::Success);

    // A repeated notification changes nothing
    let repeat = ledger::apply_gateway_callback(&state.db, callback(pending.id, "SUCCESS"))
        .await
        .unwrap();
    assert_eq!(repeat.status, TransactionStatus::Success);

    let wallet = ledger::get_wallet(&state.db, rider.id, Role::Passenger).await.unwrap();
    assert_eq!(wallet.balance, 50.0);
}

#[tokio::test]
async fn test_declined_topup_leaves_balance() {
    let state = app().await;
    let rider = passenger("Declined");
    let pending = ledger::open_topup(&state.db, &state.gateway, &rider, 30.0, "card").await.unwrap();

    let done = ledger::apply_gateway_callback(&state.db, callback(pending.id, "DECLINED"))
        .await
        .unwrap();
    assert_eq!(done.status, TransactionStatus::Failed);
    let wallet = ledger::get_wallet(&state.db, rider.id, Role::Passenger).await.unwrap();
    assert_eq!(wallet.balance, 0.0);
}

#[tokio::test]
async fn test_withdrawal_rules() {
    let state = app().await;
    let rider = passenger("NotADriver");
    let result = ledger::open_withdrawal(&state.db, &state.gateway, &rider, 10.0, "bank").await;
    assert!(matches!(result, Err(AppError::Forbidden(_))));

    flat_fare(&state, 100.0).await;
    let (_, driver, trip) = ongoing_trip(&state).await;
    lifecycle::complete_trip(&state, &driver, trip.id).await.unwrap();

    let result = ledger::open_withdrawal(&state.db, &state.gateway, &driver, 500.0, "bank").await;
    assert!(matches!(result, Err(AppError::Validation(_))));

    let payout = ledger::open_withdrawal(&state.db, &state.gateway, &driver, 50.0, "bank")
        .await
        .unwrap();
    assert_eq!(payout.direction, Direction::Debit);
    ledger::apply_gateway_callback(&state.db, callback(payout.id, "APPROVED"))
        .await
        .unwrap();

    let wallet = ledger::get_wallet(&state.db, driver.id, Role::Driver).await.unwrap();
    assert_eq!(wallet.balance, 35.0);
    let audit = ledger::audit_wallet(&state.db, driver.id, Role::Driver).await.unwrap();
    assert!(audit.consistent);
}

#[tokio::test]
async fn test_callback_for_unknown_transaction() {
    let state = app().await;
    let result = ledger::apply_gateway_callback(&state.db, callback(Uuid::new_v4(), "COMPLETED")).await;
    assert!(matches!(result, Err(AppError::NotFound(_))));
}
