use sea_orm::{
    sea_query::{Expr, OnConflict},
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entities::{
    commission_rate, driver,
    ledger_transaction::{self, Direction, TransactionStatus},
    passenger, platform_earning,
    role::Role,
    settlement::{self, SettlementStatus},
    trip, wallet,
};
use crate::error::{AppError, AppResult};
use crate::principal::Principal;
use crate::services::gateway::{self, GatewayClient};
use crate::utils::money::round_money;
use crate::utils::time;

pub const TRIP_EARNING_METHOD: &str = "trip_earning";

/// Result of settling one completed trip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum SettlementOutcome {
    Settled {
        commission_rate: f64,
        commission_amount: f64,
        net_earnings: f64,
    },
    Failed {
        error: String,
    },
}

impl SettlementOutcome {
    pub fn is_settled(&self) -> bool {
        matches!(self, SettlementOutcome::Settled { .. })
    }
}

/// Platform commission and driver net for a fare at `rate` percent.
pub fn commission_split(fare: f64, rate: f64) -> (f64, f64) {
    let commission = round_money(fare * rate / 100.0);
    (commission, round_money(fare - commission))
}

/// Points credited to each party: ten per completed two kilometres.
pub fn reward_points(distance_km: f64) -> i64 {
    if !distance_km.is_finite() || distance_km <= 0.0 {
        return 0;
    }
    (distance_km / 2.0).floor() as i64 * 10
}

// ============ Commission ============

pub async fn current_commission_rate<C: ConnectionTrait>(db: &C, default_rate: f64) -> AppResult<f64> {
    let row = commission_rate::Entity::find()
        .filter(commission_rate::Column::IsActive.eq(true))
        .order_by_desc(commission_rate::Column::CreatedAt)
        .order_by_desc(commission_rate::Column::Id)
        .one(db)
        .await?;
    Ok(row.map(|r| r.percentage).unwrap_or(default_rate))
}

pub async fn set_commission_rate(
    db: &DatabaseConnection,
    percentage: f64,
) -> AppResult<commission_rate::Model> {
    if !percentage.is_finite() || !(0.0..=100.0).contains(&percentage) {
        return Err(AppError::Validation(
            "Commission percentage must be between 0 and 100".to_string(),
        ));
    }

    let txn = db.begin().await?;
    commission_rate::Entity::update_many()
        .col_expr(commission_rate::Column::IsActive, Expr::value(false))
        .filter(commission_rate::Column::IsActive.eq(true))
        .exec(&txn)
        .await?;
    let row = commission_rate::ActiveModel {
        percentage: Set(percentage),
        is_active: Set(true),
        created_at: Set(time::now()),
        ..Default::default()
    }
    .insert(&txn)
    .await?;
    txn.commit().await?;

    tracing::info!(percentage, "Commission rate updated");
    Ok(row)
}

// ============ Wallets ============

async fn ensure_wallet<C: ConnectionTrait>(db: &C, user_id: Uuid, role: Role) -> AppResult<()> {
    let row = wallet::ActiveModel {
        id: Set(Uuid::new_v4()),
        user_id: Set(user_id),
        role: Set(role),
        balance: Set(0.0),
        total_earnings: Set(0.0),
        created_at: Set(time::now()),
    };
    wallet::Entity::insert(row)
        .on_conflict(
            OnConflict::columns([wallet::Column::UserId, wallet::Column::Role])
                .do_nothing()
                .to_owned(),
        )
        .exec_without_returning(db)
        .await?;
    Ok(())
}

/// Atomically add `delta` to the balance (and `earnings` to lifetime
/// earnings), creating the wallet on first use.
async fn increment_wallet<C: ConnectionTrait>(
    db: &C,
    user_id: Uuid,
    role: Role,
    delta: f64,
    earnings: f64,
) -> AppResult<()> {
    ensure_wallet(db, user_id, role).await?;
    wallet::Entity::update_many()
        .col_expr(wallet::Column::Balance, Expr::col(wallet::Column::Balance).add(delta))
        .col_expr(
            wallet::Column::TotalEarnings,
            Expr::col(wallet::Column::TotalEarnings).add(earnings),
        )
        .filter(wallet::Column::UserId.eq(user_id))
        .filter(wallet::Column::Role.eq(role))
        .exec(db)
        .await?;
    Ok(())
}

/// Debit only when the balance covers it. Returns whether it applied.
async fn debit_wallet<C: ConnectionTrait>(
    db: &C,
    user_id: Uuid,
    role: Role,
    amount: f64,
) -> AppResult<bool> {
    let result = wallet::Entity::update_many()
        .col_expr(wallet::Column::Balance, Expr::col(wallet::Column::Balance).sub(amount))
        .filter(wallet::Column::UserId.eq(user_id))
        .filter(wallet::Column::Role.eq(role))
        .filter(wallet::Column::Balance.gte(amount))
        .exec(db)
        .await?;
    Ok(result.rows_affected == 1)
}

pub async fn get_wallet(db: &DatabaseConnection, user_id: Uuid, role: Role) -> AppResult<wallet::Model> {
    ensure_wallet(db, user_id, role).await?;
    wallet::Entity::find()
        .filter(wallet::Column::UserId.eq(user_id))
        .filter(wallet::Column::Role.eq(role))
        .one(db)
        .await?
        .ok_or_else(|| AppError::Internal("Wallet missing after creation".to_string()))
}

pub async fn list_transactions(
    db: &DatabaseConnection,
    user_id: Uuid,
    role: Role,
    limit: u64,
) -> AppResult<Vec<ledger_transaction::Model>> {
    Ok(ledger_transaction::Entity::find()
        .filter(ledger_transaction::Column::UserId.eq(user_id))
        .filter(ledger_transaction::Column::Role.eq(role))
        .order_by_desc(ledger_transaction::Column::CreatedAt)
        .limit(limit)
        .all(db)
        .await?)
}

#[derive(Debug, Clone, Serialize)]
pub struct WalletAudit {
    pub user_id: Uuid,
    pub role: Role,
    pub stored_balance: f64,
    pub ledger_balance: f64,
    pub discrepancy: f64,
    pub consistent: bool,
}

/// Rebuild the balance from successful ledger entries and compare.
pub async fn audit_wallet(db: &DatabaseConnection, user_id: Uuid, role: Role) -> AppResult<WalletAudit> {
    let stored_balance = wallet::Entity::find()
        .filter(wallet::Column::UserId.eq(user_id))
        .filter(wallet::Column::Role.eq(role))
        .one(db)
        .await?
        .map(|w| w.balance)
        .unwrap_or(0.0);

    let entries = ledger_transaction::Entity::find()
        .filter(ledger_transaction::Column::UserId.eq(user_id))
        .filter(ledger_transaction::Column::Role.eq(role))
        .filter(ledger_transaction::Column::Status.eq(TransactionStatus::Success))
        .all(db)
        .await?;
    let ledger_balance = round_money(entries.iter().map(|e| e.signed_amount()).sum());

    let discrepancy = round_money(stored_balance - ledger_balance);
    let consistent = discrepancy.abs() < 0.005;
    if !consistent {
        tracing::warn!(
            user_id = %user_id,
            role = role.as_str(),
            stored_balance,
            ledger_balance,
            "Wallet balance disagrees with ledger"
        );
    }

    Ok(WalletAudit {
        user_id,
        role,
        stored_balance,
        ledger_balance,
        discrepancy,
        consistent,
    })
}

// ============ Settlement ============

/// Write the pending outbox row for a trip that is being completed.
/// Must run inside the completing transaction; the commission rate in force
/// at that point is frozen on the row and reused by every retry.
pub async fn enqueue_settlement<C: ConnectionTrait>(
    db: &C,
    trip: &trip::Model,
    default_rate: f64,
) -> AppResult<()> {
    let driver_id = trip
        .driver_id
        .ok_or_else(|| AppError::Internal("Completed trip has no driver".to_string()))?;
    let gross_fare = trip
        .fare_final
        .ok_or_else(|| AppError::Internal("Completed trip has no final fare".to_string()))?;
    let rate = current_commission_rate(db, default_rate).await?;
    let (commission, net) = commission_split(gross_fare, rate);

    settlement::ActiveModel {
        trip_id: Set(trip.id),
        driver_id: Set(driver_id),
        passenger_id: Set(trip.passenger_id),
        gross_fare: Set(gross_fare),
        distance_km: Set(trip.distance_km),
        commission_rate: Set(Some(rate)),
        commission_amount: Set(Some(commission)),
        net_earnings: Set(Some(net)),
        status: Set(SettlementStatus::Pending),
        attempts: Set(0),
        last_error: Set(None),
        created_at: Set(time::now()),
        settled_at: Set(None),
    }
    .insert(db)
    .await?;
    Ok(())
}

fn stored_outcome(row: &settlement::Model) -> SettlementOutcome {
    match row.status {
        SettlementStatus::Settled => SettlementOutcome::Settled {
            commission_rate: row.commission_rate.unwrap_or_default(),
            commission_amount: row.commission_amount.unwrap_or_default(),
            net_earnings: row.net_earnings.unwrap_or_default(),
        },
        _ => SettlementOutcome::Failed {
            error: row
                .last_error
                .clone()
                .unwrap_or_else(|| "Settlement not yet applied".to_string()),
        },
    }
}

async fn find_settlement<C: ConnectionTrait>(db: &C, trip_id: Uuid) -> AppResult<settlement::Model> {
    settlement::Entity::find_by_id(trip_id)
        .one(db)
        .await?
        .ok_or_else(|| AppError::NotFound("Settlement not found".to_string()))
}

/// Applies the split inside `txn`. Returns `false` if another attempt
/// already settled the row.
async fn apply_settlement<C: ConnectionTrait>(
    txn: &C,
    row: &settlement::Model,
    rate: f64,
    commission: f64,
    net: f64,
) -> AppResult<bool> {
    let now = time::now();
    let claimed = settlement::Entity::update_many()
        .col_expr(settlement::Column::Status, Expr::value(SettlementStatus::Settled))
        .col_expr(settlement::Column::CommissionRate, Expr::value(Some(rate)))
        .col_expr(settlement::Column::CommissionAmount, Expr::value(Some(commission)))
        .col_expr(settlement::Column::NetEarnings, Expr::value(Some(net)))
        .col_expr(settlement::Column::Attempts, Expr::col(settlement::Column::Attempts).add(1))
        .col_expr(settlement::Column::LastError, Expr::value(Option::<String>::None))
        .col_expr(settlement::Column::SettledAt, Expr::value(Some(now)))
        .filter(settlement::Column::TripId.eq(row.trip_id))
        .filter(settlement::Column::Status.ne(SettlementStatus::Settled))
        .exec(txn)
        .await?;
    if claimed.rows_affected == 0 {
        return Ok(false);
    }

    increment_wallet(txn, row.driver_id, Role::Driver, net, net).await?;

    ledger_transaction::ActiveModel {
        id: Set(Uuid::new_v4()),
        user_id: Set(row.driver_id),
        role: Set(Role::Driver),
        amount: Set(net),
        direction: Set(Direction::Credit),
        status: Set(TransactionStatus::Success),
        method: Set(TRIP_EARNING_METHOD.to_string()),
        trip_id: Set(Some(row.trip_id)),
        gateway_txn_id: Set(None),
        metadata: Set(serde_json::json!({
            "gross_fare": row.gross_fare,
            "commission_rate": rate,
            "commission_amount": commission,
        })),
        created_at: Set(now),
    }
    .insert(txn)
    .await?;

    platform_earning::ActiveModel {
        id: Set(Uuid::new_v4()),
        trip_id: Set(row.trip_id),
        driver_id: Set(row.driver_id),
        gross_fare: Set(row.gross_fare),
        commission_rate: Set(rate),
        commission_amount: Set(commission),
        net_earnings: Set(net),
        created_at: Set(now),
    }
    .insert(txn)
    .await?;

    Ok(true)
}

async fn attempt_settlement(
    db: &DatabaseConnection,
    row: &settlement::Model,
    default_rate: f64,
) -> AppResult<Option<SettlementOutcome>> {
    let (rate, commission, net) = match (row.commission_rate, row.commission_amount, row.net_earnings) {
        (Some(rate), Some(commission), Some(net)) => (rate, commission, net),
        // Rows queued without a frozen split are priced at the current rate
        _ => {
            let rate = current_commission_rate(db, default_rate).await?;
            let (commission, net) = commission_split(row.gross_fare, rate);
            (rate, commission, net)
        }
    };

    let txn = db.begin().await?;
    if !apply_settlement(&txn, row, rate, commission, net).await? {
        txn.rollback().await?;
        return Ok(None);
    }
    txn.commit().await?;

    Ok(Some(SettlementOutcome::Settled {
        commission_rate: rate,
        commission_amount: commission,
        net_earnings: net,
    }))
}

/// Settle a completed trip. Idempotent: a settled row is reported as is.
/// Ledger failures are recorded on the outbox row and returned as a
/// `Failed` outcome rather than an error.
pub async fn settle(
    db: &DatabaseConnection,
    trip_id: Uuid,
    default_rate: f64,
) -> AppResult<SettlementOutcome> {
    let row = find_settlement(db, trip_id).await?;
    if row.status == SettlementStatus::Settled {
        return Ok(stored_outcome(&row));
    }

    let attempt = attempt_settlement(db, &row, default_rate).await;

    match attempt {
        Ok(Some(outcome)) => {
            tracing::info!(trip_id = %trip_id, driver_id = %row.driver_id, outcome = ?outcome, "Trip settled");
            Ok(outcome)
        }
        // Settled concurrently by someone else
        Ok(None) => Ok(stored_outcome(&find_settlement(db, trip_id).await?)),
        Err(e) => {
            let message = e.to_string();
            tracing::error!(trip_id = %trip_id, error = %message, "Settlement failed");
            settlement::Entity::update_many()
                .col_expr(settlement::Column::Status, Expr::value(SettlementStatus::Failed))
                .col_expr(settlement::Column::Attempts, Expr::col(settlement::Column::Attempts).add(1))
                .col_expr(settlement::Column::LastError, Expr::value(Some(message.clone())))
                .filter(settlement::Column::TripId.eq(trip_id))
                .filter(settlement::Column::Status.ne(SettlementStatus::Settled))
                .exec(db)
                .await?;
            Ok(SettlementOutcome::Failed { error: message })
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcileReport {
    pub attempted: usize,
    pub settled: usize,
    pub failed: usize,
}

/// Retry every pending or failed settlement, oldest first.
pub async fn reconcile(db: &DatabaseConnection, default_rate: f64) -> AppResult<ReconcileReport> {
    let outstanding = settlement::Entity::find()
        .filter(settlement::Column::Status.is_in([SettlementStatus::Pending, SettlementStatus::Failed]))
        .order_by_asc(settlement::Column::CreatedAt)
        .all(db)
        .await?;

    let mut report = ReconcileReport::default();
    for row in outstanding {
        report.attempted += 1;
        match settle(db, row.trip_id, default_rate).await? {
            SettlementOutcome::Settled { .. } => report.settled += 1,
            SettlementOutcome::Failed { .. } => report.failed += 1,
        }
    }

    if report.attempted > 0 {
        tracing::info!(
            attempted = report.attempted,
            settled = report.settled,
            failed = report.failed,
            "Settlement reconciliation finished"
        );
    }
    Ok(report)
}

pub async fn list_settlements(
    db: &DatabaseConnection,
    status: Option<SettlementStatus>,
) -> AppResult<Vec<settlement::Model>> {
    let mut query = settlement::Entity::find();
    if let Some(status) = status {
        query = query.filter(settlement::Column::Status.eq(status));
    }
    Ok(query
        .order_by_desc(settlement::Column::CreatedAt)
        .all(db)
        .await?)
}

/// Best-effort reward credit for both parties of a completed trip.
pub async fn credit_rewards(db: &DatabaseConnection, trip: &trip::Model) -> AppResult<i64> {
    let points = reward_points(trip.distance_km);
    if points == 0 {
        return Ok(0);
    }

    if let Some(driver_id) = trip.driver_id {
        driver::Entity::update_many()
            .col_expr(driver::Column::RewardPoints, Expr::col(driver::Column::RewardPoints).add(points))
            .filter(driver::Column::Id.eq(driver_id))
            .exec(db)
            .await?;
    }
    passenger::Entity::update_many()
        .col_expr(
            passenger::Column::RewardPoints,
            Expr::col(passenger::Column::RewardPoints).add(points),
        )
        .filter(passenger::Column::Id.eq(trip.passenger_id))
        .exec(db)
        .await?;

    Ok(points)
}

// ============ Gateway-backed movements ============

fn validate_amount(amount: f64) -> AppResult<f64> {
    if !amount.is_finite() || amount <= 0.0 {
        return Err(AppError::Validation("Amount must be positive".to_string()));
    }
    Ok(round_money(amount))
}

async fn open_transaction(
    db: &DatabaseConnection,
    gateway: &GatewayClient,
    principal: &Principal,
    amount: f64,
    direction: Direction,
    method: &str,
) -> AppResult<ledger_transaction::Model> {
    let method = match method.trim() {
        "" => "gateway",
        m => m,
    };

    let pending = ledger_transaction::ActiveModel {
        id: Set(Uuid::new_v4()),
        user_id: Set(principal.id),
        role: Set(principal.role),
        amount: Set(amount),
        direction: Set(direction),
        status: Set(TransactionStatus::Pending),
        method: Set(method.to_string()),
        trip_id: Set(None),
        gateway_txn_id: Set(None),
        metadata: Set(serde_json::json!({})),
        created_at: Set(time::now()),
    }
    .insert(db)
    .await?;

    match gateway.initiate(&pending).await {
        Ok(None) => Ok(pending),
        Ok(Some(initiation)) => {
            let mut active: ledger_transaction::ActiveModel = pending.into();
            active.gateway_txn_id = Set(Some(initiation.reference.clone()));
            active.metadata = Set(serde_json::json!({ "checkout_url": initiation.checkout_url }));
            Ok(active.update(db).await?)
        }
        Err(e) => {
            let mut active: ledger_transaction::ActiveModel = pending.into();
            active.status = Set(TransactionStatus::Failed);
            active.metadata = Set(serde_json::json!({ "error": e.to_string() }));
            active.update(db).await?;
            Err(e)
        }
    }
}

pub async fn open_topup(
    db: &DatabaseConnection,
    gateway: &GatewayClient,
    principal: &Principal,
    amount: f64,
    method: &str,
) -> AppResult<ledger_transaction::Model> {
    let amount = validate_amount(amount)?;
    open_transaction(db, gateway, principal, amount, Direction::Credit, method).await
}

pub async fn open_withdrawal(
    db: &DatabaseConnection,
    gateway: &GatewayClient,
    principal: &Principal,
    amount: f64,
    method: &str,
) -> AppResult<ledger_transaction::Model> {
    principal.require_role(Role::Driver)?;
    let amount = validate_amount(amount)?;

    let wallet = get_wallet(db, principal.id, Role::Driver).await?;
    if wallet.balance < amount {
        return Err(AppError::Validation("Insufficient wallet balance".to_string()));
    }
    open_transaction(db, gateway, principal, amount, Direction::Debit, method).await
}

#[derive(Debug, Clone, Deserialize)]
pub struct GatewayCallback {
    #[serde(default)]
    pub transaction_id: Option<Uuid>,
    #[serde(default)]
    pub reference: Option<String>,
    pub status: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Finalize a pending entry from a gateway notification. Repeated or late
/// callbacks leave an already finalized entry untouched.
pub async fn apply_gateway_callback(
    db: &DatabaseConnection,
    callback: GatewayCallback,
) -> AppResult<ledger_transaction::Model> {
    let mut query = ledger_transaction::Entity::find();
    query = match (&callback.transaction_id, &callback.reference) {
        (Some(id), _) => query.filter(ledger_transaction::Column::Id.eq(*id)),
        (None, Some(reference)) => {
            query.filter(ledger_transaction::Column::GatewayTxnId.eq(reference.clone()))
        }
        (None, None) => {
            return Err(AppError::Validation(
                "transaction_id or reference is required".to_string(),
            ))
        }
    };
    let entry = query
        .one(db)
        .await?
        .ok_or_else(|| AppError::NotFound("Transaction not found".to_string()))?;

    let mut status = gateway::map_status(&callback.status);
    if status == TransactionStatus::Pending || entry.status != TransactionStatus::Pending {
        return Ok(entry);
    }

    let txn = db.begin().await?;

    if status == TransactionStatus::Success {
        let applied = match entry.direction {
            Direction::Credit => {
                increment_wallet(&txn, entry.user_id, entry.role, entry.amount, 0.0).await?;
                true
            }
            Direction::Debit => debit_wallet(&txn, entry.user_id, entry.role, entry.amount).await?,
        };
        if !applied {
            tracing::warn!(transaction_id = %entry.id, "Payout exceeds balance, marking failed");
            status = TransactionStatus::Failed;
        }
    }

    let finalized = ledger_transaction::Entity::update_many()
        .col_expr(ledger_transaction::Column::Status, Expr::value(status))
        .col_expr(
            ledger_transaction::Column::GatewayTxnId,
            Expr::value(callback.reference.clone().or(entry.gateway_txn_id.clone())),
        )
        .col_expr(ledger_transaction::Column::Metadata, Expr::value(callback.payload))
        .filter(ledger_transaction::Column::Id.eq(entry.id))
        .filter(ledger_transaction::Column::Status.eq(TransactionStatus::Pending))
        .exec(&txn)
        .await?;

    if finalized.rows_affected == 0 {
        // Finalized by a concurrent callback; drop our wallet change
        txn.rollback().await?;
    } else {
        txn.commit().await?;
        tracing::info!(transaction_id = %entry.id, status = ?status, "Gateway transaction finalized");
    }

    ledger_transaction::Entity::find_by_id(entry.id)
        .one(db)
        .await?
        .ok_or_else(|| AppError::NotFound("Transaction not found".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_commission_split() {
        assert_eq!(commission_split(100.0, 15.0), (15.0, 85.0));
        assert_eq!(commission_split(5.13, 15.0), (0.77, 4.36));
        assert_eq!(commission_split(40.0, 0.0), (0.0, 40.0));
    }

    #[test]
    fn test_reward_points() {
        assert_eq!(reward_points(3.13), 10);
        assert_eq!(reward_points(1.99), 0);
        assert_eq!(reward_points(10.0), 50);
        assert_eq!(reward_points(f64::NAN), 0);
    }

    #[test]
    fn test_outcome_wire_format() {
        let json = serde_json::to_value(SettlementOutcome::Failed {
            error: "db down".into(),
        })
        .unwrap();
        assert_eq!(json["status"], "failed");
        assert_eq!(json["error"], "db down");
    }
}
