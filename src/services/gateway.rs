use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use crate::entities::ledger_transaction::{self, Direction, TransactionStatus};
use crate::error::{AppError, AppResult};

/// Reference handed back by the gateway when a payment is initiated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Initiation {
    pub reference: String,
    #[serde(default)]
    pub checkout_url: Option<String>,
}

#[derive(Debug, Serialize)]
struct InitiationRequest<'a> {
    transaction_id: Uuid,
    user_id: Uuid,
    amount: f64,
    method: &'a str,
    kind: &'static str,
}

/// HTTP client for deposit and payout initiation.
#[derive(Clone)]
pub struct GatewayClient {
    http: reqwest::Client,
    base_url: Option<String>,
}

impl GatewayClient {
    pub fn new(base_url: Option<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            http,
            base_url: base_url.map(|u| u.trim_end_matches('/').to_string()),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.base_url.is_some()
    }

    /// Ask the gateway to start collecting (credit) or paying out (debit).
    /// Returns `None` when no gateway is configured.
    pub async fn initiate(&self, txn: &ledger_transaction::Model) -> AppResult<Option<Initiation>> {
        let Some(base_url) = &self.base_url else {
            tracing::warn!(
                transaction_id = %txn.id,
                "No payment gateway configured, transaction left pending"
            );
            return Ok(None);
        };

        let (path, kind) = match txn.direction {
            Direction::Credit => ("deposits", "deposit"),
            Direction::Debit => ("payouts", "payout"),
        };

        let response = self
            .http
            .post(format!("{}/{}", base_url, path))
            .json(&InitiationRequest {
                transaction_id: txn.id,
                user_id: txn.user_id,
                amount: txn.amount,
                method: &txn.method,
                kind,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AppError::Gateway(format!(
                "Gateway rejected {} with status {}",
                kind,
                response.status()
            )));
        }

        let initiation: Initiation = response.json().await?;
        tracing::info!(
            transaction_id = %txn.id,
            reference = %initiation.reference,
            "Payment initiated"
        );
        Ok(Some(initiation))
    }
}

/// Map a gateway status string onto a ledger status. Unknown values keep
/// the entry pending.
pub fn map_status(raw: &str) -> TransactionStatus {
    match raw.trim().to_ascii_uppercase().as_str() {
        "COMPLETED" | "SUCCESS" | "APPROVED" => TransactionStatus::Success,
        "FAILED" | "FAILURE" | "DECLINED" => TransactionStatus::Failed,
        "CANCELED" | "CANCELLED" => TransactionStatus::Canceled,
        _ => TransactionStatus::Pending,
    }
}

/// Compare the webhook secret header against the configured one. Without a
/// configured secret every call is rejected unless unsigned webhooks were
/// explicitly allowed.
pub fn verify_webhook_secret(
    expected: Option<&str>,
    provided: Option<&str>,
    allow_unsigned: bool,
) -> AppResult<()> {
    match expected {
        None if allow_unsigned => {
            tracing::warn!("Accepting unsigned gateway webhook");
            Ok(())
        }
        None => Err(AppError::Unauthorized(
            "Gateway webhook secret is not configured".to_string(),
        )),
        Some(expected) if provided == Some(expected) => Ok(()),
        Some(_) => Err(AppError::Unauthorized(
            "Invalid webhook signature".to_string(),
        )),
    }
}
