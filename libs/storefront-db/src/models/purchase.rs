use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "intent_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum IntentStatus {
    Pending,
    Paid,
    Cancelled,
}

impl IntentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_final(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PurchaseIntent {
    pub id: i64,
    pub account_id: i64,
    pub plan_id: i64,
    pub server_id: i64,
    pub total_amount: Decimal,
    pub paid_from_wallet: Decimal,
    pub due_from_receipt: Decimal,
    pub status: IntentStatus,
    pub wallet_transaction_id: Option<i64>,
    pub receipt_transaction_id: Option<i64>,
    pub alias: String,
    pub service_ref: Option<String>,
    pub subscription_url: Option<String>,
    pub service_active: bool,
    pub created_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}

impl PurchaseIntent {
    /// Paid but the provisioner has not produced a service yet.
    pub fn is_service_pending(&self) -> bool {
        self.status == IntentStatus::Paid && self.service_ref.is_none()
    }
}
