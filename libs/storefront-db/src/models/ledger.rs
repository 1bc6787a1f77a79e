use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "transaction_kind", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    TopUp,
    Purchase,
    Refund,
    Transfer,
    Gift,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TopUp => "top_up",
            Self::Purchase => "purchase",
            Self::Refund => "refund",
            Self::Transfer => "transfer",
            Self::Gift => "gift",
        }
    }

    /// Kinds that go through fraud scoring and may be auto-approved.
    pub fn is_reviewable(&self) -> bool {
        matches!(self, Self::TopUp | Self::Purchase)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "transaction_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Approved,
    Rejected,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn is_final(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A money-moving record. `amount` never changes after insert.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Transaction {
    pub id: i64,
    pub account_id: i64,
    pub amount: Decimal,
    pub currency: String,
    pub kind: TransactionKind,
    pub status: TransactionStatus,
    pub fraud_score: f64,
    pub description: Option<String>,
    pub receipt_ref: Option<String>,
    pub receipt_fingerprint: Option<String>,
    pub related_transaction_id: Option<i64>,
    pub approved_by: Option<i64>,
    pub approved_at: Option<DateTime<Utc>>,
    pub review_note: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Insert payload for [`crate::repositories::transaction_repo::TransactionRepository::insert`].
#[derive(Debug, Clone)]
pub struct NewTransaction<'a> {
    pub account_id: i64,
    pub amount: Decimal,
    pub currency: &'a str,
    pub kind: TransactionKind,
    pub status: TransactionStatus,
    pub description: Option<&'a str>,
    pub receipt_ref: Option<&'a str>,
    pub receipt_fingerprint: Option<&'a str>,
    pub related_transaction_id: Option<i64>,
}

impl<'a> NewTransaction<'a> {
    pub fn new(account_id: i64, amount: Decimal, currency: &'a str, kind: TransactionKind) -> Self {
        Self {
            account_id,
            amount,
            currency,
            kind,
            status: TransactionStatus::Pending,
            description: None,
            receipt_ref: None,
            receipt_fingerprint: None,
            related_transaction_id: None,
        }
    }

    pub fn approved(mut self) -> Self {
        self.status = TransactionStatus::Approved;
        self
    }

    pub fn describe(mut self, description: &'a str) -> Self {
        self.description = Some(description);
        self
    }

    pub fn receipt(mut self, receipt_ref: &'a str, fingerprint: &'a str) -> Self {
        self.receipt_ref = Some(receipt_ref);
        self.receipt_fingerprint = Some(fingerprint);
        self
    }

    pub fn related_to(mut self, transaction_id: i64) -> Self {
        self.related_transaction_id = Some(transaction_id);
        self
    }
}
