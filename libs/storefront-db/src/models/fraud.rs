use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use sqlx::types::Json;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "fraud_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum FraudType {
    FakeReceipt,
    DuplicatePayment,
    SuspiciousPattern,
    HighFrequency,
    UnusualAmount,
    MultipleAccounts,
}

impl FraudType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FakeReceipt => "fake_receipt",
            Self::DuplicatePayment => "duplicate_payment",
            Self::SuspiciousPattern => "suspicious_pattern",
            Self::HighFrequency => "high_frequency",
            Self::UnusualAmount => "unusual_amount",
            Self::MultipleAccounts => "multiple_accounts",
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(type_name = "fraud_severity", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum FraudSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl FraudSeverity {
    /// High and Critical detections fan out an admin alert.
    pub fn alerts_admins(&self) -> bool {
        *self >= Self::High
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "fraud_action", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum FraudAction {
    Warn,
    Suspend,
    Block,
    DeleteConfig,
    Investigate,
}

impl FraudAction {
    pub fn blocks_account(&self) -> bool {
        matches!(self, Self::Suspend | Self::Block)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Warn => "warn",
            Self::Suspend => "suspend",
            Self::Block => "block",
            Self::DeleteConfig => "delete_config",
            Self::Investigate => "investigate",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "detection_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DetectionStatus {
    Detected,
    Investigating,
    Resolved,
    FalsePositive,
}

impl DetectionStatus {
    /// Detected -> Investigating -> Resolved | FalsePositive. Detected may close directly.
    pub fn can_transition_to(&self, next: DetectionStatus) -> bool {
        use DetectionStatus::*;
        matches!(
            (self, next),
            (Detected, Investigating)
                | (Detected, Resolved)
                | (Detected, FalsePositive)
                | (Investigating, Resolved)
                | (Investigating, FalsePositive)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct FraudRule {
    pub id: i64,
    pub name: String,
    pub fraud_type: FraudType,
    pub severity: FraudSeverity,
    pub action: FraudAction,
    pub criteria: Json<serde_json::Value>,
    pub threshold: Option<f64>,
    pub is_active: bool,
    pub auto_action: bool,
    pub triggered_count: i32,
    pub false_positive_count: i32,
    pub last_triggered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl FraudRule {
    pub const DEFAULT_THRESHOLD: f64 = 0.7;

    pub fn effective_threshold(&self) -> f64 {
        self.threshold.unwrap_or(Self::DEFAULT_THRESHOLD)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct FraudDetection {
    pub id: i64,
    pub account_id: i64,
    pub rule_id: Option<i64>,
    pub fraud_type: FraudType,
    pub severity: FraudSeverity,
    pub confidence: f64,
    pub description: String,
    pub evidence: Json<serde_json::Value>,
    pub transaction_id: Option<i64>,
    pub status: DetectionStatus,
    pub action_taken: Option<FraudAction>,
    pub action_details: Option<String>,
    pub reviewed_by: Option<i64>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub detected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct FraudAlert {
    pub id: i64,
    pub detection_id: i64,
    pub account_id: i64,
    pub severity: FraudSeverity,
    pub message: String,
    pub admin_recipients: Vec<i64>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WhitelistEntry {
    pub id: i64,
    pub account_id: i64,
    pub reason: String,
    pub is_active: bool,
    pub expires_at: Option<DateTime<Utc>>,
    pub created_by: i64,
    pub created_at: DateTime<Utc>,
}

impl WhitelistEntry {
    pub fn is_effective(&self, now: DateTime<Utc>) -> bool {
        self.is_active && self.expires_at.is_none_or(|at| at > now)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct BlacklistEntry {
    pub id: i64,
    pub account_id: i64,
    pub reason: String,
    pub fraud_type: FraudType,
    pub severity: FraudSeverity,
    pub is_active: bool,
    pub auto_block: bool,
    pub created_by: i64,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn severity_ordering_drives_alerts() {
        assert!(FraudSeverity::Critical > FraudSeverity::High);
        assert!(FraudSeverity::High.alerts_admins());
        assert!(!FraudSeverity::Medium.alerts_admins());
    }

    #[test]
    fn expired_whitelist_entry_is_ignored() {
        let now = Utc::now();
        let mut entry = WhitelistEntry {
            id: 1,
            account_id: 7,
            reason: "vip".into(),
            is_active: true,
            expires_at: Some(now - Duration::hours(1)),
            created_by: 1,
            created_at: now,
        };
        assert!(!entry.is_effective(now));
        entry.expires_at = None;
        assert!(entry.is_effective(now));
    }

    #[test]
    fn closed_detections_stay_closed() {
        assert!(!DetectionStatus::Resolved.can_transition_to(DetectionStatus::Investigating));
        assert!(DetectionStatus::Investigating.can_transition_to(DetectionStatus::FalsePositive));
    }
}
