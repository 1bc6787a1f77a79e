use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "reseller_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ResellerStatus {
    Pending,
    Active,
    Suspended,
    Terminated,
    Blacklisted,
}

impl ResellerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Suspended => "suspended",
            Self::Terminated => "terminated",
            Self::Blacklisted => "blacklisted",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Terminated | Self::Blacklisted)
    }

    /// Allowed lifecycle moves. Terminated and Blacklisted are final.
    pub fn can_transition_to(&self, next: ResellerStatus) -> bool {
        use ResellerStatus::*;
        match (self, next) {
            (Pending, Active) => true,
            (Active, Suspended) | (Suspended, Active) => true,
            (from, Terminated | Blacklisted) => !from.is_terminal(),
            _ => false,
        }
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type,
)]
#[sqlx(type_name = "reseller_level", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ResellerLevel {
    Bronze,
    Silver,
    Gold,
    Platinum,
    Diamond,
}

impl ResellerLevel {
    pub fn next(&self) -> Option<ResellerLevel> {
        match self {
            Self::Bronze => Some(Self::Silver),
            Self::Silver => Some(Self::Gold),
            Self::Gold => Some(Self::Platinum),
            Self::Platinum => Some(Self::Diamond),
            Self::Diamond => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Bronze => "bronze",
            Self::Silver => "silver",
            Self::Gold => "gold",
            Self::Platinum => "platinum",
            Self::Diamond => "diamond",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "commission_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum CommissionStatus {
    Pending,
    Approved,
    Paid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "payout_method", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum PayoutMethod {
    Wallet,
    BankTransfer,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Reseller {
    pub id: i64,
    pub account_id: i64,
    pub parent_id: Option<i64>,
    pub level: ResellerLevel,
    pub status: ResellerStatus,
    pub commission_rate: Decimal,
    pub total_sales: Decimal,
    pub total_commission_earned: Decimal,
    pub pending_commission: Decimal,
    pub total_paid: Decimal,
    pub total_customers: i32,
    pub total_sub_resellers: i32,
    pub max_sub_resellers: i32,
    pub can_create_sub_resellers: bool,
    pub approved_at: Option<DateTime<Utc>>,
    pub level_updated_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Reseller {
    pub fn is_active(&self) -> bool {
        self.status == ResellerStatus::Active
    }

    /// Whole 30-day months since approval; zero while unapproved.
    pub fn months_active(&self, now: DateTime<Utc>) -> i32 {
        self.approved_at
            .map(|at| ((now - at).num_days() / 30).max(0) as i32)
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct LevelRule {
    pub level: ResellerLevel,
    pub min_sales: Decimal,
    pub min_customers: i32,
    pub min_sub_resellers: i32,
    pub min_months_active: i32,
    pub commission_rate: Decimal,
    pub max_sub_resellers: i32,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Commission {
    pub id: i64,
    pub reseller_id: i64,
    pub transaction_id: i64,
    pub customer_account_id: i64,
    pub level: i16,
    pub commission_rate: Decimal,
    pub base_amount: Decimal,
    pub commission_amount: Decimal,
    pub status: CommissionStatus,
    pub created_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ResellerPayment {
    pub id: i64,
    pub reseller_id: i64,
    pub amount: Decimal,
    pub method: PayoutMethod,
    pub commission_ids: Vec<i64>,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub processed_by: i64,
    pub transaction_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn terminal_statuses_are_sticky() {
        assert!(!ResellerStatus::Terminated.can_transition_to(ResellerStatus::Active));
        assert!(!ResellerStatus::Blacklisted.can_transition_to(ResellerStatus::Terminated));
        assert!(ResellerStatus::Suspended.can_transition_to(ResellerStatus::Blacklisted));
        assert!(ResellerStatus::Pending.can_transition_to(ResellerStatus::Active));
        assert!(!ResellerStatus::Pending.can_transition_to(ResellerStatus::Suspended));
    }

    #[test]
    fn levels_climb_to_diamond() {
        let mut level = ResellerLevel::Bronze;
        let mut steps = 0;
        while let Some(next) = level.next() {
            assert!(next > level);
            level = next;
            steps += 1;
        }
        assert_eq!(level, ResellerLevel::Diamond);
        assert_eq!(steps, 4);
    }

    #[test]
    fn months_active_counts_thirty_day_blocks() {
        let now = Utc::now();
        let reseller = Reseller {
            id: 1,
            account_id: 1,
            parent_id: None,
            level: ResellerLevel::Bronze,
            status: ResellerStatus::Active,
            commission_rate: Decimal::new(10, 0),
            total_sales: Decimal::ZERO,
            total_commission_earned: Decimal::ZERO,
            pending_commission: Decimal::ZERO,
            total_paid: Decimal::ZERO,
            total_customers: 0,
            total_sub_resellers: 0,
            max_sub_resellers: 5,
            can_create_sub_resellers: true,
            approved_at: Some(now - Duration::days(95)),
            level_updated_at: None,
            created_at: now,
        };
        assert_eq!(reseller.months_active(now), 3);
    }
}
