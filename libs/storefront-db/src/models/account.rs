use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Account {
    pub id: i64,
    pub tg_id: i64,
    pub username: Option<String>,
    pub balance: Decimal,
    pub total_spent: Decimal,
    pub referrer_id: Option<i64>,
    pub is_blocked: bool,
    pub created_at: DateTime<Utc>,
}
