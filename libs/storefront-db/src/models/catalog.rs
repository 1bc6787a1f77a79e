use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Plan {
    pub id: i64,
    pub title: String,
    pub price: Decimal,
    pub duration_days: Option<i32>,
    pub traffic_gb: Option<i32>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Server {
    pub id: i64,
    pub name: String,
    pub host: String,
    pub panel_type: String, // "mock" unless a real panel adapter is configured
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}
