use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgConnection;

use crate::models::reseller::{Commission, PayoutMethod, ResellerPayment};

#[derive(Debug, Clone)]
pub struct NewCommission {
    pub reseller_id: i64,
    pub transaction_id: i64,
    pub customer_account_id: i64,
    pub level: i16,
    pub commission_rate: Decimal,
    pub base_amount: Decimal,
    pub commission_amount: Decimal,
}

#[derive(Debug, Clone)]
pub struct NewPayment {
    pub reseller_id: i64,
    pub amount: Decimal,
    pub method: PayoutMethod,
    pub commission_ids: Vec<i64>,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub processed_by: i64,
    pub transaction_id: Option<i64>,
}

pub struct CommissionRepository;

impl CommissionRepository {
    /// Returns `None` if this reseller was already credited for the transaction.
    pub async fn insert(conn: &mut PgConnection, new: &NewCommission) -> Result<Option<Commission>> {
        sqlx::query_as::<_, Commission>(
            r#"
            INSERT INTO commissions
                (reseller_id, transaction_id, customer_account_id, level,
                 commission_rate, base_amount, commission_amount)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (transaction_id, reseller_id) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(new.reseller_id)
        .bind(new.transaction_id)
        .bind(new.customer_account_id)
        .bind(new.level)
        .bind(new.commission_rate)
        .bind(new.base_amount)
        .bind(new.commission_amount)
        .fetch_optional(&mut *conn)
        .await
        .context("Failed to insert commission")
    }

    pub async fn has_served_customer(
        conn: &mut PgConnection,
        reseller_id: i64,
        customer_account_id: i64,
    ) -> Result<bool> {
        sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS(
                SELECT 1 FROM commissions
                WHERE reseller_id = $1 AND customer_account_id = $2 AND level = 1
            )
            "#,
        )
        .bind(reseller_id)
        .bind(customer_account_id)
        .fetch_one(&mut *conn)
        .await
        .context("Failed to check customer history")
    }

    pub async fn for_transaction(conn: &mut PgConnection, transaction_id: i64) -> Result<Vec<Commission>> {
        sqlx::query_as::<_, Commission>(
            "SELECT * FROM commissions WHERE transaction_id = $1 ORDER BY level",
        )
        .bind(transaction_id)
        .fetch_all(&mut *conn)
        .await
        .context("Failed to fetch commissions for transaction")
    }

    pub async fn lock_unpaid(conn: &mut PgConnection, reseller_id: i64) -> Result<Vec<Commission>> {
        sqlx::query_as::<_, Commission>(
            r#"
            SELECT * FROM commissions
            WHERE reseller_id = $1 AND status IN ('pending', 'approved')
            ORDER BY created_at
            FOR UPDATE
            "#,
        )
        .bind(reseller_id)
        .fetch_all(&mut *conn)
        .await
        .context("Failed to lock unpaid commissions")
    }

    pub async fn mark_paid(conn: &mut PgConnection, ids: &[i64]) -> Result<()> {
        sqlx::query(
            "UPDATE commissions SET status = 'paid', paid_at = CURRENT_TIMESTAMP WHERE id = ANY($1)",
        )
        .bind(ids)
        .execute(&mut *conn)
        .await
        .context("Failed to mark commissions paid")?;
        Ok(())
    }

    pub async fn insert_payment(conn: &mut PgConnection, new: &NewPayment) -> Result<ResellerPayment> {
        sqlx::query_as::<_, ResellerPayment>(
            r#"
            INSERT INTO reseller_payments
                (reseller_id, amount, method, commission_ids, period_start, period_end,
                 processed_by, transaction_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *
            "#,
        )
        .bind(new.reseller_id)
        .bind(new.amount)
        .bind(new.method)
        .bind(&new.commission_ids)
        .bind(new.period_start)
        .bind(new.period_end)
        .bind(new.processed_by)
        .bind(new.transaction_id)
        .fetch_one(&mut *conn)
        .await
        .context("Failed to record reseller payment")
    }
}
