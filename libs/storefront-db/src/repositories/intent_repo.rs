use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgConnection;

use crate::models::purchase::{IntentStatus, PurchaseIntent};

#[derive(Debug, Clone)]
pub struct NewIntent<'a> {
    pub account_id: i64,
    pub plan_id: i64,
    pub server_id: i64,
    pub total_amount: Decimal,
    pub paid_from_wallet: Decimal,
    pub due_from_receipt: Decimal,
    pub status: IntentStatus,
    pub wallet_transaction_id: Option<i64>,
    pub alias: &'a str,
}

pub struct PurchaseIntentRepository;

impl PurchaseIntentRepository {
    /// Fails with a unique violation when `(account_id, alias)` is taken.
    pub async fn insert(conn: &mut PgConnection, new: &NewIntent<'_>) -> Result<PurchaseIntent> {
        let paid = new.status == IntentStatus::Paid;
        sqlx::query_as::<_, PurchaseIntent>(
            r#"
            INSERT INTO purchase_intents
                (account_id, plan_id, server_id, total_amount, paid_from_wallet, due_from_receipt,
                 status, wallet_transaction_id, alias, settled_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9,
                    CASE WHEN $10 THEN CURRENT_TIMESTAMP ELSE NULL END)
            RETURNING *
            "#,
        )
        .bind(new.account_id)
        .bind(new.plan_id)
        .bind(new.server_id)
        .bind(new.total_amount)
        .bind(new.paid_from_wallet)
        .bind(new.due_from_receipt)
        .bind(new.status)
        .bind(new.wallet_transaction_id)
        .bind(new.alias)
        .bind(paid)
        .fetch_one(&mut *conn)
        .await
        .context("Failed to insert purchase intent")
    }

    pub async fn alias_exists(conn: &mut PgConnection, account_id: i64, alias: &str) -> Result<bool> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM purchase_intents WHERE account_id = $1 AND alias = $2)",
        )
        .bind(account_id)
        .bind(alias)
        .fetch_one(&mut *conn)
        .await
        .context("Failed to check alias")
    }

    pub async fn get(conn: &mut PgConnection, id: i64) -> Result<Option<PurchaseIntent>> {
        sqlx::query_as::<_, PurchaseIntent>("SELECT * FROM purchase_intents WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await
            .context("Failed to fetch purchase intent")
    }

    pub async fn lock(conn: &mut PgConnection, id: i64) -> Result<Option<PurchaseIntent>> {
        sqlx::query_as::<_, PurchaseIntent>("SELECT * FROM purchase_intents WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await
            .context("Failed to lock purchase intent")
    }

    pub async fn lock_by_receipt(
        conn: &mut PgConnection,
        transaction_id: i64,
    ) -> Result<Option<PurchaseIntent>> {
        sqlx::query_as::<_, PurchaseIntent>(
            "SELECT * FROM purchase_intents WHERE receipt_transaction_id = $1 FOR UPDATE",
        )
        .bind(transaction_id)
        .fetch_optional(&mut *conn)
        .await
        .context("Failed to lock intent by receipt")
    }

    pub async fn attach_receipt(conn: &mut PgConnection, id: i64, transaction_id: i64) -> Result<()> {
        sqlx::query(
            "UPDATE purchase_intents SET receipt_transaction_id = $1 WHERE id = $2 AND status = 'pending'",
        )
        .bind(transaction_id)
        .bind(id)
        .execute(&mut *conn)
        .await
        .context("Failed to attach receipt")?;
        Ok(())
    }

    pub async fn mark_paid(conn: &mut PgConnection, id: i64) -> Result<Option<PurchaseIntent>> {
        sqlx::query_as::<_, PurchaseIntent>(
            r#"
            UPDATE purchase_intents SET status = 'paid', settled_at = CURRENT_TIMESTAMP
            WHERE id = $1 AND status = 'pending'
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .context("Failed to mark intent paid")
    }

    pub async fn mark_cancelled(conn: &mut PgConnection, id: i64) -> Result<Option<PurchaseIntent>> {
        sqlx::query_as::<_, PurchaseIntent>(
            r#"
            UPDATE purchase_intents SET status = 'cancelled', settled_at = CURRENT_TIMESTAMP
            WHERE id = $1 AND status = 'pending'
            RETURNING *
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .context("Failed to cancel intent")
    }

    /// Stores the provisioner's result once. Returns false if another worker got there first.
    pub async fn set_service(
        conn: &mut PgConnection,
        id: i64,
        service_ref: &str,
        subscription_url: &str,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE purchase_intents
            SET service_ref = $1, subscription_url = $2, service_active = TRUE
            WHERE id = $3 AND service_ref IS NULL
            "#,
        )
        .bind(service_ref)
        .bind(subscription_url)
        .bind(id)
        .execute(&mut *conn)
        .await
        .context("Failed to store provisioned service")?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn deactivate_service(conn: &mut PgConnection, id: i64) -> Result<()> {
        sqlx::query("UPDATE purchase_intents SET service_active = FALSE WHERE id = $1")
            .bind(id)
            .execute(&mut *conn)
            .await
            .context("Failed to deactivate service")?;
        Ok(())
    }

    pub async fn active_services(conn: &mut PgConnection, account_id: i64) -> Result<Vec<PurchaseIntent>> {
        sqlx::query_as::<_, PurchaseIntent>(
            r#"
            SELECT * FROM purchase_intents
            WHERE account_id = $1 AND status = 'paid' AND service_active = TRUE
            ORDER BY settled_at DESC
            "#,
        )
        .bind(account_id)
        .fetch_all(&mut *conn)
        .await
        .context("Failed to list active services")
    }

    pub async fn stale_pending(conn: &mut PgConnection, cutoff: DateTime<Utc>) -> Result<Vec<i64>> {
        sqlx::query_scalar::<_, i64>(
            "SELECT id FROM purchase_intents WHERE status = 'pending' AND created_at < $1 ORDER BY id",
        )
        .bind(cutoff)
        .fetch_all(&mut *conn)
        .await
        .context("Failed to list stale intents")
    }

    pub async fn service_pending(conn: &mut PgConnection, limit: i64) -> Result<Vec<i64>> {
        sqlx::query_scalar::<_, i64>(
            "SELECT id FROM purchase_intents WHERE status = 'paid' AND service_ref IS NULL ORDER BY id LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&mut *conn)
        .await
        .context("Failed to list intents awaiting provisioning")
    }
}
