use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgConnection;

use crate::models::ledger::{NewTransaction, Transaction, TransactionStatus};

pub struct TransactionRepository;

impl TransactionRepository {
    pub async fn insert(conn: &mut PgConnection, new: &NewTransaction<'_>) -> Result<Transaction> {
        let approved = new.status == TransactionStatus::Approved;
        sqlx::query_as::<_, Transaction>(
            r#"
            INSERT INTO transactions
                (account_id, amount, currency, kind, status, description,
                 receipt_ref, receipt_fingerprint, related_transaction_id, approved_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9,
                    CASE WHEN $10 THEN CURRENT_TIMESTAMP ELSE NULL END)
            RETURNING *
            "#,
        )
        .bind(new.account_id)
        .bind(new.amount)
        .bind(new.currency)
        .bind(new.kind)
        .bind(new.status)
        .bind(new.description)
        .bind(new.receipt_ref)
        .bind(new.receipt_fingerprint)
        .bind(new.related_transaction_id)
        .bind(approved)
        .fetch_one(&mut *conn)
        .await
        .context("Failed to insert transaction")
    }

    pub async fn get(conn: &mut PgConnection, id: i64) -> Result<Option<Transaction>> {
        sqlx::query_as::<_, Transaction>("SELECT * FROM transactions WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await
            .context("Failed to fetch transaction")
    }

    /// Moves a pending transaction to a final status. Returns `None` when the
    /// row is missing or another reviewer already finalized it.
    pub async fn finalize(
        conn: &mut PgConnection,
        id: i64,
        status: TransactionStatus,
        actor_id: Option<i64>,
        note: Option<&str>,
    ) -> Result<Option<Transaction>> {
        sqlx::query_as::<_, Transaction>(
            r#"
            UPDATE transactions
            SET status = $1, approved_by = $2, approved_at = CURRENT_TIMESTAMP, review_note = $3
            WHERE id = $4 AND status = 'pending'
            RETURNING *
            "#,
        )
        .bind(status)
        .bind(actor_id)
        .bind(note)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .context("Failed to finalize transaction")
    }

    pub async fn set_fraud_score(conn: &mut PgConnection, id: i64, score: f64) -> Result<()> {
        sqlx::query("UPDATE transactions SET fraud_score = $1 WHERE id = $2")
            .bind(score)
            .bind(id)
            .execute(&mut *conn)
            .await
            .context("Failed to store fraud score")?;
        Ok(())
    }

    /// Most recent transactions of the account created at or after `since`,
    /// newest first, excluding `exclude_id`.
    pub async fn recent_for_account(
        conn: &mut PgConnection,
        account_id: i64,
        since: DateTime<Utc>,
        exclude_id: i64,
        limit: i64,
    ) -> Result<Vec<Transaction>> {
        sqlx::query_as::<_, Transaction>(
            r#"
            SELECT * FROM transactions
            WHERE account_id = $1 AND created_at >= $2 AND id <> $3
            ORDER BY created_at DESC
            LIMIT $4
            "#,
        )
        .bind(account_id)
        .bind(since)
        .bind(exclude_id)
        .bind(limit)
        .fetch_all(&mut *conn)
        .await
        .context("Failed to fetch account history")
    }

    /// Receipts an account submitted since `since`, and the approved part of
    /// their total.
    pub async fn receipt_activity(
        conn: &mut PgConnection,
        account_id: i64,
        since: DateTime<Utc>,
        exclude_id: i64,
    ) -> Result<(i64, Decimal)> {
        let activity: (i64, Decimal) = sqlx::query_as(
            r#"
            SELECT COUNT(*),
                   COALESCE(SUM(amount) FILTER (WHERE status = 'approved'), 0)
            FROM transactions
            WHERE account_id = $1 AND created_at >= $2 AND id <> $3
              AND receipt_fingerprint IS NOT NULL
            "#,
        )
        .bind(account_id)
        .bind(since)
        .bind(exclude_id)
        .fetch_one(&mut *conn)
        .await
        .context("Failed to sum daily receipt activity")?;
        Ok(activity)
    }

    /// Other transactions, from any account, that carry the same receipt fingerprint.
    pub async fn with_fingerprint(
        conn: &mut PgConnection,
        fingerprint: &str,
        exclude_id: i64,
    ) -> Result<Vec<Transaction>> {
        sqlx::query_as::<_, Transaction>(
            "SELECT * FROM transactions WHERE receipt_fingerprint = $1 AND id <> $2 ORDER BY created_at DESC",
        )
        .bind(fingerprint)
        .bind(exclude_id)
        .fetch_all(&mut *conn)
        .await
        .context("Failed to look up receipt fingerprint")
    }

    pub async fn list_pending(conn: &mut PgConnection, limit: i64) -> Result<Vec<Transaction>> {
        sqlx::query_as::<_, Transaction>(
            "SELECT * FROM transactions WHERE status = 'pending' ORDER BY created_at ASC LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&mut *conn)
        .await
        .context("Failed to list pending transactions")
    }
}
