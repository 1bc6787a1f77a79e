use anyhow::{Context, Result};
use rust_decimal::Decimal;
use sqlx::PgConnection;

use crate::models::account::Account;

/// Row access for `accounts`. Balance writes are only issued by callers
/// holding the row lock from [`AccountRepository::lock`].
pub struct AccountRepository;

impl AccountRepository {
    pub async fn create(
        conn: &mut PgConnection,
        tg_id: i64,
        username: Option<&str>,
        referrer_id: Option<i64>,
    ) -> Result<Account> {
        sqlx::query_as::<_, Account>(
            r#"
            INSERT INTO accounts (tg_id, username, referrer_id)
            VALUES ($1, $2, $3)
            ON CONFLICT (tg_id) DO UPDATE SET
                username = COALESCE(excluded.username, accounts.username),
                referrer_id = COALESCE(accounts.referrer_id, excluded.referrer_id)
            RETURNING *
            "#,
        )
        .bind(tg_id)
        .bind(username)
        .bind(referrer_id)
        .fetch_one(&mut *conn)
        .await
        .context("Failed to upsert account")
    }

    pub async fn get(conn: &mut PgConnection, id: i64) -> Result<Option<Account>> {
        sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await
            .context("Failed to fetch account")
    }

    pub async fn get_by_tg_id(conn: &mut PgConnection, tg_id: i64) -> Result<Option<Account>> {
        sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE tg_id = $1")
            .bind(tg_id)
            .fetch_optional(&mut *conn)
            .await
            .context("Failed to fetch account by TG ID")
    }

    /// Row-locks the account for the rest of the surrounding transaction.
    pub async fn lock(conn: &mut PgConnection, id: i64) -> Result<Option<Account>> {
        sqlx::query_as::<_, Account>("SELECT * FROM accounts WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await
            .context("Failed to lock account")
    }

    pub async fn set_balance(conn: &mut PgConnection, id: i64, balance: Decimal) -> Result<()> {
        sqlx::query("UPDATE accounts SET balance = $1 WHERE id = $2")
            .bind(balance)
            .bind(id)
            .execute(&mut *conn)
            .await
            .context("Failed to update account balance")?;
        Ok(())
    }

    pub async fn add_total_spent(conn: &mut PgConnection, id: i64, amount: Decimal) -> Result<()> {
        sqlx::query("UPDATE accounts SET total_spent = total_spent + $1 WHERE id = $2")
            .bind(amount)
            .bind(id)
            .execute(&mut *conn)
            .await
            .context("Failed to update total spent")?;
        Ok(())
    }

    pub async fn set_blocked(conn: &mut PgConnection, id: i64, blocked: bool) -> Result<()> {
        sqlx::query("UPDATE accounts SET is_blocked = $1 WHERE id = $2")
            .bind(blocked)
            .bind(id)
            .execute(&mut *conn)
            .await
            .context("Failed to update account block flag")?;
        Ok(())
    }
}
