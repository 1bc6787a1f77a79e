use anyhow::{Context, Result};
use rust_decimal::Decimal;
use sqlx::PgConnection;

use crate::models::reseller::{LevelRule, Reseller, ResellerLevel, ResellerStatus};

pub struct ResellerRepository;

impl ResellerRepository {
    pub async fn insert(
        conn: &mut PgConnection,
        account_id: i64,
        parent_id: Option<i64>,
        rule: &LevelRule,
    ) -> Result<Reseller> {
        sqlx::query_as::<_, Reseller>(
            r#"
            INSERT INTO resellers (account_id, parent_id, level, commission_rate, max_sub_resellers)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(account_id)
        .bind(parent_id)
        .bind(rule.level)
        .bind(rule.commission_rate)
        .bind(rule.max_sub_resellers)
        .fetch_one(&mut *conn)
        .await
        .context("Failed to create reseller")
    }

    pub async fn get(conn: &mut PgConnection, id: i64) -> Result<Option<Reseller>> {
        sqlx::query_as::<_, Reseller>("SELECT * FROM resellers WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await
            .context("Failed to fetch reseller")
    }

    pub async fn lock(conn: &mut PgConnection, id: i64) -> Result<Option<Reseller>> {
        sqlx::query_as::<_, Reseller>("SELECT * FROM resellers WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await
            .context("Failed to lock reseller")
    }

    pub async fn by_account(conn: &mut PgConnection, account_id: i64) -> Result<Option<Reseller>> {
        sqlx::query_as::<_, Reseller>("SELECT * FROM resellers WHERE account_id = $1")
            .bind(account_id)
            .fetch_optional(&mut *conn)
            .await
            .context("Failed to fetch reseller by account")
    }

    /// The reseller followed by its ancestors, nearest first. Depth-capped so
    /// a corrupted loop cannot recurse forever.
    pub async fn chain_ids(conn: &mut PgConnection, id: i64) -> Result<Vec<i64>> {
        sqlx::query_scalar::<_, i64>(
            r#"
            WITH RECURSIVE chain AS (
                SELECT id, parent_id, 1 AS depth FROM resellers WHERE id = $1
                UNION ALL
                SELECT r.id, r.parent_id, c.depth + 1
                FROM resellers r
                JOIN chain c ON r.id = c.parent_id
                WHERE c.depth < 64
            )
            SELECT id FROM chain ORDER BY depth
            "#,
        )
        .bind(id)
        .fetch_all(&mut *conn)
        .await
        .context("Failed to walk reseller hierarchy")
    }

    pub async fn set_status(conn: &mut PgConnection, id: i64, status: ResellerStatus) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE resellers
            SET status = $1,
                approved_at = CASE WHEN $1 = 'active'::reseller_status
                    THEN COALESCE(approved_at, CURRENT_TIMESTAMP) ELSE approved_at END
            WHERE id = $2
            "#,
        )
        .bind(status)
        .bind(id)
        .execute(&mut *conn)
        .await
        .context("Failed to update reseller status")?;
        Ok(())
    }

    pub async fn set_parent(conn: &mut PgConnection, id: i64, parent_id: Option<i64>) -> Result<()> {
        sqlx::query("UPDATE resellers SET parent_id = $1 WHERE id = $2")
            .bind(parent_id)
            .bind(id)
            .execute(&mut *conn)
            .await
            .context("Failed to reparent reseller")?;
        Ok(())
    }

    pub async fn adjust_sub_resellers(conn: &mut PgConnection, id: i64, delta: i32) -> Result<()> {
        sqlx::query(
            "UPDATE resellers SET total_sub_resellers = GREATEST(total_sub_resellers + $1, 0) WHERE id = $2",
        )
        .bind(delta)
        .bind(id)
        .execute(&mut *conn)
        .await
        .context("Failed to update sub-reseller count")?;
        Ok(())
    }

    pub async fn apply_level(conn: &mut PgConnection, id: i64, rule: &LevelRule) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE resellers
            SET level = $1, commission_rate = $2, max_sub_resellers = $3,
                level_updated_at = CURRENT_TIMESTAMP
            WHERE id = $4
            "#,
        )
        .bind(rule.level)
        .bind(rule.commission_rate)
        .bind(rule.max_sub_resellers)
        .bind(id)
        .execute(&mut *conn)
        .await
        .context("Failed to apply reseller level")?;
        Ok(())
    }

    /// Books one sale's commission against the reseller's running totals.
    pub async fn record_commission(
        conn: &mut PgConnection,
        id: i64,
        sale_amount: Decimal,
        commission: Decimal,
        new_customer: bool,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE resellers
            SET total_sales = total_sales + $1,
                total_commission_earned = total_commission_earned + $2,
                pending_commission = pending_commission + $2,
                total_customers = total_customers + CASE WHEN $3 THEN 1 ELSE 0 END
            WHERE id = $4
            "#,
        )
        .bind(sale_amount)
        .bind(commission)
        .bind(new_customer)
        .bind(id)
        .execute(&mut *conn)
        .await
        .context("Failed to record reseller commission")?;
        Ok(())
    }

    pub async fn record_payout(conn: &mut PgConnection, id: i64, amount: Decimal) -> Result<()> {
        sqlx::query(
            "UPDATE resellers SET pending_commission = 0, total_paid = total_paid + $1 WHERE id = $2",
        )
        .bind(amount)
        .bind(id)
        .execute(&mut *conn)
        .await
        .context("Failed to record reseller payout")?;
        Ok(())
    }

    pub async fn level_rule(conn: &mut PgConnection, level: ResellerLevel) -> Result<Option<LevelRule>> {
        sqlx::query_as::<_, LevelRule>(
            "SELECT * FROM reseller_level_rules WHERE level = $1 AND is_active = TRUE",
        )
        .bind(level)
        .fetch_optional(&mut *conn)
        .await
        .context("Failed to fetch level rule")
    }
}
