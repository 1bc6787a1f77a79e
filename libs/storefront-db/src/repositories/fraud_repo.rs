use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use sqlx::types::Json;

use crate::models::fraud::{
    BlacklistEntry, DetectionStatus, FraudAction, FraudAlert, FraudDetection, FraudRule,
    FraudSeverity, FraudType, WhitelistEntry,
};

#[derive(Debug, Clone)]
pub struct NewDetection<'a> {
    pub account_id: i64,
    pub rule_id: Option<i64>,
    pub fraud_type: FraudType,
    pub severity: FraudSeverity,
    pub confidence: f64,
    pub description: &'a str,
    pub evidence: serde_json::Value,
    pub transaction_id: Option<i64>,
}

pub struct FraudRepository;

impl FraudRepository {
    pub async fn active_rules(conn: &mut PgConnection) -> Result<Vec<FraudRule>> {
        sqlx::query_as::<_, FraudRule>("SELECT * FROM fraud_rules WHERE is_active = TRUE ORDER BY id")
            .fetch_all(&mut *conn)
            .await
            .context("Failed to fetch active fraud rules")
    }

    pub async fn get_rule(conn: &mut PgConnection, id: i64) -> Result<Option<FraudRule>> {
        sqlx::query_as::<_, FraudRule>("SELECT * FROM fraud_rules WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await
            .context("Failed to fetch fraud rule")
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn create_rule(
        conn: &mut PgConnection,
        name: &str,
        fraud_type: FraudType,
        severity: FraudSeverity,
        action: FraudAction,
        criteria: serde_json::Value,
        threshold: Option<f64>,
        auto_action: bool,
    ) -> Result<FraudRule> {
        sqlx::query_as::<_, FraudRule>(
            r#"
            INSERT INTO fraud_rules (name, fraud_type, severity, action, criteria, threshold, auto_action)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(name)
        .bind(fraud_type)
        .bind(severity)
        .bind(action)
        .bind(Json(criteria))
        .bind(threshold)
        .bind(auto_action)
        .fetch_one(&mut *conn)
        .await
        .context("Failed to create fraud rule")
    }

    pub async fn set_rule_active(conn: &mut PgConnection, id: i64, active: bool) -> Result<()> {
        sqlx::query("UPDATE fraud_rules SET is_active = $1 WHERE id = $2")
            .bind(active)
            .bind(id)
            .execute(&mut *conn)
            .await
            .context("Failed to toggle fraud rule")?;
        Ok(())
    }

    pub async fn record_trigger(conn: &mut PgConnection, rule_id: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE fraud_rules
            SET triggered_count = triggered_count + 1, last_triggered_at = CURRENT_TIMESTAMP
            WHERE id = $1
            "#,
        )
        .bind(rule_id)
        .execute(&mut *conn)
        .await
        .context("Failed to update rule trigger stats")?;
        Ok(())
    }

    pub async fn record_false_positive(conn: &mut PgConnection, rule_id: i64) -> Result<()> {
        sqlx::query("UPDATE fraud_rules SET false_positive_count = false_positive_count + 1 WHERE id = $1")
            .bind(rule_id)
            .execute(&mut *conn)
            .await
            .context("Failed to update false positive count")?;
        Ok(())
    }

    pub async fn insert_detection(conn: &mut PgConnection, new: &NewDetection<'_>) -> Result<FraudDetection> {
        sqlx::query_as::<_, FraudDetection>(
            r#"
            INSERT INTO fraud_detections
                (account_id, rule_id, fraud_type, severity, confidence, description, evidence, transaction_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING *
            "#,
        )
        .bind(new.account_id)
        .bind(new.rule_id)
        .bind(new.fraud_type)
        .bind(new.severity)
        .bind(new.confidence)
        .bind(new.description)
        .bind(Json(new.evidence.clone()))
        .bind(new.transaction_id)
        .fetch_one(&mut *conn)
        .await
        .context("Failed to insert fraud detection")
    }

    pub async fn get_detection(conn: &mut PgConnection, id: i64) -> Result<Option<FraudDetection>> {
        sqlx::query_as::<_, FraudDetection>("SELECT * FROM fraud_detections WHERE id = $1")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await
            .context("Failed to fetch fraud detection")
    }

    pub async fn lock_detection(conn: &mut PgConnection, id: i64) -> Result<Option<FraudDetection>> {
        sqlx::query_as::<_, FraudDetection>("SELECT * FROM fraud_detections WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await
            .context("Failed to lock fraud detection")
    }

    /// Claims the detection for an action. `None` means one was already taken.
    pub async fn claim_action(
        conn: &mut PgConnection,
        id: i64,
        action: FraudAction,
        details: &str,
    ) -> Result<Option<FraudDetection>> {
        sqlx::query_as::<_, FraudDetection>(
            r#"
            UPDATE fraud_detections
            SET action_taken = $1, action_details = $2,
                status = CASE WHEN $1 = 'investigate'::fraud_action
                    THEN 'investigating'::detection_status ELSE status END
            WHERE id = $3 AND action_taken IS NULL
            RETURNING *
            "#,
        )
        .bind(action)
        .bind(details)
        .bind(id)
        .fetch_optional(&mut *conn)
        .await
        .context("Failed to record fraud action")
    }

    pub async fn set_detection_status(
        conn: &mut PgConnection,
        id: i64,
        status: DetectionStatus,
        reviewer_id: i64,
    ) -> Result<FraudDetection> {
        sqlx::query_as::<_, FraudDetection>(
            r#"
            UPDATE fraud_detections
            SET status = $1, reviewed_by = $2, reviewed_at = CURRENT_TIMESTAMP
            WHERE id = $3
            RETURNING *
            "#,
        )
        .bind(status)
        .bind(reviewer_id)
        .bind(id)
        .fetch_one(&mut *conn)
        .await
        .context("Failed to update detection status")
    }

    pub async fn detections_for_account(conn: &mut PgConnection, account_id: i64) -> Result<Vec<FraudDetection>> {
        sqlx::query_as::<_, FraudDetection>(
            "SELECT * FROM fraud_detections WHERE account_id = $1 ORDER BY detected_at DESC",
        )
        .bind(account_id)
        .fetch_all(&mut *conn)
        .await
        .context("Failed to fetch account detections")
    }

    pub async fn detections_for_transaction(
        conn: &mut PgConnection,
        transaction_id: i64,
    ) -> Result<Vec<FraudDetection>> {
        sqlx::query_as::<_, FraudDetection>(
            "SELECT * FROM fraud_detections WHERE transaction_id = $1 ORDER BY id",
        )
        .bind(transaction_id)
        .fetch_all(&mut *conn)
        .await
        .context("Failed to fetch transaction detections")
    }

    pub async fn open_detections(conn: &mut PgConnection, limit: i64) -> Result<Vec<FraudDetection>> {
        sqlx::query_as::<_, FraudDetection>(
            r#"
            SELECT * FROM fraud_detections
            WHERE status IN ('detected', 'investigating')
            ORDER BY severity DESC, detected_at DESC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&mut *conn)
        .await
        .context("Failed to list open detections")
    }

    pub async fn insert_alert(
        conn: &mut PgConnection,
        detection: &FraudDetection,
        message: &str,
        admin_recipients: &[i64],
    ) -> Result<FraudAlert> {
        sqlx::query_as::<_, FraudAlert>(
            r#"
            INSERT INTO fraud_alerts (detection_id, account_id, severity, message, admin_recipients)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING *
            "#,
        )
        .bind(detection.id)
        .bind(detection.account_id)
        .bind(detection.severity)
        .bind(message)
        .bind(admin_recipients)
        .fetch_one(&mut *conn)
        .await
        .context("Failed to insert fraud alert")
    }

    pub async fn whitelist_entries(conn: &mut PgConnection, account_id: i64) -> Result<Vec<WhitelistEntry>> {
        sqlx::query_as::<_, WhitelistEntry>(
            "SELECT * FROM fraud_whitelist WHERE account_id = $1 AND is_active = TRUE",
        )
        .bind(account_id)
        .fetch_all(&mut *conn)
        .await
        .context("Failed to fetch whitelist entries")
    }

    pub async fn active_blacklist(conn: &mut PgConnection, account_id: i64) -> Result<Option<BlacklistEntry>> {
        sqlx::query_as::<_, BlacklistEntry>(
            r#"
            SELECT * FROM fraud_blacklist
            WHERE account_id = $1 AND is_active = TRUE
            ORDER BY severity DESC, created_at DESC
            LIMIT 1
            "#,
        )
        .bind(account_id)
        .fetch_optional(&mut *conn)
        .await
        .context("Failed to fetch blacklist entry")
    }

    pub async fn add_whitelist(
        conn: &mut PgConnection,
        account_id: i64,
        reason: &str,
        expires_at: Option<DateTime<Utc>>,
        created_by: i64,
    ) -> Result<WhitelistEntry> {
        sqlx::query_as::<_, WhitelistEntry>(
            r#"
            INSERT INTO fraud_whitelist (account_id, reason, expires_at, created_by)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(account_id)
        .bind(reason)
        .bind(expires_at)
        .bind(created_by)
        .fetch_one(&mut *conn)
        .await
        .context("Failed to add whitelist entry")
    }

    pub async fn add_blacklist(
        conn: &mut PgConnection,
        account_id: i64,
        reason: &str,
        fraud_type: FraudType,
        severity: FraudSeverity,
        auto_block: bool,
        created_by: i64,
    ) -> Result<BlacklistEntry> {
        sqlx::query_as::<_, BlacklistEntry>(
            r#"
            INSERT INTO fraud_blacklist (account_id, reason, fraud_type, severity, auto_block, created_by)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *
            "#,
        )
        .bind(account_id)
        .bind(reason)
        .bind(fraud_type)
        .bind(severity)
        .bind(auto_block)
        .bind(created_by)
        .fetch_one(&mut *conn)
        .await
        .context("Failed to add blacklist entry")
    }
}
