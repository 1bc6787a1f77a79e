use chrono::{DateTime, Duration, Utc};
use sqlx::{PgConnection, PgPool};
use storefront_db::models::fraud::{
    BlacklistEntry, DetectionStatus, FraudAction, FraudDetection, FraudRule, FraudSeverity,
    FraudType, WhitelistEntry,
};
use storefront_db::models::ledger::Transaction;
use storefront_db::repositories::account_repo::AccountRepository;
use storefront_db::repositories::fraud_repo::{FraudRepository, NewDetection};
use storefront_db::repositories::intent_repo::PurchaseIntentRepository;
use storefront_db::repositories::transaction_repo::TransactionRepository;
use tracing::{debug, info, warn};

use super::effects::PostCommit;
use crate::capabilities::Capabilities;
use crate::error::{LedgerError, Result};
use crate::fraud::{DailyActivity, DailyLimits, FraudContext, RuleCriteria, Screening, combine_scores, evaluate_rules};

const HISTORY_LIMIT: i64 = 50;
const DAILY_WINDOW_HOURS: i64 = 24;

#[derive(Debug, Default)]
pub struct FraudOutcome {
    pub detections: Vec<FraudDetection>,
    pub score: f64,
    /// An automatic action blocked the account.
    pub blocked: bool,
    pub effects: PostCommit,
}

pub struct FraudService {
    pool: PgPool,
    caps: Capabilities,
    enabled: bool,
    limits: DailyLimits,
}

/// Only clear accounts are held to the daily limits: a whitelist skips
/// scoring and a blacklist already scores the maximum.
fn daily_limits_apply(screening: &Screening) -> bool {
    matches!(screening, Screening::Clear)
}

fn action_details(action: FraudAction) -> String {
    match action {
        FraudAction::Warn => "account warned".to_string(),
        FraudAction::Suspend | FraudAction::Block => format!("account {}", action.as_str()),
        FraudAction::DeleteConfig => "services deactivated".to_string(),
        FraudAction::Investigate => "flagged for manual review".to_string(),
    }
}

impl FraudService {
    pub fn new(pool: PgPool, caps: Capabilities, enabled: bool, limits: DailyLimits) -> Self {
        Self {
            pool,
            caps,
            enabled,
            limits,
        }
    }

    pub async fn screen(conn: &mut PgConnection, account_id: i64, now: DateTime<Utc>) -> Result<Screening> {
        let whitelisted = FraudRepository::whitelist_entries(conn, account_id)
            .await?
            .iter()
            .any(|e| e.is_effective(now));
        if whitelisted {
            return Ok(Screening::Whitelisted);
        }
        Ok(match FraudRepository::active_blacklist(conn, account_id).await? {
            Some(entry) => Screening::Blacklisted(entry),
            None => Screening::Clear,
        })
    }

    /// Scores a freshly created transaction inside the caller's unit of work,
    /// stores detections and runs automatic actions.
    pub async fn evaluate_in(&self, conn: &mut PgConnection, transaction: &Transaction) -> Result<FraudOutcome> {
        if !self.enabled {
            return Ok(FraudOutcome::default());
        }

        let now = Utc::now();
        let account = AccountRepository::get(conn, transaction.account_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("account", transaction.account_id))?;
        let screening = Self::screen(conn, account.id, now).await?;
        let rules = FraudRepository::active_rules(conn).await?;
        let history = TransactionRepository::recent_for_account(
            conn,
            account.id,
            DateTime::<Utc>::UNIX_EPOCH,
            transaction.id,
            HISTORY_LIMIT,
        )
        .await?;
        let fingerprint_matches = match &transaction.receipt_fingerprint {
            Some(fp) => TransactionRepository::with_fingerprint(conn, fp, transaction.id).await?,
            None => Vec::new(),
        };

        let ctx = FraudContext {
            transaction,
            account: &account,
            history: &history,
            fingerprint_matches: &fingerprint_matches,
            now,
        };
        let evaluation = evaluate_rules(&rules, &ctx, &screening);
        for skipped in &evaluation.skipped {
            warn!("Skipping fraud rule: {}", skipped);
        }

        let limit_score = if daily_limits_apply(&screening) && transaction.receipt_fingerprint.is_some() {
            let (submitted, approved_amount) = TransactionRepository::receipt_activity(
                conn,
                account.id,
                now - Duration::hours(DAILY_WINDOW_HOURS),
                transaction.id,
            )
            .await?;
            let activity = DailyActivity {
                submitted,
                approved_amount,
            };
            let confidence = self.limits.score(&activity, transaction.amount);
            if confidence.score > 0.0 {
                warn!(
                    "Account {} over daily limits on transaction {}: {}",
                    account.id, transaction.id, confidence.evidence
                );
            }
            confidence.score
        } else {
            0.0
        };

        let mut outcome = FraudOutcome {
            score: combine_scores(evaluation.score, limit_score),
            ..FraudOutcome::default()
        };
        let admins = self.caps.authorizer.admin_ids();
        let driver = evaluation.auto_action_driver();

        for (idx, finding) in evaluation.findings.iter().enumerate() {
            let description = finding.description();
            let detection = FraudRepository::insert_detection(
                conn,
                &NewDetection {
                    account_id: account.id,
                    rule_id: finding.rule_id,
                    fraud_type: finding.fraud_type,
                    severity: finding.severity,
                    confidence: finding.confidence,
                    description: &description,
                    evidence: finding.evidence.clone(),
                    transaction_id: Some(transaction.id),
                },
            )
            .await?;
            if let Some(rule_id) = finding.rule_id {
                FraudRepository::record_trigger(conn, rule_id).await?;
            }
            warn!(
                "Fraud detection {} on transaction {}: {}",
                detection.id, transaction.id, description
            );

            if finding.severity.alerts_admins() {
                let message = format!(
                    "[{}] account {} transaction {}: {}",
                    finding.severity.as_str(),
                    account.id,
                    transaction.id,
                    description
                );
                FraudRepository::insert_alert(conn, &detection, &message, &admins).await?;
                outcome.effects.notify_admins(message);
            }

            let detection = if driver == Some(idx) {
                let (applied, effects) = Self::apply_action_in(conn, &detection, finding.action).await?;
                outcome.effects.merge(effects);
                if let Some(updated) = applied {
                    if finding.action.blocks_account() {
                        outcome.blocked = true;
                    }
                    updated
                } else {
                    detection
                }
            } else {
                detection
            };
            outcome.detections.push(detection);
        }

        TransactionRepository::set_fraud_score(conn, transaction.id, outcome.score).await?;
        Ok(outcome)
    }

    /// Applies `action` to a detection once. Returns `None` when an action was
    /// already recorded for it.
    pub async fn apply_action_in(
        conn: &mut PgConnection,
        detection: &FraudDetection,
        action: FraudAction,
    ) -> Result<(Option<FraudDetection>, PostCommit)> {
        let mut effects = PostCommit::default();
        let details = action_details(action);

        let Some(updated) = FraudRepository::claim_action(conn, detection.id, action, &details).await? else {
            debug!("Detection {} already actioned, skipping {}", detection.id, action.as_str());
            return Ok((None, effects));
        };

        match action {
            FraudAction::Warn => {
                effects.notify_account(
                    detection.account_id,
                    "Unusual activity was detected on your account. Further violations may lead to suspension.",
                );
            }
            FraudAction::Suspend | FraudAction::Block => {
                AccountRepository::set_blocked(conn, detection.account_id, true).await?;
                effects.notify_account(detection.account_id, "Your account has been blocked pending review.");
            }
            FraudAction::DeleteConfig => {
                for intent in PurchaseIntentRepository::active_services(conn, detection.account_id).await? {
                    PurchaseIntentRepository::deactivate_service(conn, intent.id).await?;
                    if let Some(service_ref) = intent.service_ref {
                        effects.deactivate.push(service_ref);
                    }
                }
                effects.notify_account(detection.account_id, "Your VPN services have been deactivated.");
            }
            FraudAction::Investigate => {
                effects.notify_admins(format!(
                    "Detection {} on account {} needs investigation",
                    detection.id, detection.account_id
                ));
            }
        }

        info!("Fraud action {} applied for detection {}", action.as_str(), detection.id);
        Ok((Some(updated), effects))
    }

    /// Manually runs an action. Repeating it on an actioned detection does nothing.
    pub async fn execute_action(&self, detection_id: i64, action: FraudAction, actor_id: i64) -> Result<bool> {
        if !self.caps.authorizer.can_review(actor_id) {
            return Err(LedgerError::Unauthorized { actor_id });
        }

        let mut tx = self.pool.begin().await?;
        let detection = FraudRepository::lock_detection(&mut tx, detection_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("fraud detection", detection_id))?;
        let (applied, effects) = Self::apply_action_in(&mut tx, &detection, action).await?;
        tx.commit().await?;

        effects.dispatch(&self.pool, &self.caps).await;
        Ok(applied.is_some())
    }

    pub async fn review_detection(
        &self,
        detection_id: i64,
        reviewer_id: i64,
        status: DetectionStatus,
    ) -> Result<FraudDetection> {
        if !self.caps.authorizer.can_review(reviewer_id) {
            return Err(LedgerError::Unauthorized { actor_id: reviewer_id });
        }

        let mut tx = self.pool.begin().await?;
        let detection = FraudRepository::lock_detection(&mut tx, detection_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("fraud detection", detection_id))?;
        if !detection.status.can_transition_to(status) {
            return Err(LedgerError::InvalidTransition(format!(
                "detection {} cannot move from {:?} to {:?}",
                detection_id, detection.status, status
            )));
        }

        let updated = FraudRepository::set_detection_status(&mut tx, detection_id, status, reviewer_id).await?;
        if status == DetectionStatus::FalsePositive {
            if let Some(rule_id) = detection.rule_id {
                FraudRepository::record_false_positive(&mut tx, rule_id).await?;
            }
        }
        tx.commit().await?;

        info!("Detection {} reviewed by {}: {:?}", detection_id, reviewer_id, status);
        Ok(updated)
    }

    pub async fn unblock_account(&self, account_id: i64, actor_id: i64) -> Result<()> {
        if !self.caps.authorizer.can_review(actor_id) {
            return Err(LedgerError::Unauthorized { actor_id });
        }

        let mut tx = self.pool.begin().await?;
        AccountRepository::lock(&mut tx, account_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("account", account_id))?;
        AccountRepository::set_blocked(&mut tx, account_id, false).await?;
        tx.commit().await?;

        info!("Account {} unblocked by {}", account_id, actor_id);
        let mut effects = PostCommit::default();
        effects.notify_account(account_id, "Your account has been unblocked.");
        effects.dispatch(&self.pool, &self.caps).await;
        Ok(())
    }

    pub async fn whitelist(
        &self,
        account_id: i64,
        reason: &str,
        expires_at: Option<DateTime<Utc>>,
        actor_id: i64,
    ) -> Result<WhitelistEntry> {
        if !self.caps.authorizer.can_review(actor_id) {
            return Err(LedgerError::Unauthorized { actor_id });
        }
        let mut conn = self.pool.acquire().await?;
        Ok(FraudRepository::add_whitelist(&mut conn, account_id, reason, expires_at, actor_id).await?)
    }

    /// Adds a blacklist entry; with `auto_block` the account is blocked at once.
    pub async fn blacklist(
        &self,
        account_id: i64,
        reason: &str,
        fraud_type: FraudType,
        severity: FraudSeverity,
        auto_block: bool,
        actor_id: i64,
    ) -> Result<BlacklistEntry> {
        if !self.caps.authorizer.can_review(actor_id) {
            return Err(LedgerError::Unauthorized { actor_id });
        }

        let mut tx = self.pool.begin().await?;
        let entry = FraudRepository::add_blacklist(
            &mut tx, account_id, reason, fraud_type, severity, auto_block, actor_id,
        )
        .await?;
        if auto_block {
            AccountRepository::set_blocked(&mut tx, account_id, true).await?;
        }
        tx.commit().await?;

        info!("Account {} blacklisted by {} ({})", account_id, actor_id, reason);
        Ok(entry)
    }

    /// Adds a rule. Criteria that do not parse for the rule's type are refused.
    #[allow(clippy::too_many_arguments)]
    pub async fn add_rule(
        &self,
        name: &str,
        fraud_type: FraudType,
        severity: FraudSeverity,
        action: FraudAction,
        criteria: serde_json::Value,
        threshold: Option<f64>,
        auto_action: bool,
        actor_id: i64,
    ) -> Result<FraudRule> {
        if !self.caps.authorizer.can_review(actor_id) {
            return Err(LedgerError::Unauthorized { actor_id });
        }

        let mut tx = self.pool.begin().await?;
        let rule = FraudRepository::create_rule(
            &mut tx, name, fraud_type, severity, action, criteria, threshold, auto_action,
        )
        .await?;
        RuleCriteria::parse(&rule)?;
        tx.commit().await?;

        info!("Fraud rule {} '{}' added by {}", rule.id, rule.name, actor_id);
        Ok(rule)
    }

    pub async fn set_rule_active(&self, rule_id: i64, active: bool, actor_id: i64) -> Result<()> {
        if !self.caps.authorizer.can_review(actor_id) {
            return Err(LedgerError::Unauthorized { actor_id });
        }
        let mut conn = self.pool.acquire().await?;
        FraudRepository::get_rule(&mut conn, rule_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("fraud rule", rule_id))?;
        FraudRepository::set_rule_active(&mut conn, rule_id, active).await?;
        info!("Fraud rule {} active={} (by {})", rule_id, active, actor_id);
        Ok(())
    }

    pub async fn open_detections(&self, limit: i64) -> Result<Vec<FraudDetection>> {
        let mut conn = self.pool.acquire().await?;
        Ok(FraudRepository::open_detections(&mut conn, limit).await?)
    }

    pub async fn detections_for_account(&self, account_id: i64) -> Result<Vec<FraudDetection>> {
        let mut conn = self.pool.acquire().await?;
        Ok(FraudRepository::detections_for_account(&mut conn, account_id).await?)
    }

    pub async fn detections_for_transaction(&self, transaction_id: i64) -> Result<Vec<FraudDetection>> {
        let mut conn = self.pool.acquire().await?;
        Ok(FraudRepository::detections_for_transaction(&mut conn, transaction_id).await?)
    }
}
