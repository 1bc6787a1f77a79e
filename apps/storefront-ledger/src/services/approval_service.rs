use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::PgPool;
use std::sync::Arc;
use storefront_db::models::ledger::{Transaction, TransactionKind, TransactionStatus};
use storefront_db::models::purchase::PurchaseIntent;
use storefront_db::models::reseller::Commission;
use storefront_db::repositories::intent_repo::PurchaseIntentRepository;
use storefront_db::repositories::transaction_repo::TransactionRepository;
use tracing::{debug, info};

use super::effects::PostCommit;
use super::purchase_service::PurchaseService;
use super::wallet_service::WalletService;
use crate::capabilities::Capabilities;
use crate::config::LedgerConfig;
use crate::error::{LedgerError, Result};

#[derive(Debug, Serialize)]
pub struct ApprovalOutcome {
    pub transaction: Transaction,
    /// Set when the transaction paid a purchase intent.
    pub intent: Option<PurchaseIntent>,
    pub commissions: Vec<Commission>,
    pub referral_bonus: Option<(i64, Decimal)>,
    pub provisioning_errors: Vec<String>,
}

/// A receipt skips manual review only when auto-approval is on, nothing
/// blocked the account and the fraud score stays under the configured cap.
pub fn auto_approve_eligible(config: &LedgerConfig, kind: TransactionKind, score: f64, blocked: bool) -> bool {
    config.auto_approve_receipts && kind.is_reviewable() && !blocked && score < config.auto_approve_max_fraud_score
}

pub struct ApprovalService {
    pool: PgPool,
    config: Arc<LedgerConfig>,
    caps: Capabilities,
}

impl ApprovalService {
    pub fn new(pool: PgPool, config: Arc<LedgerConfig>, caps: Capabilities) -> Self {
        Self { pool, config, caps }
    }

    pub async fn approve(&self, transaction_id: i64, approver_id: i64, note: Option<&str>) -> Result<ApprovalOutcome> {
        if !self.caps.authorizer.can_review(approver_id) {
            return Err(LedgerError::Unauthorized { actor_id: approver_id });
        }
        self.approve_as(transaction_id, Some(approver_id), note).await
    }

    /// Approves a freshly screened receipt without a reviewer when policy
    /// allows. Returns `None` if it stays pending for manual review.
    pub async fn try_auto_approve(
        &self,
        transaction: &Transaction,
        score: f64,
        blocked: bool,
    ) -> Result<Option<ApprovalOutcome>> {
        if !auto_approve_eligible(&self.config, transaction.kind, score, blocked) {
            debug!("Transaction {} left for manual review (score {:.2})", transaction.id, score);
            return Ok(None);
        }

        match self.approve_as(transaction.id, None, Some("auto-approved")).await {
            Ok(outcome) => {
                info!("Transaction {} auto-approved (score {:.2})", transaction.id, score);
                Ok(Some(outcome))
            }
            Err(e) if e.is_already_final() || matches!(e, LedgerError::FraudBlocked { .. }) => {
                debug!("Auto-approval of {} skipped: {}", transaction.id, e);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    async fn approve_as(&self, transaction_id: i64, actor_id: Option<i64>, note: Option<&str>) -> Result<ApprovalOutcome> {
        let mut tx = self.pool.begin().await?;

        let current = TransactionRepository::get(&mut tx, transaction_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("transaction", transaction_id))?;
        if current.status.is_final() {
            return Err(LedgerError::AlreadyFinal {
                transaction_id,
                status: current.status,
            });
        }

        // Lock order: accounts by id, intent, transaction, reseller rows.
        let account = if current.kind == TransactionKind::Purchase {
            WalletService::lock_buyer(&mut tx, current.account_id).await?
        } else {
            WalletService::lock_account(&mut tx, current.account_id).await?
        };
        if account.is_blocked {
            return Err(LedgerError::FraudBlocked { account_id: account.id });
        }
        let intent = if current.kind == TransactionKind::Purchase {
            PurchaseIntentRepository::lock_by_receipt(&mut tx, transaction_id).await?
        } else {
            None
        };

        let Some(transaction) =
            TransactionRepository::finalize(&mut tx, transaction_id, TransactionStatus::Approved, actor_id, note).await?
        else {
            return Err(self.already_final(transaction_id).await);
        };

        let mut effects = PostCommit::default();
        let mut outcome = ApprovalOutcome {
            transaction,
            intent: None,
            commissions: Vec::new(),
            referral_bonus: None,
            provisioning_errors: Vec::new(),
        };

        match outcome.transaction.kind {
            TransactionKind::TopUp | TransactionKind::Refund | TransactionKind::Gift => {
                let balance = WalletService::credit(&mut tx, account.id, outcome.transaction.amount).await?;
                effects.notify_account(
                    account.id,
                    format!(
                        "Your payment of {} {} was approved. Balance: {}",
                        outcome.transaction.amount, outcome.transaction.currency, balance
                    ),
                );
            }
            TransactionKind::Purchase => match intent {
                Some(intent) => {
                    let settlement = PurchaseService::settle_in(&mut tx, &self.config, &intent, transaction_id).await?;
                    effects.merge(settlement.effects);
                    outcome.intent = settlement.intent;
                    outcome.commissions = settlement.commissions;
                    outcome.referral_bonus = settlement.referral_bonus;
                }
                None => debug!("Purchase transaction {} has no intent to settle", transaction_id),
            },
            TransactionKind::Transfer => {}
        }

        tx.commit().await?;
        info!(
            "Transaction {} approved by {}",
            transaction_id,
            actor_id.map_or_else(|| "auto".to_string(), |id| id.to_string())
        );

        let dispatched = effects.dispatch(&self.pool, &self.caps).await;
        if let Some(provisioned) = dispatched.provisioned.into_iter().next() {
            outcome.intent = Some(provisioned);
        }
        outcome.provisioning_errors = dispatched.failures.iter().map(|e| e.to_string()).collect();
        Ok(outcome)
    }

    /// Rejects a pending transaction. A rejected purchase receipt cancels
    /// its intent.
    pub async fn reject(&self, transaction_id: i64, approver_id: i64, reason: &str) -> Result<Transaction> {
        if !self.caps.authorizer.can_review(approver_id) {
            return Err(LedgerError::Unauthorized { actor_id: approver_id });
        }

        let mut tx = self.pool.begin().await?;
        let current = TransactionRepository::get(&mut tx, transaction_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("transaction", transaction_id))?;
        if current.status.is_final() {
            return Err(LedgerError::AlreadyFinal {
                transaction_id,
                status: current.status,
            });
        }

        WalletService::lock_account(&mut tx, current.account_id).await?;
        let intent = if current.kind == TransactionKind::Purchase {
            PurchaseIntentRepository::lock_by_receipt(&mut tx, transaction_id).await?
        } else {
            None
        };

        let Some(transaction) = TransactionRepository::finalize(
            &mut tx,
            transaction_id,
            TransactionStatus::Rejected,
            Some(approver_id),
            Some(reason),
        )
        .await?
        else {
            return Err(self.already_final(transaction_id).await);
        };

        if let Some(intent) = intent {
            PurchaseService::cancel_in(&mut tx, &intent).await?;
        }
        tx.commit().await?;

        info!("Transaction {} rejected by {}: {}", transaction_id, approver_id, reason);
        let mut effects = PostCommit::default();
        effects.notify_account(
            transaction.account_id,
            format!("Your payment of {} {} was rejected: {}", transaction.amount, transaction.currency, reason),
        );
        effects.dispatch(&self.pool, &self.caps).await;
        Ok(transaction)
    }

    pub async fn pending(&self, limit: i64) -> Result<Vec<Transaction>> {
        let mut conn = self.pool.acquire().await?;
        Ok(TransactionRepository::list_pending(&mut conn, limit).await?)
    }

    /// Builds the error for a transaction another reviewer finalized first.
    async fn already_final(&self, transaction_id: i64) -> LedgerError {
        let status = match self.pool.acquire().await {
            Ok(mut conn) => TransactionRepository::get(&mut conn, transaction_id)
                .await
                .ok()
                .flatten()
                .map(|t| t.status),
            Err(_) => None,
        };
        match status {
            Some(status) => LedgerError::AlreadyFinal { transaction_id, status },
            None => LedgerError::not_found("transaction", transaction_id),
        }
    }
}
