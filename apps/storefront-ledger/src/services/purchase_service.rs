use chrono::{Duration, Utc};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::{PgConnection, PgPool};
use std::sync::Arc;
use storefront_db::db::is_unique_violation;
use storefront_db::models::fraud::FraudDetection;
use storefront_db::models::ledger::{NewTransaction, Transaction, TransactionKind, TransactionStatus};
use storefront_db::models::purchase::{IntentStatus, PurchaseIntent};
use storefront_db::models::reseller::Commission;
use storefront_db::repositories::account_repo::AccountRepository;
use storefront_db::repositories::catalog_repo::CatalogRepository;
use storefront_db::repositories::intent_repo::{NewIntent, PurchaseIntentRepository};
use storefront_db::repositories::transaction_repo::TransactionRepository;
use tracing::{info, warn};

use super::approval_service::ApprovalService;
use super::commission_service::CommissionService;
use super::effects::PostCommit;
use super::fraud_service::FraudService;
use super::wallet_service::WalletService;
use crate::alias::{AccountAliases, normalize_base, resolve_alias};
use crate::capabilities::{Capabilities, ProvisionRequest};
use crate::config::LedgerConfig;
use crate::error::{LedgerError, Result};
use crate::fraud::receipt_fingerprint;

#[derive(Debug, Clone)]
pub struct CreateIntent {
    pub account_id: i64,
    pub plan_id: i64,
    pub server_id: i64,
    /// Preferred display name; the plan title is used when absent.
    pub alias: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PurchaseOutcome {
    pub intent: PurchaseIntent,
    pub commissions: Vec<Commission>,
    pub provisioning_error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReceiptOutcome {
    pub intent: PurchaseIntent,
    pub transaction: Transaction,
    pub detections: Vec<FraudDetection>,
    pub auto_approved: bool,
}

/// What a settlement booked inside the approving unit of work.
#[derive(Debug, Default)]
pub struct Settlement {
    pub intent: Option<PurchaseIntent>,
    pub commissions: Vec<Commission>,
    pub referral_bonus: Option<(i64, Decimal)>,
    pub effects: PostCommit,
}

pub struct PurchaseService {
    pool: PgPool,
    config: Arc<LedgerConfig>,
    caps: Capabilities,
    fraud: Arc<FraudService>,
    approval: Arc<ApprovalService>,
}

impl PurchaseService {
    pub fn new(
        pool: PgPool,
        config: Arc<LedgerConfig>,
        caps: Capabilities,
        fraud: Arc<FraudService>,
        approval: Arc<ApprovalService>,
    ) -> Self {
        Self {
            pool,
            config,
            caps,
            fraud,
            approval,
        }
    }

    /// Charges the wallet for what it can cover. A fully covered purchase is
    /// paid at once; otherwise the intent waits for a receipt.
    pub async fn create(&self, request: CreateIntent) -> Result<PurchaseOutcome> {
        let account_id = request.account_id;
        let mut tx = self.pool.begin().await?;

        let account = WalletService::lock_buyer(&mut tx, account_id).await?;
        if account.is_blocked {
            return Err(LedgerError::FraudBlocked { account_id });
        }

        let plan = CatalogRepository::get_plan(&mut tx, request.plan_id)
            .await?
            .filter(|p| p.is_active)
            .ok_or_else(|| LedgerError::not_found("plan", request.plan_id))?;
        let server = CatalogRepository::get_server(&mut tx, request.server_id)
            .await?
            .filter(|s| s.is_active)
            .ok_or_else(|| LedgerError::not_found("server", request.server_id))?;

        let split = WalletService::split_charge(&mut tx, account_id, plan.price).await?;

        let wallet_transaction = if split.paid_from_wallet > Decimal::ZERO {
            let note = format!("Wallet payment for {}", plan.title);
            let record = NewTransaction::new(account_id, split.paid_from_wallet, &self.config.currency, TransactionKind::Purchase)
                .approved()
                .describe(&note);
            AccountRepository::add_total_spent(&mut tx, account_id, split.paid_from_wallet).await?;
            Some(TransactionRepository::insert(&mut tx, &record).await?)
        } else {
            None
        };

        let base = normalize_base(request.alias.as_deref().unwrap_or(&plan.title));
        let mut rng = StdRng::from_rng(&mut rand::rng());
        let alias = {
            let mut space = AccountAliases {
                conn: &mut *tx,
                account_id,
            };
            resolve_alias(&mut space, &base, &mut rng).await?
        };

        let status = if split.is_settled() {
            IntentStatus::Paid
        } else {
            IntentStatus::Pending
        };
        let new = NewIntent {
            account_id,
            plan_id: plan.id,
            server_id: server.id,
            total_amount: plan.price,
            paid_from_wallet: split.paid_from_wallet,
            due_from_receipt: split.due,
            status,
            wallet_transaction_id: wallet_transaction.as_ref().map(|t| t.id),
            alias: &alias,
        };
        let intent = match PurchaseIntentRepository::insert(&mut tx, &new).await {
            Ok(intent) => intent,
            Err(e) if is_unique_violation(&e) => {
                return Err(LedgerError::AliasCollision { account_id, base });
            }
            Err(e) => return Err(e.into()),
        };

        let mut effects = PostCommit::default();
        let mut commissions = Vec::new();
        match (&intent.status, &wallet_transaction) {
            (IntentStatus::Paid, Some(wallet_tx)) => {
                let (booked, _) = book_sale(&mut tx, &self.config, &intent, wallet_tx.id).await?;
                commissions = booked;
                effects.provision.push(intent.id);
            }
            _ => {
                effects.notify_account(
                    account_id,
                    format!(
                        "{} {} paid from wallet. Send a receipt for the remaining {} {}.",
                        split.paid_from_wallet, self.config.currency, split.due, self.config.currency
                    ),
                );
            }
        }

        tx.commit().await?;
        info!(
            "Purchase intent {} for account {}: plan {}, wallet {}, due {}, alias {}",
            intent.id, account_id, plan.id, split.paid_from_wallet, split.due, intent.alias
        );

        let dispatched = effects.dispatch(&self.pool, &self.caps).await;
        let provisioning_error = dispatched.failures.first().map(|e| e.to_string());
        let intent = dispatched.provisioned.into_iter().next().unwrap_or(intent);

        Ok(PurchaseOutcome {
            intent,
            commissions,
            provisioning_error,
        })
    }

    /// Opens a pending purchase transaction for the amount still due.
    pub async fn attach_receipt(&self, intent_id: i64, receipt_ref: &str) -> Result<ReceiptOutcome> {
        let fingerprint = receipt_fingerprint(receipt_ref);
        let mut tx = self.pool.begin().await?;

        let snapshot = PurchaseIntentRepository::get(&mut tx, intent_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("purchase intent", intent_id))?;
        let account = WalletService::lock_account(&mut tx, snapshot.account_id).await?;
        let mut intent = PurchaseIntentRepository::lock(&mut tx, intent_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("purchase intent", intent_id))?;

        if intent.status != IntentStatus::Pending {
            return Err(LedgerError::InvalidTransition(format!(
                "intent {} is {}",
                intent_id,
                intent.status.as_str()
            )));
        }
        if intent.receipt_transaction_id.is_some() {
            return Err(LedgerError::InvalidTransition(format!(
                "intent {} already has a receipt",
                intent_id
            )));
        }
        if account.is_blocked {
            return Err(LedgerError::FraudBlocked { account_id: account.id });
        }

        let note = format!("Receipt for purchase intent {}", intent_id);
        let mut record = NewTransaction::new(account.id, intent.due_from_receipt, &self.config.currency, TransactionKind::Purchase)
            .describe(&note)
            .receipt(receipt_ref, &fingerprint);
        if let Some(wallet_tx) = intent.wallet_transaction_id {
            record = record.related_to(wallet_tx);
        }
        let mut transaction = TransactionRepository::insert(&mut tx, &record).await?;
        PurchaseIntentRepository::attach_receipt(&mut tx, intent_id, transaction.id).await?;
        intent.receipt_transaction_id = Some(transaction.id);

        let fraud = self.fraud.evaluate_in(&mut tx, &transaction).await?;
        transaction.fraud_score = fraud.score;

        let mut effects = fraud.effects;
        effects.notify_admins(format!(
            "Receipt #{} for intent {} ({} {}) awaits review (fraud score {:.2})",
            transaction.id, intent_id, transaction.amount, self.config.currency, fraud.score
        ));
        tx.commit().await?;
        info!("Receipt transaction {} attached to intent {}", transaction.id, intent_id);
        effects.dispatch(&self.pool, &self.caps).await;

        let auto_approved = match self.approval.try_auto_approve(&transaction, fraud.score, fraud.blocked).await? {
            Some(outcome) => {
                transaction = outcome.transaction;
                if let Some(settled) = outcome.intent {
                    intent = settled;
                }
                true
            }
            None => false,
        };

        Ok(ReceiptOutcome {
            intent,
            transaction,
            detections: fraud.detections,
            auto_approved,
        })
    }

    /// Marks a locked intent paid once its receipt is approved, and books
    /// the sale. Provisioning is queued for after commit.
    pub async fn settle_in(
        conn: &mut PgConnection,
        config: &LedgerConfig,
        intent: &PurchaseIntent,
        receipt_transaction_id: i64,
    ) -> Result<Settlement> {
        let paid = PurchaseIntentRepository::mark_paid(conn, intent.id)
            .await?
            .ok_or_else(|| {
                LedgerError::InvalidTransition(format!(
                    "intent {} is {}, cannot settle",
                    intent.id,
                    intent.status.as_str()
                ))
            })?;
        AccountRepository::add_total_spent(conn, paid.account_id, paid.due_from_receipt).await?;

        let (commissions, referral_bonus) = book_sale(conn, config, &paid, receipt_transaction_id).await?;

        let mut effects = PostCommit::default();
        effects.provision.push(paid.id);
        if let Some((referrer_id, bonus)) = referral_bonus {
            effects.notify_account(referrer_id, format!("You received a referral bonus of {}", bonus));
        }
        info!("Purchase intent {} settled by transaction {}", paid.id, receipt_transaction_id);

        Ok(Settlement {
            intent: Some(paid),
            commissions,
            referral_bonus,
            effects,
        })
    }

    /// Cancels a locked intent after its receipt was rejected. The wallet
    /// portion already taken is not returned.
    pub async fn cancel_in(conn: &mut PgConnection, intent: &PurchaseIntent) -> Result<PurchaseIntent> {
        let cancelled = PurchaseIntentRepository::mark_cancelled(conn, intent.id)
            .await?
            .ok_or_else(|| {
                LedgerError::InvalidTransition(format!(
                    "intent {} is {}, cannot cancel",
                    intent.id,
                    intent.status.as_str()
                ))
            })?;
        if cancelled.paid_from_wallet > Decimal::ZERO {
            info!(
                "Intent {} cancelled; wallet portion {} forfeited",
                cancelled.id, cancelled.paid_from_wallet
            );
        }
        Ok(cancelled)
    }

    /// Cancels a pending intent and rejects its open receipt, if any.
    pub async fn cancel(&self, intent_id: i64) -> Result<PurchaseIntent> {
        let mut tx = self.pool.begin().await?;
        let snapshot = PurchaseIntentRepository::get(&mut tx, intent_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("purchase intent", intent_id))?;
        WalletService::lock_account(&mut tx, snapshot.account_id).await?;
        let intent = PurchaseIntentRepository::lock(&mut tx, intent_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("purchase intent", intent_id))?;

        if let Some(receipt_id) = intent.receipt_transaction_id {
            TransactionRepository::finalize(&mut tx, receipt_id, TransactionStatus::Rejected, None, Some("intent cancelled"))
                .await?;
        }
        let cancelled = Self::cancel_in(&mut tx, &intent).await?;
        tx.commit().await?;

        info!("Purchase intent {} cancelled", intent_id);
        Ok(cancelled)
    }

    /// Cancels intents left pending longer than `ttl` and refunds what the
    /// wallet paid towards them.
    pub async fn expire_stale(&self, ttl: Duration) -> Result<Vec<PurchaseIntent>> {
        let cutoff = Utc::now() - ttl;
        let stale = {
            let mut conn = self.pool.acquire().await?;
            PurchaseIntentRepository::stale_pending(&mut conn, cutoff).await?
        };

        let mut expired = Vec::new();
        for intent_id in stale {
            match self.expire_one(intent_id).await {
                Ok(Some(intent)) => expired.push(intent),
                Ok(None) => {}
                Err(e) => warn!("Failed to expire intent {}: {}", intent_id, e),
            }
        }
        if !expired.is_empty() {
            info!("Expired {} stale purchase intents", expired.len());
        }
        Ok(expired)
    }

    async fn expire_one(&self, intent_id: i64) -> Result<Option<PurchaseIntent>> {
        let mut tx = self.pool.begin().await?;
        let Some(snapshot) = PurchaseIntentRepository::get(&mut tx, intent_id).await? else {
            return Ok(None);
        };
        WalletService::lock_account(&mut tx, snapshot.account_id).await?;
        let Some(intent) = PurchaseIntentRepository::lock(&mut tx, intent_id).await? else {
            return Ok(None);
        };
        if intent.status != IntentStatus::Pending {
            return Ok(None);
        }

        if let Some(receipt_id) = intent.receipt_transaction_id {
            TransactionRepository::finalize(&mut tx, receipt_id, TransactionStatus::Rejected, None, Some("intent expired"))
                .await?;
        }
        let cancelled = PurchaseIntentRepository::mark_cancelled(&mut tx, intent_id)
            .await?
            .ok_or_else(|| LedgerError::InvalidTransition(format!("intent {} changed while expiring", intent_id)))?;

        let mut effects = PostCommit::default();
        if cancelled.paid_from_wallet > Decimal::ZERO {
            WalletService::credit(&mut tx, cancelled.account_id, cancelled.paid_from_wallet).await?;
            AccountRepository::add_total_spent(&mut tx, cancelled.account_id, -cancelled.paid_from_wallet).await?;
            let note = format!("Refund for expired purchase intent {}", intent_id);
            let mut refund = NewTransaction::new(
                cancelled.account_id,
                cancelled.paid_from_wallet,
                &self.config.currency,
                TransactionKind::Refund,
            )
            .approved()
            .describe(&note);
            if let Some(wallet_tx) = cancelled.wallet_transaction_id {
                refund = refund.related_to(wallet_tx);
            }
            TransactionRepository::insert(&mut tx, &refund).await?;
            effects.notify_account(
                cancelled.account_id,
                format!(
                    "Your unpaid order '{}' expired; {} {} returned to your wallet.",
                    cancelled.alias, cancelled.paid_from_wallet, self.config.currency
                ),
            );
        } else {
            effects.notify_account(cancelled.account_id, format!("Your unpaid order '{}' expired.", cancelled.alias));
        }

        tx.commit().await?;
        effects.dispatch(&self.pool, &self.caps).await;
        Ok(Some(cancelled))
    }

    /// Re-runs provisioning for a paid intent that has no service yet.
    pub async fn retry_provisioning(&self, intent_id: i64) -> Result<PurchaseIntent> {
        let intent = provision_intent(&self.pool, &self.caps, intent_id).await?;
        if let Some(url) = &intent.subscription_url {
            let mut effects = PostCommit::default();
            effects.notify_account(intent.account_id, format!("Your service '{}' is ready: {}", intent.alias, url));
            effects.dispatch(&self.pool, &self.caps).await;
        }
        Ok(intent)
    }

    /// Retries every paid intent still waiting for a service.
    pub async fn retry_all_pending(&self, limit: i64) -> Result<usize> {
        let ids = {
            let mut conn = self.pool.acquire().await?;
            PurchaseIntentRepository::service_pending(&mut conn, limit).await?
        };
        let mut recovered = 0;
        for intent_id in ids {
            match self.retry_provisioning(intent_id).await {
                Ok(_) => recovered += 1,
                Err(e) => warn!("Provisioning retry for intent {} failed: {}", intent_id, e),
            }
        }
        Ok(recovered)
    }

    pub async fn get(&self, intent_id: i64) -> Result<PurchaseIntent> {
        let mut conn = self.pool.acquire().await?;
        PurchaseIntentRepository::get(&mut conn, intent_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("purchase intent", intent_id))
    }
}

/// Commission fan-out and referral bonus for a sale that just became paid.
/// Both are based on the full price, wallet portion included.
async fn book_sale(
    conn: &mut PgConnection,
    config: &LedgerConfig,
    intent: &PurchaseIntent,
    source_transaction_id: i64,
) -> Result<(Vec<Commission>, Option<(i64, Decimal)>)> {
    let customer = AccountRepository::get(conn, intent.account_id)
        .await?
        .ok_or_else(|| LedgerError::not_found("account", intent.account_id))?;
    let commissions =
        CommissionService::distribute(conn, source_transaction_id, intent.account_id, intent.total_amount).await?;
    let bonus =
        CommissionService::apply_referral_bonus(conn, config, &customer, intent.total_amount, source_transaction_id)
            .await?;
    Ok((commissions, bonus))
}

/// Calls the provisioner for a paid intent and stores the result. Idempotent
/// once a service is recorded.
pub(crate) async fn provision_intent(pool: &PgPool, caps: &Capabilities, intent_id: i64) -> Result<PurchaseIntent> {
    let request = {
        let mut conn = pool.acquire().await?;
        let intent = PurchaseIntentRepository::get(&mut conn, intent_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("purchase intent", intent_id))?;
        if intent.status != IntentStatus::Paid {
            return Err(LedgerError::InvalidTransition(format!(
                "intent {} is {}, nothing to provision",
                intent_id,
                intent.status.as_str()
            )));
        }
        if intent.service_ref.is_some() {
            return Ok(intent);
        }
        let plan = CatalogRepository::get_plan(&mut conn, intent.plan_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("plan", intent.plan_id))?;
        let server = CatalogRepository::get_server(&mut conn, intent.server_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("server", intent.server_id))?;
        ProvisionRequest {
            intent_id,
            account_id: intent.account_id,
            plan_id: plan.id,
            plan_title: plan.title,
            duration_days: plan.duration_days,
            traffic_gb: plan.traffic_gb,
            server_id: server.id,
            server_host: server.host,
            alias: intent.alias,
        }
    };

    let service = caps
        .provisioner
        .provision(&request)
        .await
        .map_err(|e| LedgerError::ProvisioningFailed {
            intent_id,
            reason: e.to_string(),
        })?;

    let mut conn = pool.acquire().await?;
    let stored = PurchaseIntentRepository::set_service(&mut conn, intent_id, &service.service_ref, &service.subscription_url)
        .await?;
    if !stored {
        warn!("Intent {} was provisioned concurrently, releasing {}", intent_id, service.service_ref);
        if let Err(e) = caps.provisioner.deactivate(&service.service_ref).await {
            warn!("Failed to release duplicate service {}: {}", service.service_ref, e);
        }
    }
    info!("Provisioned intent {} via {}", intent_id, caps.provisioner.name());

    PurchaseIntentRepository::get(&mut conn, intent_id)
        .await?
        .ok_or_else(|| LedgerError::not_found("purchase intent", intent_id))
}
