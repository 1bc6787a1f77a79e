use rust_decimal::Decimal;
use serde::Serialize;
use sqlx::{PgConnection, PgPool};
use std::sync::Arc;
use storefront_db::models::account::Account;
use storefront_db::models::fraud::FraudDetection;
use storefront_db::models::ledger::{NewTransaction, Transaction, TransactionKind};
use storefront_db::repositories::account_repo::AccountRepository;
use storefront_db::repositories::transaction_repo::TransactionRepository;
use tracing::info;

use super::approval_service::ApprovalService;
use super::fraud_service::FraudService;
use crate::capabilities::Capabilities;
use crate::config::LedgerConfig;
use crate::error::{LedgerError, Result};
use crate::fraud::receipt_fingerprint;
use crate::money::{SplitCharge, apply_credit, apply_debit, ensure_positive};

/// Ascending, deduplicated. Every unit of work that holds more than one
/// account row takes them in this order before touching intents,
/// transactions or reseller rows.
pub fn lock_order(ids: &[i64]) -> Vec<i64> {
    let mut ordered = ids.to_vec();
    ordered.sort_unstable();
    ordered.dedup();
    ordered
}

#[derive(Debug, Clone, Serialize)]
pub struct TopUpOutcome {
    pub transaction: Transaction,
    pub detections: Vec<FraudDetection>,
    pub auto_approved: bool,
}

/// Every balance mutation goes through here, under the account row lock.
pub struct WalletService {
    pool: PgPool,
    config: Arc<LedgerConfig>,
    caps: Capabilities,
    fraud: Arc<FraudService>,
    approval: Arc<ApprovalService>,
}

impl WalletService {
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

    pub(crate) async fn lock_account(conn: &mut PgConnection, account_id: i64) -> Result<Account> {
        AccountRepository::lock(conn, account_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("account", account_id))
    }

    pub(crate) async fn lock_accounts(conn: &mut PgConnection, ids: &[i64]) -> Result<Vec<Account>> {
        let mut locked = Vec::with_capacity(ids.len());
        for id in lock_order(ids) {
            locked.push(Self::lock_account(conn, id).await?);
        }
        Ok(locked)
    }

    /// Locks a buyer together with the account that referred it, since a
    /// settled sale may credit the referrer a bonus.
    pub(crate) async fn lock_buyer(conn: &mut PgConnection, account_id: i64) -> Result<Account> {
        let buyer = AccountRepository::get(conn, account_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("account", account_id))?;
        let mut ids = vec![account_id];
        ids.extend(buyer.referrer_id);
        Self::lock_accounts(conn, &ids)
            .await?
            .into_iter()
            .find(|a| a.id == account_id)
            .ok_or_else(|| LedgerError::not_found("account", account_id))
    }

    /// Fails with `InsufficientFunds` instead of going negative.
    pub async fn debit(conn: &mut PgConnection, account_id: i64, amount: Decimal) -> Result<Decimal> {
        let account = Self::lock_account(conn, account_id).await?;
        let balance = apply_debit(account_id, account.balance, amount)?;
        AccountRepository::set_balance(conn, account_id, balance).await?;
        info!("Debited {} from account {} (balance {})", amount, account_id, balance);
        Ok(balance)
    }

    pub async fn credit(conn: &mut PgConnection, account_id: i64, amount: Decimal) -> Result<Decimal> {
        let account = Self::lock_account(conn, account_id).await?;
        let balance = apply_credit(account.balance, amount)?;
        AccountRepository::set_balance(conn, account_id, balance).await?;
        info!("Credited {} to account {} (balance {})", amount, account_id, balance);
        Ok(balance)
    }

    /// Takes what the wallet can cover right away; the rest is left due.
    pub async fn split_charge(conn: &mut PgConnection, account_id: i64, price: Decimal) -> Result<SplitCharge> {
        ensure_positive(price)?;
        let account = Self::lock_account(conn, account_id).await?;
        let split = SplitCharge::compute(account.balance, price);
        if !split.paid_from_wallet.is_zero() {
            let balance = account.balance - split.paid_from_wallet;
            AccountRepository::set_balance(conn, account_id, balance).await?;
            info!(
                "Split charge on account {}: {} from wallet, {} due",
                account_id, split.paid_from_wallet, split.due
            );
        }
        Ok(split)
    }

    pub async fn open_account(
        &self,
        tg_id: i64,
        username: Option<&str>,
        referrer_id: Option<i64>,
    ) -> Result<Account> {
        let mut conn = self.pool.acquire().await?;
        Ok(AccountRepository::create(&mut conn, tg_id, username, referrer_id).await?)
    }

    pub async fn account(&self, account_id: i64) -> Result<Account> {
        let mut conn = self.pool.acquire().await?;
        AccountRepository::get(&mut conn, account_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("account", account_id))
    }

    pub async fn request_topup(&self, account_id: i64, amount: Decimal, receipt_ref: &str) -> Result<TopUpOutcome> {
        ensure_positive(amount)?;
        if amount < self.config.min_topup || amount > self.config.max_topup {
            return Err(LedgerError::InvalidAmount(format!(
                "top-up must be between {} and {}",
                self.config.min_topup, self.config.max_topup
            )));
        }

        let fingerprint = receipt_fingerprint(receipt_ref);
        let mut tx = self.pool.begin().await?;

        let account = Self::lock_account(&mut tx, account_id).await?;
        if account.is_blocked {
            return Err(LedgerError::FraudBlocked { account_id });
        }

        let new = NewTransaction::new(account_id, amount, &self.config.currency, TransactionKind::TopUp)
            .describe("Wallet top-up")
            .receipt(receipt_ref, &fingerprint);
        let mut transaction = TransactionRepository::insert(&mut tx, &new).await?;

        let fraud = self.fraud.evaluate_in(&mut tx, &transaction).await?;
        transaction.fraud_score = fraud.score;

        let mut effects = fraud.effects;
        effects.notify_admins(format!(
            "Top-up #{} of {} {} awaits review (fraud score {:.2})",
            transaction.id, amount, self.config.currency, fraud.score
        ));

        tx.commit().await?;
        info!("Top-up {} requested by account {} for {}", transaction.id, account_id, amount);
        effects.dispatch(&self.pool, &self.caps).await;

        let auto_approved = match self.approval.try_auto_approve(&transaction, fraud.score, fraud.blocked).await? {
            Some(outcome) => {
                transaction = outcome.transaction;
                true
            }
            None => false,
        };

        Ok(TopUpOutcome {
            transaction,
            detections: fraud.detections,
            auto_approved,
        })
    }

    /// Moves funds between two wallets in one unit of work.
    pub async fn transfer(&self, from: i64, to: i64, amount: Decimal) -> Result<(Transaction, Transaction)> {
        ensure_positive(amount)?;
        if from == to {
            return Err(LedgerError::InvalidTransition("cannot transfer to the same account".into()));
        }

        let mut tx = self.pool.begin().await?;

        let locked = Self::lock_accounts(&mut tx, &[from, to]).await?;
        let sender = locked
            .iter()
            .find(|a| a.id == from)
            .ok_or_else(|| LedgerError::not_found("account", from))?;
        if sender.is_blocked {
            return Err(LedgerError::FraudBlocked { account_id: from });
        }

        Self::debit(&mut tx, from, amount).await?;
        Self::credit(&mut tx, to, amount).await?;

        let outgoing_note = format!("Transfer to account {}", to);
        let outgoing = NewTransaction::new(from, amount, &self.config.currency, TransactionKind::Transfer)
            .approved()
            .describe(&outgoing_note);
        let outgoing = TransactionRepository::insert(&mut tx, &outgoing).await?;

        let incoming_note = format!("Transfer from account {}", from);
        let incoming = NewTransaction::new(to, amount, &self.config.currency, TransactionKind::Transfer)
            .approved()
            .describe(&incoming_note)
            .related_to(outgoing.id);
        let incoming = TransactionRepository::insert(&mut tx, &incoming).await?;

        tx.commit().await?;
        info!("Transferred {} from account {} to {}", amount, from, to);
        Ok((outgoing, incoming))
    }
}
