use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{PgConnection, PgPool};
use std::collections::HashSet;
use std::sync::Arc;
use storefront_db::models::account::Account;
use storefront_db::models::ledger::{NewTransaction, TransactionKind};
use storefront_db::models::reseller::{Commission, LevelRule, PayoutMethod, Reseller, ResellerPayment};
use storefront_db::repositories::account_repo::AccountRepository;
use storefront_db::repositories::commission_repo::{CommissionRepository, NewCommission, NewPayment};
use storefront_db::repositories::reseller_repo::ResellerRepository;
use storefront_db::repositories::transaction_repo::TransactionRepository;
use tracing::{debug, info, warn};

use super::effects::PostCommit;
use super::wallet_service::WalletService;
use crate::capabilities::Capabilities;
use crate::config::LedgerConfig;
use crate::error::{LedgerError, Result};

/// How far up the reseller tree a sale pays out.
pub const MAX_DEPTH: usize = 3;

/// Fixed decay per hierarchy level: full rate, then half, then a quarter.
pub fn level_multiplier(level: usize) -> Option<Decimal> {
    match level {
        1 => Some(Decimal::ONE),
        2 => Some(Decimal::new(5, 1)),
        3 => Some(Decimal::new(25, 2)),
        _ => None,
    }
}

pub fn commission_for_level(sale_amount: Decimal, rate_percent: Decimal, level: usize) -> Option<Decimal> {
    let multiplier = level_multiplier(level)?;
    Some((sale_amount * rate_percent / Decimal::ONE_HUNDRED * multiplier).round_dp(2))
}

pub fn referral_bonus(price: Decimal, percent: Decimal, fixed: Decimal) -> Decimal {
    (price * percent / Decimal::ONE_HUNDRED + fixed).round_dp(2)
}

pub fn meets_level_rule(reseller: &Reseller, rule: &LevelRule, now: DateTime<Utc>) -> bool {
    reseller.total_sales >= rule.min_sales
        && reseller.total_customers >= rule.min_customers
        && reseller.total_sub_resellers >= rule.min_sub_resellers
        && reseller.months_active(now) >= rule.min_months_active
}

/// Span covered by a payout batch: oldest to newest commission.
pub fn payout_period(commissions: &[Commission], now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
    let start = commissions.iter().map(|c| c.created_at).min().unwrap_or(now);
    let end = commissions.iter().map(|c| c.created_at).max().unwrap_or(now);
    (start, end)
}

pub struct CommissionService {
    pool: PgPool,
    config: Arc<LedgerConfig>,
    caps: Capabilities,
}

impl CommissionService {
    pub fn new(pool: PgPool, config: Arc<LedgerConfig>, caps: Capabilities) -> Self {
        Self { pool, config, caps }
    }

    /// Credits up to three levels of the buyer's reseller chain for a settled
    /// sale. Must run in the unit of work that approved `transaction_id`.
    /// Nothing is paid when the referring reseller is not active; inactive
    /// ancestors above it are walked past but not paid.
    pub async fn distribute(
        conn: &mut PgConnection,
        transaction_id: i64,
        customer_account_id: i64,
        sale_amount: Decimal,
    ) -> Result<Vec<Commission>> {
        let customer = AccountRepository::get(conn, customer_account_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("account", customer_account_id))?;
        let Some(referrer_account) = customer.referrer_id else {
            return Ok(Vec::new());
        };
        let Some(first) = ResellerRepository::by_account(conn, referrer_account).await? else {
            return Ok(Vec::new());
        };

        let mut credited = Vec::new();
        let mut visited = HashSet::new();
        let mut next = Some(first.id);

        for level in 1..=MAX_DEPTH {
            let Some(reseller_id) = next else { break };
            if !visited.insert(reseller_id) {
                warn!("Reseller hierarchy loops at {}, stopping commission walk", reseller_id);
                break;
            }
            let Some(reseller) = ResellerRepository::lock(conn, reseller_id).await? else {
                break;
            };
            next = reseller.parent_id;

            if level == 1 && !reseller.is_active() {
                debug!(
                    "Referring reseller {} is {}, no commission for transaction {}",
                    reseller.id,
                    reseller.status.as_str(),
                    transaction_id
                );
                return Ok(Vec::new());
            }
            if !reseller.is_active() {
                debug!("Skipping level {} reseller {}: {}", level, reseller.id, reseller.status.as_str());
                continue;
            }

            let Some(amount) = commission_for_level(sale_amount, reseller.commission_rate, level) else {
                break;
            };
            if amount <= Decimal::ZERO {
                continue;
            }

            let new_customer = level == 1
                && !CommissionRepository::has_served_customer(conn, reseller.id, customer_account_id).await?;

            let new = NewCommission {
                reseller_id: reseller.id,
                transaction_id,
                customer_account_id,
                level: level as i16,
                commission_rate: reseller.commission_rate,
                base_amount: sale_amount,
                commission_amount: amount,
            };
            let Some(commission) = CommissionRepository::insert(conn, &new).await? else {
                debug!("Reseller {} already credited for transaction {}", reseller.id, transaction_id);
                continue;
            };

            ResellerRepository::record_commission(conn, reseller.id, sale_amount, amount, new_customer).await?;
            info!(
                "Commission {} at level {} for reseller {} on transaction {}",
                amount, level, reseller.id, transaction_id
            );
            credited.push(commission);
        }

        Ok(credited)
    }

    /// Flat bonus to whoever referred the buyer, booked as a gift.
    /// The caller must already hold the referrer's account lock.
    pub async fn apply_referral_bonus(
        conn: &mut PgConnection,
        config: &LedgerConfig,
        customer: &Account,
        price: Decimal,
        source_transaction_id: i64,
    ) -> Result<Option<(i64, Decimal)>> {
        let Some(referrer_id) = customer.referrer_id else {
            return Ok(None);
        };
        let bonus = referral_bonus(price, config.referral_percent, config.referral_fixed);
        if bonus <= Decimal::ZERO {
            return Ok(None);
        }

        WalletService::credit(conn, referrer_id, bonus).await?;
        let note = format!("Referral bonus for account {}", customer.id);
        let gift = NewTransaction::new(referrer_id, bonus, &config.currency, TransactionKind::Gift)
            .approved()
            .describe(&note)
            .related_to(source_transaction_id);
        TransactionRepository::insert(conn, &gift).await?;

        info!("Applied referral bonus of {} to account {} (from account {})", bonus, referrer_id, customer.id);
        Ok(Some((referrer_id, bonus)))
    }

    /// Pays every unpaid commission of a reseller in one batch.
    pub async fn payout(&self, reseller_id: i64, actor_id: i64, method: PayoutMethod) -> Result<ResellerPayment> {
        if !self.caps.authorizer.can_review(actor_id) {
            return Err(LedgerError::Unauthorized { actor_id });
        }

        let mut tx = self.pool.begin().await?;
        let account_id = ResellerRepository::get(&mut tx, reseller_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("reseller", reseller_id))?
            .account_id;
        // Accounts before reseller rows, same as settlement.
        WalletService::lock_account(&mut tx, account_id).await?;
        let reseller = ResellerRepository::lock(&mut tx, reseller_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("reseller", reseller_id))?;
        if reseller.pending_commission <= Decimal::ZERO {
            return Err(LedgerError::NoPendingCommission { reseller_id });
        }

        let commissions = CommissionRepository::lock_unpaid(&mut tx, reseller_id).await?;
        let commission_ids: Vec<i64> = commissions.iter().map(|c| c.id).collect();
        let batch_total: Decimal = commissions.iter().map(|c| c.commission_amount).sum();
        if batch_total != reseller.pending_commission {
            warn!(
                "Reseller {} pending commission {} differs from unpaid rows {}",
                reseller_id, reseller.pending_commission, batch_total
            );
        }
        let amount = reseller.pending_commission;
        let (period_start, period_end) = payout_period(&commissions, Utc::now());

        let transaction_id = match method {
            PayoutMethod::Wallet => {
                WalletService::credit(&mut tx, reseller.account_id, amount).await?;
                let note = format!("Commission payout for reseller {}", reseller_id);
                let record = NewTransaction::new(reseller.account_id, amount, &self.config.currency, TransactionKind::Transfer)
                    .approved()
                    .describe(&note);
                Some(TransactionRepository::insert(&mut tx, &record).await?.id)
            }
            PayoutMethod::BankTransfer => None,
        };

        let payment = CommissionRepository::insert_payment(
            &mut tx,
            &NewPayment {
                reseller_id,
                amount,
                method,
                commission_ids: commission_ids.clone(),
                period_start,
                period_end,
                processed_by: actor_id,
                transaction_id,
            },
        )
        .await?;
        CommissionRepository::mark_paid(&mut tx, &commission_ids).await?;
        ResellerRepository::record_payout(&mut tx, reseller_id, amount).await?;
        tx.commit().await?;

        info!("Paid out {} to reseller {} ({} commissions)", amount, reseller_id, commission_ids.len());
        let mut effects = PostCommit::default();
        effects.notify_account(reseller.account_id, format!("Commission payout of {} processed", amount));
        effects.dispatch(&self.pool, &self.caps).await;

        Ok(payment)
    }

    /// Moves the reseller up one level when it meets the next level's rule.
    pub async fn check_promotion(&self, reseller_id: i64) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let reseller = ResellerRepository::lock(&mut tx, reseller_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("reseller", reseller_id))?;
        if !reseller.is_active() {
            return Ok(false);
        }
        let Some(next_level) = reseller.level.next() else {
            return Ok(false);
        };
        let Some(rule) = ResellerRepository::level_rule(&mut tx, next_level).await? else {
            return Ok(false);
        };
        if !meets_level_rule(&reseller, &rule, Utc::now()) {
            return Ok(false);
        }

        ResellerRepository::apply_level(&mut tx, reseller_id, &rule).await?;
        tx.commit().await?;

        info!(
            "Reseller {} promoted {} -> {} (rate {}%)",
            reseller_id,
            reseller.level.as_str(),
            next_level.as_str(),
            rule.commission_rate
        );
        let mut effects = PostCommit::default();
        effects.notify_account(
            reseller.account_id,
            format!("Promoted to {} with {}% commission", next_level.as_str(), rule.commission_rate),
        );
        effects.dispatch(&self.pool, &self.caps).await;
        Ok(true)
    }

    pub async fn commissions_for_transaction(&self, transaction_id: i64) -> Result<Vec<Commission>> {
        let mut conn = self.pool.acquire().await?;
        Ok(CommissionRepository::for_transaction(&mut conn, transaction_id).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;
    use storefront_db::models::reseller::{CommissionStatus, ResellerLevel, ResellerStatus};

    #[test]
    fn three_level_decay() {
        let sale = dec!(1000000);
        let rate = dec!(10);
        assert_eq!(commission_for_level(sale, rate, 1), Some(dec!(100000)));
        assert_eq!(commission_for_level(sale, rate, 2), Some(dec!(50000)));
        assert_eq!(commission_for_level(sale, rate, 3), Some(dec!(25000)));
        assert_eq!(commission_for_level(sale, rate, 4), None);
    }

    #[test]
    fn commission_rounds_to_cents() {
        assert_eq!(commission_for_level(dec!(333.33), dec!(12.5), 3), Some(dec!(10.42)));
    }

    #[test]
    fn referral_bonus_combines_percent_and_fixed() {
        assert_eq!(referral_bonus(dec!(120000), dec!(10), dec!(5000)), dec!(17000));
        assert_eq!(referral_bonus(dec!(120000), Decimal::ZERO, Decimal::ZERO), Decimal::ZERO);
    }

    fn reseller(sales: Decimal, customers: i32, subs: i32, approved_days_ago: i64) -> Reseller {
        let now = Utc::now();
        Reseller {
            id: 1,
            account_id: 1,
            parent_id: None,
            level: ResellerLevel::Bronze,
            status: ResellerStatus::Active,
            commission_rate: dec!(10),
            total_sales: sales,
            total_commission_earned: Decimal::ZERO,
            pending_commission: Decimal::ZERO,
            total_paid: Decimal::ZERO,
            total_customers: customers,
            total_sub_resellers: subs,
            max_sub_resellers: 5,
            can_create_sub_resellers: true,
            approved_at: Some(now - Duration::days(approved_days_ago)),
            level_updated_at: None,
            created_at: now,
        }
    }

    fn silver() -> LevelRule {
        LevelRule {
            level: ResellerLevel::Silver,
            min_sales: dec!(50000000),
            min_customers: 20,
            min_sub_resellers: 0,
            min_months_active: 1,
            commission_rate: dec!(12),
            max_sub_resellers: 10,
            is_active: true,
        }
    }

    #[test]
    fn promotion_needs_every_threshold() {
        let now = Utc::now();
        assert!(meets_level_rule(&reseller(dec!(50000000), 20, 0, 31), &silver(), now));
        assert!(!meets_level_rule(&reseller(dec!(49999999), 20, 0, 31), &silver(), now));
        assert!(!meets_level_rule(&reseller(dec!(50000000), 19, 0, 31), &silver(), now));
        assert!(!meets_level_rule(&reseller(dec!(50000000), 20, 0, 10), &silver(), now));
    }

    fn commission(id: i64, created_at: DateTime<Utc>) -> Commission {
        Commission {
            id,
            reseller_id: 1,
            transaction_id: id,
            customer_account_id: 2,
            level: 1,
            commission_rate: dec!(10),
            base_amount: dec!(100000),
            commission_amount: dec!(10000),
            status: CommissionStatus::Pending,
            created_at,
            paid_at: None,
        }
    }

    #[test]
    fn payout_period_spans_the_batch() {
        let now = Utc::now();
        let oldest = now - Duration::days(20);
        let newest = now - Duration::days(2);
        let batch = vec![commission(1, newest), commission(2, oldest), commission(3, now - Duration::days(9))];
        assert_eq!(payout_period(&batch, now), (oldest, newest));
        assert_eq!(payout_period(&[], now), (now, now));
    }
}
