use sqlx::PgPool;
use storefront_db::models::reseller::{Reseller, ResellerLevel, ResellerStatus};
use storefront_db::repositories::account_repo::AccountRepository;
use storefront_db::repositories::reseller_repo::ResellerRepository;
use tracing::info;

use super::effects::PostCommit;
use crate::capabilities::Capabilities;
use crate::error::{LedgerError, Result};

/// True when putting `reseller_id` under a parent with this chain would close a loop.
pub fn closes_loop(reseller_id: i64, parent_chain: &[i64]) -> bool {
    parent_chain.contains(&reseller_id)
}

/// Reseller onboarding and hierarchy maintenance.
pub struct ResellerService {
    pool: PgPool,
    caps: Capabilities,
}

impl ResellerService {
    pub fn new(pool: PgPool, caps: Capabilities) -> Self {
        Self { pool, caps }
    }

    fn authorize(&self, actor_id: i64) -> Result<()> {
        if self.caps.authorizer.can_review(actor_id) {
            Ok(())
        } else {
            Err(LedgerError::Unauthorized { actor_id })
        }
    }

    fn check_parent_capacity(parent: &Reseller) -> Result<()> {
        if !parent.is_active() {
            return Err(LedgerError::ResellerRejected(format!(
                "parent reseller {} is {}",
                parent.id,
                parent.status.as_str()
            )));
        }
        if !parent.can_create_sub_resellers {
            return Err(LedgerError::ResellerRejected(format!(
                "parent reseller {} may not recruit sub-resellers",
                parent.id
            )));
        }
        if parent.total_sub_resellers >= parent.max_sub_resellers {
            return Err(LedgerError::ResellerRejected(format!(
                "parent reseller {} is at its limit of {} sub-resellers",
                parent.id, parent.max_sub_resellers
            )));
        }
        Ok(())
    }

    /// Registers an account as a Bronze reseller awaiting approval.
    pub async fn create_reseller(&self, account_id: i64, parent_id: Option<i64>) -> Result<Reseller> {
        let mut tx = self.pool.begin().await?;

        AccountRepository::get(&mut tx, account_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("account", account_id))?;
        if ResellerRepository::by_account(&mut tx, account_id).await?.is_some() {
            return Err(LedgerError::ResellerRejected(format!(
                "account {} is already a reseller",
                account_id
            )));
        }

        if let Some(parent_id) = parent_id {
            let parent = ResellerRepository::lock(&mut tx, parent_id)
                .await?
                .ok_or_else(|| LedgerError::not_found("reseller", parent_id))?;
            Self::check_parent_capacity(&parent)?;
            if parent.account_id == account_id {
                return Err(LedgerError::ResellerRejected("an account cannot parent itself".into()));
            }
        }

        let rule = ResellerRepository::level_rule(&mut tx, ResellerLevel::Bronze)
            .await?
            .ok_or_else(|| LedgerError::ResellerRejected("no active bronze level rule".into()))?;
        let reseller = ResellerRepository::insert(&mut tx, account_id, parent_id, &rule).await?;
        if let Some(parent_id) = parent_id {
            ResellerRepository::adjust_sub_resellers(&mut tx, parent_id, 1).await?;
        }
        tx.commit().await?;

        info!("Reseller {} created for account {} under {:?}", reseller.id, account_id, parent_id);
        Ok(reseller)
    }

    pub async fn approve_reseller(&self, reseller_id: i64, actor_id: i64) -> Result<Reseller> {
        self.set_status(reseller_id, ResellerStatus::Active, actor_id).await
    }

    pub async fn set_status(&self, reseller_id: i64, status: ResellerStatus, actor_id: i64) -> Result<Reseller> {
        self.authorize(actor_id)?;

        let mut tx = self.pool.begin().await?;
        let reseller = ResellerRepository::lock(&mut tx, reseller_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("reseller", reseller_id))?;
        if !reseller.status.can_transition_to(status) {
            return Err(LedgerError::InvalidTransition(format!(
                "reseller {} cannot move from {} to {}",
                reseller_id,
                reseller.status.as_str(),
                status.as_str()
            )));
        }

        ResellerRepository::set_status(&mut tx, reseller_id, status).await?;
        let updated = ResellerRepository::get(&mut tx, reseller_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("reseller", reseller_id))?;
        tx.commit().await?;

        info!(
            "Reseller {} status {} -> {} by {}",
            reseller_id,
            reseller.status.as_str(),
            status.as_str(),
            actor_id
        );
        let mut effects = PostCommit::default();
        effects.notify_account(updated.account_id, format!("Your reseller status is now {}", status.as_str()));
        effects.dispatch(&self.pool, &self.caps).await;
        Ok(updated)
    }

    /// Moves a reseller under a new parent, or to the top when `None`.
    pub async fn reparent(&self, reseller_id: i64, new_parent_id: Option<i64>, actor_id: i64) -> Result<Reseller> {
        self.authorize(actor_id)?;

        let mut tx = self.pool.begin().await?;
        let reseller = ResellerRepository::lock(&mut tx, reseller_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("reseller", reseller_id))?;
        if reseller.parent_id == new_parent_id {
            return Ok(reseller);
        }

        if let Some(parent_id) = new_parent_id {
            let parent = ResellerRepository::lock(&mut tx, parent_id)
                .await?
                .ok_or_else(|| LedgerError::not_found("reseller", parent_id))?;
            let chain = ResellerRepository::chain_ids(&mut tx, parent_id).await?;
            if closes_loop(reseller_id, &chain) {
                return Err(LedgerError::HierarchyCycle { reseller_id, parent_id });
            }
            Self::check_parent_capacity(&parent)?;
            ResellerRepository::adjust_sub_resellers(&mut tx, parent_id, 1).await?;
        }
        if let Some(old_parent) = reseller.parent_id {
            ResellerRepository::adjust_sub_resellers(&mut tx, old_parent, -1).await?;
        }

        ResellerRepository::set_parent(&mut tx, reseller_id, new_parent_id).await?;
        let updated = ResellerRepository::get(&mut tx, reseller_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("reseller", reseller_id))?;
        tx.commit().await?;

        info!("Reseller {} moved from {:?} to {:?}", reseller_id, reseller.parent_id, new_parent_id);
        Ok(updated)
    }

    pub async fn get(&self, reseller_id: i64) -> Result<Reseller> {
        let mut conn = self.pool.acquire().await?;
        ResellerRepository::get(&mut conn, reseller_id)
            .await?
            .ok_or_else(|| LedgerError::not_found("reseller", reseller_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loop_detection_uses_parent_chain() {
        // parent 3 -> 2 -> 1: making 1 a child of 3 would loop.
        assert!(closes_loop(1, &[3, 2, 1]));
        assert!(closes_loop(3, &[3]));
        assert!(!closes_loop(4, &[3, 2, 1]));
    }
}
