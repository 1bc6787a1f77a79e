use sqlx::PgPool;
use storefront_db::models::purchase::PurchaseIntent;

use super::purchase_service::provision_intent;
use crate::capabilities::Capabilities;
use crate::error::LedgerError;

/// Side effects that may only run once the ledger change is committed.
#[derive(Debug, Default)]
pub struct PostCommit {
    pub provision: Vec<i64>,
    pub deactivate: Vec<String>,
    pub account_messages: Vec<(i64, String)>,
    pub admin_messages: Vec<String>,
}

#[derive(Debug, Default)]
pub struct Dispatched {
    pub provisioned: Vec<PurchaseIntent>,
    pub failures: Vec<LedgerError>,
}

impl PostCommit {
    pub fn notify_account(&mut self, account_id: i64, message: impl Into<String>) {
        self.account_messages.push((account_id, message.into()));
    }

    pub fn notify_admins(&mut self, message: impl Into<String>) {
        self.admin_messages.push(message.into());
    }

    pub fn merge(&mut self, other: PostCommit) {
        self.provision.extend(other.provision);
        self.deactivate.extend(other.deactivate);
        self.account_messages.extend(other.account_messages);
        self.admin_messages.extend(other.admin_messages);
    }

    pub fn is_empty(&self) -> bool {
        self.provision.is_empty()
            && self.deactivate.is_empty()
            && self.account_messages.is_empty()
            && self.admin_messages.is_empty()
    }

    /// Runs every effect. Failures are logged and reported, never raised:
    /// the ledger state they follow is already durable.
    pub async fn dispatch(mut self, pool: &PgPool, caps: &Capabilities) -> Dispatched {
        let mut report = Dispatched::default();

        for intent_id in std::mem::take(&mut self.provision) {
            match provision_intent(pool, caps, intent_id).await {
                Ok(intent) => {
                    if let Some(url) = &intent.subscription_url {
                        self.notify_account(
                            intent.account_id,
                            format!("Your service '{}' is ready: {}", intent.alias, url),
                        );
                    }
                    report.provisioned.push(intent);
                }
                Err(e) => {
                    tracing::error!("Provisioning intent {} failed: {}", intent_id, e);
                    self.notify_admins(format!(
                        "Provisioning failed for intent {}: {}. Retry with retry-provisioning.",
                        intent_id, e
                    ));
                    report.failures.push(e);
                }
            }
        }

        for service_ref in &self.deactivate {
            if let Err(e) = caps.provisioner.deactivate(service_ref).await {
                tracing::warn!("Failed to deactivate service {}: {}", service_ref, e);
            }
        }

        for (account_id, message) in &self.account_messages {
            if let Err(e) = caps.notifier.notify_account(*account_id, message).await {
                tracing::warn!("Failed to notify account {}: {}", account_id, e);
            }
        }

        if !self.admin_messages.is_empty() {
            let admins = caps.authorizer.admin_ids();
            for message in &self.admin_messages {
                if let Err(e) = caps.notifier.notify_admins(&admins, message).await {
                    tracing::warn!("Failed to notify admins: {}", e);
                }
            }
        }

        report
    }
}
