use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;

/// Decides who may review transactions, pay out resellers and receive fraud alerts.
pub trait Authorizer: Send + Sync {
    fn can_review(&self, actor_id: i64) -> bool;
    fn admin_ids(&self) -> Vec<i64>;
}

#[derive(Debug, Clone, Default)]
pub struct StaticAdminSet {
    admins: HashSet<i64>,
}

impl StaticAdminSet {
    pub fn new(ids: impl IntoIterator<Item = i64>) -> Self {
        Self {
            admins: ids.into_iter().collect(),
        }
    }
}

impl Authorizer for StaticAdminSet {
    fn can_review(&self, actor_id: i64) -> bool {
        self.admins.contains(&actor_id)
    }

    fn admin_ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.admins.iter().copied().collect();
        ids.sort_unstable();
        ids
    }
}

#[derive(Debug, Clone)]
pub struct ProvisionRequest {
    pub intent_id: i64,
    pub account_id: i64,
    pub plan_id: i64,
    pub plan_title: String,
    pub duration_days: Option<i32>,
    pub traffic_gb: Option<i32>,
    pub server_id: i64,
    pub server_host: String,
    pub alias: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRef {
    pub service_ref: String,
    pub subscription_url: String,
}

/// Turns a paid intent into a running VPN service. Called only after commit.
#[async_trait]
pub trait ServiceProvisioner: Send + Sync {
    async fn provision(&self, request: &ProvisionRequest) -> Result<ServiceRef>;

    async fn deactivate(&self, service_ref: &str) -> Result<()>;

    fn name(&self) -> &str;
}

/// Stand-in panel: issues a fresh client UUID and a VLESS link.
#[derive(Debug, Clone, Default)]
pub struct MockProvisioner;

#[async_trait]
impl ServiceProvisioner for MockProvisioner {
    async fn provision(&self, request: &ProvisionRequest) -> Result<ServiceRef> {
        let client_id = uuid::Uuid::new_v4().to_string();
        let subscription_url = format!(
            "vless://{}@{}:443?security=reality&type=tcp#{}",
            client_id, request.server_host, request.alias
        );
        Ok(ServiceRef {
            service_ref: client_id,
            subscription_url,
        })
    }

    async fn deactivate(&self, service_ref: &str) -> Result<()> {
        tracing::info!("Mock panel: deactivated client {}", service_ref);
        Ok(())
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify_account(&self, account_id: i64, message: &str) -> Result<()>;

    async fn notify_admins(&self, admin_ids: &[i64], message: &str) -> Result<()>;
}

/// Writes notifications to the log. Delivery to chat lives outside the ledger.
#[derive(Debug, Clone, Default)]
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify_account(&self, account_id: i64, message: &str) -> Result<()> {
        tracing::info!(account_id, "notify: {}", message);
        Ok(())
    }

    async fn notify_admins(&self, admin_ids: &[i64], message: &str) -> Result<()> {
        tracing::info!(admins = ?admin_ids, "admin notify: {}", message);
        Ok(())
    }
}

/// The collaborators every service is wired with.
#[derive(Clone)]
pub struct Capabilities {
    pub authorizer: Arc<dyn Authorizer>,
    pub provisioner: Arc<dyn ServiceProvisioner>,
    pub notifier: Arc<dyn Notifier>,
}

impl Capabilities {
    pub fn new(
        authorizer: Arc<dyn Authorizer>,
        provisioner: Arc<dyn ServiceProvisioner>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            authorizer,
            provisioner,
            notifier,
        }
    }

    /// Static admin list, mock panel, log-only notifications.
    pub fn with_defaults(admin_ids: impl IntoIterator<Item = i64>) -> Self {
        Self::new(
            Arc::new(StaticAdminSet::new(admin_ids)),
            Arc::new(MockProvisioner),
            Arc::new(TracingNotifier),
        )
    }
}
