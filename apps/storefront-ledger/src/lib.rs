//! Wallet, purchase, approval, fraud and commission accounting for the VPN
//! storefront. Every money movement commits atomically with the ledger
//! record that explains it; provisioning and notifications run after commit.

pub mod alias;
pub mod capabilities;
pub mod cli;
pub mod config;
pub mod error;
pub mod fraud;
pub mod money;
pub mod services;

use sqlx::PgPool;
use std::sync::Arc;

use capabilities::Capabilities;
use config::LedgerConfig;
use error::Result;
use services::approval_service::ApprovalService;
use services::commission_service::CommissionService;
use services::fraud_service::FraudService;
use services::purchase_service::PurchaseService;
use services::reseller_service::ResellerService;
use services::wallet_service::WalletService;

/// All ledger services sharing one pool and one set of capabilities.
#[derive(Clone)]
pub struct Ledger {
    pub pool: PgPool,
    pub config: Arc<LedgerConfig>,
    pub caps: Capabilities,
    pub wallet: Arc<WalletService>,
    pub purchases: Arc<PurchaseService>,
    pub approvals: Arc<ApprovalService>,
    pub fraud: Arc<FraudService>,
    pub commissions: Arc<CommissionService>,
    pub resellers: Arc<ResellerService>,
}

impl Ledger {
    pub fn new(pool: PgPool, config: LedgerConfig, caps: Capabilities) -> Self {
        let config = Arc::new(config);
        let fraud = Arc::new(FraudService::new(
            pool.clone(),
            caps.clone(),
            config.fraud_detection_enabled,
            config.daily_limits(),
        ));
        let approvals = Arc::new(ApprovalService::new(pool.clone(), config.clone(), caps.clone()));
        let wallet = Arc::new(WalletService::new(
            pool.clone(),
            config.clone(),
            caps.clone(),
            fraud.clone(),
            approvals.clone(),
        ));
        let purchases = Arc::new(PurchaseService::new(
            pool.clone(),
            config.clone(),
            caps.clone(),
            fraud.clone(),
            approvals.clone(),
        ));
        let commissions = Arc::new(CommissionService::new(pool.clone(), config.clone(), caps.clone()));
        let resellers = Arc::new(ResellerService::new(pool.clone(), caps.clone()));

        Self {
            pool,
            config,
            caps,
            wallet,
            purchases,
            approvals,
            fraud,
            commissions,
            resellers,
        }
    }

    /// Opens the pool, applies migrations and wires the services.
    pub async fn connect(config: LedgerConfig, caps: Capabilities) -> Result<Self> {
        let pool = storefront_db::db::init_db(&config.database_url, config.db_max_connections).await?;
        Ok(Self::new(pool, config, caps))
    }
}
