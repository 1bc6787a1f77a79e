use rust_decimal::Decimal;
use storefront_db::models::ledger::TransactionStatus;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, LedgerError>;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Account {account_id} has {balance}, cannot debit {requested}")]
    InsufficientFunds {
        account_id: i64,
        balance: Decimal,
        requested: Decimal,
    },

    /// Approval or rejection of a transaction that is no longer pending.
    #[error("Transaction {transaction_id} already {status}")]
    AlreadyFinal {
        transaction_id: i64,
        status: TransactionStatus,
    },

    #[error("No free alias left for base '{base}' on account {account_id}")]
    AliasCollision { account_id: i64, base: String },

    #[error("Account {account_id} is blocked by fraud controls")]
    FraudBlocked { account_id: i64 },

    #[error("Provisioning failed for intent {intent_id}: {reason}")]
    ProvisioningFailed { intent_id: i64, reason: String },

    #[error("Fraud rule {rule_id} could not be evaluated: {reason}")]
    RuleEvaluation { rule_id: i64, reason: String },

    #[error("Reseller {reseller_id} has no pending commission")]
    NoPendingCommission { reseller_id: i64 },

    #[error("Actor {actor_id} is not allowed to review")]
    Unauthorized { actor_id: i64 },

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    #[error("Reseller {reseller_id} cannot sit under {parent_id}: hierarchy would loop")]
    HierarchyCycle { reseller_id: i64, parent_id: i64 },

    #[error("Reseller request rejected: {0}")]
    ResellerRejected(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl LedgerError {
    pub fn not_found(entity: &'static str, id: i64) -> Self {
        Self::NotFound { entity, id }
    }

    /// Double review is a no-op for callers, not a failure.
    pub fn is_already_final(&self) -> bool {
        matches!(self, Self::AlreadyFinal { .. })
    }
}
