pub mod account_repo;
pub mod catalog_repo;
pub mod commission_repo;
pub mod fraud_repo;
pub mod intent_repo;
pub mod reseller_repo;
pub mod transaction_repo;
