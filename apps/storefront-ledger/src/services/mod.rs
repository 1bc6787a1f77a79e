pub mod approval_service;
pub mod commission_service;
pub mod effects;
pub mod fraud_service;
pub mod purchase_service;
pub mod reseller_service;
pub mod wallet_service;
