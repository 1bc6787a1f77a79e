pub mod account;
pub mod catalog;
pub mod fraud;
pub mod ledger;
pub mod purchase;
pub mod reseller;
