//! Rule-based fraud scoring.
//!
//! Rules are stored with JSON criteria and parsed into [`rules::RuleCriteria`]
//! on every evaluation. Each rule scores a transaction independently;
//! [`engine::evaluate_rules`] decides which ones fire. The transaction's
//! fraud score adds the strongest fired rule to the daily limit score from
//! [`limits`].

pub mod engine;
pub mod limits;
pub mod rules;

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use storefront_db::models::account::Account;
use storefront_db::models::ledger::Transaction;

pub use engine::{Evaluation, Finding, Screening, evaluate_rules, fires};
pub use limits::{DailyActivity, DailyLimits, combine_scores};
pub use rules::{Confidence, FraudCheck, RuleCriteria};

/// Everything a rule may look at. `history` holds the account's earlier
/// transactions, newest first, without the one being scored.
#[derive(Debug, Clone, Copy)]
pub struct FraudContext<'a> {
    pub transaction: &'a Transaction,
    pub account: &'a Account,
    pub history: &'a [Transaction],
    pub fingerprint_matches: &'a [Transaction],
    pub now: DateTime<Utc>,
}

impl<'a> FraudContext<'a> {
    /// Earlier transactions of any kind created within `window` of now.
    pub fn since(&self, window: chrono::Duration) -> impl Iterator<Item = &'a Transaction> {
        let since = self.now - window;
        self.history.iter().filter(move |t| t.created_at >= since)
    }

    /// Earlier top-ups and purchases created within `window` of now.
    pub fn reviewable_since(&self, window: chrono::Duration) -> impl Iterator<Item = &'a Transaction> {
        let since = self.now - window;
        self.history
            .iter()
            .filter(move |t| t.kind.is_reviewable() && t.created_at >= since)
    }
}

/// Stable fingerprint of an opaque receipt reference, used to spot reuse.
pub fn receipt_fingerprint(receipt_ref: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(receipt_ref.trim().as_bytes());
    hex::encode(hasher.finalize())
}
