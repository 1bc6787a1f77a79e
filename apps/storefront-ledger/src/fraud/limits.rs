use rust_decimal::Decimal;
use serde_json::json;

use super::rules::Confidence;

const OVER_COUNT_WEIGHT: f64 = 0.3;
const OVER_AMOUNT_WEIGHT: f64 = 0.4;

/// Per-account caps over the trailing 24 hours.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DailyLimits {
    pub max_transactions: i64,
    pub max_amount: Decimal,
}

/// What an account already did in the trailing 24 hours, excluding the
/// transaction being scored.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DailyActivity {
    /// Receipts submitted, whatever their status.
    pub submitted: i64,
    /// Sum of the receipts already approved.
    pub approved_amount: Decimal,
}

impl DailyLimits {
    pub fn score(&self, activity: &DailyActivity, amount: Decimal) -> Confidence {
        let over_count = activity.submitted > self.max_transactions;
        let projected = activity.approved_amount + amount;
        let over_amount = projected > self.max_amount;

        let mut score = 0.0;
        if over_count {
            score += OVER_COUNT_WEIGHT;
        }
        if over_amount {
            score += OVER_AMOUNT_WEIGHT;
        }
        if score == 0.0 {
            return Confidence::none();
        }
        Confidence::new(
            score,
            json!({
                "submitted_24h": activity.submitted,
                "max_transactions": self.max_transactions,
                "projected_amount_24h": projected.to_string(),
                "max_amount": self.max_amount.to_string(),
            }),
        )
    }
}

/// Fired-rule score plus the daily limit score, capped at one.
pub fn combine_scores(rule_score: f64, limit_score: f64) -> f64 {
    (rule_score + limit_score).clamp(0.0, 1.0)
}
