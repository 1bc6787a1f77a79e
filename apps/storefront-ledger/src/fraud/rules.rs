use chrono::Duration;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use serde_json::json;
use storefront_db::models::fraud::{FraudRule, FraudType};

use super::FraudContext;
use crate::error::LedgerError;

#[derive(Debug, Clone, PartialEq)]
pub struct Confidence {
    pub score: f64,
    pub evidence: serde_json::Value,
}

impl Confidence {
    pub fn new(score: f64, evidence: serde_json::Value) -> Self {
        Self {
            score: score.clamp(0.0, 1.0),
            evidence,
        }
    }

    pub fn none() -> Self {
        Self::new(0.0, json!({}))
    }
}

pub trait FraudCheck {
    fn evaluate(&self, ctx: &FraudContext<'_>) -> Confidence;
}

fn default_tolerance() -> Decimal {
    Decimal::from(1000)
}

fn default_window_minutes() -> i64 {
    60
}

fn default_multiplier() -> Decimal {
    Decimal::from(3)
}

fn default_min_history() -> usize {
    5
}

/// Typed form of a rule's stored criteria.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuleCriteria {
    FakeReceipt {
        #[serde(default = "default_tolerance")]
        amount_tolerance: Decimal,
    },
    DuplicatePayment {
        #[serde(default = "default_window_minutes")]
        window_minutes: i64,
    },
    HighFrequency {
        max_count: u32,
        window_hours: i64,
    },
    UnusualAmount {
        #[serde(default = "default_multiplier")]
        multiplier: Decimal,
        #[serde(default = "default_min_history")]
        min_history: usize,
    },
    SuspiciousPattern {
        min_gap_seconds: i64,
        round_unit: Decimal,
        round_floor: Decimal,
    },
}

impl RuleCriteria {
    pub fn fraud_type(&self) -> FraudType {
        match self {
            Self::FakeReceipt { .. } => FraudType::FakeReceipt,
            Self::DuplicatePayment { .. } => FraudType::DuplicatePayment,
            Self::HighFrequency { .. } => FraudType::HighFrequency,
            Self::UnusualAmount { .. } => FraudType::UnusualAmount,
            Self::SuspiciousPattern { .. } => FraudType::SuspiciousPattern,
        }
    }

    /// Parses and sanity-checks a stored rule.
    pub fn parse(rule: &FraudRule) -> Result<Self, LedgerError> {
        let fail = |reason: String| LedgerError::RuleEvaluation {
            rule_id: rule.id,
            reason,
        };

        let criteria: RuleCriteria =
            serde_json::from_value(rule.criteria.0.clone()).map_err(|e| fail(e.to_string()))?;

        if criteria.fraud_type() != rule.fraud_type {
            return Err(fail(format!(
                "criteria describe {} but rule is {}",
                criteria.fraud_type().as_str(),
                rule.fraud_type.as_str()
            )));
        }

        let valid = match &criteria {
            Self::FakeReceipt { amount_tolerance } => *amount_tolerance >= Decimal::ZERO,
            Self::DuplicatePayment { window_minutes } => *window_minutes > 0,
            Self::HighFrequency {
                max_count,
                window_hours,
            } => *max_count > 0 && *window_hours > 0,
            Self::UnusualAmount {
                multiplier,
                min_history,
            } => *multiplier > Decimal::ZERO && *min_history > 0,
            Self::SuspiciousPattern {
                min_gap_seconds,
                round_unit,
                ..
            } => *min_gap_seconds > 0 && *round_unit > Decimal::ZERO,
        };
        if !valid {
            return Err(fail("criteria values out of range".into()));
        }

        Ok(criteria)
    }
}

impl FraudCheck for RuleCriteria {
    fn evaluate(&self, ctx: &FraudContext<'_>) -> Confidence {
        match self {
            Self::FakeReceipt { amount_tolerance } => fake_receipt(ctx, *amount_tolerance),
            Self::DuplicatePayment { window_minutes } => duplicate_payment(ctx, *window_minutes),
            Self::HighFrequency {
                max_count,
                window_hours,
            } => high_frequency(ctx, *max_count, *window_hours),
            Self::UnusualAmount {
                multiplier,
                min_history,
            } => unusual_amount(ctx, *multiplier, *min_history),
            Self::SuspiciousPattern {
                min_gap_seconds,
                round_unit,
                round_floor,
            } => suspicious_pattern(ctx, *min_gap_seconds, *round_unit, *round_floor),
        }
    }
}

fn fake_receipt(ctx: &FraudContext<'_>, tolerance: Decimal) -> Confidence {
    if ctx.fingerprint_matches.is_empty() {
        return Confidence::none();
    }

    let amount = ctx.transaction.amount;
    let mismatched = ctx
        .fingerprint_matches
        .iter()
        .filter(|t| (t.amount - amount).abs() > tolerance)
        .count();

    let mut score = 0.8;
    if mismatched > 0 {
        score += 0.6;
    }

    let reused_by: Vec<i64> = ctx.fingerprint_matches.iter().map(|t| t.id).collect();
    Confidence::new(
        score,
        json!({ "reused_by": reused_by, "amount_mismatches": mismatched }),
    )
}

fn duplicate_payment(ctx: &FraudContext<'_>, window_minutes: i64) -> Confidence {
    let tx = ctx.transaction;
    let duplicates: Vec<i64> = ctx
        .since(Duration::minutes(window_minutes))
        .filter(|t| t.amount == tx.amount)
        .map(|t| t.id)
        .collect();

    if duplicates.is_empty() {
        return Confidence::none();
    }
    Confidence::new(
        0.3 * duplicates.len() as f64,
        json!({ "duplicates": duplicates, "window_minutes": window_minutes }),
    )
}

fn high_frequency(ctx: &FraudContext<'_>, max_count: u32, window_hours: i64) -> Confidence {
    let observed = ctx.reviewable_since(Duration::hours(window_hours)).count() + 1;
    let allowed = max_count as usize;
    if observed <= allowed {
        return Confidence::none();
    }
    Confidence::new(
        (observed - allowed) as f64 / allowed as f64,
        json!({ "observed": observed, "allowed": allowed, "window_hours": window_hours }),
    )
}

fn unusual_amount(ctx: &FraudContext<'_>, multiplier: Decimal, min_history: usize) -> Confidence {
    let amounts: Vec<Decimal> = ctx
        .history
        .iter()
        .filter(|t| t.kind.is_reviewable())
        .map(|t| t.amount)
        .collect();
    if amounts.len() < min_history {
        return Confidence::none();
    }

    let total: Decimal = amounts.iter().copied().sum();
    let average = total / Decimal::from(amounts.len());
    let max = amounts.iter().copied().max().unwrap_or(Decimal::ZERO);
    let amount = ctx.transaction.amount;

    let mut score = 0.0;
    if amount > average * multiplier {
        score += 0.6;
    }
    if amount > max * Decimal::new(15, 1) {
        score += 0.4;
    }
    if score == 0.0 {
        return Confidence::none();
    }
    Confidence::new(
        score,
        json!({
            "amount": amount.to_string(),
            "average": average.round_dp(2).to_string(),
            "max": max.to_string(),
            "ratio_to_average": (amount / average.max(Decimal::ONE)).to_f64(),
        }),
    )
}

fn suspicious_pattern(
    ctx: &FraudContext<'_>,
    min_gap_seconds: i64,
    round_unit: Decimal,
    round_floor: Decimal,
) -> Confidence {
    let mut score = 0.0;
    let mut evidence = serde_json::Map::new();

    let mut stamps: Vec<_> = ctx
        .reviewable_since(Duration::hours(1))
        .map(|t| t.created_at)
        .collect();
    stamps.push(ctx.transaction.created_at);
    if stamps.len() >= 3 {
        stamps.sort();
        let gaps: Vec<i64> = stamps
            .windows(2)
            .map(|w| (w[1] - w[0]).num_seconds())
            .collect();
        let average_gap = gaps.iter().sum::<i64>() as f64 / gaps.len() as f64;
        if average_gap < min_gap_seconds as f64 {
            score += 0.7;
            evidence.insert("average_gap_seconds".into(), json!(average_gap));
            evidence.insert("recent_count".into(), json!(stamps.len()));
        }
    }

    let amount = ctx.transaction.amount;
    if amount >= round_floor && (amount % round_unit).is_zero() {
        score += 0.3;
        evidence.insert("round_amount".into(), json!(amount.to_string()));
    }

    if score == 0.0 {
        return Confidence::none();
    }
    Confidence::new(score, serde_json::Value::Object(evidence))
}
