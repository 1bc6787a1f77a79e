use serde_json::json;
use storefront_db::models::fraud::{
    BlacklistEntry, FraudAction, FraudRule, FraudSeverity, FraudType,
};

use super::FraudContext;
use super::rules::{FraudCheck, RuleCriteria};
use crate::error::LedgerError;

/// Outcome of checking an account against the white and black lists.
#[derive(Debug, Clone)]
pub enum Screening {
    Clear,
    Whitelisted,
    Blacklisted(BlacklistEntry),
}

/// A rule that fired, ready to be stored as a detection.
#[derive(Debug, Clone)]
pub struct Finding {
    pub rule_id: Option<i64>,
    pub rule_name: String,
    pub fraud_type: FraudType,
    pub severity: FraudSeverity,
    pub action: FraudAction,
    pub auto_action: bool,
    pub confidence: f64,
    pub evidence: serde_json::Value,
}

impl Finding {
    pub fn description(&self) -> String {
        format!(
            "{} ({}) fired with confidence {:.2}",
            self.rule_name,
            self.fraud_type.as_str(),
            self.confidence
        )
    }
}

#[derive(Debug, Default)]
pub struct Evaluation {
    pub findings: Vec<Finding>,
    /// Highest confidence among the rules that fired.
    pub score: f64,
    pub skipped: Vec<LedgerError>,
}

impl Evaluation {
    pub fn most_severe(&self) -> Option<&Finding> {
        self.findings.iter().max_by_key(|f| f.severity)
    }

    /// Index of the one finding allowed to act automatically: the most
    /// severe among those whose rule permits auto action.
    pub fn auto_action_driver(&self) -> Option<usize> {
        self.findings
            .iter()
            .enumerate()
            .filter(|(_, f)| f.auto_action)
            .max_by_key(|(_, f)| f.severity)
            .map(|(idx, _)| idx)
    }
}

pub fn fires(confidence: f64, threshold: f64) -> bool {
    confidence >= threshold
}

/// Scores a transaction against every active rule. Scores are never
/// combined: each firing rule yields its own finding.
pub fn evaluate_rules(rules: &[FraudRule], ctx: &FraudContext<'_>, screening: &Screening) -> Evaluation {
    match screening {
        Screening::Whitelisted => return Evaluation::default(),
        Screening::Blacklisted(entry) => {
            return Evaluation {
                findings: vec![Finding {
                    rule_id: None,
                    rule_name: "blacklist".to_string(),
                    fraud_type: entry.fraud_type,
                    severity: FraudSeverity::Critical,
                    action: FraudAction::Block,
                    auto_action: entry.auto_block,
                    confidence: 1.0,
                    evidence: json!({ "blacklist_id": entry.id, "reason": entry.reason }),
                }],
                score: 1.0,
                skipped: Vec::new(),
            };
        }
        Screening::Clear => {}
    }

    let mut evaluation = Evaluation::default();
    for rule in rules.iter().filter(|r| r.is_active) {
        let criteria = match RuleCriteria::parse(rule) {
            Ok(c) => c,
            Err(e) => {
                evaluation.skipped.push(e);
                continue;
            }
        };

        let confidence = criteria.evaluate(ctx);
        if fires(confidence.score, rule.effective_threshold()) {
            evaluation.score = evaluation.score.max(confidence.score);
            evaluation.findings.push(Finding {
                rule_id: Some(rule.id),
                rule_name: rule.name.clone(),
                fraud_type: rule.fraud_type,
                severity: rule.severity,
                action: rule.action,
                auto_action: rule.auto_action,
                confidence: confidence.score,
                evidence: confidence.evidence,
            });
        }
    }
    evaluation
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fraud::rules::tests::{account, rule, topup};
    use chrono::{Duration, Utc};
    use rust_decimal_macros::dec;

    #[test]
    fn threshold_is_inclusive() {
        assert!(!fires(0.69999, 0.7));
        assert!(fires(0.7, 0.7));
        assert!(fires(1.0, 0.7));
    }

    fn duplicate_rule(threshold: Option<f64>) -> FraudRule {
        let mut r = rule(
            2,
            FraudType::DuplicatePayment,
            json!({"kind": "duplicate_payment", "window_minutes": 60}),
        );
        r.threshold = threshold;
        r
    }

    #[test]
    fn one_duplicate_fires_only_with_low_threshold() {
        let now = Utc::now();
        let acc = account();
        let history = [topup(1, dec!(100000), now - Duration::minutes(2))];
        let current = topup(2, dec!(100000), now);
        let ctx = FraudContext {
            transaction: &current,
            account: &acc,
            history: &history,
            fingerprint_matches: &[],
            now,
        };

        let default = evaluate_rules(&[duplicate_rule(None)], &ctx, &Screening::Clear);
        assert!(default.findings.is_empty());
        assert_eq!(default.score, 0.0);

        let tuned = evaluate_rules(&[duplicate_rule(Some(0.3))], &ctx, &Screening::Clear);
        assert_eq!(tuned.findings.len(), 1);
        assert_eq!(tuned.findings[0].fraud_type, FraudType::DuplicatePayment);
        assert!((tuned.score - 0.3).abs() < 1e-9);
    }

    #[test]
    fn round_amount_below_threshold_leaves_score_at_zero() {
        let now = Utc::now();
        let acc = account();
        let current = topup(2, dec!(500000), now);
        let ctx = FraudContext {
            transaction: &current,
            account: &acc,
            history: &[],
            fingerprint_matches: &[],
            now,
        };
        let pattern = rule(
            5,
            FraudType::SuspiciousPattern,
            json!({"kind": "suspicious_pattern", "min_gap_seconds": 300, "round_unit": "10000", "round_floor": "100000"}),
        );
        let eval = evaluate_rules(&[pattern], &ctx, &Screening::Clear);
        assert!(eval.findings.is_empty());
        assert_eq!(eval.score, 0.0);
    }

    #[test]
    fn whitelist_skips_everything() {
        let now = Utc::now();
        let acc = account();
        let history = [topup(1, dec!(100000), now - Duration::minutes(2))];
        let current = topup(2, dec!(100000), now);
        let ctx = FraudContext {
            transaction: &current,
            account: &acc,
            history: &history,
            fingerprint_matches: &[],
            now,
        };
        let eval = evaluate_rules(&[duplicate_rule(Some(0.1))], &ctx, &Screening::Whitelisted);
        assert!(eval.findings.is_empty());
        assert_eq!(eval.score, 0.0);
    }

    #[test]
    fn blacklist_yields_single_critical_finding() {
        let now = Utc::now();
        let acc = account();
        let current = topup(2, dec!(100000), now);
        let ctx = FraudContext {
            transaction: &current,
            account: &acc,
            history: &[],
            fingerprint_matches: &[],
            now,
        };
        let entry = BlacklistEntry {
            id: 3,
            account_id: 1,
            reason: "chargeback".into(),
            fraud_type: FraudType::FakeReceipt,
            severity: FraudSeverity::High,
            is_active: true,
            auto_block: true,
            created_by: 9,
            created_at: now,
        };
        let eval = evaluate_rules(&[duplicate_rule(Some(0.0))], &ctx, &Screening::Blacklisted(entry));
        assert_eq!(eval.findings.len(), 1);
        let finding = &eval.findings[0];
        assert_eq!(finding.severity, FraudSeverity::Critical);
        assert_eq!(finding.confidence, 1.0);
        assert!(finding.rule_id.is_none());
        assert!(finding.auto_action);
    }

    #[test]
    fn broken_rule_is_skipped_not_fatal() {
        let now = Utc::now();
        let acc = account();
        let history = [topup(1, dec!(100000), now - Duration::minutes(2))];
        let current = topup(2, dec!(100000), now);
        let ctx = FraudContext {
            transaction: &current,
            account: &acc,
            history: &history,
            fingerprint_matches: &[],
            now,
        };
        let broken = rule(8, FraudType::HighFrequency, json!({"kind": "nonsense"}));
        let eval = evaluate_rules(&[broken, duplicate_rule(Some(0.3))], &ctx, &Screening::Clear);
        assert_eq!(eval.skipped.len(), 1);
        assert_eq!(eval.findings.len(), 1);
    }

    #[test]
    fn most_severe_finding_wins() {
        let mut eval = Evaluation::default();
        for (severity, name) in [
            (FraudSeverity::Low, "a"),
            (FraudSeverity::High, "b"),
            (FraudSeverity::Medium, "c"),
        ] {
            eval.findings.push(Finding {
                rule_id: None,
                rule_name: name.into(),
                fraud_type: FraudType::SuspiciousPattern,
                severity,
                action: FraudAction::Warn,
                auto_action: false,
                confidence: 0.9,
                evidence: json!({}),
            });
        }
        assert_eq!(eval.most_severe().map(|f| f.rule_name.as_str()), Some("b"));
        assert_eq!(eval.auto_action_driver(), None);

        eval.findings[0].auto_action = true;
        eval.findings[2].auto_action = true;
        assert_eq!(eval.auto_action_driver(), Some(2));
    }
}
