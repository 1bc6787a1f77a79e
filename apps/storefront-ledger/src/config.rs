use rust_decimal::Decimal;
use std::str::FromStr;

use crate::error::{LedgerError, Result};
use crate::fraud::DailyLimits;

#[derive(Debug, Clone)]
pub struct LedgerConfig {
    pub database_url: String,
    pub admin_ids: Vec<i64>,
    pub currency: String,
    pub auto_approve_receipts: bool,
    pub auto_approve_max_fraud_score: f64,
    pub fraud_detection_enabled: bool,
    pub max_daily_transactions: i64,
    pub max_daily_amount: Decimal,
    pub min_topup: Decimal,
    pub max_topup: Decimal,
    pub referral_percent: Decimal,
    pub referral_fixed: Decimal,
    pub intent_ttl_hours: i64,
    pub sweep_interval_secs: u64,
    pub db_max_connections: u32,
}

impl LedgerConfig {
    pub fn from_env() -> Result<Self> {
        if let Err(e) = dotenvy::dotenv() {
            tracing::debug!("No .env file loaded: {}", e);
        }
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let database_url = lookup("DATABASE_URL")
            .ok_or_else(|| LedgerError::Config("DATABASE_URL must be set".into()))?;
        if !database_url.starts_with("postgres://") && !database_url.starts_with("postgresql://") {
            return Err(LedgerError::Config(
                "DATABASE_URL must start with postgres:// or postgresql://".into(),
            ));
        }

        let admin_ids = match lookup("ADMIN_IDS") {
            Some(raw) => raw
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| {
                    s.parse::<i64>()
                        .map_err(|_| LedgerError::Config(format!("Invalid admin id '{}'", s)))
                })
                .collect::<Result<Vec<_>>>()?,
            None => Vec::new(),
        };

        let config = Self {
            database_url,
            admin_ids,
            currency: lookup("CURRENCY").unwrap_or_else(|| "IRR".to_string()),
            auto_approve_receipts: parse_or(&lookup, "AUTO_APPROVE_RECEIPTS", false)?,
            auto_approve_max_fraud_score: parse_or(&lookup, "AUTO_APPROVE_MAX_FRAUD_SCORE", 0.3)?,
            fraud_detection_enabled: parse_or(&lookup, "FRAUD_DETECTION_ENABLED", true)?,
            max_daily_transactions: parse_or(&lookup, "MAX_DAILY_TRANSACTIONS", 10)?,
            max_daily_amount: parse_or(&lookup, "MAX_DAILY_AMOUNT", Decimal::from(50_000_000))?,
            min_topup: parse_or(&lookup, "MIN_TOPUP_AMOUNT", Decimal::from(50_000))?,
            max_topup: parse_or(&lookup, "MAX_TOPUP_AMOUNT", Decimal::from(50_000_000))?,
            referral_percent: parse_or(&lookup, "REFERRAL_PERCENT", Decimal::ZERO)?,
            referral_fixed: parse_or(&lookup, "REFERRAL_FIXED", Decimal::ZERO)?,
            intent_ttl_hours: parse_or(&lookup, "INTENT_TTL_HOURS", 24)?,
            sweep_interval_secs: parse_or(&lookup, "SWEEP_INTERVAL_SECS", 300)?,
            db_max_connections: parse_or(&lookup, "DB_MAX_CONNECTIONS", 20)?,
        };

        if config.min_topup > config.max_topup {
            return Err(LedgerError::Config(
                "MIN_TOPUP_AMOUNT exceeds MAX_TOPUP_AMOUNT".into(),
            ));
        }
        if !(0.0..=1.0).contains(&config.auto_approve_max_fraud_score) {
            return Err(LedgerError::Config(
                "AUTO_APPROVE_MAX_FRAUD_SCORE must be within [0, 1]".into(),
            ));
        }

        if config.max_daily_transactions < 1 || config.max_daily_amount <= Decimal::ZERO {
            return Err(LedgerError::Config(
                "MAX_DAILY_TRANSACTIONS and MAX_DAILY_AMOUNT must be positive".into(),
            ));
        }

        Ok(config)
    }

    pub fn daily_limits(&self) -> DailyLimits {
        DailyLimits {
            max_transactions: self.max_daily_transactions,
            max_amount: self.max_daily_amount,
        }
    }
}

fn parse_or<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T> {
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| LedgerError::Config(format!("Invalid value for {}: '{}'", key, raw))),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply() {
        let cfg = LedgerConfig::from_lookup(lookup_from(&[(
            "DATABASE_URL",
            "postgres://localhost/ledger",
        )]))
        .unwrap();
        assert_eq!(cfg.currency, "IRR");
        assert!(!cfg.auto_approve_receipts);
        assert!(cfg.fraud_detection_enabled);
        assert_eq!(cfg.min_topup, Decimal::from(50_000));
        assert_eq!(cfg.max_topup, Decimal::from(50_000_000));
        assert_eq!(cfg.intent_ttl_hours, 24);
        assert!(cfg.admin_ids.is_empty());
        assert_eq!(
            cfg.daily_limits(),
            DailyLimits {
                max_transactions: 10,
                max_amount: Decimal::from(50_000_000),
            }
        );
    }

    #[test]
    fn admin_list_is_parsed() {
        let cfg = LedgerConfig::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgresql://db/ledger"),
            ("ADMIN_IDS", "11, 22,,33"),
            ("AUTO_APPROVE_RECEIPTS", "true"),
        ]))
        .unwrap();
        assert_eq!(cfg.admin_ids, vec![11, 22, 33]);
        assert!(cfg.auto_approve_receipts);
    }

    #[test]
    fn rejects_non_postgres_url() {
        let err = LedgerConfig::from_lookup(lookup_from(&[("DATABASE_URL", "sqlite://x.db")]))
            .unwrap_err();
        assert!(matches!(err, LedgerError::Config(_)));
    }

    #[test]
    fn rejects_garbage_numbers() {
        let err = LedgerConfig::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://db"),
            ("MIN_TOPUP_AMOUNT", "lots"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("MIN_TOPUP_AMOUNT"));
    }

    #[test]
    fn daily_limits_must_be_positive() {
        let cfg = LedgerConfig::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://db"),
            ("MAX_DAILY_TRANSACTIONS", "3"),
            ("MAX_DAILY_AMOUNT", "2500000"),
        ]))
        .unwrap();
        assert_eq!(cfg.daily_limits().max_transactions, 3);
        assert_eq!(cfg.daily_limits().max_amount, Decimal::from(2_500_000));

        let err = LedgerConfig::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://db"),
            ("MAX_DAILY_TRANSACTIONS", "0"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("MAX_DAILY_TRANSACTIONS"));
    }
}
