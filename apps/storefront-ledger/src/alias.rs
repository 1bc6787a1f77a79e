use anyhow::Result;
use async_trait::async_trait;
use rand::Rng;
use sqlx::PgConnection;
use std::collections::HashSet;
use storefront_db::repositories::intent_repo::PurchaseIntentRepository;

pub const MAX_ALIAS_ATTEMPTS: usize = 50;
pub const FALLBACK_SUFFIX: u8 = 99;
const MAX_BASE_LEN: usize = 60;

/// Set of aliases already used by one account.
#[async_trait]
pub trait AliasSpace: Send {
    async fn is_taken(&mut self, alias: &str) -> Result<bool>;
}

pub struct AccountAliases<'c> {
    pub conn: &'c mut PgConnection,
    pub account_id: i64,
}

#[async_trait]
impl AliasSpace for AccountAliases<'_> {
    async fn is_taken(&mut self, alias: &str) -> Result<bool> {
        PurchaseIntentRepository::alias_exists(self.conn, self.account_id, alias).await
    }
}

#[async_trait]
impl AliasSpace for HashSet<String> {
    async fn is_taken(&mut self, alias: &str) -> Result<bool> {
        Ok(self.contains(alias))
    }
}

/// Lowercase, dash-separated base alias, never empty.
pub fn normalize_base(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.trim().chars() {
        if c.is_alphanumeric() {
            out.extend(c.to_lowercase());
        } else if !out.ends_with('-') && !out.is_empty() {
            out.push('-');
        }
    }
    let capped: String = out.chars().take(MAX_BASE_LEN).collect();
    let trimmed = capped.trim_end_matches('-');
    if trimmed.is_empty() {
        "service".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Returns `base` when free, otherwise `base-NN` with a random two-digit
/// suffix, retried up to [`MAX_ALIAS_ATTEMPTS`] times. After that the
/// fixed `base-99` is returned unchecked and the unique index decides.
pub async fn resolve_alias<S, R>(space: &mut S, base: &str, rng: &mut R) -> Result<String>
where
    S: AliasSpace + ?Sized,
    R: Rng + Send,
{
    if !space.is_taken(base).await? {
        return Ok(base.to_string());
    }

    for _ in 0..MAX_ALIAS_ATTEMPTS {
        let suffix: u8 = rng.random_range(10..=99);
        let candidate = format!("{}-{}", base, suffix);
        if !space.is_taken(&candidate).await? {
            return Ok(candidate);
        }
    }

    tracing::warn!("Alias space for '{}' exhausted, falling back to fixed suffix", base);
    Ok(format!("{}-{}", base, FALLBACK_SUFFIX))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn base_is_slugged() {
        assert_eq!(normalize_base("  Gold Plan / 30 Days "), "gold-plan-30-days");
        assert_eq!(normalize_base("!!!"), "service");
    }

    #[tokio::test]
    async fn free_base_is_used_as_is() {
        let mut taken: HashSet<String> = HashSet::new();
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(resolve_alias(&mut taken, "vpn", &mut rng).await.unwrap(), "vpn");
    }

    #[tokio::test]
    async fn repeated_requests_get_distinct_aliases() {
        let mut taken: HashSet<String> = HashSet::new();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..20 {
            let alias = resolve_alias(&mut taken, "vpn", &mut rng).await.unwrap();
            assert!(taken.insert(alias));
        }
        assert_eq!(taken.len(), 20);
    }

    #[tokio::test]
    async fn exhausted_space_falls_back_to_fixed_suffix() {
        let mut taken: HashSet<String> = (10..=98).map(|n| format!("vpn-{}", n)).collect();
        taken.insert("vpn".to_string());
        let mut rng = StdRng::seed_from_u64(3);
        // Every random pick below 99 collides; 99 itself may still be drawn.
        let alias = resolve_alias(&mut taken, "vpn", &mut rng).await.unwrap();
        assert_eq!(alias, "vpn-99");

        taken.insert("vpn-99".to_string());
        let alias = resolve_alias(&mut taken, "vpn", &mut rng).await.unwrap();
        assert_eq!(alias, "vpn-99");
    }
}
