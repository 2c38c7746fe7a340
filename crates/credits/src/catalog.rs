//! Product catalog
//!
//! Single source of truth for what can be purchased, independent of Stripe's
//! own identifiers. Definitions live in code; the Stripe product/price ids
//! they map to are persisted through [`CatalogStore`] by the catalog sync
//! (never by mutating the definitions in place).

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use stripe::Currency;
use time::OffsetDateTime;

use crate::error::{CreditError, CreditResult};
use crate::ledger::CreditKind;

/// Categorization of catalog entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProductKind {
    /// One-time purchase granting word credits
    WordCreditPack,
    /// One-time purchase granting image credits
    ImageCreditPack,
    /// Recurring subscription tier
    SubscriptionTier,
    /// Other one-time purchase (no credits attached)
    OneTime,
}

impl ProductKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProductKind::WordCreditPack => "word_credit_pack",
            ProductKind::ImageCreditPack => "image_credit_pack",
            ProductKind::SubscriptionTier => "subscription_tier",
            ProductKind::OneTime => "one_time",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "word_credit_pack" => Some(ProductKind::WordCreditPack),
            "image_credit_pack" => Some(ProductKind::ImageCreditPack),
            "subscription_tier" => Some(ProductKind::SubscriptionTier),
            "one_time" => Some(ProductKind::OneTime),
            _ => None,
        }
    }

    /// The credit kind this product grants on fulfillment, if any
    pub fn credit_kind(&self) -> Option<CreditKind> {
        match self {
            ProductKind::WordCreditPack => Some(CreditKind::Word),
            ProductKind::ImageCreditPack => Some(CreditKind::Image),
            ProductKind::SubscriptionTier | ProductKind::OneTime => None,
        }
    }
}

impl std::fmt::Display for ProductKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An internal catalog entry
///
/// `internal_id` is the stable join key to Stripe: it is stamped into product
/// and price metadata on sync, and purchases reference it instead of Stripe's
/// own ids so renames never create duplicates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductDefinition {
    pub internal_id: String,
    pub name: String,
    pub description: String,
    /// Price in the smallest currency unit (pence for GBP)
    pub unit_price_minor: i64,
    pub currency: Currency,
    pub kind: ProductKind,
    /// Words or images granted on fulfillment; None for subscription tiers
    pub units_granted: Option<i64>,
    /// Populated by the catalog sync; None until first sync
    pub stripe_product_id: Option<String>,
    pub stripe_price_id: Option<String>,
    pub active: bool,
}

impl ProductDefinition {
    fn credit_pack(
        internal_id: &str,
        name: &str,
        description: &str,
        price_pence: i64,
        kind: ProductKind,
        units: i64,
    ) -> Self {
        Self {
            internal_id: internal_id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            unit_price_minor: price_pence,
            currency: Currency::GBP,
            kind,
            units_granted: Some(units),
            stripe_product_id: None,
            stripe_price_id: None,
            active: true,
        }
    }

    fn tier(internal_id: &str, name: &str, description: &str, price_pence: i64) -> Self {
        Self {
            internal_id: internal_id.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            unit_price_minor: price_pence,
            currency: Currency::GBP,
            kind: ProductKind::SubscriptionTier,
            units_granted: None,
            stripe_product_id: None,
            stripe_price_id: None,
            active: true,
        }
    }
}

/// All built-in product definitions
pub fn builtin_definitions() -> Vec<ProductDefinition> {
    vec![
        // Word count add-ons
        ProductDefinition::credit_pack(
            "words_300",
            "300 Extra Words",
            "Add 300 words to your press release. Perfect for adding more detail to your story.",
            400,
            ProductKind::WordCreditPack,
            300,
        ),
        ProductDefinition::credit_pack(
            "words_600",
            "600 Extra Words",
            "Add 600 words to your press release. Ideal for comprehensive coverage.",
            800,
            ProductKind::WordCreditPack,
            600,
        ),
        ProductDefinition::credit_pack(
            "words_900",
            "900 Extra Words",
            "Add 900 words to your press release. Maximum flexibility for detailed announcements.",
            1_200,
            ProductKind::WordCreditPack,
            900,
        ),
        // Image pack add-ons
        ProductDefinition::credit_pack(
            "image_single",
            "Single Image Credit",
            "Generate 1 additional AI-powered professional image for your content.",
            399,
            ProductKind::ImageCreditPack,
            1,
        ),
        ProductDefinition::credit_pack(
            "image_pack_5",
            "5 Image Credits",
            "Generate 5 additional AI-powered professional images. Save £5 compared to buying individually.",
            1_499,
            ProductKind::ImageCreditPack,
            5,
        ),
        ProductDefinition::credit_pack(
            "image_pack_10",
            "10 Image Credits",
            "Generate 10 additional AI-powered professional images. Save £15 compared to buying individually.",
            2_499,
            ProductKind::ImageCreditPack,
            10,
        ),
        // Subscription tiers
        ProductDefinition::tier(
            "tier_starter",
            "Starter",
            "AI press release generation, social distribution, and basic media lists.",
            4_900,
        ),
        ProductDefinition::tier(
            "tier_pro",
            "Pro",
            "Everything in Starter plus the AI assistant, advanced media lists, and Campaign Lab.",
            9_900,
        ),
        ProductDefinition::tier(
            "tier_scale",
            "Scale",
            "Everything in Pro plus unlimited releases, white-label options, and API access.",
            34_900,
        ),
    ]
}

/// Persisted Stripe refs for one catalog entry
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct CatalogRefs {
    pub internal_id: String,
    pub stripe_product_id: String,
    pub stripe_price_id: String,
    pub active: bool,
    pub synced_at: OffsetDateTime,
}

/// Durable store for internal-id -> Stripe-id mappings
///
/// The write path used by the catalog sync. A Postgres row per internal id,
/// upserted after each successful item sync.
#[derive(Clone)]
pub struct CatalogStore {
    pool: PgPool,
}

impl CatalogStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Record the Stripe refs for a definition after a successful sync
    pub async fn upsert(
        &self,
        internal_id: &str,
        stripe_product_id: &str,
        stripe_price_id: &str,
        active: bool,
    ) -> CreditResult<()> {
        sqlx::query(
            r#"
            INSERT INTO product_catalog (internal_id, stripe_product_id, stripe_price_id, active, synced_at)
            VALUES ($1, $2, $3, $4, NOW())
            ON CONFLICT (internal_id) DO UPDATE SET
                stripe_product_id = EXCLUDED.stripe_product_id,
                stripe_price_id = EXCLUDED.stripe_price_id,
                active = EXCLUDED.active,
                synced_at = NOW()
            "#,
        )
        .bind(internal_id)
        .bind(stripe_product_id)
        .bind(stripe_price_id)
        .bind(active)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn load(&self, internal_id: &str) -> CreditResult<Option<CatalogRefs>> {
        let refs: Option<CatalogRefs> = sqlx::query_as(
            "SELECT internal_id, stripe_product_id, stripe_price_id, active, synced_at
             FROM product_catalog
             WHERE internal_id = $1",
        )
        .bind(internal_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(refs)
    }

    pub async fn load_all(&self) -> CreditResult<Vec<CatalogRefs>> {
        let refs: Vec<CatalogRefs> = sqlx::query_as(
            "SELECT internal_id, stripe_product_id, stripe_price_id, active, synced_at
             FROM product_catalog
             ORDER BY internal_id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(refs)
    }
}

/// Read surface over the built-in definitions merged with persisted refs
#[derive(Clone)]
pub struct ProductCatalog {
    store: CatalogStore,
}

impl ProductCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self {
            store: CatalogStore::new(pool),
        }
    }

    pub fn store(&self) -> &CatalogStore {
        &self.store
    }

    /// Look up one definition by internal id, with Stripe refs filled in if
    /// the entry has been synced.
    pub async fn definition(&self, internal_id: &str) -> CreditResult<ProductDefinition> {
        let mut def = builtin_definitions()
            .into_iter()
            .find(|d| d.internal_id == internal_id)
            .ok_or_else(|| CreditError::NotFound(format!("product '{}'", internal_id)))?;

        if let Some(refs) = self.store.load(internal_id).await? {
            def.stripe_product_id = Some(refs.stripe_product_id);
            def.stripe_price_id = Some(refs.stripe_price_id);
        }

        Ok(def)
    }

    /// List active definitions, optionally filtered by kind
    pub async fn list_active(&self, kind: Option<ProductKind>) -> CreditResult<Vec<ProductDefinition>> {
        let refs = self.store.load_all().await?;

        let defs = builtin_definitions()
            .into_iter()
            .filter(|d| d.active)
            .filter(|d| kind.is_none_or(|k| d.kind == k))
            .map(|mut d| {
                if let Some(r) = refs.iter().find(|r| r.internal_id == d.internal_id) {
                    d.stripe_product_id = Some(r.stripe_product_id.clone());
                    d.stripe_price_id = Some(r.stripe_price_id.clone());
                }
                d
            })
            .collect();

        Ok(defs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_internal_ids_are_unique() {
        let defs = builtin_definitions();
        let mut ids: Vec<&str> = defs.iter().map(|d| d.internal_id.as_str()).collect();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), defs.len(), "duplicate internal_id in catalog");
    }

    #[test]
    fn test_credit_packs_grant_positive_units() {
        for def in builtin_definitions() {
            match def.kind {
                ProductKind::WordCreditPack | ProductKind::ImageCreditPack => {
                    assert!(
                        def.units_granted.is_some_and(|u| u > 0),
                        "{} must grant units",
                        def.internal_id
                    );
                }
                ProductKind::SubscriptionTier | ProductKind::OneTime => {
                    assert!(def.units_granted.is_none());
                }
            }
        }
    }

    #[test]
    fn test_kind_round_trip() {
        for kind in [
            ProductKind::WordCreditPack,
            ProductKind::ImageCreditPack,
            ProductKind::SubscriptionTier,
            ProductKind::OneTime,
        ] {
            assert_eq!(ProductKind::from_str(kind.as_str()), Some(kind));
        }
        assert_eq!(ProductKind::from_str("mystery"), None);
    }

    #[test]
    fn test_word_pack_credit_kind() {
        assert_eq!(
            ProductKind::WordCreditPack.credit_kind(),
            Some(CreditKind::Word)
        );
        assert_eq!(ProductKind::SubscriptionTier.credit_kind(), None);
    }

    #[test]
    fn test_prices_are_positive_pence() {
        for def in builtin_definitions() {
            assert!(def.unit_price_minor > 0, "{}", def.internal_id);
            assert_eq!(def.currency, Currency::GBP);
        }
    }
}
