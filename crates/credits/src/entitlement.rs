//! Entitlement resolution
//!
//! Answers "can this generation request proceed?" by combining the owner's
//! tier allowance with their purchased credit balance. Deciding is separate
//! from spending: the resolver never deducts. The caller deducts the overflow
//! from the ledger only after the generation succeeds.

use pressroom_shared::SubscriptionTier;
use serde::Serialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::{CreditError, CreditResult};
use crate::ledger::{CreditKind, CreditLedger};

/// Outcome of an allowance check
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Allowance {
    pub allowed: bool,
    /// Units included by the subscription tier
    pub tier_limit: i64,
    /// Purchased credits currently consumable
    pub purchased_available: i64,
    /// Units the caller must deduct from the ledger on success (0 when the
    /// request fits the tier allowance)
    pub credits_needed: i64,
    /// Minimum additional units to purchase; None when allowed
    pub shortfall: Option<i64>,
}

/// Pure allowance math: tier allowance first, purchased credits cover the
/// overflow, anything beyond that is the shortfall.
pub fn evaluate(tier_limit: i64, purchased_available: i64, requested_units: i64) -> Allowance {
    if requested_units <= tier_limit {
        return Allowance {
            allowed: true,
            tier_limit,
            purchased_available,
            credits_needed: 0,
            shortfall: None,
        };
    }

    let overflow = requested_units - tier_limit;
    if overflow <= purchased_available {
        return Allowance {
            allowed: true,
            tier_limit,
            purchased_available,
            credits_needed: overflow,
            shortfall: None,
        };
    }

    Allowance {
        allowed: false,
        tier_limit,
        purchased_available,
        credits_needed: overflow,
        shortfall: Some(overflow - purchased_available),
    }
}

/// Tier allowance plus purchased balance for display ("words available")
#[derive(Debug, Clone, Serialize)]
pub struct LimitSummary {
    pub tier_limit: i64,
    pub purchased_available: i64,
    pub total_available: i64,
}

/// Entitlement resolver service
#[derive(Clone)]
pub struct EntitlementResolver {
    pool: PgPool,
    ledger: CreditLedger,
}

impl EntitlementResolver {
    pub fn new(pool: PgPool, ledger: CreditLedger) -> Self {
        Self { pool, ledger }
    }

    /// The owner's current subscription tier
    async fn tier_for(&self, owner_id: Uuid) -> CreditResult<SubscriptionTier> {
        let plan: Option<(String,)> = sqlx::query_as(
            "SELECT plan FROM subscriptions
             WHERE owner_id = $1 AND status = 'active'
             LIMIT 1",
        )
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await?;

        let (plan,) =
            plan.ok_or_else(|| CreditError::NoActiveSubscription(owner_id.to_string()))?;

        plan.parse().map_err(|_| {
            CreditError::Internal(format!(
                "subscription row for {} has unknown plan '{}'",
                owner_id, plan
            ))
        })
    }

    fn tier_limit(tier: SubscriptionTier, kind: CreditKind) -> i64 {
        match kind {
            CreditKind::Word => tier.word_limit(),
            CreditKind::Image => tier.image_limit(),
        }
    }

    /// Check whether a request of `requested_units` is allowed.
    ///
    /// Read-only; the caller is expected to deduct `credits_needed` from the
    /// ledger after the generation succeeds.
    pub async fn check_allowance(
        &self,
        owner_id: Uuid,
        requested_units: i64,
        kind: CreditKind,
    ) -> CreditResult<Allowance> {
        let tier = self.tier_for(owner_id).await?;
        let tier_limit = Self::tier_limit(tier, kind);
        let purchased = self.ledger.available_balance(owner_id, kind).await?;

        let allowance = evaluate(tier_limit, purchased, requested_units);

        tracing::debug!(
            owner_id = %owner_id,
            kind = %kind,
            tier = %tier,
            requested = requested_units,
            allowed = allowance.allowed,
            shortfall = ?allowance.shortfall,
            "Allowance checked"
        );

        Ok(allowance)
    }

    /// Tier limit + purchased balance for a credit kind
    pub async fn limit_summary(
        &self,
        owner_id: Uuid,
        kind: CreditKind,
    ) -> CreditResult<LimitSummary> {
        let tier = self.tier_for(owner_id).await?;
        let tier_limit = Self::tier_limit(tier, kind);
        let purchased = self.ledger.available_balance(owner_id, kind).await?;

        Ok(LimitSummary {
            tier_limit,
            purchased_available: purchased,
            total_available: tier_limit + purchased,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_within_tier_limit_needs_no_credits() {
        // Tier limit 300, no purchased credits, request exactly 300
        let allowance = evaluate(300, 0, 300);
        assert!(allowance.allowed);
        assert_eq!(allowance.credits_needed, 0);
        assert_eq!(allowance.shortfall, None);
    }

    #[test]
    fn test_overflow_covered_by_purchased_credits() {
        // Tier limit 300, 600-word pack active, request 700
        let allowance = evaluate(300, 600, 700);
        assert!(allowance.allowed);
        assert_eq!(allowance.credits_needed, 400);
        assert_eq!(allowance.shortfall, None);
    }

    #[test]
    fn test_shortfall_reported() {
        // Requested = tier limit + 50 with only 30 purchased -> short 20
        let allowance = evaluate(300, 30, 350);
        assert!(!allowance.allowed);
        assert_eq!(allowance.purchased_available, 30);
        assert_eq!(allowance.shortfall, Some(20));
    }

    #[test]
    fn test_no_credits_at_all() {
        let allowance = evaluate(300, 0, 301);
        assert!(!allowance.allowed);
        assert_eq!(allowance.shortfall, Some(1));
    }

    #[test]
    fn test_exact_overflow_coverage() {
        let allowance = evaluate(300, 400, 700);
        assert!(allowance.allowed);
        assert_eq!(allowance.credits_needed, 400);
    }
}
