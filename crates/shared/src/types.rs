//! Core platform types shared across crates.

use serde::{Deserialize, Serialize};

/// Subscription tiers for the Pressroom platform.
///
/// Tier names are stored lowercase in the `subscriptions.plan` column and in
/// Stripe metadata, so `as_str`/`from_str` round-trip through those values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionTier {
    /// Starter: £49/mo, up to 300 words per release, 1 image per month
    Starter,
    /// Pro: £99/mo, up to 600 words per release, 5 images per month
    Pro,
    /// Scale: £349/mo, up to 900 words per release, 15 images per month
    Scale,
}

impl SubscriptionTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionTier::Starter => "starter",
            SubscriptionTier::Pro => "pro",
            SubscriptionTier::Scale => "scale",
        }
    }

    /// Words included per press-release generation before purchased credits
    /// are consumed.
    pub fn word_limit(&self) -> i64 {
        match self {
            SubscriptionTier::Starter => 300,
            SubscriptionTier::Pro => 600,
            SubscriptionTier::Scale => 900,
        }
    }

    /// AI image generations included per month before purchased credits are
    /// consumed.
    pub fn image_limit(&self) -> i64 {
        match self {
            SubscriptionTier::Starter => 1,
            SubscriptionTier::Pro => 5,
            SubscriptionTier::Scale => 15,
        }
    }

    /// Monthly subscription price in pence (GBP).
    pub fn monthly_price_pence(&self) -> i64 {
        match self {
            SubscriptionTier::Starter => 4_900,
            SubscriptionTier::Pro => 9_900,
            SubscriptionTier::Scale => 34_900,
        }
    }
}

impl std::fmt::Display for SubscriptionTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error returned when parsing an unknown tier name.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown subscription tier: {0}")]
pub struct ParseTierError(pub String);

impl std::str::FromStr for SubscriptionTier {
    type Err = ParseTierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "starter" => Ok(SubscriptionTier::Starter),
            "pro" => Ok(SubscriptionTier::Pro),
            "scale" => Ok(SubscriptionTier::Scale),
            other => Err(ParseTierError(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_round_trip() {
        for tier in [
            SubscriptionTier::Starter,
            SubscriptionTier::Pro,
            SubscriptionTier::Scale,
        ] {
            let parsed: SubscriptionTier = tier.as_str().parse().unwrap();
            assert_eq!(parsed, tier);
        }
    }

    #[test]
    fn test_unknown_tier_rejected() {
        assert!("enterprise".parse::<SubscriptionTier>().is_err());
    }

    #[test]
    fn test_word_limits_increase_with_tier() {
        assert!(SubscriptionTier::Starter.word_limit() < SubscriptionTier::Pro.word_limit());
        assert!(SubscriptionTier::Pro.word_limit() < SubscriptionTier::Scale.word_limit());
    }
}
