//! Stripe client wrapper and configuration

use crate::error::{CreditError, CreditResult};

/// Stripe configuration loaded from the environment
#[derive(Debug, Clone)]
pub struct StripeConfig {
    /// Secret API key (sk_live_... / sk_test_...)
    pub secret_key: String,
    /// Webhook signing secret (whsec_...), empty when webhooks are unused
    pub webhook_secret: String,
}

impl StripeConfig {
    /// Load configuration from environment variables.
    ///
    /// `STRIPE_MANAGEMENT_API_KEY` takes priority over `STRIPE_SECRET_KEY`
    /// so catalog sync can run with a restricted management key.
    pub fn from_env() -> CreditResult<Self> {
        let secret_key = std::env::var("STRIPE_MANAGEMENT_API_KEY")
            .or_else(|_| std::env::var("STRIPE_SECRET_KEY"))
            .map_err(|_| {
                CreditError::Config(
                    "STRIPE_MANAGEMENT_API_KEY or STRIPE_SECRET_KEY must be set".to_string(),
                )
            })?;

        let webhook_secret = std::env::var("STRIPE_WEBHOOK_SECRET").unwrap_or_default();

        Ok(Self {
            secret_key,
            webhook_secret,
        })
    }
}

/// Shared Stripe client handle
///
/// Cheap to clone; every service holds its own copy.
#[derive(Clone)]
pub struct StripeClient {
    client: stripe::Client,
    config: StripeConfig,
}

impl StripeClient {
    pub fn new(config: StripeConfig) -> Self {
        let client = stripe::Client::new(config.secret_key.clone());
        Self { client, config }
    }

    pub fn from_env() -> CreditResult<Self> {
        Ok(Self::new(StripeConfig::from_env()?))
    }

    /// Get the underlying Stripe client for API calls
    pub fn inner(&self) -> &stripe::Client {
        &self.client
    }

    pub fn config(&self) -> &StripeConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_from_explicit_config() {
        let client = StripeClient::new(StripeConfig {
            secret_key: "sk_test_mock_key".to_string(),
            webhook_secret: String::new(),
        });
        assert_eq!(client.config().secret_key, "sk_test_mock_key");
    }
}
