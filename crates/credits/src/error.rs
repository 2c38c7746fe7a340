//! Error types for the credits crate

use thiserror::Error;

/// Errors from credit, catalog, and checkout operations
#[derive(Debug, Error)]
pub enum CreditError {
    /// Unknown internal product id or owner
    #[error("Not found: {0}")]
    NotFound(String),

    /// Catalog entry has never been synced to Stripe, so there is no price
    /// to check out against
    #[error("No Stripe price for product '{0}' - run a catalog sync first")]
    MissingPrice(String),

    /// Session verification attempted before payment was confirmed
    #[error("Payment not completed for session {0}")]
    PaymentNotCompleted(String),

    /// Entitlement check for an owner with no subscription row
    #[error("No active subscription found for owner {0}")]
    NoActiveSubscription(String),

    /// Stripe API failure (network, auth, rate limit). Retryable with backoff.
    #[error("Stripe API error: {0}")]
    StripeApi(String),

    /// Database failure
    #[error("Database error: {0}")]
    Database(String),

    /// Missing or invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Caller supplied invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Internal invariant violation
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<stripe::StripeError> for CreditError {
    fn from(err: stripe::StripeError) -> Self {
        CreditError::StripeApi(err.to_string())
    }
}

impl From<sqlx::Error> for CreditError {
    fn from(err: sqlx::Error) -> Self {
        CreditError::Database(err.to_string())
    }
}

/// Result type for credit operations
pub type CreditResult<T> = Result<T, CreditError>;
