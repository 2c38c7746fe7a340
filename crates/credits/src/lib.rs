// Credits crate clippy configuration
// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Pressroom Credits Module
//!
//! Handles the purchased-credit ledger and its Stripe integration.
//!
//! ## Features
//!
//! - **Product Catalog**: Built-in word/image credit packs and subscription
//!   tiers, with durable Stripe product/price refs
//! - **Catalog Sync**: Idempotent reconciliation of the catalog into Stripe,
//!   matched by internal-id metadata
//! - **Checkout**: One-time payment sessions for credit packs
//! - **Credit Ledger**: FIFO, expiring, all-or-nothing credit accounting
//! - **Entitlements**: Tier limits combined with purchased credits
//! - **Fulfillment**: Exactly-once granting from webhooks or session lookup

pub mod catalog;
pub mod checkout;
pub mod client;
pub mod entitlement;
pub mod error;
pub mod fulfillment;
pub mod ledger;
pub mod sync;


// Catalog
pub use catalog::{
    builtin_definitions, CatalogRefs, CatalogStore, ProductCatalog, ProductDefinition, ProductKind,
};

// Checkout
pub use checkout::{Buyer, CheckoutMetadata, CheckoutResponse, CheckoutService};

// Client
pub use client::{StripeClient, StripeConfig};

// Entitlement
pub use entitlement::{evaluate, Allowance, EntitlementResolver, LimitSummary};

// Error
pub use error::{CreditError, CreditResult};

// Fulfillment
pub use fulfillment::{FulfillmentOutcome, FulfillmentService};

// Ledger
pub use ledger::{
    available_total, plan_deduction, CreditGrant, CreditKind, CreditLedger, ExpiryPolicy,
    GrantOptions,
};

// Sync
pub use sync::{
    CatalogSynchronizer, SyncAction, SyncError, SyncOutcome, SyncReport, SyncedProduct,
};

use sqlx::PgPool;

/// Apply this crate's embedded migrations
pub async fn run_migrations(pool: &PgPool) -> CreditResult<()> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| CreditError::Database(e.to_string()))
}

/// Main credit service that combines all credit functionality
pub struct CreditService {
    pub catalog: ProductCatalog,
    pub sync: CatalogSynchronizer,
    pub checkout: CheckoutService,
    pub ledger: CreditLedger,
    pub entitlement: EntitlementResolver,
    pub fulfillment: FulfillmentService,
}

impl CreditService {
    /// Create a new credit service from environment variables
    pub fn from_env(pool: PgPool) -> CreditResult<Self> {
        Ok(Self::new(StripeConfig::from_env()?, pool))
    }

    /// Create a new credit service with explicit config
    pub fn new(config: StripeConfig, pool: PgPool) -> Self {
        let webhook_secret =
            (!config.webhook_secret.is_empty()).then(|| config.webhook_secret.clone());
        let stripe = StripeClient::new(config);

        let catalog = ProductCatalog::new(pool.clone());
        let ledger = CreditLedger::new(pool.clone());
        let checkout = CheckoutService::new(stripe.clone(), catalog.clone());

        Self {
            catalog: catalog.clone(),
            sync: CatalogSynchronizer::new(stripe, catalog),
            checkout: checkout.clone(),
            ledger: ledger.clone(),
            entitlement: EntitlementResolver::new(pool.clone(), ledger.clone()),
            fulfillment: FulfillmentService::new(pool, ledger, checkout, webhook_secret),
        }
    }
}
