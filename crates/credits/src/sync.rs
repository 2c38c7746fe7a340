//! Stripe catalog synchronization
//!
//! Reconciles the built-in product definitions against Stripe's catalog:
//! creates missing products/prices, updates existing ones by internal-id
//! metadata lookup, and persists the resulting Stripe ids through
//! [`CatalogStore`]. Products are matched by `metadata['internal_id']`, not
//! by name, so renaming a product never creates a duplicate. Prices are
//! treated as immutable: a price change means a new price object, never an
//! in-place edit. Nothing is ever deleted remotely, only deactivated.

use serde::Serialize;
use stripe::{
    CreatePrice, CreatePriceRecurring, CreatePriceRecurringInterval, CreateProduct, IdOrCreate,
    ListPrices, ListProducts, Price, Product, ProductId, ProductSearchParams, UpdateProduct,
};
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::Retry;

use crate::catalog::{CatalogStore, ProductCatalog, ProductDefinition, ProductKind};
use crate::client::StripeClient;
use crate::error::{CreditError, CreditResult};

/// What a single item sync did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncAction {
    Created,
    Updated,
}

/// Result of syncing one definition
#[derive(Debug, Clone, Serialize)]
pub struct SyncOutcome {
    pub action: SyncAction,
    pub stripe_product_id: String,
    pub stripe_price_id: String,
}

/// A per-item failure collected into the batch report
#[derive(Debug, Clone, Serialize)]
pub struct SyncError {
    pub internal_id: String,
    pub message: String,
}

/// One successfully synced product in the batch report
#[derive(Debug, Clone, Serialize)]
pub struct SyncedProduct {
    pub internal_id: String,
    pub name: String,
    pub stripe_product_id: String,
    pub stripe_price_id: String,
}

/// Aggregated outcome of a full catalog sync
#[derive(Debug, Clone, Default, Serialize)]
pub struct SyncReport {
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
    pub errors: Vec<SyncError>,
    pub products: Vec<SyncedProduct>,
}

/// Catalog synchronizer service
#[derive(Clone)]
pub struct CatalogSynchronizer {
    stripe: StripeClient,
    catalog: ProductCatalog,
}

impl CatalogSynchronizer {
    pub fn new(stripe: StripeClient, catalog: ProductCatalog) -> Self {
        Self { stripe, catalog }
    }

    fn store(&self) -> &CatalogStore {
        self.catalog.store()
    }

    /// Metadata stamped on both the product and its price, used for lookup
    /// on subsequent syncs
    fn product_metadata(definition: &ProductDefinition) -> stripe::Metadata {
        stripe::Metadata::from([
            ("internal_id".to_string(), definition.internal_id.clone()),
            ("kind".to_string(), definition.kind.as_str().to_string()),
        ])
    }

    /// Find the Stripe product for a definition.
    ///
    /// The persisted ref is tried first (covers providers/accounts where
    /// metadata search lags or is unavailable), then a metadata search by
    /// internal id.
    async fn find_existing(&self, definition: &ProductDefinition) -> CreditResult<Option<Product>> {
        if let Some(refs) = self.store().load(&definition.internal_id).await? {
            let product_id: ProductId = refs
                .stripe_product_id
                .parse()
                .map_err(|e| CreditError::Internal(format!("stored product id is invalid: {}", e)))?;

            match Product::retrieve(self.stripe.inner(), &product_id, &[]).await {
                Ok(product) => return Ok(Some(product)),
                Err(e) => {
                    // Stored ref may be stale (e.g. product deleted in the
                    // dashboard); fall through to the metadata search
                    tracing::warn!(
                        internal_id = %definition.internal_id,
                        stripe_product_id = %refs.stripe_product_id,
                        error = %e,
                        "Stored Stripe ref no longer resolves, falling back to metadata search"
                    );
                }
            }
        }

        let search = Product::search(
            self.stripe.inner(),
            ProductSearchParams {
                query: format!("metadata['internal_id']:'{}'", definition.internal_id),
                limit: Some(1),
                ..Default::default()
            },
        )
        .await?;

        Ok(search.data.into_iter().next())
    }

    /// The product's current active price, if any
    async fn active_price(&self, product_id: &ProductId) -> CreditResult<Option<Price>> {
        let prices = Price::list(
            self.stripe.inner(),
            &ListPrices {
                product: Some(IdOrCreate::Id(product_id.as_str())),
                active: Some(true),
                limit: Some(1),
                ..Default::default()
            },
        )
        .await?;

        Ok(prices.data.into_iter().next())
    }

    /// Create a price for a product, tagged with the internal id.
    /// Subscription tiers get a monthly recurring price; packs are one-time.
    async fn create_price(
        &self,
        definition: &ProductDefinition,
        product_id: &ProductId,
    ) -> CreditResult<Price> {
        let mut params = CreatePrice::new(definition.currency);
        params.product = Some(IdOrCreate::Id(product_id.as_str()));
        params.unit_amount = Some(definition.unit_price_minor);
        params.metadata = Some(stripe::Metadata::from([(
            "internal_id".to_string(),
            definition.internal_id.clone(),
        )]));

        if definition.kind == ProductKind::SubscriptionTier {
            params.recurring = Some(CreatePriceRecurring {
                interval: CreatePriceRecurringInterval::Month,
                interval_count: None,
                aggregate_usage: None,
                trial_period_days: None,
                usage_type: None,
            });
        }

        let price = Price::create(self.stripe.inner(), params).await?;
        Ok(price)
    }

    /// Create or update one definition in Stripe, idempotently.
    ///
    /// Running this twice in a row with an unchanged definition produces
    /// `Updated` the second time with the same product/price refs.
    pub async fn sync_one(&self, definition: &ProductDefinition) -> CreditResult<SyncOutcome> {
        if let Some(existing) = self.find_existing(definition).await? {
            // Update mutable fields in place; never touch the price
            let update = UpdateProduct {
                name: Some(&definition.name),
                description: Some(definition.description.clone()),
                active: Some(definition.active),
                metadata: Some(Self::product_metadata(definition)),
                ..Default::default()
            };
            let product = Product::update(self.stripe.inner(), &existing.id, update).await?;

            // Reuse the current active price; create a fresh one only if the
            // product somehow has none (prices are immutable once created)
            let price = match self.active_price(&product.id).await? {
                Some(price) => price,
                None => {
                    tracing::warn!(
                        internal_id = %definition.internal_id,
                        stripe_product_id = %product.id,
                        "Existing product has no active price, creating one"
                    );
                    self.create_price(definition, &product.id).await?
                }
            };

            self.store()
                .upsert(
                    &definition.internal_id,
                    product.id.as_str(),
                    price.id.as_str(),
                    definition.active,
                )
                .await?;

            tracing::info!(
                internal_id = %definition.internal_id,
                stripe_product_id = %product.id,
                stripe_price_id = %price.id,
                "Updated Stripe product"
            );

            return Ok(SyncOutcome {
                action: SyncAction::Updated,
                stripe_product_id: product.id.to_string(),
                stripe_price_id: price.id.to_string(),
            });
        }

        // Create new product, then exactly one price
        let mut create = CreateProduct::new(&definition.name);
        create.description = Some(&definition.description);
        create.active = Some(definition.active);
        create.metadata = Some(Self::product_metadata(definition));

        let product = Product::create(self.stripe.inner(), create).await?;

        let price = match self.create_price(definition, &product.id).await {
            Ok(price) => price,
            Err(e) => {
                // The product exists remotely but has no price. Surface the
                // orphaned ref so an operator (or the next sync, via metadata
                // lookup) can repair it.
                return Err(CreditError::StripeApi(format!(
                    "price creation failed after product {} was created: {}",
                    product.id, e
                )));
            }
        };

        self.store()
            .upsert(
                &definition.internal_id,
                product.id.as_str(),
                price.id.as_str(),
                definition.active,
            )
            .await?;

        tracing::info!(
            internal_id = %definition.internal_id,
            stripe_product_id = %product.id,
            stripe_price_id = %price.id,
            unit_price_minor = definition.unit_price_minor,
            "Created Stripe product and price"
        );

        Ok(SyncOutcome {
            action: SyncAction::Created,
            stripe_product_id: product.id.to_string(),
            stripe_price_id: price.id.to_string(),
        })
    }

    /// Sync every active definition, collecting per-item failures instead of
    /// aborting the batch. Each item commits independently, so a cancelled
    /// batch leaves already-synced items intact.
    pub async fn sync_all(&self) -> CreditResult<SyncReport> {
        let definitions = self.catalog.list_active(None).await?;
        let mut report = SyncReport::default();

        tracing::info!(count = definitions.len(), "Starting catalog sync");

        for definition in &definitions {
            // Transient Stripe failures (network, rate limit) get a couple of
            // retries with jittered backoff before being reported
            let strategy = ExponentialBackoff::from_millis(200).map(jitter).take(2);
            let outcome = Retry::spawn(strategy, || self.sync_one(definition)).await;

            match outcome {
                Ok(outcome) => {
                    match outcome.action {
                        SyncAction::Created => report.created += 1,
                        SyncAction::Updated => report.updated += 1,
                    }
                    report.products.push(SyncedProduct {
                        internal_id: definition.internal_id.clone(),
                        name: definition.name.clone(),
                        stripe_product_id: outcome.stripe_product_id,
                        stripe_price_id: outcome.stripe_price_id,
                    });
                }
                Err(e) => {
                    tracing::error!(
                        internal_id = %definition.internal_id,
                        error = %e,
                        "Product sync failed"
                    );
                    report.skipped += 1;
                    report.errors.push(SyncError {
                        internal_id: definition.internal_id.clone(),
                        message: e.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            created = report.created,
            updated = report.updated,
            skipped = report.skipped,
            errors = report.errors.len(),
            "Catalog sync complete"
        );

        Ok(report)
    }

    /// All products currently in Stripe (admin/audit display)
    pub async fn list_stripe_products(&self) -> CreditResult<Vec<Product>> {
        let products = Product::list(
            self.stripe.inner(),
            &ListProducts {
                limit: Some(100),
                ..Default::default()
            },
        )
        .await?;

        Ok(products.data)
    }

    /// Archive a product in Stripe (deactivate; products are never deleted)
    pub async fn archive_product(&self, stripe_product_id: &str) -> CreditResult<()> {
        let product_id: ProductId = stripe_product_id
            .parse()
            .map_err(|e| CreditError::InvalidInput(format!("invalid product id: {}", e)))?;

        let update = UpdateProduct {
            active: Some(false),
            ..Default::default()
        };
        Product::update(self.stripe.inner(), &product_id, update).await?;

        tracing::info!(stripe_product_id = %stripe_product_id, "Archived Stripe product");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::builtin_definitions;

    #[test]
    fn test_metadata_carries_internal_id() {
        let def = &builtin_definitions()[0];
        let metadata = CatalogSynchronizer::product_metadata(def);
        assert_eq!(metadata.get("internal_id"), Some(&def.internal_id));
        assert_eq!(metadata.get("kind"), Some(&def.kind.as_str().to_string()));
    }

    #[test]
    fn test_report_default_is_empty() {
        let report = SyncReport::default();
        assert_eq!(report.created + report.updated + report.skipped, 0);
        assert!(report.errors.is_empty());
    }
}
