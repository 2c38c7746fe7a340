//! Stripe Checkout for one-time credit purchases
//!
//! Opens single-use checkout sessions for word and image packs. The session
//! carries a typed metadata payload sufficient to fulfill the purchase later
//! without re-querying the catalog, so catalog changes between purchase and
//! fulfillment cannot corrupt the grant.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use stripe::{
    CheckoutSession, CheckoutSessionId, CheckoutSessionMode, CheckoutSessionPaymentStatus,
    CreateCheckoutSession, CreateCheckoutSessionLineItems, CreateCheckoutSessionPaymentMethodTypes,
};
use uuid::Uuid;

use crate::catalog::{ProductCatalog, ProductKind};
use crate::client::StripeClient;
use crate::error::{CreditError, CreditResult};

/// Who is buying
#[derive(Debug, Clone)]
pub struct Buyer {
    pub id: Uuid,
    pub email: String,
}

/// Typed checkout session metadata
///
/// Serialized into the session's string-keyed metadata bag on create and
/// decoded back on fulfillment. Keep the keys stable: sessions created before
/// a deploy are fulfilled after it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutMetadata {
    pub buyer_id: Uuid,
    pub internal_id: String,
    pub kind: ProductKind,
    pub units_granted: i64,
}

impl CheckoutMetadata {
    const KEY_BUYER_ID: &'static str = "buyer_id";
    const KEY_INTERNAL_ID: &'static str = "internal_id";
    const KEY_KIND: &'static str = "kind";
    const KEY_UNITS: &'static str = "units_granted";

    pub fn to_metadata(&self) -> HashMap<String, String> {
        HashMap::from([
            (Self::KEY_BUYER_ID.to_string(), self.buyer_id.to_string()),
            (Self::KEY_INTERNAL_ID.to_string(), self.internal_id.clone()),
            (Self::KEY_KIND.to_string(), self.kind.as_str().to_string()),
            (Self::KEY_UNITS.to_string(), self.units_granted.to_string()),
        ])
    }

    pub fn from_metadata(metadata: &HashMap<String, String>) -> CreditResult<Self> {
        let get = |key: &str| {
            metadata
                .get(key)
                .ok_or_else(|| CreditError::InvalidInput(format!("session metadata missing '{}'", key)))
        };

        let buyer_id: Uuid = get(Self::KEY_BUYER_ID)?
            .parse()
            .map_err(|_| CreditError::InvalidInput("session metadata has invalid buyer_id".to_string()))?;

        let internal_id = get(Self::KEY_INTERNAL_ID)?.clone();

        let kind_str = get(Self::KEY_KIND)?;
        let kind = ProductKind::from_str(kind_str).ok_or_else(|| {
            CreditError::InvalidInput(format!("session metadata has unknown kind '{}'", kind_str))
        })?;

        let units_granted: i64 = get(Self::KEY_UNITS)?.parse().map_err(|_| {
            CreditError::InvalidInput("session metadata has invalid units_granted".to_string())
        })?;

        Ok(Self {
            buyer_id,
            internal_id,
            kind,
            units_granted,
        })
    }
}

/// Result of opening a checkout session
#[derive(Debug, Clone, Serialize)]
pub struct CheckoutResponse {
    pub session_id: String,
    /// Stripe-hosted payment page to redirect the buyer to
    pub redirect_url: String,
}

/// Build the single-use card payment session for one catalog entry
fn session_params<'a>(
    price_id: &str,
    buyer_email: &'a str,
    buyer_id: &'a str,
    success_url: &'a str,
    cancel_url: &'a str,
    metadata: &CheckoutMetadata,
) -> CreateCheckoutSession<'a> {
    CreateCheckoutSession {
        mode: Some(CheckoutSessionMode::Payment),
        payment_method_types: Some(vec![CreateCheckoutSessionPaymentMethodTypes::Card]),
        line_items: Some(vec![CreateCheckoutSessionLineItems {
            price: Some(price_id.to_string()),
            quantity: Some(1),
            ..Default::default()
        }]),
        success_url: Some(success_url),
        cancel_url: Some(cancel_url),
        customer_email: Some(buyer_email),
        client_reference_id: Some(buyer_id),
        metadata: Some(metadata.to_metadata()),
        ..Default::default()
    }
}

/// Checkout session factory
#[derive(Clone)]
pub struct CheckoutService {
    stripe: StripeClient,
    catalog: ProductCatalog,
}

impl CheckoutService {
    pub fn new(stripe: StripeClient, catalog: ProductCatalog) -> Self {
        Self { stripe, catalog }
    }

    /// Open a one-time payment checkout session for a credit pack.
    ///
    /// Fails with `NotFound` for unknown or inactive products, `MissingPrice`
    /// when the catalog entry was never synced to Stripe, and `InvalidInput`
    /// for subscription tiers (those go through the subscription flow).
    pub async fn create_session(
        &self,
        internal_id: &str,
        buyer: &Buyer,
        success_url: &str,
        cancel_url: &str,
    ) -> CreditResult<CheckoutResponse> {
        let definition = self.catalog.definition(internal_id).await?;

        if !definition.active {
            return Err(CreditError::NotFound(format!("product '{}'", internal_id)));
        }
        if definition.kind == ProductKind::SubscriptionTier {
            return Err(CreditError::InvalidInput(format!(
                "'{}' is a subscription tier, not a one-time purchase",
                internal_id
            )));
        }

        let price_id = definition
            .stripe_price_id
            .clone()
            .ok_or_else(|| CreditError::MissingPrice(internal_id.to_string()))?;

        let metadata = CheckoutMetadata {
            buyer_id: buyer.id,
            internal_id: definition.internal_id.clone(),
            kind: definition.kind,
            units_granted: definition.units_granted.unwrap_or(0),
        };

        let buyer_id_str = buyer.id.to_string();

        let params = session_params(
            &price_id,
            &buyer.email,
            &buyer_id_str,
            success_url,
            cancel_url,
            &metadata,
        );

        let session = CheckoutSession::create(self.stripe.inner(), params).await?;

        let redirect_url = session.url.clone().ok_or_else(|| {
            CreditError::StripeApi("checkout session created without a redirect URL".to_string())
        })?;

        tracing::info!(
            buyer_id = %buyer.id,
            internal_id = %internal_id,
            session_id = %session.id,
            "Checkout session created"
        );

        Ok(CheckoutResponse {
            session_id: session.id.to_string(),
            redirect_url,
        })
    }

    /// Retrieve a session and confirm payment completed.
    ///
    /// Fails with `PaymentNotCompleted` when the session exists but its
    /// payment status is anything other than paid.
    pub async fn verify_session(&self, session_id: &str) -> CreditResult<CheckoutSession> {
        let id: CheckoutSessionId = session_id
            .parse()
            .map_err(|e| CreditError::InvalidInput(format!("invalid session id: {}", e)))?;

        let session = CheckoutSession::retrieve(self.stripe.inner(), &id, &[]).await?;

        if session.payment_status != CheckoutSessionPaymentStatus::Paid {
            return Err(CreditError::PaymentNotCompleted(session_id.to_string()));
        }

        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_metadata() -> CheckoutMetadata {
        CheckoutMetadata {
            buyer_id: Uuid::from_u128(7),
            internal_id: "words_600".to_string(),
            kind: ProductKind::WordCreditPack,
            units_granted: 600,
        }
    }

    #[test]
    fn test_metadata_round_trip() {
        let meta = sample_metadata();
        let map = meta.to_metadata();
        assert_eq!(map.get("internal_id").map(String::as_str), Some("words_600"));
        assert_eq!(map.get("units_granted").map(String::as_str), Some("600"));
        assert_eq!(map.get("kind").map(String::as_str), Some("word_credit_pack"));

        let decoded = CheckoutMetadata::from_metadata(&map).unwrap();
        assert_eq!(decoded, meta);
    }

    #[test]
    fn test_session_params_shape() {
        let meta = sample_metadata();
        let buyer_id = meta.buyer_id.to_string();
        let params = session_params(
            "price_123",
            "buyer@example.com",
            &buyer_id,
            "https://app.example.com/success",
            "https://app.example.com/cancel",
            &meta,
        );

        assert_eq!(params.mode, Some(CheckoutSessionMode::Payment));
        assert_eq!(
            params.payment_method_types,
            Some(vec![CreateCheckoutSessionPaymentMethodTypes::Card])
        );

        let line_items = params.line_items.unwrap();
        assert_eq!(line_items.len(), 1);
        assert_eq!(line_items[0].price.as_deref(), Some("price_123"));
        assert_eq!(line_items[0].quantity, Some(1));

        let map = params.metadata.unwrap();
        assert_eq!(map.get("buyer_id"), Some(&buyer_id));
        assert_eq!(params.client_reference_id, Some(buyer_id.as_str()));
    }

    #[test]
    fn test_metadata_missing_key_rejected() {
        let mut map = sample_metadata().to_metadata();
        map.remove("buyer_id");
        let err = CheckoutMetadata::from_metadata(&map).unwrap_err();
        assert!(err.to_string().contains("buyer_id"));
    }

    #[test]
    fn test_metadata_bad_units_rejected() {
        let mut map = sample_metadata().to_metadata();
        map.insert("units_granted".to_string(), "lots".to_string());
        assert!(CheckoutMetadata::from_metadata(&map).is_err());
    }

    #[test]
    fn test_metadata_unknown_kind_rejected() {
        let mut map = sample_metadata().to_metadata();
        map.insert("kind".to_string(), "video_pack".to_string());
        assert!(CheckoutMetadata::from_metadata(&map).is_err());
    }
}
