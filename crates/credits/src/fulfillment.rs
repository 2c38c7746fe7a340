//! Checkout fulfillment
//!
//! Turns completed Stripe checkout sessions into credit grants, exactly
//! once per session. Two delivery paths feed into the same logic:
//!
//! - push: signed `checkout.session.completed` webhook events
//! - pull: an explicit session lookup after the success redirect, covering
//!   dropped or delayed webhooks
//!
//! Double fulfillment is blocked twice over: an atomic claim row keyed by
//! session id, and the ledger's unique source ref on the grant itself.

use sqlx::PgPool;
use stripe::{CheckoutSession, CheckoutSessionPaymentStatus, Event, EventObject, EventType};
use uuid::Uuid;

use crate::checkout::{CheckoutMetadata, CheckoutService};
use crate::error::{CreditError, CreditResult};
use crate::ledger::{CreditGrant, CreditLedger, ExpiryPolicy, GrantOptions};

/// What handling a session (or event) did
#[derive(Debug)]
pub enum FulfillmentOutcome {
    /// Credits were granted for this session
    Granted(CreditGrant),
    /// Another delivery already fulfilled this session
    AlreadyFulfilled,
    /// Event type we don't act on
    Ignored,
}

/// Fulfillment service: webhook verification, claim bookkeeping, granting
#[derive(Clone)]
pub struct FulfillmentService {
    pool: PgPool,
    ledger: CreditLedger,
    checkout: CheckoutService,
    webhook_secret: Option<String>,
}

/// Whether a claim row in this state may proceed to granting.
///
/// Only a recorded grant blocks fulfillment. A claim with no grant_id is an
/// earlier attempt that crashed or failed between claiming and granting;
/// resuming it is safe because the grant itself is idempotent on source_ref.
fn claim_is_resumable(existing_grant_id: Option<Uuid>) -> bool {
    existing_grant_id.is_none()
}

fn verify_signed_payload(payload: &str, signature: &str, secret: &str) -> CreditResult<Event> {
    stripe::Webhook::construct_event(payload, signature, secret)
        .map_err(|e| CreditError::InvalidInput(format!("webhook signature verification failed: {}", e)))
}

impl FulfillmentService {
    pub fn new(
        pool: PgPool,
        ledger: CreditLedger,
        checkout: CheckoutService,
        webhook_secret: Option<String>,
    ) -> Self {
        Self {
            pool,
            ledger,
            checkout,
            webhook_secret,
        }
    }

    /// Verify a raw webhook payload against its `Stripe-Signature` header
    /// and parse it into an event. Unsigned payloads are never accepted.
    pub fn verify_event(&self, payload: &str, signature: &str) -> CreditResult<Event> {
        let secret = self
            .webhook_secret
            .as_deref()
            .ok_or_else(|| CreditError::Config("STRIPE_WEBHOOK_SECRET is not set".to_string()))?;
        verify_signed_payload(payload, signature, secret)
    }

    /// Handle a verified webhook event. Only `checkout.session.completed`
    /// triggers fulfillment; everything else is acknowledged and ignored.
    pub async fn handle_event(&self, event: Event) -> CreditResult<FulfillmentOutcome> {
        match event.type_ {
            EventType::CheckoutSessionCompleted => {
                if let EventObject::CheckoutSession(session) = event.data.object {
                    self.fulfill(&session).await
                } else {
                    Err(CreditError::Internal(
                        "checkout.session.completed event without a session payload".to_string(),
                    ))
                }
            }
            other => {
                tracing::debug!(event_type = %other, "Ignoring webhook event");
                Ok(FulfillmentOutcome::Ignored)
            }
        }
    }

    /// Pull-based fallback: fetch the session from Stripe and fulfill it.
    /// Safe to call any number of times for the same session.
    pub async fn fulfill_session(&self, session_id: &str) -> CreditResult<FulfillmentOutcome> {
        let session = self.checkout.verify_session(session_id).await?;
        self.fulfill(&session).await
    }

    async fn fulfill(&self, session: &CheckoutSession) -> CreditResult<FulfillmentOutcome> {
        if session.payment_status != CheckoutSessionPaymentStatus::Paid {
            return Err(CreditError::PaymentNotCompleted(session.id.to_string()));
        }

        let metadata = session.metadata.clone().unwrap_or_default();
        let checkout_meta = CheckoutMetadata::from_metadata(&metadata)?;

        let credit_kind = checkout_meta.kind.credit_kind().ok_or_else(|| {
            CreditError::InvalidInput(format!(
                "session {} is for a non-creditable product kind '{}'",
                session.id, checkout_meta.kind
            ))
        })?;

        let claimed = self.claim(session.id.as_str(), &checkout_meta).await?;
        if !claimed {
            tracing::info!(
                session_id = %session.id,
                buyer_id = %checkout_meta.buyer_id,
                "Session already fulfilled, skipping"
            );
            return Ok(FulfillmentOutcome::AlreadyFulfilled);
        }

        let options = GrantOptions {
            source_ref: Some(session.id.to_string()),
            expiry: ExpiryPolicy::OneYear,
        };

        // A failure here leaves the claim without a grant_id; the next
        // delivery resumes it, and the grant's unique source_ref keeps the
        // retry exactly-once.
        let grant = self
            .ledger
            .grant(
                checkout_meta.buyer_id,
                credit_kind,
                checkout_meta.units_granted,
                options,
            )
            .await?;

        self.record_grant(session.id.as_str(), grant.id).await?;

        tracing::info!(
            session_id = %session.id,
            buyer_id = %checkout_meta.buyer_id,
            internal_id = %checkout_meta.internal_id,
            kind = %credit_kind,
            units = checkout_meta.units_granted,
            grant_id = %grant.id,
            "Fulfilled checkout session"
        );

        Ok(FulfillmentOutcome::Granted(grant))
    }

    /// Claim a session for fulfillment. Returns false only when the session
    /// already has a recorded grant.
    ///
    /// The upsert always touches the row, so the claim reflects the current
    /// state rather than just first-writer-wins: a claim left behind by a
    /// crashed or failed earlier attempt (grant_id still NULL) is taken over
    /// and fulfillment resumes instead of the paid credits being dropped.
    async fn claim(&self, session_id: &str, meta: &CheckoutMetadata) -> CreditResult<bool> {
        let (grant_id,): (Option<Uuid>,) = sqlx::query_as(
            r#"
            INSERT INTO checkout_fulfillments (session_id, buyer_id, internal_id, claimed_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (session_id) DO UPDATE SET claimed_at = NOW()
            RETURNING grant_id
            "#,
        )
        .bind(session_id)
        .bind(meta.buyer_id)
        .bind(&meta.internal_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(claim_is_resumable(grant_id))
    }

    async fn record_grant(&self, session_id: &str, grant_id: Uuid) -> CreditResult<()> {
        sqlx::query(
            "UPDATE checkout_fulfillments SET grant_id = $2, fulfilled_at = NOW() WHERE session_id = $1",
        )
        .bind(session_id)
        .bind(grant_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
