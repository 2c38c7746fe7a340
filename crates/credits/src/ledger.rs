//! Credit ledger
//!
//! The accounting core: discrete credit grants with purchase timestamp and
//! optional expiry, consumed oldest-first. Grants are never deleted; they are
//! the audit trail. A grant with no units left or an expiry in the past is
//! excluded from balance and consumption.
//!
//! All-or-nothing deduction is the central invariant here: a deduction either
//! consumes the full requested amount across the owner's grants or touches
//! nothing. Concurrent deductions for the same owner/kind are serialized by
//! row locks inside a single transaction, so two requests can never both
//! spend the same units.

use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::error::{CreditError, CreditResult};

/// Which pool of credits a grant belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreditKind {
    Word,
    Image,
}

impl CreditKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CreditKind::Word => "word",
            CreditKind::Image => "image",
        }
    }

    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "word" => Some(CreditKind::Word),
            "image" => Some(CreditKind::Image),
            _ => None,
        }
    }
}

impl std::fmt::Display for CreditKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One purchased (or administratively added) batch of credits
#[derive(Debug, Clone, Serialize)]
pub struct CreditGrant {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub kind: CreditKind,
    /// Units originally granted (immutable after insert)
    pub units_granted: i64,
    /// Units left; mutated only by deduction, never below zero
    pub units_remaining: i64,
    /// Determines FIFO order (ties broken by id)
    pub granted_at: OffsetDateTime,
    /// None = never expires
    pub expires_at: Option<OffsetDateTime>,
    /// External payment/session reference, unique per grant (audit +
    /// fulfillment idempotency)
    pub source_ref: Option<String>,
}

impl<'r> sqlx::FromRow<'r, PgRow> for CreditGrant {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let kind_str: String = row.try_get("kind")?;
        let kind = CreditKind::from_str(&kind_str).ok_or_else(|| sqlx::Error::ColumnDecode {
            index: "kind".to_string(),
            source: format!("unknown credit kind '{}'", kind_str).into(),
        })?;

        Ok(Self {
            id: row.try_get("id")?,
            owner_id: row.try_get("owner_id")?,
            kind,
            units_granted: row.try_get("units_granted")?,
            units_remaining: row.try_get("units_remaining")?,
            granted_at: row.try_get("granted_at")?,
            expires_at: row.try_get("expires_at")?,
            source_ref: row.try_get("source_ref")?,
        })
    }
}

/// When a new grant should expire
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ExpiryPolicy {
    /// Granted date + 1 year (the default for purchased credits)
    #[default]
    OneYear,
    /// Never expires (administrative grants)
    Never,
    /// Explicit expiry timestamp
    At(OffsetDateTime),
}

impl ExpiryPolicy {
    pub fn expires_at(&self, granted_at: OffsetDateTime) -> Option<OffsetDateTime> {
        match self {
            ExpiryPolicy::OneYear => Some(granted_at + Duration::days(365)),
            ExpiryPolicy::Never => None,
            ExpiryPolicy::At(ts) => Some(*ts),
        }
    }
}

/// Options for creating a grant
#[derive(Debug, Clone, Default)]
pub struct GrantOptions {
    /// External payment/session reference (idempotency key for fulfillment)
    pub source_ref: Option<String>,
    pub expiry: ExpiryPolicy,
}

/// Whether a grant can contribute to balance/consumption right now
fn is_eligible(grant: &CreditGrant, now: OffsetDateTime) -> bool {
    grant.units_remaining > 0 && grant.expires_at.is_none_or(|exp| exp > now)
}

/// Sum of consumable units across a set of grants
pub fn available_total(grants: &[CreditGrant], now: OffsetDateTime) -> i64 {
    grants
        .iter()
        .filter(|g| is_eligible(g, now))
        .map(|g| g.units_remaining)
        .sum()
}

/// Plan an all-or-nothing FIFO deduction across `grants`.
///
/// Returns `(grant_id, take)` pairs in consumption order, or `None` when the
/// eligible grants cannot cover `units` (in which case nothing may be
/// touched). Grants are consumed oldest `granted_at` first, ties broken by id
/// so the order is deterministic.
pub fn plan_deduction(
    grants: &[CreditGrant],
    units: i64,
    now: OffsetDateTime,
) -> Option<Vec<(Uuid, i64)>> {
    if units <= 0 {
        return Some(Vec::new());
    }

    let mut eligible: Vec<&CreditGrant> = grants.iter().filter(|g| is_eligible(g, now)).collect();
    eligible.sort_by(|a, b| a.granted_at.cmp(&b.granted_at).then(a.id.cmp(&b.id)));

    let mut still_needed = units;
    let mut plan = Vec::new();

    for grant in eligible {
        if still_needed == 0 {
            break;
        }
        let take = grant.units_remaining.min(still_needed);
        plan.push((grant.id, take));
        still_needed -= take;
    }

    if still_needed == 0 {
        Some(plan)
    } else {
        None
    }
}

/// Credit ledger service
#[derive(Clone)]
pub struct CreditLedger {
    pool: PgPool,
}

impl CreditLedger {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Sum of `units_remaining` over the owner's non-expired, non-exhausted
    /// grants. Snapshot read; no locks taken.
    pub async fn available_balance(&self, owner_id: Uuid, kind: CreditKind) -> CreditResult<i64> {
        let total: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT SUM(units_remaining)::BIGINT
            FROM credit_grants
            WHERE owner_id = $1
              AND kind = $2
              AND units_remaining > 0
              AND (expires_at IS NULL OR expires_at > NOW())
            "#,
        )
        .bind(owner_id)
        .bind(kind.as_str())
        .fetch_one(&self.pool)
        .await?;

        Ok(total.unwrap_or(0))
    }

    /// Insert a new grant.
    ///
    /// When `source_ref` is set and a grant with the same ref already exists,
    /// the existing grant is returned unchanged. Billing providers retry
    /// webhook delivery, so fulfillment must be safe to repeat per session.
    pub async fn grant(
        &self,
        owner_id: Uuid,
        kind: CreditKind,
        units: i64,
        options: GrantOptions,
    ) -> CreditResult<CreditGrant> {
        if units <= 0 {
            return Err(CreditError::InvalidInput(format!(
                "grant units must be positive, got {}",
                units
            )));
        }

        let granted_at = OffsetDateTime::now_utc();
        let expires_at = options.expiry.expires_at(granted_at);

        let inserted: Option<CreditGrant> = sqlx::query_as(
            r#"
            INSERT INTO credit_grants
                (id, owner_id, kind, units_granted, units_remaining, granted_at, expires_at, source_ref)
            VALUES ($1, $2, $3, $4, $4, $5, $6, $7)
            ON CONFLICT (source_ref) DO NOTHING
            RETURNING id, owner_id, kind, units_granted, units_remaining, granted_at, expires_at, source_ref
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(owner_id)
        .bind(kind.as_str())
        .bind(units)
        .bind(granted_at)
        .bind(expires_at)
        .bind(&options.source_ref)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(grant) = inserted {
            tracing::info!(
                owner_id = %owner_id,
                kind = %kind,
                units = units,
                grant_id = %grant.id,
                expires_at = ?expires_at,
                source_ref = ?grant.source_ref,
                "Credit grant recorded"
            );
            return Ok(grant);
        }

        // Conflict on source_ref: this purchase was already fulfilled
        let source_ref = options.source_ref.ok_or_else(|| {
            CreditError::Internal("grant insert returned no row without a source_ref".to_string())
        })?;

        let existing: CreditGrant = sqlx::query_as(
            "SELECT id, owner_id, kind, units_granted, units_remaining, granted_at, expires_at, source_ref
             FROM credit_grants
             WHERE source_ref = $1",
        )
        .bind(&source_ref)
        .fetch_one(&self.pool)
        .await?;

        tracing::info!(
            owner_id = %owner_id,
            source_ref = %source_ref,
            grant_id = %existing.id,
            "Duplicate grant for source_ref - returning existing grant"
        );

        Ok(existing)
    }

    /// Consume `units` across the owner's eligible grants, oldest first.
    ///
    /// Returns `true` only if the full amount was deducted. If the eligible
    /// grants are insufficient the transaction is rolled back and no grant is
    /// modified. `FOR UPDATE` row locks serialize concurrent deductions for
    /// the same owner/kind.
    pub async fn deduct(&self, owner_id: Uuid, kind: CreditKind, units: i64) -> CreditResult<bool> {
        if units <= 0 {
            return Err(CreditError::InvalidInput(format!(
                "deduct units must be positive, got {}",
                units
            )));
        }

        let mut tx = self.pool.begin().await?;

        let grants: Vec<CreditGrant> = sqlx::query_as(
            r#"
            SELECT id, owner_id, kind, units_granted, units_remaining, granted_at, expires_at, source_ref
            FROM credit_grants
            WHERE owner_id = $1
              AND kind = $2
              AND units_remaining > 0
              AND (expires_at IS NULL OR expires_at > NOW())
            ORDER BY granted_at, id
            FOR UPDATE
            "#,
        )
        .bind(owner_id)
        .bind(kind.as_str())
        .fetch_all(&mut *tx)
        .await?;

        let now = OffsetDateTime::now_utc();
        let Some(plan) = plan_deduction(&grants, units, now) else {
            // Insufficient: roll back without touching any grant
            tx.rollback().await?;
            tracing::info!(
                owner_id = %owner_id,
                kind = %kind,
                requested = units,
                available = available_total(&grants, now),
                "Deduction rejected - insufficient credits"
            );
            return Ok(false);
        };

        for (grant_id, take) in &plan {
            sqlx::query(
                "UPDATE credit_grants SET units_remaining = units_remaining - $1 WHERE id = $2",
            )
            .bind(take)
            .bind(grant_id)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        tracing::info!(
            owner_id = %owner_id,
            kind = %kind,
            units = units,
            grants_touched = plan.len(),
            "Credits deducted"
        );

        Ok(true)
    }

    /// All grants for an owner/kind, newest first (admin/audit display)
    pub async fn grants_for(&self, owner_id: Uuid, kind: CreditKind) -> CreditResult<Vec<CreditGrant>> {
        let grants: Vec<CreditGrant> = sqlx::query_as(
            "SELECT id, owner_id, kind, units_granted, units_remaining, granted_at, expires_at, source_ref
             FROM credit_grants
             WHERE owner_id = $1 AND kind = $2
             ORDER BY granted_at DESC, id DESC",
        )
        .bind(owner_id)
        .bind(kind.as_str())
        .fetch_all(&self.pool)
        .await?;

        Ok(grants)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grant(units: i64, granted_at: OffsetDateTime, expires_at: Option<OffsetDateTime>) -> CreditGrant {
        CreditGrant {
            id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            kind: CreditKind::Word,
            units_granted: units,
            units_remaining: units,
            granted_at,
            expires_at,
            source_ref: None,
        }
    }

    fn ts(unix: i64) -> OffsetDateTime {
        OffsetDateTime::from_unix_timestamp(unix).unwrap()
    }

    #[test]
    fn test_fifo_consumes_oldest_first() {
        let now = ts(10_000);
        let g1 = grant(100, ts(1_000), None);
        let g2 = grant(100, ts(2_000), None);
        // Present newest-first to prove ordering comes from granted_at
        let plan = plan_deduction(&[g2.clone(), g1.clone()], 150, now).unwrap();

        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0], (g1.id, 100));
        assert_eq!(plan[1], (g2.id, 50));
    }

    #[test]
    fn test_tie_broken_by_id() {
        let now = ts(10_000);
        let mut a = grant(10, ts(1_000), None);
        let mut b = grant(10, ts(1_000), None);
        a.id = Uuid::from_u128(1);
        b.id = Uuid::from_u128(2);

        let plan = plan_deduction(&[b.clone(), a.clone()], 15, now).unwrap();
        assert_eq!(plan[0], (a.id, 10));
        assert_eq!(plan[1], (b.id, 5));
    }

    #[test]
    fn test_insufficient_plans_nothing() {
        let now = ts(10_000);
        let g1 = grant(100, ts(1_000), None);
        assert!(plan_deduction(&[g1], 101, now).is_none());
    }

    #[test]
    fn test_expired_grant_excluded() {
        let now = ts(10_000);
        let expired = grant(500, ts(1_000), Some(ts(5_000)));
        let live = grant(50, ts(2_000), None);

        assert_eq!(available_total(&[expired.clone(), live.clone()], now), 50);
        // Even with units remaining, the expired grant is skipped
        assert!(plan_deduction(&[expired.clone(), live.clone()], 100, now).is_none());
        let plan = plan_deduction(&[expired, live.clone()], 50, now).unwrap();
        assert_eq!(plan, vec![(live.id, 50)]);
    }

    #[test]
    fn test_grant_expiring_exactly_now_excluded() {
        let now = ts(10_000);
        let g = grant(100, ts(1_000), Some(now));
        assert_eq!(available_total(&[g], now), 0);
    }

    #[test]
    fn test_exhausted_grant_excluded() {
        let now = ts(10_000);
        let mut g = grant(100, ts(1_000), None);
        g.units_remaining = 0;
        assert_eq!(available_total(&[g], now), 0);
    }

    #[test]
    fn test_zero_unit_deduction_is_empty_plan() {
        let now = ts(10_000);
        let g = grant(100, ts(1_000), None);
        assert_eq!(plan_deduction(&[g], 0, now), Some(Vec::new()));
    }

    #[test]
    fn test_exact_balance_consumes_everything() {
        let now = ts(10_000);
        let g1 = grant(30, ts(1_000), None);
        let g2 = grant(70, ts(2_000), None);
        let plan = plan_deduction(&[g1.clone(), g2.clone()], 100, now).unwrap();
        assert_eq!(plan, vec![(g1.id, 30), (g2.id, 70)]);
    }

    #[test]
    fn test_one_year_expiry_policy() {
        let granted = ts(0);
        let exp = ExpiryPolicy::OneYear.expires_at(granted).unwrap();
        assert_eq!(exp - granted, Duration::days(365));
        assert_eq!(ExpiryPolicy::Never.expires_at(granted), None);
        assert_eq!(
            ExpiryPolicy::At(ts(42)).expires_at(granted),
            Some(ts(42))
        );
    }

    #[test]
    fn test_kind_round_trip() {
        assert_eq!(CreditKind::from_str("word"), Some(CreditKind::Word));
        assert_eq!(CreditKind::from_str("image"), Some(CreditKind::Image));
        assert_eq!(CreditKind::from_str("video"), None);
    }
}
