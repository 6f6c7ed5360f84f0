//! Entitlement store document types
//!
//! These mirror the three collections the billing flow reads and writes:
//! user records, the active-subscription index, and pending checkout-session
//! records. The cached `is_premium` flag on the user record is a denormalized
//! projection; the subscription index is the authoritative source the
//! verifier recomputes from.

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

/// Per-user entitlement record, keyed by the opaque identity handle.
///
/// Long-lived account state; rows are never deleted. The Stripe linkage
/// fields are stamped by the webhook reconciler once payment is confirmed.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct UserRecord {
    pub user_id: String,
    pub email: String,
    /// Cached entitlement flag. Must stay re-derivable from the
    /// active-subscription index; divergence is healed by verification.
    pub is_premium: bool,
    /// Set when a checkout has been initiated but not yet reconciled.
    pub premium_pending: bool,
    pub premium_since: Option<OffsetDateTime>,
    pub last_verified: Option<OffsetDateTime>,
    pub stripe_session_id: Option<String>,
    pub stripe_customer_id: Option<String>,
    pub stripe_subscription_id: Option<String>,
    pub subscription_active: bool,
    /// True once a webhook (not an optimistic client write) confirmed state.
    pub webhook_confirmed: bool,
    pub pending_checkout_session_id: Option<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl UserRecord {
    /// A fresh record with no billing linkage, as created at signup.
    pub fn new(user_id: impl Into<String>, email: impl Into<String>) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            user_id: user_id.into(),
            email: email.into(),
            is_premium: false,
            premium_pending: false,
            premium_since: None,
            last_verified: None,
            stripe_session_id: None,
            stripe_customer_id: None,
            stripe_subscription_id: None,
            subscription_active: false,
            webhook_confirmed: false,
            pending_checkout_session_id: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Lifecycle status of a pending checkout-session record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckoutSessionStatus {
    Pending,
    Completed,
}

impl CheckoutSessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CheckoutSessionStatus::Pending => "pending",
            CheckoutSessionStatus::Completed => "completed",
        }
    }
}

impl std::fmt::Display for CheckoutSessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CheckoutSessionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(CheckoutSessionStatus::Pending),
            "completed" => Ok(CheckoutSessionStatus::Completed),
            other => Err(format!("unknown checkout session status: {other}")),
        }
    }
}

/// Locally created record correlating a checkout initiation with the
/// provider notification that eventually completes it.
///
/// Created before the external session is requested; the provider is not
/// trusted to be the only writer because notifications can be delayed or,
/// rarely, lost.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingCheckoutSession {
    /// Locally generated opaque id, threaded through Stripe metadata.
    pub id: String,
    pub user_id: String,
    pub email: String,
    pub status: CheckoutSessionStatus,
    pub webhook_received: bool,
    pub stripe_session_id: Option<String>,
    pub stripe_customer_id: Option<String>,
    pub stripe_subscription_id: Option<String>,
    pub created_at: OffsetDateTime,
    pub completed_at: Option<OffsetDateTime>,
}

impl PendingCheckoutSession {
    pub fn new(
        id: impl Into<String>,
        user_id: impl Into<String>,
        email: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            user_id: user_id.into(),
            email: email.into(),
            status: CheckoutSessionStatus::Pending,
            webhook_received: false,
            stripe_session_id: None,
            stripe_customer_id: None,
            stripe_subscription_id: None,
            created_at: OffsetDateTime::now_utc(),
            completed_at: None,
        }
    }
}

/// Provider identifiers echoed when the reconciler completes a pending
/// checkout-session record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionCompletion {
    pub stripe_session_id: String,
    pub stripe_customer_id: String,
    pub stripe_subscription_id: String,
    pub completed_at: OffsetDateTime,
}

/// One row per (user, billing customer) in the active-subscription index.
///
/// This is what the entitlement verifier queries; it never trusts the cached
/// flag on the user record alone.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SubscriptionIndexEntry {
    pub user_id: String,
    pub email: String,
    pub active: bool,
    pub subscription_active: bool,
    pub stripe_customer_id: String,
    pub stripe_subscription_id: String,
    pub stripe_session_id: Option<String>,
    pub webhook_confirmed: bool,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// A confirmed entitlement transition from the webhook reconciler.
///
/// Applied as one atomic batch: user-record flag update plus index upsert.
/// All fields are unconditional final state so applying the same transition
/// twice is observably identical to applying it once.
#[derive(Debug, Clone)]
pub struct EntitlementTransition {
    pub user_id: String,
    /// Final entitlement state: true grants premium, false revokes it.
    pub active: bool,
    pub stripe_session_id: Option<String>,
    pub stripe_customer_id: String,
    pub stripe_subscription_id: String,
    pub verified_at: OffsetDateTime,
}
