//! Entitlement store abstraction
//!
//! The store is the only shared mutable resource in the system; every
//! cross-request coordination point (checkout bookkeeping, webhook
//! reconciliation, client verification) goes through this trait. Handlers
//! receive an explicitly constructed handle rather than reaching for a
//! module-scoped singleton, so tests can substitute the in-memory
//! implementation.

mod memory;
mod postgres;

pub use memory::MemoryEntitlementStore;
pub use postgres::PgEntitlementStore;

use async_trait::async_trait;
use time::OffsetDateTime;

use crate::types::{
    EntitlementTransition, PendingCheckoutSession, SessionCompletion, SubscriptionIndexEntry,
    UserRecord,
};

/// Storage errors surfaced to the billing layer.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Database(String),

    #[error("{0} not found")]
    NotFound(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        StoreError::Database(err.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Document interface over the entitlement store.
#[async_trait]
pub trait EntitlementStore: Send + Sync {
    /// Fetch a user record by identity handle.
    async fn get_user(&self, user_id: &str) -> StoreResult<Option<UserRecord>>;

    /// Create or replace a user record.
    async fn upsert_user(&self, user: &UserRecord) -> StoreResult<()>;

    /// Look up the user linked to a billing customer id. Subscription
    /// lifecycle events carry only the customer id.
    async fn find_user_by_customer(&self, customer_id: &str) -> StoreResult<Option<UserRecord>>;

    /// Apply a confirmed entitlement transition: update the user record's
    /// flags and linkage AND upsert the matching subscription-index entry.
    ///
    /// Both writes commit together or not at all; a partial write would break
    /// re-derivability of the cached premium flag. Fails with `NotFound` when
    /// the user record does not exist.
    async fn apply_entitlement(&self, transition: &EntitlementTransition) -> StoreResult<()>;

    /// Create a pending checkout-session record.
    async fn create_pending_session(&self, session: &PendingCheckoutSession) -> StoreResult<()>;

    /// Fetch a pending checkout-session record.
    async fn get_pending_session(&self, id: &str) -> StoreResult<Option<PendingCheckoutSession>>;

    /// Mark a pending checkout-session record completed with the provider
    /// identifiers echoed by the webhook. Must tolerate being applied to an
    /// already-completed record.
    async fn complete_pending_session(
        &self,
        id: &str,
        completion: &SessionCompletion,
    ) -> StoreResult<()>;

    /// Flag a user as awaiting checkout completion for the given pending
    /// session.
    async fn mark_premium_pending(&self, user_id: &str, pending_session_id: &str)
        -> StoreResult<()>;

    /// Find an index entry for the given billing customer with both `active`
    /// and `subscription_active` true. This is the verifier's source of
    /// truth.
    async fn active_subscription_for_customer(
        &self,
        customer_id: &str,
    ) -> StoreResult<Option<SubscriptionIndexEntry>>;

    /// Write back a recomputed premium flag and a fresh verification
    /// timestamp to the user record. Always called, even when unchanged.
    async fn record_verification(
        &self,
        user_id: &str,
        is_premium: bool,
        verified_at: OffsetDateTime,
    ) -> StoreResult<()>;
}
