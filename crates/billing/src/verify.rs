//! Client entitlement verification
//!
//! Recomputes a user's premium flag from the active-subscription index
//! rather than trusting the cached flag on the user record. The recomputed
//! value and a fresh timestamp are always written back, even when nothing
//! changed, so `last_verified` doubles as a staleness marker.

use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use tokio_retry::Retry;

use forkful_shared::{EntitlementStore, UserRecord};

use crate::error::{BillingError, BillingResult};

/// Retries for the read path when a user record is not yet visible, for
/// example right after signup while the record is still being created.
const LOAD_MAX_RETRIES: u32 = 3;
const LOAD_RETRY_BASE: Duration = Duration::from_secs(1);

/// Linear backoff for the user-load retries: 1s, 2s, 3s.
fn load_retry_schedule() -> impl Iterator<Item = Duration> {
    (1..=LOAD_MAX_RETRIES).map(|attempt| LOAD_RETRY_BASE * attempt)
}

/// Outcome of a verification pass.
#[derive(Debug, Clone, serde::Serialize)]
pub struct VerifiedEntitlement {
    pub user_id: String,
    pub is_premium: bool,
    #[serde(with = "time::serde::rfc3339")]
    pub last_verified: OffsetDateTime,
}

/// Recomputes premium status from the subscription index.
pub struct EntitlementVerifier {
    store: Arc<dyn EntitlementStore>,
}

impl EntitlementVerifier {
    pub fn new(store: Arc<dyn EntitlementStore>) -> Self {
        Self { store }
    }

    /// Verify a single user's premium entitlement.
    ///
    /// The user record's own `is_premium` flag is never consulted; truth is
    /// whether an index entry for the user's billing customer is active on
    /// both dimensions. Users with no billing customer at all resolve to
    /// not premium.
    pub async fn verify(&self, user_id: &str) -> BillingResult<VerifiedEntitlement> {
        let user = self
            .store
            .get_user(user_id)
            .await?
            .ok_or_else(|| BillingError::Verification(format!("user {user_id} not found")))?;

        let is_premium = match user.stripe_customer_id.as_deref() {
            Some(customer_id) => self
                .store
                .active_subscription_for_customer(customer_id)
                .await?
                .is_some(),
            None => false,
        };

        let verified_at = OffsetDateTime::now_utc();
        self.store
            .record_verification(user_id, is_premium, verified_at)
            .await?;

        if is_premium != user.is_premium {
            tracing::info!(
                user_id = %user_id,
                was_premium = user.is_premium,
                is_premium = is_premium,
                "Premium flag corrected during verification"
            );
        } else {
            tracing::debug!(user_id = %user_id, is_premium = is_premium, "Premium status verified");
        }

        Ok(VerifiedEntitlement {
            user_id: user_id.to_string(),
            is_premium,
            last_verified: verified_at,
        })
    }

    /// Load a user record, retrying with linear backoff when the record is
    /// not found yet.
    pub async fn load_user_data(&self, user_id: &str) -> BillingResult<UserRecord> {
        let user = Retry::start(load_retry_schedule(), || async {
            match self.store.get_user(user_id).await {
                Ok(Some(user)) => Ok(user),
                Ok(None) => {
                    tracing::debug!(user_id = %user_id, "User record not visible yet, retrying");
                    Err(BillingError::Verification(format!(
                        "user {user_id} not found"
                    )))
                }
                Err(e) => Err(BillingError::from(e)),
            }
        })
        .await?;

        Ok(user)
    }
}
