//! In-memory entitlement store
//!
//! Substitutable fake used by tests and local development. A single lock
//! guards all three collections so the two-write entitlement batch commits
//! atomically here as well.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use time::OffsetDateTime;
use tokio::sync::RwLock;

use crate::store::{EntitlementStore, StoreError, StoreResult};
use crate::types::{
    CheckoutSessionStatus, EntitlementTransition, PendingCheckoutSession, SessionCompletion,
    SubscriptionIndexEntry, UserRecord,
};

#[derive(Default)]
struct Collections {
    users: HashMap<String, UserRecord>,
    subscriptions: HashMap<String, SubscriptionIndexEntry>,
    sessions: HashMap<String, PendingCheckoutSession>,
}

#[derive(Clone, Default)]
pub struct MemoryEntitlementStore {
    inner: Arc<RwLock<Collections>>,
}

impl MemoryEntitlementStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of subscription-index rows, for duplicate-row assertions.
    pub async fn index_len(&self) -> usize {
        self.inner.read().await.subscriptions.len()
    }
}

#[async_trait]
impl EntitlementStore for MemoryEntitlementStore {
    async fn get_user(&self, user_id: &str) -> StoreResult<Option<UserRecord>> {
        Ok(self.inner.read().await.users.get(user_id).cloned())
    }

    async fn upsert_user(&self, user: &UserRecord) -> StoreResult<()> {
        self.inner
            .write()
            .await
            .users
            .insert(user.user_id.clone(), user.clone());
        Ok(())
    }

    async fn find_user_by_customer(&self, customer_id: &str) -> StoreResult<Option<UserRecord>> {
        Ok(self
            .inner
            .read()
            .await
            .users
            .values()
            .find(|u| u.stripe_customer_id.as_deref() == Some(customer_id))
            .cloned())
    }

    async fn apply_entitlement(&self, transition: &EntitlementTransition) -> StoreResult<()> {
        let mut inner = self.inner.write().await;

        let user = inner
            .users
            .get_mut(&transition.user_id)
            .ok_or_else(|| StoreError::NotFound(format!("user {}", transition.user_id)))?;

        user.is_premium = transition.active;
        user.subscription_active = transition.active;
        user.premium_pending = false;
        if transition.active && user.premium_since.is_none() {
            user.premium_since = Some(transition.verified_at);
        }
        user.last_verified = Some(transition.verified_at);
        if let Some(session_id) = &transition.stripe_session_id {
            user.stripe_session_id = Some(session_id.clone());
        }
        user.stripe_customer_id = Some(transition.stripe_customer_id.clone());
        user.stripe_subscription_id = Some(transition.stripe_subscription_id.clone());
        user.webhook_confirmed = true;
        user.updated_at = transition.verified_at;
        let email = user.email.clone();

        let entry = inner
            .subscriptions
            .entry(transition.user_id.clone())
            .or_insert_with(|| SubscriptionIndexEntry {
                user_id: transition.user_id.clone(),
                email: email.clone(),
                active: transition.active,
                subscription_active: transition.active,
                stripe_customer_id: transition.stripe_customer_id.clone(),
                stripe_subscription_id: transition.stripe_subscription_id.clone(),
                stripe_session_id: transition.stripe_session_id.clone(),
                webhook_confirmed: true,
                created_at: transition.verified_at,
                updated_at: transition.verified_at,
            });
        entry.active = transition.active;
        entry.subscription_active = transition.active;
        entry.stripe_customer_id = transition.stripe_customer_id.clone();
        entry.stripe_subscription_id = transition.stripe_subscription_id.clone();
        if let Some(session_id) = &transition.stripe_session_id {
            entry.stripe_session_id = Some(session_id.clone());
        }
        entry.webhook_confirmed = true;
        entry.updated_at = transition.verified_at;

        Ok(())
    }

    async fn create_pending_session(&self, session: &PendingCheckoutSession) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        if inner.sessions.contains_key(&session.id) {
            return Err(StoreError::Database(format!(
                "checkout session {} already exists",
                session.id
            )));
        }
        inner.sessions.insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn get_pending_session(&self, id: &str) -> StoreResult<Option<PendingCheckoutSession>> {
        Ok(self.inner.read().await.sessions.get(id).cloned())
    }

    async fn complete_pending_session(
        &self,
        id: &str,
        completion: &SessionCompletion,
    ) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let session = inner
            .sessions
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound(format!("checkout session {id}")))?;

        session.status = CheckoutSessionStatus::Completed;
        session.webhook_received = true;
        session.stripe_session_id = Some(completion.stripe_session_id.clone());
        session.stripe_customer_id = Some(completion.stripe_customer_id.clone());
        session.stripe_subscription_id = Some(completion.stripe_subscription_id.clone());
        if session.completed_at.is_none() {
            session.completed_at = Some(completion.completed_at);
        }

        Ok(())
    }

    async fn mark_premium_pending(
        &self,
        user_id: &str,
        pending_session_id: &str,
    ) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let user = inner
            .users
            .get_mut(user_id)
            .ok_or_else(|| StoreError::NotFound(format!("user {user_id}")))?;

        user.premium_pending = true;
        user.pending_checkout_session_id = Some(pending_session_id.to_string());
        user.updated_at = OffsetDateTime::now_utc();
        Ok(())
    }

    async fn active_subscription_for_customer(
        &self,
        customer_id: &str,
    ) -> StoreResult<Option<SubscriptionIndexEntry>> {
        Ok(self
            .inner
            .read()
            .await
            .subscriptions
            .values()
            .find(|e| {
                e.stripe_customer_id == customer_id && e.active && e.subscription_active
            })
            .cloned())
    }

    async fn record_verification(
        &self,
        user_id: &str,
        is_premium: bool,
        verified_at: OffsetDateTime,
    ) -> StoreResult<()> {
        let mut inner = self.inner.write().await;
        let user = inner
            .users
            .get_mut(user_id)
            .ok_or_else(|| StoreError::NotFound(format!("user {user_id}")))?;

        user.is_premium = is_premium;
        user.last_verified = Some(verified_at);
        user.updated_at = verified_at;
        Ok(())
    }
}
