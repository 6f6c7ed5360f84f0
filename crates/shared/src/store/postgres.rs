//! Postgres-backed entitlement store

use async_trait::async_trait;
use sqlx::PgPool;
use time::OffsetDateTime;

use crate::store::{EntitlementStore, StoreError, StoreResult};
use crate::types::{
    CheckoutSessionStatus, EntitlementTransition, PendingCheckoutSession, SessionCompletion,
    SubscriptionIndexEntry, UserRecord,
};

/// Entitlement store over the application's Postgres pool.
#[derive(Clone)]
pub struct PgEntitlementStore {
    pool: PgPool,
}

impl PgEntitlementStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Row shape for checkout_sessions; status is stored as TEXT.
#[derive(Debug, sqlx::FromRow)]
struct PendingSessionRow {
    id: String,
    user_id: String,
    email: String,
    status: String,
    webhook_received: bool,
    stripe_session_id: Option<String>,
    stripe_customer_id: Option<String>,
    stripe_subscription_id: Option<String>,
    created_at: OffsetDateTime,
    completed_at: Option<OffsetDateTime>,
}

impl TryFrom<PendingSessionRow> for PendingCheckoutSession {
    type Error = StoreError;

    fn try_from(row: PendingSessionRow) -> Result<Self, Self::Error> {
        let status: CheckoutSessionStatus = row
            .status
            .parse()
            .map_err(|e: String| StoreError::Database(e))?;
        Ok(PendingCheckoutSession {
            id: row.id,
            user_id: row.user_id,
            email: row.email,
            status,
            webhook_received: row.webhook_received,
            stripe_session_id: row.stripe_session_id,
            stripe_customer_id: row.stripe_customer_id,
            stripe_subscription_id: row.stripe_subscription_id,
            created_at: row.created_at,
            completed_at: row.completed_at,
        })
    }
}

#[async_trait]
impl EntitlementStore for PgEntitlementStore {
    async fn get_user(&self, user_id: &str) -> StoreResult<Option<UserRecord>> {
        let user: Option<UserRecord> = sqlx::query_as(
            r#"
            SELECT user_id, email, is_premium, premium_pending, premium_since,
                   last_verified, stripe_session_id, stripe_customer_id,
                   stripe_subscription_id, subscription_active, webhook_confirmed,
                   pending_checkout_session_id, created_at, updated_at
            FROM users
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    async fn upsert_user(&self, user: &UserRecord) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO users (
                user_id, email, is_premium, premium_pending, premium_since,
                last_verified, stripe_session_id, stripe_customer_id,
                stripe_subscription_id, subscription_active, webhook_confirmed,
                pending_checkout_session_id, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ON CONFLICT (user_id) DO UPDATE SET
                email = EXCLUDED.email,
                is_premium = EXCLUDED.is_premium,
                premium_pending = EXCLUDED.premium_pending,
                premium_since = EXCLUDED.premium_since,
                last_verified = EXCLUDED.last_verified,
                stripe_session_id = EXCLUDED.stripe_session_id,
                stripe_customer_id = EXCLUDED.stripe_customer_id,
                stripe_subscription_id = EXCLUDED.stripe_subscription_id,
                subscription_active = EXCLUDED.subscription_active,
                webhook_confirmed = EXCLUDED.webhook_confirmed,
                pending_checkout_session_id = EXCLUDED.pending_checkout_session_id,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&user.user_id)
        .bind(&user.email)
        .bind(user.is_premium)
        .bind(user.premium_pending)
        .bind(user.premium_since)
        .bind(user.last_verified)
        .bind(&user.stripe_session_id)
        .bind(&user.stripe_customer_id)
        .bind(&user.stripe_subscription_id)
        .bind(user.subscription_active)
        .bind(user.webhook_confirmed)
        .bind(&user.pending_checkout_session_id)
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_user_by_customer(&self, customer_id: &str) -> StoreResult<Option<UserRecord>> {
        let user: Option<UserRecord> = sqlx::query_as(
            r#"
            SELECT user_id, email, is_premium, premium_pending, premium_since,
                   last_verified, stripe_session_id, stripe_customer_id,
                   stripe_subscription_id, subscription_active, webhook_confirmed,
                   pending_checkout_session_id, created_at, updated_at
            FROM users
            WHERE stripe_customer_id = $1
            LIMIT 1
            "#,
        )
        .bind(customer_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(user)
    }

    async fn apply_entitlement(&self, transition: &EntitlementTransition) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        // Unconditional sets of final state; safe under at-least-once
        // delivery. Mirrors the batch the reconciler must never split.
        let updated = sqlx::query(
            r#"
            UPDATE users SET
                is_premium = $2,
                subscription_active = $2,
                premium_pending = FALSE,
                premium_since = CASE WHEN $2 THEN COALESCE(premium_since, $6) ELSE premium_since END,
                last_verified = $6,
                stripe_session_id = COALESCE($3, stripe_session_id),
                stripe_customer_id = $4,
                stripe_subscription_id = $5,
                webhook_confirmed = TRUE,
                updated_at = $6
            WHERE user_id = $1
            "#,
        )
        .bind(&transition.user_id)
        .bind(transition.active)
        .bind(&transition.stripe_session_id)
        .bind(&transition.stripe_customer_id)
        .bind(&transition.stripe_subscription_id)
        .bind(transition.verified_at)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            // Rolls back the transaction; the caller decides whether this is
            // a retryable condition.
            return Err(StoreError::NotFound(format!(
                "user {}",
                transition.user_id
            )));
        }

        sqlx::query(
            r#"
            INSERT INTO premium_subscriptions (
                user_id, email, active, subscription_active, stripe_customer_id,
                stripe_subscription_id, stripe_session_id, webhook_confirmed,
                created_at, updated_at
            )
            SELECT u.user_id, u.email, $2, $2, $3, $4, $5, TRUE, $6, $6
            FROM users u WHERE u.user_id = $1
            ON CONFLICT (user_id) DO UPDATE SET
                active = EXCLUDED.active,
                subscription_active = EXCLUDED.subscription_active,
                stripe_customer_id = EXCLUDED.stripe_customer_id,
                stripe_subscription_id = EXCLUDED.stripe_subscription_id,
                stripe_session_id = COALESCE(EXCLUDED.stripe_session_id,
                                             premium_subscriptions.stripe_session_id),
                webhook_confirmed = TRUE,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(&transition.user_id)
        .bind(transition.active)
        .bind(&transition.stripe_customer_id)
        .bind(&transition.stripe_subscription_id)
        .bind(&transition.stripe_session_id)
        .bind(transition.verified_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn create_pending_session(&self, session: &PendingCheckoutSession) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO checkout_sessions (
                id, user_id, email, status, webhook_received, stripe_session_id,
                stripe_customer_id, stripe_subscription_id, created_at, completed_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(&session.id)
        .bind(&session.user_id)
        .bind(&session.email)
        .bind(session.status.as_str())
        .bind(session.webhook_received)
        .bind(&session.stripe_session_id)
        .bind(&session.stripe_customer_id)
        .bind(&session.stripe_subscription_id)
        .bind(session.created_at)
        .bind(session.completed_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get_pending_session(&self, id: &str) -> StoreResult<Option<PendingCheckoutSession>> {
        let row: Option<PendingSessionRow> = sqlx::query_as(
            r#"
            SELECT id, user_id, email, status, webhook_received, stripe_session_id,
                   stripe_customer_id, stripe_subscription_id, created_at, completed_at
            FROM checkout_sessions
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(PendingCheckoutSession::try_from).transpose()
    }

    async fn complete_pending_session(
        &self,
        id: &str,
        completion: &SessionCompletion,
    ) -> StoreResult<()> {
        // completed_at keeps its first value so a redelivered webhook does
        // not move the completion time.
        let updated = sqlx::query(
            r#"
            UPDATE checkout_sessions SET
                status = 'completed',
                webhook_received = TRUE,
                stripe_session_id = $2,
                stripe_customer_id = $3,
                stripe_subscription_id = $4,
                completed_at = COALESCE(completed_at, $5)
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(&completion.stripe_session_id)
        .bind(&completion.stripe_customer_id)
        .bind(&completion.stripe_subscription_id)
        .bind(completion.completed_at)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("checkout session {id}")));
        }

        Ok(())
    }

    async fn mark_premium_pending(
        &self,
        user_id: &str,
        pending_session_id: &str,
    ) -> StoreResult<()> {
        let updated = sqlx::query(
            r#"
            UPDATE users SET
                premium_pending = TRUE,
                pending_checkout_session_id = $2,
                updated_at = NOW()
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .bind(pending_session_id)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("user {user_id}")));
        }

        Ok(())
    }

    async fn active_subscription_for_customer(
        &self,
        customer_id: &str,
    ) -> StoreResult<Option<SubscriptionIndexEntry>> {
        let entry: Option<SubscriptionIndexEntry> = sqlx::query_as(
            r#"
            SELECT user_id, email, active, subscription_active, stripe_customer_id,
                   stripe_subscription_id, stripe_session_id, webhook_confirmed,
                   created_at, updated_at
            FROM premium_subscriptions
            WHERE stripe_customer_id = $1
              AND active = TRUE
              AND subscription_active = TRUE
            LIMIT 1
            "#,
        )
        .bind(customer_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(entry)
    }

    async fn record_verification(
        &self,
        user_id: &str,
        is_premium: bool,
        verified_at: OffsetDateTime,
    ) -> StoreResult<()> {
        let updated = sqlx::query(
            r#"
            UPDATE users SET
                is_premium = $2,
                last_verified = $3,
                updated_at = $3
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .bind(is_premium)
        .bind(verified_at)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("user {user_id}")));
        }

        Ok(())
    }
}
