//! Stripe webhook reconciliation
//!
//! The reconciler is the sole authoritative writer of confirmed entitlement
//! transitions. Delivery is at-least-once and may be reordered, so every
//! transition is an unconditional set of final state and applying an event
//! twice leaves the store exactly as after the first application.
//!
//! Ordering limitation: concurrent deliveries for the same user apply
//! last-write-wins by arrival at the store, not by provider emission order.
//! There is no per-user sequence token compared before overwrite.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::sync::Arc;
use time::OffsetDateTime;

use forkful_shared::{EntitlementStore, EntitlementTransition, SessionCompletion};

use crate::error::{BillingError, BillingResult};
use crate::events::{BillingEvent, CheckoutCompleted, SubscriptionEvent};

type HmacSha256 = Hmac<Sha256>;

/// How far a webhook timestamp may drift from local time before the
/// signature is rejected as a replay.
const SIGNATURE_TOLERANCE_SECS: i64 = 300;

/// Webhook reconciler for billing provider lifecycle events.
pub struct WebhookReconciler {
    store: Arc<dyn EntitlementStore>,
    webhook_secret: String,
}

impl WebhookReconciler {
    pub fn new(store: Arc<dyn EntitlementStore>, webhook_secret: String) -> Self {
        Self {
            store,
            webhook_secret,
        }
    }

    /// Verify the provider signature and parse the payload.
    ///
    /// This is the sole authenticity gate; there is no other trust boundary
    /// in front of the reconciler.
    pub fn verify_event(&self, payload: &str, signature: &str) -> BillingResult<BillingEvent> {
        self.verify_signature(payload, signature)?;
        BillingEvent::parse(payload)
    }

    /// Verify a `stripe-signature` header: `t=<unix>,v1=<hex hmac>`, where
    /// the HMAC-SHA256 covers `"{t}.{payload}"` under the signing secret.
    fn verify_signature(&self, payload: &str, signature: &str) -> BillingResult<()> {
        let mut timestamp: Option<i64> = None;
        let mut v1_signature: Option<String> = None;

        for part in signature.split(',') {
            let kv: Vec<&str> = part.splitn(2, '=').collect();
            if kv.len() == 2 {
                match kv[0] {
                    "t" => timestamp = kv[1].parse().ok(),
                    "v1" => v1_signature = Some(kv[1].to_string()),
                    _ => {}
                }
            }
        }

        let timestamp = timestamp.ok_or_else(|| {
            tracing::warn!("Missing timestamp in signature header");
            BillingError::WebhookSignatureInvalid
        })?;
        let v1_signature = v1_signature.ok_or_else(|| {
            tracing::warn!("Missing v1 signature in signature header");
            BillingError::WebhookSignatureInvalid
        })?;

        let now = OffsetDateTime::now_utc().unix_timestamp();
        if (now - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
            tracing::warn!(
                timestamp = timestamp,
                now = now,
                "Webhook timestamp outside tolerance"
            );
            return Err(BillingError::WebhookSignatureInvalid);
        }

        // The secret's "whsec_" prefix is not part of the key material.
        let secret_key = self
            .webhook_secret
            .strip_prefix("whsec_")
            .unwrap_or(&self.webhook_secret);
        let signed_payload = format!("{timestamp}.{payload}");

        let mut mac = HmacSha256::new_from_slice(secret_key.as_bytes())
            .map_err(|_| BillingError::WebhookSignatureInvalid)?;
        mac.update(signed_payload.as_bytes());
        let computed = hex::encode(mac.finalize().into_bytes());

        if computed != v1_signature {
            tracing::warn!("Webhook signature mismatch");
            return Err(BillingError::WebhookSignatureInvalid);
        }

        Ok(())
    }

    /// Dispatch a verified event. Returns `Ok(())` for every successfully
    /// reconciled outcome including business no-ops, so the handler can
    /// acknowledge with 200 and the provider stops retrying.
    pub async fn handle_event(&self, event: BillingEvent) -> BillingResult<()> {
        match event {
            BillingEvent::CheckoutCompleted(session) => {
                self.handle_checkout_completed(session).await
            }
            BillingEvent::SubscriptionDeleted(subscription) => {
                self.handle_subscription_deleted(subscription).await
            }
            BillingEvent::SubscriptionUpdated(subscription) => {
                self.handle_subscription_updated(subscription).await
            }
            BillingEvent::Unrecognized { kind } => {
                // Forward-compatible no-op: acknowledged, never an error.
                tracing::info!(
                    event_type = %kind,
                    "Received unhandled billing event type - no handler configured"
                );
                Ok(())
            }
        }
    }

    async fn handle_checkout_completed(&self, session: CheckoutCompleted) -> BillingResult<()> {
        let user_id = session
            .client_reference_id
            .clone()
            .ok_or(BillingError::MissingCorrelation)?;
        let customer_id = session
            .customer_id
            .clone()
            .ok_or(BillingError::IncompleteEvent)?;
        let subscription_id = session
            .subscription_id
            .clone()
            .ok_or(BillingError::IncompleteEvent)?;

        let now = OffsetDateTime::now_utc();
        let transition = EntitlementTransition {
            user_id: user_id.clone(),
            active: true,
            stripe_session_id: Some(session.session_id.clone()),
            stripe_customer_id: customer_id.clone(),
            stripe_subscription_id: subscription_id.clone(),
            verified_at: now,
        };
        self.store.apply_entitlement(&transition).await?;

        tracing::info!(
            user_id = %user_id,
            stripe_session_id = %session.session_id,
            subscription_id = %subscription_id,
            "Checkout completed, premium granted"
        );

        // Best-effort correlation bookkeeping. The entitlement grant above
        // is already committed and must not be rolled back by a failure
        // here.
        if let Some(pending_id) = session.pending_session_id() {
            let completion = SessionCompletion {
                stripe_session_id: session.session_id.clone(),
                stripe_customer_id: customer_id,
                stripe_subscription_id: subscription_id,
                completed_at: now,
            };
            if let Err(e) = self
                .store
                .complete_pending_session(pending_id, &completion)
                .await
            {
                tracing::warn!(
                    checkout_session_id = %pending_id,
                    error = %e,
                    "Failed to mark pending checkout session completed"
                );
            }
        }

        Ok(())
    }

    async fn handle_subscription_deleted(
        &self,
        subscription: SubscriptionEvent,
    ) -> BillingResult<()> {
        self.apply_subscription_state(subscription, false).await
    }

    async fn handle_subscription_updated(
        &self,
        subscription: SubscriptionEvent,
    ) -> BillingResult<()> {
        let active = subscription.is_active();
        self.apply_subscription_state(subscription, active).await
    }

    /// Shared path for subscription lifecycle events: look the user up by
    /// the stored billing-customer id and apply the final active state.
    async fn apply_subscription_state(
        &self,
        subscription: SubscriptionEvent,
        active: bool,
    ) -> BillingResult<()> {
        let user = match self
            .store
            .find_user_by_customer(&subscription.customer_id)
            .await?
        {
            Some(user) => user,
            None => {
                // The customer may belong to another system or the record
                // may be gone; acknowledged so the provider stops retrying.
                tracing::info!(
                    customer_id = %subscription.customer_id,
                    subscription_id = %subscription.subscription_id,
                    "No user for billing customer, ignoring subscription event"
                );
                return Ok(());
            }
        };

        let transition = EntitlementTransition {
            user_id: user.user_id.clone(),
            active,
            stripe_session_id: user.stripe_session_id.clone(),
            stripe_customer_id: subscription.customer_id.clone(),
            stripe_subscription_id: subscription.subscription_id.clone(),
            verified_at: OffsetDateTime::now_utc(),
        };
        self.store.apply_entitlement(&transition).await?;

        tracing::info!(
            user_id = %user.user_id,
            subscription_id = %subscription.subscription_id,
            active = active,
            status = %subscription.status,
            "Subscription state reconciled"
        );

        Ok(())
    }
}
