//! Checkout session initiation
//!
//! Two steps: `begin_checkout` records the local pending-session bookkeeping,
//! then `create_session` asks Stripe for a hosted checkout session tagged
//! with the identity handle and pending-session id so the webhook reconciler
//! can correlate the completion notification back to this request.
//!
//! Neither step grants entitlement. Premium is only ever granted by the
//! reconciler once the provider confirms payment.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use stripe::{
    CheckoutSession, CheckoutSessionMode, CreateCheckoutSession, CreateCheckoutSessionLineItems,
    CreateCheckoutSessionPaymentMethodTypes,
};
use uuid::Uuid;

use forkful_shared::{EntitlementStore, PendingCheckoutSession};

use crate::client::StripeClient;
use crate::error::{BillingError, BillingResult};

/// Everything needed to mint a provider checkout session.
#[derive(Debug, Clone)]
pub struct CheckoutParams {
    pub user_id: String,
    pub email: String,
    /// Locally generated pending-session id, echoed back in webhook metadata.
    pub checkout_session_id: String,
    pub success_url: String,
    pub cancel_url: String,
}

impl CheckoutParams {
    fn validate(&self) -> BillingResult<()> {
        let required = [
            &self.user_id,
            &self.email,
            &self.checkout_session_id,
            &self.success_url,
            &self.cancel_url,
        ];
        if required.iter().any(|field| field.is_empty()) {
            return Err(BillingError::MissingParameters);
        }
        Ok(())
    }
}

/// Seam over the billing provider's "create session" operation.
#[async_trait]
pub trait CheckoutProvider: Send + Sync {
    /// Create a subscription-mode checkout session for the fixed premium
    /// product and return its opaque session id.
    async fn create_premium_session(&self, params: &CheckoutParams) -> BillingResult<String>;
}

/// Stripe-backed checkout provider.
pub struct StripeCheckout {
    stripe: StripeClient,
}

impl StripeCheckout {
    pub fn new(stripe: StripeClient) -> Self {
        Self { stripe }
    }
}

#[async_trait]
impl CheckoutProvider for StripeCheckout {
    async fn create_premium_session(&self, params: &CheckoutParams) -> BillingResult<String> {
        // Stripe substitutes the real session id into the success redirect.
        let success_url = format!("{}?session_id={{CHECKOUT_SESSION_ID}}", params.success_url);

        let metadata: HashMap<String, String> = HashMap::from([
            ("userId".to_string(), params.user_id.clone()),
            (
                "checkoutSessionId".to_string(),
                params.checkout_session_id.clone(),
            ),
            ("source".to_string(), "web_client".to_string()),
        ]);

        let mut create = CreateCheckoutSession::new();
        create.mode = Some(CheckoutSessionMode::Subscription);
        create.payment_method_types = Some(vec![CreateCheckoutSessionPaymentMethodTypes::Card]);
        create.line_items = Some(vec![CreateCheckoutSessionLineItems {
            price: Some(self.stripe.config().premium_price_id.clone()),
            quantity: Some(1),
            ..Default::default()
        }]);
        create.success_url = Some(&success_url);
        create.cancel_url = Some(&params.cancel_url);
        create.client_reference_id = Some(&params.user_id);
        create.customer_email = Some(&params.email);
        create.metadata = Some(metadata);

        let session = CheckoutSession::create(self.stripe.inner(), create).await?;

        tracing::info!(
            user_id = %params.user_id,
            checkout_session_id = %params.checkout_session_id,
            stripe_session_id = %session.id,
            "Created Stripe checkout session"
        );

        Ok(session.id.to_string())
    }
}

/// Checkout service: local bookkeeping plus provider session creation.
pub struct CheckoutService {
    provider: Arc<dyn CheckoutProvider>,
    store: Arc<dyn EntitlementStore>,
}

impl CheckoutService {
    pub fn new(provider: Arc<dyn CheckoutProvider>, store: Arc<dyn EntitlementStore>) -> Self {
        Self { provider, store }
    }

    /// Record the pre-checkout state: a pending-session record plus a
    /// premium-pending flag on the user. Returns the locally generated
    /// pending-session id to thread through the provider session.
    pub async fn begin_checkout(&self, user_id: &str, email: &str) -> BillingResult<String> {
        if user_id.is_empty() || email.is_empty() {
            return Err(BillingError::MissingParameters);
        }

        let pending_id = Uuid::new_v4().to_string();
        let session = PendingCheckoutSession::new(pending_id.clone(), user_id, email);
        self.store.create_pending_session(&session).await?;
        self.store.mark_premium_pending(user_id, &pending_id).await?;

        tracing::info!(
            user_id = %user_id,
            checkout_session_id = %pending_id,
            "Pending checkout session recorded"
        );

        Ok(pending_id)
    }

    /// Request a hosted checkout session from the provider. Writes no
    /// entitlement state; the only side effect is the remote session.
    pub async fn create_session(&self, params: CheckoutParams) -> BillingResult<String> {
        params.validate()?;
        self.provider.create_premium_session(&params).await
    }
}
