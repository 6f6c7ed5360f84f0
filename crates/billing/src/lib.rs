// Billing crate clippy configuration
#![allow(clippy::field_reassign_with_default)] // Used for conditional struct field setting
// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Forkful Billing Module
//!
//! Handles the Stripe integration behind premium entitlements.
//!
//! ## Features
//!
//! - **Checkout**: Create hosted checkout sessions for the premium upgrade
//! - **Webhooks**: Verify and reconcile Stripe lifecycle events into the
//!   entitlement store
//! - **Verification**: Recompute a user's premium flag from the
//!   subscription index on demand
//! - **Invariants**: Runnable consistency checks over the store

pub mod checkout;
pub mod client;
pub mod error;
pub mod events;
pub mod invariants;
pub mod verify;
pub mod webhooks;

#[cfg(test)]
mod edge_case_tests;

// Checkout
pub use checkout::{CheckoutParams, CheckoutProvider, CheckoutService, StripeCheckout};

// Client
pub use client::{StripeClient, StripeConfig, DEFAULT_PREMIUM_PRICE_ID};

// Error
pub use error::{BillingError, BillingResult};

// Events
pub use events::{BillingEvent, CheckoutCompleted, SubscriptionEvent};

// Invariants
pub use invariants::{
    InvariantCheckSummary, InvariantChecker, InvariantViolation, ViolationSeverity,
};

// Verification
pub use verify::{EntitlementVerifier, VerifiedEntitlement};

// Webhooks
pub use webhooks::WebhookReconciler;

use forkful_shared::EntitlementStore;
use sqlx::PgPool;
use std::sync::Arc;

/// Main billing service that combines all billing functionality
pub struct BillingService {
    pub checkout: CheckoutService,
    pub webhooks: WebhookReconciler,
    pub verifier: EntitlementVerifier,
    pub invariants: InvariantChecker,
}

impl BillingService {
    /// Create a new billing service from environment variables
    pub fn from_env(pool: PgPool, store: Arc<dyn EntitlementStore>) -> BillingResult<Self> {
        let stripe = StripeClient::from_env()?;
        Ok(Self::new(stripe, pool, store))
    }

    /// Create a new billing service with an explicit Stripe client
    pub fn new(stripe: StripeClient, pool: PgPool, store: Arc<dyn EntitlementStore>) -> Self {
        let webhook_secret = stripe.config().webhook_secret.clone();
        let provider = Arc::new(StripeCheckout::new(stripe));

        Self {
            checkout: CheckoutService::new(provider, store.clone()),
            webhooks: WebhookReconciler::new(store.clone(), webhook_secret),
            verifier: EntitlementVerifier::new(store),
            invariants: InvariantChecker::new(pool),
        }
    }
}
