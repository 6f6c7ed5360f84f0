//! Stripe client and configuration

use std::sync::Arc;

use crate::error::{BillingError, BillingResult};

/// Price of the fixed premium subscription product.
///
/// Overridable via STRIPE_PREMIUM_PRICE_ID for test-mode keys.
pub const DEFAULT_PREMIUM_PRICE_ID: &str = "price_1QH2KpCsm96Q1cqshQTDWV37";

/// Stripe configuration loaded from the environment.
#[derive(Debug, Clone)]
pub struct StripeConfig {
    pub secret_key: String,
    pub webhook_secret: String,
    pub premium_price_id: String,
}

impl StripeConfig {
    /// Load from environment variables. The secret key and webhook signing
    /// secret are required; starting without them is a configuration error.
    pub fn from_env() -> BillingResult<Self> {
        let secret_key = require_env("STRIPE_SECRET_KEY")?;
        let webhook_secret = require_env("STRIPE_WEBHOOK_SECRET")?;
        let premium_price_id = std::env::var("STRIPE_PREMIUM_PRICE_ID")
            .unwrap_or_else(|_| DEFAULT_PREMIUM_PRICE_ID.to_string());

        Ok(Self {
            secret_key,
            webhook_secret,
            premium_price_id,
        })
    }
}

fn require_env(name: &str) -> BillingResult<String> {
    match std::env::var(name) {
        Ok(value) if !value.is_empty() => Ok(value),
        _ => Err(BillingError::Config(name.to_string())),
    }
}

/// Shared handle on the Stripe API client plus its configuration.
///
/// Constructed once at process start and passed into the services that need
/// it; there is no module-scoped singleton.
#[derive(Clone)]
pub struct StripeClient {
    client: stripe::Client,
    config: Arc<StripeConfig>,
}

impl StripeClient {
    pub fn new(config: StripeConfig) -> Self {
        let client = stripe::Client::new(config.secret_key.clone());
        Self {
            client,
            config: Arc::new(config),
        }
    }

    pub fn from_env() -> BillingResult<Self> {
        Ok(Self::new(StripeConfig::from_env()?))
    }

    pub fn inner(&self) -> &stripe::Client {
        &self.client
    }

    pub fn config(&self) -> &StripeConfig {
        &self.config
    }
}
