//! Application state

use sqlx::PgPool;
use std::sync::Arc;

use forkful_billing::BillingService;
use forkful_shared::{EntitlementStore, PgEntitlementStore};

use crate::config::Config;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub config: Config,
    /// Entitlement store backing all billing reads and writes
    pub store: Arc<dyn EntitlementStore>,
    /// Billing service (None when Stripe credentials are not configured)
    pub billing: Option<Arc<BillingService>>,
}

impl AppState {
    /// Build application state. Missing Stripe configuration is fatal
    /// unless billing was explicitly disabled.
    pub fn new(pool: PgPool, config: Config) -> anyhow::Result<Self> {
        let store: Arc<dyn EntitlementStore> = Arc::new(PgEntitlementStore::new(pool.clone()));

        let billing = if config.enable_billing {
            let svc = BillingService::from_env(pool.clone(), store.clone())
                .map_err(|e| anyhow::anyhow!("Stripe billing configuration error: {e}"))?;
            tracing::info!("Stripe billing service initialized");
            Some(Arc::new(svc))
        } else {
            tracing::info!("Billing disabled via config (ENABLE_BILLING=false)");
            None
        };

        Ok(Self {
            pool,
            config,
            store,
            billing,
        })
    }

    /// Get billing service reference
    pub fn billing_service(&self) -> Option<&Arc<BillingService>> {
        self.billing.as_ref()
    }
}
