// Shared crate clippy configuration
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Forkful Shared Library
//!
//! Entitlement-store document types, the storage abstraction used by the
//! billing and API crates, and database pool/migration helpers.

pub mod db;
pub mod store;
pub mod types;

pub use db::{create_pool, run_migrations};
pub use store::{
    EntitlementStore, MemoryEntitlementStore, PgEntitlementStore, StoreError, StoreResult,
};
pub use types::{
    CheckoutSessionStatus, EntitlementTransition, PendingCheckoutSession, SessionCompletion,
    SubscriptionIndexEntry, UserRecord,
};
