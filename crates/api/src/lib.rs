// Test code patterns:
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! Forkful API Library
//!
//! HTTP surface for the premium entitlement flow: checkout session
//! creation, the Stripe webhook endpoint, client-triggered verification,
//! and admin consistency checks.

pub mod config;
pub mod error;
pub mod routes;
pub mod state;

pub use config::Config;
pub use error::{ApiError, ApiResult};
pub use state::AppState;
