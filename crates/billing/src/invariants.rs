//! Entitlement Invariants Module
//!
//! Provides runnable consistency checks for the entitlement store.
//! These invariants can be run after any webhook replay or verification
//! sweep to ensure user records and the subscription index agree.
//!
//! ## Design Principles
//!
//! 1. **Executable**: Each invariant is a real SQL query that can be run
//! 2. **Explanatory**: Violations include enough context to debug
//! 3. **Non-destructive**: Checks only read, never write

use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use time::OffsetDateTime;

use crate::error::BillingResult;

/// Result of running a single invariant check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantViolation {
    /// Which invariant was violated
    pub invariant: String,
    /// User(s) affected
    pub user_ids: Vec<String>,
    /// Human-readable description of the violation
    pub description: String,
    /// Additional context for debugging
    pub context: serde_json::Value,
    /// Severity level
    pub severity: ViolationSeverity,
}

/// Severity of an invariant violation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViolationSeverity {
    /// Critical - users may have wrong premium access
    Critical,
    /// High - data inconsistency that needs attention
    High,
    /// Medium - potential issue, should investigate
    Medium,
    /// Low - minor inconsistency, informational
    Low,
}

impl std::fmt::Display for ViolationSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViolationSeverity::Critical => write!(f, "CRITICAL"),
            ViolationSeverity::High => write!(f, "HIGH"),
            ViolationSeverity::Medium => write!(f, "MEDIUM"),
            ViolationSeverity::Low => write!(f, "LOW"),
        }
    }
}

/// Summary of all invariant checks
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvariantCheckSummary {
    /// When the check was run
    pub checked_at: OffsetDateTime,
    /// Total number of checks run
    pub checks_run: usize,
    /// Number of checks that passed
    pub checks_passed: usize,
    /// Number of checks that failed
    pub checks_failed: usize,
    /// List of all violations found
    pub violations: Vec<InvariantViolation>,
    /// Overall health status
    pub healthy: bool,
}

/// Row type for premium flag / index disagreement
#[derive(Debug, sqlx::FromRow)]
struct PremiumMismatchRow {
    user_id: String,
    is_premium: bool,
    index_active: Option<bool>,
}

/// Row type for completed sessions the reconciler never confirmed
#[derive(Debug, sqlx::FromRow)]
struct UnconfirmedSessionRow {
    id: String,
    user_id: String,
    status: String,
    completed_at: Option<OffsetDateTime>,
}

/// Row type for index rows with no user record
#[derive(Debug, sqlx::FromRow)]
struct OrphanIndexRow {
    user_id: String,
    stripe_customer_id: String,
}

/// Row type for stale premium verification
#[derive(Debug, sqlx::FromRow)]
struct StaleVerificationRow {
    user_id: String,
    last_verified: Option<OffsetDateTime>,
}

/// Service for running entitlement invariant checks
pub struct InvariantChecker {
    pool: PgPool,
}

impl InvariantChecker {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Run all invariant checks and return summary
    pub async fn run_all_checks(&self) -> BillingResult<InvariantCheckSummary> {
        let now = OffsetDateTime::now_utc();
        let mut violations = Vec::new();

        violations.extend(self.check_premium_flag_matches_index().await?);
        violations.extend(self.check_active_index_has_premium_flag().await?);
        violations.extend(self.check_completed_sessions_confirmed().await?);
        violations.extend(self.check_index_rows_have_user().await?);
        violations.extend(self.check_premium_verification_fresh().await?);

        let checks_run = 5;
        let checks_failed = violations
            .iter()
            .map(|v| &v.invariant)
            .collect::<std::collections::HashSet<_>>()
            .len();
        let checks_passed = checks_run - checks_failed;

        Ok(InvariantCheckSummary {
            checked_at: now,
            checks_run,
            checks_passed,
            checks_failed,
            healthy: violations.is_empty(),
            violations,
        })
    }

    /// Invariant 1: Premium flag is backed by the index
    ///
    /// A user record with `is_premium = true` must have an index row that is
    /// active on both dimensions. Anything else means a deactivation event
    /// was applied to one collection but not the other.
    async fn check_premium_flag_matches_index(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<PremiumMismatchRow> = sqlx::query_as(
            r#"
            SELECT
                u.user_id,
                u.is_premium,
                (p.active AND p.subscription_active) as index_active
            FROM users u
            LEFT JOIN premium_subscriptions p ON p.user_id = u.user_id
            WHERE u.is_premium = TRUE
              AND (p.user_id IS NULL OR NOT (p.active AND p.subscription_active))
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "premium_flag_matches_index".to_string(),
                user_ids: vec![row.user_id.clone()],
                description: format!(
                    "User '{}' is flagged premium but has no active subscription index entry",
                    row.user_id
                ),
                context: serde_json::json!({
                    "is_premium": row.is_premium,
                    "index_active": row.index_active,
                }),
                severity: ViolationSeverity::Critical,
            })
            .collect())
    }

    /// Invariant 2: Active index rows are reflected on the user record
    ///
    /// The reconciler writes both collections in one atomic batch, so an
    /// active index row next to a non-premium user record means a partial
    /// write or an out-of-band mutation.
    async fn check_active_index_has_premium_flag(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<PremiumMismatchRow> = sqlx::query_as(
            r#"
            SELECT
                u.user_id,
                u.is_premium,
                (p.active AND p.subscription_active) as index_active
            FROM premium_subscriptions p
            JOIN users u ON u.user_id = p.user_id
            WHERE p.active = TRUE
              AND p.subscription_active = TRUE
              AND u.is_premium = FALSE
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "active_index_has_premium_flag".to_string(),
                user_ids: vec![row.user_id.clone()],
                description: format!(
                    "User '{}' has an active subscription index entry but is not flagged premium",
                    row.user_id
                ),
                context: serde_json::json!({
                    "is_premium": row.is_premium,
                    "index_active": row.index_active,
                }),
                severity: ViolationSeverity::Critical,
            })
            .collect())
    }

    /// Invariant 3: Completed checkout sessions saw a webhook
    ///
    /// A session marked completed without `webhook_received` means the
    /// completion was recorded by something other than the reconciler.
    async fn check_completed_sessions_confirmed(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<UnconfirmedSessionRow> = sqlx::query_as(
            r#"
            SELECT id, user_id, status, completed_at
            FROM checkout_sessions
            WHERE status = 'completed'
              AND webhook_received = FALSE
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "completed_sessions_confirmed".to_string(),
                user_ids: vec![row.user_id],
                description: format!(
                    "Checkout session '{}' is completed but no webhook confirmation was recorded",
                    row.id
                ),
                context: serde_json::json!({
                    "checkout_session_id": row.id,
                    "status": row.status,
                    "completed_at": row.completed_at,
                }),
                severity: ViolationSeverity::High,
            })
            .collect())
    }

    /// Invariant 4: Index rows point at real users
    async fn check_index_rows_have_user(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<OrphanIndexRow> = sqlx::query_as(
            r#"
            SELECT p.user_id, p.stripe_customer_id
            FROM premium_subscriptions p
            WHERE NOT EXISTS (
                SELECT 1 FROM users u WHERE u.user_id = p.user_id
            )
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "index_rows_have_user".to_string(),
                user_ids: vec![row.user_id.clone()],
                description: format!(
                    "Subscription index entry for '{}' has no matching user record",
                    row.user_id
                ),
                context: serde_json::json!({
                    "stripe_customer_id": row.stripe_customer_id,
                }),
                severity: ViolationSeverity::High,
            })
            .collect())
    }

    /// Invariant 5: Premium users get verified periodically
    ///
    /// Premium access without a verification pass in the last 30 days is
    /// worth a look; the flag may have drifted from provider state.
    async fn check_premium_verification_fresh(&self) -> BillingResult<Vec<InvariantViolation>> {
        let rows: Vec<StaleVerificationRow> = sqlx::query_as(
            r#"
            SELECT user_id, last_verified
            FROM users
            WHERE is_premium = TRUE
              AND (last_verified IS NULL OR last_verified < NOW() - INTERVAL '30 days')
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| InvariantViolation {
                invariant: "premium_verification_fresh".to_string(),
                user_ids: vec![row.user_id.clone()],
                description: format!(
                    "Premium user '{}' has not been verified in over 30 days",
                    row.user_id
                ),
                context: serde_json::json!({
                    "last_verified": row.last_verified,
                }),
                severity: ViolationSeverity::Low,
            })
            .collect())
    }

    /// Run a single invariant check by name
    pub async fn run_check(&self, name: &str) -> BillingResult<Vec<InvariantViolation>> {
        match name {
            "premium_flag_matches_index" => self.check_premium_flag_matches_index().await,
            "active_index_has_premium_flag" => self.check_active_index_has_premium_flag().await,
            "completed_sessions_confirmed" => self.check_completed_sessions_confirmed().await,
            "index_rows_have_user" => self.check_index_rows_have_user().await,
            "premium_verification_fresh" => self.check_premium_verification_fresh().await,
            _ => Ok(vec![]),
        }
    }

    /// Get list of all available invariant checks
    pub fn available_checks() -> Vec<&'static str> {
        vec![
            "premium_flag_matches_index",
            "active_index_has_premium_flag",
            "completed_sessions_confirmed",
            "index_rows_have_user",
            "premium_verification_fresh",
        ]
    }
}
