//! Admin routes for entitlement consistency checks

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use forkful_billing::InvariantChecker;

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct InvariantQuery {
    /// Run a single named check instead of the full suite
    pub check: Option<String>,
}

/// Run entitlement invariant checks against the store.
///
/// Read-only; safe to run at any time, including after webhook replays.
pub async fn run_invariants(
    State(state): State<AppState>,
    Query(query): Query<InvariantQuery>,
) -> Result<Json<Value>, ApiError> {
    let checker = InvariantChecker::new(state.pool.clone());

    match query.check {
        Some(name) => {
            if !InvariantChecker::available_checks().contains(&name.as_str()) {
                return Err(ApiError::BadRequest(format!("unknown check: {name}")));
            }
            let violations = checker.run_check(&name).await.map_err(|e| {
                tracing::error!(check = %name, error = %e, "Invariant check failed");
                ApiError::Database(e.to_string())
            })?;
            Ok(Json(json!({
                "check": name,
                "violations": violations,
                "healthy": violations.is_empty(),
            })))
        }
        None => {
            let summary = checker.run_all_checks().await.map_err(|e| {
                tracing::error!(error = %e, "Invariant suite failed");
                ApiError::Database(e.to_string())
            })?;
            Ok(Json(serde_json::to_value(summary).map_err(|e| {
                ApiError::Internal(e.to_string())
            })?))
        }
    }
}
