//! Billing routes for Stripe integration

use axum::extract::{Path, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use forkful_billing::{BillingError, CheckoutParams};

use crate::error::ApiError;
use crate::state::AppState;

/// Request to create a Stripe checkout session.
///
/// All fields are required; blanks or omissions collapse to the same
/// "Missing required parameters" rejection, so everything defaults to
/// empty rather than failing JSON extraction with a 422.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCheckoutRequest {
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub checkout_session_id: String,
    #[serde(default)]
    pub success_url: String,
    #[serde(default)]
    pub cancel_url: String,
}

/// Response from creating a checkout session
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutResponse {
    pub session_id: String,
}

/// Request to begin a checkout locally before the provider is involved
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BeginCheckoutRequest {
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub email: String,
}

/// Response carrying the locally generated pending-session id
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BeginCheckoutResponse {
    pub checkout_session_id: String,
}

fn checkout_error(e: BillingError) -> ApiError {
    match e {
        BillingError::MissingParameters => ApiError::BadRequest(e.to_string()),
        other => {
            tracing::error!(error = %other, "Checkout session creation failed");
            ApiError::Internal(other.to_string())
        }
    }
}

/// Create a hosted Stripe checkout session for the premium upgrade.
///
/// Writes no entitlement state; the webhook reconciler grants premium
/// after payment is confirmed.
pub async fn create_checkout_session(
    State(state): State<AppState>,
    Json(req): Json<CreateCheckoutRequest>,
) -> Result<Json<CheckoutResponse>, ApiError> {
    let billing = state.billing.as_ref().ok_or(ApiError::ServiceUnavailable)?;

    let params = CheckoutParams {
        user_id: req.user_id,
        email: req.email,
        checkout_session_id: req.checkout_session_id,
        success_url: req.success_url,
        cancel_url: req.cancel_url,
    };

    let session_id = billing
        .checkout
        .create_session(params)
        .await
        .map_err(checkout_error)?;

    Ok(Json(CheckoutResponse { session_id }))
}

/// Record the local pre-checkout state and hand back the pending-session
/// id the client threads into the provider session request.
pub async fn begin_checkout(
    State(state): State<AppState>,
    Json(req): Json<BeginCheckoutRequest>,
) -> Result<Json<BeginCheckoutResponse>, ApiError> {
    let billing = state.billing.as_ref().ok_or(ApiError::ServiceUnavailable)?;

    let checkout_session_id = billing
        .checkout
        .begin_checkout(&req.user_id, &req.email)
        .await
        .map_err(checkout_error)?;

    Ok(Json(BeginCheckoutResponse {
        checkout_session_id,
    }))
}

/// Handle Stripe webhook events
pub async fn webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<Value>, ApiError> {
    tracing::info!(body_len = body.len(), "Stripe webhook received");

    let billing = state.billing.as_ref().ok_or(ApiError::ServiceUnavailable)?;

    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| {
            tracing::warn!("Stripe webhook missing signature header");
            ApiError::BadRequest("Missing Stripe signature".to_string())
        })?;

    let event = billing.webhooks.verify_event(&body, signature).map_err(|e| {
        tracing::warn!(error = ?e, "Stripe webhook rejected");
        ApiError::BadRequest(e.to_string())
    })?;

    // Any reconciliation failure maps to 400 so Stripe redelivers; a 500
    // would also trigger redelivery but obscures that the event itself
    // could not be applied.
    billing.webhooks.handle_event(event).await.map_err(|e| {
        tracing::error!(error = %e, "Webhook handling error");
        ApiError::BadRequest(e.to_string())
    })?;

    tracing::info!("Stripe webhook processed successfully");

    Ok(Json(json!({ "received": true })))
}

/// Recompute a user's premium entitlement from the subscription index
pub async fn verify_entitlement(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let billing = state.billing.as_ref().ok_or(ApiError::ServiceUnavailable)?;

    let verified = billing.verifier.verify(&user_id).await.map_err(|e| {
        tracing::error!(user_id = %user_id, error = %e, "Entitlement verification failed");
        match e {
            BillingError::Verification(msg) => ApiError::NotFound(msg),
            other => ApiError::Internal(other.to_string()),
        }
    })?;

    Ok(Json(serde_json::to_value(verified).map_err(|e| {
        ApiError::Internal(e.to_string())
    })?))
}

/// Fetch a user's entitlement record, retrying briefly while a freshly
/// created record becomes visible, then recompute the premium flag so the
/// caller never sees a stale cached value.
pub async fn get_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let billing = state.billing.as_ref().ok_or(ApiError::ServiceUnavailable)?;

    let mut user = billing
        .verifier
        .load_user_data(&user_id)
        .await
        .map_err(|e| match e {
            BillingError::Verification(msg) => ApiError::NotFound(msg),
            other => {
                tracing::error!(user_id = %user_id, error = %other, "Failed to load user record");
                ApiError::Internal(other.to_string())
            }
        })?;

    let verified = billing.verifier.verify(&user_id).await.map_err(|e| {
        tracing::error!(user_id = %user_id, error = %e, "Entitlement verification failed");
        ApiError::Internal(e.to_string())
    })?;
    user.is_premium = verified.is_premium;
    user.last_verified = Some(verified.last_verified);

    Ok(Json(serde_json::to_value(user).map_err(|e| {
        ApiError::Internal(e.to_string())
    })?))
}
