//! HTTP route table

pub mod admin;
pub mod billing;

use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use crate::state::AppState;

/// Build the application router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/billing/checkout-session", post(billing::create_checkout_session))
        .route("/billing/checkout/begin", post(billing::begin_checkout))
        .route("/billing/webhook", post(billing::webhook))
        .route(
            "/billing/entitlement/{user_id}/verify",
            post(billing::verify_entitlement),
        )
        .route("/billing/users/{user_id}", get(billing::get_user))
        .route("/admin/billing/invariants", get(admin::run_invariants))
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use forkful_billing::{BillingService, StripeClient, StripeConfig};
    use forkful_shared::{EntitlementStore, MemoryEntitlementStore, UserRecord};
    use hmac::{Hmac, Mac};
    use sha2::Sha256;
    use std::sync::Arc;
    use tower::ServiceExt;

    const TEST_WEBHOOK_SECRET: &str = "whsec_router_secret";

    fn test_config(enable_billing: bool) -> Config {
        Config {
            database_url: "postgres://localhost/forkful_test".to_string(),
            bind_address: "127.0.0.1:0".to_string(),
            allowed_origins: "http://localhost:3000".to_string(),
            enable_billing,
        }
    }

    fn lazy_pool() -> sqlx::PgPool {
        sqlx::PgPool::connect_lazy("postgres://localhost/forkful_test").expect("lazy pool")
    }

    fn test_state() -> AppState {
        // No Stripe credentials here; billing stays off entirely.
        AppState::new(lazy_pool(), test_config(false)).expect("state without billing")
    }

    /// State with the billing surface live against an in-memory store. The
    /// Stripe client never leaves the process; only webhook plumbing is
    /// exercised.
    fn billing_test_state() -> (AppState, Arc<MemoryEntitlementStore>) {
        let pool = lazy_pool();
        let memory = Arc::new(MemoryEntitlementStore::new());
        let store: Arc<dyn EntitlementStore> = memory.clone();
        let stripe = StripeClient::new(StripeConfig {
            secret_key: "sk_test_local".to_string(),
            webhook_secret: TEST_WEBHOOK_SECRET.to_string(),
            premium_price_id: "price_test".to_string(),
        });
        let billing = BillingService::new(stripe, pool.clone(), store.clone());
        let state = AppState {
            pool,
            config: test_config(true),
            store,
            billing: Some(Arc::new(billing)),
        };
        (state, memory)
    }

    fn sign(payload: &str, secret: &str, timestamp: i64) -> String {
        let key = secret.strip_prefix("whsec_").unwrap_or(secret);
        let mut mac = Hmac::<Sha256>::new_from_slice(key.as_bytes()).unwrap();
        mac.update(format!("{timestamp}.{payload}").as_bytes());
        let sig = hex::encode(mac.finalize().into_bytes());
        format!("t={timestamp},v1={sig}")
    }

    fn webhook_request(payload: &str, signature: &str) -> Request<Body> {
        Request::post("/billing/webhook")
            .header("stripe-signature", signature)
            .header("content-type", "application/json")
            .body(Body::from(payload.to_string()))
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let app = create_router(test_state());
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let app = create_router(test_state());
        let response = app
            .oneshot(Request::get("/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_webhook_unavailable_without_billing() {
        let app = create_router(test_state());
        let response = app
            .oneshot(
                Request::post("/billing/webhook")
                    .header("content-type", "application/json")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_webhook_acknowledges_signed_event() {
        let (state, _) = billing_test_state();
        let app = create_router(state);

        let payload = r#"{"id":"evt_1","type":"invoice.paid","data":{"object":{}}}"#;
        let now = time::OffsetDateTime::now_utc().unix_timestamp();
        let signature = sign(payload, TEST_WEBHOOK_SECRET, now);

        let response = app
            .oneshot(webhook_request(payload, &signature))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({ "received": true }));
    }

    #[tokio::test]
    async fn test_webhook_grants_premium_over_http() {
        let (state, store) = billing_test_state();
        let user = UserRecord::new("u1".to_string(), "u1@example.com".to_string());
        store.upsert_user(&user).await.unwrap();
        let app = create_router(state);

        let payload = r#"{
            "id": "evt_2",
            "type": "checkout.session.completed",
            "data": {
                "object": {
                    "id": "cs_123",
                    "client_reference_id": "u1",
                    "customer": "cus_9",
                    "subscription": "sub_9",
                    "metadata": {"userId": "u1"}
                }
            }
        }"#;
        let now = time::OffsetDateTime::now_utc().unix_timestamp();
        let signature = sign(payload, TEST_WEBHOOK_SECRET, now);

        let response = app
            .oneshot(webhook_request(payload, &signature))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let after = store.get_user("u1").await.unwrap().unwrap();
        assert!(after.is_premium);
        assert!(after.webhook_confirmed);
    }

    #[tokio::test]
    async fn test_webhook_bad_signature_is_400() {
        let (state, _) = billing_test_state();
        let app = create_router(state);

        let payload = r#"{"id":"evt_1","type":"invoice.paid","data":{"object":{}}}"#;
        let now = time::OffsetDateTime::now_utc().unix_timestamp();
        let signature = sign(payload, "whsec_wrong_secret", now);

        let response = app
            .oneshot(webhook_request(payload, &signature))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert!(body.get("error").is_some());
    }

    #[tokio::test]
    async fn test_webhook_missing_signature_header_is_400() {
        let (state, _) = billing_test_state();
        let app = create_router(state);

        let response = app
            .oneshot(
                Request::post("/billing/webhook")
                    .header("content-type", "application/json")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"], "Missing Stripe signature");
    }
}
