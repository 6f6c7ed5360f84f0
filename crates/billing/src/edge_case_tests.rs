// Test file - these are expected patterns in test code
#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

//! Edge Case Tests for the Entitlement Flow
//!
//! Tests critical boundary conditions in:
//! - Checkout session creation (no entitlement writes, validation)
//! - Webhook reconciliation (idempotence, unknown customers, missing ids)
//! - Client verification (index truth, write-back)

#[cfg(test)]
mod checkout_tests {
    use crate::checkout::{CheckoutParams, CheckoutProvider, CheckoutService};
    use crate::error::{BillingError, BillingResult};
    use async_trait::async_trait;
    use forkful_shared::{
        CheckoutSessionStatus, EntitlementStore, MemoryEntitlementStore, UserRecord,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct FakeProvider {
        calls: AtomicUsize,
    }

    impl FakeProvider {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl CheckoutProvider for FakeProvider {
        async fn create_premium_session(&self, _params: &CheckoutParams) -> BillingResult<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok("sess_abc".to_string())
        }
    }

    fn params(user_id: &str) -> CheckoutParams {
        CheckoutParams {
            user_id: user_id.to_string(),
            email: format!("{user_id}@example.com"),
            checkout_session_id: "local-1".to_string(),
            success_url: "https://app.example.com/success".to_string(),
            cancel_url: "https://app.example.com/".to_string(),
        }
    }

    // =========================================================================
    // Creating a checkout session must never touch entitlement state
    // =========================================================================
    #[tokio::test]
    async fn test_create_session_writes_no_entitlement() {
        let store = Arc::new(MemoryEntitlementStore::new());
        let user = UserRecord::new("u1".to_string(), "u1@example.com".to_string());
        store.upsert_user(&user).await.unwrap();

        let provider = Arc::new(FakeProvider::new());
        let service = CheckoutService::new(provider.clone(), store.clone());

        let session_id = service.create_session(params("u1")).await.unwrap();
        assert_eq!(session_id, "sess_abc");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);

        let after = store.get_user("u1").await.unwrap().unwrap();
        assert!(!after.is_premium);
        assert!(!after.subscription_active);
        assert_eq!(store.index_len().await, 0);
    }

    // =========================================================================
    // Any blank required parameter is rejected before the provider is called
    // =========================================================================
    #[tokio::test]
    async fn test_missing_email_rejected() {
        let store = Arc::new(MemoryEntitlementStore::new());
        let provider = Arc::new(FakeProvider::new());
        let service = CheckoutService::new(provider.clone(), store);

        let mut p = params("u1");
        p.email = String::new();

        assert!(matches!(
            service.create_session(p).await,
            Err(BillingError::MissingParameters)
        ));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    // =========================================================================
    // begin_checkout records a pending session and a pending flag, not premium
    // =========================================================================
    #[tokio::test]
    async fn test_begin_checkout_records_pending_state() {
        let store = Arc::new(MemoryEntitlementStore::new());
        let user = UserRecord::new("u1".to_string(), "u1@example.com".to_string());
        store.upsert_user(&user).await.unwrap();

        let service = CheckoutService::new(Arc::new(FakeProvider::new()), store.clone());
        let pending_id = service.begin_checkout("u1", "u1@example.com").await.unwrap();

        let session = store.get_pending_session(&pending_id).await.unwrap().unwrap();
        assert_eq!(session.status, CheckoutSessionStatus::Pending);
        assert!(!session.webhook_received);

        let after = store.get_user("u1").await.unwrap().unwrap();
        assert!(after.premium_pending);
        assert!(!after.is_premium);
        assert_eq!(
            after.pending_checkout_session_id.as_deref(),
            Some(pending_id.as_str())
        );
    }
}

#[cfg(test)]
mod webhook_tests {
    use crate::error::BillingError;
    use crate::events::{BillingEvent, CheckoutCompleted, SubscriptionEvent};
    use crate::webhooks::WebhookReconciler;
    use forkful_shared::{
        CheckoutSessionStatus, EntitlementStore, MemoryEntitlementStore, StoreError, UserRecord,
    };
    use std::collections::HashMap;
    use std::sync::Arc;

    fn reconciler(store: Arc<MemoryEntitlementStore>) -> WebhookReconciler {
        WebhookReconciler::new(store, "whsec_test".to_string())
    }

    async fn seed_user(store: &MemoryEntitlementStore, user_id: &str) {
        let user = UserRecord::new(user_id.to_string(), format!("{user_id}@example.com"));
        store.upsert_user(&user).await.unwrap();
    }

    fn completed_session(user_id: &str, metadata: HashMap<String, String>) -> CheckoutCompleted {
        CheckoutCompleted {
            session_id: "cs_test_1".to_string(),
            client_reference_id: Some(user_id.to_string()),
            customer_id: Some("cus_1".to_string()),
            subscription_id: Some("sub_1".to_string()),
            metadata,
        }
    }

    // =========================================================================
    // checkout.session.completed applied twice leaves the store unchanged
    // =========================================================================
    #[tokio::test]
    async fn test_checkout_completed_is_idempotent() {
        let store = Arc::new(MemoryEntitlementStore::new());
        seed_user(&store, "u1").await;
        let reconciler = reconciler(store.clone());

        let event = BillingEvent::CheckoutCompleted(completed_session("u1", HashMap::new()));
        reconciler.handle_event(event.clone()).await.unwrap();

        let first = store.get_user("u1").await.unwrap().unwrap();
        assert!(first.is_premium);
        assert!(first.webhook_confirmed);
        assert_eq!(store.index_len().await, 1);

        reconciler.handle_event(event).await.unwrap();

        let second = store.get_user("u1").await.unwrap().unwrap();
        assert!(second.is_premium);
        assert_eq!(second.stripe_subscription_id, first.stripe_subscription_id);
        assert_eq!(store.index_len().await, 1);
    }

    // =========================================================================
    // checkout.session.completed without client_reference_id fails and
    // leaves the store untouched
    // =========================================================================
    #[tokio::test]
    async fn test_missing_user_reference_is_error() {
        let store = Arc::new(MemoryEntitlementStore::new());
        seed_user(&store, "u1").await;
        let reconciler = reconciler(store.clone());

        let mut session = completed_session("u1", HashMap::new());
        session.client_reference_id = None;

        assert!(matches!(
            reconciler
                .handle_event(BillingEvent::CheckoutCompleted(session))
                .await,
            Err(BillingError::MissingCorrelation)
        ));

        let user = store.get_user("u1").await.unwrap().unwrap();
        assert!(!user.is_premium);
        assert_eq!(store.index_len().await, 0);
    }

    // =========================================================================
    // checkout.session.completed for an unknown user surfaces NotFound so
    // the provider retries once the record exists
    // =========================================================================
    #[tokio::test]
    async fn test_unknown_user_surfaces_not_found() {
        let store = Arc::new(MemoryEntitlementStore::new());
        let reconciler = reconciler(store.clone());

        let event = BillingEvent::CheckoutCompleted(completed_session("ghost", HashMap::new()));
        assert!(matches!(
            reconciler.handle_event(event).await,
            Err(BillingError::Store(StoreError::NotFound(_)))
        ));
        assert_eq!(store.index_len().await, 0);
    }

    // =========================================================================
    // Pending session correlation: the metadata id marks the local record
    // completed with webhook_received set
    // =========================================================================
    #[tokio::test]
    async fn test_pending_session_completed_via_metadata() {
        let store = Arc::new(MemoryEntitlementStore::new());
        seed_user(&store, "u1").await;
        let pending =
            forkful_shared::PendingCheckoutSession::new("local-1", "u1", "u1@example.com");
        store.create_pending_session(&pending).await.unwrap();

        let reconciler = reconciler(store.clone());
        let mut metadata = HashMap::new();
        metadata.insert("checkoutSessionId".to_string(), "local-1".to_string());
        reconciler
            .handle_event(BillingEvent::CheckoutCompleted(completed_session(
                "u1", metadata,
            )))
            .await
            .unwrap();

        let session = store.get_pending_session("local-1").await.unwrap().unwrap();
        assert_eq!(session.status, CheckoutSessionStatus::Completed);
        assert!(session.webhook_received);
        assert_eq!(session.stripe_session_id.as_deref(), Some("cs_test_1"));
        assert!(session.completed_at.is_some());
    }

    // =========================================================================
    // subscription.deleted for a customer nobody owns is an acknowledged
    // no-op with zero writes
    // =========================================================================
    #[tokio::test]
    async fn test_unknown_customer_delete_is_noop() {
        let store = Arc::new(MemoryEntitlementStore::new());
        seed_user(&store, "u1").await;
        let reconciler = reconciler(store.clone());

        reconciler
            .handle_event(BillingEvent::SubscriptionDeleted(SubscriptionEvent {
                subscription_id: "sub_x".to_string(),
                customer_id: "cus_unknown".to_string(),
                status: "canceled".to_string(),
            }))
            .await
            .unwrap();

        let user = store.get_user("u1").await.unwrap().unwrap();
        assert!(!user.is_premium);
        assert_eq!(store.index_len().await, 0);
    }

    // =========================================================================
    // subscription.deleted after a grant revokes premium in both collections
    // =========================================================================
    #[tokio::test]
    async fn test_subscription_deleted_revokes_premium() {
        let store = Arc::new(MemoryEntitlementStore::new());
        seed_user(&store, "u1").await;
        let reconciler = reconciler(store.clone());

        reconciler
            .handle_event(BillingEvent::CheckoutCompleted(completed_session(
                "u1",
                HashMap::new(),
            )))
            .await
            .unwrap();
        reconciler
            .handle_event(BillingEvent::SubscriptionDeleted(SubscriptionEvent {
                subscription_id: "sub_1".to_string(),
                customer_id: "cus_1".to_string(),
                status: "canceled".to_string(),
            }))
            .await
            .unwrap();

        let user = store.get_user("u1").await.unwrap().unwrap();
        assert!(!user.is_premium);
        assert!(!user.subscription_active);
        assert!(store
            .active_subscription_for_customer("cus_1")
            .await
            .unwrap()
            .is_none());
    }

    // =========================================================================
    // Repeated subscription.updated with status=active keeps a single index
    // row and premium true
    // =========================================================================
    #[tokio::test]
    async fn test_repeated_updates_keep_single_index_row() {
        let store = Arc::new(MemoryEntitlementStore::new());
        seed_user(&store, "u1").await;
        let reconciler = reconciler(store.clone());

        reconciler
            .handle_event(BillingEvent::CheckoutCompleted(completed_session(
                "u1",
                HashMap::new(),
            )))
            .await
            .unwrap();

        let update = BillingEvent::SubscriptionUpdated(SubscriptionEvent {
            subscription_id: "sub_1".to_string(),
            customer_id: "cus_1".to_string(),
            status: "active".to_string(),
        });
        reconciler.handle_event(update.clone()).await.unwrap();
        reconciler.handle_event(update).await.unwrap();

        let user = store.get_user("u1").await.unwrap().unwrap();
        assert!(user.is_premium);
        assert_eq!(store.index_len().await, 1);
    }

    // =========================================================================
    // subscription.updated with a non-active status revokes premium
    // =========================================================================
    #[tokio::test]
    async fn test_update_to_past_due_revokes_premium() {
        let store = Arc::new(MemoryEntitlementStore::new());
        seed_user(&store, "u1").await;
        let reconciler = reconciler(store.clone());

        reconciler
            .handle_event(BillingEvent::CheckoutCompleted(completed_session(
                "u1",
                HashMap::new(),
            )))
            .await
            .unwrap();
        reconciler
            .handle_event(BillingEvent::SubscriptionUpdated(SubscriptionEvent {
                subscription_id: "sub_1".to_string(),
                customer_id: "cus_1".to_string(),
                status: "past_due".to_string(),
            }))
            .await
            .unwrap();

        let user = store.get_user("u1").await.unwrap().unwrap();
        assert!(!user.is_premium);
    }

    // =========================================================================
    // Unrecognized event types are acknowledged without touching the store
    // =========================================================================
    #[tokio::test]
    async fn test_unrecognized_event_is_acknowledged() {
        let store = Arc::new(MemoryEntitlementStore::new());
        seed_user(&store, "u1").await;
        let reconciler = reconciler(store.clone());

        reconciler
            .handle_event(BillingEvent::Unrecognized {
                kind: "invoice.paid".to_string(),
            })
            .await
            .unwrap();

        let user = store.get_user("u1").await.unwrap().unwrap();
        assert!(!user.is_premium);
        assert_eq!(store.index_len().await, 0);
    }
}

#[cfg(test)]
mod verifier_tests {
    use crate::events::{BillingEvent, CheckoutCompleted, SubscriptionEvent};
    use crate::verify::EntitlementVerifier;
    use crate::webhooks::WebhookReconciler;
    use forkful_shared::{EntitlementStore, MemoryEntitlementStore, UserRecord};
    use std::collections::HashMap;
    use std::sync::Arc;

    async fn seed_user(store: &MemoryEntitlementStore, user_id: &str) {
        let user = UserRecord::new(user_id.to_string(), format!("{user_id}@example.com"));
        store.upsert_user(&user).await.unwrap();
    }

    fn grant(user_id: &str) -> BillingEvent {
        BillingEvent::CheckoutCompleted(CheckoutCompleted {
            session_id: "cs_test_1".to_string(),
            client_reference_id: Some(user_id.to_string()),
            customer_id: Some("cus_1".to_string()),
            subscription_id: Some("sub_1".to_string()),
            metadata: HashMap::new(),
        })
    }

    // =========================================================================
    // Verification agrees with the index after a full grant/revoke cycle
    // =========================================================================
    #[tokio::test]
    async fn test_verifier_tracks_index_truth() {
        let store = Arc::new(MemoryEntitlementStore::new());
        seed_user(&store, "u1").await;
        let reconciler = WebhookReconciler::new(store.clone(), "whsec_test".to_string());
        let verifier = EntitlementVerifier::new(store.clone());

        reconciler.handle_event(grant("u1")).await.unwrap();
        assert!(verifier.verify("u1").await.unwrap().is_premium);

        reconciler
            .handle_event(BillingEvent::SubscriptionDeleted(SubscriptionEvent {
                subscription_id: "sub_1".to_string(),
                customer_id: "cus_1".to_string(),
                status: "canceled".to_string(),
            }))
            .await
            .unwrap();
        assert!(!verifier.verify("u1").await.unwrap().is_premium);
    }

    // =========================================================================
    // Verification always writes back a fresh timestamp, even when the flag
    // did not change
    // =========================================================================
    #[tokio::test]
    async fn test_verification_always_writes_back() {
        let store = Arc::new(MemoryEntitlementStore::new());
        seed_user(&store, "u1").await;
        let verifier = EntitlementVerifier::new(store.clone());

        let first = verifier.verify("u1").await.unwrap();
        let second = verifier.verify("u1").await.unwrap();
        assert!(second.last_verified >= first.last_verified);

        let user = store.get_user("u1").await.unwrap().unwrap();
        assert_eq!(user.last_verified, Some(second.last_verified));
    }
}
