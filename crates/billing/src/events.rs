//! Billing provider event model
//!
//! The reconciler only acts on a closed set of Stripe event kinds. Anything
//! else parses into `Unrecognized`, which the dispatcher treats as a
//! deliberate no-op so new provider event types never break delivery.

use serde::Deserialize;
use std::collections::HashMap;

use crate::error::{BillingError, BillingResult};

/// Status literal Stripe uses for a subscription in good standing. Any other
/// status is treated as inactive.
pub const SUBSCRIPTION_STATUS_ACTIVE: &str = "active";

/// Metadata key carrying the locally generated pending-session id.
pub const METADATA_CHECKOUT_SESSION_ID: &str = "checkoutSessionId";

/// A verified, parsed provider lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BillingEvent {
    /// `checkout.session.completed`
    CheckoutCompleted(CheckoutCompleted),
    /// `customer.subscription.deleted`
    SubscriptionDeleted(SubscriptionEvent),
    /// `customer.subscription.updated`
    SubscriptionUpdated(SubscriptionEvent),
    /// Any event kind outside the recognized set. Accepted and ignored.
    Unrecognized { kind: String },
}

/// Fields the reconciler needs from a completed checkout session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckoutCompleted {
    /// Stripe's checkout-session id (`cs_...`).
    pub session_id: String,
    /// Identity handle threaded through checkout initiation.
    pub client_reference_id: Option<String>,
    pub customer_id: Option<String>,
    pub subscription_id: Option<String>,
    pub metadata: HashMap<String, String>,
}

impl CheckoutCompleted {
    /// The locally generated pending-session id, if the initiator tagged one.
    pub fn pending_session_id(&self) -> Option<&str> {
        self.metadata
            .get(METADATA_CHECKOUT_SESSION_ID)
            .map(String::as_str)
    }
}

/// Fields the reconciler needs from a subscription lifecycle event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionEvent {
    pub subscription_id: String,
    pub customer_id: String,
    pub status: String,
}

impl SubscriptionEvent {
    pub fn is_active(&self) -> bool {
        self.status == SUBSCRIPTION_STATUS_ACTIVE
    }
}

#[derive(Debug, Deserialize)]
struct EventEnvelope {
    #[serde(default)]
    id: String,
    #[serde(rename = "type")]
    kind: String,
    data: EventData,
}

#[derive(Debug, Deserialize)]
struct EventData {
    object: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct RawCheckoutSession {
    id: String,
    #[serde(default)]
    client_reference_id: Option<String>,
    #[serde(default)]
    customer: serde_json::Value,
    #[serde(default)]
    subscription: serde_json::Value,
    #[serde(default)]
    metadata: Option<HashMap<String, String>>,
}

#[derive(Debug, Deserialize)]
struct RawSubscription {
    id: String,
    #[serde(default)]
    customer: serde_json::Value,
    #[serde(default)]
    status: String,
}

/// Extract the id from an expandable Stripe reference, which may be a bare
/// id string or an expanded object carrying an `id` field.
fn expandable_id(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(id) => Some(id.clone()),
        serde_json::Value::Object(obj) => obj
            .get("id")
            .and_then(|v| v.as_str())
            .map(str::to_string),
        _ => None,
    }
}

impl BillingEvent {
    /// Parse a verified webhook payload into the closed event set.
    pub fn parse(payload: &str) -> BillingResult<Self> {
        let envelope: EventEnvelope = serde_json::from_str(payload)
            .map_err(|e| BillingError::EventParse(e.to_string()))?;

        tracing::debug!(
            event_id = %envelope.id,
            event_type = %envelope.kind,
            "Parsed webhook event envelope"
        );

        match envelope.kind.as_str() {
            "checkout.session.completed" => {
                let raw: RawCheckoutSession = serde_json::from_value(envelope.data.object)
                    .map_err(|e| BillingError::EventParse(e.to_string()))?;
                Ok(BillingEvent::CheckoutCompleted(CheckoutCompleted {
                    session_id: raw.id,
                    client_reference_id: raw.client_reference_id,
                    customer_id: expandable_id(&raw.customer),
                    subscription_id: expandable_id(&raw.subscription),
                    metadata: raw.metadata.unwrap_or_default(),
                }))
            }
            "customer.subscription.deleted" => {
                Ok(BillingEvent::SubscriptionDeleted(parse_subscription(
                    envelope.data.object,
                )?))
            }
            "customer.subscription.updated" => {
                Ok(BillingEvent::SubscriptionUpdated(parse_subscription(
                    envelope.data.object,
                )?))
            }
            _ => Ok(BillingEvent::Unrecognized {
                kind: envelope.kind,
            }),
        }
    }
}

fn parse_subscription(object: serde_json::Value) -> BillingResult<SubscriptionEvent> {
    let raw: RawSubscription =
        serde_json::from_value(object).map_err(|e| BillingError::EventParse(e.to_string()))?;
    let customer_id = expandable_id(&raw.customer).ok_or(BillingError::IncompleteEvent)?;
    Ok(SubscriptionEvent {
        subscription_id: raw.id,
        customer_id,
        status: raw.status,
    })
}
