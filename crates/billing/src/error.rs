//! Billing error taxonomy
//!
//! Every variant maps to one handler-boundary outcome: bad caller input,
//! failed authenticity, an event that cannot be applied, a provider failure,
//! or a store failure during verification. Handlers serialize these as JSON
//! error bodies; nothing propagates as an uncaught fault.

use forkful_shared::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum BillingError {
    /// A required caller-supplied field is absent or empty.
    #[error("Missing required parameters")]
    MissingParameters,

    /// The webhook signature header is absent, malformed, stale, or does not
    /// verify against the signing secret.
    #[error("webhook signature verification failed")]
    WebhookSignatureInvalid,

    /// The verified payload is not a parseable event envelope.
    #[error("failed to parse webhook event: {0}")]
    EventParse(String),

    /// A completed checkout carried no identity handle to reconcile against.
    #[error("no user reference found in checkout session")]
    MissingCorrelation,

    /// A completed checkout is missing the billing identifiers needed to
    /// record the entitlement.
    #[error("checkout session missing customer or subscription id")]
    IncompleteEvent,

    /// The billing provider rejected an operation.
    #[error("billing provider error: {0}")]
    Provider(String),

    /// Entitlement store failure.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Direct database failure outside the store abstraction, for example
    /// from a consistency check query.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Entitlement recomputation could not complete.
    #[error("premium verification failed: {0}")]
    Verification(String),

    /// Required configuration is absent at startup.
    #[error("missing configuration: {0}")]
    Config(String),
}

impl From<stripe::StripeError> for BillingError {
    fn from(err: stripe::StripeError) -> Self {
        BillingError::Provider(err.to_string())
    }
}

pub type BillingResult<T> = Result<T, BillingError>;
