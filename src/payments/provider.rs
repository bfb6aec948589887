use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::error::Result;
use crate::payments::session::SessionData;

/// Everything the provider needs to host checkout for one donation.
#[derive(Debug, Clone, Serialize)]
pub struct CheckoutRequest {
    pub donation_id: Uuid,
    pub amount_centavos: i64,
    pub meal_count: i32,
    pub currency: String,
    pub description: String,
    pub customer_email: Option<String>,
    pub success_url: String,
    pub cancel_url: String,
    pub expires_at: DateTime<Utc>,
    pub payment_method_types: Vec<String>,
}

/// A freshly created hosted checkout.
#[derive(Debug, Clone)]
pub struct CheckoutSession {
    pub id: String,
    pub checkout_url: Option<String>,
    pub status: Option<String>,
    /// Full provider response, persisted on the donation.
    pub raw: Value,
}

/// The external payment provider. Errors are `AppError::External` and are
/// always safe to retry: nothing local has been written when they occur.
#[async_trait]
pub trait CheckoutProvider: Send + Sync {
    async fn create_checkout_session(&self, request: &CheckoutRequest) -> Result<CheckoutSession>;

    /// `None` when the provider does not know the session.
    async fn retrieve_checkout_session(&self, session_id: &str) -> Result<Option<SessionData>>;
}
