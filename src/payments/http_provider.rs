use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::{json, Value};
use std::time::Duration;

use crate::{
    config::PaymentsConfig,
    error::{AppError, Result},
    payments::{
        provider::{CheckoutProvider, CheckoutRequest, CheckoutSession},
        session::SessionData,
    },
};

/// Checkout sessions over the provider's REST API, authenticated with the
/// secret key as the Basic-auth username.
pub struct HttpCheckoutProvider {
    client: Client,
    base_url: String,
    secret_key: String,
}

impl HttpCheckoutProvider {
    pub fn new(base_url: &str, secret_key: String, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            secret_key,
        })
    }

    /// `None` when payments are disabled or no secret key is configured.
    pub fn from_config(config: &PaymentsConfig) -> Result<Option<Self>> {
        if !config.enabled {
            return Ok(None);
        }
        match &config.secret_key {
            Some(key) if !key.is_empty() => Ok(Some(Self::new(
                &config.base_url,
                key.clone(),
                Duration::from_secs(config.timeout_secs),
            )?)),
            _ => {
                tracing::warn!("Payments enabled but no secret key configured");
                Ok(None)
            }
        }
    }

    fn session_url(&self, id: Option<&str>) -> String {
        match id {
            Some(id) => format!("{}/checkout-sessions/{}", self.base_url, id),
            None => format!("{}/checkout-sessions", self.base_url),
        }
    }

    fn request_body(request: &CheckoutRequest) -> Value {
        json!({
            "line_items": [{
                "name": request.description,
                "amount": request.amount_centavos,
                "currency": request.currency,
                "quantity": 1,
            }],
            "success_url": request.success_url,
            "cancel_url": request.cancel_url,
            "customer_email": request.customer_email,
            "expires_at": request.expires_at.timestamp(),
            "currency": request.currency,
            "payment_method_types": request.payment_method_types,
            "submit_type": "donate",
            "metadata": {
                "donation_id": request.donation_id.to_string(),
                "meal_count": request.meal_count,
            },
        })
    }
}

fn transport_error(err: reqwest::Error) -> AppError {
    if err.is_timeout() {
        AppError::External("Payment provider timed out".to_string())
    } else {
        AppError::External(format!("Payment provider request failed: {}", err))
    }
}

async fn status_error(response: reqwest::Response) -> AppError {
    let status = response.status();
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    AppError::External(format!("Payment provider returned {}: {}", status, body))
}

#[async_trait]
impl CheckoutProvider for HttpCheckoutProvider {
    async fn create_checkout_session(&self, request: &CheckoutRequest) -> Result<CheckoutSession> {
        let response = self
            .client
            .post(self.session_url(None))
            .basic_auth(&self.secret_key, None::<&str>)
            .json(&Self::request_body(request))
            .send()
            .await
            .map_err(transport_error)?;

        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        let raw: Value = response.json().await.map_err(transport_error)?;
        let id = raw
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| AppError::External("Checkout session has no id".to_string()))?
            .to_string();
        let checkout_url = ["payment_url", "url", "checkout_url"]
            .iter()
            .find_map(|key| raw.get(*key).and_then(Value::as_str))
            .map(str::to_string);
        let status = raw.get("status").and_then(Value::as_str).map(str::to_string);

        tracing::info!("Created checkout session {} for donation {}", id, request.donation_id);

        Ok(CheckoutSession {
            id,
            checkout_url,
            status,
            raw,
        })
    }

    async fn retrieve_checkout_session(&self, session_id: &str) -> Result<Option<SessionData>> {
        let response = self
            .client
            .get(self.session_url(Some(session_id)))
            .basic_auth(&self.secret_key, None::<&str>)
            .send()
            .await
            .map_err(transport_error)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(status_error(response).await);
        }

        let raw: Value = response.json().await.map_err(transport_error)?;
        match SessionData::from_value(&raw) {
            Ok(session) => Ok(Some(session)),
            Err(e) => {
                tracing::warn!("Unusable session {} from provider: {}", session_id, e);
                Ok(None)
            }
        }
    }
}
