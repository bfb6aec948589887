use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::error::{AppError, Result};

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "paymongo-signature";

/// Reject deliveries signed more than this long ago.
pub const SIGNATURE_TOLERANCE_SECS: i64 = 300;

pub const CHECKOUT_SESSION_COMPLETED: &str = "checkout.session.completed";
pub const CHECKOUT_SESSION_EXPIRED: &str = "checkout.session.expired";

/// Hex HMAC-SHA256 of `"{timestamp}.{payload}"`.
pub fn compute_signature(secret: &str, timestamp: i64, payload: &[u8]) -> Result<String> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| AppError::Internal(format!("Invalid webhook secret: {}", e)))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Check a `t=<unix>,te=<test sig>,li=<live sig>` header against the payload.
/// Either signature may match.
pub fn verify_signature(
    header: &str,
    payload: &[u8],
    secret: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    let mut timestamp = None;
    let mut signatures = Vec::new();

    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse::<i64>().ok(),
            Some(("te", value)) | Some(("li", value)) if !value.is_empty() => {
                signatures.push(value.to_string())
            }
            _ => {}
        }
    }

    let timestamp = timestamp
        .ok_or_else(|| AppError::BadRequest("Invalid webhook signature".to_string()))?;
    if (now.timestamp() - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
        tracing::warn!(
            target: "bitebank::security",
            "Webhook signature timestamp {} outside tolerance",
            timestamp
        );
        return Err(AppError::BadRequest("Invalid webhook signature".to_string()));
    }

    let expected = compute_signature(secret, timestamp, payload)?;
    let matched = signatures
        .iter()
        .any(|candidate| bool::from(candidate.as_bytes().ct_eq(expected.as_bytes())));

    if !matched {
        tracing::warn!(target: "bitebank::security", "Webhook signature mismatch");
        return Err(AppError::BadRequest("Invalid webhook signature".to_string()));
    }

    Ok(())
}

/// `{type, data: {object: {...}}}`
#[derive(Debug, Clone)]
pub struct WebhookEnvelope {
    pub event_type: String,
    pub object: Option<Value>,
}

impl WebhookEnvelope {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let value: Value = serde_json::from_slice(payload)
            .map_err(|e| AppError::Validation(format!("Malformed webhook payload: {}", e)))?;

        let event_type = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| AppError::Validation("Malformed webhook payload: type is missing".to_string()))?
            .to_string();

        let object = value
            .get("data")
            .and_then(|data| data.get("object"))
            .filter(|object| object.is_object())
            .cloned();

        Ok(Self { event_type, object })
    }

    /// The session object and its id, required by every session event.
    pub fn session_object(&self) -> Result<(&Value, &str)> {
        let object = self.object.as_ref().ok_or_else(|| {
            AppError::Validation(format!("Malformed {} event: no session object", self.event_type))
        })?;
        let id = object
            .get("id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                AppError::Validation(format!("Malformed {} event: no session id", self.event_type))
            })?;
        Ok((object, id))
    }
}
