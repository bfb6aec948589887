use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{AppError, Result};

/// Payment state of a checkout session as the provider reports it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderPaymentStatus {
    Paid,
    Unpaid,
    Canceled,
    Expired,
    /// Anything else (`processing`, `awaiting_payment`, ...). Never acted on.
    Other(String),
}

impl ProviderPaymentStatus {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "paid" => ProviderPaymentStatus::Paid,
            "unpaid" => ProviderPaymentStatus::Unpaid,
            "canceled" | "cancelled" => ProviderPaymentStatus::Canceled,
            "expired" => ProviderPaymentStatus::Expired,
            other => ProviderPaymentStatus::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            ProviderPaymentStatus::Paid => "paid",
            ProviderPaymentStatus::Unpaid => "unpaid",
            ProviderPaymentStatus::Canceled => "canceled",
            ProviderPaymentStatus::Expired => "expired",
            ProviderPaymentStatus::Other(raw) => raw,
        }
    }

    /// Statuses after which the donation can never be paid.
    pub fn is_terminal_failure(&self) -> bool {
        matches!(
            self,
            ProviderPaymentStatus::Unpaid
                | ProviderPaymentStatus::Canceled
                | ProviderPaymentStatus::Expired
        )
    }
}

/// The fields of a checkout session that reconciliation relies on. Anything
/// else the provider sent is kept, untouched, in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionData {
    pub id: String,
    pub payment_status: ProviderPaymentStatus,
    /// Minor units (centavos).
    pub amount_total: i64,
    pub payment_intent: Option<String>,
    pub extra: Map<String, Value>,
}

impl SessionData {
    pub fn from_value(value: &Value) -> Result<Self> {
        let object = value
            .as_object()
            .ok_or_else(|| malformed("session is not an object"))?;

        let id = object
            .get("id")
            .and_then(Value::as_str)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| malformed("session id is missing"))?
            .to_string();

        let payment_status = object
            .get("payment_status")
            .and_then(Value::as_str)
            .map(ProviderPaymentStatus::parse)
            .ok_or_else(|| malformed("payment_status is missing"))?;

        let amount_total = object
            .get("amount_total")
            .and_then(Value::as_i64)
            .ok_or_else(|| malformed("amount_total is missing or not an integer"))?;

        // Either a bare id or an expanded object carrying one.
        let payment_intent = match object.get("payment_intent") {
            Some(Value::String(id)) => Some(id.clone()),
            Some(Value::Object(intent)) => intent
                .get("id")
                .and_then(Value::as_str)
                .map(str::to_string),
            _ => None,
        };

        let extra = object
            .iter()
            .filter(|(key, _)| {
                !matches!(
                    key.as_str(),
                    "id" | "payment_status" | "amount_total" | "payment_intent"
                )
            })
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        Ok(Self {
            id,
            payment_status,
            amount_total,
            payment_intent,
            extra,
        })
    }

    /// Provider payload stored on the donation for later review.
    pub fn to_metadata(&self) -> Value {
        let mut metadata = self.extra.clone();
        metadata.insert("id".to_string(), Value::String(self.id.clone()));
        metadata.insert(
            "payment_status".to_string(),
            Value::String(self.payment_status.as_str().to_string()),
        );
        metadata.insert("amount_total".to_string(), Value::from(self.amount_total));
        if let Some(intent) = &self.payment_intent {
            metadata.insert("payment_intent".to_string(), Value::String(intent.clone()));
        }
        Value::Object(metadata)
    }
}

fn malformed(detail: &str) -> AppError {
    AppError::Validation(format!("Malformed checkout session: {}", detail))
}
