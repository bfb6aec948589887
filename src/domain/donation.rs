use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;
use validator::Validate;

use super::Moment;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Donation {
    pub id: Uuid,
    pub donor_id: Uuid,
    /// Fixed-point amount in centavos (₱195.00 is 19500).
    pub amount_centavos: i64,
    pub meal_count: i32,
    pub payment_method: String,
    pub payment_status: PaymentStatus,
    pub checkout_session_id: Option<String>,
    pub payment_intent_id: Option<String>,
    pub provider_metadata: Option<serde_json::Value>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(PaymentStatus::Pending),
            "completed" => Some(PaymentStatus::Completed),
            "failed" => Some(PaymentStatus::Failed),
            _ => None,
        }
    }
}

/// A donation left `pending` is the only one the ledger may still move.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum LedgerConflict {
    #[error("donation is already completed")]
    AlreadyCompleted,
    #[error("donation has already failed")]
    AlreadyFailed,
}

impl LedgerConflict {
    fn from_status(status: PaymentStatus) -> Option<Self> {
        match status {
            PaymentStatus::Pending => None,
            PaymentStatus::Completed => Some(LedgerConflict::AlreadyCompleted),
            PaymentStatus::Failed => Some(LedgerConflict::AlreadyFailed),
        }
    }
}

/// What the provider told us when the payment went through.
#[derive(Debug, Clone, Default)]
pub struct DonationCompletion {
    pub checkout_session_id: String,
    pub payment_intent_id: Option<String>,
    pub provider_metadata: Option<serde_json::Value>,
}

impl Donation {
    pub fn new_pending(request: &CreateDonationRequest, meal_count: i32, at: &Moment) -> Self {
        Self {
            id: Uuid::new_v4(),
            donor_id: request.donor_id,
            amount_centavos: request.amount_centavos,
            meal_count,
            payment_method: request.payment_method.clone(),
            payment_status: PaymentStatus::Pending,
            checkout_session_id: None,
            payment_intent_id: None,
            provider_metadata: None,
            completed_at: None,
            created_at: at.utc,
            updated_at: at.utc,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.payment_status == PaymentStatus::Pending
    }

    pub fn complete(
        &self,
        completion: &DonationCompletion,
        at: &Moment,
    ) -> Result<Donation, LedgerConflict> {
        if let Some(conflict) = LedgerConflict::from_status(self.payment_status) {
            return Err(conflict);
        }

        let mut next = self.clone();
        next.payment_status = PaymentStatus::Completed;
        next.checkout_session_id = Some(completion.checkout_session_id.clone());
        next.payment_intent_id = completion
            .payment_intent_id
            .clone()
            .or_else(|| self.payment_intent_id.clone());
        if completion.provider_metadata.is_some() {
            next.provider_metadata = completion.provider_metadata.clone();
        }
        next.completed_at = Some(at.utc);
        next.updated_at = at.utc;
        Ok(next)
    }

    pub fn fail(&self, at: &Moment) -> Result<Donation, LedgerConflict> {
        if let Some(conflict) = LedgerConflict::from_status(self.payment_status) {
            return Err(conflict);
        }

        let mut next = self.clone();
        next.payment_status = PaymentStatus::Failed;
        next.updated_at = at.utc;
        Ok(next)
    }

    /// Donor backed out of checkout: fail the donation and drop the
    /// session artifacts so a stale session can never complete it.
    pub fn cancel(&self, at: &Moment) -> Result<Donation, LedgerConflict> {
        let mut next = self.fail(at)?;
        next.checkout_session_id = None;
        next.payment_intent_id = None;
        Ok(next)
    }

    pub fn amount_display(&self) -> String {
        format!(
            "₱{}.{:02}",
            self.amount_centavos / 100,
            self.amount_centavos % 100
        )
    }
}

/// Meals a donation buys: whole meals only, remainder is a gift.
pub fn meals_for_amount(amount_centavos: i64, meal_price_centavos: i64) -> i32 {
    if meal_price_centavos <= 0 || amount_centavos <= 0 {
        return 0;
    }
    (amount_centavos / meal_price_centavos).min(i32::MAX as i64) as i32
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct CreateDonationRequest {
    pub donor_id: Uuid,
    #[validate(range(min = 1, message = "amount must be greater than zero"))]
    pub amount_centavos: i64,
    /// Derived from the amount when absent.
    #[validate(range(min = 1, message = "at least one meal is required"))]
    pub meal_count: Option<i32>,
    #[validate(length(min = 1, max = 50, message = "payment method is required"))]
    pub payment_method: String,
}
