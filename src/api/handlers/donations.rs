use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    api::state::AppState,
    domain::{CreateDonationRequest, Donation, PaymentStatus},
    error::Result,
    payments::CancelOutcome,
};

#[derive(Debug, Deserialize)]
pub struct StartDonationDto {
    #[serde(flatten)]
    request: CreateDonationRequest,
    customer_email: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct DonationDto {
    id: Uuid,
    donor_id: Uuid,
    amount_centavos: i64,
    amount: String,
    meal_count: i32,
    payment_method: String,
    payment_status: PaymentStatus,
    checkout_session_id: Option<String>,
    completed_at: Option<String>,
    created_at: String,
}

impl From<Donation> for DonationDto {
    fn from(donation: Donation) -> Self {
        Self {
            amount: donation.amount_display(),
            id: donation.id,
            donor_id: donation.donor_id,
            amount_centavos: donation.amount_centavos,
            meal_count: donation.meal_count,
            payment_method: donation.payment_method,
            payment_status: donation.payment_status,
            checkout_session_id: donation.checkout_session_id,
            completed_at: donation.completed_at.map(|dt| dt.to_rfc3339()),
            created_at: donation.created_at.to_rfc3339(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct CheckoutResponse {
    donation: DonationDto,
    session_id: String,
    checkout_url: Option<String>,
}

pub async fn create(
    State(state): State<AppState>,
    Json(dto): Json<StartDonationDto>,
) -> Result<(StatusCode, Json<CheckoutResponse>)> {
    let ctx = &state.service_context;
    let at = ctx.clock.now();

    let (donation, session) = ctx
        .reconciler
        .start_donation(&dto.request, dto.customer_email, &at)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(CheckoutResponse {
            donation: donation.into(),
            session_id: session.id,
            checkout_url: session.checkout_url,
        }),
    ))
}

pub async fn get(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<DonationDto>> {
    let donation = state.service_context.ledger.get(id).await?;
    Ok(Json(donation.into()))
}

#[derive(Debug, Serialize)]
pub struct CallbackResponse {
    status: &'static str,
    donation: DonationDto,
    message: Option<String>,
}

/// Donor's browser returning from a successful checkout.
pub async fn success_callback(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<CallbackResponse>> {
    let ctx = &state.service_context;
    let outcome = ctx.reconciler.confirm_from_callback(id, &ctx.clock.now()).await?;

    let message = if outcome.is_success() {
        Some("Thank you! Your meals are now available to students.".to_string())
    } else {
        Some("We are still confirming your payment.".to_string())
    };

    Ok(Json(CallbackResponse {
        status: outcome.label(),
        donation: outcome.donation().clone().into(),
        message,
    }))
}

/// Donor's browser returning from an abandoned checkout.
pub async fn cancel_callback(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<CallbackResponse>> {
    let ctx = &state.service_context;
    let response = match ctx.reconciler.mark_payment_cancelled(id, &ctx.clock.now()).await? {
        CancelOutcome::Cancelled(donation) => CallbackResponse {
            status: "cancelled",
            donation: donation.into(),
            message: None,
        },
        CancelOutcome::Ignored { donation, warning } => CallbackResponse {
            status: "ignored",
            donation: donation.into(),
            message: Some(warning),
        },
    };

    Ok(Json(response))
}
