use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    Json,
};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    api::{middleware::actor::Actor, state::AppState},
    domain::{BulkOutcome, BulkVoucherRequest, ClaimHint, IssueVoucherRequest, Voucher},
    error::Result,
};

#[derive(Debug, Serialize)]
pub struct VoucherView {
    #[serde(flatten)]
    voucher: Voucher,
    claim: ClaimHint,
}

#[derive(Debug, Deserialize)]
pub struct ListParams {
    date: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub struct CancelDto {
    #[serde(default)]
    reason: String,
}

pub async fn issue(
    State(state): State<AppState>,
    Json(request): Json<IssueVoucherRequest>,
) -> Result<(StatusCode, Json<Voucher>)> {
    let ctx = &state.service_context;
    let voucher = ctx.vouchers.issue(&request, &ctx.clock.now()).await?;
    Ok((StatusCode::CREATED, Json(voucher)))
}

/// Vouchers booked for a day, today by default.
pub async fn list(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<Voucher>>> {
    let ctx = &state.service_context;
    let date = params.date.unwrap_or_else(|| ctx.clock.now().today());
    Ok(Json(ctx.vouchers.list_for_date(date).await?))
}

/// Counter lookup by the code the student shows.
pub async fn get_by_reference(
    State(state): State<AppState>,
    Path(reference): Path<String>,
) -> Result<Json<VoucherView>> {
    let ctx = &state.service_context;
    let voucher = ctx.vouchers.find_by_reference(&reference).await?;
    let claim = ctx.vouchers.can_claim(&voucher, &ctx.clock.now()).await?;
    Ok(Json(VoucherView { voucher, claim }))
}

pub async fn claim(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<Uuid>,
) -> Result<Json<Voucher>> {
    let ctx = &state.service_context;
    Ok(Json(ctx.vouchers.claim(id, actor.id, &ctx.clock.now()).await?))
}

pub async fn expire(
    State(state): State<AppState>,
    Extension(_actor): Extension<Actor>,
    Path(id): Path<Uuid>,
) -> Result<Json<Voucher>> {
    let ctx = &state.service_context;
    Ok(Json(ctx.vouchers.expire(id, &ctx.clock.now()).await?))
}

pub async fn cancel(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<Uuid>,
    Json(dto): Json<CancelDto>,
) -> Result<Json<Voucher>> {
    let ctx = &state.service_context;
    let voucher = ctx
        .vouchers
        .cancel(id, actor.id, &dto.reason, &ctx.clock.now())
        .await?;
    Ok(Json(voucher))
}

pub async fn bulk(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Json(request): Json<BulkVoucherRequest>,
) -> Result<Json<BulkOutcome>> {
    let ctx = &state.service_context;
    Ok(Json(ctx.vouchers.bulk(&request, actor.id, &ctx.clock.now()).await?))
}

pub async fn expire_overdue(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
) -> Result<Json<BulkOutcome>> {
    let ctx = &state.service_context;
    tracing::info!("Expiry sweep requested by {}", actor.id);
    Ok(Json(ctx.vouchers.expire_overdue(&ctx.clock.now()).await?))
}
