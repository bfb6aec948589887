use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::{
    api::state::AppState,
    domain::{CreateTimeSlotRequest, TimeSlot, UpdateTimeSlotRequest},
    error::Result,
};

#[derive(Debug, Deserialize)]
pub struct ListParams {
    #[serde(default)]
    include_inactive: bool,
}

pub async fn list(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<Vec<TimeSlot>>> {
    let slots = state
        .service_context
        .time_slots
        .list(params.include_inactive)
        .await?;
    Ok(Json(slots))
}

pub async fn create(
    State(state): State<AppState>,
    Json(request): Json<CreateTimeSlotRequest>,
) -> Result<(StatusCode, Json<TimeSlot>)> {
    let ctx = &state.service_context;
    let slot = ctx.time_slots.create(request, &ctx.clock.now()).await?;
    Ok((StatusCode::CREATED, Json(slot)))
}

pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(request): Json<UpdateTimeSlotRequest>,
) -> Result<Json<TimeSlot>> {
    let ctx = &state.service_context;
    Ok(Json(ctx.time_slots.update(id, request, &ctx.clock.now()).await?))
}

pub async fn delete(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode> {
    state.service_context.time_slots.delete(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
