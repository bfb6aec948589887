use axum::{
    extract::{Extension, Path, State},
    Json,
};
use serde::Serialize;

use crate::{
    api::{middleware::actor::Actor, state::AppState},
    domain::{InventorySummary, SystemMetric},
    error::Result,
};

#[derive(Debug, Serialize)]
pub struct DashboardResponse {
    metrics: Vec<SystemMetric>,
    inventory: InventorySummary,
}

pub async fn list(State(state): State<AppState>) -> Result<Json<DashboardResponse>> {
    let ctx = &state.service_context;
    Ok(Json(DashboardResponse {
        metrics: ctx.metrics.list().await?,
        inventory: ctx.inventory.summary().await?,
    }))
}

pub async fn recount(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
) -> Result<Json<Vec<SystemMetric>>> {
    tracing::info!("Counter recount requested by {}", actor.id);
    let ctx = &state.service_context;
    Ok(Json(ctx.metrics.recount(&ctx.clock.now()).await?))
}

pub async fn reset(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(name): Path<String>,
) -> Result<Json<SystemMetric>> {
    tracing::info!("Counter {} reset requested by {}", name, actor.id);
    let ctx = &state.service_context;
    Ok(Json(ctx.metrics.reset(&name, &ctx.clock.now()).await?))
}
