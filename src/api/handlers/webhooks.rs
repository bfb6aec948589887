use axum::{
    body::Bytes,
    extract::State,
    http::HeaderMap,
    Json,
};
use serde_json::{json, Value};

use crate::{
    api::state::AppState,
    error::Result,
    payments::{webhook::SIGNATURE_HEADER, WebhookOutcome},
};

pub async fn paymongo(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>> {
    let ctx = &state.service_context;
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());

    let outcome = ctx
        .reconciler
        .process_webhook(&body, signature, &ctx.clock.now())
        .await?;

    let body = match outcome {
        WebhookOutcome::Handled(outcome) => json!({
            "received": true,
            "outcome": outcome.label(),
            "donation_id": outcome.donation().id,
        }),
        WebhookOutcome::Ignored(reason) => json!({
            "received": true,
            "outcome": "ignored",
            "reason": reason,
        }),
    };

    Ok(Json(body))
}
