use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde_json::json;

use crate::api::state::AppState;

pub async fn root(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "name": "BiteBank API",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Meal voucher donations and redemption",
        "status": "operational",
        "payments_enabled": state.settings.payments.enabled,
        "endpoints": {
            "health": "/health",
            "donations": "/api/donations",
            "vouchers": "/api/vouchers",
            "time_slots": "/api/time-slots",
            "metrics": "/api/metrics"
        }
    }))
}

pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let database = sqlx::query("SELECT 1")
        .execute(&state.service_context.db_pool)
        .await;

    match database {
        Ok(_) => (
            StatusCode::OK,
            Json(json!({
                "status": "healthy",
                "timestamp": chrono::Utc::now().to_rfc3339()
            })),
        ),
        Err(e) => {
            tracing::error!("Health check database ping failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "status": "unhealthy",
                    "timestamp": chrono::Utc::now().to_rfc3339()
                })),
            )
        }
    }
}
