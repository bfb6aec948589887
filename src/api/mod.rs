pub mod handlers;
pub mod middleware;
pub mod state;

use axum::{
    Router,
    routing::{get, post, put},
};
use tower_http::{
    cors::CorsLayer,
    trace::TraceLayer,
};
use std::sync::Arc;

use crate::{
    config::Settings,
    service::ServiceContext,
};
use state::AppState;

pub fn create_app(service_context: Arc<ServiceContext>, settings: Arc<Settings>) -> Router {
    let app_state = AppState::new(service_context, settings);

    Router::new()
        // Root and health endpoints
        .route("/", get(handlers::root::root))
        .route("/health", get(handlers::root::health_check))

        // Provider callbacks (browser redirects and webhooks)
        .route("/donations/:id/success", get(handlers::donations::success_callback))
        .route("/donations/:id/cancel", get(handlers::donations::cancel_callback))
        .route("/webhooks/paymongo", post(handlers::webhooks::paymongo))

        .nest("/api", api_routes())

        .with_state(app_state)

        // Middleware
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/donations", donation_routes())
        .nest("/vouchers", voucher_routes())
        .nest("/time-slots", time_slot_routes())
        .nest("/metrics", metric_routes())
}

fn donation_routes() -> Router<AppState> {
    Router::new()
        .route("/", post(handlers::donations::create))
        .route("/:id", get(handlers::donations::get))
}

fn voucher_routes() -> Router<AppState> {
    Router::new()
        // Issuance and counter lookup
        .route("/", post(handlers::vouchers::issue))
        .route("/reference/:reference", get(handlers::vouchers::get_by_reference))
        // Staff actions
        .merge(
            Router::new()
                .route("/", get(handlers::vouchers::list))
                .route("/bulk", post(handlers::vouchers::bulk))
                .route("/expire-overdue", post(handlers::vouchers::expire_overdue))
                .route("/:id/claim", post(handlers::vouchers::claim))
                .route("/:id/expire", post(handlers::vouchers::expire))
                .route("/:id/cancel", post(handlers::vouchers::cancel))
                .route_layer(axum::middleware::from_fn(middleware::actor::require_actor)),
        )
}

fn time_slot_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::time_slots::list))
        .merge(
            Router::new()
                .route("/", post(handlers::time_slots::create))
                .route(
                    "/:id",
                    put(handlers::time_slots::update).delete(handlers::time_slots::delete),
                )
                .route_layer(axum::middleware::from_fn(middleware::actor::require_actor)),
        )
}

fn metric_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(handlers::metrics::list))
        .merge(
            Router::new()
                .route("/recount", post(handlers::metrics::recount))
                .route("/:name/reset", post(handlers::metrics::reset))
                .route_layer(axum::middleware::from_fn(middleware::actor::require_actor)),
        )
}
