use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bitebank::{
    api,
    config::Settings,
    database,
    payments::{CheckoutProvider, HttpCheckoutProvider},
    service::ServiceContext,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bitebank=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let settings = Settings::new().unwrap_or_else(|e| {
        tracing::warn!("Failed to load config: {}. Using defaults.", e);
        Settings::default()
    });

    tracing::info!("Starting BiteBank server on {}:{}", settings.server.host, settings.server.port);

    // Initialize database and run migrations
    let db_pool = database::connect(&settings.database).await?;

    // Payment provider, if configured
    let provider: Option<Arc<dyn CheckoutProvider>> =
        match HttpCheckoutProvider::from_config(&settings.payments)? {
            Some(provider) => {
                tracing::info!("Online payments enabled via {}", settings.payments.base_url);
                if settings.payments.webhook_secret.is_none() {
                    tracing::warn!("No webhook secret configured, webhook signatures will not be checked");
                }
                Some(Arc::new(provider))
            }
            None => {
                tracing::info!("Online payments disabled");
                None
            }
        };

    let service_context = Arc::new(ServiceContext::new(db_pool, &settings, provider).await);

    // Catch up on anything that went overdue while the server was down
    let at = service_context.clock.now();
    let swept = service_context.vouchers.expire_overdue(&at).await?;
    if swept.success_count > 0 {
        tracing::info!("Startup sweep expired {} overdue vouchers", swept.success_count);
    }
    service_context.inventory.expire_stale_units(&at).await?;

    let app = api::create_app(service_context, Arc::new(settings.clone()));

    let listener = tokio::net::TcpListener::bind(
        format!("{}:{}", settings.server.host, settings.server.port)
    ).await?;

    tracing::info!("Server listening on http://{}:{}", settings.server.host, settings.server.port);

    axum::serve(listener, app).await?;

    Ok(())
}
