use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::domain::{DomainEvent, Moment};
use crate::error::Result;

pub mod metrics_projector;

pub use metrics_projector::MetricsProjector;

/// A projection fed by committed domain events. `at` is the moment of the
/// transition that produced the event.
#[async_trait]
pub trait EventHandler: Send + Sync {
    fn name(&self) -> &str;
    async fn handle_event(&self, event: &DomainEvent, at: &Moment) -> Result<()>;
}

/// In-process fan-out of domain events. Events are published only after the
/// transaction that produced them commits; a failing handler is logged and
/// never reaches the caller.
pub struct EventBus {
    handlers: RwLock<Vec<Arc<dyn EventHandler>>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(Vec::new()),
        }
    }

    pub async fn register(&self, handler: Arc<dyn EventHandler>) {
        tracing::info!("Registered event handler: {}", handler.name());
        self.handlers.write().await.push(handler);
    }

    pub async fn publish(&self, event: DomainEvent, at: &Moment) {
        let handlers = self.handlers.read().await;

        for handler in handlers.iter() {
            match handler.handle_event(&event, at).await {
                Ok(_) => {
                    tracing::debug!(
                        "Handler {} processed {}",
                        handler.name(),
                        event.name()
                    );
                }
                Err(e) => {
                    tracing::error!(
                        "Handler {} failed to process {}: {:?}",
                        handler.name(),
                        event.name(),
                        e
                    );
                }
            }
        }
    }

    pub async fn publish_all(&self, events: impl IntoIterator<Item = DomainEvent>, at: &Moment) {
        for event in events {
            self.publish(event, at).await;
        }
    }
}
