use axum::{extract::Request, middleware::Next, response::Response};
use uuid::Uuid;

use crate::error::AppError;

/// Header set by the authenticating proxy in front of the admin routes.
pub const ACTOR_HEADER: &str = "x-actor-id";

/// The staff member or admin performing a state change.
#[derive(Debug, Clone, Copy)]
pub struct Actor {
    pub id: Uuid,
}

/// Resolve the acting user and hand it to the handler as an extension.
pub async fn require_actor(mut request: Request, next: Next) -> Result<Response, AppError> {
    let id = request
        .headers()
        .get(ACTOR_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| Uuid::parse_str(value.trim()).ok())
        .ok_or(AppError::Unauthorized)?;

    request.extensions_mut().insert(Actor { id });

    Ok(next.run(request).await)
}
