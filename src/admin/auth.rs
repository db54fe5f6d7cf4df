use axum::body::Body;
use axum::extract::State;
use axum::http::header::AUTHORIZATION;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::Response;

use crate::error::ServiceError;
use crate::service::AppState;
use crate::utils::log_admin_event;

/// Require `Authorization: Bearer <admin.api_key>` on admin routes
pub async fn admin_auth_middleware(
    State(state): State<AppState>,
    request: Request<Body>,
    next: Next<Body>,
) -> Result<Response, ServiceError> {
    let token = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "));

    match token {
        Some(token) if !state.admin.api_key.is_empty() && token == state.admin.api_key => Ok(next.run(request).await),
        _ => {
            log_admin_event("auth", false, Some(request.uri().path()));
            Err(ServiceError::Unauthorized)
        }
    }
}
