//! Bearer-token identity gate for `/api` routes.

use axum::extract::{Request, State};
use axum::http::{header, HeaderMap};
use axum::middleware::Next;
use axum::response::Response;
use tracing::debug;

use crate::error::ApiError;
use crate::handlers::AppState;

fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

/// Compare without short-circuiting on the first differing byte.
fn tokens_match(presented: &str, expected: &str) -> bool {
    presented.len() == expected.len()
        && presented
            .bytes()
            .zip(expected.bytes())
            .fold(0u8, |acc, (a, b)| acc | (a ^ b))
            == 0
}

/// Reject requests without the configured token. Open when no token is configured.
pub async fn require_identity(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    if let Some(expected) = state.api_token.as_deref() {
        let presented = extract_bearer_token(req.headers()).ok_or(ApiError::Unauthorized)?;
        if !tokens_match(presented, expected) {
            debug!("Rejected request to {} with invalid token", req.uri().path());
            return Err(ApiError::Unauthorized);
        }
    }

    Ok(next.run(req).await)
}
