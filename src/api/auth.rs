use super::{ApiError, AppState};
use axum::{
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::warn;

/// Header carrying the authenticated player's numeric id
pub const USER_ID_HEADER: &str = "x-user-id";

/// Player identity asserted by the authenticating proxy
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UserId(pub i64);

impl<S: Send + Sync> FromRequestParts<S> for UserId {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(USER_ID_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse::<i64>().ok())
            .filter(|id| *id > 0)
            .map(UserId)
            .ok_or_else(|| ApiError::new(StatusCode::UNAUTHORIZED, "Authentication required"))
    }
}

fn bearer_token(parts: &axum::http::HeaderMap) -> Option<&str> {
    parts
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
}

/// Route layer guarding the admin routes
pub async fn require_admin(State(state): State<AppState>, req: Request, next: Next) -> Response {
    let Some(expected) = state.admin_token.as_deref() else {
        return ApiError::new(StatusCode::FORBIDDEN, "Admin access is disabled").into_response();
    };

    match bearer_token(req.headers()) {
        Some(token) if token == expected => next.run(req).await,
        Some(_) => {
            warn!("Rejected admin request with an invalid token");
            ApiError::new(StatusCode::FORBIDDEN, "Forbidden").into_response()
        }
        None => ApiError::new(StatusCode::UNAUTHORIZED, "Authentication required").into_response(),
    }
}
