//! HTTP surface for players and admins.
//!
//! Player routes identify the caller by the `X-User-Id` header set by the
//! authenticating proxy in front of this service. Admin routes require the
//! configured bearer token.

use crate::{
    error::Error,
    model::{ChallengeWorkloadConfig, Instance, InstanceView},
    orchestrator::Orchestrator,
    reclaimer::Reclaimer,
    registry::Registry,
    telemetry::{Metrics, MetricsSnapshot},
};
use axum::{
    http::{header, HeaderValue, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::error;

mod admin;
mod auth;
mod player;

pub use auth::{UserId, USER_ID_HEADER};

/// Shared state for all handlers
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Orchestrator,
    pub reclaimer: Arc<Reclaimer>,
    pub registry: Registry,
    pub metrics: Arc<Metrics>,
    /// Without a token every admin route answers 403
    pub admin_token: Option<Arc<str>>,
}

impl AppState {
    pub fn new(orchestrator: Orchestrator, reclaimer: Arc<Reclaimer>) -> Self {
        Self {
            registry: orchestrator.registry.clone(),
            metrics: orchestrator.metrics.clone(),
            admin_token: orchestrator.settings.admin_token.as_deref().map(Arc::from),
            orchestrator,
            reclaimer,
        }
    }
}

pub fn router(state: AppState) -> Router {
    let admin = Router::new()
        .route("/cleanup", post(admin::cleanup))
        .route("/configs", get(admin::list_configs))
        .route(
            "/configs/{challenge_id}",
            get(admin::get_config)
                .put(admin::put_config)
                .delete(admin::delete_config),
        )
        .route("/metrics", get(admin::metrics))
        .route_layer(middleware::from_fn_with_state(state.clone(), auth::require_admin));

    Router::new()
        .route("/spawn/{challenge_id}", post(player::spawn))
        .route("/stop/{challenge_id}", post(player::stop))
        .route("/status/{challenge_id}", get(player::status))
        .nest("/admin", admin)
        .route("/health", get(health))
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

/// Response body shared by every route
#[derive(Serialize, Debug, Default)]
pub struct Envelope {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instance: Option<InstanceView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cleaned: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<ChallengeWorkloadConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub configs: Option<Vec<ChallengeWorkloadConfig>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<MetricsSnapshot>,
}

impl Envelope {
    pub fn ok() -> Self {
        Self {
            success: true,
            ..Default::default()
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
            ..Default::default()
        }
    }

    pub fn with_instance(mut self, instance: &Instance) -> Self {
        self.instance = Some(InstanceView::from(instance));
        self
    }
}

impl IntoResponse for Envelope {
    fn into_response(self) -> Response {
        Json(self).into_response()
    }
}

/// Handler error carrying the HTTP status it maps to
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: Envelope,
    retry_after: Option<u64>,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            body: Envelope::failure(message),
            retry_after: None,
        }
    }
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        let status = match &e {
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Conflict => StatusCode::CONFLICT,
            Error::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Error::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let retry_after = match e {
            Error::RateLimited { retry_after } => Some(retry_after),
            _ if e.is_retryable() => Some(1),
            _ => None,
        };

        // caller mistakes are reported as-is, failures get a summary plus the cause
        let body = if status.is_client_error() {
            Envelope::failure(e.to_string())
        } else {
            error!(cluster_status = ?e.api_status(), "Request failed: {}", e);
            let summary = match e {
                Error::ClientInit(_) => "Kubernetes client error",
                Error::ClusterApi { .. } | Error::Kube(_) | Error::Timeout { .. } => "Kubernetes error",
                _ => "Internal error",
            };
            Envelope {
                error: Some(e.to_string()),
                ..Envelope::failure(summary)
            }
        };

        Self {
            status,
            body,
            retry_after,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut response = (self.status, Json(self.body)).into_response();
        if let Some(secs) = self.retry_after {
            response
                .headers_mut()
                .insert(header::RETRY_AFTER, HeaderValue::from(secs));
        }
        response
    }
}

pub type ApiResult = std::result::Result<Envelope, ApiError>;
