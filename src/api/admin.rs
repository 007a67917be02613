use super::{ApiError, ApiResult, AppState, Envelope};
use crate::{
    error::Error,
    model::{WorkloadConfigInput, MAX_TTL_SECONDS, PROTOCOLS},
};
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use tracing::info;

/// Run one reclamation pass right away
pub async fn cleanup(State(state): State<AppState>) -> ApiResult {
    let report = state.reclaimer.tick(Utc::now()).await?;
    Ok(Envelope {
        cleaned: Some(report.reclaimed.len()),
        ..Envelope::ok()
    })
}

pub async fn list_configs(State(state): State<AppState>) -> ApiResult {
    Ok(Envelope {
        configs: Some(state.registry.list_configs()?),
        ..Envelope::ok()
    })
}

pub async fn get_config(State(state): State<AppState>, Path(challenge_id): Path<i64>) -> ApiResult {
    let config = state
        .registry
        .get_config(challenge_id)?
        .ok_or_else(|| Error::NotFound("Challenge not configured".to_string()))?;
    Ok(Envelope {
        config: Some(config),
        ..Envelope::ok()
    })
}

/// Create or replace a challenge's workload config. Completeness is checked
/// at spawn time so a draft can be saved disabled, but fields that are set
/// must be well-formed.
pub async fn put_config(
    State(state): State<AppState>,
    Path(challenge_id): Path<i64>,
    payload: Result<Json<WorkloadConfigInput>, JsonRejection>,
) -> ApiResult {
    let Json(input) =
        payload.map_err(|e| ApiError::new(StatusCode::BAD_REQUEST, e.body_text()))?;
    let config = input.into_config(challenge_id, Utc::now());

    if config.container_port < 0 || config.ttl_seconds < 0 {
        return Err(Error::Validation("Port and TTL must not be negative".to_string()).into());
    }
    if config.ttl_seconds > MAX_TTL_SECONDS {
        return Err(Error::Validation(format!("TTL must not exceed {MAX_TTL_SECONDS} seconds")).into());
    }
    if !PROTOCOLS.contains(&config.protocol.as_str()) {
        return Err(Error::Validation("Protocol must be http or https".to_string()).into());
    }

    let saved = state.registry.upsert_config(&config)?;
    info!(
        "Saved workload config for challenge {} (enabled: {})",
        challenge_id, saved.enabled
    );
    Ok(Envelope {
        config: Some(saved),
        ..Envelope::ok()
    })
}

pub async fn delete_config(
    State(state): State<AppState>,
    Path(challenge_id): Path<i64>,
) -> ApiResult {
    if !state.registry.delete_config(challenge_id)? {
        return Err(Error::NotFound("Challenge not configured".to_string()).into());
    }
    info!("Deleted workload config for challenge {}", challenge_id);
    Ok(Envelope::ok())
}

pub async fn metrics(State(state): State<AppState>) -> ApiResult {
    Ok(Envelope {
        metrics: Some(state.metrics.snapshot()),
        ..Envelope::ok()
    })
}
