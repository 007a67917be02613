use super::{ApiResult, AppState, Envelope, UserId};
use axum::extract::{Path, State};

pub async fn spawn(
    State(state): State<AppState>,
    user: UserId,
    Path(challenge_id): Path<i64>,
) -> ApiResult {
    let instance = state.orchestrator.spawn(challenge_id, user.0).await?;
    Ok(Envelope::ok().with_instance(&instance))
}

pub async fn stop(
    State(state): State<AppState>,
    user: UserId,
    Path(challenge_id): Path<i64>,
) -> ApiResult {
    let instance = state.orchestrator.stop(challenge_id, user.0).await?;
    Ok(Envelope::ok().with_instance(&instance))
}

pub async fn status(
    State(state): State<AppState>,
    user: UserId,
    Path(challenge_id): Path<i64>,
) -> ApiResult {
    let instance = state.orchestrator.status(challenge_id, user.0).await?;
    Ok(Envelope::ok().with_instance(&instance))
}
