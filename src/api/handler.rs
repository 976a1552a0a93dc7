use std::sync::Arc;

use axum::extract::{Path, State};
use axum::{Json, debug_handler};
use tracing::instrument;

use crate::api::server::{AppState, JsonResult, StatusEnvelope};
use crate::util::helix::HelixUser;
use crate::util::tmi::Viewer;

// channel is accepted but not acted on yet
#[instrument]
pub async fn join_request(Path(_channel): Path<String>) -> Json<StatusEnvelope> {
    Json(StatusEnvelope::ok())
}

#[instrument(skip(state))]
pub async fn audience_request(
    State(state): State<Arc<AppState>>,
    Path(channel): Path<String>,
) -> JsonResult<Vec<Viewer>> {
    let viewers = state.tmi.fetch_chatters(&channel).await?;
    Ok(Json(viewers.into_values().collect()))
}

#[instrument(skip(state))]
#[debug_handler]
pub async fn helix_user_by_login(
    State(state): State<Arc<AppState>>,
    Path(login): Path<String>,
) -> JsonResult<Vec<HelixUser>> {
    let users = state.helix.fetch_users_by_login(&[login]).await?;
    Ok(Json(users))
}

#[instrument(skip_all)]
pub async fn unknown_request() -> Json<StatusEnvelope> {
    Json(StatusEnvelope::failure())
}
