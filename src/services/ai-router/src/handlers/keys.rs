//! API key administration handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use serde::Deserialize;

use crate::handlers::{created_response, success_response, ApiEnvelope, HandlerResult};
use crate::manager::{ApiKeyInput, ApiKeyUpdate};
use crate::models::{ApiKey, RouterError};
use crate::server::ServerState;

#[derive(Debug, Deserialize)]
pub struct UserQuery {
    pub user_id: Option<String>,
}

pub async fn list_api_keys(
    State(state): State<ServerState>,
    Query(query): Query<UserQuery>,
) -> HandlerResult<Vec<ApiKey>> {
    success_response(state.manager.list_api_keys(query.user_id.as_deref()))
}

/// Issue a key; the secret is only ever returned here
pub async fn create_api_key(
    State(state): State<ServerState>,
    Json(input): Json<ApiKeyInput>,
) -> Result<(StatusCode, Json<ApiEnvelope<ApiKey>>), RouterError> {
    let key = state.manager.create_api_key(input).await?;
    created_response(key, "Store this key now; it will not be shown again")
}

pub async fn get_api_key(
    State(state): State<ServerState>,
    Path(id): Path<String>,
) -> HandlerResult<ApiKey> {
    success_response(state.manager.get_api_key(&id)?)
}

pub async fn update_api_key(
    State(state): State<ServerState>,
    Path(id): Path<String>,
    Json(update): Json<ApiKeyUpdate>,
) -> HandlerResult<ApiKey> {
    success_response(state.manager.update_api_key(&id, update).await?)
}

pub async fn revoke_api_key(
    State(state): State<ServerState>,
    Path(id): Path<String>,
) -> HandlerResult<ApiKey> {
    let key = state.manager.revoke_api_key(&id).await?;
    Ok(Json(ApiEnvelope::success(key).with_message("API key revoked")))
}

pub async fn delete_api_key(
    State(state): State<ServerState>,
    Path(id): Path<String>,
) -> HandlerResult<ApiKey> {
    let key = state.manager.delete_api_key(&id).await?;
    Ok(Json(ApiEnvelope::success(key).with_message("API key deleted")))
}
