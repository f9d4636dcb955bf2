//! Provider and environment administration handlers
//!
//! Environment API keys are redacted in every response.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};
use serde::Deserialize;

use crate::handlers::{created_response, success_response, ApiEnvelope, HandlerResult};
use crate::manager::{EnvironmentInput, EnvironmentUpdate, ProviderInput, ProviderUpdate};
use crate::models::{Environment, Provider, RouterError, ServiceHealth, ServiceType};
use crate::server::ServerState;

#[derive(Debug, Deserialize)]
pub struct ProviderQuery {
    #[serde(rename = "type")]
    pub provider_type: Option<ServiceType>,
}

fn redact_environment(mut environment: Environment) -> Environment {
    if !environment.api_key.is_empty() {
        environment.api_key = "***".to_string();
    }
    environment
}

pub async fn list_providers(
    State(state): State<ServerState>,
    Query(query): Query<ProviderQuery>,
) -> HandlerResult<Vec<Provider>> {
    let providers: Vec<Provider> = state
        .manager
        .list_providers(query.provider_type)
        .iter()
        .map(Provider::redacted)
        .collect();
    success_response(providers)
}

pub async fn create_provider(
    State(state): State<ServerState>,
    Json(input): Json<ProviderInput>,
) -> Result<(StatusCode, Json<ApiEnvelope<Provider>>), RouterError> {
    let provider = state.manager.create_provider(input).await?;
    created_response(provider.redacted(), "Provider created")
}

pub async fn get_provider(
    State(state): State<ServerState>,
    Path(id): Path<String>,
) -> HandlerResult<Provider> {
    success_response(state.manager.get_provider(&id)?.redacted())
}

pub async fn update_provider(
    State(state): State<ServerState>,
    Path(id): Path<String>,
    Json(update): Json<ProviderUpdate>,
) -> HandlerResult<Provider> {
    let provider = state.manager.update_provider(&id, update).await?;
    success_response(provider.redacted())
}

pub async fn delete_provider(
    State(state): State<ServerState>,
    Path(id): Path<String>,
) -> HandlerResult<Provider> {
    let provider = state.manager.delete_provider(&id).await?;
    Ok(Json(
        ApiEnvelope::success(provider.redacted()).with_message("Provider deleted"),
    ))
}

/// Run a health check immediately
pub async fn check_provider_health(
    State(state): State<ServerState>,
    Path(id): Path<String>,
) -> HandlerResult<ServiceHealth> {
    success_response(state.manager.check_provider_health(&id).await?)
}

pub async fn add_environment(
    State(state): State<ServerState>,
    Path(id): Path<String>,
    Json(input): Json<EnvironmentInput>,
) -> Result<(StatusCode, Json<ApiEnvelope<Environment>>), RouterError> {
    let environment = state.manager.add_environment(&id, input).await?;
    created_response(redact_environment(environment), "Environment added")
}

pub async fn update_environment(
    State(state): State<ServerState>,
    Path((id, environment_id)): Path<(String, String)>,
    Json(update): Json<EnvironmentUpdate>,
) -> HandlerResult<Environment> {
    let environment = state
        .manager
        .update_environment(&id, &environment_id, update)
        .await?;
    success_response(redact_environment(environment))
}

pub async fn remove_environment(
    State(state): State<ServerState>,
    Path((id, environment_id)): Path<(String, String)>,
) -> HandlerResult<Environment> {
    let environment = state.manager.remove_environment(&id, &environment_id).await?;
    Ok(Json(
        ApiEnvelope::success(redact_environment(environment)).with_message("Environment removed"),
    ))
}
