//! Request routing handlers
//!
//! `/v1/route` goes through the intelligent router and always answers with a
//! unified envelope. `/v1/requests` and `/v1/blog/generate` go through the
//! API manager.

use axum::{
    extract::State,
    http::StatusCode,
    response::Json,
    Extension,
};

use crate::handlers::{success_response, HandlerResult};
use crate::manager::BlogGenerationRequest;
use crate::middleware::AuthContext;
use crate::models::{ApiRequest, ApiResponse, RouterError, RoutingErrorCode, UnifiedRequest, UnifiedResponse};
use crate::server::ServerState;

/// Route a free-form prompt to the best provider
pub async fn route_unified(
    State(state): State<ServerState>,
    Extension(auth): Extension<AuthContext>,
    Json(mut request): Json<UnifiedRequest>,
) -> Result<(StatusCode, Json<UnifiedResponse>), RouterError> {
    if request.prompt.trim().is_empty() {
        return Err(RouterError::validation("prompt", "Prompt is required"));
    }
    if !auth.is_admin() || request.user_id.is_none() {
        request.user_id = Some(auth.user_id.clone());
    }

    let response = state.router.route_request(request).await;
    let status = match response.error.as_ref().map(|e| e.code) {
        None => StatusCode::OK,
        Some(RoutingErrorCode::NoCompatibleServices) => StatusCode::SERVICE_UNAVAILABLE,
        Some(RoutingErrorCode::RoutingError) => StatusCode::INTERNAL_SERVER_ERROR,
    };

    Ok((status, Json(response)))
}

/// Proxy an explicit request through the API manager
pub async fn proxy_request(
    State(state): State<ServerState>,
    Extension(auth): Extension<AuthContext>,
    Json(mut request): Json<ApiRequest>,
) -> HandlerResult<ApiResponse> {
    if !auth.is_admin() {
        request.user_id = auth.user_id.clone();
        request.api_key_id = auth.api_key_id.clone();
    } else if request.user_id.is_empty() {
        request.user_id = auth.user_id.clone();
    }

    let response = state.manager.route_request(request).await?;
    success_response(response)
}

/// Generate a blog post through the blog writer provider
pub async fn generate_blog(
    State(state): State<ServerState>,
    Extension(auth): Extension<AuthContext>,
    Json(request): Json<BlogGenerationRequest>,
) -> HandlerResult<ApiResponse> {
    if request.topic.trim().is_empty() {
        return Err(RouterError::validation("topic", "Topic is required"));
    }

    let response = state
        .manager
        .generate_blog(request, &auth.user_id, auth.api_key_id.clone())
        .await?;
    success_response(response)
}
