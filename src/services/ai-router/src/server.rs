//! AI Router HTTP Server
//!
//! Routes are grouped by audience. Each group carries its own rate limiter:
//! health endpoints are public, `/v1` requires a bearer credential and
//! `/admin` additionally requires the admin token.

use crate::{
    config::Config,
    handlers::{self, ApiEnvelope},
    health::HealthMonitor,
    manager::ApiManager,
    middleware::{
        auth::{admin_middleware, auth_middleware},
        rate_limit_middleware, AuthMiddleware,
    },
    models::RouterError,
    rate_limiter::{RateLimiter, RateLimiters},
    registry::ServiceRegistry,
    router::IntelligentRouter,
    telemetry::TelemetryManager,
};
use axum::{
    extract::DefaultBodyLimit,
    http::{header, HeaderValue, Method, StatusCode},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};

/// Server state shared across all handlers
#[derive(Debug, Clone)]
pub struct ServerState {
    pub config: Arc<Config>,
    pub registry: ServiceRegistry,
    pub health: HealthMonitor,
    pub router: IntelligentRouter,
    pub manager: ApiManager,
    pub rate_limiters: RateLimiters,
    pub telemetry: TelemetryManager,
    pub started_at: DateTime<Utc>,
}

/// AI Router HTTP server
#[derive(Debug)]
pub struct AiRouterServer {
    state: ServerState,
    router: Router,
}

impl AiRouterServer {
    pub fn new(state: ServerState) -> Self {
        let router = create_router(state.clone());
        Self { state, router }
    }

    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Bind and serve until `shutdown` is cancelled
    pub async fn serve(&self, shutdown: CancellationToken) -> Result<(), RouterError> {
        let addr = format!(
            "{}:{}",
            self.state.config.server.host, self.state.config.server.port
        );

        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| RouterError::InternalError {
                message: format!("Failed to bind to address {}: {}", addr, e),
            })?;

        info!(address = %addr, "AI Router is ready and listening");

        axum::serve(listener, self.router.clone())
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .map_err(|e| RouterError::InternalError {
                message: format!("Server error: {}", e),
            })?;

        info!("HTTP server stopped");
        Ok(())
    }
}

fn cors_layer(config: &Config) -> CorsLayer {
    if !config.server.enable_cors {
        return CorsLayer::new();
    }

    let base = CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION, header::ACCEPT]);

    let origins: Vec<HeaderValue> = config
        .server
        .cors_origins
        .iter()
        .filter(|origin| origin.as_str() != "*")
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!(origin = %origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    if origins.is_empty() {
        base.allow_origin(Any)
    } else {
        base.allow_origin(origins)
    }
}

fn with_rate_limit(
    router: Router<ServerState>,
    limiter: &RateLimiter,
    enabled: bool,
) -> Router<ServerState> {
    if enabled {
        router.route_layer(middleware::from_fn_with_state(
            limiter.clone(),
            rate_limit_middleware,
        ))
    } else {
        router
    }
}

/// Create the HTTP router with all routes and middleware
pub fn create_router(state: ServerState) -> Router {
    let config = state.config.clone();
    let limiters = &state.rate_limiters;

    let auth = AuthMiddleware::new(
        state.manager.clone(),
        config.auth.admin_token.clone(),
        config.auth.api_key_prefix.clone(),
        limiters.enabled.then(|| limiters.auth.clone()),
    );

    let public = Router::new()
        .route("/health", get(handlers::health::health_check))
        .route("/health/system", get(handlers::health::system_health))
        .route("/metrics", get(handlers::health::prometheus_metrics));
    let public = with_rate_limit(public, &limiters.health, limiters.enabled);

    let api = Router::new()
        .route("/v1/route", post(handlers::routing::route_unified))
        .route("/v1/requests", post(handlers::routing::proxy_request))
        .route_layer(middleware::from_fn_with_state(auth.clone(), auth_middleware));
    let api = with_rate_limit(api, &limiters.api, limiters.enabled);

    let blog = Router::new()
        .route("/v1/blog/generate", post(handlers::routing::generate_blog))
        .route_layer(middleware::from_fn_with_state(auth.clone(), auth_middleware));
    let blog = with_rate_limit(blog, &limiters.blog_generation, limiters.enabled);

    let admin = Router::new()
        // Providers and their environments
        .route(
            "/admin/providers",
            get(handlers::providers::list_providers).post(handlers::providers::create_provider),
        )
        .route(
            "/admin/providers/:id",
            get(handlers::providers::get_provider)
                .put(handlers::providers::update_provider)
                .delete(handlers::providers::delete_provider),
        )
        .route(
            "/admin/providers/:id/health-check",
            post(handlers::providers::check_provider_health),
        )
        .route(
            "/admin/providers/:id/environments",
            post(handlers::providers::add_environment),
        )
        .route(
            "/admin/providers/:id/environments/:env_id",
            put(handlers::providers::update_environment)
                .delete(handlers::providers::remove_environment),
        )
        // API keys
        .route(
            "/admin/keys",
            get(handlers::keys::list_api_keys).post(handlers::keys::create_api_key),
        )
        .route(
            "/admin/keys/:id",
            get(handlers::keys::get_api_key)
                .put(handlers::keys::update_api_key)
                .delete(handlers::keys::delete_api_key),
        )
        .route("/admin/keys/:id/revoke", post(handlers::keys::revoke_api_key))
        // Assignments
        .route(
            "/admin/assignments",
            get(handlers::assignments::list_assignments)
                .post(handlers::assignments::create_assignment),
        )
        .route(
            "/admin/assignments/:id",
            get(handlers::assignments::get_assignment)
                .put(handlers::assignments::update_assignment)
                .delete(handlers::assignments::delete_assignment),
        )
        .route("/admin/usage", get(handlers::usage::get_usage))
        .route_layer(middleware::from_fn(admin_middleware))
        .route_layer(middleware::from_fn_with_state(auth, auth_middleware));
    let admin = with_rate_limit(admin, &limiters.admin, limiters.enabled);

    Router::new()
        .merge(public)
        .merge(api)
        .merge(blog)
        .merge(admin)
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors_layer(&config))
                .layer(DefaultBodyLimit::max(config.server.max_request_size as usize)),
        )
}

/// Global error handler for the application
impl IntoResponse for RouterError {
    fn into_response(self) -> Response {
        let status_code =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let message = match &self {
            RouterError::InternalError { .. }
            | RouterError::ConfigurationError { .. }
            | RouterError::PersistenceError { .. } => {
                error!(error = %self, "Request failed with an internal error");
                "Internal server error".to_string()
            }
            _ => self.to_string(),
        };

        (
            status_code,
            Json(ApiEnvelope::error(self.kind(), message)),
        )
            .into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;
    use serde_json::Value;

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_not_found_error_response() {
        let response = RouterError::ProviderNotFound {
            id: "missing".to_string(),
        }
        .into_response();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = body_json(response).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "provider_not_found");
        assert_eq!(body["message"], "Provider not found: missing");
        assert!(body.get("data").is_none());
    }

    #[tokio::test]
    async fn test_internal_errors_hide_details() {
        let response = RouterError::PersistenceError {
            message: "disk full at /var/lib/state.json".to_string(),
        }
        .into_response();

        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["error"], "persistence_error");
        assert_eq!(body["message"], "Internal server error");
    }

    #[tokio::test]
    async fn test_validation_error_response() {
        let response = RouterError::validation("prompt", "Prompt is required").into_response();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"], "validation_error");
    }
}
