//! Authentication middleware for the AI Router Service
//!
//! Callers authenticate with `Authorization: Bearer <token>`. Tokens carrying
//! the API key prefix resolve to the key's user; the configured admin token
//! yields an administrator context. Failed attempts are counted against the
//! `auth` rate limiter.

use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::manager::ApiManager;
use crate::middleware::rate_limit::rate_limited_response;
use crate::models::RouterError;
use crate::rate_limiter::RateLimiter;

/// Identity user for requests made with the admin token
pub const ADMIN_USER_ID: &str = "admin";

/// Authentication context passed through the request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthContext {
    pub user_id: String,
    /// Key used to authenticate, absent for the admin token
    pub api_key_id: Option<String>,
    pub auth_method: AuthMethod,
}

/// Authentication methods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    ApiKey,
    AdminToken,
}

impl AuthContext {
    pub fn is_admin(&self) -> bool {
        self.auth_method == AuthMethod::AdminToken
    }

    pub fn require_admin(&self) -> Result<(), RouterError> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(RouterError::AuthorizationFailed {
                reason: "Administrator access required".to_string(),
            })
        }
    }
}

/// Authentication middleware state
#[derive(Debug, Clone)]
pub struct AuthMiddleware {
    manager: ApiManager,
    admin_token: Option<String>,
    key_prefix: String,
    failure_limiter: Option<RateLimiter>,
}

impl AuthMiddleware {
    pub fn new(
        manager: ApiManager,
        admin_token: Option<String>,
        key_prefix: impl Into<String>,
        failure_limiter: Option<RateLimiter>,
    ) -> Self {
        Self {
            manager,
            admin_token: admin_token.filter(|token| !token.is_empty()),
            key_prefix: key_prefix.into(),
            failure_limiter,
        }
    }

    /// Resolve a bearer token to an authentication context
    pub fn authenticate(&self, token: &str) -> Result<AuthContext, RouterError> {
        if let Some(admin_token) = &self.admin_token {
            if token == admin_token {
                return Ok(AuthContext {
                    user_id: ADMIN_USER_ID.to_string(),
                    api_key_id: None,
                    auth_method: AuthMethod::AdminToken,
                });
            }
        }

        if token.starts_with(&self.key_prefix) {
            let key = self.manager.authenticate_key(token)?;
            return Ok(AuthContext {
                user_id: key.user_id,
                api_key_id: Some(key.id),
                auth_method: AuthMethod::ApiKey,
            });
        }

        Err(RouterError::AuthenticationFailed {
            reason: "Unrecognised credential".to_string(),
        })
    }
}

fn bearer_token(request: &Request) -> Result<&str, RouterError> {
    let header = request
        .headers()
        .get(AUTHORIZATION)
        .ok_or_else(|| RouterError::AuthenticationFailed {
            reason: "Missing Authorization header".to_string(),
        })?
        .to_str()
        .map_err(|_| RouterError::AuthenticationFailed {
            reason: "Malformed Authorization header".to_string(),
        })?;

    header
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .ok_or_else(|| RouterError::AuthenticationFailed {
            reason: "Expected a Bearer token".to_string(),
        })
}

/// Authentication middleware function
pub async fn auth_middleware(
    State(auth): State<AuthMiddleware>,
    mut request: Request,
    next: Next,
) -> Response {
    let outcome = bearer_token(&request).and_then(|token| auth.authenticate(token));

    match outcome {
        Ok(context) => {
            debug!(user_id = %context.user_id, method = ?context.auth_method, "Authenticated request");
            request.extensions_mut().insert(context);
            next.run(request).await
        }
        Err(e) => {
            if let Some(limiter) = &auth.failure_limiter {
                let result = limiter.check_request(request.headers());
                if !result.allowed {
                    return rate_limited_response(limiter, &result);
                }
            }
            e.into_response()
        }
    }
}

/// Reject requests whose context is not an administrator; runs after `auth_middleware`
pub async fn admin_middleware(request: Request, next: Next) -> Response {
    let allowed = request
        .extensions()
        .get::<AuthContext>()
        .ok_or_else(|| RouterError::AuthenticationFailed {
            reason: "Missing authentication context".to_string(),
        })
        .and_then(AuthContext::require_admin);

    match allowed {
        Ok(()) => next.run(request).await,
        Err(e) => e.into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::health::{HealthMonitor, HttpHealthChecker};
    use crate::load_balancer::LoadBalancer;
    use crate::client::ProviderClient;
    use crate::manager::ApiKeyInput;
    use crate::models::LoadBalancingStrategy;
    use crate::registry::ServiceRegistry;
    use crate::store::MemoryStore;
    use std::sync::Arc;

    fn manager() -> ApiManager {
        let registry = ServiceRegistry::new();
        let config = Config::default().health_check;
        let health = HealthMonitor::new(
            registry.clone(),
            Arc::new(HttpHealthChecker::new(&config).unwrap()),
            &config,
        );
        ApiManager::new(
            registry,
            health,
            LoadBalancer::default(),
            ProviderClient::new().unwrap(),
            Arc::new(MemoryStore::new()),
            LoadBalancingStrategy::RoundRobin,
            "ak_",
        )
    }

    #[tokio::test]
    async fn test_admin_token() {
        let auth = AuthMiddleware::new(manager(), Some("admin-token-0123456789".to_string()), "ak_", None);

        let context = auth.authenticate("admin-token-0123456789").unwrap();
        assert!(context.is_admin());
        assert_eq!(context.user_id, ADMIN_USER_ID);

        assert!(matches!(
            auth.authenticate("wrong"),
            Err(RouterError::AuthenticationFailed { .. })
        ));
    }

    #[tokio::test]
    async fn test_api_key_resolves_to_user() {
        let manager = manager();
        let key = manager
            .create_api_key(ApiKeyInput {
                name: "ci".to_string(),
                user_id: "alice".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();

        let auth = AuthMiddleware::new(manager, None, "ak_", None);
        let context = auth.authenticate(&key.key).unwrap();
        assert_eq!(context.user_id, "alice");
        assert_eq!(context.api_key_id.as_deref(), Some(key.id.as_str()));
        assert!(!context.is_admin());
        assert!(context.require_admin().is_err());
    }

    #[test]
    fn test_empty_admin_token_is_ignored() {
        let auth = AuthMiddleware::new(manager(), Some(String::new()), "ak_", None);
        assert!(auth.authenticate("").is_err());
    }
}
