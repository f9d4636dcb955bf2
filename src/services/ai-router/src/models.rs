//! Data models for the AI Router Service
//!
//! This module defines the provider catalog (providers and their environments),
//! health and metrics records, per-request value objects, usage records, API keys,
//! assignments, the unified routing envelope, and the service error type.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Content-generation category served by a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServiceType {
    /// Long-form blog posts and articles
    BlogWriter,
    /// Generic text generation
    ContentGenerator,
    /// SEO analysis and optimization
    SeoOptimizer,
    /// Social media posts
    SocialMedia,
    /// Outreach and cold email copy
    Outreach,
    /// Image generation
    ImageGenerator,
    /// Translation
    Translation,
}

impl std::fmt::Display for ServiceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ServiceType::BlogWriter => "blog-writer",
            ServiceType::ContentGenerator => "content-generator",
            ServiceType::SeoOptimizer => "seo-optimizer",
            ServiceType::SocialMedia => "social-media",
            ServiceType::Outreach => "outreach",
            ServiceType::ImageGenerator => "image-generator",
            ServiceType::Translation => "translation",
        };
        f.write_str(name)
    }
}

/// Health classification produced by health checks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// Responding normally
    Healthy,
    /// Responding, but slowly or partially
    Degraded,
    /// Not responding or failing
    #[default]
    Unhealthy,
}

impl HealthStatus {
    /// Ordering used by health-based selection (lower is better)
    pub fn rank(&self) -> u8 {
        match self {
            HealthStatus::Healthy => 0,
            HealthStatus::Degraded => 1,
            HealthStatus::Unhealthy => 2,
        }
    }
}

/// Upstream AI provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provider {
    /// Provider identifier
    pub id: String,
    /// Display name
    pub name: String,
    /// Category of content this provider generates
    pub provider_type: ServiceType,
    /// Free-form description
    #[serde(default)]
    pub description: String,
    /// Deployments of this provider
    #[serde(default)]
    pub environments: Vec<Environment>,
    /// What the provider can do
    #[serde(default)]
    pub capabilities: Capabilities,
    /// Hard ceilings advertised by the provider
    #[serde(default)]
    pub limits: ProviderLimits,
    /// Pricing used for cost estimation
    #[serde(default)]
    pub pricing: Pricing,
    /// Path used by the intelligent router for generation calls
    #[serde(default = "default_generate_endpoint")]
    pub generate_endpoint: String,
    /// Mutable status block
    #[serde(default)]
    pub status: ProviderStatus,
    /// Creation timestamp
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    /// Last update timestamp
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

fn default_generate_endpoint() -> String {
    "/api/v1/generate".to_string()
}

impl Provider {
    /// Active environments in priority order
    pub fn active_environments(&self) -> Vec<&Environment> {
        let mut environments: Vec<&Environment> =
            self.environments.iter().filter(|env| env.is_active).collect();
        environments.sort_by_key(|env| env.priority);
        environments
    }

    /// Find an environment by id or name
    pub fn environment(&self, id_or_name: &str) -> Option<&Environment> {
        self.environments
            .iter()
            .find(|env| env.id == id_or_name || env.name == id_or_name)
    }

    /// Copy of the provider with environment secrets removed, for API output
    pub fn redacted(&self) -> Self {
        let mut provider = self.clone();
        for environment in &mut provider.environments {
            if !environment.api_key.is_empty() {
                environment.api_key = "***".to_string();
            }
        }
        provider
    }
}

/// Provider capability descriptors
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capabilities {
    /// Output formats (markdown, html, ...)
    #[serde(default)]
    pub supported_formats: Vec<String>,
    /// Supported languages (ISO codes)
    #[serde(default)]
    pub supported_languages: Vec<String>,
    /// Feature flags such as `seo-optimization` or `image-generation`
    #[serde(default)]
    pub special_features: Vec<String>,
    /// Model name reported in responses
    #[serde(default)]
    pub model: String,
    /// Quality scores in the 0.0 - 1.0 range
    #[serde(default)]
    pub quality_scores: QualityScores,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            supported_formats: vec!["markdown".to_string()],
            supported_languages: vec!["en".to_string()],
            special_features: Vec::new(),
            model: "default".to_string(),
            quality_scores: QualityScores::default(),
        }
    }
}

/// Quality scores
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityScores {
    pub overall: f64,
    pub accuracy: f64,
    pub creativity: f64,
    pub consistency: f64,
}

impl Default for QualityScores {
    fn default() -> Self {
        Self {
            overall: 0.8,
            accuracy: 0.8,
            creativity: 0.8,
            consistency: 0.8,
        }
    }
}

/// Provider ceilings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderLimits {
    /// Maximum tokens per request
    pub max_tokens: u32,
    /// Requests per minute accepted by the provider
    pub requests_per_minute: u32,
    /// Maximum cost of a single request
    pub max_cost_per_request: f64,
}

impl Default for ProviderLimits {
    fn default() -> Self {
        Self {
            max_tokens: 4000,
            requests_per_minute: 60,
            max_cost_per_request: 1.0,
        }
    }
}

/// Pricing information
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pricing {
    pub cost_per_token: f64,
    pub cost_per_request: f64,
    pub currency: String,
}

impl Default for Pricing {
    fn default() -> Self {
        Self {
            cost_per_token: 0.00002,
            cost_per_request: 0.0,
            currency: "USD".to_string(),
        }
    }
}

/// Mutable provider status block
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderStatus {
    pub is_active: bool,
    pub health_status: HealthStatus,
    pub last_health_check: Option<DateTime<Utc>>,
    pub error_rate: f64,
    /// Average latency in milliseconds
    pub average_response_time: f64,
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
}

impl Default for ProviderStatus {
    fn default() -> Self {
        Self {
            is_active: true,
            health_status: HealthStatus::Unhealthy,
            last_health_check: None,
            error_rate: 0.0,
            average_response_time: 0.0,
            total_requests: 0,
            successful_requests: 0,
            failed_requests: 0,
        }
    }
}

/// Named deployment of a provider
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Environment {
    pub id: String,
    /// development, staging, production, or a custom name
    pub name: String,
    pub base_url: String,
    /// Bearer credential sent upstream
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub health_check: HealthCheckSettings,
    #[serde(default)]
    pub rate_limits: EnvironmentRateLimits,
    /// Lower values are preferred
    #[serde(default = "default_priority")]
    pub priority: u32,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default = "default_true")]
    pub is_active: bool,
    #[serde(default)]
    pub health_status: HealthStatus,
    #[serde(default)]
    pub last_health_check: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_response_time_ms: Option<u64>,
}

fn default_priority() -> u32 {
    1
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_true() -> bool {
    true
}

impl Environment {
    /// Build an environment with default policies
    pub fn new(name: impl Into<String>, base_url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            base_url: base_url.into(),
            api_key: api_key.into(),
            health_check: HealthCheckSettings::default(),
            rate_limits: EnvironmentRateLimits::default(),
            priority: default_priority(),
            timeout_ms: default_timeout_ms(),
            retry: RetryPolicy::default(),
            is_active: true,
            health_status: HealthStatus::Unhealthy,
            last_health_check: None,
            last_response_time_ms: None,
        }
    }

    /// Join the base URL with a path without doubling slashes
    pub fn url_for(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

/// Health check settings for an environment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheckSettings {
    pub enabled: bool,
    pub endpoint: String,
}

impl Default for HealthCheckSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: "/health".to_string(),
        }
    }
}

/// Environment rate limits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnvironmentRateLimits {
    pub requests_per_minute: u32,
    pub requests_per_hour: u32,
}

impl Default for EnvironmentRateLimits {
    fn default() -> Self {
        Self {
            requests_per_minute: 60,
            requests_per_hour: 1000,
        }
    }
}

/// Retry policy (recorded with the environment; requests are not retried)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            backoff_ms: 1000,
        }
    }
}

/// Latest health check outcome for a service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceHealth {
    pub status: HealthStatus,
    pub last_check: DateTime<Utc>,
    pub response_time_ms: Option<u64>,
    pub error: Option<String>,
}

/// Rolling request metrics for a service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceMetrics {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    /// Milliseconds
    pub average_response_time: f64,
    pub error_rate: f64,
    /// Fraction of successful requests, 0.0 - 1.0
    pub availability: f64,
    pub total_tokens: u64,
    pub total_cost: f64,
    pub last_updated: DateTime<Utc>,
}

impl Default for ServiceMetrics {
    fn default() -> Self {
        Self {
            total_requests: 0,
            successful_requests: 0,
            failed_requests: 0,
            average_response_time: 0.0,
            error_rate: 0.0,
            availability: 1.0,
            total_tokens: 0,
            total_cost: 0.0,
            last_updated: Utc::now(),
        }
    }
}

/// Partial metrics update; `None` fields are left untouched
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ServiceMetricsUpdate {
    pub total_requests: Option<u64>,
    pub successful_requests: Option<u64>,
    pub failed_requests: Option<u64>,
    pub average_response_time: Option<f64>,
    pub error_rate: Option<f64>,
    pub availability: Option<f64>,
    pub total_tokens: Option<u64>,
    pub total_cost: Option<f64>,
}

/// One proxied call routed through the API manager
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiRequest {
    /// Pin the call to one provider
    #[serde(default)]
    pub provider_id: Option<String>,
    /// Pick among providers of this type
    #[serde(default)]
    pub provider_type: Option<ServiceType>,
    /// Preferred environment id or name
    #[serde(default)]
    pub environment: Option<String>,
    /// Routing policy to apply
    #[serde(default)]
    pub assignment_id: Option<String>,
    /// Key the caller authenticated with
    #[serde(default)]
    pub api_key_id: Option<String>,
    /// Upstream path; empty means the provider's generate endpoint
    #[serde(default)]
    pub endpoint: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub body: Option<serde_json::Value>,
    /// Opaque user identifier
    #[serde(default)]
    pub user_id: String,
}

fn default_method() -> String {
    "POST".to_string()
}

/// Outcome of one proxied call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiResponse {
    pub success: bool,
    pub status_code: u16,
    pub data: Option<serde_json::Value>,
    pub error: Option<String>,
    pub response_time_ms: u64,
    pub provider_id: String,
    pub environment_id: String,
    pub tokens_used: u64,
    pub cost: f64,
    pub request_id: String,
    pub timestamp: DateTime<Utc>,
}

/// Usage counters for one (provider, environment, user) triple
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiUsage {
    pub provider_id: String,
    pub environment_id: String,
    pub user_id: String,
    pub request_count: u64,
    pub token_count: u64,
    pub cost: f64,
    pub success_count: u64,
    pub error_count: u64,
    /// Milliseconds
    pub average_response_time: f64,
    pub last_request_at: DateTime<Utc>,
}

/// Stored API key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiKey {
    pub id: String,
    pub name: String,
    /// Secret value (`ak_` + 32 base36 characters)
    pub key: String,
    /// Non-secret prefix for display
    pub key_prefix: String,
    pub user_id: String,
    /// Empty means every provider
    #[serde(default)]
    pub allowed_providers: Vec<String>,
    /// Empty means every environment
    #[serde(default)]
    pub allowed_environments: Vec<String>,
    #[serde(default)]
    pub rate_limits: EnvironmentRateLimits,
    pub is_active: bool,
    /// Stored for display; not checked when authenticating
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub usage_count: u64,
    pub last_used_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ApiKey {
    /// Copy without the secret, for API output
    pub fn redacted(&self) -> Self {
        let mut key = self.clone();
        key.key = format!("{}...", self.key_prefix);
        key
    }
}

/// Provider selection strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LoadBalancingStrategy {
    #[default]
    RoundRobin,
    Random,
    HealthBased,
    Scored,
}

/// What to do when the selected environment fails
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum FailoverStrategy {
    #[default]
    None,
    NextEnvironment,
}

/// User routing policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiAssignment {
    pub id: String,
    pub name: String,
    pub user_id: String,
    pub provider_ids: Vec<String>,
    /// Environment names or ids; empty means all
    #[serde(default)]
    pub environments: Vec<String>,
    #[serde(default)]
    pub load_balancing: LoadBalancingStrategy,
    #[serde(default)]
    pub failover: FailoverStrategy,
    #[serde(default)]
    pub rate_limits: EnvironmentRateLimits,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Constraints attached to a unified request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestConstraints {
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub required_features: Vec<String>,
    #[serde(default)]
    pub excluded_services: Vec<String>,
}

/// What the caller optimises for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingPriority {
    Cost,
    Quality,
    Speed,
}

/// Caller preferences attached to a unified request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RequestPreferences {
    pub preferred_service: Option<String>,
    pub priority: Option<RoutingPriority>,
}

/// Request accepted by the intelligent router
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnifiedRequest {
    pub prompt: String,
    /// Overrides intent classification
    #[serde(default)]
    pub service_type: Option<ServiceType>,
    #[serde(default)]
    pub parameters: Option<serde_json::Value>,
    #[serde(default)]
    pub constraints: Option<RequestConstraints>,
    #[serde(default)]
    pub preferences: Option<RequestPreferences>,
    #[serde(default)]
    pub user_id: Option<String>,
}

/// Failure codes surfaced by the intelligent router
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoutingErrorCode {
    NoCompatibleServices,
    RoutingError,
}

/// Failure body of a unified response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingFailure {
    pub code: RoutingErrorCode,
    pub message: String,
}

/// Metadata describing how a unified request was served
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseMetadata {
    pub service_id: String,
    pub service_name: String,
    pub model: String,
    pub environment_id: String,
    pub intent: String,
    pub confidence: f64,
    pub response_time_ms: u64,
    pub tokens_used: u64,
    pub cost: f64,
    pub quality_score: f64,
    pub request_id: String,
    pub timestamp: DateTime<Utc>,
}

/// Envelope returned by the intelligent router
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiedResponse {
    pub success: bool,
    pub data: Option<serde_json::Value>,
    pub error: Option<RoutingFailure>,
    pub metadata: Option<ResponseMetadata>,
}

impl UnifiedResponse {
    /// Build a failure envelope
    pub fn failure(code: RoutingErrorCode, message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(RoutingFailure {
                code,
                message: message.into(),
            }),
            metadata: None,
        }
    }
}

/// Generate a request identifier
pub fn new_request_id() -> String {
    format!("req_{}", uuid::Uuid::new_v4().simple())
}

/// AI Router error types
#[derive(Error, Debug, Clone)]
pub enum RouterError {
    /// Provider not found
    #[error("Provider not found: {id}")]
    ProviderNotFound { id: String },

    /// Environment not found
    #[error("Environment not found: {id}")]
    EnvironmentNotFound { id: String },

    /// API key not found
    #[error("API key not found: {id}")]
    ApiKeyNotFound { id: String },

    /// Assignment not found
    #[error("Assignment not found: {id}")]
    AssignmentNotFound { id: String },

    /// Validation error
    #[error("Validation error: {field} - {message}")]
    ValidationError { field: String, message: String },

    /// Authentication failed
    #[error("Authentication failed: {reason}")]
    AuthenticationFailed { reason: String },

    /// Authorization failed
    #[error("Authorization failed: {reason}")]
    AuthorizationFailed { reason: String },

    /// Rate limit exceeded
    #[error("Rate limit exceeded: {limiter}")]
    RateLimited { limiter: String },

    /// No provider passed filtering
    #[error("No compatible services: {reason}")]
    NoCompatibleServices { reason: String },

    /// Provider has no usable environment
    #[error("No available environment for provider {provider_id}")]
    NoAvailableEnvironment { provider_id: String },

    /// Provider answered with a non-success status or could not be reached
    #[error("Upstream error ({status}): {message}")]
    UpstreamError { status: u16, message: String },

    /// Provider did not answer in time
    #[error("Upstream request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Configuration error
    #[error("Configuration error: {message}")]
    ConfigurationError { message: String },

    /// Snapshot store error
    #[error("Persistence error: {message}")]
    PersistenceError { message: String },

    /// Internal server error
    #[error("Internal server error: {message}")]
    InternalError { message: String },
}

impl RouterError {
    /// Convert error to HTTP status code
    pub fn status_code(&self) -> u16 {
        match self {
            RouterError::ProviderNotFound { .. }
            | RouterError::EnvironmentNotFound { .. }
            | RouterError::ApiKeyNotFound { .. }
            | RouterError::AssignmentNotFound { .. } => 404,
            RouterError::ValidationError { .. } => 400,
            RouterError::AuthenticationFailed { .. } => 401,
            RouterError::AuthorizationFailed { .. } => 403,
            RouterError::RateLimited { .. } => 429,
            RouterError::UpstreamError { .. } => 502,
            RouterError::NoCompatibleServices { .. } | RouterError::NoAvailableEnvironment { .. } => {
                503
            }
            RouterError::Timeout { .. } => 504,
            _ => 500,
        }
    }

    /// Stable machine-readable error kind
    pub fn kind(&self) -> &'static str {
        match self {
            RouterError::ProviderNotFound { .. } => "provider_not_found",
            RouterError::EnvironmentNotFound { .. } => "environment_not_found",
            RouterError::ApiKeyNotFound { .. } => "api_key_not_found",
            RouterError::AssignmentNotFound { .. } => "assignment_not_found",
            RouterError::ValidationError { .. } => "validation_error",
            RouterError::AuthenticationFailed { .. } => "authentication_failed",
            RouterError::AuthorizationFailed { .. } => "authorization_failed",
            RouterError::RateLimited { .. } => "rate_limited",
            RouterError::NoCompatibleServices { .. } => "no_compatible_services",
            RouterError::NoAvailableEnvironment { .. } => "no_available_environment",
            RouterError::UpstreamError { .. } => "upstream_error",
            RouterError::Timeout { .. } => "timeout",
            RouterError::ConfigurationError { .. } => "configuration_error",
            RouterError::PersistenceError { .. } => "persistence_error",
            RouterError::InternalError { .. } => "internal_error",
        }
    }

    /// Shorthand for a validation failure
    pub fn validation(field: &str, message: impl Into<String>) -> Self {
        RouterError::ValidationError {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_status_defaults() {
        let status = ProviderStatus::default();
        assert!(status.is_active);
        assert_eq!(status.health_status, HealthStatus::Unhealthy);
        assert_eq!(status.total_requests, 0);
        assert_eq!(status.successful_requests, 0);
        assert_eq!(status.failed_requests, 0);
        assert!(status.last_health_check.is_none());
    }

    #[test]
    fn test_environment_url_join() {
        let env = Environment::new("production", "https://api.example.com/", "key");
        assert_eq!(env.url_for("/health"), "https://api.example.com/health");
        assert_eq!(env.url_for("api/v1/generate"), "https://api.example.com/api/v1/generate");
    }

    #[test]
    fn test_service_type_serialization() {
        let json = serde_json::to_string(&ServiceType::BlogWriter).unwrap();
        assert_eq!(json, "\"blog-writer\"");
        assert_eq!(ServiceType::SeoOptimizer.to_string(), "seo-optimizer");
    }

    #[test]
    fn test_error_status_codes() {
        assert_eq!(RouterError::validation("topic", "required").status_code(), 400);
        assert_eq!(
            RouterError::ProviderNotFound { id: "x".to_string() }.status_code(),
            404
        );
        assert_eq!(
            RouterError::RateLimited { limiter: "api".to_string() }.status_code(),
            429
        );
        assert_eq!(
            RouterError::InternalError { message: "boom".to_string() }.status_code(),
            500
        );
    }

    #[test]
    fn test_provider_redaction() {
        let provider = Provider {
            id: "p".to_string(),
            name: "P".to_string(),
            provider_type: ServiceType::BlogWriter,
            description: String::new(),
            environments: vec![Environment::new("production", "https://p.example", "secret")],
            capabilities: Capabilities::default(),
            limits: ProviderLimits::default(),
            pricing: Pricing::default(),
            generate_endpoint: default_generate_endpoint(),
            status: ProviderStatus::default(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        let redacted = provider.redacted();
        assert_eq!(redacted.environments[0].api_key, "***");
        assert_eq!(provider.environments[0].api_key, "secret");
    }
}
