//! Configuration management for the AI Router Service
//!
//! This module handles all configuration aspects for the router service,
//! including YAML file parsing, environment variable overrides, CLI arguments,
//! the seeded provider catalog, and configuration validation.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::models::{
    Capabilities, Environment as ProviderEnvironment, LoadBalancingStrategy, Pricing, Provider,
    ProviderLimits, ProviderStatus, QualityScores, ServiceType,
};

/// Identifier of the seeded blog writer provider
pub const BLOG_WRITER_PROVIDER_ID: &str = "blog-writer-api";

/// Main configuration structure for the AI Router Service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Authentication configuration
    pub auth: AuthConfig,
    /// Health check configuration
    pub health_check: HealthCheckConfig,
    /// Rate limiting configuration
    pub rate_limiting: RateLimitingConfig,
    /// Routing configuration
    pub routing: RoutingConfig,
    /// Persistence configuration
    pub persistence: PersistenceConfig,
    /// Telemetry configuration
    pub telemetry: TelemetryConfig,
    /// Providers registered at startup
    #[serde(default)]
    pub providers: Vec<Provider>,
    /// Environment-specific settings
    pub environment: Environment,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// Request timeout in seconds
    pub request_timeout: u64,
    /// Maximum request size in bytes
    pub max_request_size: u64,
    /// Enable CORS
    pub enable_cors: bool,
    /// CORS origins
    pub cors_origins: Vec<String>,
    /// Graceful shutdown timeout
    pub shutdown_timeout: u64,
}

/// Authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthConfig {
    /// Bearer token granting access to the admin API
    pub admin_token: Option<String>,
    /// Prefix of generated API keys
    pub api_key_prefix: String,
}

/// Health check configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheckConfig {
    /// Enable periodic health checks
    pub enabled: bool,
    /// Poll interval per provider in seconds
    pub interval_secs: u64,
    /// Timeout for a single check in milliseconds
    pub timeout_ms: u64,
    /// Successful checks slower than this are reported as degraded
    pub degraded_threshold_ms: u64,
}

/// Rate limiting configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitingConfig {
    /// Enable rate limiting
    pub enabled: bool,
    /// Interval of the expired-window sweep in seconds
    pub sweep_interval_secs: u64,
    /// General API limiter
    pub api: RateLimitProfileConfig,
    /// Blog generation limiter
    pub blog_generation: RateLimitProfileConfig,
    /// Admin API limiter
    pub admin: RateLimitProfileConfig,
    /// Health endpoint limiter
    pub health: RateLimitProfileConfig,
    /// Authentication limiter
    pub auth: RateLimitProfileConfig,
}

/// One fixed-window limiter profile
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitProfileConfig {
    /// Window length in seconds
    pub window_secs: u64,
    /// Requests allowed per window
    pub max_requests: u32,
    /// Message returned when the limit is hit
    pub message: String,
}

impl RateLimitProfileConfig {
    fn new(window_secs: u64, max_requests: u32, message: &str) -> Self {
        Self {
            window_secs,
            max_requests,
            message: message.to_string(),
        }
    }
}

/// Routing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingConfig {
    /// Strategy used when a request names no assignment
    pub default_strategy: LoadBalancingStrategy,
    /// Provider scoring weights
    pub scoring_weights: ScoringWeights,
}

/// Provider scoring weights
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoringWeights {
    /// Quality weight (0.0 - 1.0)
    pub quality: f64,
    /// Cost weight (0.0 - 1.0)
    pub cost: f64,
    /// Performance weight (0.0 - 1.0)
    pub performance: f64,
    /// Preference weight (0.0 - 1.0)
    pub preference: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            quality: 0.3,
            cost: 0.25,
            performance: 0.25,
            preference: 0.2,
        }
    }
}

/// Persistence configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistenceConfig {
    /// Write snapshots to disk
    pub enabled: bool,
    /// Snapshot file path
    pub path: String,
}

/// Telemetry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryConfig {
    /// Logging configuration
    pub logging: LoggingConfig,
    /// Metrics configuration
    pub metrics: MetricsConfig,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoggingConfig {
    /// Log level
    pub level: String,
    /// Log format (json or compact)
    pub format: String,
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsConfig {
    /// Enable metrics
    pub enabled: bool,
    /// Metrics endpoint
    pub endpoint: String,
}

/// Environment settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Environment {
    /// Development environment
    Development,
    /// Testing environment
    Testing,
    /// Staging environment
    Staging,
    /// Production environment
    Production,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 8090,
                request_timeout: 60,
                max_request_size: 2 * 1024 * 1024, // 2MB
                enable_cors: true,
                cors_origins: vec!["*".to_string()],
                shutdown_timeout: 30,
            },
            auth: AuthConfig {
                admin_token: None,
                api_key_prefix: "ak_".to_string(),
            },
            health_check: HealthCheckConfig {
                enabled: true,
                interval_secs: 30,
                timeout_ms: 5000,
                degraded_threshold_ms: 2000,
            },
            rate_limiting: RateLimitingConfig {
                enabled: true,
                sweep_interval_secs: 60,
                api: RateLimitProfileConfig::new(
                    15 * 60,
                    60,
                    "Too many API requests, please try again later.",
                ),
                blog_generation: RateLimitProfileConfig::new(
                    60 * 60,
                    10,
                    "Too many blog generation requests, please try again later.",
                ),
                admin: RateLimitProfileConfig::new(
                    15 * 60,
                    100,
                    "Too many admin requests, please try again later.",
                ),
                health: RateLimitProfileConfig::new(
                    60,
                    30,
                    "Too many health check requests, please try again later.",
                ),
                auth: RateLimitProfileConfig::new(
                    15 * 60,
                    5,
                    "Too many authentication attempts, please try again later.",
                ),
            },
            routing: RoutingConfig {
                default_strategy: LoadBalancingStrategy::RoundRobin,
                scoring_weights: ScoringWeights::default(),
            },
            persistence: PersistenceConfig {
                enabled: false,
                path: "./data/ai-router-state.json".to_string(),
            },
            telemetry: TelemetryConfig {
                logging: LoggingConfig {
                    level: "info".to_string(),
                    format: "json".to_string(),
                },
                metrics: MetricsConfig {
                    enabled: true,
                    endpoint: "/metrics".to_string(),
                },
            },
            providers: vec![blog_writer_provider(&BlogWriterSettings::default())],
            environment: Environment::Development,
        }
    }
}

/// Base URL and per-environment keys of the blog writer API
#[derive(Debug, Clone)]
pub struct BlogWriterSettings {
    pub base_url: String,
    pub dev_api_key: String,
    pub staging_api_key: String,
    pub prod_api_key: String,
}

impl Default for BlogWriterSettings {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            dev_api_key: String::new(),
            staging_api_key: String::new(),
            prod_api_key: String::new(),
        }
    }
}

impl BlogWriterSettings {
    /// Read the blog writer settings from the process environment
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let base_url = std::env::var("BLOG_WRITER_API_URL")
            .or_else(|_| std::env::var("NEXT_PUBLIC_BLOG_WRITER_API_URL"))
            .unwrap_or(defaults.base_url);

        Self {
            base_url,
            dev_api_key: std::env::var("BLOG_WRITER_DEV_API_KEY").unwrap_or_default(),
            staging_api_key: std::env::var("BLOG_WRITER_STAGING_API_KEY").unwrap_or_default(),
            prod_api_key: std::env::var("BLOG_WRITER_PROD_API_KEY").unwrap_or_default(),
        }
    }
}

/// Build the default blog writer provider with development, staging and production environments
pub fn blog_writer_provider(settings: &BlogWriterSettings) -> Provider {
    let now = chrono::Utc::now();
    let environment = |name: &str, api_key: &str, priority: u32| {
        let mut env = ProviderEnvironment::new(name, settings.base_url.clone(), api_key);
        env.id = format!("{}-{}", BLOG_WRITER_PROVIDER_ID, name);
        env.priority = priority;
        env
    };

    Provider {
        id: BLOG_WRITER_PROVIDER_ID.to_string(),
        name: "Blog Writer API".to_string(),
        provider_type: ServiceType::BlogWriter,
        description: "AI-powered blog post generation with SEO optimization".to_string(),
        environments: vec![
            environment("production", &settings.prod_api_key, 1),
            environment("staging", &settings.staging_api_key, 2),
            environment("development", &settings.dev_api_key, 3),
        ],
        capabilities: Capabilities {
            supported_formats: vec!["markdown".to_string(), "html".to_string()],
            supported_languages: vec!["en".to_string(), "es".to_string(), "fr".to_string(), "de".to_string()],
            special_features: vec![
                "seo-optimization".to_string(),
                "tone-control".to_string(),
                "outline-generation".to_string(),
            ],
            model: "blog-writer-v1".to_string(),
            quality_scores: QualityScores {
                overall: 0.86,
                accuracy: 0.85,
                creativity: 0.88,
                consistency: 0.84,
            },
        },
        limits: ProviderLimits {
            max_tokens: 8000,
            requests_per_minute: 30,
            max_cost_per_request: 0.5,
        },
        pricing: Pricing {
            cost_per_token: 0.00002,
            cost_per_request: 0.01,
            currency: "USD".to_string(),
        },
        generate_endpoint: "/api/v1/generate".to_string(),
        status: ProviderStatus::default(),
        created_at: now,
        updated_at: now,
    }
}

impl Config {
    /// Load configuration from a YAML file
    pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .context("Failed to read configuration file")?;

        let config: Config =
            serde_yaml::from_str(&content).context("Failed to parse configuration file")?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Config::default();

        // Override with environment variables
        if let Ok(host) = std::env::var("AI_ROUTER_HOST") {
            config.server.host = host;
        }

        if let Ok(port) = std::env::var("AI_ROUTER_PORT") {
            config.server.port = port.parse().context("Invalid port number")?;
        }

        if let Ok(token) = std::env::var("AI_ROUTER_ADMIN_TOKEN") {
            config.auth.admin_token = Some(token);
        }

        if let Ok(log_level) = std::env::var("LOG_LEVEL") {
            config.telemetry.logging.level = log_level;
        }

        if let Ok(path) = std::env::var("AI_ROUTER_STATE_PATH") {
            config.persistence.enabled = true;
            config.persistence.path = path;
        }

        config.providers = vec![blog_writer_provider(&BlogWriterSettings::from_env())];

        config.validate()?;
        Ok(config)
    }

    /// Merge configuration with environment variables and CLI arguments
    pub fn merge_with_overrides(mut self, overrides: ConfigOverrides) -> Result<Self> {
        if let Some(host) = overrides.host {
            self.server.host = host;
        }

        if let Some(port) = overrides.port {
            self.server.port = port;
        }

        if let Some(log_level) = overrides.log_level {
            self.telemetry.logging.level = log_level;
        }

        if let Some(admin_token) = overrides.admin_token {
            self.auth.admin_token = Some(admin_token);
        }

        if let Some(state_path) = overrides.state_path {
            self.persistence.enabled = true;
            self.persistence.path = state_path;
        }

        self.validate()?;
        Ok(self)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        // Validate server configuration
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port must be greater than 0"));
        }

        if self.server.request_timeout == 0 {
            return Err(anyhow::anyhow!("Request timeout must be greater than 0"));
        }

        if let Some(token) = &self.auth.admin_token {
            if token.len() < 16 {
                return Err(anyhow::anyhow!(
                    "Admin token must be at least 16 characters long"
                ));
            }
        }

        if self.health_check.enabled && self.health_check.interval_secs == 0 {
            return Err(anyhow::anyhow!(
                "Health check interval must be greater than 0"
            ));
        }

        if self.health_check.timeout_ms == 0 {
            return Err(anyhow::anyhow!("Health check timeout must be greater than 0"));
        }

        let limits = &self.rate_limiting;
        for (name, profile) in [
            ("api", &limits.api),
            ("blogGeneration", &limits.blog_generation),
            ("admin", &limits.admin),
            ("health", &limits.health),
            ("auth", &limits.auth),
        ] {
            if profile.window_secs == 0 || profile.max_requests == 0 {
                return Err(anyhow::anyhow!(
                    "Rate limit profile '{}' needs a non-zero window and request count",
                    name
                ));
            }
        }

        if self.persistence.enabled && self.persistence.path.is_empty() {
            return Err(anyhow::anyhow!("Persistence path is required"));
        }

        // Validate scoring weights sum to approximately 1.0
        let weights = &self.routing.scoring_weights;
        let weights_sum = weights.quality + weights.cost + weights.performance + weights.preference;

        if (weights_sum - 1.0).abs() > 0.1 {
            return Err(anyhow::anyhow!(
                "Scoring weights must sum to approximately 1.0, got {}",
                weights_sum
            ));
        }

        for provider in &self.providers {
            if provider.id.is_empty() {
                return Err(anyhow::anyhow!("Provider id is required"));
            }
            for environment in &provider.environments {
                url::Url::parse(&environment.base_url).with_context(|| {
                    format!(
                        "Invalid base URL for environment '{}' of provider '{}'",
                        environment.name, provider.id
                    )
                })?;
            }
        }

        Ok(())
    }

    /// Save configuration to a YAML file
    pub async fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_yaml::to_string(self).context("Failed to serialize configuration")?;

        tokio::fs::write(path, content)
            .await
            .context("Failed to write configuration file")?;

        Ok(())
    }

    /// Get environment-specific configuration
    pub fn for_environment(&self, env: Environment) -> Self {
        let mut config = self.clone();
        config.environment = env.clone();

        match env {
            Environment::Development => {
                config.telemetry.logging.level = "debug".to_string();
                config.telemetry.logging.format = "compact".to_string();
            }
            Environment::Testing => {
                config.telemetry.logging.level = "warn".to_string();
                config.health_check.enabled = false;
            }
            Environment::Staging => {
                config.telemetry.logging.level = "info".to_string();
            }
            Environment::Production => {
                config.telemetry.logging.level = "warn".to_string();
                config.telemetry.logging.format = "json".to_string();
                config.persistence.enabled = true;
            }
        }

        config
    }

    /// Base URL of the configured blog writer provider, highest priority environment first
    pub fn blog_writer_url(&self) -> Option<&str> {
        let provider = self
            .providers
            .iter()
            .find(|provider| provider.id == BLOG_WRITER_PROVIDER_ID)?;
        provider
            .environments
            .iter()
            .min_by_key(|env| env.priority)
            .map(|env| env.base_url.as_str())
    }
}

/// Configuration overrides from CLI arguments or environment
#[derive(Debug, Default)]
pub struct ConfigOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub log_level: Option<String>,
    pub admin_token: Option<String>,
    pub state_path: Option<String>,
}
