//! AI Router Service Library
//!
//! A routing core for AI content-generation providers. Providers are
//! registered with one or more environments (development, staging,
//! production), monitored by periodic health checks, and selected per request
//! by intent classification, constraint filtering and weighted scoring.
//!
//! ## Features
//!
//! - **Service Registry**: Provider descriptors, health and rolling metrics
//! - **Health Monitoring**: Per-environment checks with aggregate system health
//! - **Intelligent Routing**: Intent classification and quality/cost/performance scoring
//! - **Load Balancing**: Round-robin, random, health-based and scored selection
//! - **API Management**: API keys, user assignments, failover and usage tracking
//! - **Rate Limiting**: Fixed window limits per client and endpoint group
//!
//! ## Architecture
//!
//! ```text
//! AI Router Service
//! ├── Service Registry (providers, health, metrics)
//! ├── Health Monitor (per-provider polling tasks)
//! ├── Intelligent Router (classification, filtering, scoring)
//! ├── API Manager (keys, assignments, environments, usage)
//! ├── Rate Limiters (api, blog generation, admin, health, auth)
//! └── HTTP Server (axum)
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use ai_router::{AiRouterService, Config, MemoryStore};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::from_file("config/ai-router.yaml").await?;
//!     let service = AiRouterService::new(config, Arc::new(MemoryStore::new())).await?;
//!
//!     service.start().await;
//!     service.serve().await?;
//!     Ok(())
//! }
//! ```

pub mod client;
pub mod config;
pub mod handlers;
pub mod health;
pub mod intent;
pub mod keys;
pub mod load_balancer;
pub mod manager;
pub mod middleware;
pub mod models;
pub mod rate_limiter;
pub mod registry;
pub mod router;
pub mod scoring;
pub mod server;
pub mod store;
pub mod telemetry;
pub mod usage;

// Re-export commonly used types
pub use client::ProviderClient;
pub use config::{Config, ConfigOverrides};
pub use health::{HealthChecker, HealthMonitor, HttpHealthChecker, SystemHealth};
pub use intent::{classify, Classification, Intent};
pub use load_balancer::LoadBalancer;
pub use manager::ApiManager;
pub use models::{
    ApiAssignment, ApiKey, ApiRequest, ApiResponse, ApiUsage, Environment, HealthStatus,
    LoadBalancingStrategy, Provider, RouterError, ServiceType, UnifiedRequest, UnifiedResponse,
};
pub use rate_limiter::{RateLimiter, RateLimiters};
pub use registry::ServiceRegistry;
pub use router::IntelligentRouter;
pub use server::{AiRouterServer, ServerState};
pub use store::{FileStore, MemoryStore, StateSnapshot, StateStore};
pub use telemetry::TelemetryManager;
pub use usage::UsageTracker;

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// AI Router main struct
///
/// Composition root: one registry shared by the router, the API manager and
/// the health monitor.
#[derive(Debug)]
pub struct AiRouterService {
    state: ServerState,
    server: AiRouterServer,
    shutdown: CancellationToken,
    background: Mutex<Vec<JoinHandle<()>>>,
}

impl AiRouterService {
    /// Build every component and restore persisted state
    pub async fn new(config: Config, store: Arc<dyn StateStore>) -> Result<Self, RouterError> {
        Self::with_health_checker(config, store, None).await
    }

    /// Same as [`AiRouterService::new`] with a custom health checker
    pub async fn with_health_checker(
        config: Config,
        store: Arc<dyn StateStore>,
        checker: Option<Arc<dyn HealthChecker>>,
    ) -> Result<Self, RouterError> {
        let config = Arc::new(config);

        let registry = ServiceRegistry::new();
        for provider in &config.providers {
            registry.register(provider.clone())?;
        }

        let checker = match checker {
            Some(checker) => checker,
            None => Arc::new(HttpHealthChecker::new(&config.health_check)?),
        };
        let health = HealthMonitor::new(registry.clone(), checker, &config.health_check);

        let client = ProviderClient::new()?;
        let weights = config.routing.scoring_weights.clone();

        let manager = ApiManager::new(
            registry.clone(),
            health.clone(),
            LoadBalancer::new(weights.clone()),
            client.clone(),
            store,
            config.routing.default_strategy,
            config.auth.api_key_prefix.clone(),
        );
        manager.restore().await?;

        let router = IntelligentRouter::new(
            registry.clone(),
            LoadBalancer::new(weights.clone()),
            client,
            weights,
        );

        let state = ServerState {
            config: config.clone(),
            registry,
            health,
            router,
            manager,
            rate_limiters: RateLimiters::from_config(&config.rate_limiting),
            telemetry: TelemetryManager::new(config.telemetry.clone()),
            started_at: chrono::Utc::now(),
        };
        let server = AiRouterServer::new(state.clone());

        tracing::info!(
            providers = state.registry.len(),
            environment = ?config.environment,
            "AI Router Service initialized"
        );

        Ok(Self {
            state,
            server,
            shutdown: CancellationToken::new(),
            background: Mutex::new(Vec::new()),
        })
    }

    /// Start health monitoring and the rate limit sweeper
    pub async fn start(&self) {
        self.state.health.start();

        if self.state.rate_limiters.enabled {
            let handle = self
                .state
                .rate_limiters
                .start_sweeper(self.shutdown.child_token());
            self.background.lock().await.push(handle);
        }

        tracing::info!("Background tasks started successfully");
    }

    /// Serve HTTP until [`AiRouterService::stop`] is called
    pub async fn serve(&self) -> Result<(), RouterError> {
        self.server.serve(self.shutdown.child_token()).await
    }

    /// Stop background work and save state
    pub async fn stop(&self) -> Result<(), RouterError> {
        tracing::info!("Stopping AI Router Service");

        self.shutdown.cancel();
        self.state.health.shutdown();
        for handle in self.background.lock().await.drain(..) {
            if let Err(e) = handle.await {
                tracing::warn!(error = %e, "Background task ended abnormally");
            }
        }

        self.state.manager.persist().await?;

        tracing::info!("AI Router Service stopped successfully");
        Ok(())
    }

    /// Get service health information
    pub fn health(&self) -> serde_json::Value {
        let system = self.state.health.get_system_health();

        serde_json::json!({
            "service": "ai-router",
            "status": system.status,
            "timestamp": chrono::Utc::now(),
            "registry": self.state.registry.stats(),
            "system": system,
            "telemetry": self.state.telemetry.health(),
            "version": env!("CARGO_PKG_VERSION"),
            "uptime": (chrono::Utc::now() - self.state.started_at).num_seconds().max(0),
        })
    }

    /// HTTP router with all middleware, for embedding or in-process tests
    pub fn router(&self) -> axum::Router {
        self.server.router()
    }

    pub fn state(&self) -> &ServerState {
        &self.state
    }

    /// Token cancelled by [`AiRouterService::stop`]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }
}
