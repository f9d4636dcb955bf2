//! Health Monitoring Module
//!
//! Provides active health checking for registered providers. Each provider is
//! polled on its own interval task; every active environment is checked and the
//! provider's aggregate status is derived from those results and written back
//! to the registry.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::join_all;
use reqwest::Client;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::HealthCheckConfig;
use crate::models::{Environment, HealthStatus, Provider, RouterError, ServiceHealth, ServiceMetrics};
use crate::registry::ServiceRegistry;
use crate::telemetry::log_error;

/// Result of checking one environment
#[derive(Debug, Clone, PartialEq)]
pub struct EnvironmentCheck {
    pub status: HealthStatus,
    pub response_time_ms: Option<u64>,
    pub error: Option<String>,
}

/// Performs a single environment health check
#[async_trait]
pub trait HealthChecker: Send + Sync {
    async fn check(
        &self,
        provider: &Provider,
        environment: &Environment,
    ) -> Result<EnvironmentCheck, RouterError>;
}

/// `GET <baseUrl><healthCheck.endpoint>` with a timeout
#[derive(Debug, Clone)]
pub struct HttpHealthChecker {
    http_client: Client,
    timeout: Duration,
    degraded_threshold: Duration,
}

impl HttpHealthChecker {
    pub fn new(config: &HealthCheckConfig) -> Result<Self, RouterError> {
        let check_timeout = Duration::from_millis(config.timeout_ms);
        let http_client = Client::builder()
            .timeout(check_timeout)
            .build()
            .map_err(|e| RouterError::ConfigurationError {
                message: format!("Failed to create health check client: {}", e),
            })?;

        Ok(Self {
            http_client,
            timeout: check_timeout,
            degraded_threshold: Duration::from_millis(config.degraded_threshold_ms),
        })
    }
}

#[async_trait]
impl HealthChecker for HttpHealthChecker {
    async fn check(
        &self,
        _provider: &Provider,
        environment: &Environment,
    ) -> Result<EnvironmentCheck, RouterError> {
        let url = environment.url_for(&environment.health_check.endpoint);
        let mut request = self.http_client.get(&url);
        if !environment.api_key.is_empty() {
            request = request.bearer_auth(&environment.api_key);
        }

        let started = Instant::now();
        let response = timeout(self.timeout, request.send())
            .await
            .map_err(|_| RouterError::Timeout {
                timeout_ms: self.timeout.as_millis() as u64,
            })?
            .map_err(|e| RouterError::UpstreamError {
                status: e.status().map(|s| s.as_u16()).unwrap_or(0),
                message: e.to_string(),
            })?;
        let elapsed = started.elapsed();
        let response_time_ms = elapsed.as_millis() as u64;

        let status_code = response.status();
        if !status_code.is_success() {
            return Ok(EnvironmentCheck {
                status: HealthStatus::Unhealthy,
                response_time_ms: Some(response_time_ms),
                error: Some(format!("Health endpoint returned {}", status_code.as_u16())),
            });
        }

        let status = if elapsed > self.degraded_threshold {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        Ok(EnvironmentCheck {
            status,
            response_time_ms: Some(response_time_ms),
            error: None,
        })
    }
}

/// Derive a provider's status from its environment results
pub fn aggregate_status(statuses: &[HealthStatus]) -> HealthStatus {
    if statuses.is_empty() {
        return HealthStatus::Unhealthy;
    }
    if statuses.iter().all(|s| *s == HealthStatus::Healthy) {
        HealthStatus::Healthy
    } else if statuses
        .iter()
        .any(|s| matches!(s, HealthStatus::Healthy | HealthStatus::Degraded))
    {
        HealthStatus::Degraded
    } else {
        HealthStatus::Unhealthy
    }
}

/// Per-provider entry of the system health report
#[derive(Debug, Clone, Serialize)]
pub struct ServiceHealthSummary {
    pub id: String,
    pub name: String,
    /// `None` until the first check completes
    pub status: Option<HealthStatus>,
    pub last_check: Option<chrono::DateTime<Utc>>,
    pub response_time_ms: Option<u64>,
    pub error: Option<String>,
}

/// Aggregate health of every registered provider
#[derive(Debug, Clone, Serialize)]
pub struct SystemHealth {
    pub status: HealthStatus,
    pub total_services: usize,
    pub healthy_services: usize,
    pub degraded_services: usize,
    pub unhealthy_services: usize,
    pub services: Vec<ServiceHealthSummary>,
    pub timestamp: chrono::DateTime<Utc>,
}

/// Polls providers and keeps the registry's health records current
#[derive(Clone)]
pub struct HealthMonitor {
    registry: ServiceRegistry,
    checker: Arc<dyn HealthChecker>,
    interval: Duration,
    enabled: bool,
    watches: Arc<DashMap<String, CancellationToken>>,
    shutdown: CancellationToken,
}

impl std::fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("interval", &self.interval)
            .field("enabled", &self.enabled)
            .field("watched", &self.watches.len())
            .finish()
    }
}

impl HealthMonitor {
    pub fn new(
        registry: ServiceRegistry,
        checker: Arc<dyn HealthChecker>,
        config: &HealthCheckConfig,
    ) -> Self {
        Self {
            registry,
            checker,
            interval: Duration::from_secs(config.interval_secs.max(1)),
            enabled: config.enabled,
            watches: Arc::new(DashMap::new()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Check every active environment of a provider and store the aggregate
    pub async fn check_provider(&self, provider_id: &str) -> Result<ServiceHealth, RouterError> {
        let provider = self
            .registry
            .get_service(provider_id)
            .ok_or_else(|| RouterError::ProviderNotFound {
                id: provider_id.to_string(),
            })?;

        let mut statuses = Vec::new();
        let mut response_times = Vec::new();
        let mut errors = Vec::new();

        for environment in provider.active_environments() {
            let outcome = if environment.health_check.enabled {
                match self.checker.check(&provider, environment).await {
                    Ok(check) => check,
                    Err(e) => {
                        log_error(
                            "health_monitor",
                            "check_environment",
                            &e,
                            serde_json::json!({
                                "providerId": provider.id,
                                "environment": environment.name,
                            }),
                        );
                        EnvironmentCheck {
                            status: HealthStatus::Unhealthy,
                            response_time_ms: None,
                            error: Some(e.to_string()),
                        }
                    }
                }
            } else {
                EnvironmentCheck {
                    status: HealthStatus::Healthy,
                    response_time_ms: None,
                    error: None,
                }
            };

            if let Err(e) = self.registry.update_environment_health(
                &provider.id,
                &environment.id,
                outcome.status,
                outcome.response_time_ms,
                Utc::now(),
            ) {
                debug!(provider_id = %provider.id, "Skipping environment health update: {}", e);
            }

            statuses.push(outcome.status);
            response_times.extend(outcome.response_time_ms);
            if let Some(error) = outcome.error {
                errors.push(format!("{}: {}", environment.name, error));
            }
        }

        let status = aggregate_status(&statuses);
        let response_time_ms = if response_times.is_empty() {
            None
        } else {
            Some(response_times.iter().sum::<u64>() / response_times.len() as u64)
        };

        let health = ServiceHealth {
            status,
            last_check: Utc::now(),
            response_time_ms,
            error: if errors.is_empty() {
                None
            } else {
                Some(errors.join("; "))
            },
        };

        self.registry.update_health_status(&provider.id, health.clone())?;

        let outcome = match status {
            HealthStatus::Healthy => "healthy",
            HealthStatus::Degraded => "degraded",
            HealthStatus::Unhealthy => "unhealthy",
        };
        metrics::counter!("ai_router_health_checks_total", "outcome" => outcome).increment(1);

        debug!(provider_id = %provider.id, status = ?status, "Health check completed");
        Ok(health)
    }

    /// Check every registered provider; one failing check never stops the others
    pub async fn check_all(&self) -> Vec<(String, HealthStatus)> {
        let ids: Vec<String> = self
            .registry
            .list_services()
            .into_iter()
            .map(|p| p.id)
            .collect();

        let checks = ids.into_iter().map(|id| {
            let monitor = self.clone();
            async move {
                let status = monitor.run_isolated_check(&id).await;
                (id, status)
            }
        });

        join_all(checks).await
    }

    /// Run one check on its own task so a panicking checker only affects its provider
    async fn run_isolated_check(&self, provider_id: &str) -> HealthStatus {
        let monitor = self.clone();
        let id = provider_id.to_string();
        let handle = tokio::spawn(async move { monitor.check_provider(&id).await });

        match handle.await {
            Ok(Ok(health)) => health.status,
            Ok(Err(RouterError::ProviderNotFound { .. })) => HealthStatus::Unhealthy,
            Ok(Err(e)) => {
                self.mark_unhealthy(provider_id, &e.to_string());
                HealthStatus::Unhealthy
            }
            Err(join_error) => {
                log_error(
                    "health_monitor",
                    "check_provider",
                    &join_error,
                    serde_json::json!({ "providerId": provider_id }),
                );
                self.mark_unhealthy(provider_id, &join_error.to_string());
                HealthStatus::Unhealthy
            }
        }
    }

    fn mark_unhealthy(&self, provider_id: &str, error: &str) {
        let health = ServiceHealth {
            status: HealthStatus::Unhealthy,
            last_check: Utc::now(),
            response_time_ms: None,
            error: Some(error.to_string()),
        };
        if let Err(e) = self.registry.update_health_status(provider_id, health) {
            debug!(provider_id = %provider_id, "Could not mark provider unhealthy: {}", e);
        }
    }

    /// Start the polling task for a provider
    pub fn watch(&self, provider_id: &str) {
        if !self.enabled || self.shutdown.is_cancelled() {
            return;
        }
        let token = match self.watches.entry(provider_id.to_string()) {
            Entry::Occupied(_) => return,
            Entry::Vacant(slot) => slot.insert(self.shutdown.child_token()).clone(),
        };

        let monitor = self.clone();
        let id = provider_id.to_string();
        let interval = self.interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = token.cancelled() => {
                        debug!(provider_id = %id, "Health watch stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        if !monitor.registry.contains(&id) {
                            warn!(provider_id = %id, "Provider removed, stopping health watch");
                            monitor.watches.remove(&id);
                            break;
                        }
                        monitor.run_isolated_check(&id).await;
                    }
                }
            }
        });

        debug!(provider_id = %provider_id, "Health watch started");
    }

    /// Stop the polling task for a provider
    pub fn unwatch(&self, provider_id: &str) {
        if let Some((_, token)) = self.watches.remove(provider_id) {
            token.cancel();
        }
    }

    pub fn is_watching(&self, provider_id: &str) -> bool {
        self.watches.contains_key(provider_id)
    }

    /// Watch every registered provider
    pub fn start(&self) {
        if !self.enabled {
            info!("Health monitoring disabled");
            return;
        }
        for provider in self.registry.list_services() {
            self.watch(&provider.id);
        }
        info!(providers = self.watches.len(), "Health monitoring started");
    }

    /// Stop every polling task
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.watches.clear();
        info!("Health monitoring stopped");
    }

    pub fn get_system_health(&self) -> SystemHealth {
        let providers = self.registry.list_services();
        let mut healthy = 0;
        let mut degraded = 0;
        let mut unhealthy = 0;

        let services: Vec<ServiceHealthSummary> = providers
            .iter()
            .map(|provider| {
                let health = self.registry.get_health(&provider.id);
                match health.as_ref().map(|h| h.status) {
                    Some(HealthStatus::Healthy) => healthy += 1,
                    Some(HealthStatus::Degraded) => degraded += 1,
                    Some(HealthStatus::Unhealthy) => unhealthy += 1,
                    None => {}
                }
                ServiceHealthSummary {
                    id: provider.id.clone(),
                    name: provider.name.clone(),
                    status: health.as_ref().map(|h| h.status),
                    last_check: health.as_ref().map(|h| h.last_check),
                    response_time_ms: health.as_ref().and_then(|h| h.response_time_ms),
                    error: health.and_then(|h| h.error),
                }
            })
            .collect();

        let total = providers.len();
        let status = if healthy == 0 {
            HealthStatus::Unhealthy
        } else if degraded > 0 || healthy < total {
            HealthStatus::Degraded
        } else {
            HealthStatus::Healthy
        };

        SystemHealth {
            status,
            total_services: total,
            healthy_services: healthy,
            degraded_services: degraded,
            unhealthy_services: unhealthy,
            services,
            timestamp: Utc::now(),
        }
    }

    pub fn record_success(
        &self,
        provider_id: &str,
        response_time_ms: u64,
    ) -> Result<ServiceMetrics, RouterError> {
        self.registry
            .record_request(provider_id, true, response_time_ms, 0, 0.0)
    }

    pub fn record_failure(
        &self,
        provider_id: &str,
        response_time_ms: u64,
        error: &RouterError,
    ) -> Result<ServiceMetrics, RouterError> {
        log_error(
            "health_monitor",
            "record_failure",
            error,
            serde_json::json!({ "providerId": provider_id }),
        );
        self.registry
            .record_request(provider_id, false, response_time_ms, 0, 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::registry::tests::{healthy, test_provider};
    use crate::models::ServiceType;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Fails for one provider and reports healthy for the rest
    struct FailingChecker {
        broken: String,
    }

    #[async_trait]
    impl HealthChecker for FailingChecker {
        async fn check(
            &self,
            provider: &Provider,
            _environment: &Environment,
        ) -> Result<EnvironmentCheck, RouterError> {
            if provider.id == self.broken {
                return Err(RouterError::UpstreamError {
                    status: 0,
                    message: "connection refused".to_string(),
                });
            }
            Ok(EnvironmentCheck {
                status: HealthStatus::Healthy,
                response_time_ms: Some(5),
                error: None,
            })
        }
    }

    /// Panics for one provider
    struct PanickingChecker {
        broken: String,
    }

    #[async_trait]
    impl HealthChecker for PanickingChecker {
        async fn check(
            &self,
            provider: &Provider,
            _environment: &Environment,
        ) -> Result<EnvironmentCheck, RouterError> {
            if provider.id == self.broken {
                panic!("checker blew up");
            }
            Ok(EnvironmentCheck {
                status: HealthStatus::Healthy,
                response_time_ms: Some(5),
                error: None,
            })
        }
    }

    /// Counts checks and reports healthy
    #[derive(Default)]
    struct CountingChecker {
        checks: AtomicUsize,
    }

    #[async_trait]
    impl HealthChecker for CountingChecker {
        async fn check(
            &self,
            _provider: &Provider,
            _environment: &Environment,
        ) -> Result<EnvironmentCheck, RouterError> {
            self.checks.fetch_add(1, Ordering::SeqCst);
            Ok(EnvironmentCheck {
                status: HealthStatus::Healthy,
                response_time_ms: Some(5),
                error: None,
            })
        }
    }

    fn monitor_with(registry: &ServiceRegistry, checker: Arc<dyn HealthChecker>) -> HealthMonitor {
        HealthMonitor::new(registry.clone(), checker, &Config::default().health_check)
    }

    #[test]
    fn test_aggregate_status() {
        use HealthStatus::*;
        assert_eq!(aggregate_status(&[Healthy, Healthy]), Healthy);
        assert_eq!(aggregate_status(&[Healthy, Unhealthy]), Degraded);
        assert_eq!(aggregate_status(&[Degraded, Unhealthy]), Degraded);
        assert_eq!(aggregate_status(&[Unhealthy, Unhealthy]), Unhealthy);
        assert_eq!(aggregate_status(&[]), Unhealthy);
    }

    #[tokio::test]
    async fn test_failing_check_marks_unhealthy_without_stopping_others() {
        let registry = ServiceRegistry::new();
        for id in ["first", "broken", "last"] {
            registry
                .register(test_provider(id, ServiceType::BlogWriter))
                .unwrap();
        }
        registry
            .update_health_status("broken", healthy(HealthStatus::Healthy))
            .unwrap();

        let monitor = monitor_with(
            &registry,
            Arc::new(FailingChecker {
                broken: "broken".to_string(),
            }),
        );
        let results = monitor.check_all().await;

        assert_eq!(results.len(), 3);
        assert_eq!(registry.get_health("first").unwrap().status, HealthStatus::Healthy);
        assert_eq!(registry.get_health("last").unwrap().status, HealthStatus::Healthy);

        let broken = registry.get_health("broken").unwrap();
        assert_eq!(broken.status, HealthStatus::Unhealthy);
        assert!(broken.error.unwrap().contains("connection refused"));
    }

    #[tokio::test]
    async fn test_panicking_check_is_isolated() {
        let registry = ServiceRegistry::new();
        for id in ["ok", "panics"] {
            registry
                .register(test_provider(id, ServiceType::BlogWriter))
                .unwrap();
        }

        let monitor = monitor_with(
            &registry,
            Arc::new(PanickingChecker {
                broken: "panics".to_string(),
            }),
        );
        monitor.check_all().await;

        assert_eq!(registry.get_health("ok").unwrap().status, HealthStatus::Healthy);
        assert_eq!(registry.get_health("panics").unwrap().status, HealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn test_http_checker_classifies_responses() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/slow"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(150)))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/down"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let mut config = Config::default().health_check;
        config.degraded_threshold_ms = 100;
        let checker = HttpHealthChecker::new(&config).unwrap();
        let provider = test_provider("p", ServiceType::BlogWriter);

        let mut env = Environment::new("production", server.uri(), "secret");
        let result = checker.check(&provider, &env).await.unwrap();
        assert_eq!(result.status, HealthStatus::Healthy);

        env.health_check.endpoint = "/slow".to_string();
        let result = checker.check(&provider, &env).await.unwrap();
        assert_eq!(result.status, HealthStatus::Degraded);

        env.health_check.endpoint = "/down".to_string();
        let result = checker.check(&provider, &env).await.unwrap();
        assert_eq!(result.status, HealthStatus::Unhealthy);
    }

    #[tokio::test]
    async fn test_check_provider_updates_environments() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/health"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let registry = ServiceRegistry::new();
        let mut provider = test_provider("p", ServiceType::BlogWriter);
        provider.environments = vec![
            Environment::new("production", server.uri(), ""),
            Environment::new("staging", "http://127.0.0.1:1", ""),
        ];
        registry.register(provider).unwrap();

        let checker = HttpHealthChecker::new(&Config::default().health_check).unwrap();
        let monitor = monitor_with(&registry, Arc::new(checker));
        let health = monitor.check_provider("p").await.unwrap();

        assert_eq!(health.status, HealthStatus::Degraded);
        let stored = registry.get_service("p").unwrap();
        assert_eq!(stored.environments[0].health_status, HealthStatus::Healthy);
        assert_eq!(stored.environments[1].health_status, HealthStatus::Unhealthy);
        assert_eq!(stored.status.health_status, HealthStatus::Degraded);
    }

    #[tokio::test]
    async fn test_system_health_rules() {
        let registry = ServiceRegistry::new();
        let monitor = monitor_with(
            &registry,
            Arc::new(FailingChecker {
                broken: String::new(),
            }),
        );
        assert_eq!(monitor.get_system_health().status, HealthStatus::Unhealthy);

        registry
            .register(test_provider("a", ServiceType::BlogWriter))
            .unwrap();
        registry
            .register(test_provider("b", ServiceType::SeoOptimizer))
            .unwrap();
        registry
            .update_health_status("a", healthy(HealthStatus::Healthy))
            .unwrap();
        assert_eq!(monitor.get_system_health().status, HealthStatus::Degraded);

        registry
            .update_health_status("b", healthy(HealthStatus::Healthy))
            .unwrap();
        let report = monitor.get_system_health();
        assert_eq!(report.status, HealthStatus::Healthy);
        assert_eq!(report.healthy_services, 2);
    }

    #[tokio::test]
    async fn test_watch_and_unwatch() {
        let registry = ServiceRegistry::new();
        registry
            .register(test_provider("a", ServiceType::BlogWriter))
            .unwrap();
        let monitor = monitor_with(
            &registry,
            Arc::new(FailingChecker {
                broken: String::new(),
            }),
        );

        monitor.start();
        assert!(monitor.is_watching("a"));

        // The first tick fires immediately
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(registry.get_health("a").unwrap().status, HealthStatus::Healthy);

        monitor.unwatch("a");
        assert!(!monitor.is_watching("a"));

        monitor.shutdown();
        monitor.watch("a");
        assert!(!monitor.is_watching("a"));
    }

    #[tokio::test]
    async fn test_record_success_and_failure() {
        let registry = ServiceRegistry::new();
        registry
            .register(test_provider("a", ServiceType::BlogWriter))
            .unwrap();
        let monitor = monitor_with(
            &registry,
            Arc::new(FailingChecker {
                broken: String::new(),
            }),
        );

        monitor.record_success("a", 200).unwrap();
        let metrics = monitor
            .record_failure("a", 0, &RouterError::Timeout { timeout_ms: 10 })
            .unwrap();
        assert_eq!(metrics.total_requests, 2);
        assert_eq!(metrics.failed_requests, 1);
        assert_eq!(metrics.average_response_time, 50.0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_watch_starts_one_task() {
        let registry = ServiceRegistry::new();
        registry
            .register(test_provider("a", ServiceType::BlogWriter))
            .unwrap();
        let checker = Arc::new(CountingChecker::default());
        let monitor = monitor_with(&registry, checker.clone());

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let monitor = monitor.clone();
                tokio::spawn(async move { monitor.watch("a") })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        // Each watch task checks once on its first tick
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(checker.checks.load(Ordering::SeqCst), 1);
        assert!(monitor.is_watching("a"));

        monitor.shutdown();
    }
}
