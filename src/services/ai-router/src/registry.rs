//! Service registry for the AI Router Service
//!
//! The registry is the single provider store shared by the intelligent router,
//! the API manager and the health monitor. It keeps three maps keyed by
//! provider id: the provider definitions, the latest health record, and the
//! rolling request metrics. A provider with no health record has not been
//! checked yet.
//!
//! Every read-modify-write happens while holding the `DashMap` entry lock for
//! that provider, so health-check writers and request handlers never lose
//! updates to each other.

use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

use crate::models::{
    HealthStatus, Provider, RouterError, ServiceHealth, ServiceMetrics, ServiceMetricsUpdate,
    ServiceType,
};

/// Registry statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct RegistryStats {
    pub total_services: usize,
    pub active_services: usize,
    pub healthy_services: usize,
    pub degraded_services: usize,
    pub unhealthy_services: usize,
    pub unchecked_services: usize,
    pub services_by_type: HashMap<String, usize>,
}

/// In-memory provider registry
#[derive(Debug, Clone, Default)]
pub struct ServiceRegistry {
    /// Providers indexed by ID
    services: Arc<DashMap<String, Provider>>,
    /// Latest health record per provider
    health: Arc<DashMap<String, ServiceHealth>>,
    /// Rolling metrics per provider
    metrics: Arc<DashMap<String, ServiceMetrics>>,
    /// Registration order, used for stable listings
    order: Arc<RwLock<Vec<String>>>,
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider, replacing any provider with the same id
    pub fn register(&self, provider: Provider) -> Result<Provider, RouterError> {
        validate_provider(&provider)?;

        let id = provider.id.clone();
        let replaced = self.services.insert(id.clone(), provider.clone()).is_some();
        self.registered(&provider, replaced);
        Ok(provider)
    }

    /// Register a provider whose id must not be taken yet
    pub fn register_new(&self, provider: Provider) -> Result<Provider, RouterError> {
        validate_provider(&provider)?;

        match self.services.entry(provider.id.clone()) {
            Entry::Occupied(_) => {
                return Err(RouterError::validation(
                    "id",
                    format!("Provider '{}' already exists", provider.id),
                ))
            }
            Entry::Vacant(slot) => {
                slot.insert(provider.clone());
            }
        }
        self.registered(&provider, false);
        Ok(provider)
    }

    fn registered(&self, provider: &Provider, replaced: bool) {
        self.metrics.entry(provider.id.clone()).or_default();
        if !replaced {
            self.order.write().push(provider.id.clone());
        }

        info!(
            provider_id = %provider.id,
            provider_type = %provider.provider_type,
            replaced,
            "Registered provider"
        );
    }

    /// All providers in registration order
    pub fn list_services(&self) -> Vec<Provider> {
        self.order
            .read()
            .iter()
            .filter_map(|id| self.services.get(id).map(|entry| entry.value().clone()))
            .collect()
    }

    pub fn get_service(&self, id: &str) -> Option<Provider> {
        self.services.get(id).map(|entry| entry.value().clone())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.services.contains_key(id)
    }

    pub fn get_services_by_type(&self, service_type: ServiceType) -> Vec<Provider> {
        self.list_services()
            .into_iter()
            .filter(|provider| provider.provider_type == service_type)
            .collect()
    }

    /// Active providers whose latest check reported them healthy
    pub fn get_healthy_services(&self, service_type: Option<ServiceType>) -> Vec<Provider> {
        self.list_services()
            .into_iter()
            .filter(|provider| service_type.map_or(true, |t| provider.provider_type == t))
            .filter(|provider| provider.status.is_active)
            .filter(|provider| {
                self.health
                    .get(&provider.id)
                    .map_or(false, |health| health.status == HealthStatus::Healthy)
            })
            .collect()
    }

    /// Store the latest health record and mirror it into the provider status
    pub fn update_health_status(&self, id: &str, health: ServiceHealth) -> Result<(), RouterError> {
        let mut provider = self
            .services
            .get_mut(id)
            .ok_or_else(|| RouterError::ProviderNotFound { id: id.to_string() })?;

        provider.status.health_status = health.status;
        provider.status.last_health_check = Some(health.last_check);
        drop(provider);

        debug!(provider_id = %id, status = ?health.status, "Updated health status");
        self.health.insert(id.to_string(), health);
        Ok(())
    }

    /// Record the outcome of one environment check on the provider
    pub fn update_environment_health(
        &self,
        provider_id: &str,
        environment_id: &str,
        status: HealthStatus,
        response_time_ms: Option<u64>,
        checked_at: DateTime<Utc>,
    ) -> Result<(), RouterError> {
        let mut provider = self
            .services
            .get_mut(provider_id)
            .ok_or_else(|| RouterError::ProviderNotFound {
                id: provider_id.to_string(),
            })?;

        let environment = provider
            .environments
            .iter_mut()
            .find(|env| env.id == environment_id)
            .ok_or_else(|| RouterError::EnvironmentNotFound {
                id: environment_id.to_string(),
            })?;

        environment.health_status = status;
        environment.last_health_check = Some(checked_at);
        environment.last_response_time_ms = response_time_ms;
        Ok(())
    }

    pub fn get_health(&self, id: &str) -> Option<ServiceHealth> {
        self.health.get(id).map(|entry| entry.value().clone())
    }

    /// Merge a partial metrics update; applying the same update twice is a no-op
    pub fn update_metrics(
        &self,
        id: &str,
        update: ServiceMetricsUpdate,
    ) -> Result<ServiceMetrics, RouterError> {
        if !self.services.contains_key(id) {
            return Err(RouterError::ProviderNotFound { id: id.to_string() });
        }

        let mut metrics = self.metrics.entry(id.to_string()).or_default();

        if let Some(v) = update.total_requests {
            metrics.total_requests = v;
        }
        if let Some(v) = update.successful_requests {
            metrics.successful_requests = v;
        }
        if let Some(v) = update.failed_requests {
            metrics.failed_requests = v;
        }
        if let Some(v) = update.average_response_time {
            metrics.average_response_time = v;
        }
        if let Some(v) = update.error_rate {
            metrics.error_rate = v;
        }
        if let Some(v) = update.availability {
            metrics.availability = v;
        }
        if let Some(v) = update.total_tokens {
            metrics.total_tokens = v;
        }
        if let Some(v) = update.total_cost {
            metrics.total_cost = v;
        }
        metrics.last_updated = Utc::now();

        Ok(metrics.clone())
    }

    /// Count one request against a provider.
    ///
    /// The latency average is `(old + new) / 2`, applied even to the first
    /// sample, which weights recent requests heavily rather than giving a
    /// true mean.
    pub fn record_request(
        &self,
        id: &str,
        success: bool,
        response_time_ms: u64,
        tokens: u64,
        cost: f64,
    ) -> Result<ServiceMetrics, RouterError> {
        if !self.services.contains_key(id) {
            return Err(RouterError::ProviderNotFound { id: id.to_string() });
        }

        // Held until the provider status mirrors it
        let mut metrics = self.metrics.entry(id.to_string()).or_default();
        metrics.total_requests += 1;
        if success {
            metrics.successful_requests += 1;
        } else {
            metrics.failed_requests += 1;
        }
        metrics.average_response_time =
            (metrics.average_response_time + response_time_ms as f64) / 2.0;
        metrics.availability =
            metrics.successful_requests as f64 / metrics.total_requests as f64;
        metrics.error_rate = metrics.failed_requests as f64 / metrics.total_requests as f64;
        metrics.total_tokens += tokens;
        metrics.total_cost += cost;
        metrics.last_updated = Utc::now();
        let snapshot = metrics.clone();

        if let Some(mut provider) = self.services.get_mut(id) {
            provider.status.total_requests = snapshot.total_requests;
            provider.status.successful_requests = snapshot.successful_requests;
            provider.status.failed_requests = snapshot.failed_requests;
            provider.status.average_response_time = snapshot.average_response_time;
            provider.status.error_rate = snapshot.error_rate;
        }
        drop(metrics);

        Ok(snapshot)
    }

    pub fn get_metrics(&self, id: &str) -> Option<ServiceMetrics> {
        self.metrics.get(id).map(|entry| entry.value().clone())
    }

    /// Apply `update` to a copy of the provider under its entry lock.
    ///
    /// The copy is stored only when `update` succeeds, so a rejected update
    /// leaves the provider untouched.
    pub fn update_service<F>(&self, id: &str, update: F) -> Result<Provider, RouterError>
    where
        F: FnOnce(&mut Provider) -> Result<(), RouterError>,
    {
        let mut entry = self
            .services
            .get_mut(id)
            .ok_or_else(|| RouterError::ProviderNotFound { id: id.to_string() })?;

        let mut draft = entry.value().clone();
        update(&mut draft)?;
        draft.updated_at = Utc::now();
        *entry = draft.clone();
        Ok(draft)
    }

    /// Remove a provider together with its health and metrics records
    pub fn remove(&self, id: &str) -> Option<Provider> {
        let removed = self.services.remove(id).map(|(_, provider)| provider);
        if removed.is_some() {
            self.health.remove(id);
            self.metrics.remove(id);
            self.order.write().retain(|existing| existing != id);
            info!(provider_id = %id, "Removed provider");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    pub fn stats(&self) -> RegistryStats {
        let mut stats = RegistryStats {
            total_services: self.services.len(),
            ..Default::default()
        };

        for provider in self.services.iter() {
            if provider.status.is_active {
                stats.active_services += 1;
            }

            match self.health.get(provider.key()).map(|h| h.status) {
                Some(HealthStatus::Healthy) => stats.healthy_services += 1,
                Some(HealthStatus::Degraded) => stats.degraded_services += 1,
                Some(HealthStatus::Unhealthy) => stats.unhealthy_services += 1,
                None => stats.unchecked_services += 1,
            }

            *stats
                .services_by_type
                .entry(provider.provider_type.to_string())
                .or_insert(0) += 1;
        }

        stats
    }
}

fn validate_provider(provider: &Provider) -> Result<(), RouterError> {
    if provider.id.trim().is_empty() {
        return Err(RouterError::validation("id", "Provider id is required"));
    }
    if provider.name.trim().is_empty() {
        return Err(RouterError::validation("name", "Provider name is required"));
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::{
        Capabilities, Environment, Pricing, ProviderLimits, ProviderStatus, QualityScores,
    };

    pub(crate) fn test_provider(id: &str, provider_type: ServiceType) -> Provider {
        Provider {
            id: id.to_string(),
            name: format!("Provider {}", id),
            provider_type,
            description: String::new(),
            environments: vec![Environment::new("production", "http://localhost:9", "key")],
            capabilities: Capabilities {
                quality_scores: QualityScores {
                    overall: 0.86,
                    ..Default::default()
                },
                ..Default::default()
            },
            limits: ProviderLimits::default(),
            pricing: Pricing::default(),
            generate_endpoint: "/api/v1/generate".to_string(),
            status: ProviderStatus::default(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    pub(crate) fn healthy(status: HealthStatus) -> ServiceHealth {
        ServiceHealth {
            status,
            last_check: Utc::now(),
            response_time_ms: Some(50),
            error: None,
        }
    }

    #[test]
    fn test_register_is_immediately_visible() {
        let registry = ServiceRegistry::new();
        registry
            .register(test_provider("a", ServiceType::BlogWriter))
            .unwrap();

        assert_eq!(registry.list_services().len(), 1);
        assert_eq!(registry.get_service("a").unwrap().name, "Provider a");
        assert!(registry.get_health("a").is_none());
        assert_eq!(registry.get_metrics("a").unwrap().total_requests, 0);
    }

    #[test]
    fn test_register_requires_id() {
        let registry = ServiceRegistry::new();
        let result = registry.register(test_provider("", ServiceType::BlogWriter));
        assert!(matches!(result, Err(RouterError::ValidationError { .. })));
    }

    #[test]
    fn test_unhealthy_services_excluded() {
        let registry = ServiceRegistry::new();
        for id in ["healthy", "sick", "slow", "unchecked"] {
            registry
                .register(test_provider(id, ServiceType::BlogWriter))
                .unwrap();
        }
        registry
            .update_health_status("healthy", healthy(HealthStatus::Healthy))
            .unwrap();
        registry
            .update_health_status("sick", healthy(HealthStatus::Unhealthy))
            .unwrap();
        registry
            .update_health_status("slow", healthy(HealthStatus::Degraded))
            .unwrap();

        let ids: Vec<String> = registry
            .get_healthy_services(Some(ServiceType::BlogWriter))
            .into_iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(ids, vec!["healthy".to_string()]);
        assert!(registry
            .get_healthy_services(Some(ServiceType::SeoOptimizer))
            .is_empty());
    }

    #[test]
    fn test_inactive_services_excluded() {
        let registry = ServiceRegistry::new();
        registry
            .register(test_provider("a", ServiceType::BlogWriter))
            .unwrap();
        registry
            .update_health_status("a", healthy(HealthStatus::Healthy))
            .unwrap();
        registry
            .update_service("a", |p| {
                p.status.is_active = false;
                Ok(())
            })
            .unwrap();

        assert!(registry.get_healthy_services(None).is_empty());
    }

    #[test]
    fn test_health_status_mirrored_into_provider() {
        let registry = ServiceRegistry::new();
        registry
            .register(test_provider("a", ServiceType::BlogWriter))
            .unwrap();
        registry
            .update_health_status("a", healthy(HealthStatus::Degraded))
            .unwrap();

        let provider = registry.get_service("a").unwrap();
        assert_eq!(provider.status.health_status, HealthStatus::Degraded);
        assert!(provider.status.last_health_check.is_some());
    }

    #[test]
    fn test_update_metrics_is_idempotent() {
        let registry = ServiceRegistry::new();
        registry
            .register(test_provider("a", ServiceType::BlogWriter))
            .unwrap();

        let update = ServiceMetricsUpdate {
            total_requests: Some(10),
            average_response_time: Some(250.0),
            availability: Some(0.9),
            ..Default::default()
        };

        let first = registry.update_metrics("a", update.clone()).unwrap();
        let second = registry.update_metrics("a", update).unwrap();

        assert_eq!(first.total_requests, second.total_requests);
        assert_eq!(first.average_response_time, second.average_response_time);
        assert_eq!(first.availability, second.availability);
        assert_eq!(second.successful_requests, 0);
    }

    #[test]
    fn test_record_request_uses_pairwise_average() {
        let registry = ServiceRegistry::new();
        registry
            .register(test_provider("a", ServiceType::BlogWriter))
            .unwrap();

        let first = registry.record_request("a", true, 100, 10, 0.1).unwrap();
        assert_eq!(first.average_response_time, 50.0);

        let second = registry.record_request("a", true, 300, 10, 0.1).unwrap();
        assert_eq!(second.average_response_time, 175.0);

        let third = registry.record_request("a", false, 25, 0, 0.0).unwrap();
        assert_eq!(third.average_response_time, 100.0);
        assert_eq!(third.total_requests, 3);
        assert_eq!(third.failed_requests, 1);
        assert!((third.availability - 2.0 / 3.0).abs() < 1e-9);
        assert!((third.error_rate - 1.0 / 3.0).abs() < 1e-9);

        let provider = registry.get_service("a").unwrap();
        assert_eq!(provider.status.total_requests, 3);
        assert_eq!(provider.status.average_response_time, 100.0);
    }

    #[test]
    fn test_remove_clears_all_maps() {
        let registry = ServiceRegistry::new();
        registry
            .register(test_provider("a", ServiceType::BlogWriter))
            .unwrap();
        registry
            .update_health_status("a", healthy(HealthStatus::Healthy))
            .unwrap();

        assert!(registry.remove("a").is_some());
        assert!(registry.get_service("a").is_none());
        assert!(registry.get_health("a").is_none());
        assert!(registry.get_metrics("a").is_none());
        assert!(registry.list_services().is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_record_request_loses_nothing() {
        let registry = ServiceRegistry::new();
        registry
            .register(test_provider("a", ServiceType::BlogWriter))
            .unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                for _ in 0..50 {
                    registry.record_request("a", true, 10, 1, 0.0).unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let metrics = registry.get_metrics("a").unwrap();
        assert_eq!(metrics.total_requests, 400);
        assert_eq!(metrics.total_tokens, 400);

        let status = registry.get_service("a").unwrap().status;
        assert_eq!(status.total_requests, 400);
        assert_eq!(status.successful_requests, 400);
    }

    #[test]
    fn test_rejected_update_leaves_provider_untouched() {
        let registry = ServiceRegistry::new();
        registry
            .register(test_provider("a", ServiceType::BlogWriter))
            .unwrap();

        let result = registry.update_service("a", |p| {
            p.name = "renamed".to_string();
            Err(RouterError::validation("base_url", "Invalid base URL"))
        });

        assert!(matches!(result, Err(RouterError::ValidationError { .. })));
        assert_eq!(registry.get_service("a").unwrap().name, "Provider a");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_register_new_admits_one() {
        let registry = ServiceRegistry::new();

        let handles: Vec<_> = (0..8)
            .map(|i| {
                let registry = registry.clone();
                tokio::spawn(async move {
                    let mut provider = test_provider("dup", ServiceType::BlogWriter);
                    provider.description = format!("writer {}", i);
                    registry.register_new(provider).map(|p| p.description)
                })
            })
            .collect();

        let mut winners = Vec::new();
        for handle in handles {
            if let Ok(description) = handle.await.unwrap() {
                winners.push(description);
            }
        }

        assert_eq!(winners.len(), 1);
        assert_eq!(registry.get_service("dup").unwrap().description, winners[0]);
        assert_eq!(registry.list_services().len(), 1);
    }
}
