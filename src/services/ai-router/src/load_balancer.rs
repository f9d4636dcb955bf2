//! Load Balancer Module
//!
//! Provider selection strategies (round-robin, random, health-based, scored)
//! and environment selection for a chosen provider.

use dashmap::DashMap;
use rand::seq::SliceRandom;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::config::ScoringWeights;
use crate::models::{Environment, HealthStatus, LoadBalancingStrategy, Provider, RequestPreferences};
use crate::registry::ServiceRegistry;
use crate::scoring::ProviderScorer;

/// Inputs available to a selection strategy
#[derive(Debug, Clone, Copy)]
pub struct SelectionContext<'a> {
    /// Pool the selection is made for (assignment id, service type, ...)
    pub pool: &'a str,
    pub registry: &'a ServiceRegistry,
    pub prompt_tokens: u64,
    pub preferences: Option<&'a RequestPreferences>,
}

/// Selection strategy trait
pub trait SelectionStrategy: std::fmt::Debug + Send + Sync {
    /// Select a provider from the candidates
    fn select<'a>(&self, providers: &'a [Provider], ctx: &SelectionContext<'_>) -> Option<&'a Provider>;

    /// Get strategy name
    fn name(&self) -> &str;
}

/// Round-robin counter for a pool
#[derive(Debug)]
struct RoundRobinCounter {
    counter: AtomicUsize,
}

impl RoundRobinCounter {
    fn new() -> Self {
        Self {
            counter: AtomicUsize::new(0),
        }
    }

    fn next(&self, max: usize) -> usize {
        if max == 0 {
            0
        } else {
            self.counter.fetch_add(1, Ordering::Relaxed) % max
        }
    }
}

#[derive(Debug, Default)]
struct RoundRobinStrategy {
    counters: DashMap<String, RoundRobinCounter>,
}

impl SelectionStrategy for RoundRobinStrategy {
    fn select<'a>(&self, providers: &'a [Provider], ctx: &SelectionContext<'_>) -> Option<&'a Provider> {
        if providers.is_empty() {
            return None;
        }

        let counter = self
            .counters
            .entry(ctx.pool.to_string())
            .or_insert_with(RoundRobinCounter::new);
        providers.get(counter.next(providers.len()))
    }

    fn name(&self) -> &str {
        "round-robin"
    }
}

#[derive(Debug)]
struct RandomStrategy;

impl SelectionStrategy for RandomStrategy {
    fn select<'a>(&self, providers: &'a [Provider], _ctx: &SelectionContext<'_>) -> Option<&'a Provider> {
        providers.choose(&mut rand::thread_rng())
    }

    fn name(&self) -> &str {
        "random"
    }
}

/// Best health first, then lowest average latency
#[derive(Debug)]
struct HealthBasedStrategy;

impl SelectionStrategy for HealthBasedStrategy {
    fn select<'a>(&self, providers: &'a [Provider], ctx: &SelectionContext<'_>) -> Option<&'a Provider> {
        providers.iter().min_by(|a, b| {
            let rank = |p: &Provider| {
                ctx.registry
                    .get_health(&p.id)
                    .map_or(HealthStatus::Unhealthy.rank() + 1, |h| h.status.rank())
            };
            let latency = |p: &Provider| {
                ctx.registry
                    .get_metrics(&p.id)
                    .map_or(0.0, |m| m.average_response_time)
            };

            rank(a).cmp(&rank(b)).then(
                latency(a)
                    .partial_cmp(&latency(b))
                    .unwrap_or(std::cmp::Ordering::Equal),
            )
        })
    }

    fn name(&self) -> &str {
        "health-based"
    }
}

#[derive(Debug)]
struct ScoredStrategy {
    scorer: ProviderScorer,
}

impl SelectionStrategy for ScoredStrategy {
    fn select<'a>(&self, providers: &'a [Provider], ctx: &SelectionContext<'_>) -> Option<&'a Provider> {
        self.scorer
            .best(
                providers,
                |id| ctx.registry.get_metrics(id),
                ctx.prompt_tokens,
                ctx.preferences,
            )
            .map(|(provider, _)| provider)
    }

    fn name(&self) -> &str {
        "scored"
    }
}

/// Provider and environment selection
#[derive(Debug, Clone)]
pub struct LoadBalancer {
    strategies: Arc<HashMap<LoadBalancingStrategy, Box<dyn SelectionStrategy>>>,
}

impl Default for LoadBalancer {
    fn default() -> Self {
        Self::new(ScoringWeights::default())
    }
}

impl LoadBalancer {
    pub fn new(weights: ScoringWeights) -> Self {
        let mut strategies: HashMap<LoadBalancingStrategy, Box<dyn SelectionStrategy>> =
            HashMap::new();
        strategies.insert(
            LoadBalancingStrategy::RoundRobin,
            Box::new(RoundRobinStrategy::default()),
        );
        strategies.insert(LoadBalancingStrategy::Random, Box::new(RandomStrategy));
        strategies.insert(LoadBalancingStrategy::HealthBased, Box::new(HealthBasedStrategy));
        strategies.insert(
            LoadBalancingStrategy::Scored,
            Box::new(ScoredStrategy {
                scorer: ProviderScorer::new(weights),
            }),
        );

        Self {
            strategies: Arc::new(strategies),
        }
    }

    /// Select a provider using the given strategy
    pub fn select_provider<'a>(
        &self,
        strategy: LoadBalancingStrategy,
        providers: &'a [Provider],
        ctx: &SelectionContext<'_>,
    ) -> Option<&'a Provider> {
        let selector = self.strategies.get(&strategy)?;
        let selected = selector.select(providers, ctx);

        debug!(
            pool = %ctx.pool,
            strategy = selector.name(),
            candidates = providers.len(),
            selected = ?selected.map(|p| p.id.as_str()),
            "Selected provider"
        );

        selected
    }

    /// Endpoint health hook; every endpoint is currently treated as healthy
    pub fn is_endpoint_healthy(&self, _environment: &Environment) -> bool {
        true
    }

    /// Pick one of the provider's active environments uniformly at random
    pub fn select_endpoint(&self, provider: &Provider) -> Option<Environment> {
        let endpoints: Vec<&Environment> = provider
            .environments
            .iter()
            .filter(|env| env.is_active)
            .filter(|env| self.is_endpoint_healthy(env))
            .collect();

        endpoints.choose(&mut rand::thread_rng()).map(|env| (*env).clone())
    }

    /// Active environments in the order they should be tried.
    ///
    /// `preferred` restricts the set to matching names or ids when non-empty.
    /// Environments are sorted by priority with unhealthy ones moved last.
    pub fn environment_order(&self, provider: &Provider, preferred: &[String]) -> Vec<Environment> {
        let mut environments: Vec<Environment> = provider
            .active_environments()
            .into_iter()
            .filter(|env| {
                preferred.is_empty()
                    || preferred
                        .iter()
                        .any(|name| *name == env.name || *name == env.id)
            })
            .cloned()
            .collect();

        environments.sort_by_key(|env| (env.health_status == HealthStatus::Unhealthy, env.priority));
        environments
    }

    /// Highest-priority environment that is not unhealthy, else the highest-priority one
    pub fn select_environment(&self, provider: &Provider, preferred: &[String]) -> Option<Environment> {
        self.environment_order(provider, preferred).into_iter().next()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ServiceMetricsUpdate, ServiceType};
    use crate::registry::tests::{healthy, test_provider};

    fn ctx<'a>(registry: &'a ServiceRegistry) -> SelectionContext<'a> {
        SelectionContext {
            pool: "test",
            registry,
            prompt_tokens: 10,
            preferences: None,
        }
    }

    #[test]
    fn test_round_robin_counter() {
        let counter = RoundRobinCounter::new();

        assert_eq!(counter.next(3), 0);
        assert_eq!(counter.next(3), 1);
        assert_eq!(counter.next(3), 2);
        assert_eq!(counter.next(3), 0);
    }

    #[test]
    fn test_round_robin_cycles_per_pool() {
        let registry = ServiceRegistry::new();
        let lb = LoadBalancer::default();
        let providers = vec![
            test_provider("a", ServiceType::BlogWriter),
            test_provider("b", ServiceType::BlogWriter),
            test_provider("c", ServiceType::BlogWriter),
        ];

        let picks: Vec<&str> = (0..4)
            .map(|_| {
                lb.select_provider(LoadBalancingStrategy::RoundRobin, &providers, &ctx(&registry))
                    .unwrap()
                    .id
                    .as_str()
            })
            .collect();
        assert_eq!(picks, vec!["a", "b", "c", "a"]);

        let other_pool = SelectionContext {
            pool: "other",
            ..ctx(&registry)
        };
        let first = lb
            .select_provider(LoadBalancingStrategy::RoundRobin, &providers, &other_pool)
            .unwrap();
        assert_eq!(first.id, "a");
    }

    #[test]
    fn test_random_selects_a_candidate() {
        let registry = ServiceRegistry::new();
        let lb = LoadBalancer::default();
        let providers = vec![
            test_provider("a", ServiceType::BlogWriter),
            test_provider("b", ServiceType::BlogWriter),
        ];

        for _ in 0..20 {
            let selected = lb
                .select_provider(LoadBalancingStrategy::Random, &providers, &ctx(&registry))
                .unwrap();
            assert!(selected.id == "a" || selected.id == "b");
        }
        assert!(lb
            .select_provider(LoadBalancingStrategy::Random, &[], &ctx(&registry))
            .is_none());
    }

    #[test]
    fn test_health_based_prefers_healthy_then_fast() {
        let registry = ServiceRegistry::new();
        for id in ["sick", "slow", "fast"] {
            registry
                .register(test_provider(id, ServiceType::BlogWriter))
                .unwrap();
        }
        registry
            .update_health_status("sick", healthy(HealthStatus::Unhealthy))
            .unwrap();
        registry
            .update_health_status("slow", healthy(HealthStatus::Healthy))
            .unwrap();
        registry
            .update_health_status("fast", healthy(HealthStatus::Healthy))
            .unwrap();
        registry
            .update_metrics(
                "slow",
                ServiceMetricsUpdate {
                    average_response_time: Some(900.0),
                    ..Default::default()
                },
            )
            .unwrap();
        registry
            .update_metrics(
                "fast",
                ServiceMetricsUpdate {
                    average_response_time: Some(100.0),
                    ..Default::default()
                },
            )
            .unwrap();

        let providers = registry.list_services();
        let lb = LoadBalancer::default();
        let selected = lb
            .select_provider(LoadBalancingStrategy::HealthBased, &providers, &ctx(&registry))
            .unwrap();
        assert_eq!(selected.id, "fast");
    }

    #[test]
    fn test_select_environment_by_priority() {
        let lb = LoadBalancer::default();
        let mut provider = test_provider("a", ServiceType::BlogWriter);
        let mut production = Environment::new("production", "http://prod", "");
        production.priority = 1;
        let mut staging = Environment::new("staging", "http://staging", "");
        staging.priority = 2;
        let mut development = Environment::new("development", "http://dev", "");
        development.priority = 3;
        development.is_active = false;
        provider.environments = vec![staging, development, production];

        // Nothing checked yet: fall back to the highest priority
        assert_eq!(lb.select_environment(&provider, &[]).unwrap().name, "production");

        provider.environments[0].health_status = HealthStatus::Healthy;
        assert_eq!(lb.select_environment(&provider, &[]).unwrap().name, "staging");

        let order: Vec<String> = lb
            .environment_order(&provider, &[])
            .into_iter()
            .map(|env| env.name)
            .collect();
        assert_eq!(order, vec!["staging", "production"]);

        assert!(lb
            .select_environment(&provider, &["development".to_string()])
            .is_none());
    }

    #[test]
    fn test_select_endpoint_skips_inactive() {
        let lb = LoadBalancer::default();
        let mut provider = test_provider("a", ServiceType::BlogWriter);
        let mut inactive = Environment::new("staging", "http://staging", "");
        inactive.is_active = false;
        provider.environments.push(inactive);

        for _ in 0..10 {
            assert_eq!(lb.select_endpoint(&provider).unwrap().name, "production");
        }
        assert!(lb.is_endpoint_healthy(&provider.environments[1]));
    }
}
