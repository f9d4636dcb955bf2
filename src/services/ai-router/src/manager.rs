//! API manager
//!
//! Administrative CRUD over providers, their environments, API keys and
//! assignments, plus the explicit routing path used by `/v1/requests`: the
//! caller names a provider, an assignment or a provider type, a selection
//! strategy picks the provider and environments are tried in priority order.
//!
//! Providers live in the shared [`ServiceRegistry`]; keys and assignments are
//! owned here. Every admin mutation is followed by a snapshot save through
//! the configured [`StateStore`].

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Instant;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::client::ProviderClient;
use crate::config::BLOG_WRITER_PROVIDER_ID;
use crate::health::HealthMonitor;
use crate::keys::{display_prefix, generate_api_key};
use crate::load_balancer::{LoadBalancer, SelectionContext};
use crate::models::{
    new_request_id, ApiAssignment, ApiKey, ApiRequest, ApiResponse, ApiUsage, Capabilities,
    Environment, EnvironmentRateLimits, FailoverStrategy, HealthCheckSettings,
    LoadBalancingStrategy, Pricing, Provider, ProviderLimits, ProviderStatus, RetryPolicy,
    RouterError, ServiceHealth, ServiceType,
};
use crate::registry::ServiceRegistry;
use crate::scoring::{estimate_cost, estimate_tokens};
use crate::store::{StateSnapshot, StateStore};
use crate::telemetry::{log_error, log_event};
use crate::usage::{UsageFilter, UsageSummary, UsageTracker};

const COMPONENT: &str = "api_manager";

/// New environment definition
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnvironmentInput {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    pub base_url: String,
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub health_check: Option<HealthCheckSettings>,
    #[serde(default)]
    pub rate_limits: Option<EnvironmentRateLimits>,
    #[serde(default)]
    pub priority: Option<u32>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub retry: Option<RetryPolicy>,
    #[serde(default)]
    pub is_active: Option<bool>,
}

impl EnvironmentInput {
    fn into_environment(self) -> Result<Environment, RouterError> {
        validate_required("name", &self.name)?;
        validate_base_url(&self.base_url)?;

        let mut environment = Environment::new(self.name, self.base_url, self.api_key);
        if let Some(id) = self.id.filter(|id| !id.trim().is_empty()) {
            environment.id = id;
        }
        if let Some(health_check) = self.health_check {
            environment.health_check = health_check;
        }
        if let Some(rate_limits) = self.rate_limits {
            environment.rate_limits = rate_limits;
        }
        if let Some(priority) = self.priority {
            environment.priority = priority;
        }
        if let Some(timeout_ms) = self.timeout_ms {
            environment.timeout_ms = timeout_ms;
        }
        if let Some(retry) = self.retry {
            environment.retry = retry;
        }
        if let Some(is_active) = self.is_active {
            environment.is_active = is_active;
        }
        Ok(environment)
    }
}

/// Partial environment update
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnvironmentUpdate {
    pub name: Option<String>,
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub health_check: Option<HealthCheckSettings>,
    pub rate_limits: Option<EnvironmentRateLimits>,
    pub priority: Option<u32>,
    pub timeout_ms: Option<u64>,
    pub retry: Option<RetryPolicy>,
    pub is_active: Option<bool>,
}

/// New provider definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderInput {
    /// Generated when absent
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    pub provider_type: ServiceType,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub environments: Vec<EnvironmentInput>,
    #[serde(default)]
    pub capabilities: Option<Capabilities>,
    #[serde(default)]
    pub limits: Option<ProviderLimits>,
    #[serde(default)]
    pub pricing: Option<Pricing>,
    #[serde(default)]
    pub generate_endpoint: Option<String>,
}

/// Partial provider update
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProviderUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub capabilities: Option<Capabilities>,
    pub limits: Option<ProviderLimits>,
    pub pricing: Option<Pricing>,
    pub generate_endpoint: Option<String>,
    pub is_active: Option<bool>,
}

/// New API key request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiKeyInput {
    pub name: String,
    pub user_id: String,
    #[serde(default)]
    pub allowed_providers: Vec<String>,
    #[serde(default)]
    pub allowed_environments: Vec<String>,
    #[serde(default)]
    pub rate_limits: Option<EnvironmentRateLimits>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Partial API key update
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiKeyUpdate {
    pub name: Option<String>,
    pub allowed_providers: Option<Vec<String>>,
    pub allowed_environments: Option<Vec<String>>,
    pub rate_limits: Option<EnvironmentRateLimits>,
    pub is_active: Option<bool>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// New assignment
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssignmentInput {
    pub name: String,
    pub user_id: String,
    pub provider_ids: Vec<String>,
    #[serde(default)]
    pub environments: Vec<String>,
    #[serde(default)]
    pub load_balancing: LoadBalancingStrategy,
    #[serde(default)]
    pub failover: FailoverStrategy,
    #[serde(default)]
    pub rate_limits: Option<EnvironmentRateLimits>,
}

/// Partial assignment update
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AssignmentUpdate {
    pub name: Option<String>,
    pub provider_ids: Option<Vec<String>>,
    pub environments: Option<Vec<String>>,
    pub load_balancing: Option<LoadBalancingStrategy>,
    pub failover: Option<FailoverStrategy>,
    pub rate_limits: Option<EnvironmentRateLimits>,
    pub is_active: Option<bool>,
}

/// Blog generation request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BlogGenerationRequest {
    #[serde(default)]
    pub topic: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_audience: Option<String>,
    /// Preferred environment name or id
    #[serde(default, skip_serializing)]
    pub environment: Option<String>,
}

fn validate_required(field: &str, value: &str) -> Result<(), RouterError> {
    if value.trim().is_empty() {
        return Err(RouterError::validation(field, format!("{} is required", field)));
    }
    Ok(())
}

fn validate_base_url(base_url: &str) -> Result<(), RouterError> {
    url::Url::parse(base_url)
        .map(|_| ())
        .map_err(|e| RouterError::validation("base_url", format!("Invalid base URL '{}': {}", base_url, e)))
}

/// Provider, key and assignment administration plus explicit request routing
#[derive(Clone)]
pub struct ApiManager {
    registry: ServiceRegistry,
    health: HealthMonitor,
    load_balancer: LoadBalancer,
    client: ProviderClient,
    usage: UsageTracker,
    api_keys: Arc<DashMap<String, ApiKey>>,
    /// Secret to key id
    key_index: Arc<DashMap<String, String>>,
    assignments: Arc<DashMap<String, ApiAssignment>>,
    store: Arc<dyn StateStore>,
    /// Serialises snapshot saves so an older snapshot never overwrites a newer one
    persist_lock: Arc<tokio::sync::Mutex<()>>,
    default_strategy: LoadBalancingStrategy,
    key_prefix: String,
}

impl std::fmt::Debug for ApiManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiManager")
            .field("providers", &self.registry.len())
            .field("api_keys", &self.api_keys.len())
            .field("assignments", &self.assignments.len())
            .field("default_strategy", &self.default_strategy)
            .finish()
    }
}

impl ApiManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: ServiceRegistry,
        health: HealthMonitor,
        load_balancer: LoadBalancer,
        client: ProviderClient,
        store: Arc<dyn StateStore>,
        default_strategy: LoadBalancingStrategy,
        key_prefix: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            health,
            load_balancer,
            client,
            usage: UsageTracker::new(),
            api_keys: Arc::new(DashMap::new()),
            key_index: Arc::new(DashMap::new()),
            assignments: Arc::new(DashMap::new()),
            store,
            persist_lock: Arc::new(tokio::sync::Mutex::new(())),
            default_strategy,
            key_prefix: key_prefix.into(),
        }
    }

    /// Load the saved snapshot; saved providers replace seeded ones with the same id
    pub async fn restore(&self) -> Result<(), RouterError> {
        let snapshot = self.store.load().await?;

        for provider in snapshot.providers {
            self.registry.register(provider)?;
        }
        for key in snapshot.api_keys {
            self.key_index.insert(key.key.clone(), key.id.clone());
            self.api_keys.insert(key.id.clone(), key);
        }
        for assignment in snapshot.assignments {
            self.assignments.insert(assignment.id.clone(), assignment);
        }
        self.usage.restore(snapshot.usage);

        info!(
            providers = self.registry.len(),
            api_keys = self.api_keys.len(),
            assignments = self.assignments.len(),
            "Restored API manager state"
        );
        Ok(())
    }

    pub fn snapshot(&self) -> StateSnapshot {
        let mut api_keys: Vec<ApiKey> = self.api_keys.iter().map(|e| e.value().clone()).collect();
        api_keys.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        let mut assignments: Vec<ApiAssignment> =
            self.assignments.iter().map(|e| e.value().clone()).collect();
        assignments.sort_by(|a, b| a.created_at.cmp(&b.created_at));

        StateSnapshot {
            providers: self.registry.list_services(),
            api_keys,
            assignments,
            usage: self.usage.snapshot(),
        }
    }

    /// Save the current state
    pub async fn persist(&self) -> Result<(), RouterError> {
        let _guard = self.persist_lock.lock().await;
        self.store.save(&self.snapshot()).await
    }

    /// Save after a mutation; a failed save is logged and does not undo the change
    async fn persist_after(&self, action: &str) {
        if let Err(e) = self.persist().await {
            log_error(COMPONENT, action, &e, json!({ "stage": "persist" }));
        }
    }

    fn log_result<T>(&self, action: &str, result: &Result<T, RouterError>, data: Value) {
        match result {
            Ok(_) => log_event(COMPONENT, action, data),
            Err(e) => log_error(COMPONENT, action, e, data),
        }
    }

    // ---------------------------------------------------------------------
    // Providers
    // ---------------------------------------------------------------------

    pub async fn create_provider(&self, input: ProviderInput) -> Result<Provider, RouterError> {
        let result = self
            .build_provider(input)
            .and_then(|provider| self.registry.register_new(provider));
        self.log_result(
            "create_provider",
            &result,
            json!({ "providerId": result.as_ref().map(|p| p.id.clone()).ok() }),
        );

        let provider = result?;
        if provider.status.is_active {
            self.health.watch(&provider.id);
        }
        self.persist_after("create_provider").await;
        Ok(provider)
    }

    fn build_provider(&self, input: ProviderInput) -> Result<Provider, RouterError> {
        validate_required("name", &input.name)?;

        let environments = input
            .environments
            .into_iter()
            .map(EnvironmentInput::into_environment)
            .collect::<Result<Vec<_>, _>>()?;

        let now = Utc::now();
        Ok(Provider {
            id: input
                .id
                .filter(|id| !id.trim().is_empty())
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            name: input.name,
            provider_type: input.provider_type,
            description: input.description,
            environments,
            capabilities: input.capabilities.unwrap_or_default(),
            limits: input.limits.unwrap_or_default(),
            pricing: input.pricing.unwrap_or_default(),
            generate_endpoint: input
                .generate_endpoint
                .unwrap_or_else(|| "/api/v1/generate".to_string()),
            status: ProviderStatus::default(),
            created_at: now,
            updated_at: now,
        })
    }

    pub fn get_provider(&self, id: &str) -> Result<Provider, RouterError> {
        self.registry
            .get_service(id)
            .ok_or_else(|| RouterError::ProviderNotFound { id: id.to_string() })
    }

    pub fn list_providers(&self, provider_type: Option<ServiceType>) -> Vec<Provider> {
        match provider_type {
            Some(provider_type) => self.registry.get_services_by_type(provider_type),
            None => self.registry.list_services(),
        }
    }

    pub async fn update_provider(
        &self,
        id: &str,
        update: ProviderUpdate,
    ) -> Result<Provider, RouterError> {
        let result = self.registry.update_service(id, |provider| {
            if let Some(name) = update.name {
                validate_required("name", &name)?;
                provider.name = name;
            }
            if let Some(description) = update.description {
                provider.description = description;
            }
            if let Some(capabilities) = update.capabilities {
                provider.capabilities = capabilities;
            }
            if let Some(limits) = update.limits {
                provider.limits = limits;
            }
            if let Some(pricing) = update.pricing {
                provider.pricing = pricing;
            }
            if let Some(generate_endpoint) = update.generate_endpoint {
                provider.generate_endpoint = generate_endpoint;
            }
            if let Some(is_active) = update.is_active {
                provider.status.is_active = is_active;
            }
            Ok(())
        });
        self.log_result("update_provider", &result, json!({ "providerId": id }));

        let provider = result?;
        if provider.status.is_active {
            self.health.watch(id);
        } else {
            self.health.unwatch(id);
        }
        self.persist_after("update_provider").await;
        Ok(provider)
    }

    /// Remove a provider, stop its health watch and drop it from assignments
    pub async fn delete_provider(&self, id: &str) -> Result<Provider, RouterError> {
        let result = self
            .registry
            .remove(id)
            .ok_or_else(|| RouterError::ProviderNotFound { id: id.to_string() });
        self.log_result("delete_provider", &result, json!({ "providerId": id }));

        let provider = result?;
        self.health.unwatch(id);
        for mut assignment in self.assignments.iter_mut() {
            if assignment.provider_ids.iter().any(|p| p == id) {
                assignment.provider_ids.retain(|p| p != id);
                assignment.updated_at = Utc::now();
            }
        }
        self.persist_after("delete_provider").await;
        Ok(provider)
    }

    /// Run a health check now
    pub async fn check_provider_health(&self, id: &str) -> Result<ServiceHealth, RouterError> {
        let result = self.health.check_provider(id).await;
        self.log_result("check_provider_health", &result, json!({ "providerId": id }));
        result
    }

    // ---------------------------------------------------------------------
    // Environments
    // ---------------------------------------------------------------------

    pub async fn add_environment(
        &self,
        provider_id: &str,
        input: EnvironmentInput,
    ) -> Result<Environment, RouterError> {
        let result = input.into_environment().and_then(|environment| {
            self.registry.update_service(provider_id, |provider| {
                if provider
                    .environments
                    .iter()
                    .any(|e| e.name == environment.name || e.id == environment.id)
                {
                    return Err(RouterError::validation(
                        "name",
                        format!("Environment '{}' already exists", environment.name),
                    ));
                }
                provider.environments.push(environment.clone());
                Ok(())
            })?;
            Ok(environment)
        });
        self.log_result(
            "add_environment",
            &result,
            json!({ "providerId": provider_id }),
        );

        let environment = result?;
        self.persist_after("add_environment").await;
        Ok(environment)
    }

    pub async fn update_environment(
        &self,
        provider_id: &str,
        environment_id: &str,
        update: EnvironmentUpdate,
    ) -> Result<Environment, RouterError> {
        let mut updated = None;
        let result = self
            .registry
            .update_service(provider_id, |provider| {
                let environment = provider
                    .environments
                    .iter_mut()
                    .find(|e| e.id == environment_id || e.name == environment_id)
                    .ok_or_else(|| RouterError::EnvironmentNotFound {
                        id: environment_id.to_string(),
                    })?;

                if let Some(name) = update.name {
                    validate_required("name", &name)?;
                    environment.name = name;
                }
                if let Some(base_url) = update.base_url {
                    validate_base_url(&base_url)?;
                    environment.base_url = base_url;
                }
                if let Some(api_key) = update.api_key {
                    environment.api_key = api_key;
                }
                if let Some(health_check) = update.health_check {
                    environment.health_check = health_check;
                }
                if let Some(rate_limits) = update.rate_limits {
                    environment.rate_limits = rate_limits;
                }
                if let Some(priority) = update.priority {
                    environment.priority = priority;
                }
                if let Some(timeout_ms) = update.timeout_ms {
                    environment.timeout_ms = timeout_ms;
                }
                if let Some(retry) = update.retry {
                    environment.retry = retry;
                }
                if let Some(is_active) = update.is_active {
                    environment.is_active = is_active;
                }
                updated = Some(environment.clone());
                Ok(())
            })
            .and_then(|_| {
                updated.ok_or_else(|| RouterError::EnvironmentNotFound {
                    id: environment_id.to_string(),
                })
            });
        self.log_result(
            "update_environment",
            &result,
            json!({ "providerId": provider_id, "environmentId": environment_id }),
        );

        let environment = result?;
        self.persist_after("update_environment").await;
        Ok(environment)
    }

    pub async fn remove_environment(
        &self,
        provider_id: &str,
        environment_id: &str,
    ) -> Result<Environment, RouterError> {
        let mut removed = None;
        let result = self
            .registry
            .update_service(provider_id, |provider| {
                let index = provider
                    .environments
                    .iter()
                    .position(|e| e.id == environment_id || e.name == environment_id)
                    .ok_or_else(|| RouterError::EnvironmentNotFound {
                        id: environment_id.to_string(),
                    })?;
                removed = Some(provider.environments.remove(index));
                Ok(())
            })
            .and_then(|_| {
                removed.ok_or_else(|| RouterError::EnvironmentNotFound {
                    id: environment_id.to_string(),
                })
            });
        self.log_result(
            "remove_environment",
            &result,
            json!({ "providerId": provider_id, "environmentId": environment_id }),
        );

        let environment = result?;
        self.persist_after("remove_environment").await;
        Ok(environment)
    }

    // ---------------------------------------------------------------------
    // API keys
    // ---------------------------------------------------------------------

    /// Issue a key. The returned value is the only copy that carries the secret.
    pub async fn create_api_key(&self, input: ApiKeyInput) -> Result<ApiKey, RouterError> {
        let result = validate_required("name", &input.name)
            .and_then(|_| validate_required("user_id", &input.user_id))
            .map(|_| {
                let key = generate_api_key(&self.key_prefix);
                let now = Utc::now();
                ApiKey {
                    id: Uuid::new_v4().to_string(),
                    name: input.name,
                    key_prefix: display_prefix(&key),
                    key,
                    user_id: input.user_id,
                    allowed_providers: input.allowed_providers,
                    allowed_environments: input.allowed_environments,
                    rate_limits: input.rate_limits.unwrap_or_default(),
                    is_active: true,
                    expires_at: input.expires_at,
                    usage_count: 0,
                    last_used_at: None,
                    created_at: now,
                    updated_at: now,
                }
            });
        self.log_result(
            "create_api_key",
            &result,
            json!({ "keyId": result.as_ref().map(|k| k.id.clone()).ok() }),
        );

        let api_key = result?;
        self.key_index
            .insert(api_key.key.clone(), api_key.id.clone());
        self.api_keys.insert(api_key.id.clone(), api_key.clone());
        self.persist_after("create_api_key").await;
        Ok(api_key)
    }

    /// Keys without their secrets, oldest first
    pub fn list_api_keys(&self, user_id: Option<&str>) -> Vec<ApiKey> {
        let mut keys: Vec<ApiKey> = self
            .api_keys
            .iter()
            .filter(|entry| user_id.map_or(true, |user| entry.user_id == user))
            .map(|entry| entry.redacted())
            .collect();
        keys.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        keys
    }

    pub fn get_api_key(&self, id: &str) -> Result<ApiKey, RouterError> {
        self.api_keys
            .get(id)
            .map(|entry| entry.redacted())
            .ok_or_else(|| RouterError::ApiKeyNotFound { id: id.to_string() })
    }

    pub async fn update_api_key(&self, id: &str, update: ApiKeyUpdate) -> Result<ApiKey, RouterError> {
        let result = self.modify_api_key(id, |key| {
            if let Some(name) = update.name {
                validate_required("name", &name)?;
                key.name = name;
            }
            if let Some(allowed_providers) = update.allowed_providers {
                key.allowed_providers = allowed_providers;
            }
            if let Some(allowed_environments) = update.allowed_environments {
                key.allowed_environments = allowed_environments;
            }
            if let Some(rate_limits) = update.rate_limits {
                key.rate_limits = rate_limits;
            }
            if let Some(is_active) = update.is_active {
                key.is_active = is_active;
            }
            if update.expires_at.is_some() {
                key.expires_at = update.expires_at;
            }
            Ok(())
        });
        self.log_result("update_api_key", &result, json!({ "keyId": id }));

        let key = result?;
        self.persist_after("update_api_key").await;
        Ok(key)
    }

    pub async fn revoke_api_key(&self, id: &str) -> Result<ApiKey, RouterError> {
        let result = self.modify_api_key(id, |key| {
            key.is_active = false;
            Ok(())
        });
        self.log_result("revoke_api_key", &result, json!({ "keyId": id }));

        let key = result?;
        self.persist_after("revoke_api_key").await;
        Ok(key)
    }

    pub async fn delete_api_key(&self, id: &str) -> Result<ApiKey, RouterError> {
        let result = self
            .api_keys
            .remove(id)
            .map(|(_, key)| {
                self.key_index.remove(&key.key);
                key.redacted()
            })
            .ok_or_else(|| RouterError::ApiKeyNotFound { id: id.to_string() });
        self.log_result("delete_api_key", &result, json!({ "keyId": id }));

        let key = result?;
        self.persist_after("delete_api_key").await;
        Ok(key)
    }

    fn modify_api_key<F>(&self, id: &str, modify: F) -> Result<ApiKey, RouterError>
    where
        F: FnOnce(&mut ApiKey) -> Result<(), RouterError>,
    {
        let mut entry = self
            .api_keys
            .get_mut(id)
            .ok_or_else(|| RouterError::ApiKeyNotFound { id: id.to_string() })?;

        let mut draft = entry.value().clone();
        modify(&mut draft)?;
        draft.updated_at = Utc::now();
        *entry = draft;
        Ok(entry.redacted())
    }

    /// Resolve a bearer secret to its key and count the use.
    ///
    /// Only `is_active` is checked; `expires_at` is stored but not enforced.
    pub fn authenticate_key(&self, secret: &str) -> Result<ApiKey, RouterError> {
        let invalid = || RouterError::AuthenticationFailed {
            reason: "Invalid API key".to_string(),
        };
        let key_id = self
            .key_index
            .get(secret)
            .map(|entry| entry.value().clone())
            .ok_or_else(invalid)?;
        let mut entry = self.api_keys.get_mut(&key_id).ok_or_else(invalid)?;
        if entry.key != secret {
            return Err(invalid());
        }

        if !entry.is_active {
            return Err(RouterError::AuthenticationFailed {
                reason: "API key has been revoked".to_string(),
            });
        }

        entry.usage_count += 1;
        entry.last_used_at = Some(Utc::now());
        Ok(entry.clone())
    }

    // ---------------------------------------------------------------------
    // Assignments
    // ---------------------------------------------------------------------

    fn validate_provider_ids(&self, provider_ids: &[String]) -> Result<(), RouterError> {
        if provider_ids.is_empty() {
            return Err(RouterError::validation(
                "provider_ids",
                "At least one provider is required",
            ));
        }
        match provider_ids.iter().find(|id| !self.registry.contains(id)) {
            Some(missing) => Err(RouterError::ProviderNotFound { id: missing.clone() }),
            None => Ok(()),
        }
    }

    pub async fn create_assignment(&self, input: AssignmentInput) -> Result<ApiAssignment, RouterError> {
        let result = validate_required("name", &input.name)
            .and_then(|_| validate_required("user_id", &input.user_id))
            .and_then(|_| self.validate_provider_ids(&input.provider_ids))
            .map(|_| {
                let now = Utc::now();
                ApiAssignment {
                    id: Uuid::new_v4().to_string(),
                    name: input.name,
                    user_id: input.user_id,
                    provider_ids: input.provider_ids,
                    environments: input.environments,
                    load_balancing: input.load_balancing,
                    failover: input.failover,
                    rate_limits: input.rate_limits.unwrap_or_default(),
                    is_active: true,
                    created_at: now,
                    updated_at: now,
                }
            });
        self.log_result(
            "create_assignment",
            &result,
            json!({ "assignmentId": result.as_ref().map(|a| a.id.clone()).ok() }),
        );

        let assignment = result?;
        self.assignments
            .insert(assignment.id.clone(), assignment.clone());
        self.persist_after("create_assignment").await;
        Ok(assignment)
    }

    pub fn get_assignment(&self, id: &str) -> Result<ApiAssignment, RouterError> {
        self.assignments
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| RouterError::AssignmentNotFound { id: id.to_string() })
    }

    pub fn list_assignments(&self, user_id: Option<&str>) -> Vec<ApiAssignment> {
        let mut assignments: Vec<ApiAssignment> = self
            .assignments
            .iter()
            .filter(|entry| user_id.map_or(true, |user| entry.user_id == user))
            .map(|entry| entry.value().clone())
            .collect();
        assignments.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        assignments
    }

    pub async fn update_assignment(
        &self,
        id: &str,
        update: AssignmentUpdate,
    ) -> Result<ApiAssignment, RouterError> {
        let result = self.apply_assignment_update(id, update);
        self.log_result("update_assignment", &result, json!({ "assignmentId": id }));

        let assignment = result?;
        self.persist_after("update_assignment").await;
        Ok(assignment)
    }

    fn apply_assignment_update(
        &self,
        id: &str,
        update: AssignmentUpdate,
    ) -> Result<ApiAssignment, RouterError> {
        if let Some(provider_ids) = &update.provider_ids {
            self.validate_provider_ids(provider_ids)?;
        }
        let mut entry = self
            .assignments
            .get_mut(id)
            .ok_or_else(|| RouterError::AssignmentNotFound { id: id.to_string() })?;
        let mut assignment = entry.value().clone();

        if let Some(name) = update.name {
            validate_required("name", &name)?;
            assignment.name = name;
        }
        if let Some(provider_ids) = update.provider_ids {
            assignment.provider_ids = provider_ids;
        }
        if let Some(environments) = update.environments {
            assignment.environments = environments;
        }
        if let Some(load_balancing) = update.load_balancing {
            assignment.load_balancing = load_balancing;
        }
        if let Some(failover) = update.failover {
            assignment.failover = failover;
        }
        if let Some(rate_limits) = update.rate_limits {
            assignment.rate_limits = rate_limits;
        }
        if let Some(is_active) = update.is_active {
            assignment.is_active = is_active;
        }
        assignment.updated_at = Utc::now();
        *entry = assignment.clone();
        Ok(assignment)
    }

    pub async fn delete_assignment(&self, id: &str) -> Result<ApiAssignment, RouterError> {
        let result = self
            .assignments
            .remove(id)
            .map(|(_, assignment)| assignment)
            .ok_or_else(|| RouterError::AssignmentNotFound { id: id.to_string() });
        self.log_result("delete_assignment", &result, json!({ "assignmentId": id }));

        let assignment = result?;
        self.persist_after("delete_assignment").await;
        Ok(assignment)
    }

    // ---------------------------------------------------------------------
    // Routing
    // ---------------------------------------------------------------------

    /// Route one explicit request.
    ///
    /// Candidates come from the pinned provider, the assignment, the key's
    /// provider allow-list or the provider type, in that order of precedence.
    /// Environments are tried in priority order; later ones are only tried
    /// when the assignment asks for failover. Requests are never retried on
    /// the same environment.
    #[instrument(skip(self, request), fields(request_id))]
    pub async fn route_request(&self, request: ApiRequest) -> Result<ApiResponse, RouterError> {
        let request_id = new_request_id();
        tracing::Span::current().record("request_id", request_id.as_str());

        let result = self.execute_routed(&request, &request_id).await;
        if let Err(e) = &result {
            log_error(
                COMPONENT,
                "route_request",
                e,
                json!({
                    "requestId": request_id,
                    "providerId": request.provider_id,
                    "assignmentId": request.assignment_id,
                    "userId": request.user_id,
                }),
            );
        }
        result
    }

    async fn execute_routed(
        &self,
        request: &ApiRequest,
        request_id: &str,
    ) -> Result<ApiResponse, RouterError> {
        let api_key = match &request.api_key_id {
            Some(id) => Some(
                self.api_keys
                    .get(id)
                    .map(|entry| entry.value().clone())
                    .ok_or_else(|| RouterError::ApiKeyNotFound { id: id.clone() })?,
            ),
            None => None,
        };
        if let Some(key) = &api_key {
            if !key.is_active {
                return Err(RouterError::AuthorizationFailed {
                    reason: "API key has been revoked".to_string(),
                });
            }
        }

        let assignment = match &request.assignment_id {
            Some(id) => {
                let assignment = self.get_assignment(id)?;
                if !assignment.is_active {
                    return Err(RouterError::AuthorizationFailed {
                        reason: format!("Assignment '{}' is inactive", id),
                    });
                }
                if !request.user_id.is_empty() && assignment.user_id != request.user_id {
                    return Err(RouterError::AuthorizationFailed {
                        reason: format!("Assignment '{}' belongs to another user", id),
                    });
                }
                Some(assignment)
            }
            None => None,
        };

        let candidates = self.resolve_candidates(request, assignment.as_ref(), api_key.as_ref())?;

        let strategy = assignment
            .as_ref()
            .map_or(self.default_strategy, |a| a.load_balancing);
        let pool = assignment
            .as_ref()
            .map(|a| a.id.clone())
            .or_else(|| request.provider_type.map(|t| t.to_string()))
            .unwrap_or_else(|| "default".to_string());
        let ctx = SelectionContext {
            pool: &pool,
            registry: &self.registry,
            prompt_tokens: request
                .body
                .as_ref()
                .map_or(0, |body| estimate_tokens(&body.to_string())),
            preferences: None,
        };

        let provider = self
            .load_balancer
            .select_provider(strategy, &candidates, &ctx)
            .ok_or_else(|| RouterError::NoCompatibleServices {
                reason: "No provider selected".to_string(),
            })?
            .clone();

        let preferred: Vec<String> = match (&request.environment, &assignment) {
            (Some(environment), _) => vec![environment.clone()],
            (None, Some(assignment)) => assignment.environments.clone(),
            (None, None) => Vec::new(),
        };
        let environments: Vec<Environment> = self
            .load_balancer
            .environment_order(&provider, &preferred)
            .into_iter()
            .filter(|env| {
                api_key.as_ref().map_or(true, |key| {
                    key.allowed_environments.is_empty()
                        || key
                            .allowed_environments
                            .iter()
                            .any(|allowed| *allowed == env.name || *allowed == env.id)
                })
            })
            .collect();

        if environments.is_empty() {
            return Err(RouterError::NoAvailableEnvironment {
                provider_id: provider.id.clone(),
            });
        }

        let attempts = match assignment.as_ref().map(|a| a.failover) {
            Some(FailoverStrategy::NextEnvironment) => environments.len(),
            _ => 1,
        };
        let endpoint = if request.endpoint.trim().is_empty() {
            provider.generate_endpoint.clone()
        } else {
            request.endpoint.clone()
        };

        let mut last_error = None;
        for environment in environments.iter().take(attempts) {
            match self
                .execute_on(&provider, environment, &endpoint, request, request_id)
                .await
            {
                Ok(response) => return Ok(response),
                Err(e) => {
                    if attempts > 1 {
                        warn!(
                            provider_id = %provider.id,
                            environment = %environment.name,
                            error = %e,
                            "Environment failed, trying next"
                        );
                    }
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or(RouterError::NoAvailableEnvironment {
            provider_id: provider.id,
        }))
    }

    fn resolve_candidates(
        &self,
        request: &ApiRequest,
        assignment: Option<&ApiAssignment>,
        api_key: Option<&ApiKey>,
    ) -> Result<Vec<Provider>, RouterError> {
        let allowed = |id: &str| {
            api_key.map_or(true, |key| {
                key.allowed_providers.is_empty() || key.allowed_providers.iter().any(|p| p == id)
            })
        };

        if let Some(provider_id) = &request.provider_id {
            let provider = self.get_provider(provider_id)?;
            if !allowed(&provider.id) {
                return Err(RouterError::AuthorizationFailed {
                    reason: format!("API key may not use provider '{}'", provider.id),
                });
            }
            if !provider.status.is_active {
                return Err(RouterError::NoCompatibleServices {
                    reason: format!("Provider '{}' is inactive", provider.id),
                });
            }
            return Ok(vec![provider]);
        }

        let candidates: Vec<Provider> = if let Some(assignment) = assignment {
            assignment
                .provider_ids
                .iter()
                .filter_map(|id| self.registry.get_service(id))
                .collect()
        } else if let Some(key) = api_key.filter(|k| !k.allowed_providers.is_empty()) {
            key.allowed_providers
                .iter()
                .filter_map(|id| self.registry.get_service(id))
                .filter(|p| request.provider_type.map_or(true, |t| p.provider_type == t))
                .collect()
        } else if let Some(provider_type) = request.provider_type {
            self.registry.get_services_by_type(provider_type)
        } else {
            return Err(RouterError::validation(
                "provider_id",
                "One of provider_id, assignment_id or provider_type is required",
            ));
        };

        let candidates: Vec<Provider> = candidates
            .into_iter()
            .filter(|p| p.status.is_active && allowed(&p.id))
            .collect();

        if candidates.is_empty() {
            return Err(RouterError::NoCompatibleServices {
                reason: "No active provider matches the request".to_string(),
            });
        }
        Ok(candidates)
    }

    async fn execute_on(
        &self,
        provider: &Provider,
        environment: &Environment,
        endpoint: &str,
        request: &ApiRequest,
        request_id: &str,
    ) -> Result<ApiResponse, RouterError> {
        let started = Instant::now();
        let result = self
            .client
            .execute(
                environment,
                &request.method,
                endpoint,
                &request.headers,
                request.body.as_ref(),
            )
            .await;
        let response_time_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(response) => {
                let tokens_used = response.reported_tokens.unwrap_or_else(|| {
                    request
                        .body
                        .as_ref()
                        .map_or(0, |body| estimate_tokens(&body.to_string()))
                });
                let cost = estimate_cost(provider, tokens_used);

                self.usage.update_usage_stats(
                    &provider.id,
                    &environment.id,
                    &request.user_id,
                    true,
                    response_time_ms,
                    tokens_used,
                    cost,
                );
                self.update_provider_status(&provider.id, true, response_time_ms, tokens_used, cost, None);
                metrics::counter!("ai_router_requests_total", "provider" => provider.id.clone(), "outcome" => "success")
                    .increment(1);
                metrics::histogram!("ai_router_request_duration_ms", "provider" => provider.id.clone())
                    .record(response_time_ms as f64);

                Ok(ApiResponse {
                    success: true,
                    status_code: response.status_code,
                    data: Some(response.body),
                    error: None,
                    response_time_ms,
                    provider_id: provider.id.clone(),
                    environment_id: environment.id.clone(),
                    tokens_used,
                    cost,
                    request_id: request_id.to_string(),
                    timestamp: Utc::now(),
                })
            }
            Err(e) => {
                self.usage.update_usage_stats(
                    &provider.id,
                    &environment.id,
                    &request.user_id,
                    false,
                    response_time_ms,
                    0,
                    0.0,
                );
                self.update_provider_status(&provider.id, false, response_time_ms, 0, 0.0, Some(&e));
                metrics::counter!("ai_router_requests_total", "provider" => provider.id.clone(), "outcome" => "error")
                    .increment(1);
                Err(e)
            }
        }
    }

    fn update_provider_status(
        &self,
        provider_id: &str,
        success: bool,
        response_time_ms: u64,
        tokens: u64,
        cost: f64,
        error: Option<&RouterError>,
    ) {
        let result = match error {
            Some(e) if !success => self.health.record_failure(provider_id, response_time_ms, e),
            _ => self
                .registry
                .record_request(provider_id, success, response_time_ms, tokens, cost),
        };
        if let Err(e) = result {
            // Provider deleted while the request was in flight
            log_error(
                COMPONENT,
                "update_provider_status",
                &e,
                json!({ "providerId": provider_id }),
            );
        }
    }

    /// Generate a blog post through the blog writer provider
    pub async fn generate_blog(
        &self,
        request: BlogGenerationRequest,
        user_id: &str,
        api_key_id: Option<String>,
    ) -> Result<ApiResponse, RouterError> {
        validate_required("topic", &request.topic)?;

        let (provider_id, provider_type) = if self.registry.contains(BLOG_WRITER_PROVIDER_ID) {
            (Some(BLOG_WRITER_PROVIDER_ID.to_string()), None)
        } else {
            (None, Some(ServiceType::BlogWriter))
        };

        let body = serde_json::to_value(&request).map_err(|e| RouterError::InternalError {
            message: format!("Failed to encode blog request: {}", e),
        })?;

        self.route_request(ApiRequest {
            provider_id,
            provider_type,
            environment: request.environment.clone(),
            api_key_id,
            method: "POST".to_string(),
            body: Some(body),
            user_id: user_id.to_string(),
            ..Default::default()
        })
        .await
    }

    // ---------------------------------------------------------------------
    // Usage
    // ---------------------------------------------------------------------

    pub fn get_usage(&self, filter: &UsageFilter) -> Vec<ApiUsage> {
        self.usage.get_usage(filter)
    }

    pub fn usage_summary(&self, filter: &UsageFilter) -> UsageSummary {
        self.usage.usage_summary(filter)
    }
}
