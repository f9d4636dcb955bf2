//! Intelligent request routing
//!
//! Classifies a free-form request, filters the healthy providers that can
//! serve it, picks the best one by score, calls a randomly chosen endpoint of
//! that provider and wraps the result in a [`UnifiedResponse`]. Failures are
//! always returned as a failure envelope, never as an `Err`.

use chrono::Utc;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Instant;
use tracing::{info, instrument};

use crate::client::ProviderClient;
use crate::config::ScoringWeights;
use crate::intent::{classify, Classification, Intent};
use crate::load_balancer::LoadBalancer;
use crate::models::{
    new_request_id, Provider, RequestConstraints, ResponseMetadata, RouterError, RoutingErrorCode,
    ServiceType, UnifiedRequest, UnifiedResponse,
};
use crate::registry::ServiceRegistry;
use crate::scoring::{estimate_cost, estimate_tokens, ProviderScorer, ScoreBreakdown};
use crate::telemetry::{log_error, log_event};

/// Routes unified requests to the best available provider
#[derive(Debug, Clone)]
pub struct IntelligentRouter {
    registry: ServiceRegistry,
    load_balancer: LoadBalancer,
    scorer: ProviderScorer,
    client: ProviderClient,
}

impl IntelligentRouter {
    pub fn new(
        registry: ServiceRegistry,
        load_balancer: LoadBalancer,
        client: ProviderClient,
        weights: ScoringWeights,
    ) -> Self {
        Self {
            registry,
            load_balancer,
            scorer: ProviderScorer::new(weights),
            client,
        }
    }

    /// Intent of a request; an explicit service type overrides the keywords
    pub fn classify_request(&self, request: &UnifiedRequest) -> (Classification, ServiceType) {
        match request.service_type {
            Some(service_type) => (
                Classification {
                    intent: Intent::from_service_type(service_type),
                    confidence: 1.0,
                },
                service_type,
            ),
            None => {
                let classification = classify(&request.prompt);
                (classification, classification.intent.service_type())
            }
        }
    }

    /// Healthy providers of `service_type` that satisfy the constraints
    pub fn filter_candidates(
        &self,
        service_type: ServiceType,
        constraints: Option<&RequestConstraints>,
    ) -> Vec<Provider> {
        let candidates = self.registry.get_healthy_services(Some(service_type));
        let Some(constraints) = constraints else {
            return candidates;
        };

        candidates
            .into_iter()
            .filter(|provider| {
                constraints
                    .max_tokens
                    .map_or(true, |max_tokens| provider.limits.max_tokens >= max_tokens)
            })
            .filter(|provider| {
                constraints.required_features.iter().all(|feature| {
                    provider
                        .capabilities
                        .special_features
                        .iter()
                        .any(|f| f == feature)
                })
            })
            .filter(|provider| !constraints.excluded_services.contains(&provider.id))
            .collect()
    }

    /// Pick one candidate; a single candidate is returned without scoring
    pub fn select_service<'a>(
        &self,
        candidates: &'a [Provider],
        request: &UnifiedRequest,
    ) -> Option<(&'a Provider, Option<ScoreBreakdown>)> {
        match candidates {
            [] => None,
            [only] => Some((only, None)),
            _ => self
                .scorer
                .best(
                    candidates,
                    |id| self.registry.get_metrics(id),
                    estimate_tokens(&request.prompt),
                    request.preferences.as_ref(),
                )
                .map(|(provider, breakdown)| (provider, Some(breakdown))),
        }
    }

    #[instrument(skip(self, request), fields(request_id))]
    pub async fn route_request(&self, request: UnifiedRequest) -> UnifiedResponse {
        let request_id = new_request_id();
        tracing::Span::current().record("request_id", request_id.as_str());
        let started = Instant::now();

        match self.try_route(&request, &request_id, started).await {
            Ok(response) => response,
            Err(RouterError::NoCompatibleServices { reason }) => {
                log_event(
                    "intelligent_router",
                    "no_compatible_services",
                    json!({ "requestId": request_id, "reason": reason }),
                );
                metrics::counter!("ai_router_requests_total", "provider" => "none", "outcome" => "no_compatible_services")
                    .increment(1);
                UnifiedResponse::failure(RoutingErrorCode::NoCompatibleServices, reason)
            }
            Err(e) => {
                log_error(
                    "intelligent_router",
                    "route_request",
                    &e,
                    json!({ "requestId": request_id }),
                );
                UnifiedResponse::failure(RoutingErrorCode::RoutingError, e.to_string())
            }
        }
    }

    async fn try_route(
        &self,
        request: &UnifiedRequest,
        request_id: &str,
        started: Instant,
    ) -> Result<UnifiedResponse, RouterError> {
        if request.prompt.trim().is_empty() {
            return Err(RouterError::validation("prompt", "Prompt is required"));
        }

        let (classification, service_type) = self.classify_request(request);
        let candidates = self.filter_candidates(service_type, request.constraints.as_ref());

        let (provider, _breakdown) = self.select_service(&candidates, request).ok_or_else(|| {
            RouterError::NoCompatibleServices {
                reason: format!(
                    "No compatible services available for intent '{}'",
                    classification.intent
                ),
            }
        })?;

        let environment = self.load_balancer.select_endpoint(provider).ok_or_else(|| {
            RouterError::NoAvailableEnvironment {
                provider_id: provider.id.clone(),
            }
        })?;

        info!(
            provider_id = %provider.id,
            environment = %environment.name,
            intent = %classification.intent,
            confidence = classification.confidence,
            "Routing request"
        );

        let body = build_body(request);
        let result = self
            .client
            .execute(
                &environment,
                "POST",
                &provider.generate_endpoint,
                &HashMap::new(),
                Some(&body),
            )
            .await;

        let elapsed_ms = started.elapsed().as_millis() as u64;

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                if let Err(record_error) =
                    self.registry
                        .record_request(&provider.id, false, elapsed_ms, 0, 0.0)
                {
                    log_error(
                        "intelligent_router",
                        "record_failure",
                        &record_error,
                        json!({ "providerId": provider.id }),
                    );
                }
                metrics::counter!("ai_router_requests_total", "provider" => provider.id.clone(), "outcome" => "error")
                    .increment(1);
                return Err(e);
            }
        };

        let tokens_used = response
            .reported_tokens
            .unwrap_or_else(|| estimate_tokens(&request.prompt));
        let cost = estimate_cost(provider, tokens_used);

        self.registry
            .record_request(&provider.id, true, elapsed_ms, tokens_used, cost)?;
        metrics::counter!("ai_router_requests_total", "provider" => provider.id.clone(), "outcome" => "success")
            .increment(1);
        metrics::histogram!("ai_router_request_duration_ms", "provider" => provider.id.clone())
            .record(elapsed_ms as f64);

        Ok(UnifiedResponse {
            success: true,
            data: Some(response.body),
            error: None,
            metadata: Some(ResponseMetadata {
                service_id: provider.id.clone(),
                service_name: provider.name.clone(),
                model: provider.capabilities.model.clone(),
                environment_id: environment.id.clone(),
                intent: classification.intent.to_string(),
                confidence: classification.confidence,
                response_time_ms: elapsed_ms,
                tokens_used,
                cost,
                quality_score: provider.capabilities.quality_scores.overall,
                request_id: request_id.to_string(),
                timestamp: Utc::now(),
            }),
        })
    }
}

/// Provider payload: the caller's parameters plus the prompt
fn build_body(request: &UnifiedRequest) -> Value {
    let mut body = match &request.parameters {
        Some(Value::Object(map)) => Value::Object(map.clone()),
        _ => json!({}),
    };

    if let Value::Object(map) = &mut body {
        map.insert("prompt".to_string(), Value::String(request.prompt.clone()));
        if let Some(user_id) = &request.user_id {
            map.insert("userId".to_string(), Value::String(user_id.clone()));
        }
    }

    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Environment, HealthStatus, RequestPreferences, ServiceMetricsUpdate};
    use crate::registry::tests::{healthy, test_provider};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn router(registry: &ServiceRegistry) -> IntelligentRouter {
        IntelligentRouter::new(
            registry.clone(),
            LoadBalancer::default(),
            ProviderClient::new().unwrap(),
            ScoringWeights::default(),
        )
    }

    fn register_healthy(registry: &ServiceRegistry, provider: Provider) {
        let id = provider.id.clone();
        registry.register(provider).unwrap();
        registry
            .update_health_status(&id, healthy(HealthStatus::Healthy))
            .unwrap();
    }

    fn request(prompt: &str) -> UnifiedRequest {
        UnifiedRequest {
            prompt: prompt.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_single_blog_provider_selected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/generate"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "content": "coffee!" })))
            .mount(&server)
            .await;

        let registry = ServiceRegistry::new();
        let mut blog = test_provider("blog", ServiceType::BlogWriter);
        blog.environments = vec![Environment::new("production", server.uri(), "key")];
        register_healthy(&registry, blog);
        register_healthy(&registry, test_provider("seo", ServiceType::SeoOptimizer));

        let router = router(&registry);
        let response = router.route_request(request("Write a blog about coffee")).await;

        assert!(response.success, "{:?}", response.error);
        let metadata = response.metadata.unwrap();
        assert_eq!(metadata.service_id, "blog");
        assert_eq!(metadata.intent, "blog-writing");
        assert_eq!(metadata.confidence, 0.8);
        assert!(metadata.request_id.starts_with("req_"));
        assert_eq!(metadata.tokens_used, 7);
        assert_eq!(response.data.unwrap()["content"], "coffee!");
        assert_eq!(registry.get_metrics("blog").unwrap().successful_requests, 1);
    }

    #[test]
    fn test_lower_latency_provider_selected() {
        let registry = ServiceRegistry::new();
        register_healthy(&registry, test_provider("slow", ServiceType::BlogWriter));
        register_healthy(&registry, test_provider("fast", ServiceType::BlogWriter));
        for (id, latency) in [("slow", 1200.0), ("fast", 600.0)] {
            registry
                .update_metrics(
                    id,
                    ServiceMetricsUpdate {
                        average_response_time: Some(latency),
                        availability: Some(1.0),
                        ..Default::default()
                    },
                )
                .unwrap();
        }

        let router = router(&registry);
        let req = request("Write a blog about coffee");
        let candidates = router.filter_candidates(ServiceType::BlogWriter, None);
        let (selected, breakdown) = router.select_service(&candidates, &req).unwrap();

        assert_eq!(selected.id, "fast");
        assert!(breakdown.is_some());
    }

    #[test]
    fn test_single_candidate_skips_scoring() {
        let registry = ServiceRegistry::new();
        register_healthy(&registry, test_provider("only", ServiceType::BlogWriter));

        let router = router(&registry);
        let candidates = router.filter_candidates(ServiceType::BlogWriter, None);
        let (selected, breakdown) = router
            .select_service(&candidates, &request("blog"))
            .unwrap();
        assert_eq!(selected.id, "only");
        assert!(breakdown.is_none());
    }

    #[tokio::test]
    async fn test_max_tokens_above_every_limit() {
        let registry = ServiceRegistry::new();
        register_healthy(&registry, test_provider("a", ServiceType::BlogWriter));
        register_healthy(&registry, test_provider("b", ServiceType::BlogWriter));

        let router = router(&registry);
        let mut req = request("Write a blog about coffee");
        req.constraints = Some(RequestConstraints {
            max_tokens: Some(4001),
            ..Default::default()
        });

        let response = router.route_request(req).await;
        assert!(!response.success);
        assert_eq!(
            response.error.unwrap().code,
            RoutingErrorCode::NoCompatibleServices
        );
    }

    #[test]
    fn test_feature_and_exclusion_filters() {
        let registry = ServiceRegistry::new();
        let mut featured = test_provider("featured", ServiceType::BlogWriter);
        featured.capabilities.special_features = vec!["seo-optimization".to_string()];
        register_healthy(&registry, featured);
        register_healthy(&registry, test_provider("plain", ServiceType::BlogWriter));

        let router = router(&registry);
        let constraints = RequestConstraints {
            max_tokens: Some(4000),
            required_features: vec!["seo-optimization".to_string()],
            excluded_services: vec![],
        };
        let ids: Vec<String> = router
            .filter_candidates(ServiceType::BlogWriter, Some(&constraints))
            .into_iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(ids, vec!["featured".to_string()]);

        let constraints = RequestConstraints {
            excluded_services: vec!["featured".to_string()],
            ..Default::default()
        };
        let ids: Vec<String> = router
            .filter_candidates(ServiceType::BlogWriter, Some(&constraints))
            .into_iter()
            .map(|p| p.id)
            .collect();
        assert_eq!(ids, vec!["plain".to_string()]);
    }

    #[test]
    fn test_preferred_service_wins() {
        let registry = ServiceRegistry::new();
        register_healthy(&registry, test_provider("a", ServiceType::BlogWriter));
        register_healthy(&registry, test_provider("b", ServiceType::BlogWriter));

        let router = router(&registry);
        let mut req = request("blog");
        req.preferences = Some(RequestPreferences {
            preferred_service: Some("b".to_string()),
            priority: None,
        });
        let candidates = router.filter_candidates(ServiceType::BlogWriter, None);
        let (selected, _) = router.select_service(&candidates, &req).unwrap();
        assert_eq!(selected.id, "b");
    }

    #[tokio::test]
    async fn test_upstream_failure_is_routing_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let registry = ServiceRegistry::new();
        let mut blog = test_provider("blog", ServiceType::BlogWriter);
        blog.environments = vec![Environment::new("production", server.uri(), "")];
        register_healthy(&registry, blog);

        let response = router(&registry)
            .route_request(request("Write a blog about coffee"))
            .await;

        assert!(!response.success);
        assert_eq!(response.error.unwrap().code, RoutingErrorCode::RoutingError);
        assert_eq!(registry.get_metrics("blog").unwrap().failed_requests, 1);
    }

    #[test]
    fn test_explicit_service_type_overrides_keywords() {
        let registry = ServiceRegistry::new();
        let router = router(&registry);
        let mut req = request("Write a blog about coffee");
        req.service_type = Some(ServiceType::SeoOptimizer);

        let (classification, service_type) = router.classify_request(&req);
        assert_eq!(service_type, ServiceType::SeoOptimizer);
        assert_eq!(classification.intent, Intent::SeoOptimization);
    }

    #[test]
    fn test_body_merges_parameters() {
        let mut req = request("hello");
        req.parameters = Some(json!({ "tone": "casual" }));
        req.user_id = Some("u1".to_string());

        let body = build_body(&req);
        assert_eq!(body, json!({ "tone": "casual", "prompt": "hello", "userId": "u1" }));
    }
}
