//! Outbound HTTP client for provider environments
//!
//! Sends bearer-authenticated JSON requests to a provider environment,
//! enforcing the environment's timeout. Requests are not retried.

use reqwest::Client;
use serde_json::Value;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::time::timeout;
use tracing::debug;

use crate::models::{Environment, RouterError};

/// Raw provider response
#[derive(Debug, Clone)]
pub struct ProviderResponse {
    pub status_code: u16,
    pub body: Value,
    pub response_time_ms: u64,
    /// Token count reported by the provider, if any
    pub reported_tokens: Option<u64>,
}

/// HTTP client shared by every routing path
#[derive(Debug, Clone)]
pub struct ProviderClient {
    http_client: Client,
}

impl ProviderClient {
    pub fn new() -> Result<Self, RouterError> {
        let http_client = Client::builder()
            .user_agent(concat!("ai-router/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| RouterError::InternalError {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self { http_client })
    }

    /// Send one request to `environment`
    pub async fn execute(
        &self,
        environment: &Environment,
        method: &str,
        endpoint: &str,
        headers: &HashMap<String, String>,
        body: Option<&Value>,
    ) -> Result<ProviderResponse, RouterError> {
        let url = environment.url_for(endpoint);
        let mut request_builder = match method.to_uppercase().as_str() {
            "GET" => self.http_client.get(&url),
            "POST" => self.http_client.post(&url),
            "PUT" => self.http_client.put(&url),
            "PATCH" => self.http_client.patch(&url),
            "DELETE" => self.http_client.delete(&url),
            _ => {
                return Err(RouterError::validation(
                    "method",
                    format!("Unsupported HTTP method: {}", method),
                ))
            }
        };

        // The environment's own key replaces any caller-supplied Authorization
        let has_key = !environment.api_key.is_empty();
        for (key, value) in headers {
            if has_key && key.eq_ignore_ascii_case("authorization") {
                continue;
            }
            request_builder = request_builder.header(key, value);
        }
        if has_key {
            request_builder = request_builder.bearer_auth(&environment.api_key);
        }
        if let Some(body) = body {
            request_builder = request_builder.json(body);
        }

        let started = Instant::now();
        let response = timeout(
            Duration::from_millis(environment.timeout_ms),
            request_builder.send(),
        )
        .await
        .map_err(|_| RouterError::Timeout {
            timeout_ms: environment.timeout_ms,
        })?
        .map_err(|e| RouterError::UpstreamError {
            status: 0,
            message: e.to_string(),
        })?;

        let status_code = response.status().as_u16();
        let text = response.text().await.map_err(|e| RouterError::UpstreamError {
            status: status_code,
            message: e.to_string(),
        })?;
        let response_time_ms = started.elapsed().as_millis() as u64;

        let body: Value = if text.is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };

        debug!(
            url = %url,
            status = status_code,
            response_time_ms,
            "Provider request completed"
        );

        if !(200..300).contains(&status_code) {
            return Err(RouterError::UpstreamError {
                status: status_code,
                message: error_message(&body).unwrap_or_else(|| format!("HTTP {}", status_code)),
            });
        }

        Ok(ProviderResponse {
            status_code,
            reported_tokens: reported_tokens(&body),
            body,
            response_time_ms,
        })
    }
}

fn error_message(body: &Value) -> Option<String> {
    match body {
        Value::String(text) if !text.is_empty() => Some(text.clone()),
        Value::Object(map) => ["error", "message", "detail"]
            .iter()
            .find_map(|key| match map.get(*key) {
                Some(Value::String(s)) => Some(s.clone()),
                Some(Value::Object(inner)) => inner
                    .get("message")
                    .and_then(Value::as_str)
                    .map(str::to_string),
                _ => None,
            }),
        _ => None,
    }
}

fn reported_tokens(body: &Value) -> Option<u64> {
    body.pointer("/usage/total_tokens")
        .or_else(|| body.pointer("/usage/totalTokens"))
        .or_else(|| body.get("tokens_used"))
        .or_else(|| body.get("tokensUsed"))
        .and_then(Value::as_u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_execute_sends_bearer_and_json() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/v1/generate"))
            .and(header("authorization", "Bearer secret"))
            .and(body_json(json!({ "topic": "coffee" })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "content": "# Coffee", "usage": { "total_tokens": 42 } })),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = ProviderClient::new().unwrap();
        let env = Environment::new("production", server.uri(), "secret");
        let response = client
            .execute(
                &env,
                "POST",
                "/api/v1/generate",
                &HashMap::new(),
                Some(&json!({ "topic": "coffee" })),
            )
            .await
            .unwrap();

        assert_eq!(response.status_code, 200);
        assert_eq!(response.body["content"], "# Coffee");
        assert_eq!(response.reported_tokens, Some(42));
    }

    #[tokio::test]
    async fn test_environment_key_replaces_caller_authorization() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("authorization", "Bearer secret"))
            .and(header("x-trace-id", "t-1"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = ProviderClient::new().unwrap();
        let env = Environment::new("production", server.uri(), "secret");
        let headers = HashMap::from([
            ("Authorization".to_string(), "Bearer caller-token".to_string()),
            ("x-trace-id".to_string(), "t-1".to_string()),
        ]);

        let response = client
            .execute(&env, "POST", "/generate", &headers, None)
            .await
            .unwrap();
        assert_eq!(response.status_code, 200);
    }

    #[tokio::test]
    async fn test_caller_authorization_kept_without_environment_key() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(header("authorization", "Bearer caller-token"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let client = ProviderClient::new().unwrap();
        let env = Environment::new("production", server.uri(), "");
        let headers = HashMap::from([(
            "authorization".to_string(),
            "Bearer caller-token".to_string(),
        )]);

        let response = client
            .execute(&env, "POST", "/generate", &headers, None)
            .await
            .unwrap();
        assert_eq!(response.status_code, 200);
    }

    #[tokio::test]
    async fn test_non_success_is_upstream_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502).set_body_json(json!({ "error": "model overloaded" })))
            .mount(&server)
            .await;

        let client = ProviderClient::new().unwrap();
        let env = Environment::new("production", server.uri(), "");
        let error = client
            .execute(&env, "POST", "/generate", &HashMap::new(), None)
            .await
            .unwrap_err();

        match error {
            RouterError::UpstreamError { status, message } => {
                assert_eq!(status, 502);
                assert_eq!(message, "model overloaded");
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_environment_timeout_enforced() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let client = ProviderClient::new().unwrap();
        let mut env = Environment::new("production", server.uri(), "");
        env.timeout_ms = 50;

        let error = client
            .execute(&env, "POST", "/generate", &HashMap::new(), None)
            .await
            .unwrap_err();
        assert!(matches!(error, RouterError::Timeout { timeout_ms: 50 }));
    }

    #[tokio::test]
    async fn test_unsupported_method() {
        let client = ProviderClient::new().unwrap();
        let env = Environment::new("production", "http://localhost:1", "");
        let error = client
            .execute(&env, "TRACE", "/", &HashMap::new(), None)
            .await
            .unwrap_err();
        assert_eq!(error.status_code(), 400);
    }
}
