//! Fixed-window rate limiting
//!
//! Every limiter keeps a `{count, reset_time}` window per client key in a
//! `DashMap`. The window is mutated under its entry lock, so concurrent
//! requests from the same client never lose an increment.

use axum::http::HeaderMap;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::{RateLimitProfileConfig, RateLimitingConfig};
use crate::models::RouterError;
use crate::telemetry::log_error;

const USER_AGENT_KEY_LENGTH: usize = 50;

/// Limiter settings
#[derive(Debug, Clone)]
pub struct RateLimitProfile {
    pub name: String,
    pub window: Duration,
    pub max_requests: u32,
    pub message: String,
}

impl RateLimitProfile {
    pub fn new(name: &str, window: Duration, max_requests: u32, message: &str) -> Self {
        Self {
            name: name.to_string(),
            window,
            max_requests,
            message: message.to_string(),
        }
    }

    fn from_config(name: &str, config: &RateLimitProfileConfig) -> Self {
        Self::new(
            name,
            Duration::seconds(config.window_secs as i64),
            config.max_requests,
            &config.message,
        )
    }
}

/// Counter for one client key
#[derive(Debug, Clone, Copy)]
struct WindowEntry {
    count: u32,
    reset_time: DateTime<Utc>,
}

/// Outcome of a rate limit check
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitResult {
    pub allowed: bool,
    pub remaining: u32,
    pub reset_time: DateTime<Utc>,
    pub total_hits: u32,
    pub limit: u32,
}

impl RateLimitResult {
    /// Seconds until the window resets, rounded up
    pub fn retry_after_secs(&self, now: DateTime<Utc>) -> i64 {
        let millis = (self.reset_time - now).num_milliseconds().max(0);
        (millis + 999) / 1000
    }
}

/// Fixed-window rate limiter
#[derive(Debug, Clone)]
pub struct RateLimiter {
    profile: RateLimitProfile,
    entries: Arc<DashMap<String, WindowEntry>>,
}

impl RateLimiter {
    pub fn new(profile: RateLimitProfile) -> Self {
        Self {
            profile,
            entries: Arc::new(DashMap::new()),
        }
    }

    pub fn profile(&self) -> &RateLimitProfile {
        &self.profile
    }

    /// Count a request for `key` against the current window
    pub fn check(&self, key: &str) -> RateLimitResult {
        self.check_at(key, Utc::now())
    }

    /// Count a request for `key` as if it arrived at `now`
    pub fn check_at(&self, key: &str, now: DateTime<Utc>) -> RateLimitResult {
        let window = self.profile.window;
        let entry = {
            let mut slot = self
                .entries
                .entry(key.to_string())
                .or_insert(WindowEntry {
                    count: 0,
                    reset_time: now + window,
                });

            if now >= slot.reset_time {
                slot.count = 1;
                slot.reset_time = now + window;
            } else {
                slot.count = slot.count.saturating_add(1);
            }

            *slot
        };

        let result = RateLimitResult {
            allowed: entry.count <= self.profile.max_requests,
            remaining: self.profile.max_requests.saturating_sub(entry.count),
            reset_time: entry.reset_time,
            total_hits: entry.count,
            limit: self.profile.max_requests,
        };

        if !result.allowed {
            log_error(
                "rate_limiter",
                "limit_exceeded",
                &self.profile.message,
                serde_json::json!({
                    "limiter": self.profile.name,
                    "key": key,
                    "totalHits": result.total_hits,
                    "limit": result.limit,
                    "resetTime": result.reset_time,
                }),
            );
            metrics::counter!("ai_router_rate_limit_rejections_total", "limiter" => self.profile.name.clone())
                .increment(1);
        }

        result
    }

    /// Check the request described by `headers`, allowing it when no client key can be derived
    pub fn check_request(&self, headers: &HeaderMap) -> RateLimitResult {
        match client_key(headers) {
            Ok(key) => self.check(&key),
            Err(e) => {
                log_error(
                    "rate_limiter",
                    "check_request",
                    &e,
                    serde_json::json!({ "limiter": self.profile.name, "failOpen": true }),
                );
                RateLimitResult {
                    allowed: true,
                    remaining: self.profile.max_requests,
                    reset_time: Utc::now() + self.profile.window,
                    total_hits: 0,
                    limit: self.profile.max_requests,
                }
            }
        }
    }

    /// Drop windows that have already expired
    pub fn sweep_expired(&self) -> usize {
        self.sweep_expired_at(Utc::now())
    }

    pub fn sweep_expired_at(&self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.reset_time > now);
        before.saturating_sub(self.entries.len())
    }

    /// Number of tracked client keys
    pub fn tracked_keys(&self) -> usize {
        self.entries.len()
    }
}

/// Derive the client key from forwarding headers and the user agent
pub fn client_key(headers: &HeaderMap) -> Result<String, RouterError> {
    let header = |name: &str| -> Result<Option<String>, RouterError> {
        match headers.get(name) {
            Some(value) => value
                .to_str()
                .map(|v| Some(v.to_string()))
                .map_err(|e| RouterError::validation(name, e.to_string())),
            None => Ok(None),
        }
    };

    let forwarded = header("x-forwarded-for")?
        .and_then(|v| v.split(',').next().map(|hop| hop.trim().to_string()))
        .filter(|hop| !hop.is_empty());

    let ip = match forwarded {
        Some(ip) => ip,
        None => header("x-real-ip")?
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| "unknown".to_string()),
    };

    let user_agent: String = header("user-agent")?
        .unwrap_or_default()
        .chars()
        .take(USER_AGENT_KEY_LENGTH)
        .collect();

    Ok(format!("{}:{}", ip, user_agent))
}

/// The limiter profiles used by the HTTP surface
#[derive(Debug, Clone)]
pub struct RateLimiters {
    pub enabled: bool,
    pub api: RateLimiter,
    pub blog_generation: RateLimiter,
    pub admin: RateLimiter,
    pub health: RateLimiter,
    pub auth: RateLimiter,
    sweep_interval: std::time::Duration,
}

impl RateLimiters {
    pub fn from_config(config: &RateLimitingConfig) -> Self {
        Self {
            enabled: config.enabled,
            api: RateLimiter::new(RateLimitProfile::from_config("api", &config.api)),
            blog_generation: RateLimiter::new(RateLimitProfile::from_config(
                "blog_generation",
                &config.blog_generation,
            )),
            admin: RateLimiter::new(RateLimitProfile::from_config("admin", &config.admin)),
            health: RateLimiter::new(RateLimitProfile::from_config("health", &config.health)),
            auth: RateLimiter::new(RateLimitProfile::from_config("auth", &config.auth)),
            sweep_interval: std::time::Duration::from_secs(config.sweep_interval_secs.max(1)),
        }
    }

    fn all(&self) -> [&RateLimiter; 5] {
        [
            &self.api,
            &self.blog_generation,
            &self.admin,
            &self.health,
            &self.auth,
        ]
    }

    /// Sweep every limiter once
    pub fn sweep_expired(&self) -> usize {
        self.all().iter().map(|limiter| limiter.sweep_expired()).sum()
    }

    /// Spawn the periodic sweep task
    pub fn start_sweeper(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        let limiters = self.clone();
        let interval = self.sweep_interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        info!("Rate limit sweeper stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        let removed = limiters.sweep_expired();
                        if removed > 0 {
                            debug!(removed, "Swept expired rate limit windows");
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use axum::http::HeaderValue;

    fn api_limiter() -> RateLimiter {
        RateLimiter::new(RateLimitProfile::new(
            "api",
            Duration::minutes(15),
            60,
            "Too many API requests",
        ))
    }

    #[test]
    fn test_sixty_first_request_rejected() {
        let limiter = api_limiter();
        let start = Utc::now();

        for i in 0..60 {
            let result = limiter.check_at("1.2.3.4:agent", start + Duration::seconds(i));
            assert!(result.allowed, "request {} should be allowed", i + 1);
        }

        let result = limiter.check_at("1.2.3.4:agent", start + Duration::minutes(10));
        assert!(!result.allowed);
        assert_eq!(result.remaining, 0);
        assert_eq!(result.total_hits, 61);
    }

    #[test]
    fn test_window_reset_starts_at_one() {
        let limiter = api_limiter();
        let start = Utc::now();

        let first = limiter.check_at("client", start);
        assert_eq!(first.total_hits, 1);
        assert_eq!(first.remaining, 59);

        for _ in 0..70 {
            limiter.check_at("client", start + Duration::seconds(1));
        }

        let after_reset = limiter.check_at("client", first.reset_time);
        assert!(after_reset.allowed);
        assert_eq!(after_reset.total_hits, 1);
        assert_eq!(after_reset.reset_time, first.reset_time + Duration::minutes(15));
    }

    #[test]
    fn test_keys_are_independent() {
        let limiter = RateLimiter::new(RateLimitProfile::new("auth", Duration::minutes(15), 1, "no"));
        assert!(limiter.check("a").allowed);
        assert!(!limiter.check("a").allowed);
        assert!(limiter.check("b").allowed);
    }

    #[test]
    fn test_client_key_prefers_first_forwarded_hop() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("10.0.0.1, 10.0.0.2"));
        headers.insert("x-real-ip", HeaderValue::from_static("192.168.1.1"));
        headers.insert(
            "user-agent",
            HeaderValue::from_static(
                "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko)",
            ),
        );

        let key = client_key(&headers).unwrap();
        assert_eq!(key, "10.0.0.1:Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.3");
    }

    #[test]
    fn test_client_key_fallbacks() {
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_static("192.168.1.1"));
        assert_eq!(client_key(&headers).unwrap(), "192.168.1.1:");

        assert_eq!(client_key(&HeaderMap::new()).unwrap(), "unknown:");
    }

    #[test]
    fn test_check_request_fails_open() {
        let limiter = RateLimiter::new(RateLimitProfile::new("auth", Duration::minutes(15), 1, "no"));
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", HeaderValue::from_bytes(b"\xff\xfe").unwrap());

        for _ in 0..3 {
            assert!(limiter.check_request(&headers).allowed);
        }
        assert_eq!(limiter.tracked_keys(), 0);
    }

    #[test]
    fn test_sweep_removes_expired_windows() {
        let limiter = api_limiter();
        let start = Utc::now();
        limiter.check_at("old", start - Duration::minutes(30));
        limiter.check_at("fresh", start);

        assert_eq!(limiter.sweep_expired_at(start), 1);
        assert_eq!(limiter.tracked_keys(), 1);
    }

    #[tokio::test]
    async fn test_sweeper_stops_on_cancel() {
        let limiters = RateLimiters::from_config(&Config::default().rate_limiting);
        let token = CancellationToken::new();
        let handle = limiters.start_sweeper(token.clone());

        token.cancel();
        tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
