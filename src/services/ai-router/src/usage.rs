//! Usage accounting per (provider, environment, user)

use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::models::ApiUsage;

type UsageKey = (String, String, String);

/// Optional filters; `None` matches everything
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UsageFilter {
    pub provider_id: Option<String>,
    pub environment_id: Option<String>,
    pub user_id: Option<String>,
}

impl UsageFilter {
    fn matches(&self, usage: &ApiUsage) -> bool {
        self.provider_id
            .as_deref()
            .map_or(true, |id| id == usage.provider_id)
            && self
                .environment_id
                .as_deref()
                .map_or(true, |id| id == usage.environment_id)
            && self
                .user_id
                .as_deref()
                .map_or(true, |id| id == usage.user_id)
    }
}

/// Totals over a set of usage records
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UsageSummary {
    pub total_requests: u64,
    pub total_tokens: u64,
    pub total_cost: f64,
    pub success_count: u64,
    pub error_count: u64,
    pub success_rate: f64,
    pub requests_by_provider: HashMap<String, u64>,
}

/// Usage records keyed by provider, environment and user
#[derive(Debug, Clone, Default)]
pub struct UsageTracker {
    usage: Arc<DashMap<UsageKey, ApiUsage>>,
}

impl UsageTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one request. The latency average is `(old + new) / 2`.
    #[allow(clippy::too_many_arguments)]
    pub fn update_usage_stats(
        &self,
        provider_id: &str,
        environment_id: &str,
        user_id: &str,
        success: bool,
        response_time_ms: u64,
        tokens: u64,
        cost: f64,
    ) -> ApiUsage {
        let now = Utc::now();
        let key = (
            provider_id.to_string(),
            environment_id.to_string(),
            user_id.to_string(),
        );

        let mut usage = self.usage.entry(key).or_insert_with(|| ApiUsage {
            provider_id: provider_id.to_string(),
            environment_id: environment_id.to_string(),
            user_id: user_id.to_string(),
            request_count: 0,
            token_count: 0,
            cost: 0.0,
            success_count: 0,
            error_count: 0,
            average_response_time: 0.0,
            last_request_at: now,
        });

        usage.request_count += 1;
        usage.token_count += tokens;
        usage.cost += cost;
        if success {
            usage.success_count += 1;
        } else {
            usage.error_count += 1;
        }
        usage.average_response_time = (usage.average_response_time + response_time_ms as f64) / 2.0;
        usage.last_request_at = now;

        usage.clone()
    }

    /// Matching records, most recent first
    pub fn get_usage(&self, filter: &UsageFilter) -> Vec<ApiUsage> {
        let mut records: Vec<ApiUsage> = self
            .usage
            .iter()
            .filter(|entry| filter.matches(entry.value()))
            .map(|entry| entry.value().clone())
            .collect();
        records.sort_by(|a, b| b.last_request_at.cmp(&a.last_request_at));
        records
    }

    pub fn usage_summary(&self, filter: &UsageFilter) -> UsageSummary {
        let mut summary = UsageSummary::default();

        for usage in self.get_usage(filter) {
            summary.total_requests += usage.request_count;
            summary.total_tokens += usage.token_count;
            summary.total_cost += usage.cost;
            summary.success_count += usage.success_count;
            summary.error_count += usage.error_count;
            *summary
                .requests_by_provider
                .entry(usage.provider_id.clone())
                .or_insert(0) += usage.request_count;
        }

        if summary.total_requests > 0 {
            summary.success_rate = summary.success_count as f64 / summary.total_requests as f64;
        }

        summary
    }

    pub fn snapshot(&self) -> Vec<ApiUsage> {
        self.usage.iter().map(|entry| entry.value().clone()).collect()
    }

    /// Replace every record with `records`
    pub fn restore(&self, records: Vec<ApiUsage>) {
        self.usage.clear();
        for usage in records {
            let key = (
                usage.provider_id.clone(),
                usage.environment_id.clone(),
                usage.user_id.clone(),
            );
            self.usage.insert(key, usage);
        }
    }

    pub fn len(&self) -> usize {
        self.usage.len()
    }

    pub fn is_empty(&self) -> bool {
        self.usage.is_empty()
    }
}
