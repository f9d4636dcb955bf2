//! Usage reporting handler

use axum::extract::{Query, State};
use serde::Serialize;

use crate::handlers::{success_response, HandlerResult};
use crate::models::ApiUsage;
use crate::server::ServerState;
use crate::usage::{UsageFilter, UsageSummary};

#[derive(Debug, Serialize)]
pub struct UsageReport {
    pub summary: UsageSummary,
    pub records: Vec<ApiUsage>,
}

/// Usage records and totals, filtered by provider, environment and user
pub async fn get_usage(
    State(state): State<ServerState>,
    Query(filter): Query<UsageFilter>,
) -> HandlerResult<UsageReport> {
    success_response(UsageReport {
        summary: state.manager.usage_summary(&filter),
        records: state.manager.get_usage(&filter),
    })
}
