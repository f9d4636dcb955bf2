//! Assignment administration handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
};

use crate::handlers::keys::UserQuery;
use crate::handlers::{created_response, success_response, ApiEnvelope, HandlerResult};
use crate::manager::{AssignmentInput, AssignmentUpdate};
use crate::models::{ApiAssignment, RouterError};
use crate::server::ServerState;

pub async fn list_assignments(
    State(state): State<ServerState>,
    Query(query): Query<UserQuery>,
) -> HandlerResult<Vec<ApiAssignment>> {
    success_response(state.manager.list_assignments(query.user_id.as_deref()))
}

pub async fn create_assignment(
    State(state): State<ServerState>,
    Json(input): Json<AssignmentInput>,
) -> Result<(StatusCode, Json<ApiEnvelope<ApiAssignment>>), RouterError> {
    let assignment = state.manager.create_assignment(input).await?;
    created_response(assignment, "Assignment created")
}

pub async fn get_assignment(
    State(state): State<ServerState>,
    Path(id): Path<String>,
) -> HandlerResult<ApiAssignment> {
    success_response(state.manager.get_assignment(&id)?)
}

pub async fn update_assignment(
    State(state): State<ServerState>,
    Path(id): Path<String>,
    Json(update): Json<AssignmentUpdate>,
) -> HandlerResult<ApiAssignment> {
    success_response(state.manager.update_assignment(&id, update).await?)
}

pub async fn delete_assignment(
    State(state): State<ServerState>,
    Path(id): Path<String>,
) -> HandlerResult<ApiAssignment> {
    let assignment = state.manager.delete_assignment(&id).await?;
    Ok(Json(
        ApiEnvelope::success(assignment).with_message("Assignment deleted"),
    ))
}
