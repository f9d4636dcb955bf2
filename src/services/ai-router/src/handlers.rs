//! HTTP request handlers for the AI Router Service
//!
//! Handlers are grouped by area. Every JSON response uses the same envelope:
//! `{success, data?, error?, message?, timestamp}`.

use axum::{http::StatusCode, response::Json};
use serde::Serialize;

use crate::models::RouterError;

pub mod assignments;
pub mod health;
pub mod keys;
pub mod providers;
pub mod routing;
pub mod usage;

/// Standard API response wrapper
#[derive(Debug, Serialize)]
pub struct ApiEnvelope<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl<T> ApiEnvelope<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
            message: None,
            timestamp: chrono::Utc::now(),
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

impl ApiEnvelope<()> {
    pub fn error(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
            message: Some(message.into()),
            timestamp: chrono::Utc::now(),
        }
    }
}

/// Handler return type; errors render through `RouterError`'s `IntoResponse`
pub type HandlerResult<T> = Result<Json<ApiEnvelope<T>>, RouterError>;

/// Helper function to create a success response
pub fn success_response<T: Serialize>(data: T) -> HandlerResult<T> {
    Ok(Json(ApiEnvelope::success(data)))
}

/// Helper function to create a 201 response
pub fn created_response<T: Serialize>(
    data: T,
    message: &str,
) -> Result<(StatusCode, Json<ApiEnvelope<T>>), RouterError> {
    Ok((
        StatusCode::CREATED,
        Json(ApiEnvelope::success(data).with_message(message)),
    ))
}
