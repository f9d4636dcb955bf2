//! Telemetry and observability for the AI Router Service
//!
//! This module provides structured logging setup, the component/action event
//! helpers every module logs through, and the Prometheus metrics recorder.

use crate::config::TelemetryConfig;
use crate::models::RouterError;
use serde_json::Value;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[cfg(feature = "metrics")]
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
#[cfg(feature = "metrics")]
use std::sync::OnceLock;

/// Initialize telemetry system
pub fn init_tracing(config: &TelemetryConfig) -> Result<(), RouterError> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level));

    match config.logging.format.as_str() {
        "json" => {
            let subscriber = tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json().with_target(true).with_thread_ids(true));

            tracing::subscriber::set_global_default(subscriber).map_err(|e| {
                RouterError::ConfigurationError {
                    message: format!("Failed to set tracing subscriber: {}", e),
                }
            })?;
        }
        _ => {
            let subscriber = tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().compact().with_target(true));

            tracing::subscriber::set_global_default(subscriber).map_err(|e| {
                RouterError::ConfigurationError {
                    message: format!("Failed to set tracing subscriber: {}", e),
                }
            })?;
        }
    }

    Ok(())
}

/// Log a structured error event
pub fn log_error(component: &str, action: &str, error: &dyn std::fmt::Display, additional_data: Value) {
    tracing::error!(
        component = %component,
        action = %action,
        error = %error,
        additional_data = %additional_data,
        "{}.{} failed",
        component,
        action
    );
}

/// Log a structured informational event
pub fn log_event(component: &str, action: &str, data: Value) {
    tracing::info!(
        component = %component,
        action = %action,
        data = %data,
        "{}.{}",
        component,
        action
    );
}

#[cfg(feature = "metrics")]
static PROMETHEUS_HANDLE: OnceLock<Option<PrometheusHandle>> = OnceLock::new();

/// Telemetry manager exposing the metrics exporter
#[derive(Debug, Clone)]
pub struct TelemetryManager {
    config: TelemetryConfig,
}

impl TelemetryManager {
    pub fn new(config: TelemetryConfig) -> Self {
        #[cfg(feature = "metrics")]
        if config.metrics.enabled {
            PROMETHEUS_HANDLE.get_or_init(|| match PrometheusBuilder::new().install_recorder() {
                Ok(handle) => Some(handle),
                Err(e) => {
                    log_error("telemetry", "install_recorder", &e, Value::Null);
                    None
                }
            });
        }

        Self { config }
    }

    /// Render metrics in Prometheus text format
    pub fn render_metrics(&self) -> Option<String> {
        if !self.config.metrics.enabled {
            return None;
        }

        #[cfg(feature = "metrics")]
        {
            PROMETHEUS_HANDLE
                .get()
                .and_then(|handle| handle.as_ref())
                .map(|handle| handle.render())
        }

        #[cfg(not(feature = "metrics"))]
        {
            None
        }
    }

    pub fn health(&self) -> Value {
        serde_json::json!({
            "status": "healthy",
            "logging_level": self.config.logging.level,
            "logging_format": self.config.logging.format,
            "metrics_enabled": self.config.metrics.enabled
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn test_telemetry_manager_creation() {
        let config = Config::default().telemetry;
        let manager = TelemetryManager::new(config);
        assert_eq!(manager.health()["status"], "healthy");
    }

    #[test]
    fn test_metrics_disabled_renders_nothing() {
        let mut config = Config::default().telemetry;
        config.metrics.enabled = false;
        let manager = TelemetryManager::new(config);
        assert!(manager.render_metrics().is_none());
    }
}
