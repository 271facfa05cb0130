//! # Structured Logging Module
//!
//! Environment-aware structured logging for the worker process. The level
//! follows `FLOWRELAY_ENV` (development/test → debug, production → info),
//! the configured filter overrides that, and `RUST_LOG` overrides both.

use std::sync::OnceLock;

use chrono::Utc;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::loader::ENVIRONMENT_VARIABLE;
use crate::config::LogFormat;

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging; later calls are no-ops
pub fn init_structured_logging(format: LogFormat, level: Option<&str>) {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let directive = level
            .map(str::to_string)
            .unwrap_or_else(|| get_log_level(&environment).to_string());
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&directive));

        let layer = match format {
            LogFormat::Pretty => fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_filter(filter)
                .boxed(),
            LogFormat::Json => fmt::layer()
                .json()
                .with_target(true)
                .with_thread_ids(true)
                .with_level(true)
                .with_current_span(false)
                .with_filter(filter)
                .boxed(),
        };

        // Use try_init to avoid panic if a global subscriber is already set (tests)
        if tracing_subscriber::registry().with(layer).try_init().is_err() {
            tracing::debug!("Global tracing subscriber already initialized; continuing");
        }

        tracing::info!(
            pid = std::process::id(),
            environment = %environment,
            format = ?format,
            "🔧 Structured logging initialized"
        );
    });
}

/// Get current environment from `FLOWRELAY_ENV`
fn get_environment() -> String {
    std::env::var(ENVIRONMENT_VARIABLE).unwrap_or_else(|_| "development".to_string())
}

/// Get log level based on environment
fn get_log_level(environment: &str) -> &'static str {
    match environment {
        "production" => "info",
        _ => "debug",
    }
}

/// Log structured data for control-plane operations
pub fn log_control_operation(kind: &str, operation: &str, target: &str, outcome: &str) {
    tracing::info!(
        kind = %kind,
        operation = %operation,
        target = %target,
        outcome = %outcome,
        timestamp = %Utc::now().to_rfc3339(),
        "🎛️ CONTROL_OPERATION"
    );
}
