//! Bootstrap utilities for eventline binaries.
//!
//! Shared initialization and teardown code.

use std::future::Future;

use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{AppConfig, AppEnv, LOG_ENV_VAR};

/// Build the log filter: `EVENTLINE_LOG` wins, else the configured level.
pub fn env_filter(app: &AppConfig) -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV_VAR)
        .unwrap_or_else(|_| EnvFilter::new(app.log_level.as_filter()))
}

/// Initialize tracing.
///
/// Development gets human-readable output; production and test emit one
/// JSON object per line so log shippers can index the structured fields.
pub fn init_tracing(app: &AppConfig) {
    let registry = tracing_subscriber::registry().with(env_filter(app));

    match app.app_env {
        AppEnv::Development => registry.with(tracing_subscriber::fmt::layer()).init(),
        AppEnv::Production | AppEnv::Test => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false),
            )
            .init(),
    }
}

/// Run a shutdown step, logging instead of propagating its failure so later
/// steps still run.
pub async fn safe_shutdown<Fut, E>(component: &str, step: Fut)
where
    Fut: Future<Output = Result<(), E>>,
    E: std::fmt::Display,
{
    match step.await {
        Ok(()) => info!(component, "Shut down"),
        Err(e) => error!(component, error = %e, "Shutdown error"),
    }
}
