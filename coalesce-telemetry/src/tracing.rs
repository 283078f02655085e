use std::sync::Once;

use thiserror::Error;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};
use tracing_subscriber::{EnvFilter, fmt};

/// Name of the environment variable that enables log output in tests.
const ENABLE_TRACING_ENV_NAME: &str = "ENABLE_TRACING";

/// Errors raised while installing the global tracing subscriber.
#[derive(Debug, Error)]
pub enum TracingError {
    /// A global subscriber was already installed.
    #[error("failed to install the global tracing subscriber: {0}")]
    Init(#[from] TryInitError),
}

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human readable, colored output for local development.
    Pretty,
    /// One JSON object per line, for log collectors.
    Json,
}

/// Builds the filter used when `RUST_LOG` is not set.
///
/// Logs the application's own target and the coalescing core at `info`.
fn default_filter(app_name: &str) -> EnvFilter {
    let app_target = app_name.replace('-', "_");
    EnvFilter::new(format!("{app_target}=info,coalesce=info"))
}

/// Installs the global tracing subscriber for `app_name`.
///
/// `RUST_LOG` overrides the default filter when set.
pub fn init_tracing(app_name: &str, format: LogFormat) -> Result<(), TracingError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(app_name));
    let registry = tracing_subscriber::registry().with(filter);

    match format {
        LogFormat::Pretty => registry.with(fmt::layer()).try_init()?,
        LogFormat::Json => registry
            .with(fmt::layer().json().with_current_span(false))
            .try_init()?,
    }

    Ok(())
}

static INIT_TEST_TRACING: Once = Once::new();

/// Installs a subscriber that writes through the test harness.
///
/// Does nothing unless `ENABLE_TRACING` is set, and only the first call has an effect, so
/// every test can call it unconditionally.
pub fn init_test_tracing() {
    INIT_TEST_TRACING.call_once(|| {
        if std::env::var(ENABLE_TRACING_ENV_NAME).is_err() {
            return;
        }

        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"));

        // Another harness may already have installed a subscriber; keeping it is fine.
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_test_writer())
            .try_init();
    });
}
