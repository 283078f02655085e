//! Coalescing fetcher service binary.
//!
//! Drives rounds of concurrent requests against a configured HTTP upstream through a
//! single [`coalesce::RequestCoalescer`], so every round costs as few upstream calls as
//! the overlap of its requests allows. Includes logging, metrics and graceful shutdown.

use std::process::ExitCode;

use coalesce_config::Environment;
use coalesce_config::shared::FetcherConfig;
use coalesce_telemetry::metrics::init_metrics;
use coalesce_telemetry::tracing::{LogFormat, init_tracing};
use tracing::{error, info};

use crate::config::load_fetcher_config;
use crate::core::start_fetcher_with_config;
use crate::error::{FetcherError, FetcherResult};

mod config;
mod core;
mod error;

/// Entry point for the fetcher service.
///
/// Prints a report of the failure to stderr and exits with a non-zero code when the
/// service fails.
fn main() -> ExitCode {
    match try_main() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprint!("{}", err.render_report());
            ExitCode::FAILURE
        }
    }
}

/// Loads configuration, initializes tracing and runs the async runtime.
fn try_main() -> FetcherResult<()> {
    let environment = Environment::load()?;
    let fetcher_config = load_fetcher_config()?;

    let log_format = match environment {
        Environment::Dev => LogFormat::Pretty,
        Environment::Prod => LogFormat::Json,
    };
    init_tracing(env!("CARGO_BIN_NAME"), log_format).map_err(FetcherError::config)?;

    info!(%environment, "loaded fetcher configuration");

    // We start the runtime.
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?
        .block_on(async_main(fetcher_config))
}

/// Main async entry point that starts the fetcher.
async fn async_main(fetcher_config: FetcherConfig) -> FetcherResult<()> {
    if let Some(port) = fetcher_config.metrics_port {
        init_metrics(env!("CARGO_BIN_NAME"), port).map_err(FetcherError::config)?;
        info!(port, "metrics endpoint started");
    }

    if let Err(err) = start_fetcher_with_config(fetcher_config).await {
        error!("{err}");
        return Err(err);
    }

    info!("fetcher completed successfully");

    Ok(())
}
