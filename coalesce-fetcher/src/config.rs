use coalesce_config::load_config;
use coalesce_config::shared::FetcherConfig;

use crate::error::{FetcherError, FetcherResult};

/// Loads and validates the fetcher configuration.
///
/// Uses the standard configuration loading mechanism from [`coalesce_config`] and
/// validates the resulting [`FetcherConfig`] before returning it.
pub fn load_fetcher_config() -> FetcherResult<FetcherConfig> {
    let config = load_config::<FetcherConfig>().map_err(FetcherError::config)?;
    config.validate().map_err(FetcherError::config)?;

    Ok(config)
}
