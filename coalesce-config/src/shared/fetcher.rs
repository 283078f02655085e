use serde::Deserialize;

use crate::Config;
use crate::shared::{TrafficConfig, UpstreamConfig, ValidationError};

/// Complete configuration for the fetcher service.
///
/// Typically loaded from configuration files at startup with [`crate::load_config`].
#[derive(Debug, Clone, Deserialize)]
pub struct FetcherConfig {
    /// Upstream whose requests are coalesced.
    pub upstream: UpstreamConfig,
    /// Traffic driven through the coalescer.
    #[serde(default)]
    pub traffic: TrafficConfig,
    /// Port of the Prometheus scrape endpoint.
    ///
    /// Metrics are not exported when unset.
    #[serde(default)]
    pub metrics_port: Option<u16>,
}

impl FetcherConfig {
    /// Validates the complete fetcher configuration.
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.upstream.validate()?;
        self.traffic.validate()
    }
}

impl Config for FetcherConfig {
    const LIST_PARSE_KEYS: &'static [&'static str] = &["upstream.headers"];

    // Header values may contain commas and semicolons but never line breaks.
    const LIST_SEPARATOR: &'static str = "\n";
}
