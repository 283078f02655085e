use std::time::Duration;

use secrecy::SecretString;
use serde::Deserialize;

use crate::shared::ValidationError;

/// Configuration of the HTTP upstream whose requests are coalesced.
///
/// This intentionally does not implement [`serde::Serialize`] to avoid leaking the bearer
/// token into serialized forms.
#[derive(Clone, Debug, Deserialize)]
pub struct UpstreamConfig {
    /// URL fetched with `GET` on every upstream execution.
    pub url: String,

    /// Timeout of a single upstream request.
    ///
    /// Specified in milliseconds for serialization compatibility.
    /// Default: 10000ms (10 seconds)
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Extra request headers, each of the form `Name: value`.
    ///
    /// In the `APP_UPSTREAM__HEADERS` environment variable, headers are separated by
    /// line breaks so that values may contain commas.
    #[serde(default)]
    pub headers: Vec<String>,

    /// Optional bearer token sent in the `Authorization` header.
    #[serde(default)]
    pub bearer_token: Option<SecretString>,
}

fn default_timeout_ms() -> u64 {
    10_000
}

impl UpstreamConfig {
    /// Returns the request timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    /// Splits the configured headers into trimmed `(name, value)` pairs.
    pub fn parsed_headers(&self) -> Result<Vec<(&str, &str)>, ValidationError> {
        self.headers
            .iter()
            .map(|header| {
                let (name, value) = header
                    .split_once(':')
                    .ok_or_else(|| ValidationError::InvalidHeader(header.clone()))?;

                let name = name.trim();
                if name.is_empty() {
                    return Err(ValidationError::InvalidHeader(header.clone()));
                }

                Ok((name, value.trim()))
            })
            .collect()
    }

    /// Validates the upstream configuration.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let url = self.url.trim();
        if url.is_empty() {
            return Err(ValidationError::UpstreamUrlEmpty);
        }

        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ValidationError::UpstreamUrlScheme(url.to_owned()));
        }

        if self.timeout_ms == 0 {
            return Err(ValidationError::UpstreamTimeoutZero);
        }

        self.parsed_headers()?;

        Ok(())
    }
}
