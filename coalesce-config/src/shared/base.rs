use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// The upstream URL is empty.
    #[error("`upstream.url` cannot be empty")]
    UpstreamUrlEmpty,
    /// The upstream URL does not use HTTP or HTTPS.
    #[error("`upstream.url` must start with `http://` or `https://`, got `{0}`")]
    UpstreamUrlScheme(String),
    /// The upstream timeout cannot be zero.
    #[error("`upstream.timeout_ms` cannot be zero")]
    UpstreamTimeoutZero,
    /// A configured header is not of the form `Name: value`.
    #[error("invalid header `{0}`, expected `Name: value`")]
    InvalidHeader(String),
    /// The number of concurrent requests per round cannot be zero.
    #[error("`traffic.concurrent_requests` cannot be zero")]
    ConcurrentRequestsZero,
    /// The number of rounds cannot be zero.
    #[error("`traffic.rounds` cannot be zero")]
    RoundsZero,
}
