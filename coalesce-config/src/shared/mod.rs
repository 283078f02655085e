//! Shared configuration types for coalesce services.

mod base;
mod fetcher;
mod traffic;
mod upstream;

pub use base::ValidationError;
pub use fetcher::FetcherConfig;
pub use traffic::TrafficConfig;
pub use upstream::UpstreamConfig;
