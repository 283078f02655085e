pub mod concurrency;
pub mod error;
mod macros;
pub mod metrics;
pub mod upstream;

pub use concurrency::coalescer::RequestCoalescer;
pub use concurrency::continuation::Continuation;
pub use error::{CoalesceError, CoalesceResult, ErrorKind};
pub use upstream::{Upstream, upstream_fn};
