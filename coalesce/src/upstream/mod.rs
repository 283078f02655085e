//! Upstream operations served through a coalescer.

#[cfg(feature = "http")]
pub mod http;

use std::future::Future;

use crate::error::CoalesceResult;

/// Trait for operations whose concurrent executions can be coalesced.
///
/// An [`Upstream`] performs one parameterless request and produces a decoded payload or a
/// failure. The coalescer never interprets the payload, it only hands clones of it to
/// every caller that waited on the same execution.
///
/// Implementations are not retried by the coalescer; a failure is delivered as-is to all
/// callers of the generation that observed it.
pub trait Upstream {
    /// Payload produced by a successful request.
    type Output;

    /// Performs the upstream request.
    fn fetch(&self) -> impl Future<Output = CoalesceResult<Self::Output>> + Send;
}

/// [`Upstream`] backed by a closure that returns a future.
///
/// Built with [`upstream_fn`].
#[derive(Debug, Clone)]
pub struct UpstreamFn<F> {
    f: F,
}

/// Wraps `f` into an [`Upstream`] that calls it once per execution.
pub fn upstream_fn<F, Fut, T>(f: F) -> UpstreamFn<F>
where
    F: Fn() -> Fut,
    Fut: Future<Output = CoalesceResult<T>> + Send,
{
    UpstreamFn { f }
}

impl<F, Fut, T> Upstream for UpstreamFn<F>
where
    F: Fn() -> Fut,
    Fut: Future<Output = CoalesceResult<T>> + Send,
{
    type Output = T;

    fn fetch(&self) -> impl Future<Output = CoalesceResult<Self::Output>> + Send {
        (self.f)()
    }
}
