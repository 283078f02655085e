use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use coalesce::{CoalesceError, CoalesceResult, Upstream};
use tokio::sync::Notify;
use tokio::time::{sleep, timeout};

/// Default timeout for conditions awaited by tests.
///
/// Most conditions hold within milliseconds, the margin only exists to fail instead of
/// hanging when a condition is never reached.
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(10);

/// [`Upstream`] that counts its executions and holds each one until the gate is opened.
///
/// Every execution waits for one [`GatedUpstream::open`] call. Opening the gate before an
/// execution starts lets that execution pass straight through.
pub struct GatedUpstream<T> {
    calls: AtomicUsize,
    gate: Notify,
    outcome: CoalesceResult<T>,
}

impl<T> GatedUpstream<T> {
    /// Creates an upstream whose executions succeed with `value`.
    pub fn succeeding(value: T) -> Self {
        Self::with_outcome(Ok(value))
    }

    /// Creates an upstream whose executions fail with `err`.
    pub fn failing(err: CoalesceError) -> Self {
        Self::with_outcome(Err(err))
    }

    fn with_outcome(outcome: CoalesceResult<T>) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            gate: Notify::new(),
            outcome,
        }
    }

    /// Returns how many executions were started.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Lets one waiting or future execution complete.
    pub fn open(&self) {
        self.gate.notify_one();
    }
}

impl<T> Upstream for GatedUpstream<T>
where
    T: Clone + Send + Sync,
{
    type Output = T;

    fn fetch(&self) -> impl Future<Output = CoalesceResult<Self::Output>> + Send {
        async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.gate.notified().await;

            self.outcome.clone()
        }
    }
}

/// Shared counter handed to closure based upstreams.
pub fn call_counter() -> Arc<AtomicUsize> {
    Arc::new(AtomicUsize::new(0))
}

/// Waits until `condition` holds.
///
/// # Panics
///
/// Panics if the condition does not hold within [`DEFAULT_WAIT_TIMEOUT`], so tests fail
/// fast rather than hang.
pub async fn wait_until(description: &str, mut condition: impl FnMut() -> bool) {
    let waiting = async {
        while !condition() {
            sleep(Duration::from_millis(1)).await;
        }
    };

    if timeout(DEFAULT_WAIT_TIMEOUT, waiting).await.is_err() {
        panic!(
            "Timed out after {:?} waiting until {description}. \
             Check whether the expected coalescer state is reachable.",
            DEFAULT_WAIT_TIMEOUT
        );
    }
}
