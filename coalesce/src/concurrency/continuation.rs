//! Manually resumable futures.
//!
//! A [`Continuation`] is a single-assignment result slot: it is created pending, settled
//! exactly once from the outside with either a value or a [`CoalesceError`], and awaited
//! by any number of holders. It abstracts a tokio watch channel whose value moves from
//! `None` to `Some(result)` once and never changes afterwards.

use std::fmt;
use std::future::IntoFuture;
use std::panic::Location;
use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::watch;
use tracing::debug;

use crate::coalesce_error;
use crate::error::{CoalesceError, CoalesceResult, ErrorKind, ErrorOrigin};

/// Current settlement of a continuation, `None` while pending.
type Settlement<T> = Option<CoalesceResult<T>>;

struct ContinuationInner<T> {
    tx: watch::Sender<Settlement<T>>,
    origin: ErrorOrigin,
}

/// A pending result that is settled later by an external resumer.
///
/// Cloning a [`Continuation`] yields another handle to the same slot. Every handle can
/// resume the slot, but only the first resumption takes effect; later ones are ignored
/// and reported by returning `false`.
///
/// The creation context (caller location and backtrace) is captured when the
/// continuation is created and appended to any error delivered through
/// [`Continuation::resume_by_throwing`].
pub struct Continuation<T> {
    inner: Arc<ContinuationInner<T>>,
}

impl<T> Continuation<T> {
    /// Creates a new pending [`Continuation`] whose origin is the caller's location.
    #[track_caller]
    pub fn new() -> Self {
        Self::with_location(Location::caller())
    }

    /// Creates a new pending [`Continuation`] whose origin is `location`.
    ///
    /// Used when the logical creation site is further up the call chain than the code
    /// that allocates the continuation.
    pub fn with_location(location: &'static Location<'static>) -> Self {
        let (tx, _) = watch::channel(None);

        Self {
            inner: Arc::new(ContinuationInner {
                tx,
                origin: ErrorOrigin::capture(location),
            }),
        }
    }

    /// Returns the context captured when this continuation was created.
    pub fn origin(&self) -> &ErrorOrigin {
        &self.inner.origin
    }

    /// Settles the continuation successfully with `value`.
    ///
    /// Returns `true` if this call settled the continuation and `false` if it had already
    /// been settled, in which case `value` is dropped and the delivered outcome is unchanged.
    pub fn resume_by_returning(&self, value: T) -> bool {
        self.settle(Ok(value))
    }

    /// Settles the continuation with a failure.
    ///
    /// The continuation's creation context is appended to `error` before delivery. Returns
    /// `false` without effect if the continuation was already settled.
    pub fn resume_by_throwing(&self, error: CoalesceError) -> bool {
        let error = error.with_origin(self.inner.origin.clone());
        self.settle(Err(error))
    }

    fn settle(&self, result: CoalesceResult<T>) -> bool {
        let settled = self.inner.tx.send_if_modified(move |slot| {
            if slot.is_some() {
                return false;
            }

            *slot = Some(result);
            true
        });

        if !settled {
            let location = self.inner.origin.location();
            debug!(
                origin = %location,
                "continuation already settled, ignoring resumption"
            );
        }

        settled
    }
}

impl<T> Continuation<T>
where
    T: Clone,
{
    /// Waits until the continuation is settled and returns its outcome.
    ///
    /// Returns immediately if the continuation is already settled. Every caller observes
    /// the same outcome.
    pub async fn settled(&self) -> CoalesceResult<T> {
        let mut rx = self.inner.tx.subscribe();

        let settlement = rx.wait_for(Option::is_some).await.map_err(|_| {
            coalesce_error!(
                ErrorKind::InvalidState,
                "Continuation channel closed before settlement"
            )
        })?;

        settlement.clone().unwrap_or_else(|| {
            Err(coalesce_error!(
                ErrorKind::InvalidState,
                "Continuation woke up without a settlement"
            ))
        })
    }
}

impl<T> Default for Continuation<T> {
    #[track_caller]
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Continuation<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> fmt::Debug for Continuation<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Continuation")
            .field("origin", &self.inner.origin.location())
            .field("settled", &self.inner.tx.borrow().is_some())
            .finish()
    }
}

impl<T> IntoFuture for Continuation<T>
where
    T: Clone + Send + Sync + 'static,
{
    type Output = CoalesceResult<T>;
    type IntoFuture = BoxFuture<'static, CoalesceResult<T>>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(async move { self.settled().await })
    }
}
