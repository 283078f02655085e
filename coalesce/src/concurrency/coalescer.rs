//! Single-flight request de-duplication.
//!
//! A [`RequestCoalescer`] owns one in-flight slot. The first caller of
//! [`RequestCoalescer::request`] while the slot is free becomes the leader and executes the
//! [`Upstream`]; every caller arriving before the leader finishes becomes a follower and
//! receives a [`Continuation`] that is resumed with the leader's outcome. The span between
//! the slot becoming busy and becoming free again is called a generation, and exactly one
//! upstream execution happens per generation.
//!
//! The busy check and the follower enqueue happen inside one critical section of a
//! [`std::sync::Mutex`] that is never held across an await point, so two concurrent
//! callers cannot both become leaders even on a multi-threaded runtime.

use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::panic::Location;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use metrics::{counter, histogram};
use tracing::{debug, warn};

use crate::coalesce_error;
use crate::concurrency::continuation::Continuation;
use crate::error::{CoalesceError, CoalesceResult, ErrorKind};
use crate::metrics::{
    COALESCE_FOLLOWER_JOINS_TOTAL, COALESCE_FOLLOWERS_PER_GENERATION,
    COALESCE_GENERATIONS_TOTAL, COALESCE_LEADER_EXECUTIONS_TOTAL,
    COALESCE_UPSTREAM_DURATION_SECONDS, COALESCER_LABEL, OUTCOME_LABEL,
};
use crate::upstream::Upstream;

/// Mutable state of a [`RequestCoalescer`].
///
/// `followers` is non-empty only while `busy` is true.
#[derive(Debug)]
struct CoalescerState<T> {
    busy: bool,
    followers: VecDeque<Continuation<T>>,
    generation: u64,
}

impl<T> CoalescerState<T> {
    fn new() -> Self {
        Self {
            busy: false,
            followers: VecDeque::new(),
            generation: 0,
        }
    }
}

/// Shared internals of a [`RequestCoalescer`].
struct CoalescerInner<U: Upstream> {
    name: String,
    upstream: U,
    state: Mutex<CoalescerState<U::Output>>,
}

impl<U: Upstream> CoalescerInner<U> {
    fn lock_state(&self) -> MutexGuard<'_, CoalescerState<U::Output>> {
        // The lock is never held while running user code, so a poisoned state is still
        // consistent.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Role assigned to a caller when it enters [`RequestCoalescer::request`].
enum Role<T> {
    Leader { generation: u64 },
    Follower { generation: u64, continuation: Continuation<T> },
}

/// De-duplication gate for one logical upstream operation.
///
/// [`RequestCoalescer`] is cheap to clone; clones share the same in-flight slot, so it can
/// be handed to spawned tasks. It is long-lived: generations start and end as requests come
/// and go, and a failed generation never leaves the coalescer locked.
pub struct RequestCoalescer<U: Upstream> {
    inner: Arc<CoalescerInner<U>>,
}

impl<U> RequestCoalescer<U>
where
    U: Upstream,
{
    /// Creates a new idle [`RequestCoalescer`] named `name` around `upstream`.
    ///
    /// The name is attached to logs and metrics.
    pub fn new(name: impl Into<String>, upstream: U) -> Self {
        Self {
            inner: Arc::new(CoalescerInner {
                name: name.into(),
                upstream,
                state: Mutex::new(CoalescerState::new()),
            }),
        }
    }

    /// Returns the name of this coalescer.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Returns the wrapped upstream.
    pub fn upstream(&self) -> &U {
        &self.inner.upstream
    }

    /// Returns whether a leader is currently executing the upstream.
    pub fn is_busy(&self) -> bool {
        self.inner.lock_state().busy
    }

    /// Returns the number of followers waiting on the current generation.
    pub fn pending_followers(&self) -> usize {
        self.inner.lock_state().followers.len()
    }

    /// Returns the number of generations started so far.
    ///
    /// Equals the number of upstream executions that were started.
    pub fn generation(&self) -> u64 {
        self.inner.lock_state().generation
    }

    /// Assigns the caller a role for the current generation.
    fn join(&self, location: &'static Location<'static>) -> Role<U::Output> {
        let mut state = self.inner.lock_state();

        if state.busy {
            let continuation = Continuation::with_location(location);
            state.followers.push_back(continuation.clone());

            return Role::Follower {
                generation: state.generation,
                continuation,
            };
        }

        state.busy = true;
        state.generation += 1;

        Role::Leader {
            generation: state.generation,
        }
    }
}

impl<U> RequestCoalescer<U>
where
    U: Upstream + Send + Sync,
    U::Output: Clone + Send + Sync + 'static,
{
    /// Requests the upstream payload, sharing an in-flight execution when there is one.
    ///
    /// If no request is in flight, the caller becomes the leader: it executes the upstream,
    /// then resumes every follower that arrived meanwhile with the same outcome, in arrival
    /// order, and finally returns the outcome itself. Otherwise the caller becomes a
    /// follower and waits for the leader's outcome without executing the upstream.
    ///
    /// Followers receive failures with the location of their `request` call appended as an
    /// origin. If the leader's future is dropped or panics before every follower was
    /// resumed, the slot is released and the remaining followers fail with
    /// [`ErrorKind::LeaderAbandoned`].
    #[track_caller]
    pub fn request(&self) -> impl Future<Output = CoalesceResult<U::Output>> + Send + '_ {
        let location = Location::caller();

        async move {
            match self.join(location) {
                Role::Leader { generation } => self.lead(generation).await,
                Role::Follower {
                    generation,
                    continuation,
                } => {
                    debug!(
                        coalescer = %self.inner.name,
                        generation,
                        "joined in-flight request as follower"
                    );
                    counter!(
                        COALESCE_FOLLOWER_JOINS_TOTAL,
                        COALESCER_LABEL => self.inner.name.clone()
                    )
                    .increment(1);

                    continuation.settled().await
                }
            }
        }
    }

    /// Executes the upstream as leader of `generation` and fans the outcome out.
    async fn lead(&self, generation: u64) -> CoalesceResult<U::Output> {
        let mut guard = LeaderGuard::new(&self.inner, generation);

        debug!(
            coalescer = %self.inner.name,
            generation,
            "became leader, executing upstream request"
        );
        counter!(
            COALESCE_LEADER_EXECUTIONS_TOTAL,
            COALESCER_LABEL => self.inner.name.clone()
        )
        .increment(1);

        let started = Instant::now();
        let result = self.inner.upstream.fetch().await;

        histogram!(
            COALESCE_UPSTREAM_DURATION_SECONDS,
            COALESCER_LABEL => self.inner.name.clone()
        )
        .record(started.elapsed().as_secs_f64());

        guard.settle(&result);

        result
    }
}

impl<U: Upstream> Clone for RequestCoalescer<U> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<U: Upstream> fmt::Debug for RequestCoalescer<U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.lock_state();

        f.debug_struct("RequestCoalescer")
            .field("name", &self.inner.name)
            .field("busy", &state.busy)
            .field("pending_followers", &state.followers.len())
            .field("generation", &state.generation)
            .finish()
    }
}

/// Releases the in-flight slot of a generation exactly once.
///
/// Settling the guard resumes the followers with the leader's outcome. Dropping it
/// unsettled, which happens when the leader's future is cancelled, the upstream panics or
/// handing out the outcome panics, resumes every follower not resumed yet with an
/// [`ErrorKind::LeaderAbandoned`] failure instead.
struct LeaderGuard<'a, U: Upstream> {
    inner: &'a CoalescerInner<U>,
    generation: u64,
    released: bool,
    /// Followers taken from the slot that still wait for an outcome, in arrival order.
    followers: VecDeque<Continuation<U::Output>>,
    settled: bool,
}

impl<'a, U: Upstream> LeaderGuard<'a, U> {
    fn new(inner: &'a CoalescerInner<U>, generation: u64) -> Self {
        Self {
            inner,
            generation,
            released: false,
            followers: VecDeque::new(),
            settled: false,
        }
    }

    /// Frees the slot and takes over the followers of this generation.
    ///
    /// Only the first call has an effect, so a later generation is never released by
    /// mistake.
    fn release(&mut self) {
        if self.released {
            return;
        }

        let mut state = self.inner.lock_state();
        state.busy = false;
        self.followers = std::mem::take(&mut state.followers);
        self.released = true;
    }

    /// Resumes every follower with `result`.
    ///
    /// A follower leaves the queue only after it was resumed, so a panic while cloning
    /// the outcome leaves the remaining followers to [`Drop`].
    fn settle(&mut self, result: &CoalesceResult<U::Output>)
    where
        U::Output: Clone,
    {
        self.release();
        let followers = self.followers.len();

        let outcome = match result {
            Ok(value) => {
                while let Some(follower) = self.followers.front() {
                    follower.resume_by_returning(value.clone());
                    self.followers.pop_front();
                }

                "success"
            }
            Err(err) => {
                while let Some(follower) = self.followers.front() {
                    follower.resume_by_throwing(err.clone());
                    self.followers.pop_front();
                }

                "failure"
            }
        };
        self.settled = true;

        debug!(
            coalescer = %self.inner.name,
            generation = self.generation,
            followers,
            outcome,
            "generation finished"
        );
        self.record(outcome, followers);
    }

    fn record(&self, outcome: &'static str, followers: usize) {
        counter!(
            COALESCE_GENERATIONS_TOTAL,
            COALESCER_LABEL => self.inner.name.clone(),
            OUTCOME_LABEL => outcome
        )
        .increment(1);
        histogram!(
            COALESCE_FOLLOWERS_PER_GENERATION,
            COALESCER_LABEL => self.inner.name.clone()
        )
        .record(followers as f64);
    }
}

impl<U: Upstream> Drop for LeaderGuard<'_, U> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }

        self.release();
        let followers = std::mem::take(&mut self.followers);

        warn!(
            coalescer = %self.inner.name,
            generation = self.generation,
            followers = followers.len(),
            "leader ended before resuming its followers"
        );

        let err: CoalesceError = coalesce_error!(
            ErrorKind::LeaderAbandoned,
            "Leader request ended before resuming its followers",
            format!(
                "generation {} of coalescer `{}`",
                self.generation, self.inner.name
            )
        );
        for follower in &followers {
            follower.resume_by_throwing(err.clone());
        }

        self.record("abandoned", followers.len());
    }
}
