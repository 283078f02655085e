//! Concurrency primitives for coalescing concurrent requests.
//!
//! # Coordination Pattern
//!
//! The [`coalescer`] module implements single-flight de-duplication: at most one upstream
//! execution is in flight per [`coalescer::RequestCoalescer`], and callers arriving while
//! it runs share its outcome instead of starting a duplicate execution.
//!
//! Followers wait on a [`continuation::Continuation`], a single-assignment result slot
//! that the leader resumes once the upstream settles. Continuations are resumed in the
//! order the followers arrived; the order in which the woken tasks actually continue is up
//! to the runtime scheduler.
//!
//! # Safety Guarantees
//!
//! - **One leader per generation**: the busy check and the follower enqueue happen in the
//!   same critical section, with no suspension point in between.
//! - **No wedged slot**: the slot is released when the leader settles, fails, panics, or
//!   is dropped mid-flight.
//! - **No lost follower**: every follower enqueued during a generation is resumed exactly
//!   once when that generation ends.

pub mod coalescer;
pub mod continuation;
