use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use coalesce::{CoalesceResult, ErrorKind, RequestCoalescer, coalesce_error, upstream_fn};
use coalesce_telemetry::tracing::init_test_tracing;
use serde_json::{Value, json};
use tokio::sync::Notify;
use tokio::task::JoinSet;
use tokio::time::timeout;

use crate::common::{DEFAULT_WAIT_TIMEOUT, GatedUpstream, call_counter, wait_until};

mod common;

#[tokio::test]
async fn concurrent_calls_share_a_single_execution() {
    init_test_tracing();

    let calls = call_counter();
    let upstream_calls = calls.clone();
    let coalescer = RequestCoalescer::new(
        "users",
        upstream_fn(move || {
            let calls = upstream_calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::task::yield_now().await;

                Ok(json!({ "id": 1 }))
            }
        }),
    );

    let (first, second, third) = tokio::join!(
        coalescer.request(),
        coalescer.request(),
        coalescer.request()
    );

    assert_eq!(first.unwrap(), json!({ "id": 1 }));
    assert_eq!(second.unwrap(), json!({ "id": 1 }));
    assert_eq!(third.unwrap(), json!({ "id": 1 }));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(coalescer.generation(), 1);
    assert!(!coalescer.is_busy());
}

#[tokio::test]
async fn failure_is_delivered_to_every_concurrent_caller() {
    init_test_tracing();

    let calls = call_counter();
    let upstream_calls = calls.clone();
    let coalescer = RequestCoalescer::new(
        "users",
        upstream_fn(move || {
            let calls = upstream_calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                tokio::task::yield_now().await;

                CoalesceResult::<Value>::Err(coalesce_error!(ErrorKind::UpstreamFailed, "boom"))
            }
        }),
    );

    let (first, second) = tokio::join!(coalescer.request(), coalescer.request());
    let first = first.unwrap_err();
    let second = second.unwrap_err();

    assert_eq!(first.description(), Some("boom"));
    assert_eq!(second.description(), Some("boom"));
    assert_eq!(first.kind(), ErrorKind::UpstreamFailed);
    assert_eq!(first, second);

    // Only the follower's copy carries the continuation origin.
    let mut origins = vec![first.origins().len(), second.origins().len()];
    origins.sort_unstable();
    assert_eq!(origins, vec![0, 1]);

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(!coalescer.is_busy());
}

#[tokio::test]
async fn sequential_calls_start_a_new_generation_each() {
    init_test_tracing();

    let calls = call_counter();
    let upstream_calls = calls.clone();
    let coalescer = RequestCoalescer::new(
        "users",
        upstream_fn(move || {
            let calls = upstream_calls.clone();
            async move {
                let call = calls.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(json!({ "call": call }))
            }
        }),
    );

    assert_eq!(coalescer.request().await.unwrap(), json!({ "call": 1 }));
    assert_eq!(coalescer.request().await.unwrap(), json!({ "call": 2 }));

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(coalescer.generation(), 2);
    assert_eq!(coalescer.pending_followers(), 0);
}

#[tokio::test]
async fn failed_generation_releases_the_slot() {
    init_test_tracing();

    let calls = call_counter();
    let upstream_calls = calls.clone();
    let coalescer = RequestCoalescer::new(
        "flaky",
        upstream_fn(move || {
            let calls = upstream_calls.clone();
            async move {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    return Err(coalesce_error!(
                        ErrorKind::UpstreamTimeout,
                        "first attempt timed out"
                    ));
                }

                Ok(42u32)
            }
        }),
    );

    let err = coalescer.request().await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UpstreamTimeout);
    assert!(err.origins().is_empty());
    assert!(!coalescer.is_busy());

    assert_eq!(coalescer.request().await.unwrap(), 42);
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn followers_queue_drains_when_the_leader_settles() {
    init_test_tracing();

    let coalescer = RequestCoalescer::new("gated", GatedUpstream::succeeding(json!({ "id": 7 })));

    let mut requests = JoinSet::new();
    let leader = coalescer.clone();
    requests.spawn(async move { leader.request().await });
    wait_until("the leader starts the upstream", || {
        coalescer.upstream().calls() == 1
    })
    .await;

    for _ in 0..3 {
        let follower = coalescer.clone();
        requests.spawn(async move { follower.request().await });
    }
    wait_until("three followers are queued", || {
        coalescer.pending_followers() == 3
    })
    .await;
    assert!(coalescer.is_busy());

    coalescer.upstream().open();

    let mut completed = 0;
    while let Some(result) = requests.join_next().await {
        assert_eq!(result.unwrap().unwrap(), json!({ "id": 7 }));
        completed += 1;
    }
    assert_eq!(completed, 4);
    assert_eq!(coalescer.pending_followers(), 0);
    assert!(!coalescer.is_busy());
    assert_eq!(coalescer.upstream().calls(), 1);

    // A call made after settlement leads a fresh generation.
    coalescer.upstream().open();
    assert_eq!(coalescer.request().await.unwrap(), json!({ "id": 7 }));
    assert_eq!(coalescer.upstream().calls(), 2);
    assert_eq!(coalescer.generation(), 2);
}

/// Payload stamped with the order in which copies of the leader's value were made.
#[derive(Debug)]
struct Stamped {
    serial: usize,
    copies: Arc<AtomicUsize>,
}

impl Clone for Stamped {
    fn clone(&self) -> Self {
        // Only copies of the original value take a new serial.
        let serial = if self.serial == 0 {
            self.copies.fetch_add(1, Ordering::SeqCst) + 1
        } else {
            self.serial
        };

        Self {
            serial,
            copies: self.copies.clone(),
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn followers_are_resumed_in_arrival_order() {
    init_test_tracing();

    let gate = Arc::new(Notify::new());
    let upstream_gate = gate.clone();
    let copies = call_counter();
    let coalescer = RequestCoalescer::new(
        "ordered",
        upstream_fn(move || {
            let gate = upstream_gate.clone();
            let copies = copies.clone();
            async move {
                gate.notified().await;
                Ok(Stamped { serial: 0, copies })
            }
        }),
    );

    let leader = coalescer.clone();
    let leader = tokio::spawn(async move { leader.request().await });
    wait_until("the leader takes the slot", || coalescer.is_busy()).await;

    let mut followers = Vec::new();
    for position in 0..3 {
        let follower = coalescer.clone();
        followers.push(tokio::spawn(async move { follower.request().await }));

        wait_until("the follower is queued", || {
            coalescer.pending_followers() == position + 1
        })
        .await;
    }

    gate.notify_one();

    assert_eq!(leader.await.unwrap().unwrap().serial, 0);
    for (position, follower) in followers.into_iter().enumerate() {
        assert_eq!(follower.await.unwrap().unwrap().serial, position + 1);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn follower_errors_point_at_the_follower_call_site() {
    init_test_tracing();

    let coalescer = RequestCoalescer::new(
        "failing",
        GatedUpstream::<Value>::failing(coalesce_error!(ErrorKind::UpstreamStatus, "boom")),
    );

    let leader = coalescer.clone();
    let leader = tokio::spawn(async move { leader.request().await });
    wait_until("the leader starts the upstream", || {
        coalescer.upstream().calls() == 1
    })
    .await;

    let follower = coalescer.clone();
    let follower = tokio::spawn(async move { follower.request().await });
    wait_until("the follower is queued", || {
        coalescer.pending_followers() == 1
    })
    .await;

    coalescer.upstream().open();

    let leader_err = leader.await.unwrap().unwrap_err();
    let follower_err = follower.await.unwrap().unwrap_err();

    assert!(leader_err.origins().is_empty());
    assert_eq!(follower_err.origins().len(), 1);
    assert!(
        follower_err.origins()[0]
            .location()
            .file()
            .ends_with("request_coalescer.rs")
    );
    assert_eq!(follower_err.description(), Some("boom"));
    assert!(
        follower_err
            .to_string()
            .contains("Awaited through continuation created @")
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn aborted_leader_fails_followers_and_frees_the_slot() {
    init_test_tracing();

    let coalescer = RequestCoalescer::new("abandoned", GatedUpstream::succeeding(5u64));

    let leader = coalescer.clone();
    let leader = tokio::spawn(async move { leader.request().await });
    wait_until("the leader starts the upstream", || {
        coalescer.upstream().calls() == 1
    })
    .await;

    let follower = coalescer.clone();
    let follower = tokio::spawn(async move { follower.request().await });
    wait_until("the follower is queued", || {
        coalescer.pending_followers() == 1
    })
    .await;

    leader.abort();
    assert!(leader.await.unwrap_err().is_cancelled());

    let err = follower.await.unwrap().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::LeaderAbandoned);
    assert!(!coalescer.is_busy());

    coalescer.upstream().open();
    assert_eq!(coalescer.request().await.unwrap(), 5);
    assert_eq!(coalescer.upstream().calls(), 2);
}

fn explode() -> CoalesceResult<u32> {
    panic!("upstream exploded");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn panicking_leader_fails_followers_and_frees_the_slot() {
    init_test_tracing();

    let gate = Arc::new(Notify::new());
    let upstream_gate = gate.clone();
    let coalescer = RequestCoalescer::new(
        "panicking",
        upstream_fn(move || {
            let gate = upstream_gate.clone();
            async move {
                gate.notified().await;
                explode()
            }
        }),
    );

    let leader = coalescer.clone();
    let leader = tokio::spawn(async move { leader.request().await });
    wait_until("the leader takes the slot", || coalescer.is_busy()).await;

    let follower = coalescer.clone();
    let follower = tokio::spawn(async move { follower.request().await });
    wait_until("the follower is queued", || {
        coalescer.pending_followers() == 1
    })
    .await;

    gate.notify_one();

    assert!(leader.await.unwrap_err().is_panic());
    let err = follower.await.unwrap().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::LeaderAbandoned);
    assert!(!coalescer.is_busy());
    assert_eq!(coalescer.pending_followers(), 0);
}

/// Payload that cannot be copied to followers.
#[derive(Debug)]
struct Uncloneable;

impl Clone for Uncloneable {
    fn clone(&self) -> Self {
        panic!("payload cannot be cloned");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn panic_while_handing_out_the_payload_fails_remaining_followers() {
    init_test_tracing();

    let gate = Arc::new(Notify::new());
    let upstream_gate = gate.clone();
    let coalescer = RequestCoalescer::new(
        "uncloneable",
        upstream_fn(move || {
            let gate = upstream_gate.clone();
            async move {
                gate.notified().await;
                Ok(Uncloneable)
            }
        }),
    );

    let leader = coalescer.clone();
    let leader = tokio::spawn(async move { leader.request().await });
    wait_until("the leader takes the slot", || coalescer.is_busy()).await;

    let mut followers = Vec::new();
    for position in 0..2 {
        let follower = coalescer.clone();
        followers.push(tokio::spawn(async move { follower.request().await }));

        wait_until("the follower is queued", || {
            coalescer.pending_followers() == position + 1
        })
        .await;
    }

    gate.notify_one();

    assert!(leader.await.unwrap_err().is_panic());
    for follower in followers {
        let outcome = timeout(DEFAULT_WAIT_TIMEOUT, follower)
            .await
            .expect("follower was never resumed");
        let err = outcome.unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::LeaderAbandoned);
        assert_eq!(err.origins().len(), 1);
    }
    assert!(!coalescer.is_busy());
    assert_eq!(coalescer.pending_followers(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn many_parallel_callers_elect_exactly_one_leader() {
    init_test_tracing();

    const CALLERS: usize = 32;

    let coalescer = RequestCoalescer::new("parallel", GatedUpstream::succeeding(json!([1, 2, 3])));

    let mut requests = JoinSet::new();
    for _ in 0..CALLERS {
        let caller = coalescer.clone();
        requests.spawn(async move { caller.request().await });
    }

    wait_until("every caller joined the generation", || {
        coalescer.pending_followers() == CALLERS - 1 && coalescer.upstream().calls() == 1
    })
    .await;

    coalescer.upstream().open();

    while let Some(result) = requests.join_next().await {
        assert_eq!(result.unwrap().unwrap(), json!([1, 2, 3]));
    }
    assert_eq!(coalescer.upstream().calls(), 1);
    assert_eq!(coalescer.generation(), 1);
}
