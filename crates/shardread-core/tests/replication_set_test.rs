//! Replicated fan-out integration tests
//!
//! Runs both execution modes against simulated replicas on tokio's paused
//! clock:
//! - Error-budget and zone-aware quorum
//! - Hedged requests
//! - Early failure and outer cancellation
//! - Cleanup of results that are not returned

mod common;

use common::{Behaviour, Replicas, instance, settle, sorted};
use shardread_core::{Error, ReplicationSet, RequestContext};
use std::time::Duration;
use tokio::time::Instant;

fn zoned_set() -> Vec<shardread_core::InstanceDesc> {
    vec![
        instance("a1", "zone-a"),
        instance("a2", "zone-a"),
        instance("b1", "zone-b"),
        instance("b2", "zone-b"),
        instance("c1", "zone-c"),
        instance("c2", "zone-c"),
    ]
}

/// One instance fails early, the other two succeed: the budget absorbs it
#[tokio::test(start_paused = true)]
async fn test_do_all_tolerates_max_errors() {
    let (a, b, c) = (instance("a", ""), instance("b", ""), instance("c", ""));
    let replicas = Replicas::new(&[
        (&a, Behaviour::succeed(50)),
        (&b, Behaviour::fail(10)),
        (&c, Behaviour::succeed(50)),
    ]);
    let set = ReplicationSet::new(vec![a, b, c], 1, 0);

    let results = set
        .do_all(&RequestContext::background(), Duration::ZERO, replicas.operation())
        .await
        .unwrap();

    assert_eq!(sorted(results), ["a", "c"]);
}

/// The second failure ends the call without waiting for the slow replica
#[tokio::test(start_paused = true)]
async fn test_do_all_fails_fast() {
    let (a, b, c) = (instance("a", ""), instance("b", ""), instance("c", ""));
    let replicas = Replicas::new(&[
        (&a, Behaviour::fail(10)),
        (&b, Behaviour::fail(20)),
        (&c, Behaviour::succeed(1_000)),
    ]);
    let set = ReplicationSet::new(vec![a, b, c], 1, 0);

    let start = Instant::now();
    let err = set
        .do_all(&RequestContext::background(), Duration::ZERO, replicas.operation())
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Instance { ref addr, .. } if addr == "b"));
    assert!(start.elapsed() < Duration::from_millis(100));

    // The slow replica observes the fan-out being cancelled.
    settle().await;
    assert_eq!(replicas.cancelled(), ["c"]);
}

#[tokio::test(start_paused = true)]
async fn test_do_all_requires_all_without_budget() {
    let (a, b) = (instance("a", ""), instance("b", ""));
    let replicas = Replicas::new(&[(&a, Behaviour::succeed(10)), (&b, Behaviour::fail(20))]);
    let set = ReplicationSet::new(vec![a, b], 0, 0);

    let result = set
        .do_all(&RequestContext::background(), Duration::ZERO, replicas.operation())
        .await;
    assert!(result.is_err());
}

/// Hedged replicas are never called when the others answer within the delay
#[tokio::test(start_paused = true)]
async fn test_do_all_hedged_request_not_sent() {
    let (a, b, c) = (instance("a", ""), instance("b", ""), instance("c", ""));
    let replicas = Replicas::new(&[
        (&a, Behaviour::succeed(10)),
        (&b, Behaviour::succeed(10)),
        (&c, Behaviour::succeed(10)),
    ]);
    let set = ReplicationSet::new(vec![a, b, c], 1, 0);

    let results = set
        .do_all(
            &RequestContext::background(),
            Duration::from_millis(100),
            replicas.operation(),
        )
        .await
        .unwrap();
    assert_eq!(sorted(results), ["a", "b"]);

    settle().await;
    assert_eq!(replicas.calls(), 2);
}

/// A failure releases the hedged replica before the delay elapses
#[tokio::test(start_paused = true)]
async fn test_do_all_failure_releases_hedged_request() {
    let (a, b, c) = (instance("a", ""), instance("b", ""), instance("c", ""));
    let replicas = Replicas::new(&[
        (&a, Behaviour::fail(10)),
        (&b, Behaviour::succeed(10)),
        (&c, Behaviour::succeed(10)),
    ]);
    let set = ReplicationSet::new(vec![a, b, c], 1, 0);

    let start = Instant::now();
    let results = set
        .do_all(
            &RequestContext::background(),
            Duration::from_millis(100),
            replicas.operation(),
        )
        .await
        .unwrap();

    assert_eq!(sorted(results), ["b", "c"]);
    assert!(start.elapsed() < Duration::from_millis(100));
}

/// The hedged replica still starts once the delay elapses
#[tokio::test(start_paused = true)]
async fn test_do_all_hedged_request_after_delay() {
    let (a, b, c) = (instance("a", ""), instance("b", ""), instance("c", ""));
    let replicas = Replicas::new(&[
        (&a, Behaviour::succeed(10)),
        (&b, Behaviour::succeed(500)),
        (&c, Behaviour::succeed(10)),
    ]);
    let set = ReplicationSet::new(vec![a, b, c], 1, 0);

    let start = Instant::now();
    let results = set
        .do_all(
            &RequestContext::background(),
            Duration::from_millis(100),
            replicas.operation(),
        )
        .await
        .unwrap();

    assert_eq!(sorted(results), ["a", "c"]);
    let elapsed = start.elapsed();
    assert!(elapsed >= Duration::from_millis(110));
    assert!(elapsed < Duration::from_millis(500));
}

#[tokio::test(start_paused = true)]
async fn test_do_all_deadline() {
    let (a, b) = (instance("a", ""), instance("b", ""));
    let replicas = Replicas::new(&[
        (&a, Behaviour::succeed(1_000)),
        (&b, Behaviour::succeed(1_000)),
    ]);
    let set = ReplicationSet::new(vec![a, b], 1, 0);
    let ctx = RequestContext::background().with_timeout(Duration::from_millis(30));

    let err = set
        .do_all(&ctx, Duration::ZERO, replicas.operation())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::DeadlineExceeded));
}

/// Cancelling while a hedged request still waits on its delay reports the
/// cancellation, whichever way the hedged task and the loop race
#[tokio::test(start_paused = true)]
async fn test_do_all_cancelled_during_hedging_delay() {
    for _ in 0..50 {
        let (a, b) = (instance("a", ""), instance("b", ""));
        let replicas = Replicas::new(&[
            (&a, Behaviour::succeed(500)),
            (&b, Behaviour::succeed(500)),
        ]);
        let set = ReplicationSet::new(vec![a, b], 1, 0);

        let ctx = RequestContext::background();
        let canceller = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            canceller.cancel();
        });

        let err = set
            .do_all(&ctx, Duration::from_millis(100), replicas.operation())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled), "unexpected error: {err}");

        settle().await;
        assert_eq!(replicas.finished(), replicas.calls());
    }
}

#[tokio::test(start_paused = true)]
async fn test_do_all_zone_aware() {
    let instances = zoned_set();
    let plan: Vec<_> = instances
        .iter()
        .map(|i| {
            let behaviour = if i.zone == "zone-b" {
                Behaviour::fail(10)
            } else {
                Behaviour::succeed(20)
            };
            (i, behaviour)
        })
        .collect();
    let replicas = Replicas::new(&plan);
    let set = ReplicationSet::new(instances, 0, 1);

    let results = set
        .do_all(&RequestContext::background(), Duration::ZERO, replicas.operation())
        .await
        .unwrap();
    assert_eq!(sorted(results), ["a1", "a2", "c1", "c2"]);
}

#[tokio::test]
async fn test_invalid_replication_set_rejected() {
    let (a, b) = (instance("a", "zone-a"), instance("b", "zone-b"));
    let replicas = Replicas::new(&[(&a, Behaviour::succeed(1)), (&b, Behaviour::succeed(1))]);
    let set = ReplicationSet::new(vec![a, b], 1, 1);
    let ctx = RequestContext::background();

    let err = set
        .do_all(&ctx, Duration::ZERO, replicas.operation())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidReplicationSet(_)));

    let err = set
        .do_until_quorum(&ctx, replicas.operation(), replicas.cleanup())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidReplicationSet(_)));
    assert_eq!(replicas.calls(), 0);
}

#[tokio::test]
async fn test_empty_replication_set() {
    let replicas = Replicas::new(&[]);
    let set = ReplicationSet::default();
    let ctx = RequestContext::background();

    let results = set
        .do_until_quorum(&ctx, replicas.operation(), replicas.cleanup())
        .await
        .unwrap();
    assert!(results.is_empty());
}

/// Only the first `n - max_errors` results are returned, the rest are cleaned
#[tokio::test(start_paused = true)]
async fn test_do_until_quorum_minimal_results() {
    let instances: Vec<_> = (1..=6).map(|i| instance(&format!("i{i}"), "")).collect();
    let plan: Vec<_> = instances
        .iter()
        .enumerate()
        .map(|(n, i)| (i, Behaviour::succeed(10 * (n as u64 + 1)).stubborn()))
        .collect();
    let replicas = Replicas::new(&plan);
    let set = ReplicationSet::new(instances, 2, 0);

    let results = set
        .do_until_quorum(
            &RequestContext::background(),
            replicas.operation(),
            replicas.cleanup(),
        )
        .await
        .unwrap();
    assert_eq!(sorted(results), ["i1", "i2", "i3", "i4"]);
    assert!(replicas.cleaned().is_empty());

    settle().await;
    assert_eq!(replicas.cleaned(), ["i5", "i6"]);
}

/// Zone b fails: only zones a and c are returned, and b's early success is
/// cleaned up before the call returns
#[tokio::test(start_paused = true)]
async fn test_do_until_quorum_zone_failure() {
    let instances = zoned_set();
    let replicas = Replicas::new(&[
        (&instances[0], Behaviour::succeed(20)),
        (&instances[1], Behaviour::succeed(20)),
        (&instances[2], Behaviour::succeed(5)),
        (&instances[3], Behaviour::fail(10)),
        (&instances[4], Behaviour::succeed(20)),
        (&instances[5], Behaviour::succeed(20)),
    ]);
    let set = ReplicationSet::new(instances, 0, 1);

    let results = set
        .do_until_quorum(
            &RequestContext::background(),
            replicas.operation(),
            replicas.cleanup(),
        )
        .await
        .unwrap();

    assert_eq!(sorted(results), ["a1", "a2", "c1", "c2"]);
    assert_eq!(replicas.cleaned(), ["b1"]);
}

/// The first failure in a zone cancels the zone's other requests
#[tokio::test(start_paused = true)]
async fn test_do_until_quorum_cancels_failed_zone() {
    let instances = zoned_set();
    let replicas = Replicas::new(&[
        (&instances[0], Behaviour::succeed(20)),
        (&instances[1], Behaviour::succeed(20)),
        (&instances[2], Behaviour::fail(5)),
        (&instances[3], Behaviour::succeed(1_000)),
        (&instances[4], Behaviour::succeed(20)),
        (&instances[5], Behaviour::succeed(20)),
    ]);
    let set = ReplicationSet::new(instances, 0, 1);

    let start = Instant::now();
    let results = set
        .do_until_quorum(
            &RequestContext::background(),
            replicas.operation(),
            replicas.cleanup(),
        )
        .await
        .unwrap();

    assert_eq!(sorted(results), ["a1", "a2", "c1", "c2"]);
    assert!(start.elapsed() < Duration::from_millis(100));
    assert_eq!(replicas.cancelled(), ["b2"]);
}

/// A zone finishing after quorum is excluded even though it succeeded
#[tokio::test(start_paused = true)]
async fn test_do_until_quorum_excludes_late_zone() {
    let instances = zoned_set();
    let replicas = Replicas::new(&[
        (&instances[0], Behaviour::succeed(10)),
        (&instances[1], Behaviour::succeed(10)),
        (&instances[2], Behaviour::succeed(20)),
        (&instances[3], Behaviour::succeed(20)),
        (&instances[4], Behaviour::succeed(5)),
        (&instances[5], Behaviour::succeed(30).stubborn()),
    ]);
    let set = ReplicationSet::new(instances, 0, 1);

    let results = set
        .do_until_quorum(
            &RequestContext::background(),
            replicas.operation(),
            replicas.cleanup(),
        )
        .await
        .unwrap();

    assert_eq!(sorted(results), ["a1", "a2", "b1", "b2"]);
    assert_eq!(replicas.cleaned(), ["c1"]);

    settle().await;
    assert_eq!(replicas.cleaned(), ["c1", "c2"]);
}

/// Results gathered before quorum failed are cleaned before returning
#[tokio::test(start_paused = true)]
async fn test_do_until_quorum_failure_cleans_up() {
    let (a, b, c) = (instance("a", ""), instance("b", ""), instance("c", ""));
    let replicas = Replicas::new(&[
        (&a, Behaviour::succeed(5)),
        (&b, Behaviour::fail(10)),
        (&c, Behaviour::fail(20)),
    ]);
    let set = ReplicationSet::new(vec![a, b, c], 1, 0);

    let err = set
        .do_until_quorum(
            &RequestContext::background(),
            replicas.operation(),
            replicas.cleanup(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Instance { ref addr, .. } if addr == "c"));
    assert_eq!(replicas.cleaned(), ["a"]);
}

/// Cancelling the outer context returns its error; late results are cleaned
/// once they arrive
#[tokio::test(start_paused = true)]
async fn test_do_until_quorum_outer_cancellation() {
    let (a, b, c) = (instance("a", ""), instance("b", ""), instance("c", ""));
    let replicas = Replicas::new(&[
        (&a, Behaviour::succeed(50).stubborn()),
        (&b, Behaviour::succeed(60).stubborn()),
        (&c, Behaviour::succeed(70).stubborn()),
    ]);
    let set = ReplicationSet::new(vec![a, b, c], 1, 0);

    let ctx = RequestContext::background();
    let canceller = ctx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        canceller.cancel();
    });

    let err = set
        .do_until_quorum(&ctx, replicas.operation(), replicas.cleanup())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Cancelled));
    assert!(replicas.cleaned().is_empty());

    settle().await;
    assert_eq!(replicas.finished(), 3);
    assert_eq!(replicas.cleaned(), ["a", "b", "c"]);
}

/// Dropping the call mid-flight still cleans up everything
#[tokio::test(start_paused = true)]
async fn test_do_until_quorum_dropped_future() {
    let (a, b, c) = (instance("a", ""), instance("b", ""), instance("c", ""));
    let replicas = Replicas::new(&[
        (&a, Behaviour::succeed(5)),
        (&b, Behaviour::succeed(500).stubborn()),
        (&c, Behaviour::succeed(600).stubborn()),
    ]);
    let set = ReplicationSet::new(vec![a, b, c], 0, 0);

    let ctx = RequestContext::background();
    let call = set.do_until_quorum(&ctx, replicas.operation(), replicas.cleanup());
    let timed_out = tokio::time::timeout(Duration::from_millis(50), call).await;
    assert!(timed_out.is_err());
    assert_eq!(replicas.cleaned(), ["a"]);

    settle().await;
    assert_eq!(replicas.cleaned(), ["a", "b", "c"]);
}
