//! Fan-out execution over a replication set
//!
//! Both modes spawn one task per instance and feed outcomes into a
//! [`ResultTracker`] until it reports success or failure:
//!
//! - [`ReplicationSet::do_all`] returns every successful result collected by
//!   the time quorum was reached and supports hedged requests.
//! - [`ReplicationSet::do_until_quorum`] returns the minimal quorum and hands
//!   every other successful result to a cleanup callback, including results
//!   that arrive after it has returned.

use super::set::ReplicationSet;
use super::tracker::ResultTracker;
use crate::context::RequestContext;
use crate::error::{Error, Result};
use crate::ring::InstanceDesc;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Semaphore, mpsc};

/// Outcome of one instance, keyed by its position in the set
struct InstanceResult<T> {
    instance: usize,
    result: Result<T>,
}

impl ReplicationSet {
    /// Run `f` against every instance in parallel and return all successful
    /// results once the quorum policy is satisfied.
    ///
    /// With a non-zero `delay` and zone-awareness disabled, the last
    /// `max_errors` instances are only called after `delay`; each tolerated
    /// failure releases one of them immediately. As soon as quorum becomes
    /// impossible the most recent error is returned and every in-flight
    /// call is cancelled. Results are in completion order.
    ///
    /// Results that carry resources must go through
    /// [`do_until_quorum`](Self::do_until_quorum) instead: extra results
    /// produced after this returns are dropped.
    pub async fn do_all<T, F, Fut>(
        &self,
        ctx: &RequestContext,
        delay: Duration,
        f: F,
    ) -> Result<Vec<T>>
    where
        T: Send + 'static,
        F: Fn(RequestContext, InstanceDesc) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
    {
        let mut tracker = ResultTracker::new(
            ctx,
            &self.instances,
            self.max_errors,
            self.max_unavailable_zones,
        )?;

        let n = self.instances.len();
        let ctx = ctx.child();
        let _cancel = ctx.cancel_on_drop();

        // Hedging only makes sense against an instance error budget.
        let hedging = !delay.is_zero() && !self.is_zone_aware();
        let delayed_from = n.saturating_sub(self.max_errors);
        let force_start = Arc::new(Semaphore::new(0));

        let f = Arc::new(f);
        let (tx, mut rx) = mpsc::channel(n.max(1));

        for (i, instance) in self.instances.iter().enumerate() {
            let ctx = ctx.clone();
            let f = Arc::clone(&f);
            let tx = tx.clone();
            let force_start = Arc::clone(&force_start);
            let instance = instance.clone();
            let delayed = hedging && i >= delayed_from;

            tokio::spawn(async move {
                if delayed {
                    tokio::select! {
                        _ = ctx.done() => return,
                        permit = force_start.acquire() => {
                            if let Ok(permit) = permit {
                                permit.forget();
                            }
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }

                let result = (*f)(ctx, instance).await;
                let _ = tx.send(InstanceResult { instance: i, result }).await;
            });
        }
        drop(tx);

        let mut results = Vec::with_capacity(n);

        while !tracker.succeeded() {
            tokio::select! {
                received = rx.recv() => {
                    let Some(InstanceResult { instance, result }) = received else {
                        // Delayed tasks exit without reporting once the context is done.
                        return Err(ctx
                            .err()
                            .unwrap_or_else(|| Error::internal("fan-out tasks exited before quorum was reached")));
                    };

                    match result {
                        Ok(value) => {
                            tracker.done(instance, None);
                            results.push(value);
                        }
                        Err(err) => {
                            tracker.done(instance, Some(&err));
                            if tracker.failed() {
                                tracing::debug!(
                                    "Quorum failed after error from {}: {}",
                                    self.instances[instance].addr,
                                    err
                                );
                                return Err(err);
                            }

                            if hedging {
                                force_start.add_permits(1);
                            }
                        }
                    }
                }
                _ = ctx.done() => {
                    return Err(ctx.err().unwrap_or(Error::Cancelled));
                }
            }
        }

        tracing::debug!(
            "Quorum reached with {} of {} results",
            results.len(),
            n
        );
        Ok(results)
    }

    /// Run `f` against every instance in parallel and return the minimal set
    /// of results that satisfies the quorum policy.
    ///
    /// Every successful result not returned is passed to `cleanup` exactly
    /// once: results outside the quorum, results collected before a failure
    /// or cancellation, and results that arrive after this function has
    /// returned (those are drained by a background task). Each call to `f`
    /// gets the tracker's context for that instance, which is cancelled when
    /// the result will not be used.
    pub async fn do_until_quorum<T, F, Fut, C>(
        &self,
        ctx: &RequestContext,
        f: F,
        cleanup: C,
    ) -> Result<Vec<T>>
    where
        T: Send + 'static,
        F: Fn(RequestContext, InstanceDesc) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T>> + Send + 'static,
        C: Fn(T) + Send + Sync + 'static,
    {
        let mut tracker = ResultTracker::new(
            ctx,
            &self.instances,
            self.max_errors,
            self.max_unavailable_zones,
        )?;

        let n = self.instances.len();
        let f = Arc::new(f);
        let (tx, rx) = mpsc::channel(n.max(1));

        for (i, instance) in self.instances.iter().enumerate() {
            let instance_ctx = tracker.context_for(i);
            let f = Arc::clone(&f);
            let tx = tx.clone();
            let instance = instance.clone();

            tokio::spawn(async move {
                let result = (*f)(instance_ctx, instance).await;
                let _ = tx.send(InstanceResult { instance: i, result }).await;
            });
        }
        drop(tx);

        let mut pending = PendingResults::new(rx, n, Arc::new(cleanup));

        while !tracker.succeeded() {
            tokio::select! {
                _ = ctx.done() => {
                    // Instance contexts inherit the cancellation from ctx.
                    tracing::debug!(
                        "Request cancelled before quorum, {} results outstanding",
                        pending.remaining
                    );
                    return Err(ctx.err().unwrap_or(Error::Cancelled));
                }
                received = pending.recv() => {
                    let Some(InstanceResult { instance, result }) = received else {
                        return Err(ctx
                            .err()
                            .unwrap_or_else(|| Error::internal("fan-out tasks exited before quorum was reached")));
                    };

                    match result {
                        Ok(value) => {
                            tracker.done(instance, None);
                            pending.received.insert(instance, value);
                        }
                        Err(err) => {
                            tracker.done(instance, Some(&err));
                            if tracker.failed() {
                                tracing::debug!(
                                    "Quorum failed after error from {}: {}",
                                    self.instances[instance].addr,
                                    err
                                );
                                tracker.cancel_all_contexts();
                                return Err(err);
                            }
                        }
                    }
                }
            }
        }

        let mut results = Vec::with_capacity(n);

        for instance in 0..n {
            match pending.received.remove(&instance) {
                Some(value) if tracker.should_include_result_from(instance) => {
                    results.push(value);
                }
                Some(value) => {
                    tracker.cancel_context_for(instance);
                    (*pending.cleanup)(value);
                }
                // Cleaned up by the drain once it arrives.
                None => tracker.cancel_context_for(instance),
            }
        }

        Ok(results)
    }
}

/// Results received so far plus the channel still owed the rest.
///
/// Dropping it cleans up whatever was received and, if instances have not all
/// reported, spawns a task that drains the channel and cleans up late
/// successes. This covers every return path, including the caller dropping
/// the future mid-flight.
struct PendingResults<T, C>
where
    T: Send + 'static,
    C: Fn(T) + Send + Sync + 'static,
{
    rx: Option<mpsc::Receiver<InstanceResult<T>>>,
    remaining: usize,
    received: HashMap<usize, T>,
    cleanup: Arc<C>,
}

impl<T, C> PendingResults<T, C>
where
    T: Send + 'static,
    C: Fn(T) + Send + Sync + 'static,
{
    fn new(rx: mpsc::Receiver<InstanceResult<T>>, remaining: usize, cleanup: Arc<C>) -> Self {
        Self {
            rx: Some(rx),
            remaining,
            received: HashMap::with_capacity(remaining),
            cleanup,
        }
    }

    async fn recv(&mut self) -> Option<InstanceResult<T>> {
        let received = self.rx.as_mut()?.recv().await;
        if received.is_some() {
            self.remaining -= 1;
        }
        received
    }
}

impl<T, C> Drop for PendingResults<T, C>
where
    T: Send + 'static,
    C: Fn(T) + Send + Sync + 'static,
{
    fn drop(&mut self) {
        for (_, value) in self.received.drain() {
            (*self.cleanup)(value);
        }

        let Some(mut rx) = self.rx.take() else {
            return;
        };
        if self.remaining == 0 {
            return;
        }

        let remaining = self.remaining;
        let cleanup = Arc::clone(&self.cleanup);

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    let mut cleaned = 0;
                    while let Some(InstanceResult { result, .. }) = rx.recv().await {
                        if let Ok(value) = result {
                            (*cleanup)(value);
                            cleaned += 1;
                        }
                    }
                    tracing::debug!(
                        "Drained {} late results, {} cleaned up",
                        remaining,
                        cleaned
                    );
                });
            }
            Err(_) => {
                tracing::warn!(
                    "No runtime to drain {} outstanding fan-out results; they will not be cleaned up",
                    remaining
                );
            }
        }
    }
}
