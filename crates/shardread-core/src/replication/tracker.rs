//! Result trackers
//!
//! A tracker observes the outcome of every instance in a fan-out and decides
//! when quorum has been reached or has become impossible. Instances are
//! identified by their position in [`ReplicationSet::instances`].
//!
//! Trackers are owned by the executor loop and updated through `&mut self`,
//! so worker tasks never touch them directly.
//!
//! [`ReplicationSet::instances`]: super::ReplicationSet::instances

use crate::context::RequestContext;
use crate::error::{Error, Result};
use crate::ring::InstanceDesc;
use std::collections::HashMap;

/// Quorum policy selected from a replication set's failure budget
#[derive(Debug)]
pub enum ResultTracker {
    /// Tolerates up to `max_errors` failing instances
    Default(DefaultResultTracker),
    /// Tolerates failures confined to `max_unavailable_zones` zones
    ZoneAware(ZoneAwareResultTracker),
}

impl ResultTracker {
    /// Select the policy for the given budgets.
    ///
    /// Fails when both budgets are non-zero; the combination has no defined
    /// meaning.
    pub fn new(
        ctx: &RequestContext,
        instances: &[InstanceDesc],
        max_errors: usize,
        max_unavailable_zones: usize,
    ) -> Result<Self> {
        if max_errors > 0 && max_unavailable_zones > 0 {
            return Err(Error::invalid_replication_set(format!(
                "max_errors ({max_errors}) and max_unavailable_zones ({max_unavailable_zones}) are mutually exclusive"
            )));
        }

        if max_unavailable_zones > 0 {
            Ok(Self::ZoneAware(ZoneAwareResultTracker::new(
                ctx,
                instances,
                max_unavailable_zones,
            )))
        } else {
            Ok(Self::Default(DefaultResultTracker::new(
                ctx, instances, max_errors,
            )))
        }
    }

    /// Record the terminal outcome of `instance`. Must be called at most once
    /// per instance.
    pub fn done(&mut self, instance: usize, err: Option<&Error>) {
        match self {
            Self::Default(t) => t.done(instance, err),
            Self::ZoneAware(t) => t.done(instance, err),
        }
    }

    /// Whether enough outcomes are in that the result is determined
    pub fn succeeded(&self) -> bool {
        match self {
            Self::Default(t) => t.succeeded(),
            Self::ZoneAware(t) => t.succeeded(),
        }
    }

    /// Whether quorum can no longer be reached
    pub fn failed(&self) -> bool {
        match self {
            Self::Default(t) => t.failed(),
            Self::ZoneAware(t) => t.failed(),
        }
    }

    /// Context the operation for `instance` should run under
    pub fn context_for(&self, instance: usize) -> RequestContext {
        match self {
            Self::Default(t) => t.context_for(instance),
            Self::ZoneAware(t) => t.context_for(instance),
        }
    }

    /// Whether the successful result from `instance` belongs in the quorum
    pub fn should_include_result_from(&self, instance: usize) -> bool {
        match self {
            Self::Default(t) => t.should_include_result_from(instance),
            Self::ZoneAware(t) => t.should_include_result_from(instance),
        }
    }

    /// Cancel the context handed to `instance`
    pub fn cancel_context_for(&self, instance: usize) {
        if let Self::ZoneAware(t) = self {
            t.cancel_context_for(instance);
        }
    }

    /// Cancel every per-instance context
    pub fn cancel_all_contexts(&self) {
        if let Self::ZoneAware(t) = self {
            t.cancel_all_contexts();
        }
    }
}

/// Error-budget policy: succeeds once `len - max_errors` instances succeeded,
/// fails on the `max_errors + 1`-th failure.
#[derive(Debug)]
pub struct DefaultResultTracker {
    min_succeeded: usize,
    num_succeeded: usize,
    num_errors: usize,
    max_errors: usize,
    ctx: RequestContext,
}

impl DefaultResultTracker {
    /// Create a tracker for `instances` tolerating `max_errors` failures
    pub fn new(ctx: &RequestContext, instances: &[InstanceDesc], max_errors: usize) -> Self {
        Self {
            min_succeeded: instances.len().saturating_sub(max_errors),
            num_succeeded: 0,
            num_errors: 0,
            max_errors,
            ctx: ctx.clone(),
        }
    }

    /// Record an outcome
    pub fn done(&mut self, _instance: usize, err: Option<&Error>) {
        if err.is_none() {
            self.num_succeeded += 1;
        } else {
            self.num_errors += 1;
        }
    }

    /// `succeeded >= len - max_errors`
    pub fn succeeded(&self) -> bool {
        self.num_succeeded >= self.min_succeeded
    }

    /// `errors > max_errors`
    pub fn failed(&self) -> bool {
        self.num_errors > self.max_errors
    }

    /// The shared fan-out context, unchanged
    pub fn context_for(&self, _instance: usize) -> RequestContext {
        self.ctx.clone()
    }

    /// Every successful result is kept
    pub fn should_include_result_from(&self, _instance: usize) -> bool {
        true
    }
}

/// Zone-aware policy.
///
/// A zone fails on the first error from any of its instances and succeeds
/// once all of its instances succeeded. The first `zones -
/// max_unavailable_zones` zones to succeed form the quorum; results from
/// zones that succeed later are excluded so the returned set does not depend
/// on how many extra zones happened to finish in time.
#[derive(Debug)]
pub struct ZoneAwareResultTracker {
    /// Zone of each instance, by position
    instance_zones: Vec<String>,
    waiting_by_zone: HashMap<String, usize>,
    failures_by_zone: HashMap<String, usize>,
    /// Zones that fully succeeded, in completion order, capped at the quorum
    selected_zones: Vec<String>,
    min_successful_zones: usize,
    max_unavailable_zones: usize,
    contexts: Vec<RequestContext>,
}

impl ZoneAwareResultTracker {
    /// Create a tracker for `instances` tolerating failures in
    /// `max_unavailable_zones` zones
    pub fn new(
        ctx: &RequestContext,
        instances: &[InstanceDesc],
        max_unavailable_zones: usize,
    ) -> Self {
        let mut waiting_by_zone: HashMap<String, usize> = HashMap::new();
        for instance in instances {
            *waiting_by_zone.entry(instance.zone.clone()).or_default() += 1;
        }

        Self {
            instance_zones: instances.iter().map(|i| i.zone.clone()).collect(),
            min_successful_zones: waiting_by_zone.len().saturating_sub(max_unavailable_zones),
            waiting_by_zone,
            failures_by_zone: HashMap::new(),
            selected_zones: Vec::new(),
            max_unavailable_zones,
            contexts: instances.iter().map(|_| ctx.child()).collect(),
        }
    }

    /// Record an outcome. The first failure in a zone cancels the contexts of
    /// every instance in that zone.
    pub fn done(&mut self, instance: usize, err: Option<&Error>) {
        let zone = &self.instance_zones[instance];

        let waiting = self.waiting_by_zone.entry(zone.clone()).or_default();
        *waiting = waiting.saturating_sub(1);
        let zone_drained = *waiting == 0;

        if err.is_some() {
            let failures = self.failures_by_zone.entry(zone.clone()).or_default();
            *failures += 1;
            if *failures == 1 {
                tracing::debug!("Zone {} failed, cancelling its remaining requests", zone);
                self.cancel_zone(zone);
            }
            return;
        }

        if zone_drained
            && !self.failures_by_zone.contains_key(zone)
            && self.selected_zones.len() < self.min_successful_zones
        {
            self.selected_zones.push(zone.clone());
        }
    }

    /// Enough zones fully succeeded
    pub fn succeeded(&self) -> bool {
        self.selected_zones.len() >= self.min_successful_zones
    }

    /// More than `max_unavailable_zones` zones saw a failure
    pub fn failed(&self) -> bool {
        self.failures_by_zone.len() > self.max_unavailable_zones
    }

    /// Per-instance child of the fan-out context
    pub fn context_for(&self, instance: usize) -> RequestContext {
        self.contexts[instance].clone()
    }

    /// Only instances from the selected zones
    pub fn should_include_result_from(&self, instance: usize) -> bool {
        let zone = &self.instance_zones[instance];
        self.selected_zones.iter().any(|z| z == zone)
    }

    /// Cancel the context handed to `instance`
    pub fn cancel_context_for(&self, instance: usize) {
        self.contexts[instance].cancel();
    }

    /// Cancel every per-instance context
    pub fn cancel_all_contexts(&self) {
        for ctx in &self.contexts {
            ctx.cancel();
        }
    }

    /// Zones that form the quorum, in completion order
    pub fn selected_zones(&self) -> &[String] {
        &self.selected_zones
    }

    fn cancel_zone(&self, zone: &str) {
        for (ctx, instance_zone) in self.contexts.iter().zip(&self.instance_zones) {
            if instance_zone == zone {
                ctx.cancel();
            }
        }
    }
}
