//! Replication sets

use crate::error::{Error, Result};
use crate::ring::{InstanceDesc, InstanceState};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// The instances to talk to for a given key, and how many failures to
/// tolerate.
///
/// `max_errors` and `max_unavailable_zones` are mutually exclusive: the
/// non-zero one selects the quorum policy. Both zero means every instance
/// must succeed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationSet {
    /// Candidate instances, in ring order
    pub instances: Vec<InstanceDesc>,
    /// Maximum number of tolerated failing instances
    #[serde(default)]
    pub max_errors: usize,
    /// Maximum number of zones in which instances may fail
    #[serde(default)]
    pub max_unavailable_zones: usize,
}

impl ReplicationSet {
    /// Create a replication set with explicit failure budgets
    pub fn new(
        instances: Vec<InstanceDesc>,
        max_errors: usize,
        max_unavailable_zones: usize,
    ) -> Self {
        Self {
            instances,
            max_errors,
            max_unavailable_zones,
        }
    }

    /// Create a replication set requiring a majority quorum, either of
    /// instances or, with zone-awareness, of zones
    pub fn with_quorum(instances: Vec<InstanceDesc>, zone_awareness_enabled: bool) -> Self {
        let mut set = Self::new(instances, 0, 0);
        if zone_awareness_enabled {
            let zones = set.zone_count();
            set.max_unavailable_zones = zones.saturating_sub(zones / 2 + 1);
        } else {
            let n = set.instances.len();
            set.max_errors = n.saturating_sub(n / 2 + 1);
        }
        set
    }

    /// Check that the failure budgets can be executed
    pub fn validate(&self) -> Result<()> {
        if self.max_errors > 0 && self.max_unavailable_zones > 0 {
            return Err(Error::invalid_replication_set(
                "max_errors and max_unavailable_zones are mutually exclusive",
            ));
        }
        Ok(())
    }

    /// Whether zone-aware quorum applies
    pub fn is_zone_aware(&self) -> bool {
        self.max_unavailable_zones > 0
    }

    /// Whether the set includes the instance with the given address
    pub fn includes(&self, addr: &str) -> bool {
        self.instances.iter().any(|i| i.addr == addr)
    }

    /// Addresses of all instances
    pub fn addresses(&self) -> Vec<String> {
        self.instances.iter().map(|i| i.addr.clone()).collect()
    }

    /// Addresses of all instances except `exclude`
    pub fn addresses_without(&self, exclude: &str) -> Vec<String> {
        self.instances
            .iter()
            .filter(|i| i.addr != exclude)
            .map(|i| i.addr.clone())
            .collect()
    }

    /// Number of distinct zones among the instances
    pub fn zone_count(&self) -> usize {
        self.instances
            .iter()
            .map(|i| i.zone.as_str())
            .collect::<HashSet<_>>()
            .len()
    }
}

/// Whether two replication sets differ in anything other than heartbeat
/// timestamps.
pub fn has_replication_set_changed(before: &ReplicationSet, after: &ReplicationSet) -> bool {
    changed_excluding(before, after, |i| i.timestamp = 0)
}

/// Whether two replication sets differ in anything other than heartbeat
/// timestamps and instance states.
pub fn has_replication_set_changed_without_state(
    before: &ReplicationSet,
    after: &ReplicationSet,
) -> bool {
    changed_excluding(before, after, |i| {
        i.timestamp = 0;
        i.state = InstanceState::Pending;
    })
}

fn changed_excluding(
    before: &ReplicationSet,
    after: &ReplicationSet,
    exclude: impl Fn(&mut InstanceDesc),
) -> bool {
    if before.instances.len() != after.instances.len() {
        return true;
    }

    let normalize = |set: &ReplicationSet| {
        let mut instances = set.instances.clone();
        instances.sort_by(|a, b| a.addr.cmp(&b.addr));
        instances.iter_mut().for_each(&exclude);
        instances
    };

    normalize(before) != normalize(after)
}
