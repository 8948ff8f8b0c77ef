//! Scenario files
//!
//! A scenario describes a replication set and how each replica behaves:
//!
//! ```toml
//! max_errors = 1
//!
//! [querier]
//! streaming_buffer_size = 64
//!
//! [[replicas]]
//! id = "ingester-1"
//! addr = "10.0.0.1:9095"
//! zone = "zone-a"
//! latency_ms = 20
//! jitter_ms = 5
//! failure_rate = 0.1
//! ```

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use shardread_core::{InstanceDesc, QuerierConfig, ReplicationSet};
use std::path::Path;

/// A replication set plus the behaviour of each replica
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scenario {
    /// Querier settings
    #[serde(default)]
    pub querier: QuerierConfig,
    /// Explicit instance error budget
    #[serde(default)]
    pub max_errors: Option<usize>,
    /// Explicit zone failure budget
    #[serde(default)]
    pub max_unavailable_zones: Option<usize>,
    /// Replicas, in ring order
    pub replicas: Vec<ReplicaSpec>,
}

/// One simulated replica
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicaSpec {
    #[serde(flatten)]
    pub instance: InstanceDesc,
    /// Base response latency
    #[serde(default)]
    pub latency_ms: u64,
    /// Upper bound of random extra latency
    #[serde(default)]
    pub jitter_ms: u64,
    /// Probability that a call fails, 0.0 to 1.0
    #[serde(default)]
    pub failure_rate: f64,
    /// Keep working after the request is cancelled
    #[serde(default)]
    pub ignore_cancel: bool,
}

impl Scenario {
    /// Load and validate a scenario file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read scenario {}", path.display()))?;
        let scenario = Self::parse(&content)
            .with_context(|| format!("Invalid scenario {}", path.display()))?;
        tracing::debug!(
            "Loaded scenario {} with {} replicas",
            path.display(),
            scenario.replicas.len()
        );
        Ok(scenario)
    }

    /// Parse and validate a scenario
    pub fn parse(content: &str) -> Result<Self> {
        let scenario: Self = toml::from_str(content)?;
        scenario.validate()?;
        Ok(scenario)
    }

    fn validate(&self) -> Result<()> {
        self.querier.validate()?;

        if self.replicas.is_empty() {
            bail!("scenario has no replicas");
        }

        for replica in &self.replicas {
            if replica.instance.addr.is_empty() {
                bail!("replica {} has no address", replica.instance.id);
            }
            if !(0.0..=1.0).contains(&replica.failure_rate) {
                bail!(
                    "replica {} has failure_rate {} outside [0, 1]",
                    replica.instance.addr,
                    replica.failure_rate
                );
            }
        }

        Ok(())
    }

    /// The replication set to query. Without explicit budgets a majority
    /// quorum is used, of zones when zone-awareness is enabled.
    pub fn replication_set(&self) -> ReplicationSet {
        let instances = self.replicas.iter().map(|r| r.instance.clone()).collect();

        if self.max_errors.is_none() && self.max_unavailable_zones.is_none() {
            return ReplicationSet::with_quorum(instances, self.querier.zone_awareness_enabled);
        }

        ReplicationSet::new(
            instances,
            self.max_errors.unwrap_or(0),
            self.max_unavailable_zones.unwrap_or(0),
        )
    }
}
