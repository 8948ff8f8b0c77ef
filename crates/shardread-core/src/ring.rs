//! Ring instance descriptors
//!
//! Instances are owned by the ring membership service. The replication core
//! only reads `addr` and `zone`; the remaining fields take part in replication
//! set comparison.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a ring member
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceState {
    /// Registered, has not claimed tokens yet
    Pending,
    /// Claiming tokens and receiving data
    Joining,
    /// Serving reads and writes
    #[default]
    Active,
    /// Handing data off before shutdown
    Leaving,
    /// Gone from the ring
    Left,
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InstanceState::Pending => "PENDING",
            InstanceState::Joining => "JOINING",
            InstanceState::Active => "ACTIVE",
            InstanceState::Leaving => "LEAVING",
            InstanceState::Left => "LEFT",
        };
        f.write_str(s)
    }
}

/// A replica as seen through the ring
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceDesc {
    /// Stable instance identifier
    pub id: String,
    /// Address requests are sent to
    pub addr: String,
    /// Failure domain label; empty when zone-awareness is not used
    #[serde(default)]
    pub zone: String,
    /// Lifecycle state
    #[serde(default)]
    pub state: InstanceState,
    /// Last heartbeat, unix seconds
    #[serde(default)]
    pub timestamp: i64,
    /// First registration, unix seconds
    #[serde(default)]
    pub registered_timestamp: i64,
    /// Ring tokens owned by the instance
    #[serde(default)]
    pub tokens: Vec<u32>,
}

impl InstanceDesc {
    /// Create an active instance with the given identity, address and zone
    pub fn new(id: impl Into<String>, addr: impl Into<String>, zone: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            addr: addr.into(),
            zone: zone.into(),
            ..Default::default()
        }
    }

    /// Set the lifecycle state
    pub fn with_state(mut self, state: InstanceState) -> Self {
        self.state = state;
        self
    }

    /// Set the owned tokens
    pub fn with_tokens(mut self, tokens: Vec<u32>) -> Self {
        self.tokens = tokens;
        self
    }
}
