//! Replicated request execution
//!
//! Reads are never served by a single replica. A [`ReplicationSet`] names
//! the replicas of a shard and a failure budget; the executor fans a request
//! out to every replica and returns as soon as the budget's quorum is met.
//!
//! # Quorum Policies
//!
//! - **Error budget** (`max_errors`): succeed once `n - max_errors`
//!   instances answered, fail on the `max_errors + 1`-th failure
//! - **Zone-aware** (`max_unavailable_zones`): a zone fails on its first
//!   error and succeeds once all its instances answered; succeed once
//!   `zones - max_unavailable_zones` zones succeeded
//!
//! ```text
//!                 ┌──► replica a1 ──┐
//!  do_until_quorum├──► replica b1 ──┼──► tracker ──► quorum results
//!                 └──► replica c1 ──┘        │
//!                                            └──► cleanup (unused results)
//! ```

pub mod executor;
pub mod set;
pub mod tracker;

pub use set::{
    ReplicationSet, has_replication_set_changed, has_replication_set_changed_without_state,
};
pub use tracker::{DefaultResultTracker, ResultTracker, ZoneAwareResultTracker};
