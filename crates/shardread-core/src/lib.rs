//! Shardread Core - Replicated Read Execution
//!
//! This crate provides the read path shared by queriers of a replicated
//! time-series store:
//! - Quorum fan-out of a request to every replica of a shard
//! - Error-budget and zone-aware quorum policies
//! - Cleanup of results produced but not returned
//! - Bounded, ordered streaming of one replica's series reply
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │        ReplicationSet::do_until_quorum       │
//! │     (fan-out, early exit, result cleanup)    │
//! └──────────────┬──────────────────────────────┘
//!                │ one task per replica
//! ┌──────────────┴──────────────────────────────┐
//! │   SeriesChunksStreamReader (per replica)     │
//! │   (bounded batches, strictly ordered reads)  │
//! └──────────────┬──────────────────────────────┘
//!                │
//! ┌──────────────┴──────────────────────────────┐
//! │          Transport (SeriesChunksStream)      │
//! └─────────────────────────────────────────────┘
//! ```

#![deny(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod context;
pub mod error;
pub mod replication;
pub mod ring;
pub mod streaming;

pub use config::QuerierConfig;
pub use context::RequestContext;
pub use error::{Error, Result, StreamError};
pub use replication::ReplicationSet;
pub use ring::{InstanceDesc, InstanceState};
