//! Querier configuration

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default number of series buffered per streamed batch
pub const DEFAULT_STREAMING_BUFFER_SIZE: usize = 256;

/// Settings governing replicated reads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuerierConfig {
    /// Delay before hedged requests are sent to the replicas covered by the
    /// error budget. Zero sends every request immediately.
    pub extra_query_delay: Duration,

    /// Overall timeout for a replicated request
    pub query_timeout: Option<Duration>,

    /// Series per batch handed from the stream producer to the consumer
    pub streaming_buffer_size: usize,

    /// Tolerate whole-zone loss instead of individual instance failures
    pub zone_awareness_enabled: bool,
}

impl Default for QuerierConfig {
    fn default() -> Self {
        Self {
            extra_query_delay: Duration::ZERO,
            query_timeout: Some(Duration::from_secs(120)),
            streaming_buffer_size: DEFAULT_STREAMING_BUFFER_SIZE,
            zone_awareness_enabled: false,
        }
    }
}

impl QuerierConfig {
    /// Set the hedging delay
    pub fn with_extra_query_delay(mut self, delay: Duration) -> Self {
        self.extra_query_delay = delay;
        self
    }

    /// Set the overall request timeout
    pub fn with_query_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.query_timeout = timeout;
        self
    }

    /// Set the streaming batch size
    pub fn with_streaming_buffer_size(mut self, size: usize) -> Self {
        self.streaming_buffer_size = size;
        self
    }

    /// Enable/disable zone-awareness
    pub fn with_zone_awareness(mut self, enabled: bool) -> Self {
        self.zone_awareness_enabled = enabled;
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.streaming_buffer_size == 0 {
            return Err(Error::invalid_config(
                "streaming_buffer_size must be at least 1",
            ));
        }

        if self.query_timeout.is_some_and(|t| t.is_zero()) {
            return Err(Error::invalid_config("query_timeout must be positive"));
        }

        if self.zone_awareness_enabled && !self.extra_query_delay.is_zero() {
            tracing::warn!("extra_query_delay is ignored when zone-awareness is enabled");
        }

        Ok(())
    }
}
