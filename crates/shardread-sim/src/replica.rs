//! Simulated replicas
//!
//! Outcomes are drawn once per run so a seed reproduces the same fan-out.

use crate::scenario::ReplicaSpec;
use async_trait::async_trait;
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use shardread_core::streaming::{
    Chunk, ChunkEncoding, QueryStreamResponse, QueryStreamSeriesChunks, SeriesChunksStream,
};
use shardread_core::{Error, InstanceDesc, RequestContext, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// What one replica will do when called
#[derive(Debug, Clone, Copy)]
pub struct Outcome {
    pub latency: Duration,
    pub fail: bool,
    pub ignore_cancel: bool,
}

/// A successful replica answer
#[derive(Debug, Clone, Serialize)]
pub struct ReplicaResponse {
    pub addr: String,
    pub latency_ms: u64,
}

/// Draw an outcome for every replica
pub fn draw_outcomes(replicas: &[ReplicaSpec], seed: Option<u64>) -> HashMap<String, Outcome> {
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    replicas
        .iter()
        .map(|spec| {
            let jitter = if spec.jitter_ms > 0 {
                rng.gen_range(0..=spec.jitter_ms)
            } else {
                0
            };
            let outcome = Outcome {
                latency: Duration::from_millis(spec.latency_ms + jitter),
                fail: rng.gen_bool(spec.failure_rate),
                ignore_cancel: spec.ignore_cancel,
            };
            (spec.instance.addr.clone(), outcome)
        })
        .collect()
}

/// Replays drawn outcomes and records what happened to each call
#[derive(Debug, Default)]
pub struct SimulatedReplicas {
    outcomes: HashMap<String, Outcome>,
    calls: AtomicUsize,
    finished: AtomicUsize,
    cancelled: Mutex<Vec<String>>,
    cleaned: Mutex<Vec<String>>,
}

impl SimulatedReplicas {
    pub fn new(outcomes: HashMap<String, Outcome>) -> Arc<Self> {
        Arc::new(Self {
            outcomes,
            ..Default::default()
        })
    }

    /// Answer a request as `instance`
    pub async fn call(&self, ctx: RequestContext, instance: InstanceDesc) -> Result<ReplicaResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let result = self.answer(ctx, &instance).await;
        self.finished.fetch_add(1, Ordering::SeqCst);
        result
    }

    async fn answer(&self, ctx: RequestContext, instance: &InstanceDesc) -> Result<ReplicaResponse> {
        let Some(outcome) = self.outcomes.get(&instance.addr).copied() else {
            return Err(Error::instance(&instance.addr, "unknown replica"));
        };

        if outcome.ignore_cancel {
            tokio::time::sleep(outcome.latency).await;
        } else {
            tokio::select! {
                _ = ctx.done() => {
                    tracing::debug!("Replica {} abandoned its request", instance.addr);
                    self.cancelled.lock().push(instance.addr.clone());
                    return Err(ctx.err().unwrap_or(Error::Cancelled));
                }
                _ = tokio::time::sleep(outcome.latency) => {}
            }
        }

        if outcome.fail {
            return Err(Error::instance(&instance.addr, "simulated failure"));
        }

        Ok(ReplicaResponse {
            addr: instance.addr.clone(),
            latency_ms: outcome.latency.as_millis() as u64,
        })
    }

    /// Release a response that was not returned to the caller
    pub fn release(&self, response: ReplicaResponse) {
        tracing::debug!("Released unused response from {}", response.addr);
        self.cleaned.lock().push(response.addr);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn finished(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }

    pub fn cancelled(&self) -> Vec<String> {
        self.cancelled.lock().clone()
    }

    pub fn cleaned(&self) -> Vec<String> {
        self.cleaned.lock().clone()
    }

    /// Longest drawn latency
    pub fn max_latency(&self) -> Duration {
        self.outcomes
            .values()
            .map(|o| o.latency)
            .max()
            .unwrap_or_default()
    }
}

/// Generates a series reply the way one replica would send it.
///
/// Every replica returns the same `chunks_per_series` chunks for a series
/// plus one chunk only it holds, so merging `n` replicas yields
/// `chunks_per_series + n` chunks.
pub struct SimulatedSeriesStream {
    replica: usize,
    total_series: usize,
    series_per_message: usize,
    chunks_per_series: usize,
    message_latency: Duration,
    next_series: usize,
    ctx: RequestContext,
}

impl SimulatedSeriesStream {
    pub fn new(
        ctx: &RequestContext,
        replica: usize,
        total_series: usize,
        series_per_message: usize,
        chunks_per_series: usize,
    ) -> Self {
        Self {
            replica,
            total_series,
            series_per_message: series_per_message.max(1),
            chunks_per_series,
            message_latency: Duration::ZERO,
            next_series: 0,
            ctx: ctx.clone(),
        }
    }

    pub fn with_message_latency(mut self, latency: Duration) -> Self {
        self.message_latency = latency;
        self
    }

    fn series(&self, index: usize) -> QueryStreamSeriesChunks {
        const STEP_MS: i64 = 120_000;
        let base = index as i64;

        let mut chunks: Vec<_> = (0..self.chunks_per_series as i64)
            .map(|k| {
                Chunk::new(
                    k * STEP_MS,
                    (k + 1) * STEP_MS - 1,
                    ChunkEncoding::Xor,
                    base.to_be_bytes().to_vec(),
                )
            })
            .collect();

        let own = self.chunks_per_series as i64 * STEP_MS + self.replica as i64;
        chunks.push(Chunk::new(
            own,
            own + STEP_MS - 1,
            ChunkEncoding::Xor,
            (self.replica as u64).to_be_bytes().to_vec(),
        ));

        QueryStreamSeriesChunks { chunks }
    }

    /// End of the time range covered by the generated chunks
    pub fn max_time_ms(chunks_per_series: usize, replicas: usize) -> i64 {
        (chunks_per_series as i64 + 1) * 120_000 + replicas as i64
    }
}

#[async_trait]
impl SeriesChunksStream for SimulatedSeriesStream {
    async fn recv(&mut self) -> Result<Option<QueryStreamResponse>> {
        if self.next_series >= self.total_series {
            return Ok(None);
        }

        if !self.message_latency.is_zero() {
            tokio::time::sleep(self.message_latency).await;
        }

        let end = (self.next_series + self.series_per_message).min(self.total_series);
        let series_chunks = (self.next_series..end).map(|i| self.series(i)).collect();
        self.next_series = end;

        Ok(Some(QueryStreamResponse { series_chunks }))
    }

    async fn close_send(&mut self) -> Result<()> {
        tracing::debug!(
            "Replica {} stream closed after {} series",
            self.replica,
            self.next_series
        );
        Ok(())
    }

    fn context(&self) -> &RequestContext {
        &self.ctx
    }
}
