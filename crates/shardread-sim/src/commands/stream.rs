use anyhow::{Result, bail};
use clap::Args;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use super::OutputContext;
use crate::replica::SimulatedSeriesStream;
use crate::scenario::Scenario;
use shardread_core::streaming::{
    SeriesChunksStreamReader, SharedStreamReader, StreamingChunkSeries, StreamingSeriesSource,
};
use shardread_core::{QuerierConfig, RequestContext};

#[derive(Args)]
pub struct StreamArgs {
    /// Number of series each replica returns
    #[arg(long, default_value_t = 1_000)]
    pub series: usize,

    /// Series carried per stream message
    #[arg(long, default_value_t = 7)]
    pub series_per_message: usize,

    /// Chunks shared by every replica for each series
    #[arg(long, default_value_t = 3)]
    pub chunks_per_series: usize,

    /// Number of replicas streaming the same series
    #[arg(long, default_value_t = 2)]
    pub replicas: usize,

    /// Series buffered per batch, overriding the scenario
    #[arg(long)]
    pub buffer_size: Option<usize>,

    /// Delay before each stream message, in milliseconds
    #[arg(long, default_value_t = 0)]
    pub message_latency_ms: u64,

    /// Series the reader is told to expect; defaults to `--series`
    #[arg(long)]
    pub expect: Option<usize>,

    /// Scenario file supplying querier settings
    #[arg(short, long, env = "SHARDREAD_SCENARIO")]
    pub scenario: Option<PathBuf>,
}

#[derive(Debug, Serialize)]
struct StreamReport {
    replicas: usize,
    buffer_size: usize,
    series_read: usize,
    chunks_received: usize,
    chunks_merged: usize,
    error: Option<String>,
    elapsed_ms: u128,
    /// Merged chunk count of each series read, only with `--verbose`
    #[serde(skip_serializing_if = "Vec::is_empty")]
    per_series_chunks: Vec<usize>,
}

pub async fn execute(args: StreamArgs, output: &OutputContext) -> Result<()> {
    if args.replicas == 0 {
        bail!("--replicas must be at least 1");
    }

    let mut querier = match &args.scenario {
        Some(path) => Scenario::load(path)?.querier,
        None => QuerierConfig::default(),
    };
    if let Some(size) = args.buffer_size {
        querier.streaming_buffer_size = size;
    }
    querier.validate()?;

    let ctx = match querier.query_timeout {
        Some(timeout) => RequestContext::background().with_timeout(timeout),
        None => RequestContext::background(),
    };
    let _cancel = ctx.cancel_on_drop();

    let expected = args.expect.unwrap_or(args.series);
    let readers: Vec<SharedStreamReader<SimulatedSeriesStream>> = (0..args.replicas)
        .map(|replica| {
            let stream = SimulatedSeriesStream::new(
                &ctx,
                replica,
                args.series,
                args.series_per_message,
                args.chunks_per_series,
            )
            .with_message_latency(Duration::from_millis(args.message_latency_ms));

            let mut reader =
                SeriesChunksStreamReader::new(stream, expected, querier.streaming_buffer_size);
            reader.start_buffering();
            Arc::new(Mutex::new(reader))
        })
        .collect();

    let max_time_ms = SimulatedSeriesStream::max_time_ms(args.chunks_per_series, args.replicas);
    let start = Instant::now();
    let mut report = StreamReport {
        replicas: args.replicas,
        buffer_size: querier.streaming_buffer_size,
        series_read: 0,
        chunks_received: 0,
        chunks_merged: 0,
        error: None,
        elapsed_ms: 0,
        per_series_chunks: Vec::new(),
    };

    for index in 0..expected {
        let series = StreamingChunkSeries {
            labels: BTreeMap::from([
                ("__name__".to_string(), "sim_series".to_string()),
                ("series".to_string(), index.to_string()),
            ]),
            min_time_ms: 0,
            max_time_ms,
            sources: readers
                .iter()
                .map(|reader| StreamingSeriesSource {
                    reader: Arc::clone(reader),
                    series_index: index,
                })
                .collect(),
        };

        match series.chunks().await {
            Ok(chunks) => {
                report.series_read += 1;
                report.chunks_received += (args.chunks_per_series + 1) * args.replicas;
                report.chunks_merged += chunks.len();
                if output.verbose {
                    report.per_series_chunks.push(chunks.len());
                }
            }
            Err(e) => {
                tracing::warn!("Stopped reading at series {}: {}", index, e);
                report.error = Some(e.to_string());
                break;
            }
        }
    }
    report.elapsed_ms = start.elapsed().as_millis();

    output.print(&report, |r| {
        println!(
            "{} series from {} replicas (buffer of {} series)",
            r.series_read, r.replicas, r.buffer_size
        );
        println!("chunks:  {} received, {} after merge", r.chunks_received, r.chunks_merged);
        for (index, chunks) in r.per_series_chunks.iter().enumerate() {
            println!("  series {index}: {chunks} chunks");
        }
        if let Some(e) = &r.error {
            println!("failed:  {e}");
        }
        println!("elapsed: {}ms", r.elapsed_ms);
    })
}
