use anyhow::Result;
use clap::{Args, ValueEnum};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{OutputContext, join_or_dash};
use crate::replica::{ReplicaResponse, SimulatedReplicas, draw_outcomes};
use crate::scenario::Scenario;
use shardread_core::{InstanceDesc, RequestContext};

#[derive(Args)]
pub struct FanoutArgs {
    /// Scenario file describing the replicas
    #[arg(short, long, env = "SHARDREAD_SCENARIO")]
    pub scenario: PathBuf,

    /// How results are collected
    #[arg(short, long, value_enum, default_value_t = Mode::Quorum)]
    pub mode: Mode,

    /// Hedging delay in milliseconds, overriding the scenario
    #[arg(long)]
    pub delay_ms: Option<u64>,

    /// Request timeout in milliseconds, overriding the scenario
    #[arg(long)]
    pub timeout_ms: Option<u64>,

    /// Seed for latency jitter and failures
    #[arg(long)]
    pub seed: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    /// Every successful result available at quorum
    All,
    /// The minimal quorum, releasing the rest
    Quorum,
}

#[derive(Debug, Serialize)]
struct FanoutReport {
    mode: Mode,
    replicas: usize,
    max_errors: usize,
    max_unavailable_zones: usize,
    returned: Vec<ReplicaResponse>,
    error: Option<String>,
    elapsed_ms: u128,
    calls: usize,
    cancelled: Vec<String>,
    cleaned: Vec<String>,
}

pub async fn execute(args: FanoutArgs, output: &OutputContext) -> Result<()> {
    let mut scenario = Scenario::load(&args.scenario)?;
    if let Some(ms) = args.delay_ms {
        scenario.querier.extra_query_delay = Duration::from_millis(ms);
    }
    if let Some(ms) = args.timeout_ms {
        scenario.querier.query_timeout = Some(Duration::from_millis(ms));
    }
    scenario.querier.validate()?;

    let set = scenario.replication_set();
    set.validate()?;

    let sim = SimulatedReplicas::new(draw_outcomes(&scenario.replicas, args.seed));
    let operation = {
        let sim = Arc::clone(&sim);
        move |ctx: RequestContext, instance: InstanceDesc| {
            let sim = Arc::clone(&sim);
            async move { sim.call(ctx, instance).await }
        }
    };

    let ctx = match scenario.querier.query_timeout {
        Some(timeout) => RequestContext::background().with_timeout(timeout),
        None => RequestContext::background(),
    };

    let start = Instant::now();
    let result = match args.mode {
        Mode::All => {
            set.do_all(&ctx, scenario.querier.extra_query_delay, operation)
                .await
        }
        Mode::Quorum => {
            let released = Arc::clone(&sim);
            set.do_until_quorum(&ctx, operation, move |response| released.release(response))
                .await
        }
    };
    let elapsed_ms = start.elapsed().as_millis();

    // Give abandoned calls time to finish so late results show up as cleaned.
    let grace = tokio::time::Instant::now() + sim.max_latency() + Duration::from_millis(50);
    while sim.finished() < sim.calls() && tokio::time::Instant::now() < grace {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    ctx.cancel();

    let (returned, error) = match result {
        Ok(mut returned) => {
            returned.sort_by(|a, b| a.addr.cmp(&b.addr));
            (returned, None)
        }
        Err(e) => (Vec::new(), Some(e.to_string())),
    };

    let mut cancelled = sim.cancelled();
    cancelled.sort();
    let mut cleaned = sim.cleaned();
    cleaned.sort();

    let report = FanoutReport {
        mode: args.mode,
        replicas: set.instances.len(),
        max_errors: set.max_errors,
        max_unavailable_zones: set.max_unavailable_zones,
        returned,
        error,
        elapsed_ms,
        calls: sim.calls(),
        cancelled,
        cleaned,
    };

    output.print(&report, |r| {
        println!(
            "{:?} fan-out over {} replicas (max_errors={}, max_unavailable_zones={})",
            r.mode, r.replicas, r.max_errors, r.max_unavailable_zones
        );
        match &r.error {
            Some(e) => println!("failed:     {e}"),
            None => {
                let addrs: Vec<_> = r.returned.iter().map(|resp| resp.addr.clone()).collect();
                println!("returned:   {}", join_or_dash(&addrs));
            }
        }
        println!("elapsed:    {}ms", r.elapsed_ms);
        if output.verbose {
            println!("calls:      {}", r.calls);
            println!("cancelled:  {}", join_or_dash(&r.cancelled));
        }
        if r.mode == Mode::Quorum {
            println!("cleaned up: {}", join_or_dash(&r.cleaned));
        }
    })
}
