//! Simulated replicas shared by the integration tests

#![allow(dead_code)]

use parking_lot::Mutex;
use shardread_core::{Error, InstanceDesc, RequestContext, Result};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub type OpFuture<T> = Pin<Box<dyn Future<Output = Result<T>> + Send>>;

/// How a simulated replica answers
#[derive(Debug, Clone, Copy)]
pub struct Behaviour {
    pub latency: Duration,
    pub fail: bool,
    pub ignore_cancel: bool,
}

impl Behaviour {
    pub fn succeed(ms: u64) -> Self {
        Self {
            latency: Duration::from_millis(ms),
            fail: false,
            ignore_cancel: false,
        }
    }

    pub fn fail(ms: u64) -> Self {
        Self {
            fail: true,
            ..Self::succeed(ms)
        }
    }

    /// Keep working after the request context is cancelled
    pub fn stubborn(mut self) -> Self {
        self.ignore_cancel = true;
        self
    }
}

pub fn instance(addr: &str, zone: &str) -> InstanceDesc {
    InstanceDesc::new(addr, addr, zone)
}

/// A set of replicas answering with scripted behaviour. Successful calls
/// return the replica address.
#[derive(Default)]
pub struct Replicas {
    behaviours: HashMap<String, Behaviour>,
    pub calls: AtomicUsize,
    pub finished: AtomicUsize,
    pub succeeded: Mutex<Vec<String>>,
    pub cancelled: Mutex<Vec<String>>,
    pub cleaned: Mutex<Vec<String>>,
}

impl Replicas {
    pub fn new(plan: &[(&InstanceDesc, Behaviour)]) -> Arc<Self> {
        Arc::new(Self {
            behaviours: plan
                .iter()
                .map(|(instance, behaviour)| (instance.addr.clone(), *behaviour))
                .collect(),
            ..Default::default()
        })
    }

    pub fn operation(
        self: &Arc<Self>,
    ) -> impl Fn(RequestContext, InstanceDesc) -> OpFuture<String> + Send + Sync + 'static {
        let replicas = Arc::clone(self);
        move |ctx: RequestContext, instance: InstanceDesc| -> OpFuture<String> {
            let replicas = Arc::clone(&replicas);
            Box::pin(async move { replicas.serve(ctx, instance).await })
        }
    }

    pub fn cleanup(self: &Arc<Self>) -> impl Fn(String) + Send + Sync + 'static {
        let replicas = Arc::clone(self);
        move |addr: String| replicas.cleaned.lock().push(addr)
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn finished(&self) -> usize {
        self.finished.load(Ordering::SeqCst)
    }

    pub fn cleaned(&self) -> Vec<String> {
        let mut cleaned = self.cleaned.lock().clone();
        cleaned.sort();
        cleaned
    }

    pub fn cancelled(&self) -> Vec<String> {
        let mut cancelled = self.cancelled.lock().clone();
        cancelled.sort();
        cancelled
    }

    async fn serve(&self, ctx: RequestContext, instance: InstanceDesc) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let result = self.answer(ctx, instance).await;
        self.finished.fetch_add(1, Ordering::SeqCst);
        result
    }

    async fn answer(&self, ctx: RequestContext, instance: InstanceDesc) -> Result<String> {
        let behaviour = self.behaviours[&instance.addr];

        if behaviour.ignore_cancel {
            tokio::time::sleep(behaviour.latency).await;
        } else {
            tokio::select! {
                _ = ctx.done() => {
                    self.cancelled.lock().push(instance.addr.clone());
                    return Err(ctx.err().unwrap_or(Error::Cancelled));
                }
                _ = tokio::time::sleep(behaviour.latency) => {}
            }
        }

        if behaviour.fail {
            return Err(Error::instance(instance.addr, "injected failure"));
        }

        self.succeeded.lock().push(instance.addr.clone());
        Ok(instance.addr)
    }
}

pub fn sorted(mut values: Vec<String>) -> Vec<String> {
    values.sort();
    values
}

/// Let background tasks run to completion on the paused clock
pub async fn settle() {
    tokio::time::sleep(Duration::from_secs(10)).await;
}
