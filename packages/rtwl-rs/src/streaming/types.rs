// Message, event and statistics types shared by the pipeline workers

use crate::migration::{LocationWindow, TravelTimeSnapshot};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Current travel-time snapshot, replaced wholesale on reload
pub(crate) type SharedSnapshot = Arc<RwLock<Arc<TravelTimeSnapshot>>>;

/// Operator commands accepted by a running pipeline
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ControlSignal {
    /// Drain queued data, then stop every worker
    Stop,

    /// Reload the travel-time table from the provider
    TtimesChanged,
}

/// Item on an inter-worker channel
#[derive(Debug, Clone)]
pub(crate) enum Envelope<T> {
    Data(T),
    Stop,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    #[default]
    Init,
    Running,
    Stopped,
}

/// Output of a running pipeline
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "data")]
pub enum PipelineEvent {
    /// A released window of the max/x/y/z traces
    Located(LocationWindow),

    /// A new travel-time generation is active
    Reloaded { generation: u64 },

    /// The provider failed; the previous generation stays active
    ReloadFailed { message: String },

    /// Every worker has stopped; no further events follow
    Stopped,
}

/// Statistics about a pipeline run
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct PipelineStats {
    pub generation: u64,
    pub chunks_ingested: u64,
    pub chunks_processed: u64,
    pub chunks_rejected: u64,
    pub traces_stacked: u64,
    pub stale_traces_dropped: u64,
    pub windows_emitted: u64,
    pub reloads: u64,
    pub reload_failures: u64,
}

/// Lock-free counters behind `PipelineStats`
#[derive(Debug, Default)]
pub(crate) struct PipelineCounters {
    pub chunks_ingested: AtomicU64,
    pub chunks_processed: AtomicU64,
    pub chunks_rejected: AtomicU64,
    pub traces_stacked: AtomicU64,
    pub stale_traces_dropped: AtomicU64,
    pub windows_emitted: AtomicU64,
    pub reloads: AtomicU64,
    pub reload_failures: AtomicU64,
}

impl PipelineCounters {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, generation: u64) -> PipelineStats {
        PipelineStats {
            generation,
            chunks_ingested: self.chunks_ingested.load(Ordering::Relaxed),
            chunks_processed: self.chunks_processed.load(Ordering::Relaxed),
            chunks_rejected: self.chunks_rejected.load(Ordering::Relaxed),
            traces_stacked: self.traces_stacked.load(Ordering::Relaxed),
            stale_traces_dropped: self.stale_traces_dropped.load(Ordering::Relaxed),
            windows_emitted: self.windows_emitted.load(Ordering::Relaxed),
            reloads: self.reloads.load(Ordering::Relaxed),
            reload_failures: self.reload_failures.load(Ordering::Relaxed),
        }
    }
}

/// Lifecycle state of every worker, keyed by worker name
#[derive(Debug, Default)]
pub(crate) struct WorkerRegistry {
    states: RwLock<BTreeMap<String, WorkerState>>,
}

impl WorkerRegistry {
    pub fn set(&self, worker: &str, state: WorkerState) {
        self.states.write().insert(worker.to_string(), state);
    }

    pub fn all(&self) -> BTreeMap<String, WorkerState> {
        self.states.read().clone()
    }
}

/// Handles every worker task needs
#[derive(Debug, Clone)]
pub(crate) struct WorkerContext {
    pub counters: Arc<PipelineCounters>,
    pub registry: Arc<WorkerRegistry>,
}
