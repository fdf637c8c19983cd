// Pipeline coordinator
//
// Owns the travel-time snapshot and wires one worker per station, one per
// region and one max worker together with bounded channels. A control task
// handles reloads and cooperative shutdown.

use super::types::{
    ControlSignal, Envelope, PipelineCounters, PipelineEvent, PipelineStats, SharedSnapshot,
    WorkerContext, WorkerRegistry, WorkerState,
};
use super::workers::{
    region_worker_name, run_max, run_region, run_station, station_worker_name, MAX_WORKER_NAME,
};
use crate::chunk::{dt_matches, Chunk};
use crate::config::RtwlConfig;
use crate::error::{Result, RtwlError};
use crate::migration::{TravelTimeProvider, TravelTimeSnapshot};
use crate::signal_processing::StationProcessor;
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

const CONTROL_WORKER_NAME: &str = "control";

/// Starts pipelines
pub struct PipelineCoordinator;

impl PipelineCoordinator {
    /// Validate `config`, load the first table and spawn every worker.
    ///
    /// Station workers are created for the stations of the first table; they
    /// live until shutdown.
    pub async fn start(
        config: RtwlConfig,
        provider: Arc<dyn TravelTimeProvider>,
    ) -> Result<PipelineHandle> {
        config.validate()?;
        let config = Arc::new(config);
        let id = Uuid::new_v4().to_string();

        let generations = Arc::new(AtomicU64::new(0));
        let first = load_snapshot(&provider, &generations, &config).await?;
        let stations: Vec<String> = first.stations().to_vec();
        let regions = first.partition.len();

        log::info!(
            "Starting pipeline {}: {} stations, {} points, {} regions",
            id,
            stations.len(),
            first.npts(),
            regions
        );

        let snapshot: SharedSnapshot = Arc::new(RwLock::new(Arc::new(first)));
        let ctx = WorkerContext {
            counters: Arc::new(PipelineCounters::default()),
            registry: Arc::new(WorkerRegistry::default()),
        };
        let capacity = config.channel_capacity;
        let station_specs = config.station_operator_specs()?;
        let mut tasks: Vec<(String, JoinHandle<()>)> = Vec::new();

        // max worker
        let (events_tx, events_rx) = mpsc::channel(capacity);
        let (max_tx, max_rx) = mpsc::channel(capacity);
        ctx.registry.set(MAX_WORKER_NAME, WorkerState::Init);
        tasks.push((
            MAX_WORKER_NAME.to_string(),
            tokio::spawn(run_max(
                config.clone(),
                snapshot.clone(),
                max_rx,
                regions,
                events_tx.clone(),
                ctx.clone(),
            )),
        ));

        // region workers
        let mut region_inputs = Vec::with_capacity(regions);
        for region in 0..regions {
            let (tx, rx) = mpsc::channel(capacity);
            region_inputs.push(tx);
            let name = region_worker_name(region);
            ctx.registry.set(&name, WorkerState::Init);
            tasks.push((
                name,
                tokio::spawn(run_region(
                    region,
                    config.clone(),
                    snapshot.clone(),
                    rx,
                    stations.len(),
                    max_tx.clone(),
                    ctx.clone(),
                )),
            ));
        }
        drop(max_tx);

        // station workers
        let mut inputs = HashMap::with_capacity(stations.len());
        for station in &stations {
            let processor =
                StationProcessor::new(station.clone(), config.buffer_config(), &station_specs)?;
            let (tx, rx) = mpsc::channel(capacity);
            inputs.insert(station.clone(), tx);
            let name = station_worker_name(station);
            ctx.registry.set(&name, WorkerState::Init);
            tasks.push((
                name,
                tokio::spawn(run_station(processor, rx, region_inputs.clone(), ctx.clone())),
            ));
        }
        drop(region_inputs);

        // control task
        let (control_tx, control_rx) = mpsc::channel(capacity);
        ctx.registry.set(CONTROL_WORKER_NAME, WorkerState::Init);
        tasks.push((
            CONTROL_WORKER_NAME.to_string(),
            tokio::spawn(run_control(
                control_rx,
                provider,
                snapshot.clone(),
                generations,
                config.clone(),
                inputs.values().cloned().collect(),
                events_tx,
                ctx.clone(),
            )),
        ));

        log::info!("Pipeline {} started", id);

        Ok(PipelineHandle {
            id,
            config,
            inputs,
            control: control_tx,
            events: Some(events_rx),
            snapshot,
            ctx,
            tasks,
        })
    }
}

/// Load a table and build the next generation's snapshot outside any lock
async fn load_snapshot(
    provider: &Arc<dyn TravelTimeProvider>,
    generations: &AtomicU64,
    config: &RtwlConfig,
) -> Result<TravelTimeSnapshot> {
    let loader = provider.clone();
    let table = tokio::task::spawn_blocking(move || loader.load())
        .await
        .map_err(|e| RtwlError::Worker(e.to_string()))??;
    let generation = generations.fetch_add(1, Ordering::SeqCst) + 1;
    Ok(TravelTimeSnapshot::build(
        generation,
        table,
        config.dt,
        config.number_of_regions,
    )?)
}

/// Swap in a freshly loaded snapshot, keeping the newest generation
async fn reload(
    provider: &Arc<dyn TravelTimeProvider>,
    shared: &SharedSnapshot,
    generations: &AtomicU64,
    config: &RtwlConfig,
    stations: &[String],
) -> Result<u64> {
    let next = load_snapshot(provider, generations, config).await?;
    let generation = next.generation;

    let unknown: Vec<&String> = next
        .stations()
        .iter()
        .filter(|s| !stations.contains(*s))
        .collect();
    if !unknown.is_empty() {
        log::warn!(
            "Generation {} lists stations without a worker, their data cannot be ingested: {:?}",
            generation,
            unknown
        );
    }

    let next = Arc::new(next);
    let mut guard = shared.write();
    if guard.generation < generation {
        *guard = next;
    }
    Ok(generation)
}

#[allow(clippy::too_many_arguments)]
async fn run_control(
    mut control: mpsc::Receiver<ControlSignal>,
    provider: Arc<dyn TravelTimeProvider>,
    snapshot: SharedSnapshot,
    generations: Arc<AtomicU64>,
    config: Arc<RtwlConfig>,
    station_inputs: Vec<mpsc::Sender<Envelope<Chunk>>>,
    events: mpsc::Sender<PipelineEvent>,
    ctx: WorkerContext,
) {
    ctx.registry.set(CONTROL_WORKER_NAME, WorkerState::Running);
    let stations: Vec<String> = snapshot.read().stations().to_vec();

    while let Some(signal) = control.recv().await {
        match signal {
            ControlSignal::TtimesChanged => {
                log::info!("Travel times changed, reloading");
                let event =
                    match reload(&provider, &snapshot, &generations, &config, &stations).await {
                        Ok(generation) => {
                            PipelineCounters::incr(&ctx.counters.reloads);
                            log::info!("Travel-time generation {} active", generation);
                            PipelineEvent::Reloaded { generation }
                        }
                        Err(e) => {
                            PipelineCounters::incr(&ctx.counters.reload_failures);
                            log::warn!("Travel-time reload failed, keeping current table: {}", e);
                            PipelineEvent::ReloadFailed {
                                message: e.to_string(),
                            }
                        }
                    };
                if events.send(event).await.is_err() {
                    log::debug!("output receiver dropped");
                }
            }
            ControlSignal::Stop => break,
        }
    }

    // also reached when every control sender is gone
    log::info!("Stopping station workers");
    for tx in &station_inputs {
        if tx.send(Envelope::Stop).await.is_err() {
            log::debug!("station worker already stopped");
        }
    }
    ctx.registry.set(CONTROL_WORKER_NAME, WorkerState::Stopped);
}

/// Handle to a running pipeline.
///
/// The event receiver returned by `outputs` must be drained while the
/// pipeline runs: the channel is bounded and a full channel blocks the max
/// worker, which in turn blocks shutdown.
pub struct PipelineHandle {
    id: String,
    config: Arc<RtwlConfig>,
    inputs: HashMap<String, mpsc::Sender<Envelope<Chunk>>>,
    control: mpsc::Sender<ControlSignal>,
    events: Option<mpsc::Receiver<PipelineEvent>>,
    snapshot: SharedSnapshot,
    ctx: WorkerContext,
    tasks: Vec<(String, JoinHandle<()>)>,
}

impl PipelineHandle {
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn config(&self) -> &RtwlConfig {
        &self.config
    }

    /// Stations that have a worker
    pub fn stations(&self) -> Vec<String> {
        let mut stations: Vec<String> = self.inputs.keys().cloned().collect();
        stations.sort();
        stations
    }

    /// Queue a raw chunk for its station, waiting while the station is busy
    pub async fn ingest(&self, chunk: Chunk) -> Result<()> {
        if !dt_matches(chunk.dt, self.config.dt) {
            PipelineCounters::incr(&self.ctx.counters.chunks_rejected);
            return Err(RtwlError::DtMismatch {
                station: chunk.station,
                expected: self.config.dt,
                found: chunk.dt,
            });
        }
        let Some(tx) = self.inputs.get(&chunk.station) else {
            PipelineCounters::incr(&self.ctx.counters.chunks_rejected);
            return Err(RtwlError::UnknownStation(chunk.station));
        };
        if let Err(err) = chunk.validate() {
            PipelineCounters::incr(&self.ctx.counters.chunks_rejected);
            return Err(err.into());
        }

        PipelineCounters::incr(&self.ctx.counters.chunks_ingested);
        tx.send(Envelope::Data(chunk))
            .await
            .map_err(|_| RtwlError::ChannelClosed)
    }

    /// Sender for control signals
    pub fn control(&self) -> mpsc::Sender<ControlSignal> {
        self.control.clone()
    }

    /// Ask the coordinator to reload the travel-time table
    pub async fn reload(&self) -> Result<()> {
        self.control
            .send(ControlSignal::TtimesChanged)
            .await
            .map_err(|_| RtwlError::ChannelClosed)
    }

    /// Take the event receiver; returns `None` after the first call
    pub fn outputs(&mut self) -> Option<mpsc::Receiver<PipelineEvent>> {
        self.events.take()
    }

    /// Currently active snapshot
    pub fn snapshot(&self) -> Arc<TravelTimeSnapshot> {
        self.snapshot.read().clone()
    }

    pub fn generation(&self) -> u64 {
        self.snapshot.read().generation
    }

    pub fn stats(&self) -> PipelineStats {
        self.ctx.counters.snapshot(self.generation())
    }

    pub fn worker_states(&self) -> BTreeMap<String, WorkerState> {
        self.ctx.registry.all()
    }

    /// Stop every worker after queued data is processed and wait for them.
    ///
    /// Returns the final statistics. Later calls only report statistics.
    pub async fn shutdown(&mut self) -> Result<PipelineStats> {
        if !self.tasks.is_empty() {
            log::info!("Shutting down pipeline {}", self.id);
        }
        if self.control.send(ControlSignal::Stop).await.is_err() {
            log::debug!("control task already stopped");
        }

        let mut failure = None;
        for (name, task) in self.tasks.drain(..) {
            if let Err(e) = task.await {
                log::error!("worker {} failed: {}", name, e);
                if failure.is_none() {
                    failure = Some(RtwlError::Worker(format!("{}: {}", name, e)));
                }
            }
        }
        if let Some(e) = failure {
            return Err(e);
        }

        let stats = self.stats();
        log::info!(
            "Pipeline {} stopped: {} chunks, {} windows",
            self.id,
            stats.chunks_ingested,
            stats.windows_emitted
        );
        Ok(stats)
    }
}

impl std::fmt::Debug for PipelineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineHandle")
            .field("id", &self.id)
            .field("stations", &self.inputs.len())
            .field("generation", &self.generation())
            .finish()
    }
}
