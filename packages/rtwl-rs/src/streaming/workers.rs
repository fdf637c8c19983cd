// Worker task bodies
//
// Station workers fan processed chunks out to every region worker. Region
// workers fan stacked traces in to the single max worker, which publishes
// located windows. Every worker forwards exactly one Stop downstream, after
// all of its upstream producers have sent theirs.

use super::types::{Envelope, PipelineCounters, PipelineEvent, SharedSnapshot, WorkerContext, WorkerState};
use crate::chunk::Chunk;
use crate::config::RtwlConfig;
use crate::migration::{MaxExtractor, RegionStacker, StackedTrace, TravelTimeSnapshot};
use crate::signal_processing::StationProcessor;
use std::sync::Arc;
use tokio::sync::mpsc;

pub(crate) fn station_worker_name(station: &str) -> String {
    format!("station:{}", station)
}

pub(crate) fn region_worker_name(region: usize) -> String {
    format!("region:{}", region)
}

pub(crate) const MAX_WORKER_NAME: &str = "max";

async fn forward_stop<T>(name: &str, outputs: &[mpsc::Sender<Envelope<T>>]) {
    for tx in outputs {
        if tx.send(Envelope::Stop).await.is_err() {
            log::warn!("{}: downstream closed before stop", name);
        }
    }
}

pub(crate) async fn run_station(
    mut processor: StationProcessor,
    mut input: mpsc::Receiver<Envelope<Chunk>>,
    regions: Vec<mpsc::Sender<Envelope<Arc<Chunk>>>>,
    ctx: WorkerContext,
) {
    let name = station_worker_name(processor.station());
    ctx.registry.set(&name, WorkerState::Running);
    log::debug!("{} running (filter shift {:.3}s)", name, processor.filter_shift());

    while let Some(msg) = input.recv().await {
        let chunk = match msg {
            Envelope::Data(chunk) => chunk,
            Envelope::Stop => break,
        };

        match processor.process(&chunk) {
            Ok(processed) if processed.is_empty() => {}
            Ok(processed) => {
                PipelineCounters::incr(&ctx.counters.chunks_processed);
                let processed = Arc::new(processed);
                for tx in &regions {
                    if tx.send(Envelope::Data(processed.clone())).await.is_err() {
                        log::error!("{}: region channel closed", name);
                    }
                }
            }
            Err(e) => {
                PipelineCounters::incr(&ctx.counters.chunks_rejected);
                log::warn!("{}: {}", name, e);
            }
        }
    }

    forward_stop(&name, &regions).await;
    ctx.registry.set(&name, WorkerState::Stopped);
    log::debug!("{} stopped", name);
}

fn build_stacker(
    region: usize,
    snapshot: Arc<TravelTimeSnapshot>,
    config: &RtwlConfig,
) -> Option<RegionStacker> {
    match RegionStacker::new(region, snapshot, config) {
        Ok(stacker) => Some(stacker),
        Err(e) => {
            log::error!("region {}: cannot build point stacks: {}", region, e);
            None
        }
    }
}

pub(crate) async fn run_region(
    region: usize,
    config: Arc<RtwlConfig>,
    snapshot: SharedSnapshot,
    mut input: mpsc::Receiver<Envelope<Arc<Chunk>>>,
    producers: usize,
    output: mpsc::Sender<Envelope<StackedTrace>>,
    ctx: WorkerContext,
) {
    let name = region_worker_name(region);
    let mut stacker = build_stacker(region, snapshot.read().clone(), &config);
    ctx.registry.set(&name, WorkerState::Running);

    let mut stops = 0usize;
    while let Some(msg) = input.recv().await {
        let chunk = match msg {
            Envelope::Data(chunk) => chunk,
            Envelope::Stop => {
                stops += 1;
                if stops >= producers {
                    break;
                }
                continue;
            }
        };

        let current = snapshot.read().clone();
        let stale = stacker
            .as_ref()
            .map_or(true, |s| s.generation() != current.generation);
        if stale {
            log::info!(
                "{}: switching to travel-time generation {}",
                name,
                current.generation
            );
            stacker = build_stacker(region, current, &config);
        }
        let Some(mut owned) = stacker.take() else {
            continue;
        };

        // point stacking is CPU bound and runs on rayon
        let result = tokio::task::spawn_blocking(move || {
            owned.distribute(&chunk);
            let traces = owned.stack();
            (owned, traces)
        })
        .await;

        match result {
            Ok((owned, traces)) => {
                stacker = Some(owned);
                for trace in traces {
                    PipelineCounters::incr(&ctx.counters.traces_stacked);
                    if output.send(Envelope::Data(trace)).await.is_err() {
                        log::error!("{}: max channel closed", name);
                    }
                }
            }
            Err(e) => {
                // stacks are rebuilt from the current snapshot on the next chunk
                log::error!("{}: stacking task failed: {}", name, e);
            }
        }
    }

    forward_stop(&name, std::slice::from_ref(&output)).await;
    ctx.registry.set(&name, WorkerState::Stopped);
    log::debug!("{} stopped", name);
}

fn build_extractor(
    snapshot: Arc<TravelTimeSnapshot>,
    config: &RtwlConfig,
) -> crate::Result<MaxExtractor> {
    Ok(MaxExtractor::new(
        snapshot,
        &config.internal_buffer_config(),
        config.margin_ticks(),
        config.readiness_policy,
        &config.point_operator_specs(),
        &config.max_operator_specs(),
    )?)
}

pub(crate) async fn run_max(
    config: Arc<RtwlConfig>,
    snapshot: SharedSnapshot,
    mut input: mpsc::Receiver<Envelope<StackedTrace>>,
    producers: usize,
    events: mpsc::Sender<PipelineEvent>,
    ctx: WorkerContext,
) {
    let mut extractor = match build_extractor(snapshot.read().clone(), &config) {
        Ok(extractor) => Some(extractor),
        Err(e) => {
            log::error!("{}: cannot build max extractor: {}", MAX_WORKER_NAME, e);
            None
        }
    };
    ctx.registry.set(MAX_WORKER_NAME, WorkerState::Running);

    let mut stops = 0usize;
    while let Some(msg) = input.recv().await {
        let trace = match msg {
            Envelope::Data(trace) => trace,
            Envelope::Stop => {
                stops += 1;
                if stops >= producers {
                    break;
                }
                continue;
            }
        };

        let current_generation = extractor.as_ref().map_or(0, MaxExtractor::generation);
        if trace.generation > current_generation {
            let current = snapshot.read().clone();
            if current.generation > current_generation {
                log::info!(
                    "{}: switching to travel-time generation {}",
                    MAX_WORKER_NAME,
                    current.generation
                );
                extractor = build_extractor(current, &config)
                    .map_err(|e| log::error!("{}: {}", MAX_WORKER_NAME, e))
                    .ok();
            }
        }
        let Some(max) = extractor.as_mut() else {
            continue;
        };

        match max.push(&trace) {
            Ok(true) => {}
            Ok(false) => PipelineCounters::incr(&ctx.counters.stale_traces_dropped),
            Err(e) => log::warn!("{}: point {}: {}", MAX_WORKER_NAME, trace.point, e),
        }

        loop {
            match max.tick() {
                Ok(Some(window)) => {
                    PipelineCounters::incr(&ctx.counters.windows_emitted);
                    if events.send(PipelineEvent::Located(window)).await.is_err() {
                        log::warn!("{}: output receiver dropped", MAX_WORKER_NAME);
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    log::warn!("{}: {}", MAX_WORKER_NAME, e);
                    break;
                }
            }
        }
    }

    if events.send(PipelineEvent::Stopped).await.is_err() {
        log::debug!("{}: output receiver dropped before stop", MAX_WORKER_NAME);
    }
    ctx.registry.set(MAX_WORKER_NAME, WorkerState::Stopped);
    log::debug!("{} stopped", MAX_WORKER_NAME);
}
