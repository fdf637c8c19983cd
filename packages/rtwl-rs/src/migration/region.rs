use super::accumulator::ShiftedPointAccumulator;
use super::stack::{StackEngine, StackedTrace};
use super::travel_times::TravelTimeSnapshot;
use crate::buffer::BufferError;
use crate::chunk::Chunk;
use crate::config::RtwlConfig;
use rayon::prelude::*;
use std::sync::Arc;

/// Point stacks owned by one region worker.
///
/// Built against a single snapshot; when the table generation changes the
/// stacker is discarded and rebuilt, so shifts of two generations never meet
/// in one accumulator.
#[derive(Debug)]
pub struct RegionStacker {
    region: usize,
    snapshot: Arc<TravelTimeSnapshot>,
    engines: Vec<StackEngine>,
}

impl RegionStacker {
    pub fn new(
        region: usize,
        snapshot: Arc<TravelTimeSnapshot>,
        config: &RtwlConfig,
    ) -> Result<Self, BufferError> {
        let buffer_config = config.internal_buffer_config();
        let specs = config.point_operator_specs();
        let margin = config.margin_ticks();

        let engines = snapshot
            .partition
            .points(region)
            .iter()
            .map(|&point| {
                let acc = ShiftedPointAccumulator::new(
                    point,
                    snapshot.stations(),
                    snapshot.point_shifts(point),
                    &buffer_config,
                    &specs,
                )?;
                Ok(StackEngine::new(
                    snapshot.generation,
                    config.dt,
                    acc,
                    margin,
                    config.readiness_policy,
                ))
            })
            .collect::<Result<Vec<_>, BufferError>>()?;

        log::debug!(
            "region {}: {} points for generation {}",
            region,
            engines.len(),
            snapshot.generation
        );

        Ok(Self {
            region,
            snapshot,
            engines,
        })
    }

    pub fn region(&self) -> usize {
        self.region
    }

    pub fn generation(&self) -> u64 {
        self.snapshot.generation
    }

    pub fn points(&self) -> Vec<usize> {
        self.engines.iter().map(StackEngine::point).collect()
    }

    pub fn engines(&self) -> &[StackEngine] {
        &self.engines
    }

    /// Fan a processed station chunk out to every point of the region.
    ///
    /// Returns the number of accumulators that accepted it. Chunks from
    /// stations missing in the current table are dropped.
    pub fn distribute(&mut self, chunk: &Chunk) -> usize {
        let Some(station) = self.snapshot.station_index(&chunk.station) else {
            log::debug!(
                "region {}: station {} not in generation {}, chunk dropped",
                self.region,
                chunk.station,
                self.snapshot.generation
            );
            return 0;
        };

        self.engines
            .par_iter_mut()
            .map(|engine| match engine.accumulator_mut().push(station, chunk) {
                Ok(_) => 1,
                Err(e) => {
                    log::warn!("point {}: {}", engine.point(), e);
                    0
                }
            })
            .sum()
    }

    /// Tick every point stack and collect the windows released
    pub fn stack(&mut self) -> Vec<StackedTrace> {
        self.engines
            .par_iter_mut()
            .filter_map(StackEngine::tick)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::{GridPoint, TravelTimeTable};
    use crate::signal_processing::PreprocessingPreset;

    const DT: f64 = 0.01;

    fn config() -> RtwlConfig {
        let mut config = RtwlConfig::with_dt(DT);
        config.safety_margin = 0.02;
        config.max_buffer_length = 10.0;
        config.preprocessing = PreprocessingPreset::Passthrough;
        config.number_of_regions = 2;
        config
    }

    fn snapshot() -> Arc<TravelTimeSnapshot> {
        let table = TravelTimeTable::new(
            vec!["A".into(), "B".into()],
            (0..5).map(|i| GridPoint::new(i as f64, 0.0, 0.0)).collect(),
            vec![vec![0.0; 5], vec![0.0, 0.01, 0.02, 0.03, 0.04]],
        )
        .unwrap();
        Arc::new(TravelTimeSnapshot::build(1, table, DT, 2).unwrap())
    }

    #[test]
    fn test_region_owns_its_partition() {
        let first = RegionStacker::new(0, snapshot(), &config()).unwrap();
        let second = RegionStacker::new(1, snapshot(), &config()).unwrap();
        assert_eq!(first.points(), vec![0, 1, 2]);
        assert_eq!(second.points(), vec![3, 4]);
        assert_eq!(second.region(), 1);

        let empty = RegionStacker::new(5, snapshot(), &config()).unwrap();
        assert!(empty.engines().is_empty());
    }

    #[test]
    fn test_distribute_and_stack() {
        let mut region = RegionStacker::new(1, snapshot(), &config()).unwrap();
        let a = Chunk::new("A", 100.0, DT, vec![1.0; 10]);
        let b = Chunk::new("B", 100.0, DT, vec![1.0; 10]);

        assert_eq!(region.distribute(&a), 2);
        assert!(region.stack().is_empty());
        assert_eq!(region.distribute(&b), 2);
        assert_eq!(region.distribute(&Chunk::new("Z", 100.0, DT, vec![1.0])), 0);

        let mut traces = region.stack();
        traces.sort_by_key(|t| t.point);
        assert_eq!(traces.len(), 2);
        assert_eq!(traces[0].point, 3);
        assert_eq!(traces[0].generation, 1);
        // B is shifted 3 ticks back for point 3, so the join starts at A's start
        assert_eq!(traces[0].start_tick(), 10_000);
        assert!(traces[0].samples.iter().all(|&s| s == 2.0));
        assert_eq!(traces[0].samples.len(), 7);
    }
}
