use super::accumulator::ShiftedPointAccumulator;
use super::window::{ReadinessPolicy, WindowJoin};
use crate::chunk::{tick_of, time_of};
use serde::{Deserialize, Serialize};

/// Sum of shifted station traces for one grid point over one window
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StackedTrace {
    /// Global point index
    pub point: usize,
    /// Table generation the shifts came from
    pub generation: u64,
    pub start: f64,
    pub dt: f64,
    pub samples: Vec<f32>,
    /// Number of station traces that contributed
    pub stations: usize,
}

impl StackedTrace {
    pub fn start_tick(&self) -> i64 {
        tick_of(self.start, self.dt)
    }

    pub fn end(&self) -> f64 {
        self.start + self.samples.len().saturating_sub(1) as f64 * self.dt
    }
}

/// Stacking state of one grid point
#[derive(Debug)]
pub struct StackEngine {
    generation: u64,
    dt: f64,
    accumulator: ShiftedPointAccumulator,
    join: WindowJoin,
}

impl StackEngine {
    pub fn new(
        generation: u64,
        dt: f64,
        accumulator: ShiftedPointAccumulator,
        margin_ticks: i64,
        policy: ReadinessPolicy,
    ) -> Self {
        Self {
            generation,
            dt,
            accumulator,
            join: WindowJoin::new(margin_ticks, policy),
        }
    }

    pub fn point(&self) -> usize {
        self.accumulator.point()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// First tick not yet emitted
    pub fn watermark(&self) -> i64 {
        self.join.watermark()
    }

    pub fn accumulator(&self) -> &ShiftedPointAccumulator {
        &self.accumulator
    }

    pub fn accumulator_mut(&mut self) -> &mut ShiftedPointAccumulator {
        &mut self.accumulator
    }

    /// Emit the next complete window, if the stations have caught up.
    ///
    /// Repeated calls without new data return `None`.
    pub fn tick(&mut self) -> Option<StackedTrace> {
        let buffers = self.accumulator.buffers();
        let window = self.join.resolve(buffers)?;

        let mut stacked = vec![0.0f32; window.len()];
        for &station in &window.ready {
            let samples = buffers[station].slice(window.start, window.end)?;
            for (acc, s) in stacked.iter_mut().zip(samples) {
                *acc += s;
            }
        }
        self.join.advance(&window);

        log::debug!(
            "point {}: stacked {} stations over ticks [{}, {}]",
            self.point(),
            window.ready.len(),
            window.start,
            window.end
        );

        Some(StackedTrace {
            point: self.point(),
            generation: self.generation,
            start: time_of(window.start, self.dt),
            dt: self.dt,
            samples: stacked,
            stations: window.ready.len(),
        })
    }

    /// Drop accumulated data and move the watermark back to the epoch
    pub fn reset(&mut self) {
        self.accumulator.reset();
        self.join.reset();
    }
}
