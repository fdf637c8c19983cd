// Global maximum over all point stacks
//
// Keeps one buffer per grid point fed with StackedTrace windows, and joins
// them with the same watermark rule as the point stacks. Each released window
// yields the per-sample maximum and the coordinates of the point that holds it.

use super::stack::StackedTrace;
use super::travel_times::{GridPoint, TravelTimeSnapshot};
use super::window::{ReadinessPolicy, WindowJoin};
use crate::buffer::{BufferConfig, BufferError, StreamBuffer};
use crate::chunk::{tick_of, time_of};
use crate::signal_processing::OperatorSpec;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Four aligned output traces over one released window
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LocationWindow {
    pub generation: u64,
    pub start: f64,
    pub dt: f64,
    /// Maximum stacked amplitude (after optional smoothing)
    pub max: Vec<f32>,
    pub x: Vec<f32>,
    pub y: Vec<f32>,
    pub z: Vec<f32>,
    /// Index of the point holding the maximum
    pub argmax: Vec<usize>,
}

/// Strongest sample of a `LocationWindow`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct LocationPeak {
    pub generation: u64,
    pub time: f64,
    pub amplitude: f32,
    pub point: usize,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl LocationWindow {
    pub fn len(&self) -> usize {
        self.max.len()
    }

    pub fn is_empty(&self) -> bool {
        self.max.is_empty()
    }

    pub fn start_tick(&self) -> i64 {
        tick_of(self.start, self.dt)
    }

    pub fn peak(&self) -> Option<LocationPeak> {
        let (i, &amplitude) = self
            .max
            .iter()
            .enumerate()
            .fold(None::<(usize, &f32)>, |best, (i, v)| match best {
                Some((_, b)) if b >= v => best,
                _ => Some((i, v)),
            })?;
        Some(LocationPeak {
            generation: self.generation,
            time: self.start + i as f64 * self.dt,
            amplitude,
            point: self.argmax[i],
            x: self.x[i] as f64,
            y: self.y[i] as f64,
            z: self.z[i] as f64,
        })
    }
}

pub struct MaxExtractor {
    snapshot: Arc<TravelTimeSnapshot>,
    stacks: Vec<StreamBuffer>,
    join: WindowJoin,
    max_out: StreamBuffer,
    x_out: StreamBuffer,
    y_out: StreamBuffer,
    z_out: StreamBuffer,
}

impl MaxExtractor {
    /// Extractor for every point of `snapshot`.
    ///
    /// `stack_specs` is registered on each per-point stack buffer and
    /// `max_specs` on the max output. Pass `RtwlConfig::internal_buffer_config`:
    /// stack windows may legitimately jump ahead and must be zero-filled.
    pub fn new(
        snapshot: Arc<TravelTimeSnapshot>,
        config: &BufferConfig,
        margin_ticks: i64,
        policy: ReadinessPolicy,
        stack_specs: &[OperatorSpec],
        max_specs: &[OperatorSpec],
    ) -> Result<Self, BufferError> {
        let stacks = (0..snapshot.npts())
            .map(|p| {
                StreamBuffer::new(format!("stack@{}", p), config.clone())?
                    .with_operators(stack_specs)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            stacks,
            join: WindowJoin::new(margin_ticks, policy),
            max_out: StreamBuffer::new("max", config.clone())?.with_operators(max_specs)?,
            x_out: StreamBuffer::new("x", config.clone())?,
            y_out: StreamBuffer::new("y", config.clone())?,
            z_out: StreamBuffer::new("z", config.clone())?,
            snapshot,
        })
    }

    pub fn generation(&self) -> u64 {
        self.snapshot.generation
    }

    pub fn watermark(&self) -> i64 {
        self.join.watermark()
    }

    /// Add a point's stacked window.
    ///
    /// Returns `Ok(false)` when the trace belongs to another table generation;
    /// such traces are never mixed into this extractor.
    pub fn push(&mut self, trace: &StackedTrace) -> Result<bool, BufferError> {
        if trace.generation != self.snapshot.generation {
            log::debug!(
                "dropping stack of point {} from generation {} (current {})",
                trace.point,
                trace.generation,
                self.snapshot.generation
            );
            return Ok(false);
        }
        let Some(buffer) = self.stacks.get_mut(trace.point) else {
            log::debug!("dropping stack of unknown point {}", trace.point);
            return Ok(false);
        };
        buffer.append_at(trace.start_tick(), &trace.samples)?;
        Ok(true)
    }

    /// Release the next complete window across all points
    pub fn tick(&mut self) -> Result<Option<LocationWindow>, BufferError> {
        let Some(window) = self.join.resolve(&self.stacks) else {
            return Ok(None);
        };

        let n = window.len();
        let mut max = vec![f32::NEG_INFINITY; n];
        let mut argmax = vec![0usize; n];
        for &point in &window.ready {
            let Some(samples) = self.stacks[point].slice(window.start, window.end) else {
                continue;
            };
            for (i, s) in samples.into_iter().enumerate() {
                if s > max[i] {
                    max[i] = s;
                    argmax[i] = point;
                }
            }
        }
        let coords: Vec<GridPoint> = argmax
            .iter()
            .map(|&p| self.snapshot.point(p).copied().unwrap_or_default())
            .collect();
        let x: Vec<f32> = coords.iter().map(|c| c.x as f32).collect();
        let y: Vec<f32> = coords.iter().map(|c| c.y as f32).collect();
        let z: Vec<f32> = coords.iter().map(|c| c.z as f32).collect();

        // a failed write leaves the watermark alone so the window is retried
        write_window(&mut self.max_out, window.start, window.end, &max)?;
        write_window(&mut self.x_out, window.start, window.end, &x)?;
        write_window(&mut self.y_out, window.start, window.end, &y)?;
        write_window(&mut self.z_out, window.start, window.end, &z)?;
        self.join.advance(&window);

        // read the smoothed max back for exactly this window
        let max = self
            .max_out
            .slice(window.start, window.end)
            .unwrap_or(max);

        log::debug!(
            "max over {} points released for ticks [{}, {}]",
            window.ready.len(),
            window.start,
            window.end
        );

        Ok(Some(LocationWindow {
            generation: self.snapshot.generation,
            start: time_of(window.start, self.snapshot.dt),
            dt: self.snapshot.dt,
            max,
            x,
            y,
            z,
            argmax,
        }))
    }

    /// Retained max trace
    pub fn max_trace(&self) -> &StreamBuffer {
        &self.max_out
    }

    /// Retained coordinate traces of the argmax point
    pub fn coordinate_traces(&self) -> [&StreamBuffer; 3] {
        [&self.x_out, &self.y_out, &self.z_out]
    }

    /// Restart against a new table generation
    pub fn reset(
        &mut self,
        snapshot: Arc<TravelTimeSnapshot>,
        config: &BufferConfig,
        stack_specs: &[OperatorSpec],
        max_specs: &[OperatorSpec],
    ) -> Result<(), BufferError> {
        *self = MaxExtractor::new(
            snapshot,
            config,
            self.join.margin_ticks(),
            self.join.policy(),
            stack_specs,
            max_specs,
        )?;
        Ok(())
    }
}

/// Append one output window unless an earlier attempt already wrote it
fn write_window(
    out: &mut StreamBuffer,
    start: i64,
    end: i64,
    samples: &[f32],
) -> Result<(), BufferError> {
    if out.end_tick().is_some_and(|last| last >= end) {
        return Ok(());
    }
    out.append_at(start, samples)?;
    Ok(())
}

impl std::fmt::Debug for MaxExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MaxExtractor")
            .field("generation", &self.snapshot.generation)
            .field("points", &self.stacks.len())
            .field("watermark", &self.join.watermark())
            .finish()
    }
}
