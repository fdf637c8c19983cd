//! Synthetic events for offline runs and tests
//!
//! A source at a grid point emits a Gaussian pulse at the origin time; each
//! station records it after its straight-ray travel time (rounded to whole
//! samples). Traces are then cut into delivery rounds to mimic real-time
//! arrival.

use crate::chunk::{tick_of, time_of, Chunk};
use crate::config::ConfigError;
use crate::error::{Result, RtwlError};
use crate::migration::{GridPoint, HomogeneousProvider, RegularGrid, StationLocation};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SyntheticConfig {
    /// Sample interval (seconds)
    #[serde(default = "default_dt")]
    pub dt: f64,

    /// Samples per trace
    #[serde(default = "default_npts")]
    pub npts: usize,

    /// Origin time relative to the trace start (seconds)
    #[serde(default = "default_origin_offset")]
    pub origin_offset: f64,

    /// Standard deviation of the pulse (seconds)
    #[serde(default = "default_pulse_width")]
    pub pulse_width: f64,

    /// Delivery rounds each trace is cut into
    #[serde(default = "default_chunks")]
    pub chunks: usize,

    /// Trace start, seconds since the epoch; current time when absent
    #[serde(default)]
    pub start: Option<f64>,
}

fn default_dt() -> f64 {
    0.01
}
fn default_npts() -> usize {
    12_000
}
fn default_origin_offset() -> f64 {
    50.0
}
fn default_pulse_width() -> f64 {
    0.2
}
fn default_chunks() -> usize {
    3
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            dt: default_dt(),
            npts: default_npts(),
            origin_offset: default_origin_offset(),
            pulse_width: default_pulse_width(),
            chunks: default_chunks(),
            start: None,
        }
    }
}

impl SyntheticConfig {
    /// Trace start snapped to a whole sample
    pub fn start_time(&self) -> f64 {
        let start = self
            .start
            .unwrap_or_else(|| chrono::Utc::now().timestamp() as f64);
        time_of(tick_of(start, self.dt), self.dt)
    }

    fn validate(&self) -> std::result::Result<(), ConfigError> {
        let invalid = |field: &'static str, message: &str| ConfigError::Invalid {
            field,
            message: message.to_string(),
        };
        if !(self.dt.is_finite() && self.dt > 0.0) {
            return Err(invalid("dt", "must be positive and finite"));
        }
        if self.npts == 0 {
            return Err(invalid("npts", "must be at least 1"));
        }
        if !(self.pulse_width.is_finite() && self.pulse_width > 0.0) {
            return Err(invalid("pulse_width", "must be positive and finite"));
        }
        if self.chunks == 0 {
            return Err(invalid("chunks", "must be at least 1"));
        }
        Ok(())
    }
}

/// A synthetic source and the traces it produced
#[derive(Debug, Clone)]
pub struct SyntheticEvent {
    pub source_index: usize,
    pub source: GridPoint,
    /// Absolute origin time (seconds since the epoch)
    pub origin_time: f64,
    /// One full trace per station, in provider order
    pub traces: Vec<Chunk>,
}

impl SyntheticEvent {
    /// Delivery rounds: round `i` holds piece `i` of every station
    pub fn rounds(&self, parts: usize) -> Vec<Vec<Chunk>> {
        split_rounds(&self.traces, parts)
    }
}

/// Record a pulse emitted at grid point `source_index` on every station
pub fn make_synthetic_data(
    provider: &HomogeneousProvider,
    source_index: usize,
    config: &SyntheticConfig,
) -> Result<SyntheticEvent> {
    config.validate()?;
    let source = provider
        .grid()
        .points()
        .get(source_index)
        .copied()
        .ok_or_else(|| {
            RtwlError::Config(ConfigError::Invalid {
                field: "source_index",
                message: format!(
                    "{} outside grid of {} points",
                    source_index,
                    provider.grid().len()
                ),
            })
        })?;

    let start = config.start_time();
    let origin_time = start + config.origin_offset;
    let dt = config.dt;
    let width2 = config.pulse_width * config.pulse_width;

    let traces = provider
        .stations()
        .iter()
        .zip(provider.travel_times_from(&source))
        .map(|(station, tt)| {
            let t_obs = config.origin_offset + time_of(tick_of(tt, dt), dt);
            let samples = (0..config.npts)
                .map(|i| {
                    let t = i as f64 * dt - t_obs;
                    (-0.5 * t * t / width2).exp() as f32
                })
                .collect();
            Chunk::new(station.id.clone(), start, dt, samples)
        })
        .collect();

    log::debug!(
        "synthetic source at point {} ({:.2}, {:.2}, {:.2}), origin {:.2}",
        source_index,
        source.x,
        source.y,
        source.z,
        origin_time
    );

    Ok(SyntheticEvent {
        source_index,
        source,
        origin_time,
        traces,
    })
}

/// Cut every trace into `parts` pieces and group piece `i` of each station
pub fn split_rounds(traces: &[Chunk], parts: usize) -> Vec<Vec<Chunk>> {
    let pieces: Vec<Vec<Chunk>> = traces.iter().map(|t| t.split(parts)).collect();
    let rounds = pieces.iter().map(Vec::len).max().unwrap_or(0);
    (0..rounds)
        .map(|i| pieces.iter().filter_map(|p| p.get(i).cloned()).collect())
        .collect()
}

/// Deterministic, irregular station layout on the grid's top surface.
///
/// Stations follow a sunflower spiral around the grid centre so that no two
/// stations are equidistant from it.
pub fn spiral_stations(grid: &RegularGrid, count: usize) -> Vec<StationLocation> {
    let [nx, ny, _] = grid.shape;
    let cx = grid.origin.x + (nx.saturating_sub(1)) as f64 * grid.spacing / 2.0;
    let cy = grid.origin.y + (ny.saturating_sub(1)) as f64 * grid.spacing / 2.0;
    let radius = (nx.max(ny) as f64) * grid.spacing;
    let golden_angle = std::f64::consts::PI * (3.0 - 5f64.sqrt());

    (0..count)
        .map(|k| {
            let r = radius * ((k as f64 + 0.5) / count as f64).sqrt();
            let theta = k as f64 * golden_angle;
            StationLocation::new(
                format!("ST{:02}", k + 1),
                GridPoint::new(cx + r * theta.cos(), cy + r * theta.sin(), grid.origin.z),
            )
        })
        .collect()
}
