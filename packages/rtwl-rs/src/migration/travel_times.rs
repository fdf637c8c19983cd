// Travel-time tables, their providers, and the immutable snapshot workers read

use super::partition::RegionPartition;
use crate::chunk::tick_of;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TravelTimeError {
    #[error("Travel-time table has no {0}")]
    Empty(&'static str),

    #[error("Station {0} appears more than once")]
    DuplicateStation(String),

    #[error("Delay matrix shape mismatch: expected {expected_rows}x{expected_cols}, row {row} has {found} columns")]
    Shape {
        expected_rows: usize,
        expected_cols: usize,
        row: usize,
        found: usize,
    },

    #[error("Delay matrix has {found} rows for {expected} stations")]
    RowCount { expected: usize, found: usize },

    #[error("Non-finite travel time for station {station}, point {point}")]
    NonFinite { station: String, point: usize },

    #[error("Invalid grid: {0}")]
    InvalidGrid(String),

    #[error("Failed to load {path}: {message}")]
    Load { path: PathBuf, message: String },
}

/// Candidate source position
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct GridPoint {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl GridPoint {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn distance(&self, other: &GridPoint) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

/// Station-by-point delay matrix with point coordinates
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TravelTimeTable {
    /// Station identifiers; row order of `delays`
    pub stations: Vec<String>,

    pub points: Vec<GridPoint>,

    /// `delays[station][point]`, seconds
    pub delays: Vec<Vec<f64>>,
}

impl TravelTimeTable {
    pub fn new(
        stations: Vec<String>,
        points: Vec<GridPoint>,
        delays: Vec<Vec<f64>>,
    ) -> Result<Self, TravelTimeError> {
        let table = Self {
            stations,
            points,
            delays,
        };
        table.validate()?;
        Ok(table)
    }

    pub fn nsta(&self) -> usize {
        self.stations.len()
    }

    pub fn npts(&self) -> usize {
        self.points.len()
    }

    pub fn station_index(&self, station: &str) -> Option<usize> {
        self.stations.iter().position(|s| s == station)
    }

    pub fn validate(&self) -> Result<(), TravelTimeError> {
        if self.stations.is_empty() {
            return Err(TravelTimeError::Empty("stations"));
        }
        if self.points.is_empty() {
            return Err(TravelTimeError::Empty("points"));
        }

        let mut seen = std::collections::HashSet::new();
        for station in &self.stations {
            if !seen.insert(station.as_str()) {
                return Err(TravelTimeError::DuplicateStation(station.clone()));
            }
        }

        if self.delays.len() != self.nsta() {
            return Err(TravelTimeError::RowCount {
                expected: self.nsta(),
                found: self.delays.len(),
            });
        }
        for (row, delays) in self.delays.iter().enumerate() {
            if delays.len() != self.npts() {
                return Err(TravelTimeError::Shape {
                    expected_rows: self.nsta(),
                    expected_cols: self.npts(),
                    row,
                    found: delays.len(),
                });
            }
            if let Some(point) = delays.iter().position(|d| !d.is_finite()) {
                return Err(TravelTimeError::NonFinite {
                    station: self.stations[row].clone(),
                    point,
                });
            }
        }
        Ok(())
    }
}

/// Source of travel-time tables, consulted at start-up and on every reload.
///
/// Loading may touch the filesystem, so the coordinator calls it from a
/// blocking task.
pub trait TravelTimeProvider: Send + Sync {
    fn load(&self) -> Result<TravelTimeTable, TravelTimeError>;
}

/// In-memory table that can be swapped at runtime
pub struct StaticProvider {
    table: RwLock<TravelTimeTable>,
}

impl StaticProvider {
    pub fn new(table: TravelTimeTable) -> Self {
        Self {
            table: RwLock::new(table),
        }
    }

    /// Replace the table returned by subsequent loads
    pub fn replace(&self, table: TravelTimeTable) {
        *self.table.write() = table;
    }
}

impl TravelTimeProvider for StaticProvider {
    fn load(&self) -> Result<TravelTimeTable, TravelTimeError> {
        let table = self.table.read().clone();
        table.validate()?;
        Ok(table)
    }
}

/// Table stored as JSON, re-read on every load
pub struct JsonFileProvider {
    path: PathBuf,
}

impl JsonFileProvider {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Write a table where this provider will find it
    pub fn save(&self, table: &TravelTimeTable) -> Result<(), TravelTimeError> {
        let json = serde_json::to_string_pretty(table).map_err(|e| self.load_error(e))?;
        std::fs::write(&self.path, json).map_err(|e| self.load_error(e))
    }

    fn load_error(&self, err: impl std::fmt::Display) -> TravelTimeError {
        TravelTimeError::Load {
            path: self.path.clone(),
            message: err.to_string(),
        }
    }
}

impl TravelTimeProvider for JsonFileProvider {
    fn load(&self) -> Result<TravelTimeTable, TravelTimeError> {
        let text = std::fs::read_to_string(&self.path).map_err(|e| self.load_error(e))?;
        let table: TravelTimeTable = serde_json::from_str(&text).map_err(|e| self.load_error(e))?;
        table.validate()?;
        log::debug!(
            "Loaded travel times from {}: {} stations x {} points",
            self.path.display(),
            table.nsta(),
            table.npts()
        );
        Ok(table)
    }
}

/// Regular 3D grid, x varying slowest
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct RegularGrid {
    pub origin: GridPoint,
    pub spacing: f64,
    /// Number of nodes along x, y, z
    pub shape: [usize; 3],
}

impl RegularGrid {
    pub fn new(origin: GridPoint, spacing: f64, shape: [usize; 3]) -> Result<Self, TravelTimeError> {
        if !(spacing.is_finite() && spacing > 0.0) {
            return Err(TravelTimeError::InvalidGrid(format!(
                "spacing must be positive, got {}",
                spacing
            )));
        }
        if shape.iter().any(|&n| n == 0) {
            return Err(TravelTimeError::InvalidGrid(format!(
                "shape {:?} has an empty axis",
                shape
            )));
        }
        Ok(Self {
            origin,
            spacing,
            shape,
        })
    }

    pub fn len(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn index(&self, ix: usize, iy: usize, iz: usize) -> usize {
        (ix * self.shape[1] + iy) * self.shape[2] + iz
    }

    pub fn point(&self, ix: usize, iy: usize, iz: usize) -> GridPoint {
        GridPoint {
            x: self.origin.x + ix as f64 * self.spacing,
            y: self.origin.y + iy as f64 * self.spacing,
            z: self.origin.z + iz as f64 * self.spacing,
        }
    }

    pub fn points(&self) -> Vec<GridPoint> {
        let [nx, ny, nz] = self.shape;
        let mut points = Vec::with_capacity(self.len());
        for ix in 0..nx {
            for iy in 0..ny {
                for iz in 0..nz {
                    points.push(self.point(ix, iy, iz));
                }
            }
        }
        points
    }

    /// Point nearest the grid centre
    pub fn centre_index(&self) -> usize {
        self.index(self.shape[0] / 2, self.shape[1] / 2, self.shape[2] / 2)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StationLocation {
    pub id: String,
    pub position: GridPoint,
}

impl StationLocation {
    pub fn new(id: impl Into<String>, position: GridPoint) -> Self {
        Self {
            id: id.into(),
            position,
        }
    }
}

/// Straight-ray travel times through a uniform-velocity medium
#[derive(Debug, Clone)]
pub struct HomogeneousProvider {
    grid: RegularGrid,
    stations: Vec<StationLocation>,
    velocity: f64,
}

impl HomogeneousProvider {
    pub fn new(
        grid: RegularGrid,
        stations: Vec<StationLocation>,
        velocity: f64,
    ) -> Result<Self, TravelTimeError> {
        if !(velocity.is_finite() && velocity > 0.0) {
            return Err(TravelTimeError::InvalidGrid(format!(
                "velocity must be positive, got {}",
                velocity
            )));
        }
        Ok(Self {
            grid,
            stations,
            velocity,
        })
    }

    pub fn grid(&self) -> &RegularGrid {
        &self.grid
    }

    pub fn stations(&self) -> &[StationLocation] {
        &self.stations
    }

    pub fn velocity(&self) -> f64 {
        self.velocity
    }

    /// Travel time from `source` to every station, in table row order
    pub fn travel_times_from(&self, source: &GridPoint) -> Vec<f64> {
        self.stations
            .iter()
            .map(|sta| sta.position.distance(source) / self.velocity)
            .collect()
    }
}

impl TravelTimeProvider for HomogeneousProvider {
    fn load(&self) -> Result<TravelTimeTable, TravelTimeError> {
        let points = self.grid.points();
        let delays = self
            .stations
            .iter()
            .map(|sta| {
                points
                    .iter()
                    .map(|p| sta.position.distance(p) / self.velocity)
                    .collect()
            })
            .collect();
        TravelTimeTable::new(
            self.stations.iter().map(|s| s.id.clone()).collect(),
            points,
            delays,
        )
    }
}

/// Immutable view of one table generation, shared by every worker.
///
/// Delays are pre-rounded to whole samples.
#[derive(Debug, Clone)]
pub struct TravelTimeSnapshot {
    pub generation: u64,
    pub dt: f64,
    pub table: Arc<TravelTimeTable>,
    pub partition: RegionPartition,
    station_index: HashMap<String, usize>,
    /// `shift_ticks[station][point]`
    shift_ticks: Vec<Vec<i64>>,
}

impl TravelTimeSnapshot {
    pub fn build(
        generation: u64,
        table: TravelTimeTable,
        dt: f64,
        number_of_regions: usize,
    ) -> Result<Self, TravelTimeError> {
        table.validate()?;
        let station_index = table
            .stations
            .iter()
            .enumerate()
            .map(|(i, s)| (s.clone(), i))
            .collect();
        let shift_ticks = table
            .delays
            .iter()
            .map(|row| row.iter().map(|&tt| tick_of(tt, dt)).collect())
            .collect();
        let partition = RegionPartition::split(table.npts(), number_of_regions);

        Ok(Self {
            generation,
            dt,
            table: Arc::new(table),
            partition,
            station_index,
            shift_ticks,
        })
    }

    pub fn nsta(&self) -> usize {
        self.table.nsta()
    }

    pub fn npts(&self) -> usize {
        self.table.npts()
    }

    pub fn stations(&self) -> &[String] {
        &self.table.stations
    }

    pub fn station_index(&self, station: &str) -> Option<usize> {
        self.station_index.get(station).copied()
    }

    pub fn point(&self, point: usize) -> Option<&GridPoint> {
        self.table.points.get(point)
    }

    pub fn shift_ticks(&self, station: usize, point: usize) -> i64 {
        self.shift_ticks[station][point]
    }

    /// Shifts of every station towards `point`, in station order
    pub fn point_shifts(&self, point: usize) -> Vec<i64> {
        self.shift_ticks.iter().map(|row| row[point]).collect()
    }
}
