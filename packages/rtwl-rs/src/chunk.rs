// Chunks of equally spaced samples and the sample-tick clock shared by every buffer.
//
// Times are f64 seconds since the Unix epoch. Buffers index samples by an
// integer tick `round(t / dt)` so that window arithmetic is exact.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Relative tolerance used when comparing two sample intervals.
pub const DT_TOLERANCE: f64 = 1e-6;

/// Largest tick magnitude a buffer accepts. Ticks stay exact in f64 and
/// tick arithmetic cannot overflow i64.
pub const MAX_TICK: i64 = 1 << 53;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ChunkError {
    #[error("{station}: chunk start {start} is outside the representable time range")]
    StartOutOfRange { station: String, start: f64 },

    #[error("{station}: sample {index} is not finite")]
    NonFiniteSample { station: String, index: usize },
}

/// A contiguous slice of one station's waveform
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    /// Station (channel) identifier
    pub station: String,

    /// Time of the first sample, seconds since the Unix epoch
    pub start: f64,

    /// Sample interval in seconds
    pub dt: f64,

    /// Samples at `dt` spacing
    pub samples: Vec<f32>,
}

impl Chunk {
    pub fn new(station: impl Into<String>, start: f64, dt: f64, samples: Vec<f32>) -> Self {
        Self {
            station: station.into(),
            start,
            dt,
            samples,
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Time of the last sample (inclusive). Equals `start` for empty chunks.
    pub fn end(&self) -> f64 {
        self.start + self.len().saturating_sub(1) as f64 * self.dt
    }

    pub fn duration_secs(&self) -> f64 {
        self.len() as f64 * self.dt
    }

    pub fn start_tick(&self) -> i64 {
        tick_of(self.start, self.dt)
    }

    /// Check that the start maps to a valid tick span and every sample is finite
    pub fn validate(&self) -> Result<(), ChunkError> {
        if !self.start.is_finite() || !span_in_range(self.start_tick(), self.len()) {
            return Err(ChunkError::StartOutOfRange {
                station: self.station.clone(),
                start: self.start,
            });
        }
        match first_non_finite(&self.samples) {
            Some(index) => Err(ChunkError::NonFiniteSample {
                station: self.station.clone(),
                index,
            }),
            None => Ok(()),
        }
    }

    /// Copy of this chunk with its start moved by `offset` seconds
    pub fn shifted(&self, offset: f64) -> Chunk {
        Chunk {
            station: self.station.clone(),
            start: self.start + offset,
            dt: self.dt,
            samples: self.samples.clone(),
        }
    }

    /// Split into `parts` contiguous chunks of nearly equal length.
    ///
    /// Used to simulate real-time delivery of a recorded or synthetic trace.
    /// The first `len % parts` pieces get one extra sample.
    pub fn split(&self, parts: usize) -> Vec<Chunk> {
        let parts = parts.max(1).min(self.len().max(1));
        let base = self.len() / parts;
        let extra = self.len() % parts;
        let first_tick = self.start_tick();

        let mut pieces = Vec::with_capacity(parts);
        let mut offset = 0usize;
        for i in 0..parts {
            let n = base + usize::from(i < extra);
            pieces.push(Chunk {
                station: self.station.clone(),
                start: time_of(first_tick + offset as i64, self.dt),
                dt: self.dt,
                samples: self.samples[offset..offset + n].to_vec(),
            });
            offset += n;
        }
        pieces
    }
}

/// Nearest sample tick for a time
#[inline]
pub fn tick_of(time: f64, dt: f64) -> i64 {
    (time / dt).round() as i64
}

/// Whether `len` samples starting at `start_tick` stay within `±MAX_TICK`
pub fn span_in_range(start_tick: i64, len: usize) -> bool {
    let len = i64::try_from(len).unwrap_or(i64::MAX);
    start_tick >= -MAX_TICK && start_tick <= MAX_TICK - len
}

pub fn first_non_finite(samples: &[f32]) -> Option<usize> {
    samples.iter().position(|s| !s.is_finite())
}

/// Time of a sample tick
#[inline]
pub fn time_of(tick: i64, dt: f64) -> f64 {
    tick as f64 * dt
}

/// Whether two sample intervals are the same within `DT_TOLERANCE`
pub fn dt_matches(a: f64, b: f64) -> bool {
    (a - b).abs() <= DT_TOLERANCE * b.abs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_end_time_is_last_sample() {
        let chunk = Chunk::new("ST01", 10.0, 0.5, vec![0.0; 5]);
        assert!((chunk.end() - 12.0).abs() < 1e-12);
        assert!((chunk.duration_secs() - 2.5).abs() < 1e-12);
    }

    #[test]
    fn test_split_is_contiguous() {
        let samples: Vec<f32> = (0..10).map(|i| i as f32).collect();
        let chunk = Chunk::new("ST01", 100.0, 0.01, samples.clone());
        let pieces = chunk.split(3);

        assert_eq!(pieces.len(), 3);
        assert_eq!(pieces[0].len(), 4);
        assert_eq!(pieces[1].len(), 3);
        assert_eq!(pieces[2].len(), 3);
        assert_eq!(pieces[1].start_tick(), chunk.start_tick() + 4);
        assert_eq!(pieces[2].start_tick(), chunk.start_tick() + 7);

        let rejoined: Vec<f32> = pieces.iter().flat_map(|c| c.samples.clone()).collect();
        assert_eq!(rejoined, samples);
    }

    #[test]
    fn test_validate_rejects_unrepresentable_start() {
        for start in [f64::INFINITY, f64::NAN, 1e300, -1e300] {
            let chunk = Chunk::new("ST01", start, 0.01, vec![0.0; 4]);
            assert!(
                matches!(chunk.validate(), Err(ChunkError::StartOutOfRange { .. })),
                "start {} accepted",
                start
            );
        }
        assert!(Chunk::new("ST01", 1.7e9, 0.01, vec![0.0; 4]).validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_non_finite_samples() {
        let chunk = Chunk::new("ST01", 10.0, 0.01, vec![0.0, 1.0, f32::NAN]);
        assert_eq!(
            chunk.validate(),
            Err(ChunkError::NonFiniteSample {
                station: "ST01".to_string(),
                index: 2,
            })
        );
    }

    #[test]
    fn test_tick_round_trip() {
        let dt = 0.01;
        let t = 1_700_000_000.37;
        let tick = tick_of(t, dt);
        assert_eq!(tick_of(time_of(tick, dt), dt), tick);
        assert!(dt_matches(0.01, 0.010000000001));
        assert!(!dt_matches(0.01, 0.02));
    }
}
