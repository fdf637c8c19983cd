// Bounded, time-ordered sample buffer for one channel
//
// Every append passes through the buffer's registered operators, so each
// buffer is also the owner of its operators' memory. Samples are indexed by
// integer tick (see `chunk::tick_of`).

use crate::chunk::{dt_matches, first_non_finite, span_in_range, time_of, Chunk, ChunkError};
use crate::signal_processing::{Operator, OperatorError, OperatorSpec};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use thiserror::Error;

/// What to do when a chunk starts after the end of retained data
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum GapPolicy {
    /// Fill missing samples with zeros and run them through the operators
    #[default]
    ZeroFill,

    /// Refuse the chunk
    Reject,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum BufferError {
    #[error("{channel}: chunk dt {found} does not match buffer dt {expected}")]
    DtMismatch {
        channel: String,
        expected: f64,
        found: f64,
    },

    #[error("{channel}: chunk starting at {start} overlaps retained data ending at {retained_end}")]
    Overlap {
        channel: String,
        start: f64,
        retained_end: f64,
    },

    #[error("{channel}: {missing} samples missing before {start}")]
    Gap {
        channel: String,
        start: f64,
        missing: i64,
    },

    #[error("Invalid buffer configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Chunk(#[from] ChunkError),

    #[error(transparent)]
    Operator(#[from] OperatorError),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BufferConfig {
    /// Sample interval in seconds
    pub dt: f64,

    /// Retention horizon in seconds, measured back from the buffer end
    pub max_length: f64,

    #[serde(default)]
    pub gap_policy: GapPolicy,

    /// Reject chunks that overlap retained data (otherwise trim them)
    #[serde(default = "default_overlap_check")]
    pub overlap_check: bool,
}

fn default_overlap_check() -> bool {
    true
}

impl BufferConfig {
    pub fn new(dt: f64, max_length: f64) -> Self {
        Self {
            dt,
            max_length,
            gap_policy: GapPolicy::default(),
            overlap_check: true,
        }
    }

    pub fn with_gap_policy(mut self, gap_policy: GapPolicy) -> Self {
        self.gap_policy = gap_policy;
        self
    }

    pub fn with_overlap_check(mut self, overlap_check: bool) -> Self {
        self.overlap_check = overlap_check;
        self
    }

    /// Number of samples retained
    pub fn capacity(&self) -> usize {
        ((self.max_length / self.dt).round() as usize).max(1)
    }

    pub fn validate(&self) -> Result<(), BufferError> {
        if !(self.dt.is_finite() && self.dt > 0.0) {
            return Err(BufferError::InvalidConfig(format!(
                "dt must be positive and finite, got {}",
                self.dt
            )));
        }
        if !(self.max_length.is_finite() && self.max_length > 0.0) {
            return Err(BufferError::InvalidConfig(format!(
                "max_length must be positive and finite, got {}",
                self.max_length
            )));
        }
        Ok(())
    }
}

/// Counters for one buffer
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BufferMetrics {
    pub appended_samples: u64,
    pub rejected_chunks: u64,
    pub zero_filled_samples: u64,
    pub trimmed_samples: u64,
    pub evicted_samples: u64,
    pub current_size: usize,
    pub capacity: usize,
}

pub struct StreamBuffer {
    channel: String,
    config: BufferConfig,
    capacity: usize,

    /// Tick of `data[0]`; `None` until the first accepted sample
    first_tick: Option<i64>,
    data: VecDeque<f32>,
    operators: Vec<Operator>,
    metrics: BufferMetrics,
}

impl StreamBuffer {
    pub fn new(channel: impl Into<String>, config: BufferConfig) -> Result<Self, BufferError> {
        config.validate()?;
        let capacity = config.capacity();
        Ok(Self {
            channel: channel.into(),
            config,
            capacity,
            first_tick: None,
            data: VecDeque::with_capacity(capacity),
            operators: Vec::new(),
            metrics: BufferMetrics {
                capacity,
                ..Default::default()
            },
        })
    }

    /// Register an operator at the end of the processing chain
    pub fn register(&mut self, spec: &OperatorSpec) -> Result<(), BufferError> {
        let op = Operator::new(spec, self.config.dt)?;
        self.operators.push(op);
        Ok(())
    }

    pub fn with_operators(mut self, specs: &[OperatorSpec]) -> Result<Self, BufferError> {
        for spec in specs {
            self.register(spec)?;
        }
        Ok(self)
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn dt(&self) -> f64 {
        self.config.dt
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn operators(&self) -> &[Operator] {
        &self.operators
    }

    pub fn start_tick(&self) -> Option<i64> {
        self.first_tick.filter(|_| !self.data.is_empty())
    }

    /// Tick of the last retained sample
    pub fn end_tick(&self) -> Option<i64> {
        self.start_tick()
            .and_then(|first| first.checked_add(self.data.len() as i64 - 1))
    }

    pub fn start_time(&self) -> Option<f64> {
        self.start_tick().map(|t| time_of(t, self.config.dt))
    }

    pub fn end_time(&self) -> Option<f64> {
        self.end_tick().map(|t| time_of(t, self.config.dt))
    }

    pub fn metrics(&self) -> BufferMetrics {
        BufferMetrics {
            current_size: self.data.len(),
            ..self.metrics.clone()
        }
    }

    /// Append a chunk and return the processed samples that were accepted.
    ///
    /// The returned chunk starts at the first newly written tick, which is
    /// earlier than `chunk.start` when a gap was zero-filled and later when an
    /// overlapping head was trimmed.
    pub fn append(&mut self, chunk: &Chunk) -> Result<Chunk, BufferError> {
        if !dt_matches(chunk.dt, self.config.dt) {
            self.metrics.rejected_chunks += 1;
            log::warn!(
                "{}: rejecting chunk with dt {} (buffer dt {})",
                self.channel,
                chunk.dt,
                self.config.dt
            );
            return Err(BufferError::DtMismatch {
                channel: self.channel.clone(),
                expected: self.config.dt,
                found: chunk.dt,
            });
        }

        if let Err(err) = chunk.validate() {
            self.metrics.rejected_chunks += 1;
            log::warn!("{}: rejecting chunk: {}", self.channel, err);
            return Err(err.into());
        }

        let (tick, samples) = self.append_at(chunk.start_tick(), &chunk.samples)?;
        Ok(Chunk::new(
            chunk.station.clone(),
            time_of(tick, self.config.dt),
            self.config.dt,
            samples,
        ))
    }

    /// Append samples whose first sample sits at `start_tick`.
    ///
    /// Returns the tick of the first written sample and the processed samples.
    pub fn append_at(
        &mut self,
        start_tick: i64,
        samples: &[f32],
    ) -> Result<(i64, Vec<f32>), BufferError> {
        if !span_in_range(start_tick, samples.len()) {
            self.metrics.rejected_chunks += 1;
            return Err(ChunkError::StartOutOfRange {
                station: self.channel.clone(),
                start: time_of(start_tick, self.config.dt),
            }
            .into());
        }
        if let Some(index) = first_non_finite(samples) {
            self.metrics.rejected_chunks += 1;
            return Err(ChunkError::NonFiniteSample {
                station: self.channel.clone(),
                index,
            }
            .into());
        }
        if samples.is_empty() {
            return Ok((start_tick, Vec::new()));
        }

        let mut write_tick = start_tick;
        let mut input: &[f32] = samples;
        let mut zeros = 0usize;

        if let Some(end) = self.end_tick() {
            // both ends lie within ±MAX_TICK, so this cannot overflow
            let expected = end + 1;

            if start_tick < expected {
                if self.config.overlap_check {
                    self.metrics.rejected_chunks += 1;
                    log::warn!(
                        "{}: rejecting chunk at {:.4}, retained data ends at {:.4}",
                        self.channel,
                        time_of(start_tick, self.config.dt),
                        time_of(end, self.config.dt)
                    );
                    return Err(BufferError::Overlap {
                        channel: self.channel.clone(),
                        start: time_of(start_tick, self.config.dt),
                        retained_end: time_of(end, self.config.dt),
                    });
                }

                let overlap = (expected - start_tick) as usize;
                let trimmed = overlap.min(samples.len());
                self.metrics.trimmed_samples += trimmed as u64;
                if overlap >= samples.len() {
                    log::debug!(
                        "{}: chunk lies inside retained data, nothing appended",
                        self.channel
                    );
                    return Ok((expected, Vec::new()));
                }
                input = &samples[overlap..];
                write_tick = expected;
            } else if start_tick > expected {
                let missing = start_tick - expected;
                match self.config.gap_policy {
                    GapPolicy::Reject => {
                        self.metrics.rejected_chunks += 1;
                        log::warn!(
                            "{}: rejecting chunk at {:.4}, {} samples missing",
                            self.channel,
                            time_of(start_tick, self.config.dt),
                            missing
                        );
                        return Err(BufferError::Gap {
                            channel: self.channel.clone(),
                            start: time_of(start_tick, self.config.dt),
                            missing,
                        });
                    }
                    GapPolicy::ZeroFill => {
                        if missing as usize > self.capacity {
                            // Nothing retained would survive; restart the buffer
                            // just before the new chunk.
                            log::debug!(
                                "{}: gap of {} samples exceeds retention, re-anchoring",
                                self.channel,
                                missing
                            );
                            self.metrics.evicted_samples += self.data.len() as u64;
                            self.data.clear();
                            zeros = self.capacity;
                            self.first_tick = Some(start_tick - zeros as i64);
                        } else {
                            zeros = missing as usize;
                        }
                        write_tick = start_tick - zeros as i64;
                        self.metrics.zero_filled_samples += zeros as u64;
                    }
                }
            }
        }

        let mut processed = Vec::with_capacity(zeros + input.len());
        processed.resize(zeros, 0.0f32);
        processed.extend_from_slice(input);
        for op in self.operators.iter_mut() {
            op.apply(&mut processed);
        }

        if self.data.is_empty() {
            self.first_tick = Some(write_tick);
        }
        self.data.extend(processed.iter().copied());
        self.metrics.appended_samples += input.len() as u64;
        self.evict();

        Ok((write_tick, processed))
    }

    /// Drop samples older than the retention horizon
    fn evict(&mut self) {
        let excess = self.data.len().saturating_sub(self.capacity);
        if excess == 0 {
            return;
        }
        self.data.drain(..excess);
        if let Some(first) = self.first_tick.as_mut() {
            *first += excess as i64;
        }
        self.metrics.evicted_samples += excess as u64;
    }

    /// Copy of the samples in the inclusive tick window `[from, to]`.
    ///
    /// Returns `None` unless the whole window is retained.
    pub fn slice(&self, from: i64, to: i64) -> Option<Vec<f32>> {
        let start = self.start_tick()?;
        let end = self.end_tick()?;
        if from > to || from < start || to > end {
            return None;
        }
        let lo = (from - start) as usize;
        let hi = (to - start) as usize;
        Some(self.data.range(lo..=hi).copied().collect())
    }

    /// All retained samples, oldest first
    pub fn samples(&self) -> Vec<f32> {
        self.data.iter().copied().collect()
    }

    /// Clear retained data and every operator's memory
    pub fn reset(&mut self) {
        self.data.clear();
        self.first_tick = None;
        for op in self.operators.iter_mut() {
            op.reset();
        }
    }
}

impl std::fmt::Debug for StreamBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamBuffer")
            .field("channel", &self.channel)
            .field("dt", &self.config.dt)
            .field("len", &self.data.len())
            .field("start_tick", &self.start_tick())
            .field(
                "operators",
                &self.operators.iter().map(|o| o.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DT: f64 = 0.01;

    fn buffer(max_length: f64) -> StreamBuffer {
        StreamBuffer::new("ST01", BufferConfig::new(DT, max_length)).unwrap()
    }

    fn chunk(start: f64, samples: Vec<f32>) -> Chunk {
        Chunk::new("ST01", start, DT, samples)
    }

    #[test]
    fn test_append_contiguous() {
        let mut buf = buffer(10.0);
        buf.append(&chunk(100.0, vec![1.0, 2.0, 3.0])).unwrap();
        let out = buf.append(&chunk(100.03, vec![4.0, 5.0])).unwrap();

        assert_eq!(out.samples, vec![4.0, 5.0]);
        assert_eq!(buf.len(), 5);
        assert_eq!(buf.start_tick(), Some(10_000));
        assert_eq!(buf.end_tick(), Some(10_004));
        assert!((buf.end_time().unwrap() - 100.04).abs() < 1e-9);
    }

    #[test]
    fn test_overlap_rejected() {
        let mut buf = buffer(10.0);
        buf.append(&chunk(100.0, vec![1.0; 10])).unwrap();
        let err = buf.append(&chunk(100.05, vec![9.0; 10])).unwrap_err();

        assert!(matches!(err, BufferError::Overlap { .. }));
        assert_eq!(buf.len(), 10);
        assert_eq!(buf.metrics().rejected_chunks, 1);
        assert!(buf.samples().iter().all(|&s| s == 1.0));
    }

    #[test]
    fn test_overlap_trimmed_without_check() {
        let config = BufferConfig::new(DT, 10.0).with_overlap_check(false);
        let mut buf = StreamBuffer::new("ST01", config).unwrap();
        buf.append(&chunk(100.0, vec![1.0; 10])).unwrap();

        let out = buf.append(&chunk(100.05, vec![2.0; 10])).unwrap();
        assert_eq!(out.start_tick(), 10_010);
        assert_eq!(out.samples, vec![2.0; 5]);
        assert_eq!(buf.len(), 15);

        let inside = buf.append(&chunk(100.02, vec![3.0; 3])).unwrap();
        assert!(inside.is_empty());
        assert_eq!(buf.len(), 15);
        assert_eq!(buf.metrics().trimmed_samples, 8);
    }

    #[test]
    fn test_gap_zero_filled_through_operators() {
        let mut buf = buffer(10.0)
            .with_operators(&[OperatorSpec::Offset { offset: 1.0 }])
            .unwrap();
        buf.append(&chunk(100.0, vec![5.0, 5.0])).unwrap();
        let out = buf.append(&chunk(100.05, vec![5.0])).unwrap();

        // three missing ticks are filled and processed
        assert_eq!(out.start_tick(), 10_002);
        assert_eq!(out.samples, vec![1.0, 1.0, 1.0, 6.0]);
        assert_eq!(buf.len(), 6);
        assert_eq!(buf.metrics().zero_filled_samples, 3);
    }

    #[test]
    fn test_gap_rejected_by_policy() {
        let config = BufferConfig::new(DT, 10.0).with_gap_policy(GapPolicy::Reject);
        let mut buf = StreamBuffer::new("ST01", config).unwrap();
        buf.append(&chunk(100.0, vec![1.0; 4])).unwrap();

        match buf.append(&chunk(100.10, vec![1.0; 4])) {
            Err(BufferError::Gap { missing, .. }) => assert_eq!(missing, 6),
            other => panic!("expected gap error, got {:?}", other),
        }
        assert_eq!(buf.len(), 4);
    }

    #[test]
    fn test_gap_longer_than_retention_reanchors() {
        let mut buf = buffer(0.05);
        assert_eq!(buf.capacity(), 5);
        buf.append(&chunk(100.0, vec![1.0; 5])).unwrap();

        let out = buf.append(&chunk(200.0, vec![2.0, 2.0])).unwrap();
        assert_eq!(out.start_tick(), 20_000 - 5);
        assert_eq!(buf.end_tick(), Some(20_001));
        assert_eq!(buf.samples(), vec![0.0, 0.0, 0.0, 2.0, 2.0]);
    }

    #[test]
    fn test_dt_mismatch() {
        let mut buf = buffer(10.0);
        let err = buf
            .append(&Chunk::new("ST01", 100.0, 0.02, vec![1.0]))
            .unwrap_err();
        assert!(matches!(err, BufferError::DtMismatch { .. }));
    }

    #[test]
    fn test_unrepresentable_start_rejected() {
        let mut buf = buffer(10.0);
        buf.append(&chunk(100.0, vec![1.0, 1.0])).unwrap();

        for start in [f64::INFINITY, f64::NAN, 1e300] {
            let err = buf.append(&chunk(start, vec![1.0])).unwrap_err();
            assert!(matches!(
                err,
                BufferError::Chunk(ChunkError::StartOutOfRange { .. })
            ));
        }
        assert!(buf.append_at(i64::MAX, &[1.0]).is_err());
        assert_eq!(buf.metrics().rejected_chunks, 4);

        // retained data is untouched and the stream carries on
        assert_eq!(buf.end_tick(), Some(10_001));
        buf.append(&chunk(100.02, vec![2.0])).unwrap();
        assert_eq!(buf.end_tick(), Some(10_002));
    }

    #[test]
    fn test_non_finite_samples_rejected() {
        let mut buf = buffer(10.0);
        let err = buf
            .append(&chunk(100.0, vec![1.0, f32::INFINITY]))
            .unwrap_err();
        assert!(matches!(
            err,
            BufferError::Chunk(ChunkError::NonFiniteSample { index: 1, .. })
        ));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_eviction_keeps_horizon() {
        let mut buf = buffer(0.1);
        for i in 0..5 {
            let start = 100.0 + i as f64 * 0.04;
            buf.append(&chunk(start, vec![i as f32; 4])).unwrap();
        }
        assert_eq!(buf.len(), 10);
        assert_eq!(buf.end_tick(), Some(10_019));
        assert_eq!(buf.start_tick(), Some(10_010));
        assert_eq!(buf.metrics().evicted_samples, 10);
    }

    #[test]
    fn test_slice_bounds() {
        let mut buf = buffer(10.0);
        buf.append(&chunk(100.0, vec![0.0, 1.0, 2.0, 3.0])).unwrap();

        assert_eq!(buf.slice(10_001, 10_002), Some(vec![1.0, 2.0]));
        assert_eq!(buf.slice(10_003, 10_003), Some(vec![3.0]));
        assert_eq!(buf.slice(9_999, 10_002), None);
        assert_eq!(buf.slice(10_002, 10_004), None);
        assert_eq!(buf.slice(10_002, 10_001), None);
    }

    #[test]
    fn test_reset_clears_operator_memory() {
        let mut buf = buffer(10.0)
            .with_operators(&[OperatorSpec::Differentiate])
            .unwrap();
        buf.append(&chunk(100.0, vec![1.0, 2.0])).unwrap();
        buf.reset();
        assert!(buf.is_empty());

        let out = buf.append(&chunk(50.0, vec![7.0])).unwrap();
        assert_eq!(out.samples, vec![0.0]);
    }

    #[test]
    fn test_invalid_config() {
        assert!(StreamBuffer::new("ST01", BufferConfig::new(0.0, 10.0)).is_err());
        assert!(StreamBuffer::new("ST01", BufferConfig::new(0.01, -1.0)).is_err());
        assert!(buffer(1.0)
            .with_operators(&[OperatorSpec::Boxcar { width: 0 }])
            .is_err());
    }
}
