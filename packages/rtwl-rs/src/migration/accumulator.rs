use crate::buffer::{BufferConfig, BufferError, StreamBuffer};
use crate::chunk::{time_of, Chunk};
use crate::signal_processing::OperatorSpec;

/// Station traces shifted onto one grid point.
///
/// Holds one buffer per station of the table generation it was built from.
/// A chunk from station `s` lands in buffer `s` with its start moved earlier
/// by the station's travel time to the point, so energy radiated from the
/// point at time `t` lines up at `t` in every buffer.
#[derive(Debug)]
pub struct ShiftedPointAccumulator {
    point: usize,
    shifts: Vec<i64>,
    buffers: Vec<StreamBuffer>,
}

impl ShiftedPointAccumulator {
    pub fn new(
        point: usize,
        stations: &[String],
        shifts: Vec<i64>,
        config: &BufferConfig,
        specs: &[OperatorSpec],
    ) -> Result<Self, BufferError> {
        if shifts.len() != stations.len() {
            return Err(BufferError::InvalidConfig(format!(
                "point {}: {} shifts for {} stations",
                point,
                shifts.len(),
                stations.len()
            )));
        }
        let buffers = stations
            .iter()
            .map(|sta| {
                StreamBuffer::new(format!("{}@{}", sta, point), config.clone())?
                    .with_operators(specs)
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            point,
            shifts,
            buffers,
        })
    }

    pub fn point(&self) -> usize {
        self.point
    }

    /// Shift of `station` in samples
    pub fn shift(&self, station: usize) -> Option<i64> {
        self.shifts.get(station).copied()
    }

    pub fn buffers(&self) -> &[StreamBuffer] {
        &self.buffers
    }

    /// Append a processed station chunk, shifted back by the station's delay
    pub fn push(&mut self, station: usize, chunk: &Chunk) -> Result<Chunk, BufferError> {
        let (Some(&shift), Some(buffer)) = (self.shifts.get(station), self.buffers.get_mut(station))
        else {
            return Err(BufferError::InvalidConfig(format!(
                "point {} has no station {}",
                self.point, station
            )));
        };
        buffer.append(&chunk.shifted(-time_of(shift, chunk.dt)))
    }

    pub fn reset(&mut self) {
        for buffer in self.buffers.iter_mut() {
            buffer.reset();
        }
    }
}
