use crate::buffer::BufferError;
use crate::chunk::ChunkError;
use crate::config::ConfigError;
use crate::migration::TravelTimeError;
use crate::signal_processing::OperatorError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RtwlError {
    #[error("Buffer error: {0}")]
    Buffer(#[from] BufferError),

    #[error("Invalid chunk: {0}")]
    Chunk(#[from] ChunkError),

    #[error("Operator error: {0}")]
    Operator(#[from] OperatorError),

    #[error("Travel-time error: {0}")]
    TravelTime(#[from] TravelTimeError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Sample interval mismatch: configured dt {expected}, chunk from {station} has dt {found}")]
    DtMismatch {
        station: String,
        expected: f64,
        found: f64,
    },

    #[error("Unknown station: {0}")]
    UnknownStation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Channel closed")]
    ChannelClosed,

    #[error("Worker failed: {0}")]
    Worker(String),
}

pub type Result<T> = std::result::Result<T, RtwlError>;
