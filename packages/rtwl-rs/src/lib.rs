pub mod buffer;
pub mod chunk;
pub mod config;
pub mod error;
pub mod migration;
pub mod signal_processing;
pub mod streaming;
pub mod synthetics;

pub use buffer::{BufferConfig, BufferError, BufferMetrics, GapPolicy, StreamBuffer};
pub use chunk::{Chunk, ChunkError};
pub use config::{ConfigError, GaussianFilterConfig, RtwlConfig};
pub use error::{Result, RtwlError};
pub use migration::{
    GridPoint, HomogeneousProvider, JsonFileProvider, LocationPeak, LocationWindow, MaxExtractor,
    ReadinessPolicy, RegionPartition, RegionStacker, RegularGrid, ShiftedPointAccumulator,
    StackEngine, StackedTrace, StaticProvider, StationLocation, TravelTimeError,
    TravelTimeProvider, TravelTimeSnapshot, TravelTimeTable,
};
pub use signal_processing::{
    gaussian_kernel, Operator, OperatorError, OperatorSpec, PreprocessingPreset, StationProcessor,
};
pub use streaming::{
    ControlSignal, PipelineCoordinator, PipelineEvent, PipelineHandle, PipelineStats,
    ReplayPacing, WorkerState,
};
pub use synthetics::{make_synthetic_data, SyntheticConfig, SyntheticEvent};
