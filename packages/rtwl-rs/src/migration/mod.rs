//! Migration and stacking
//!
//! Station traces are shifted by their travel time to every grid point,
//! summed per point (`StackEngine`), then reduced to a single maximum trace
//! over all points (`MaxExtractor`). Both stages release a window only once
//! enough data has arrived behind it (`WindowJoin`).

mod accumulator;
mod max;
mod partition;
mod region;
mod stack;
mod travel_times;
mod window;

pub use accumulator::ShiftedPointAccumulator;
pub use max::{LocationPeak, LocationWindow, MaxExtractor};
pub use partition::RegionPartition;
pub use region::RegionStacker;
pub use stack::{StackEngine, StackedTrace};
pub use travel_times::{
    GridPoint, HomogeneousProvider, JsonFileProvider, RegularGrid, StaticProvider,
    StationLocation, TravelTimeError, TravelTimeProvider, TravelTimeSnapshot, TravelTimeTable,
};
pub use window::{JoinWindow, ReadinessPolicy, WindowJoin};
