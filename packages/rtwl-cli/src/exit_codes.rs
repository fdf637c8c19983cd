pub const SUCCESS: i32 = 0;
pub const EXECUTION_ERROR: i32 = 1;
pub const INPUT_ERROR: i32 = 2;
/// The run completed but no window was located
pub const NO_LOCATION: i32 = 3;
