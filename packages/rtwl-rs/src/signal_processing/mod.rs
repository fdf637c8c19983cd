//! Signal Processing Module
//!
//! Causal, chunk-boundary-safe operators applied by every `StreamBuffer`:
//! - scale / offset / clamp-negative (stateless)
//! - boxcar smoothing and differentiation (short memory)
//! - FIR convolution against an odd-length kernel (tail memory)
//! - recursive kurtosis (three running moments)
//!
//! Every operator owns its memory, so feeding a signal as one block or as
//! many sub-chunks produces the same output.

mod kernels;
mod operators;
mod pipeline;

pub use kernels::{gaussian_kernel, GaussianKernel};
pub use operators::{build_operators, Operator, OperatorError, OperatorSpec};
pub use pipeline::{PreprocessingPreset, StationProcessor};
