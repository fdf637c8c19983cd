//! Filter kernel construction

use super::operators::{OperatorError, OperatorSpec};
use std::f64::consts::PI;

/// Real impulse response of a Gaussian band filter, ready for convolution
#[derive(Debug, Clone, PartialEq)]
pub struct GaussianKernel {
    pub coefficients: Vec<f64>,
    pub dt: f64,
}

impl GaussianKernel {
    /// Half-length `N` of the `2N+1` kernel
    pub fn half_len(&self) -> usize {
        (self.coefficients.len() - 1) / 2
    }

    /// Delay introduced by convolving with this kernel, in seconds
    pub fn shift_secs(&self) -> f64 {
        self.half_len() as f64 * self.dt
    }

    pub fn into_spec(self) -> OperatorSpec {
        OperatorSpec::Convolve {
            kernel: self.coefficients,
        }
    }
}

/// Build a Gaussian band filter centred on `f0` Hz with half-width `sigma_f` Hz.
///
/// The kernel spans +/- 4 time-domain sigmas, so its length is always odd.
/// Only the real part of the complex response is kept since the inputs are
/// real-valued traces.
pub fn gaussian_kernel(f0: f64, sigma_f: f64, dt: f64) -> Result<GaussianKernel, OperatorError> {
    if !(dt.is_finite() && dt > 0.0) {
        return Err(OperatorError::InvalidDt(dt));
    }
    if !(f0.is_finite() && f0 >= 0.0) {
        return Err(OperatorError::InvalidFilter(format!(
            "centre frequency must be finite and non-negative, got {}",
            f0
        )));
    }
    if !(sigma_f.is_finite() && sigma_f > 0.0) {
        return Err(OperatorError::InvalidFilter(format!(
            "frequency half-width must be finite and positive, got {}",
            sigma_f
        )));
    }

    let sigma_t = 1.0 / (2.0 * PI * sigma_f);
    let n1 = (sigma_t / dt).floor() as usize;
    let len = 8 * n1 + 1;
    let norm = 1.0 / ((2.0 * PI).sqrt() * sigma_f);

    let coefficients = (0..len)
        .map(|i| {
            let t = i as f64 * dt - (4 * n1) as f64 * dt;
            norm * (-t * t / (2.0 * sigma_t * sigma_t)).exp() * (2.0 * PI * f0 * t).cos()
        })
        .collect();

    Ok(GaussianKernel { coefficients, dt })
}
