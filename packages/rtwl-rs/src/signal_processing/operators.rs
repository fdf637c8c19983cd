//! Streaming Operator Implementations
//!
//! Each `Operator` variant carries its own memory. Memory is created lazily on
//! the first call to `apply` and only cleared by `reset`.

use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use thiserror::Error;

/// Errors raised while building an operator
#[derive(Debug, Error, Clone, PartialEq)]
pub enum OperatorError {
    #[error("Convolution kernel must have an odd, non-zero length (got {0} samples)")]
    KernelLength(usize),

    #[error("Convolution kernel contains non-finite values")]
    NonFiniteKernel,

    #[error("Boxcar width must be at least 1 sample")]
    ZeroWidth,

    #[error("Kurtosis window must be finite and longer than dt ({dt}s), got {window}s")]
    InvalidWindow { window: f64, dt: f64 },

    #[error("Parameter {name} must be finite, got {value}")]
    NonFinite { name: &'static str, value: f64 },

    #[error("Sample interval must be positive and finite, got {0}")]
    InvalidDt(f64),

    #[error("Invalid filter parameter: {0}")]
    InvalidFilter(String),
}

/// Declarative description of an operator, as found in configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OperatorSpec {
    Scale { factor: f64 },
    Offset { offset: f64 },
    ClampNegative,
    Boxcar { width: usize },
    Differentiate,
    Convolve { kernel: Vec<f64> },
    Kurtosis { window: f64 },
}

/// Running state of the causal moving average
#[derive(Debug, Clone)]
pub struct BoxcarMemory {
    width: usize,
    window: Option<VecDeque<f64>>,
    sum: f64,
}

/// Previous sample for the first difference
#[derive(Debug, Clone)]
pub struct DifferentiateMemory {
    dt: f64,
    last: Option<f64>,
}

/// Kernel plus the input tail carried between chunks
#[derive(Debug, Clone)]
pub struct ConvolveMemory {
    kernel: Vec<f64>,
    tail: Option<VecDeque<f64>>,
}

/// Recursive kurtosis moments (mu1, mu2, k4_bar)
#[derive(Debug, Clone)]
pub struct KurtosisMemory {
    window: f64,
    c1: f64,
    a1: f64,
    c2: f64,
    bias: f64,
    moments: Option<(f64, f64, f64)>,
}

/// A stateful operator instance owned by exactly one buffer
#[derive(Debug, Clone)]
pub enum Operator {
    Scale { factor: f32 },
    Offset { offset: f32 },
    ClampNegative,
    Boxcar(BoxcarMemory),
    Differentiate(DifferentiateMemory),
    Convolve(ConvolveMemory),
    Kurtosis(KurtosisMemory),
}

fn finite(name: &'static str, value: f64) -> Result<f64, OperatorError> {
    if value.is_finite() {
        Ok(value)
    } else {
        Err(OperatorError::NonFinite { name, value })
    }
}

impl Operator {
    /// Build an operator for a buffer sampled at `dt`.
    ///
    /// All parameter validation happens here so that a malformed operator is
    /// refused at registration rather than on first use.
    pub fn new(spec: &OperatorSpec, dt: f64) -> Result<Self, OperatorError> {
        if !(dt.is_finite() && dt > 0.0) {
            return Err(OperatorError::InvalidDt(dt));
        }

        match spec {
            OperatorSpec::Scale { factor } => Ok(Operator::Scale {
                factor: finite("factor", *factor)? as f32,
            }),
            OperatorSpec::Offset { offset } => Ok(Operator::Offset {
                offset: finite("offset", *offset)? as f32,
            }),
            OperatorSpec::ClampNegative => Ok(Operator::ClampNegative),
            OperatorSpec::Boxcar { width } => {
                if *width == 0 {
                    return Err(OperatorError::ZeroWidth);
                }
                Ok(Operator::Boxcar(BoxcarMemory {
                    width: *width,
                    window: None,
                    sum: 0.0,
                }))
            }
            OperatorSpec::Differentiate => {
                Ok(Operator::Differentiate(DifferentiateMemory { dt, last: None }))
            }
            OperatorSpec::Convolve { kernel } => {
                if kernel.is_empty() || kernel.len() % 2 == 0 {
                    return Err(OperatorError::KernelLength(kernel.len()));
                }
                if kernel.iter().any(|v| !v.is_finite()) {
                    return Err(OperatorError::NonFiniteKernel);
                }
                Ok(Operator::Convolve(ConvolveMemory {
                    kernel: kernel.clone(),
                    tail: None,
                }))
            }
            OperatorSpec::Kurtosis { window } => {
                if !(window.is_finite() && *window > dt) {
                    return Err(OperatorError::InvalidWindow {
                        window: *window,
                        dt,
                    });
                }
                let c1 = dt / window;
                let a1 = 1.0 - c1;
                Ok(Operator::Kurtosis(KurtosisMemory {
                    window: *window,
                    c1,
                    a1,
                    c2: (1.0 - a1 * a1) / 2.0,
                    bias: -3.0 * c1 - 3.0,
                    moments: None,
                }))
            }
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Operator::Scale { .. } => "scale",
            Operator::Offset { .. } => "offset",
            Operator::ClampNegative => "clamp_negative",
            Operator::Boxcar(_) => "boxcar",
            Operator::Differentiate(_) => "differentiate",
            Operator::Convolve(_) => "convolve",
            Operator::Kurtosis(_) => "kurtosis",
        }
    }

    /// Specification this operator was built from
    pub fn spec(&self) -> OperatorSpec {
        match self {
            Operator::Scale { factor } => OperatorSpec::Scale {
                factor: *factor as f64,
            },
            Operator::Offset { offset } => OperatorSpec::Offset {
                offset: *offset as f64,
            },
            Operator::ClampNegative => OperatorSpec::ClampNegative,
            Operator::Boxcar(m) => OperatorSpec::Boxcar { width: m.width },
            Operator::Differentiate(_) => OperatorSpec::Differentiate,
            Operator::Convolve(m) => OperatorSpec::Convolve {
                kernel: m.kernel.clone(),
            },
            Operator::Kurtosis(m) => OperatorSpec::Kurtosis { window: m.window },
        }
    }

    /// Output delay in samples introduced by this operator.
    ///
    /// Only convolution delays its output: a kernel of `2N+1` points shifts
    /// the signal `N` samples late.
    pub fn delay_samples(&self) -> usize {
        match self {
            Operator::Convolve(m) => (m.kernel.len() - 1) / 2,
            _ => 0,
        }
    }

    /// Transform `samples` in place, updating this operator's memory
    pub fn apply(&mut self, samples: &mut [f32]) {
        match self {
            Operator::Scale { factor } => {
                for s in samples.iter_mut() {
                    *s *= *factor;
                }
            }
            Operator::Offset { offset } => {
                for s in samples.iter_mut() {
                    *s += *offset;
                }
            }
            Operator::ClampNegative => {
                for s in samples.iter_mut() {
                    if *s < 0.0 {
                        *s = 0.0;
                    }
                }
            }
            Operator::Boxcar(m) => m.apply(samples),
            Operator::Differentiate(m) => m.apply(samples),
            Operator::Convolve(m) => m.apply(samples),
            Operator::Kurtosis(m) => m.apply(samples),
        }
    }

    /// Forget all carried memory
    pub fn reset(&mut self) {
        match self {
            Operator::Boxcar(m) => {
                m.window = None;
                m.sum = 0.0;
            }
            Operator::Differentiate(m) => m.last = None,
            Operator::Convolve(m) => m.tail = None,
            Operator::Kurtosis(m) => m.moments = None,
            Operator::Scale { .. } | Operator::Offset { .. } | Operator::ClampNegative => {}
        }
    }
}

impl BoxcarMemory {
    fn apply(&mut self, samples: &mut [f32]) {
        let width = self.width;
        let window = self
            .window
            .get_or_insert_with(|| VecDeque::from(vec![0.0; width]));
        let scale = 1.0 / width as f64;

        for s in samples.iter_mut() {
            let x = *s as f64;
            let oldest = window.pop_front().unwrap_or(0.0);
            window.push_back(x);
            self.sum += x - oldest;
            if !self.sum.is_finite() {
                // inf - inf left a NaN behind; rebuild once the window is clean
                self.sum = window.iter().sum();
            }
            *s = (self.sum * scale) as f32;
        }
    }
}

impl DifferentiateMemory {
    fn apply(&mut self, samples: &mut [f32]) {
        for s in samples.iter_mut() {
            let x = *s as f64;
            let previous = self.last.unwrap_or(x);
            *s = ((x - previous) / self.dt) as f32;
            self.last = Some(x);
        }
    }
}

impl ConvolveMemory {
    /// Tail length carried between chunks: `3 * N + 1` for a `2N+1` kernel
    pub fn memory_len(&self) -> usize {
        3 * ((self.kernel.len() - 1) / 2) + 1
    }

    fn apply(&mut self, samples: &mut [f32]) {
        let mem_len = self.memory_len();
        let kernel = &self.kernel;
        let tail = self
            .tail
            .get_or_insert_with(|| VecDeque::from(vec![0.0; mem_len]));

        for s in samples.iter_mut() {
            tail.pop_front();
            tail.push_back(*s as f64);

            // tail.back() is the current sample; kernel[k] weighs the sample k steps back
            let newest = tail.len() - 1;
            let acc: f64 = kernel
                .iter()
                .enumerate()
                .map(|(k, h)| h * tail[newest - k])
                .sum();
            *s = acc as f32;
        }
    }
}

/// Largest squared deviation, in units of the running variance, fed to the
/// kurtosis recursion before the variance is re-seeded from the sample.
const MAX_NORMALISED_DEVIATION: f64 = 1e8;

impl KurtosisMemory {
    fn apply(&mut self, samples: &mut [f32]) {
        let (mut mu1, mut mu2, mut k4) = self.moments.unwrap_or((0.0, 1.0, 0.0));

        for s in samples.iter_mut() {
            let x = *s as f64;
            if !x.is_finite() {
                // Non-finite samples leave the moments untouched
                *s = (k4 + self.bias) as f32;
                continue;
            }

            let deviation = (x - mu1) * (x - mu1);
            let dx2 = if deviation == 0.0 {
                0.0
            } else if mu2.is_finite() && mu2 > 0.0 && deviation <= MAX_NORMALISED_DEVIATION * mu2 {
                deviation / mu2
            } else {
                // Variance collapsed (flat-lined channel) or blew up: re-seed from this sample
                mu2 = deviation;
                k4 = 0.0;
                1.0
            };

            let mu1_next = self.a1 * mu1 + self.c1 * x;
            let mu2_next = self.a1 * mu2 + self.c2 * deviation;
            k4 = (1.0 + self.c1 - 2.0 * self.c1 * dx2) * k4 + self.c1 * dx2 * dx2;
            if !k4.is_finite() {
                k4 = 0.0;
            }
            *s = (k4 + self.bias) as f32;
            mu1 = mu1_next;
            mu2 = mu2_next;
        }

        self.moments = Some((mu1, mu2, k4));
    }
}

/// Build an ordered operator list, failing on the first invalid spec
pub fn build_operators(specs: &[OperatorSpec], dt: f64) -> Result<Vec<Operator>, OperatorError> {
    specs.iter().map(|spec| Operator::new(spec, dt)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    const DT: f64 = 0.01;

    fn gaussian_noise(n: usize, seed: u64) -> Vec<f32> {
        let mut rng = StdRng::seed_from_u64(seed);
        (0..n)
            .map(|_| {
                // Box-Muller
                let u1: f64 = rng.gen::<f64>().max(f64::MIN_POSITIVE);
                let u2: f64 = rng.gen();
                ((-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()) as f32
            })
            .collect()
    }

    fn run_whole(spec: &OperatorSpec, signal: &[f32]) -> Vec<f32> {
        let mut op = Operator::new(spec, DT).unwrap();
        let mut out = signal.to_vec();
        op.apply(&mut out);
        out
    }

    fn run_chunked(spec: &OperatorSpec, signal: &[f32], cuts: &[usize]) -> Vec<f32> {
        let mut op = Operator::new(spec, DT).unwrap();
        let mut out = Vec::with_capacity(signal.len());
        let mut from = 0;
        for &to in cuts.iter().chain(std::iter::once(&signal.len())) {
            let mut piece = signal[from..to].to_vec();
            op.apply(&mut piece);
            out.extend(piece);
            from = to;
        }
        out
    }

    fn assert_close(a: &[f32], b: &[f32], tol: f32) {
        assert_eq!(a.len(), b.len());
        for (i, (x, y)) in a.iter().zip(b).enumerate() {
            assert!((x - y).abs() <= tol, "sample {}: {} vs {}", i, x, y);
        }
    }

    #[test]
    fn test_chunking_equivalence() {
        let signal = gaussian_noise(997, 7);
        let cuts = [1, 2, 50, 51, 300, 640, 996];
        let specs = vec![
            OperatorSpec::Scale { factor: 2.5 },
            OperatorSpec::Offset { offset: -0.75 },
            OperatorSpec::ClampNegative,
            OperatorSpec::Boxcar { width: 50 },
            OperatorSpec::Differentiate,
            OperatorSpec::Kurtosis { window: 1.0 },
            OperatorSpec::Convolve {
                kernel: vec![0.1, -0.2, 0.5, 1.0, 0.5, -0.2, 0.1],
            },
        ];

        for spec in &specs {
            let whole = run_whole(spec, &signal);
            let chunked = run_chunked(spec, &signal, &cuts);
            assert_close(&whole, &chunked, 1e-5);
        }
    }

    #[test]
    fn test_kurtosis_converges_on_gaussian_noise() {
        let signal = gaussian_noise(200_000, 42);
        let mut previous_error = f64::INFINITY;

        for window in [1.0, 3.0, 10.0] {
            let out = run_whole(&OperatorSpec::Kurtosis { window }, &signal);
            // discard the warm-up, average the steady state
            let steady = &out[out.len() / 2..];
            let mean = steady.iter().map(|&v| v as f64).sum::<f64>() / steady.len() as f64;
            assert!(
                mean.abs() < 0.25,
                "window {}: steady-state kurtosis {} not near zero",
                window,
                mean
            );
            assert!(mean.abs() < previous_error + 0.05);
            previous_error = mean.abs();
        }
    }

    #[test]
    fn test_kurtosis_reacts_to_impulsive_onset() {
        let mut signal = gaussian_noise(5_000, 3);
        for s in signal[4_000..4_010].iter_mut() {
            *s *= 40.0;
        }
        let out = run_whole(&OperatorSpec::Kurtosis { window: 3.0 }, &signal);
        let before = out[3_900..4_000].iter().cloned().fold(f32::MIN, f32::max);
        let after = out[4_000..4_100].iter().cloned().fold(f32::MIN, f32::max);
        assert!(after > 10.0 * before.max(1.0));
    }

    #[test]
    fn test_boxcar_is_causal_average() {
        let out = run_whole(&OperatorSpec::Boxcar { width: 4 }, &[4.0, 4.0, 4.0, 4.0, 8.0]);
        assert_close(&out, &[1.0, 2.0, 3.0, 4.0, 5.0], 1e-6);
    }

    #[test]
    fn test_boxcar_recovers_after_infinite_sample() {
        let mut signal = vec![1.0f32; 20];
        signal[2] = f32::INFINITY;
        let out = run_whole(&OperatorSpec::Boxcar { width: 3 }, &signal);
        assert!(out[2..5].iter().all(|v| v.is_infinite()));
        assert!(out[5..].iter().all(|v| v.is_finite()));
        assert_eq!(out[19], 1.0);
    }

    #[test]
    fn test_kurtosis_survives_flat_line() {
        // 1500 s of dead channel then a sine; the variance decays to nothing
        let mut signal = vec![0.0f32; 150_000];
        signal.extend((0..6_000).map(|i| (2.0 * std::f64::consts::PI * i as f64 * DT).sin() as f32));
        let out = run_whole(&OperatorSpec::Kurtosis { window: 3.0 }, &signal);
        assert!(out.iter().all(|v| v.is_finite()));
        let peak = out[150_000..].iter().cloned().fold(f32::MIN, f32::max);
        assert!(peak < 100.0, "kurtosis peak {} after flat line", peak);

        let mut silent = vec![0.0f32; 400_000];
        let mut op = Operator::new(&OperatorSpec::Kurtosis { window: 3.0 }, DT).unwrap();
        op.apply(&mut silent);
        let mut spike = vec![5.0f32, 0.0, 0.0];
        op.apply(&mut spike);
        assert!(spike.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_differentiate_first_sample_is_zero() {
        let out = run_whole(&OperatorSpec::Differentiate, &[1.0, 1.5, 1.0]);
        assert_close(&out, &[0.0, 50.0, -50.0], 1e-3);
    }

    #[test]
    fn test_convolution_delays_by_half_kernel() {
        let kernel = vec![0.25, 0.5, 0.25];
        let mut impulse = vec![0.0f32; 9];
        impulse[3] = 1.0;
        let out = run_whole(&OperatorSpec::Convolve { kernel: kernel.clone() }, &impulse);
        // peak lands N = 1 sample after the impulse
        assert_close(&out, &[0.0, 0.0, 0.0, 0.25, 0.5, 0.25, 0.0, 0.0, 0.0], 1e-6);

        let op = Operator::new(&OperatorSpec::Convolve { kernel }, DT).unwrap();
        assert_eq!(op.delay_samples(), 1);
        if let Operator::Convolve(m) = op {
            assert_eq!(m.memory_len(), 4);
        }
    }

    #[test]
    fn test_clamp_negative() {
        let out = run_whole(&OperatorSpec::ClampNegative, &[-1.0, 0.0, 2.0]);
        assert_eq!(out, vec![0.0, 0.0, 2.0]);
    }

    #[test]
    fn test_invalid_specs_are_rejected() {
        assert_eq!(
            Operator::new(&OperatorSpec::Convolve { kernel: vec![1.0, 1.0] }, DT).unwrap_err(),
            OperatorError::KernelLength(2)
        );
        assert_eq!(
            Operator::new(&OperatorSpec::Convolve { kernel: vec![] }, DT).unwrap_err(),
            OperatorError::KernelLength(0)
        );
        assert_eq!(
            Operator::new(&OperatorSpec::Convolve { kernel: vec![f64::NAN] }, DT).unwrap_err(),
            OperatorError::NonFiniteKernel
        );
        assert_eq!(
            Operator::new(&OperatorSpec::Boxcar { width: 0 }, DT).unwrap_err(),
            OperatorError::ZeroWidth
        );
        assert!(matches!(
            Operator::new(&OperatorSpec::Kurtosis { window: 0.001 }, DT),
            Err(OperatorError::InvalidWindow { .. })
        ));
        assert!(matches!(
            Operator::new(&OperatorSpec::Scale { factor: f64::INFINITY }, DT),
            Err(OperatorError::NonFinite { .. })
        ));
        assert!(build_operators(
            &[OperatorSpec::ClampNegative, OperatorSpec::Boxcar { width: 0 }],
            DT
        )
        .is_err());
    }

    #[test]
    fn test_reset_clears_memory() {
        let spec = OperatorSpec::Boxcar { width: 2 };
        let mut op = Operator::new(&spec, DT).unwrap();
        let mut first = vec![2.0f32, 2.0];
        op.apply(&mut first);
        op.reset();
        let mut second = vec![2.0f32];
        op.apply(&mut second);
        assert_eq!(second, vec![1.0]);
    }
}
