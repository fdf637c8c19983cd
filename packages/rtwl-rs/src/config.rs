//! Engine configuration
//!
//! Loaded from JSON; every field except `dt` has a default.

use crate::buffer::{BufferConfig, GapPolicy};
use crate::error::Result;
use crate::migration::ReadinessPolicy;
use crate::signal_processing::{build_operators, OperatorError, OperatorSpec, PreprocessingPreset};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    #[error("{field}: {message}")]
    Invalid {
        field: &'static str,
        message: String,
    },

    #[error("operator chain: {0}")]
    Operator(#[from] OperatorError),
}

impl ConfigError {
    fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            message: message.into(),
        }
    }
}

/// Gaussian band filter applied before kurtosis
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct GaussianFilterConfig {
    /// Centre frequency (Hz)
    #[serde(default = "default_filter_f0")]
    pub f0: f64,

    /// Half-width in the frequency domain (Hz)
    #[serde(default = "default_filter_sigma")]
    pub sigma: f64,
}

fn default_filter_f0() -> f64 {
    4.0
}
fn default_filter_sigma() -> f64 {
    1.0
}

impl Default for GaussianFilterConfig {
    fn default() -> Self {
        Self {
            f0: default_filter_f0(),
            sigma: default_filter_sigma(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RtwlConfig {
    /// Sample interval shared by every station (seconds)
    pub dt: f64,

    /// Retention of every buffer (seconds)
    #[serde(default = "default_max_buffer_length")]
    pub max_buffer_length: f64,

    /// Data required beyond a window start before it may be emitted (seconds)
    #[serde(default = "default_safety_margin")]
    pub safety_margin: f64,

    #[serde(default = "default_number_of_regions")]
    pub number_of_regions: usize,

    /// Kurtosis window (seconds)
    #[serde(default = "default_kurtosis_window")]
    pub kurtosis_window: f64,

    #[serde(default)]
    pub gaussian_filter: GaussianFilterConfig,

    #[serde(default)]
    pub readiness_policy: ReadinessPolicy,

    /// Synthetic/offline run: no real-time pacing of replayed chunks
    #[serde(default)]
    pub offline_mode: bool,

    /// Gap handling of station buffers; internal buffers always zero-fill
    #[serde(default)]
    pub gap_policy: GapPolicy,

    #[serde(default = "default_overlap_check")]
    pub overlap_check: bool,

    /// Capacity of every inter-worker channel
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    #[serde(default)]
    pub preprocessing: PreprocessingPreset,

    /// Explicit station operator chain; overrides `preprocessing`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operators: Option<Vec<OperatorSpec>>,

    /// Boxcar width (samples) used by the kurtosis preset
    #[serde(default = "default_boxcar_width")]
    pub boxcar_width: usize,

    /// Boxcar width (samples) applied to the max output, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_smoothing: Option<usize>,
}

fn default_max_buffer_length() -> f64 {
    120.0
}
fn default_safety_margin() -> f64 {
    20.0
}
fn default_number_of_regions() -> usize {
    1
}
fn default_kurtosis_window() -> f64 {
    3.0
}
fn default_overlap_check() -> bool {
    true
}
fn default_channel_capacity() -> usize {
    64
}
fn default_boxcar_width() -> usize {
    50
}

impl RtwlConfig {
    /// Configuration with every default and the given sample interval
    pub fn with_dt(dt: f64) -> Self {
        Self {
            dt,
            max_buffer_length: default_max_buffer_length(),
            safety_margin: default_safety_margin(),
            number_of_regions: default_number_of_regions(),
            kurtosis_window: default_kurtosis_window(),
            gaussian_filter: GaussianFilterConfig::default(),
            readiness_policy: ReadinessPolicy::default(),
            offline_mode: false,
            gap_policy: GapPolicy::default(),
            overlap_check: default_overlap_check(),
            channel_capacity: default_channel_capacity(),
            preprocessing: PreprocessingPreset::default(),
            operators: None,
            boxcar_width: default_boxcar_width(),
            max_smoothing: None,
        }
    }

    /// Offline preset: passthrough preprocessing, no pacing, no smoothing
    pub fn offline(dt: f64) -> Self {
        Self {
            offline_mode: true,
            preprocessing: PreprocessingPreset::Passthrough,
            ..Self::with_dt(dt)
        }
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: RtwlConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if !(self.dt.is_finite() && self.dt > 0.0) {
            return Err(ConfigError::invalid(
                "dt",
                format!("must be positive and finite, got {}", self.dt),
            ));
        }
        if !(self.max_buffer_length.is_finite() && self.max_buffer_length > 0.0) {
            return Err(ConfigError::invalid(
                "max_buffer_length",
                format!("must be positive and finite, got {}", self.max_buffer_length),
            ));
        }
        if !(self.safety_margin.is_finite() && self.safety_margin >= 0.0) {
            return Err(ConfigError::invalid(
                "safety_margin",
                format!("must be non-negative and finite, got {}", self.safety_margin),
            ));
        }
        // a window could never satisfy the margin inside the retention horizon
        if self.safety_margin >= self.max_buffer_length {
            return Err(ConfigError::invalid(
                "safety_margin",
                format!(
                    "{} must be shorter than max_buffer_length {}",
                    self.safety_margin, self.max_buffer_length
                ),
            ));
        }
        if self.number_of_regions == 0 {
            return Err(ConfigError::invalid("number_of_regions", "must be at least 1"));
        }
        if self.channel_capacity == 0 {
            return Err(ConfigError::invalid("channel_capacity", "must be at least 1"));
        }
        if self.max_smoothing == Some(0) {
            return Err(ConfigError::invalid("max_smoothing", "must be at least 1"));
        }

        build_operators(&self.station_operator_specs()?, self.dt)?;
        build_operators(&self.max_operator_specs(), self.dt)?;
        Ok(())
    }

    /// Safety margin rounded to whole samples
    pub fn margin_ticks(&self) -> i64 {
        (self.safety_margin / self.dt).round() as i64
    }

    pub fn buffer_config(&self) -> BufferConfig {
        BufferConfig::new(self.dt, self.max_buffer_length)
            .with_gap_policy(self.gap_policy)
            .with_overlap_check(self.overlap_check)
    }

    /// Config of point accumulators and stack/max buffers.
    ///
    /// Their inputs are derived streams whose windows may jump ahead, so the
    /// station gap policy does not apply.
    pub fn internal_buffer_config(&self) -> BufferConfig {
        self.buffer_config().with_gap_policy(GapPolicy::ZeroFill)
    }

    /// Operator chain of every station buffer
    pub fn station_operator_specs(&self) -> std::result::Result<Vec<OperatorSpec>, ConfigError> {
        if let Some(ops) = &self.operators {
            return Ok(ops.clone());
        }
        Ok(self.preprocessing.operator_specs(
            self.dt,
            &self.gaussian_filter,
            self.kurtosis_window,
            self.boxcar_width,
        )?)
    }

    /// Operator chain of every point accumulator and stack buffer.
    ///
    /// A unit scale; distance weighting would be applied here.
    pub fn point_operator_specs(&self) -> Vec<OperatorSpec> {
        vec![OperatorSpec::Scale { factor: 1.0 }]
    }

    /// Operator chain of the max output trace
    pub fn max_operator_specs(&self) -> Vec<OperatorSpec> {
        self.max_smoothing
            .map(|width| vec![OperatorSpec::Boxcar { width }])
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_from_minimal_json() {
        let config: RtwlConfig = serde_json::from_str(r#"{"dt": 0.01}"#).unwrap();
        assert_eq!(config, RtwlConfig::with_dt(0.01));
        assert_eq!(config.max_buffer_length, 120.0);
        assert_eq!(config.safety_margin, 20.0);
        assert_eq!(config.number_of_regions, 1);
        assert_eq!(config.readiness_policy, ReadinessPolicy::Strict);
        assert_eq!(config.preprocessing, PreprocessingPreset::Kurtosis);
        assert_eq!(config.margin_ticks(), 2000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_dt_is_required() {
        assert!(serde_json::from_str::<RtwlConfig>(r#"{"safety_margin": 1.0}"#).is_err());
    }

    #[test]
    fn test_validation_errors() {
        let mut config = RtwlConfig::with_dt(0.0);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "dt", .. })
        ));

        config = RtwlConfig::with_dt(0.01);
        config.number_of_regions = 0;
        assert!(config.validate().is_err());

        config = RtwlConfig::with_dt(0.01);
        config.safety_margin = 200.0;
        assert!(config.validate().is_err());

        config = RtwlConfig::with_dt(0.01);
        config.kurtosis_window = 0.0;
        assert!(matches!(config.validate(), Err(ConfigError::Operator(_))));

        config = RtwlConfig::with_dt(0.01);
        config.operators = Some(vec![OperatorSpec::Boxcar { width: 0 }]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_explicit_operators_override_preset() {
        let json = r#"{
            "dt": 0.02,
            "readiness_policy": "lenient",
            "gap_policy": "reject",
            "operators": [{"kind": "scale", "factor": 2.0}, {"kind": "clamp_negative"}],
            "max_smoothing": 5
        }"#;
        let config: RtwlConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.readiness_policy, ReadinessPolicy::Lenient);
        assert_eq!(config.gap_policy, GapPolicy::Reject);
        assert_eq!(config.buffer_config().gap_policy, GapPolicy::Reject);
        assert_eq!(
            config.internal_buffer_config().gap_policy,
            GapPolicy::ZeroFill
        );
        assert_eq!(
            config.station_operator_specs().unwrap(),
            vec![
                OperatorSpec::Scale { factor: 2.0 },
                OperatorSpec::ClampNegative
            ]
        );
        assert_eq!(
            config.max_operator_specs(),
            vec![OperatorSpec::Boxcar { width: 5 }]
        );
    }

    #[test]
    fn test_from_json_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"dt": 0.01, "offline_mode": true, "safety_margin": 1.5}}"#).unwrap();

        let config = RtwlConfig::from_json_file(file.path()).unwrap();
        assert!(config.offline_mode);
        assert_eq!(config.margin_ticks(), 150);

        let mut bad = tempfile::NamedTempFile::new().unwrap();
        write!(bad, r#"{{"dt": -1.0}}"#).unwrap();
        assert!(RtwlConfig::from_json_file(bad.path()).is_err());
    }
}
