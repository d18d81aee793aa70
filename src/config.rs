//! Pipeline configuration
//!
//! Configuration is plain data: build it in code with [`PipelineConfig::builder`]
//! or load it from JSON. Every field has a default so partial JSON documents work.
//!
//! ```rust
//! use eis_sav::config::{PipelineConfig, ReductionPolicy};
//!
//! let config = PipelineConfig::builder()
//!     .frequency_list(vec![1.0, 10.0, 100.0])
//!     .reduction_policy(ReductionPolicy::FirstN { n: 4 })
//!     .phase_required(true)
//!     .build()
//!     .unwrap();
//! assert_eq!(config.frequency_list.len(), 3);
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Default relative tolerance when matching measured to configured frequencies.
pub const DEFAULT_FREQUENCY_TOLERANCE: f64 = 1e-3;

/// How the current trace of one phase is reduced to a fixed-length summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "kebab-case")]
pub enum ReductionPolicy {
    /// `[mean current]`
    #[default]
    Mean,
    /// Current resampled to `samples` points evenly spaced in elapsed time.
    FullTrace {
        /// Number of resampled points.
        samples: usize,
    },
    /// First `n` current samples of the phase.
    FirstN {
        /// Number of samples kept.
        n: usize,
    },
    /// `[mean current, duration, charge throughput, energy]` per phase, plus
    /// the cycle's coulombic efficiency.
    Usage,
}

impl ReductionPolicy {
    /// Length of the summary one phase reduces to.
    #[must_use]
    pub const fn width(self) -> usize {
        match self {
            Self::Mean => 1,
            Self::FullTrace { samples } => samples,
            Self::FirstN { n } => n,
            Self::Usage => 4,
        }
    }

    /// Column name suffixes for one phase summary.
    #[must_use]
    pub fn feature_names(self) -> Vec<String> {
        match self {
            Self::Mean => vec!["mean_current_mA".to_string()],
            Self::FullTrace { samples } => (0..samples).map(|i| format!("trace_{i}_mA")).collect(),
            Self::FirstN { n } => (0..n).map(|i| format!("sample_{i}_mA")).collect(),
            Self::Usage => vec![
                "mean_current_mA".to_string(),
                "duration_s".to_string(),
                "throughput_mAh".to_string(),
                "energy_mWh".to_string(),
            ],
        }
    }
}

/// Per-cycle normalization applied to the impedance state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StateNormalization {
    /// Raw impedance values.
    #[default]
    None,
    /// Real and imaginary parts standardized separately within the cycle.
    ZScore,
}

/// Frequency band kept before spectrum matching.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrequencyWindow {
    /// Frequencies at or below this bound are dropped (Hz).
    pub min_exclusive_hz: f64,
    /// Frequencies above this bound are dropped (Hz).
    pub max_inclusive_hz: f64,
}

impl FrequencyWindow {
    /// Whether `frequency_hz` lies in the band.
    #[must_use]
    pub fn contains(&self, frequency_hz: f64) -> bool {
        frequency_hz > self.min_exclusive_hz && frequency_hz <= self.max_inclusive_hz
    }
}

/// Top-level pipeline configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Expected sweep frequencies (Hz). Sorted ascending by [`PipelineConfig::validate`].
    pub frequency_list: Vec<f64>,
    /// Take the expected frequencies from each export's most common spectrum.
    /// Requires an empty `frequency_list`.
    pub infer_frequency_list: bool,
    /// Step indices counted as impedance sweeps; empty means every sweep step in the table.
    pub eis_step_indices: Vec<u32>,
    /// Reduction applied to each charge/discharge phase.
    pub action_reduction_policy: ReductionPolicy,
    /// Reject cycles lacking a charge or discharge phase.
    pub phase_required: bool,
    /// Relative tolerance when matching frequencies.
    pub frequency_tolerance: f64,
    /// Optional band prefilter.
    pub frequency_window: Option<FrequencyWindow>,
    /// Per-cycle state normalization.
    pub state_normalization: StateNormalization,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            frequency_list: Vec::new(),
            infer_frequency_list: false,
            eis_step_indices: Vec::new(),
            action_reduction_policy: ReductionPolicy::default(),
            phase_required: false,
            frequency_tolerance: DEFAULT_FREQUENCY_TOLERANCE,
            frequency_window: None,
            state_normalization: StateNormalization::default(),
        }
    }
}

impl PipelineConfig {
    /// Create a builder.
    #[must_use]
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder::default()
    }

    /// Parse and validate a JSON configuration document.
    ///
    /// # Errors
    /// Returns error if the JSON is invalid or the configuration fails validation.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let mut config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a JSON configuration file.
    ///
    /// # Errors
    /// Returns error if the file cannot be read or its contents are invalid.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        Self::from_json_str(&text)
    }

    /// Check invariants and sort the frequency list ascending.
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] when the frequency list is empty without
    /// inference (or given with it), holds a non-positive or duplicate frequency,
    /// the tolerance is not in `[0, 1)`, the window is empty, or the reduction
    /// policy has zero width.
    pub fn validate(&mut self) -> Result<()> {
        match (self.frequency_list.is_empty(), self.infer_frequency_list) {
            (true, false) => {
                return Err(Error::Configuration(
                    "frequency_list must not be empty unless infer_frequency_list is set"
                        .to_string(),
                ));
            }
            (false, true) => {
                return Err(Error::Configuration(
                    "infer_frequency_list needs an empty frequency_list".to_string(),
                ));
            }
            _ => {}
        }
        if let Some(bad) = self
            .frequency_list
            .iter()
            .find(|f| !f.is_finite() || **f <= 0.0)
        {
            return Err(Error::Configuration(format!(
                "frequency_list holds invalid frequency {bad}"
            )));
        }
        if !(0.0..1.0).contains(&self.frequency_tolerance) {
            return Err(Error::Configuration(format!(
                "frequency_tolerance must be in [0, 1), got {}",
                self.frequency_tolerance
            )));
        }

        self.frequency_list.sort_by(f64::total_cmp);
        for pair in self.frequency_list.windows(2) {
            if frequencies_match(pair[0], pair[1], self.frequency_tolerance) {
                return Err(Error::Configuration(format!(
                    "frequency_list holds {} and {} which are indistinguishable",
                    pair[0], pair[1]
                )));
            }
        }

        if let Some(window) = self.frequency_window {
            if window.min_exclusive_hz >= window.max_inclusive_hz {
                return Err(Error::Configuration(
                    "frequency_window is empty".to_string(),
                ));
            }
            if let Some(outside) = self.frequency_list.iter().find(|f| !window.contains(**f)) {
                return Err(Error::Configuration(format!(
                    "configured frequency {outside} lies outside frequency_window"
                )));
            }
        }

        if self.action_reduction_policy.width() == 0 {
            return Err(Error::Configuration(
                "action_reduction_policy must keep at least one sample".to_string(),
            ));
        }
        Ok(())
    }
}

/// Whether two frequencies agree within a relative tolerance.
#[must_use]
pub fn frequencies_match(a: f64, b: f64, tolerance: f64) -> bool {
    (a - b).abs() <= tolerance * a.abs().max(b.abs())
}

/// Builder for `PipelineConfig`.
#[derive(Debug, Default)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    /// Set the expected sweep frequencies.
    #[must_use]
    pub fn frequency_list(mut self, frequencies: Vec<f64>) -> Self {
        self.config.frequency_list = frequencies;
        self
    }

    /// Infer the expected frequencies from each export instead of listing them.
    #[must_use]
    pub const fn infer_frequency_list(mut self, infer: bool) -> Self {
        self.config.infer_frequency_list = infer;
        self
    }

    /// Set which step indices count as impedance sweeps.
    #[must_use]
    pub fn eis_step_indices(mut self, indices: Vec<u32>) -> Self {
        self.config.eis_step_indices = indices;
        self
    }

    /// Set the action reduction policy.
    #[must_use]
    pub const fn reduction_policy(mut self, policy: ReductionPolicy) -> Self {
        self.config.action_reduction_policy = policy;
        self
    }

    /// Require both phases in every cycle.
    #[must_use]
    pub const fn phase_required(mut self, required: bool) -> Self {
        self.config.phase_required = required;
        self
    }

    /// Set the relative frequency tolerance.
    #[must_use]
    pub const fn frequency_tolerance(mut self, tolerance: f64) -> Self {
        self.config.frequency_tolerance = tolerance;
        self
    }

    /// Keep only frequencies in `(min_exclusive_hz, max_inclusive_hz]`.
    #[must_use]
    pub const fn frequency_window(mut self, min_exclusive_hz: f64, max_inclusive_hz: f64) -> Self {
        self.config.frequency_window = Some(FrequencyWindow {
            min_exclusive_hz,
            max_inclusive_hz,
        });
        self
    }

    /// Set the state normalization.
    #[must_use]
    pub const fn state_normalization(mut self, normalization: StateNormalization) -> Self {
        self.config.state_normalization = normalization;
        self
    }

    /// Validate and build the configuration.
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] if validation fails.
    pub fn build(self) -> Result<PipelineConfig> {
        let mut config = self.config;
        config.validate()?;
        Ok(config)
    }
}
