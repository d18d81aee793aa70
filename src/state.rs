//! State extraction: the impedance spectrum of one cycle
//!
//! The state vector has exactly one (real, imaginary) pair per configured
//! frequency, ascending. A missing, duplicated or unexpected frequency rejects
//! the cycle; the vector is never zero-filled or reordered to fit.

use serde::{Deserialize, Serialize};

use crate::config::{frequencies_match, FrequencyWindow, PipelineConfig, StateNormalization};
use crate::cycle::Cycle;
use crate::record::ImpedancePoint;
use crate::step::StepTable;
use crate::{Error, Result};

/// Fixed-length impedance spectrum, frequency-sorted ascending.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateVector {
    points: Vec<ImpedancePoint>,
}

impl StateVector {
    /// Spectrum points, one per configured frequency.
    #[must_use]
    pub fn points(&self) -> &[ImpedancePoint] {
        &self.points
    }

    /// Number of frequencies.
    #[must_use]
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// Whether the spectrum is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Flat features: all real parts, then all imaginary parts.
    #[must_use]
    pub fn to_features(&self) -> Vec<f64> {
        self.points
            .iter()
            .map(|p| p.real_ohm)
            .chain(self.points.iter().map(|p| p.imag_ohm))
            .collect()
    }

    /// Feature names matching [`StateVector::to_features`].
    #[must_use]
    pub fn feature_names(frequencies: &[f64]) -> Vec<String> {
        let labels: Vec<String> = frequencies.iter().map(|f| format_frequency(*f)).collect();
        labels
            .iter()
            .map(|f| format!("Z_re({f}Hz)"))
            .chain(labels.iter().map(|f| format!("Z_im({f}Hz)")))
            .collect()
    }
}

/// Format a frequency with five significant digits, `%g` style.
///
/// Fixed notation for exponents in `[-4, 5)`, scientific (`1.9953e+05`)
/// outside, trailing zeros trimmed in both.
#[must_use]
pub fn format_frequency(frequency_hz: f64) -> String {
    if frequency_hz == 0.0 || !frequency_hz.is_finite() {
        return frequency_hz.to_string();
    }
    // Rounding to five digits first settles the exponent (99999.7 -> 1e+05)
    let scientific = format!("{frequency_hz:.4e}");
    let Some((mantissa, exponent)) = scientific.split_once('e') else {
        return scientific;
    };
    let Ok(exponent) = exponent.parse::<i32>() else {
        return scientific;
    };

    if (-4..5).contains(&exponent) {
        let decimals = usize::try_from(4 - exponent).unwrap_or(0);
        trim_fraction(format!("{frequency_hz:.decimals$}"))
    } else {
        let sign = if exponent < 0 { '-' } else { '+' };
        format!(
            "{}e{sign}{:02}",
            trim_fraction(mantissa.to_string()),
            exponent.abs()
        )
    }
}

fn trim_fraction(text: String) -> String {
    if text.contains('.') {
        text.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        text
    }
}

/// Builds [`StateVector`]s from the impedance-sweep rows of a cycle.
#[derive(Debug, Clone)]
pub struct StateExtractor {
    frequencies: Vec<f64>,
    sweep_steps: Vec<u32>,
    tolerance: f64,
    window: Option<FrequencyWindow>,
    normalization: StateNormalization,
}

impl StateExtractor {
    /// Resolve the sweep steps of `steps` against the configuration.
    ///
    /// # Errors
    /// Returns [`Error::Configuration`] if a configured sweep index is not an
    /// impedance-sweep step of the table, or the table has no sweep at all.
    pub fn new(config: &PipelineConfig, steps: &StepTable) -> Result<Self> {
        let sweep_steps = if config.eis_step_indices.is_empty() {
            steps.sweep_indices()
        } else {
            for &index in &config.eis_step_indices {
                match steps.get(index) {
                    Some(step) if step.control.is_sweep() => {}
                    Some(step) => {
                        return Err(Error::Configuration(format!(
                            "eis step {index} is a {:?} step in the header",
                            step.control
                        )))
                    }
                    None => {
                        return Err(Error::Configuration(format!(
                            "eis step {index} is not declared in the header"
                        )))
                    }
                }
            }
            config.eis_step_indices.clone()
        };

        if sweep_steps.is_empty() {
            return Err(Error::Configuration(
                "the step table declares no impedance-sweep step".to_string(),
            ));
        }

        Ok(Self {
            frequencies: config.frequency_list.clone(),
            sweep_steps,
            tolerance: config.frequency_tolerance,
            window: config.frequency_window,
            normalization: config.state_normalization,
        })
    }

    /// Replace the expected frequencies, e.g. with an inferred list.
    ///
    /// `frequencies` must already be sorted ascending and distinguishable.
    #[must_use]
    pub fn with_frequencies(mut self, frequencies: Vec<f64>) -> Self {
        self.frequencies = frequencies;
        self
    }

    /// Expected frequencies, ascending.
    #[must_use]
    pub fn frequencies(&self) -> &[f64] {
        &self.frequencies
    }

    /// Step indices treated as impedance sweeps.
    #[must_use]
    pub fn sweep_steps(&self) -> &[u32] {
        &self.sweep_steps
    }

    /// In-band sweep points of `cycle`, frequency-sorted ascending.
    fn measured(&self, cycle: &Cycle) -> Vec<ImpedancePoint> {
        let mut measured: Vec<ImpedancePoint> = cycle
            .records()
            .iter()
            .filter(|r| r.is_sweep() && self.sweep_steps.contains(&r.step))
            .filter_map(|r| r.impedance)
            .filter(|p| self.window.map_or(true, |w| w.contains(p.frequency_hz)))
            .collect();
        measured.sort_by(|a, b| a.frequency_hz.total_cmp(&b.frequency_hz));
        measured
    }

    /// Most common exact measured spectrum across `cycles`.
    ///
    /// Cycles without sweep points are skipped; ties go to the spectrum seen
    /// first. `None` when no cycle has a spectrum.
    #[must_use]
    pub fn most_common_spectrum(&self, cycles: &[Cycle]) -> Option<Vec<f64>> {
        let mut counts: Vec<(Vec<f64>, usize)> = Vec::new();
        for cycle in cycles {
            let spectrum: Vec<f64> = self
                .measured(cycle)
                .iter()
                .map(|p| p.frequency_hz)
                .collect();
            if spectrum.is_empty() {
                continue;
            }
            match counts.iter_mut().find(|(seen, _)| *seen == spectrum) {
                Some((_, count)) => *count += 1,
                None => counts.push((spectrum, 1)),
            }
        }

        let mut best: Option<(Vec<f64>, usize)> = None;
        for (spectrum, count) in counts {
            if best.as_ref().map_or(true, |(_, top)| count > *top) {
                best = Some((spectrum, count));
            }
        }
        best.map(|(spectrum, _)| spectrum)
    }

    /// Extract the state vector of `cycle`.
    ///
    /// # Errors
    /// Returns [`Error::IncompleteSpectrum`] when the sweep rows hold a
    /// frequency outside the configured list, a frequency twice, or miss one.
    pub fn extract(&self, cycle: &Cycle) -> Result<StateVector> {
        let measured = self.measured(cycle);
        let incomplete = |detail: String| Error::IncompleteSpectrum {
            cycle: cycle.index(),
            detail,
        };

        let mut slots: Vec<Option<ImpedancePoint>> = vec![None; self.frequencies.len()];
        for point in measured {
            if !(point.real_ohm.is_finite() && point.imag_ohm.is_finite()) {
                return Err(incomplete(format!(
                    "non-finite impedance at {} Hz",
                    format_frequency(point.frequency_hz)
                )));
            }
            let slot = self
                .frequencies
                .iter()
                .position(|f| frequencies_match(*f, point.frequency_hz, self.tolerance))
                .ok_or_else(|| {
                    incomplete(format!(
                        "unexpected frequency {} Hz",
                        format_frequency(point.frequency_hz)
                    ))
                })?;
            if slots[slot].is_some() {
                return Err(incomplete(format!(
                    "duplicate frequency {} Hz",
                    format_frequency(self.frequencies[slot])
                )));
            }
            slots[slot] = Some(ImpedancePoint {
                frequency_hz: self.frequencies[slot],
                ..point
            });
        }

        let missing: Vec<String> = self
            .frequencies
            .iter()
            .zip(&slots)
            .filter(|(_, slot)| slot.is_none())
            .map(|(f, _)| format!("{} Hz", format_frequency(*f)))
            .collect();
        if !missing.is_empty() {
            return Err(incomplete(format!(
                "missing {} of {} frequencies: {}",
                missing.len(),
                self.frequencies.len(),
                missing.join(", ")
            )));
        }

        let mut points: Vec<ImpedancePoint> = slots.into_iter().flatten().collect();
        if self.normalization == StateNormalization::ZScore {
            z_score(&mut points);
        }
        Ok(StateVector { points })
    }
}

/// Standardize real and imaginary parts separately (population deviation).
///
/// A part with zero spread is centred but not scaled.
#[allow(clippy::cast_precision_loss)]
fn z_score(points: &mut [ImpedancePoint]) {
    if points.is_empty() {
        return;
    }
    let n = points.len() as f64;
    let stats = |values: &dyn Fn(&ImpedancePoint) -> f64| {
        let mean = points.iter().map(values).sum::<f64>() / n;
        let variance = points.iter().map(|p| (values(p) - mean).powi(2)).sum::<f64>() / n;
        (mean, variance.sqrt())
    };
    let (re_mean, re_std) = stats(&|p: &ImpedancePoint| p.real_ohm);
    let (im_mean, im_std) = stats(&|p: &ImpedancePoint| p.imag_ohm);

    for point in points.iter_mut() {
        point.real_ohm -= re_mean;
        point.imag_ohm -= im_mean;
        if re_std > 0.0 {
            point.real_ohm /= re_std;
        }
        if im_std > 0.0 {
            point.imag_ohm /= im_std;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::RawRecord;
    use crate::step::{ControlType, Step};

    const FREQS: [f64; 3] = [1.0, 100.0, 10_000.0];

    fn table() -> StepTable {
        StepTable::from_steps([
            Step::new(0, ControlType::Rest, None),
            Step::new(1, ControlType::ImpedanceSweep, None),
            Step::new(2, ControlType::ConstantCurrent, None),
            Step::new(6, ControlType::ImpedanceSweep, None),
        ])
        .unwrap()
    }

    fn config() -> PipelineConfig {
        PipelineConfig::builder()
            .frequency_list(FREQS.to_vec())
            .build()
            .unwrap()
    }

    fn sweep_row(line: u64, step: u32, frequency_hz: f64) -> RawRecord {
        RawRecord {
            line,
            cycle: 1,
            step,
            control: ControlType::ImpedanceSweep,
            step_direction: None,
            elapsed_s: line as f64,
            voltage_v: 3.7,
            current_ma: 0.0,
            cumulative_charge_mah: 0.0,
            discharge_capacity_mah: None,
            impedance: Some(ImpedancePoint {
                frequency_hz,
                real_ohm: 0.05 + 1.0 / frequency_hz,
                imag_ohm: -0.01 * frequency_hz.log10(),
            }),
        }
    }

    fn cycle_of(frequencies: &[f64]) -> Cycle {
        let rows = frequencies
            .iter()
            .enumerate()
            .map(|(i, f)| sweep_row(i as u64 + 1, 1, *f))
            .collect();
        Cycle::new(1, rows, true)
    }

    #[test]
    fn test_extracts_sorted_spectrum() {
        let extractor = StateExtractor::new(&config(), &table()).unwrap();
        // Instruments sweep high to low
        let state = extractor.extract(&cycle_of(&[10_000.0, 100.0, 1.0])).unwrap();

        let frequencies: Vec<f64> = state.points().iter().map(|p| p.frequency_hz).collect();
        assert_eq!(frequencies, FREQS.to_vec());
        assert_eq!(state.to_features().len(), 6);
        assert!((state.to_features()[0] - 1.05).abs() < 1e-12);
    }

    #[test]
    fn test_snaps_jittered_frequencies() {
        let extractor = StateExtractor::new(&config(), &table()).unwrap();
        let state = extractor
            .extract(&cycle_of(&[9_999.2, 100.03, 1.0004]))
            .unwrap();
        assert!((state.points()[2].frequency_hz - 10_000.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_missing_frequency_rejected() {
        let extractor = StateExtractor::new(&config(), &table()).unwrap();
        let err = extractor.extract(&cycle_of(&[10_000.0, 1.0])).unwrap_err();
        match err {
            Error::IncompleteSpectrum { cycle, detail } => {
                assert_eq!(cycle, 1);
                assert!(detail.contains("missing 1 of 3"));
                assert!(detail.contains("100 Hz"));
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn test_duplicate_frequency_rejected() {
        let extractor = StateExtractor::new(&config(), &table()).unwrap();
        let err = extractor
            .extract(&cycle_of(&[10_000.0, 100.0, 1.0, 100.0]))
            .unwrap_err();
        assert!(err.to_string().contains("duplicate frequency 100 Hz"));
    }

    #[test]
    fn test_unexpected_frequency_rejected() {
        let extractor = StateExtractor::new(&config(), &table()).unwrap();
        let err = extractor
            .extract(&cycle_of(&[10_000.0, 100.0, 1.0, 50.0]))
            .unwrap_err();
        assert!(err.to_string().contains("unexpected frequency 50 Hz"));
    }

    #[test]
    fn test_window_drops_out_of_band_points() {
        let config = PipelineConfig::builder()
            .frequency_list(FREQS.to_vec())
            .frequency_window(0.2, 20_000.0)
            .build()
            .unwrap();
        let extractor = StateExtractor::new(&config, &table()).unwrap();
        let state = extractor
            .extract(&cycle_of(&[50_000.0, 10_000.0, 100.0, 1.0, 0.1]))
            .unwrap();
        assert_eq!(state.len(), 3);
    }

    #[test]
    fn test_only_configured_sweep_steps_count() {
        let config = PipelineConfig::builder()
            .frequency_list(FREQS.to_vec())
            .eis_step_indices(vec![6])
            .build()
            .unwrap();
        let extractor = StateExtractor::new(&config, &table()).unwrap();
        let mut rows: Vec<RawRecord> = FREQS.iter().map(|f| sweep_row(1, 1, *f)).collect();
        rows.extend(FREQS.iter().map(|f| sweep_row(2, 6, *f)));
        let state = extractor.extract(&Cycle::new(1, rows, true)).unwrap();
        assert_eq!(state.len(), 3);
    }

    #[test]
    fn test_configured_step_must_be_sweep() {
        let config = PipelineConfig::builder()
            .frequency_list(FREQS.to_vec())
            .eis_step_indices(vec![2])
            .build()
            .unwrap();
        let err = StateExtractor::new(&config, &table()).unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_z_score_normalization() {
        let config = PipelineConfig::builder()
            .frequency_list(FREQS.to_vec())
            .state_normalization(StateNormalization::ZScore)
            .build()
            .unwrap();
        let extractor = StateExtractor::new(&config, &table()).unwrap();
        let state = extractor.extract(&cycle_of(&FREQS)).unwrap();

        let re: Vec<f64> = state.points().iter().map(|p| p.real_ohm).collect();
        let mean = re.iter().sum::<f64>() / 3.0;
        let var = re.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / 3.0;
        assert!(mean.abs() < 1e-12);
        assert!((var - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_feature_names() {
        let names = StateVector::feature_names(&[0.1, 1_000.0, 12_345.678]);
        assert_eq!(
            names,
            vec![
                "Z_re(0.1Hz)",
                "Z_re(1000Hz)",
                "Z_re(12346Hz)",
                "Z_im(0.1Hz)",
                "Z_im(1000Hz)",
                "Z_im(12346Hz)",
            ]
        );
    }

    #[test]
    fn test_format_frequency() {
        assert_eq!(format_frequency(0.019_952_6), "0.019953");
        assert_eq!(format_frequency(199_526.23), "1.9953e+05");
        assert_eq!(format_frequency(100_000.0), "1e+05");
        assert_eq!(format_frequency(99_999.0), "99999");
        assert_eq!(format_frequency(0.000_01), "1e-05");
        assert_eq!(format_frequency(0.000_1), "0.0001");
        assert_eq!(format_frequency(10.0), "10");
        assert_eq!(format_frequency(2.5), "2.5");
    }

    #[test]
    fn test_non_finite_impedance_rejected() {
        let extractor = StateExtractor::new(&config(), &table()).unwrap();
        let mut cycle_rows = cycle_of(&FREQS).into_records();
        if let Some(point) = cycle_rows[1].impedance.as_mut() {
            point.real_ohm = f64::NAN;
        }
        let err = extractor.extract(&Cycle::new(1, cycle_rows, true)).unwrap_err();
        match err {
            Error::IncompleteSpectrum { cycle, detail } => {
                assert_eq!(cycle, 1);
                assert_eq!(detail, "non-finite impedance at 100 Hz");
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn test_most_common_spectrum() {
        let extractor = StateExtractor::new(&config(), &table()).unwrap();
        let cycles = vec![
            cycle_of(&[10_000.0, 1.0]),
            cycle_of(&[10_000.0, 100.0, 1.0]),
            Cycle::new(1, Vec::new(), true),
            cycle_of(&[1.0, 100.0, 10_000.0]),
            cycle_of(&[10_000.0, 1.0]),
            cycle_of(&[10_000.0, 100.0, 1.0]),
        ];
        assert_eq!(extractor.most_common_spectrum(&cycles), Some(FREQS.to_vec()));

        // Tie: the first spectrum seen wins
        assert_eq!(
            extractor.most_common_spectrum(&cycles[..2]),
            Some(vec![1.0, 10_000.0])
        );
        assert_eq!(extractor.most_common_spectrum(&cycles[2..3]), None);
    }
}
