//! Action extraction: the charge/discharge current protocol of one cycle
//!
//! Rows of constant-current and constant-voltage steps are split into a
//! charge and a discharge phase. The step's declared label decides the phase;
//! the sign of the measured current is used only for unlabelled steps
//! (positive charges). Declared setpoints are never read: the measured current
//! is the source of truth.

use serde::{Deserialize, Serialize};

use crate::config::ReductionPolicy;
use crate::cycle::Cycle;
use crate::record::RawRecord;
use crate::step::Direction;
use crate::{Error, Result};

/// Cycle-level column added by the `usage` policy.
pub const EFFICIENCY_COLUMN: &str = "cycle_efficiency_pct";

/// Position of the charge throughput in a `usage` summary.
const USAGE_THROUGHPUT: usize = 2;

/// Summary of one phase.
///
/// `Absent` means the cycle had no rows for the phase. It is distinct from a
/// measured summary that happens to be zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PhaseSummary {
    /// The cycle has no rows for this phase.
    Absent,
    /// Reduced values, `policy.width()` long.
    Measured(Vec<f64>),
}

impl PhaseSummary {
    /// Whether the phase was measured.
    #[must_use]
    pub const fn is_present(&self) -> bool {
        matches!(self, Self::Measured(_))
    }

    /// Measured values, if any.
    #[must_use]
    pub fn values(&self) -> Option<&[f64]> {
        match self {
            Self::Absent => None,
            Self::Measured(values) => Some(values),
        }
    }
}

/// Fixed-length summary of a cycle's charge and discharge phases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionVector {
    policy: ReductionPolicy,
    charge: PhaseSummary,
    discharge: PhaseSummary,
    efficiency_pct: Option<f64>,
}

impl ActionVector {
    /// Reduction policy the vector was built with.
    #[must_use]
    pub const fn policy(&self) -> ReductionPolicy {
        self.policy
    }

    /// Charge phase summary.
    #[must_use]
    pub const fn charge(&self) -> &PhaseSummary {
        &self.charge
    }

    /// Discharge phase summary.
    #[must_use]
    pub const fn discharge(&self) -> &PhaseSummary {
        &self.discharge
    }

    /// Coulombic efficiency of the cycle (%), `usage` policy only.
    ///
    /// Discharge throughput over charge throughput. `None` when either phase
    /// is absent or nothing was charged.
    #[must_use]
    pub const fn efficiency_pct(&self) -> Option<f64> {
        self.efficiency_pct
    }

    /// Flat features: charge summary, discharge summary, then cycle-level
    /// features (`usage` adds the efficiency).
    ///
    /// An absent phase is written as zeros; use the presence flags
    /// ([`PhaseSummary::is_present`]) to tell it apart from a measured zero.
    /// A missing efficiency is written as zero too.
    #[must_use]
    pub fn to_features(&self) -> Vec<f64> {
        let width = self.policy.width();
        let mut features = Vec::with_capacity(2 * width + 1);
        for phase in [&self.charge, &self.discharge] {
            match phase.values() {
                Some(values) => features.extend_from_slice(values),
                None => features.extend(std::iter::repeat(0.0).take(width)),
            }
        }
        if self.policy == ReductionPolicy::Usage {
            features.push(self.efficiency_pct.unwrap_or(0.0));
        }
        features
    }

    /// Feature names matching [`ActionVector::to_features`].
    #[must_use]
    pub fn feature_names(policy: ReductionPolicy) -> Vec<String> {
        let names = policy.feature_names();
        let mut columns: Vec<String> = names
            .iter()
            .map(|n| format!("charge_{n}"))
            .chain(names.iter().map(|n| format!("discharge_{n}")))
            .collect();
        if policy == ReductionPolicy::Usage {
            columns.push(EFFICIENCY_COLUMN.to_string());
        }
        columns
    }
}

/// Cycling rows of one cycle split by phase, in file order.
#[derive(Debug, Default)]
pub struct Phases<'a> {
    /// Charge rows.
    pub charge: Vec<&'a RawRecord>,
    /// Discharge rows.
    pub discharge: Vec<&'a RawRecord>,
    /// Rows whose phase came from the current sign because the step is unlabelled.
    pub inferred_rows: usize,
}

impl<'a> Phases<'a> {
    /// Split the constant-current and constant-voltage rows of `cycle`.
    ///
    /// Unlabelled rows at zero current belong to neither phase.
    #[must_use]
    pub fn of(cycle: &'a Cycle) -> Self {
        let mut phases = Self::default();
        for record in cycle.records().iter().filter(|r| r.is_cycling()) {
            let direction = match record.step_direction {
                Some(direction) => Some(direction),
                None => {
                    phases.inferred_rows += 1;
                    Direction::from_current(record.current_ma)
                }
            };
            match direction {
                Some(Direction::Charge) => phases.charge.push(record),
                Some(Direction::Discharge) => phases.discharge.push(record),
                None => {}
            }
        }
        phases
    }
}

/// Builds [`ActionVector`]s under a reduction policy.
#[derive(Debug, Clone, Copy)]
pub struct ActionExtractor {
    policy: ReductionPolicy,
    phase_required: bool,
}

impl ActionExtractor {
    /// Create an extractor.
    #[must_use]
    pub const fn new(policy: ReductionPolicy, phase_required: bool) -> Self {
        Self {
            policy,
            phase_required,
        }
    }

    /// Extract the action vector of `cycle`.
    ///
    /// # Errors
    /// Returns [`Error::MissingPhase`] when a phase is absent and phases are
    /// required, or [`Error::ShortPhase`] when `first-n` needs more samples
    /// than the phase has.
    pub fn extract(&self, cycle: &Cycle) -> Result<ActionVector> {
        let phases = Phases::of(cycle);
        if phases.inferred_rows > 0 {
            tracing::warn!(
                cycle = cycle.index(),
                rows = phases.inferred_rows,
                "step has no charge/discharge label, phase taken from current sign"
            );
        }

        let charge = self.summarize(cycle.index(), Direction::Charge, &phases.charge)?;
        let discharge = self.summarize(cycle.index(), Direction::Discharge, &phases.discharge)?;
        let efficiency_pct = match (self.policy, charge.values(), discharge.values()) {
            (ReductionPolicy::Usage, Some(charged), Some(discharged)) => {
                efficiency(charged[USAGE_THROUGHPUT], discharged[USAGE_THROUGHPUT])
            }
            _ => None,
        };

        Ok(ActionVector {
            policy: self.policy,
            charge,
            discharge,
            efficiency_pct,
        })
    }

    fn summarize(&self, cycle: u32, phase: Direction, rows: &[&RawRecord]) -> Result<PhaseSummary> {
        if rows.is_empty() {
            if self.phase_required {
                return Err(Error::MissingPhase { cycle, phase });
            }
            return Ok(PhaseSummary::Absent);
        }

        let values = match self.policy {
            ReductionPolicy::Mean => vec![mean_current(rows)],
            ReductionPolicy::FullTrace { samples } => resample(rows, samples),
            ReductionPolicy::FirstN { n } => {
                if rows.len() < n {
                    return Err(Error::ShortPhase {
                        cycle,
                        phase,
                        needed: n,
                        available: rows.len(),
                    });
                }
                rows[..n].iter().map(|r| r.current_ma).collect()
            }
            ReductionPolicy::Usage => usage(rows),
        };
        Ok(PhaseSummary::Measured(values))
    }
}

#[allow(clippy::cast_precision_loss)]
fn mean_current(rows: &[&RawRecord]) -> f64 {
    rows.iter().map(|r| r.current_ma).sum::<f64>() / rows.len() as f64
}

/// Current at `samples` instants evenly spaced over the phase, linearly interpolated.
#[allow(clippy::cast_precision_loss)]
fn resample(rows: &[&RawRecord], samples: usize) -> Vec<f64> {
    let first = rows[0];
    let last = rows[rows.len() - 1];
    let span = last.elapsed_s - first.elapsed_s;
    if rows.len() == 1 || span <= 0.0 {
        return vec![first.current_ma; samples];
    }

    let mut values = Vec::with_capacity(samples);
    let mut j = 0;
    for k in 0..samples {
        let t = if samples == 1 {
            first.elapsed_s
        } else {
            first.elapsed_s + span * k as f64 / (samples - 1) as f64
        };
        while j + 2 < rows.len() && rows[j + 1].elapsed_s < t {
            j += 1;
        }
        let (a, b) = (rows[j], rows[j + 1]);
        let dt = b.elapsed_s - a.elapsed_s;
        let value = if dt <= 0.0 {
            b.current_ma
        } else {
            let w = ((t - a.elapsed_s) / dt).clamp(0.0, 1.0);
            a.current_ma + w * (b.current_ma - a.current_ma)
        };
        values.push(value);
    }
    values
}

/// `[mean current (mA), duration (s), charge throughput (mA·h), energy (mW·h)]`
///
/// Efficiency is computed from the throughputs once both phases are reduced.
///
/// Duration and energy only integrate over rows that are adjacent in the file,
/// so a rest between two steps of the same phase is not counted.
fn usage(rows: &[&RawRecord]) -> Vec<f64> {
    let mut duration = 0.0;
    let mut energy = 0.0;
    for pair in rows.windows(2) {
        let (a, b) = (pair[0], pair[1]);
        if b.line != a.line + 1 {
            continue;
        }
        let dt = b.elapsed_s - a.elapsed_s;
        duration += dt;
        energy += 0.5 * (a.voltage_v * a.current_ma + b.voltage_v * b.current_ma) * dt / 3600.0;
    }

    let (q_min, q_max) = rows.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), r| {
        (lo.min(r.cumulative_charge_mah), hi.max(r.cumulative_charge_mah))
    });

    vec![mean_current(rows), duration, q_max - q_min, energy]
}

fn efficiency(charged_mah: f64, discharged_mah: f64) -> Option<f64> {
    if charged_mah > 0.0 {
        Some(100.0 * discharged_mah / charged_mah)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::step::ControlType;
    use std::sync::{Arc, Mutex};
    use tracing_subscriber::fmt::MakeWriter;

    fn row(line: u64, control: ControlType, label: Option<Direction>, t: f64, i: f64) -> RawRecord {
        RawRecord {
            line,
            cycle: 2,
            step: 0,
            control,
            step_direction: label,
            elapsed_s: t,
            voltage_v: 4.0,
            current_ma: i,
            cumulative_charge_mah: t / 36.0,
            discharge_capacity_mah: None,
            impedance: None,
        }
    }

    fn cc(line: u64, label: Direction, t: f64, i: f64) -> RawRecord {
        row(line, ControlType::ConstantCurrent, Some(label), t, i)
    }

    fn full_cycle() -> Cycle {
        Cycle::new(
            2,
            vec![
                row(1, ControlType::Rest, None, 0.0, 0.0),
                cc(2, Direction::Charge, 10.0, 100.0),
                cc(3, Direction::Charge, 20.0, 100.0),
                // Constant-voltage tail: current decays but the label says charge
                row(4, ControlType::ConstantVoltage, Some(Direction::Charge), 30.0, 20.0),
                cc(5, Direction::Discharge, 40.0, -50.0),
                cc(6, Direction::Discharge, 50.0, -50.0),
            ],
            true,
        )
    }

    #[test]
    fn test_mean_policy() {
        let action = ActionExtractor::new(ReductionPolicy::Mean, false)
            .extract(&full_cycle())
            .unwrap();
        let charge = action.charge().values().unwrap();
        assert!((charge[0] - 220.0 / 3.0).abs() < 1e-9);
        assert_eq!(action.discharge().values().unwrap(), &[-50.0]);
        assert_eq!(action.to_features().len(), 2);
    }

    #[test]
    fn test_label_wins_over_current_sign() {
        // Labelled charge step with a negative current sample stays in the charge phase
        let cycle = Cycle::new(
            2,
            vec![
                cc(1, Direction::Charge, 0.0, 100.0),
                row(2, ControlType::ConstantVoltage, Some(Direction::Charge), 10.0, -1.0),
            ],
            true,
        );
        let phases = Phases::of(&cycle);
        assert_eq!(phases.charge.len(), 2);
        assert!(phases.discharge.is_empty());
        assert_eq!(phases.inferred_rows, 0);
    }

    #[test]
    fn test_unlabelled_rows_fall_back_to_sign() {
        let cycle = Cycle::new(
            2,
            vec![
                row(1, ControlType::ConstantCurrent, None, 0.0, 100.0),
                row(2, ControlType::ConstantCurrent, None, 10.0, -50.0),
                row(3, ControlType::ConstantVoltage, None, 20.0, 0.0),
            ],
            true,
        );
        let phases = Phases::of(&cycle);
        assert_eq!(phases.charge.len(), 1);
        assert_eq!(phases.discharge.len(), 1);
        assert_eq!(phases.inferred_rows, 3);
    }

    #[test]
    fn test_absent_phase_placeholder() {
        let cycle = Cycle::new(2, vec![cc(1, Direction::Charge, 0.0, 100.0)], true);
        let action = ActionExtractor::new(ReductionPolicy::Usage, false)
            .extract(&cycle)
            .unwrap();
        assert!(action.charge().is_present());
        assert_eq!(action.discharge(), &PhaseSummary::Absent);
        assert_eq!(action.efficiency_pct(), None);
        assert_eq!(action.to_features()[4..], [0.0; 5]);
    }

    #[test]
    fn test_missing_phase_when_required() {
        let cycle = Cycle::new(2, vec![cc(1, Direction::Discharge, 0.0, -50.0)], true);
        let err = ActionExtractor::new(ReductionPolicy::Mean, true)
            .extract(&cycle)
            .unwrap_err();
        match err {
            Error::MissingPhase { cycle, phase } => {
                assert_eq!(cycle, 2);
                assert_eq!(phase, Direction::Charge);
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn test_first_n_policy() {
        let extractor = ActionExtractor::new(ReductionPolicy::FirstN { n: 2 }, false);
        let action = extractor.extract(&full_cycle()).unwrap();
        assert_eq!(action.charge().values().unwrap(), &[100.0, 100.0]);

        let short = ActionExtractor::new(ReductionPolicy::FirstN { n: 3 }, false);
        let err = short.extract(&full_cycle()).unwrap_err();
        assert!(matches!(
            err,
            Error::ShortPhase {
                phase: Direction::Discharge,
                needed: 3,
                available: 2,
                ..
            }
        ));
    }

    #[test]
    fn test_full_trace_resamples_in_time() {
        let action = ActionExtractor::new(ReductionPolicy::FullTrace { samples: 5 }, false)
            .extract(&full_cycle())
            .unwrap();
        // Charge rows at t = 10, 20, 30 with currents 100, 100, 20
        let trace = action.charge().values().unwrap();
        assert_eq!(trace.len(), 5);
        let expected = [100.0, 100.0, 100.0, 60.0, 20.0];
        for (got, want) in trace.iter().zip(expected) {
            assert!((got - want).abs() < 1e-9, "{got} != {want}");
        }
    }

    #[test]
    fn test_usage_policy() {
        let action = ActionExtractor::new(ReductionPolicy::Usage, false)
            .extract(&full_cycle())
            .unwrap();
        let discharge = action.discharge().values().unwrap();
        assert!((discharge[0] + 50.0).abs() < 1e-9);
        assert!((discharge[1] - 10.0).abs() < 1e-9);
        // Q = t / 36 over t = 40..50
        assert!((discharge[2] - 10.0 / 36.0).abs() < 1e-9);
        // 4 V * -50 mA * 10 s = -2000 mW·s
        assert!((discharge[3] + 2000.0 / 3600.0).abs() < 1e-9);

        // 10/36 mAh out of 20/36 mAh in
        let efficiency = action.efficiency_pct().unwrap();
        assert!((efficiency - 50.0).abs() < 1e-9);
        assert_eq!(action.to_features().len(), 9);
        assert!((action.to_features()[8] - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_efficiency_only_for_usage() {
        let action = ActionExtractor::new(ReductionPolicy::Mean, false)
            .extract(&full_cycle())
            .unwrap();
        assert_eq!(action.efficiency_pct(), None);
        assert_eq!(action.to_features().len(), 2);
    }

    #[test]
    fn test_usage_skips_non_adjacent_rows() {
        let cycle = Cycle::new(
            2,
            vec![
                cc(1, Direction::Discharge, 0.0, -50.0),
                row(2, ControlType::Rest, None, 100.0, 0.0),
                cc(3, Direction::Discharge, 200.0, -50.0),
            ],
            true,
        );
        let action = ActionExtractor::new(ReductionPolicy::Usage, false)
            .extract(&cycle)
            .unwrap();
        assert!(action.discharge().values().unwrap()[1].abs() < f64::EPSILON);
    }

    #[test]
    fn test_feature_names_follow_policy() {
        let names = ActionVector::feature_names(ReductionPolicy::Mean);
        assert_eq!(names, vec!["charge_mean_current_mA", "discharge_mean_current_mA"]);
        let usage = ActionVector::feature_names(ReductionPolicy::Usage);
        assert_eq!(usage.len(), ReductionPolicy::Usage.width() * 2 + 1);
        assert_eq!(usage.last().map(String::as_str), Some(EFFICIENCY_COLUMN));
    }

    /// Collects formatted log output in memory.
    #[derive(Clone, Default)]
    struct LogBuffer(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for LogBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for LogBuffer {
        type Writer = Self;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    fn logged_while(f: impl FnOnce()) -> String {
        let buffer = LogBuffer::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(buffer.clone())
            .with_ansi(false)
            .finish();
        tracing::subscriber::with_default(subscriber, f);
        let bytes = buffer.0.lock().unwrap().clone();
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn test_sign_fallback_is_logged() {
        let unlabelled = Cycle::new(
            2,
            vec![
                row(1, ControlType::ConstantCurrent, None, 0.0, 100.0),
                row(2, ControlType::ConstantCurrent, None, 10.0, -50.0),
            ],
            true,
        );
        let extractor = ActionExtractor::new(ReductionPolicy::Mean, false);

        let logs = logged_while(|| {
            extractor.extract(&unlabelled).unwrap();
        });
        assert!(logs.contains("WARN"));
        assert!(logs.contains("phase taken from current sign"));
        assert!(logs.contains("cycle=2"));
        assert!(logs.contains("rows=2"));

        let quiet = logged_while(|| {
            extractor.extract(&full_cycle()).unwrap();
        });
        assert!(!quiet.contains("current sign"));
    }
}
