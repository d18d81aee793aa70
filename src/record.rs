//! Raw instrument samples

use serde::{Deserialize, Serialize};

use crate::step::{ControlType, Direction};

/// One impedance measurement at a single excitation frequency.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImpedancePoint {
    /// Excitation frequency (Hz).
    pub frequency_hz: f64,
    /// Real part of the impedance (Ohm).
    pub real_ohm: f64,
    /// Imaginary part of the impedance (Ohm), true sign.
    pub imag_ohm: f64,
}

/// One timestamped instrument sample, tagged with its step classification.
///
/// Immutable once read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    /// 1-based line number in the export file.
    pub line: u64,
    /// Cycle counter value.
    pub cycle: u32,
    /// Step index (`Ns`).
    pub step: u32,
    /// Control type of the step.
    pub control: ControlType,
    /// Charge/discharge label declared for the step.
    pub step_direction: Option<Direction>,
    /// Elapsed time since the start of the run (s).
    pub elapsed_s: f64,
    /// Cell voltage (V).
    pub voltage_v: f64,
    /// Measured current (mA).
    pub current_ma: f64,
    /// Cumulative charge (mA·h).
    pub cumulative_charge_mah: f64,
    /// Instrument discharge-capacity counter (mA·h), when exported.
    pub discharge_capacity_mah: Option<f64>,
    /// Impedance point, only on impedance-sweep rows.
    pub impedance: Option<ImpedancePoint>,
}

impl RawRecord {
    /// Whether the row belongs to an impedance-sweep step.
    #[must_use]
    pub const fn is_sweep(&self) -> bool {
        self.control.is_sweep()
    }

    /// Whether the row belongs to a constant-current or constant-voltage step.
    #[must_use]
    pub const fn is_cycling(&self) -> bool {
        self.control.is_cycling()
    }
}
