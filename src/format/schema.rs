//! Body column schema, validated once when the export is opened

use crate::{Error, Result};

/// Cycle counter column.
pub const CYCLE_COLUMN: &str = "cycle number";
/// Step index column.
pub const STEP_COLUMN: &str = "Ns";
/// Elapsed time column.
pub const TIME_COLUMN: &str = "time/s";
/// Cell voltage column.
pub const VOLTAGE_COLUMN: &str = "Ewe/V";
/// Measured current column.
pub const CURRENT_COLUMN: &str = "I/mA";
/// Cumulative charge column.
pub const CHARGE_COLUMN: &str = "(Q-Qo)/mA.h";
/// Sweep frequency column.
pub const FREQUENCY_COLUMN: &str = "freq/Hz";
/// Real impedance column.
pub const REAL_COLUMN: &str = "Re(Z)/Ohm";
/// Negated imaginary impedance column, as the instrument exports it.
pub const NEG_IMAG_COLUMN: &str = "-Im(Z)/Ohm";
/// Imaginary impedance column with true sign.
pub const IMAG_COLUMN: &str = "Im(Z)/Ohm";
/// Spreadsheet tools rewrite a header starting with `-` into this.
pub const MANGLED_NEG_IMAG_COLUMN: &str = "#NAME?";
/// Instrument discharge-capacity counter column.
pub const DISCHARGE_CAPACITY_COLUMN: &str = "Q discharge/mA.h";

/// Imaginary impedance column position and sign.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImagColumn {
    /// Column position.
    pub index: usize,
    /// Whether the column holds `-Im(Z)`.
    pub negated: bool,
}

/// Impedance column positions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImpedanceColumns {
    /// Frequency column.
    pub frequency: usize,
    /// Real part column.
    pub real: usize,
    /// Imaginary part column.
    pub imag: ImagColumn,
}

/// Positions of the body columns the pipeline reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnMap {
    /// Cycle counter.
    pub cycle: usize,
    /// Step index.
    pub step: usize,
    /// Elapsed time.
    pub time: usize,
    /// Cell voltage.
    pub voltage: usize,
    /// Current.
    pub current: usize,
    /// Cumulative charge.
    pub charge: usize,
    /// Impedance columns, present when the protocol has sweep steps.
    pub impedance: Option<ImpedanceColumns>,
    /// Discharge-capacity counter, if exported.
    pub discharge_capacity: Option<usize>,
    /// Column names, in file order.
    pub names: Vec<String>,
}

impl ColumnMap {
    /// Resolve column positions from the body column row.
    ///
    /// # Errors
    /// Returns [`Error::SchemaMismatch`] listing every required column that is
    /// absent. Impedance columns are required only when `require_impedance` is set.
    pub fn resolve(names: &[String], require_impedance: bool) -> Result<Self> {
        let find = |name: &str| names.iter().position(|n| n == name);
        let mut missing = Vec::new();
        let mut required = |name: &str| {
            let position = find(name);
            if position.is_none() {
                missing.push(name.to_string());
            }
            position.unwrap_or(usize::MAX)
        };

        let cycle = required(CYCLE_COLUMN);
        let step = required(STEP_COLUMN);
        let time = required(TIME_COLUMN);
        let voltage = required(VOLTAGE_COLUMN);
        let current = required(CURRENT_COLUMN);
        let charge = required(CHARGE_COLUMN);

        let imag = find(NEG_IMAG_COLUMN)
            .or_else(|| find(MANGLED_NEG_IMAG_COLUMN))
            .map(|index| ImagColumn {
                index,
                negated: true,
            })
            .or_else(|| {
                find(IMAG_COLUMN).map(|index| ImagColumn {
                    index,
                    negated: false,
                })
            });

        let impedance = match (find(FREQUENCY_COLUMN), find(REAL_COLUMN), imag) {
            (Some(frequency), Some(real), Some(imag)) => Some(ImpedanceColumns {
                frequency,
                real,
                imag,
            }),
            (frequency, real, imag) => {
                if require_impedance {
                    if frequency.is_none() {
                        missing.push(FREQUENCY_COLUMN.to_string());
                    }
                    if real.is_none() {
                        missing.push(REAL_COLUMN.to_string());
                    }
                    if imag.is_none() {
                        missing.push(NEG_IMAG_COLUMN.to_string());
                    }
                }
                None
            }
        };

        if !missing.is_empty() {
            return Err(Error::SchemaMismatch { missing });
        }

        Ok(Self {
            cycle,
            step,
            time,
            voltage,
            current,
            charge,
            impedance,
            discharge_capacity: find(DISCHARGE_CAPACITY_COLUMN),
            names: names.to_vec(),
        })
    }

    /// Name of the column at `index`.
    #[must_use]
    pub fn name(&self, index: usize) -> &str {
        self.names.get(index).map_or("", String::as_str)
    }
}
