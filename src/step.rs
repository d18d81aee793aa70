//! Step definitions and the step classifier
//!
//! The step table is parsed once from the export header and is read-only for
//! the rest of the batch. Every body row is tagged by looking its step index up
//! in the table.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::record::RawRecord;
use crate::{Error, Result};

/// Control type of a protocol step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ControlType {
    /// Open circuit rest.
    Rest,
    /// Potentio- or galvano-static impedance sweep.
    ImpedanceSweep,
    /// Constant-current charge or discharge.
    ConstantCurrent,
    /// Constant-voltage hold.
    ConstantVoltage,
    /// Loop back to an earlier step.
    Loop,
}

impl ControlType {
    /// Parse an instrument control-type label (`Rest`, `OCV`, `PEIS`, `GEIS`, `CC`, `CV`, `Loop`).
    ///
    /// # Errors
    /// Returns [`Error::MalformedHeader`] for an unknown label.
    pub fn parse_label(label: &str) -> Result<Self> {
        match label.trim().to_ascii_uppercase().as_str() {
            "REST" | "OCV" => Ok(Self::Rest),
            "PEIS" | "GEIS" => Ok(Self::ImpedanceSweep),
            "CC" => Ok(Self::ConstantCurrent),
            "CV" => Ok(Self::ConstantVoltage),
            "LOOP" => Ok(Self::Loop),
            other => Err(Error::MalformedHeader(format!(
                "unknown control type '{other}'"
            ))),
        }
    }

    /// Whether the step records an impedance spectrum.
    #[must_use]
    pub const fn is_sweep(self) -> bool {
        matches!(self, Self::ImpedanceSweep)
    }

    /// Constant-current and constant-voltage steps carry the applied current protocol.
    #[must_use]
    pub const fn is_cycling(self) -> bool {
        matches!(self, Self::ConstantCurrent | Self::ConstantVoltage)
    }
}

/// Charge or discharge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Current flows into the cell.
    Charge,
    /// Current flows out of the cell.
    Discharge,
}

impl Direction {
    /// Parse a `charge/discharge` header label. `-` and empty mean unlabelled.
    ///
    /// # Errors
    /// Returns [`Error::MalformedHeader`] for any other label.
    pub fn parse_label(label: &str) -> Result<Option<Self>> {
        match label.trim().to_ascii_lowercase().as_str() {
            "" | "-" => Ok(None),
            "charge" => Ok(Some(Self::Charge)),
            "discharge" => Ok(Some(Self::Discharge)),
            other => Err(Error::MalformedHeader(format!(
                "unknown charge/discharge label '{other}'"
            ))),
        }
    }

    /// Direction implied by the sign of a measured current (positive charges).
    ///
    /// Zero current has no direction.
    #[must_use]
    pub fn from_current(current_ma: f64) -> Option<Self> {
        if current_ma > 0.0 {
            Some(Self::Charge)
        } else if current_ma < 0.0 {
            Some(Self::Discharge)
        } else {
            None
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Charge => f.write_str("charge"),
            Self::Discharge => f.write_str("discharge"),
        }
    }
}

/// Quantity watched by a step stop condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LimitQuantity {
    /// Cell voltage (V).
    Voltage,
    /// Signed current (mA).
    Current,
    /// Current magnitude (mA).
    CurrentMagnitude,
    /// Time spent in the step (s).
    StepTime,
}

/// A parsed stop condition such as `Ewe < 3.0 V` or `t > 60 s`.
///
/// Thresholds are held in V, mA or s whatever unit the header used.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StopCondition {
    /// Watched quantity.
    pub quantity: LimitQuantity,
    /// `true` for `>` conditions, `false` for `<`.
    pub above: bool,
    /// Threshold in the quantity's base unit.
    pub threshold: f64,
}

impl StopCondition {
    /// Parse `<quantity> <op> <value> <unit>`. Returns `None` for anything else.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let mut parts = text.split_whitespace();
        let (quantity, op, value) = (parts.next()?, parts.next()?, parts.next()?);
        let unit = parts.next().unwrap_or("");
        if parts.next().is_some() {
            return None;
        }

        let above = match op {
            ">" | ">=" => true,
            "<" | "<=" => false,
            _ => return None,
        };
        let value = value.parse::<f64>().ok()?;
        let (quantity, scale) = match (quantity, unit) {
            ("Ewe", "V") => (LimitQuantity::Voltage, 1.0),
            ("Ewe", "mV") => (LimitQuantity::Voltage, 1e-3),
            ("I", "mA") => (LimitQuantity::Current, 1.0),
            ("I", "A") => (LimitQuantity::Current, 1e3),
            ("|I|", "mA") => (LimitQuantity::CurrentMagnitude, 1.0),
            ("|I|", "A") => (LimitQuantity::CurrentMagnitude, 1e3),
            ("t", "s") => (LimitQuantity::StepTime, 1.0),
            ("t", "mn" | "min") => (LimitQuantity::StepTime, 60.0),
            ("t", "h") => (LimitQuantity::StepTime, 3600.0),
            _ => return None,
        };
        Some(Self {
            quantity,
            above,
            threshold: value * scale,
        })
    }

    /// Whether the condition holds on `last`, the step having run for `step_time_s`.
    ///
    /// The threshold itself counts as reached.
    #[must_use]
    pub fn is_met(&self, last: &RawRecord, step_time_s: f64) -> bool {
        let observed = match self.quantity {
            LimitQuantity::Voltage => last.voltage_v,
            LimitQuantity::Current => last.current_ma,
            LimitQuantity::CurrentMagnitude => last.current_ma.abs(),
            LimitQuantity::StepTime => step_time_s,
        };
        if self.above {
            observed >= self.threshold
        } else {
            observed <= self.threshold
        }
    }
}

/// Static metadata of one protocol step.
///
/// Setpoints are kept for documentation only; the measured current always
/// wins over the declared setpoint. Stop conditions decide whether a file
/// that ends inside the step ran it to completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// Step index (`Ns`).
    pub index: u32,
    /// Control type.
    pub control: ControlType,
    /// Declared charge/discharge label, if any.
    pub direction: Option<Direction>,
    /// Declared setpoint value.
    pub setpoint: Option<f64>,
    /// Unit of the setpoint.
    pub setpoint_unit: String,
    /// Stop conditions, verbatim.
    pub limits: Vec<String>,
}

impl Step {
    /// Create a step with no setpoint or limits.
    #[must_use]
    pub fn new(index: u32, control: ControlType, direction: Option<Direction>) -> Self {
        Self {
            index,
            control,
            direction,
            setpoint: None,
            setpoint_unit: String::new(),
            limits: Vec::new(),
        }
    }

    /// Whether `rows`, the step's final contiguous rows, show it ran to a stop condition.
    ///
    /// A step with no declared limits is taken as finished. A limit that
    /// cannot be parsed is never met.
    #[must_use]
    pub fn reached_stop(&self, rows: &[RawRecord]) -> bool {
        let (Some(first), Some(last)) = (rows.first(), rows.last()) else {
            return false;
        };
        if self.limits.is_empty() {
            return true;
        }
        // The first sample lands one logging period after the step starts
        let period = rows.get(1).map_or(0.0, |second| second.elapsed_s - first.elapsed_s);
        let step_time_s = last.elapsed_s - first.elapsed_s + period;
        self.limits
            .iter()
            .filter_map(|limit| StopCondition::parse(limit))
            .any(|condition| condition.is_met(last, step_time_s))
    }
}

/// Lookup table of steps keyed by step index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StepTable {
    steps: BTreeMap<u32, Step>,
}

impl StepTable {
    /// Build a table, rejecting duplicate step indices.
    ///
    /// # Errors
    /// Returns [`Error::MalformedHeader`] when a step index appears twice or the table is empty.
    pub fn from_steps(steps: impl IntoIterator<Item = Step>) -> Result<Self> {
        let mut table = BTreeMap::new();
        for step in steps {
            let index = step.index;
            if table.insert(index, step).is_some() {
                return Err(Error::MalformedHeader(format!(
                    "step {index} declared twice"
                )));
            }
        }
        if table.is_empty() {
            return Err(Error::MalformedHeader("step table is empty".to_string()));
        }
        Ok(Self { steps: table })
    }

    /// Number of declared steps.
    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether no steps are declared.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Get a step by index.
    #[must_use]
    pub fn get(&self, index: u32) -> Option<&Step> {
        self.steps.get(&index)
    }

    /// Iterate steps in index order.
    pub fn iter(&self) -> impl Iterator<Item = &Step> {
        self.steps.values()
    }

    /// Classify a step index referenced by a body row.
    ///
    /// # Errors
    /// Returns [`Error::MalformedHeader`] when the header has no entry for `index`.
    pub fn classify(&self, index: u32) -> Result<&Step> {
        self.steps.get(&index).ok_or_else(|| {
            Error::MalformedHeader(format!("step {index} referenced but not declared"))
        })
    }

    /// Indices of all impedance-sweep steps.
    #[must_use]
    pub fn sweep_indices(&self) -> Vec<u32> {
        self.iter()
            .filter(|s| s.control == ControlType::ImpedanceSweep)
            .map(|s| s.index)
            .collect()
    }

    /// Whether any step is an impedance sweep.
    #[must_use]
    pub fn has_sweeps(&self) -> bool {
        self.iter().any(|s| s.control == ControlType::ImpedanceSweep)
    }

    /// Last step a cycle runs through: the highest non-loop step index.
    #[must_use]
    pub fn terminal_step(&self) -> Option<&Step> {
        self.steps
            .values()
            .rev()
            .find(|s| s.control != ControlType::Loop)
    }
}
