//! Example assembly: one outcome per cycle
//!
//! Every cycle maps to exactly one [`CycleOutcome`]: an [`Example`] when the
//! cycle is complete and both extractors succeed, otherwise a [`Rejection`]
//! carrying the first reason found. Nothing is partially populated.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::action::{ActionExtractor, ActionVector, Phases};
use crate::cycle::Cycle;
use crate::format::schema::DISCHARGE_CAPACITY_COLUMN;
use crate::state::{StateExtractor, StateVector};
use crate::step::Direction;
use crate::{Error, Result};

/// One training example.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Example {
    /// Cycle counter value.
    pub cycle: u32,
    /// Impedance spectrum.
    pub state: StateVector,
    /// Charge/discharge protocol summary.
    pub action: ActionVector,
    /// Terminal discharge capacity (mA·h).
    pub capacity_mah: f64,
}

/// Why a cycle produced no example.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "kebab-case")]
pub enum RejectionReason {
    /// The file ended before the cycle's terminal step finished.
    IncompleteCycle,
    /// The impedance sweep does not match the configured frequencies.
    IncompleteSpectrum {
        /// What was missing, duplicated or unexpected.
        detail: String,
    },
    /// A required phase is absent.
    MissingPhase {
        /// Absent phase.
        phase: Direction,
    },
    /// A phase is shorter than the reduction policy needs.
    ShortPhase {
        /// Short phase.
        phase: Direction,
        /// Samples required.
        needed: usize,
        /// Samples present.
        available: usize,
    },
    /// No usable discharge capacity.
    NoOutcome {
        /// Why the capacity is unusable.
        detail: String,
    },
}

impl RejectionReason {
    /// Stable short code, used as the key of rejection counts.
    #[must_use]
    pub const fn code(&self) -> &'static str {
        match self {
            Self::IncompleteCycle => "incomplete-cycle",
            Self::IncompleteSpectrum { .. } => "incomplete-spectrum",
            Self::MissingPhase { .. } => "missing-phase",
            Self::ShortPhase { .. } => "short-phase",
            Self::NoOutcome { .. } => "no-outcome",
        }
    }
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IncompleteCycle => write!(f, "file ended before the cycle's terminal step finished"),
            Self::IncompleteSpectrum { detail } => write!(f, "incomplete spectrum: {detail}"),
            Self::MissingPhase { phase } => write!(f, "missing {phase} phase"),
            Self::ShortPhase {
                phase,
                needed,
                available,
            } => write!(f, "{phase} phase has {available} samples, need {needed}"),
            Self::NoOutcome { detail } => write!(f, "no outcome: {detail}"),
        }
    }
}

impl TryFrom<Error> for RejectionReason {
    type Error = Error;

    /// Convert a cycle-local error; file-level errors are handed back.
    fn try_from(error: Error) -> Result<Self> {
        match error {
            Error::IncompleteSpectrum { detail, .. } => Ok(Self::IncompleteSpectrum { detail }),
            Error::MissingPhase { phase, .. } => Ok(Self::MissingPhase { phase }),
            Error::ShortPhase {
                phase,
                needed,
                available,
                ..
            } => Ok(Self::ShortPhase {
                phase,
                needed,
                available,
            }),
            other => Err(other),
        }
    }
}

/// Rejection log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rejection {
    /// Cycle counter value.
    pub cycle: u32,
    /// Reason.
    #[serde(flatten)]
    pub reason: RejectionReason,
}

/// Result of assembling one cycle.
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// The cycle produced an example.
    Accepted(Example),
    /// The cycle was rejected.
    Rejected(Rejection),
}

/// Combines the state and action extractors and the outcome reading.
#[derive(Debug, Clone)]
pub struct ExampleAssembler {
    state: StateExtractor,
    action: ActionExtractor,
    capacity_column: bool,
}

impl ExampleAssembler {
    /// Create an assembler for exports without a discharge-capacity column.
    #[must_use]
    pub const fn new(state: StateExtractor, action: ActionExtractor) -> Self {
        Self {
            state,
            action,
            capacity_column: false,
        }
    }

    /// Declare whether the export has a `Q discharge/mA.h` column.
    ///
    /// With the column, a blank cell on the last discharge row rejects the
    /// cycle instead of falling back to the cumulative charge.
    #[must_use]
    pub const fn capacity_column(mut self, exported: bool) -> Self {
        self.capacity_column = exported;
        self
    }

    /// Assemble one cycle.
    ///
    /// Checks run in order: completeness, spectrum, phases, outcome. The first
    /// failure becomes the rejection reason.
    ///
    /// # Errors
    /// Only file-level errors are returned; cycle-local failures become
    /// [`CycleOutcome::Rejected`].
    pub fn assemble(&self, cycle: &Cycle) -> Result<CycleOutcome> {
        let outcome = match self.try_assemble(cycle) {
            Ok(example) => {
                tracing::debug!(cycle = cycle.index(), rows = cycle.len(), "cycle accepted");
                CycleOutcome::Accepted(example)
            }
            Err(rejected) => {
                let reason = rejected.into_reason()?;
                tracing::warn!(cycle = cycle.index(), code = reason.code(), "cycle rejected: {reason}");
                CycleOutcome::Rejected(Rejection {
                    cycle: cycle.index(),
                    reason,
                })
            }
        };
        Ok(outcome)
    }

    fn try_assemble(&self, cycle: &Cycle) -> std::result::Result<Example, Rejected> {
        if !cycle.is_complete() {
            return Err(Rejected::Reason(RejectionReason::IncompleteCycle));
        }
        let state = self.state.extract(cycle)?;
        let action = self.action.extract(cycle)?;
        let capacity_mah = terminal_capacity(cycle, self.capacity_column).map_err(Rejected::Reason)?;

        Ok(Example {
            cycle: cycle.index(),
            state,
            action,
            capacity_mah,
        })
    }
}

/// Internal rejection path: an already-classified reason or an extractor error.
enum Rejected {
    Reason(RejectionReason),
    Error(Error),
}

impl From<Error> for Rejected {
    fn from(error: Error) -> Self {
        Self::Error(error)
    }
}

impl Rejected {
    fn into_reason(self) -> Result<RejectionReason> {
        match self {
            Self::Reason(reason) => Ok(reason),
            Self::Error(error) => RejectionReason::try_from(error),
        }
    }
}

/// Capacity at the end of the discharge phase.
///
/// Reads the instrument's discharge-capacity column when it is exported;
/// otherwise the magnitude of the cumulative charge on the last discharge row.
fn terminal_capacity(cycle: &Cycle, capacity_column: bool) -> std::result::Result<f64, RejectionReason> {
    let phases = Phases::of(cycle);
    let last = phases.discharge.last().ok_or_else(|| RejectionReason::NoOutcome {
        detail: "cycle has no discharge rows".to_string(),
    })?;
    let capacity = match (last.discharge_capacity_mah, capacity_column) {
        (Some(capacity), _) => capacity,
        (None, true) => {
            return Err(RejectionReason::NoOutcome {
                detail: format!("blank {DISCHARGE_CAPACITY_COLUMN} at line {}", last.line),
            });
        }
        (None, false) => last.cumulative_charge_mah.abs(),
    };
    if !capacity.is_finite() {
        return Err(RejectionReason::NoOutcome {
            detail: format!("non-finite capacity at line {}", last.line),
        });
    }
    Ok(capacity)
}
