//! Error types for EIS-SAV
//!
//! Two families share one enum:
//! - file-level errors (header, schema, cycle counter, I/O) abort the file
//! - cycle-local errors (spectrum, phase) reject a single cycle and processing continues

use thiserror::Error;

use crate::step::Direction;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// EIS-SAV error types
#[derive(Error, Debug)]
pub enum Error {
    /// Step table unusable or a body row references an undeclared step
    #[error("Malformed header: {0}")]
    MalformedHeader(String),

    /// Body column row lacks columns the pipeline needs
    #[error("Schema mismatch: missing column(s) {}", missing.join(", "))]
    SchemaMismatch {
        /// Column names that were expected but not found
        missing: Vec<String>,
    },

    /// A body cell could not be parsed as a number
    #[error("Invalid value {value:?} in column '{column}' at line {line}")]
    InvalidValue {
        /// 1-based line number in the export file
        line: u64,
        /// Column name
        column: String,
        /// Raw cell text
        value: String,
    },

    /// Cycle counter decreased (corrupt export)
    #[error("Cycle counter decreased at line {line}: {previous} -> {found}")]
    NonMonotonicCycle {
        /// 1-based line number in the export file
        line: u64,
        /// Counter value of the open cycle
        previous: u32,
        /// Counter value found on the offending row
        found: u32,
    },

    /// Impedance sweep does not match the configured frequency list
    #[error("Incomplete spectrum in cycle {cycle}: {detail}")]
    IncompleteSpectrum {
        /// Cycle identifier
        cycle: u32,
        /// What was missing, duplicated or unexpected
        detail: String,
    },

    /// Charge or discharge phase absent while `phase_required` is set
    #[error("Missing {phase} phase in cycle {cycle}")]
    MissingPhase {
        /// Cycle identifier
        cycle: u32,
        /// Phase that was absent
        phase: Direction,
    },

    /// Phase has fewer samples than the reduction policy needs
    #[error("Short {phase} phase in cycle {cycle}: need {needed} samples, found {available}")]
    ShortPhase {
        /// Cycle identifier
        cycle: u32,
        /// Phase that was too short
        phase: Direction,
        /// Samples required by the policy
        needed: usize,
        /// Samples present
        available: usize,
    },

    /// Invalid pipeline configuration
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Storage error (Parquet/Arrow/CSV output)
    #[error("Storage error: {0}")]
    StorageError(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Delimited text error
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Arrow error
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Parquet error
    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    /// JSON configuration error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Whether the error concerns a single cycle and can be recovered by rejecting it.
    #[must_use]
    pub const fn is_cycle_local(&self) -> bool {
        matches!(
            self,
            Self::IncompleteSpectrum { .. } | Self::MissingPhase { .. } | Self::ShortPhase { .. }
        )
    }
}
