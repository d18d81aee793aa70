//! # EIS-SAV: Battery Cycling Exports to (State, Action, Outcome) Examples
//!
//! **Version**: 0.1.0
//!
//! EIS-SAV reads a battery cycler's text export (impedance sweeps interleaved
//! with charge/discharge steps) and turns every cycle into either one training
//! example or one logged rejection.
//!
//! ## Pipeline
//!
//! - **Step classifier**: the header's step table tags every row (sweep, rest, CC, CV, loop)
//! - **Cycle segmenter**: rows are grouped by the monotonic cycle counter
//! - **State extractor**: the impedance spectrum at the configured frequencies
//! - **Action extractor**: the charge and discharge current, reduced by a policy
//! - **Example assembler**: state + action + terminal discharge capacity, or a rejection
//!
//! Structural problems (unusable header, corrupt rows, decreasing cycle
//! counter) abort the file. Data-quality problems reject a single cycle.
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use eis_sav::config::PipelineConfig;
//! use eis_sav::pipeline::Pipeline;
//!
//! let config = PipelineConfig::from_json_file("config.json")?;
//! let dataset = Pipeline::new(config)?.run_file("cell01_eis.txt")?;
//!
//! println!(
//!     "{} examples, {} rejected",
//!     dataset.examples().len(),
//!     dataset.rejections().len()
//! );
//! dataset.write_parquet("cell01.parquet")?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

pub mod action;
pub mod assembler;
pub mod config;
pub mod cycle;
pub mod error;
pub mod format;
pub mod pipeline;
pub mod record;
pub mod report;
pub mod state;
pub mod step;
pub mod storage;

pub use assembler::{CycleOutcome, Example, Rejection, RejectionReason};
pub use config::{PipelineConfig, ReductionPolicy, StateNormalization};
pub use error::{Error, Result};
pub use pipeline::{Dataset, Pipeline};
pub use report::{RunReport, RunStatus};
