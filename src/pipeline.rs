//! File-scoped pipeline runs
//!
//! ```text
//! export file ─► ExportReader ─► CycleSegmenter ─► ExampleAssembler ─► Dataset
//!                 (rows)          (cycles)          (example | rejection)
//! ```
//!
//! The export is opened once per run and closed on every exit path, success
//! or failure. File-level errors abort the run; cycle-local failures become
//! rejections and processing continues.

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::action::ActionExtractor;
use crate::assembler::{CycleOutcome, Example, ExampleAssembler, Rejection};
use crate::config::{PipelineConfig, ReductionPolicy};
use crate::cycle::{Cycle, CycleSegmenter};
use crate::format::ExportReader;
use crate::report::RunReport;
use crate::state::StateExtractor;
use crate::{Error, Result};

/// Examples and rejection log of one export, in cycle order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Dataset {
    source: String,
    frequencies: Vec<f64>,
    policy: ReductionPolicy,
    examples: Vec<Example>,
    rejections: Vec<Rejection>,
    report: RunReport,
}

impl Dataset {
    /// Input the dataset was built from.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Expected frequencies (configured or inferred), ascending; the state layout of every example.
    #[must_use]
    pub fn frequencies(&self) -> &[f64] {
        &self.frequencies
    }

    /// Reduction policy; the action layout of every example.
    #[must_use]
    pub const fn policy(&self) -> ReductionPolicy {
        self.policy
    }

    /// Accepted examples.
    #[must_use]
    pub fn examples(&self) -> &[Example] {
        &self.examples
    }

    /// Rejection log.
    #[must_use]
    pub fn rejections(&self) -> &[Rejection] {
        &self.rejections
    }

    /// Run accounting.
    #[must_use]
    pub const fn report(&self) -> &RunReport {
        &self.report
    }
}

/// Turns instrument exports into [`Dataset`]s.
#[derive(Debug, Clone)]
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    /// Create a pipeline, validating `config` first.
    ///
    /// # Errors
    /// Returns [`crate::Error::Configuration`] if the configuration is invalid.
    pub fn new(mut config: PipelineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Validated configuration.
    #[must_use]
    pub const fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Process one export file.
    ///
    /// # Errors
    /// Returns error if the file cannot be opened, its header or schema is
    /// unusable, a body row is corrupt, or the cycle counter decreases.
    pub fn run_file<P: AsRef<Path>>(&self, path: P) -> Result<Dataset> {
        let path = path.as_ref();
        let file = File::open(path)?;
        self.run_reader(path.display().to_string(), file)
    }

    /// Process one export read from `reader`.
    ///
    /// `source` names the input in logs, the report and exported rows.
    ///
    /// # Errors
    /// Same as [`Pipeline::run_file`]. With `infer_frequency_list`, also
    /// [`Error::Configuration`] when no cycle has a usable spectrum.
    pub fn run_reader<R: Read>(&self, source: impl Into<String>, reader: R) -> Result<Dataset> {
        let source = source.into();
        let span = tracing::info_span!("pipeline", file = %source);
        let _enter = span.enter();

        let reader = ExportReader::from_reader(reader)?;
        let state = StateExtractor::new(&self.config, reader.steps())?;
        let action = ActionExtractor::new(
            self.config.action_reduction_policy,
            self.config.phase_required,
        );
        let terminal_step = reader.steps().terminal_step().cloned();
        let capacity_column = reader.columns().discharge_capacity.is_some();
        tracing::info!(
            steps = reader.steps().len(),
            sweep_steps = ?state.sweep_steps(),
            frequencies = self.config.frequency_list.len(),
            capacity_column,
            "processing export"
        );

        let cycles = CycleSegmenter::new(reader, terminal_step);
        let mut report = RunReport::start(source.clone());

        let (frequencies, (examples, rejections)) = if self.config.infer_frequency_list {
            // Inference needs every spectrum before the first cycle is matched
            let cycles = cycles.collect::<Result<Vec<Cycle>>>()?;
            let inferred = self.infer_frequencies(&state, &cycles)?;
            let state = state.with_frequencies(inferred);
            let frequencies = state.frequencies().to_vec();
            let assembler = ExampleAssembler::new(state, action).capacity_column(capacity_column);
            let assembled = assemble_all(&assembler, cycles.into_iter().map(Ok), &mut report)?;
            (frequencies, assembled)
        } else {
            let frequencies = state.frequencies().to_vec();
            let assembler = ExampleAssembler::new(state, action).capacity_column(capacity_column);
            (frequencies, assemble_all(&assembler, cycles, &mut report)?)
        };

        report.finish();
        tracing::info!(
            cycles = report.cycles(),
            accepted = report.accepted(),
            rejected = report.rejected(),
            "export processed"
        );
        if report.is_suspect() {
            tracing::warn!(cycles = report.cycles(), "every cycle was rejected, run is suspect");
        }

        Ok(Dataset {
            source,
            frequencies,
            policy: self.config.action_reduction_policy,
            examples,
            rejections,
            report,
        })
    }

    /// Expected frequencies from the most common spectrum of `cycles`, validated
    /// like a configured list.
    fn infer_frequencies(&self, state: &StateExtractor, cycles: &[Cycle]) -> Result<Vec<f64>> {
        let spectrum = state.most_common_spectrum(cycles).ok_or_else(|| {
            Error::Configuration(
                "no impedance spectrum to infer frequency_list from".to_string(),
            )
        })?;

        let mut config = self.config.clone();
        config.frequency_list = spectrum;
        config.infer_frequency_list = false;
        config.validate()?;
        tracing::info!(
            frequencies = config.frequency_list.len(),
            "frequency list inferred from the most common spectrum"
        );
        Ok(config.frequency_list)
    }

    /// Process several exports independently, in input order.
    ///
    /// A structural error in one file is reported for that file only.
    /// Files run in parallel when the `rayon` feature is enabled.
    #[must_use]
    pub fn run_files<P>(&self, paths: &[P]) -> Vec<(PathBuf, Result<Dataset>)>
    where
        P: AsRef<Path> + Sync,
    {
        let run = |path: &P| {
            let path = path.as_ref();
            let result = self.run_file(path);
            if let Err(e) = &result {
                tracing::warn!(file = %path.display(), "export failed: {e}");
            }
            (path.to_path_buf(), result)
        };

        #[cfg(feature = "rayon")]
        let results = {
            use rayon::prelude::*;
            paths.par_iter().map(run).collect()
        };
        #[cfg(not(feature = "rayon"))]
        let results = paths.iter().map(run).collect();

        results
    }
}

/// Assemble every cycle, recording each outcome in `report`.
fn assemble_all<I>(
    assembler: &ExampleAssembler,
    cycles: I,
    report: &mut RunReport,
) -> Result<(Vec<Example>, Vec<Rejection>)>
where
    I: Iterator<Item = Result<Cycle>>,
{
    let mut examples = Vec::new();
    let mut rejections = Vec::new();
    for cycle in cycles {
        match assembler.assemble(&cycle?)? {
            CycleOutcome::Accepted(example) => {
                report.record_accepted();
                examples.push(example);
            }
            CycleOutcome::Rejected(rejection) => {
                report.record_rejected(&rejection);
                rejections.push(rejection);
            }
        }
    }
    Ok((examples, rejections))
}
