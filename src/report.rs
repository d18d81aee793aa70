//! Run Report - accounting for one processed export

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::assembler::Rejection;

/// Status of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunStatus {
    /// Run is currently executing.
    Running,
    /// Run completed with at least one accepted example.
    Success,
    /// Run completed mechanically but every cycle was rejected.
    Suspect,
}

/// Counts and rejection reasons of one pipeline run.
///
/// `accepted + rejected == cycles` holds for every finished report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunReport {
    source: String,
    status: RunStatus,
    started_at: DateTime<Utc>,
    ended_at: Option<DateTime<Utc>>,
    cycles: usize,
    accepted: usize,
    rejected: usize,
    reasons: BTreeMap<String, usize>,
}

impl RunReport {
    /// Start a report for `source`, in Running status.
    #[must_use]
    pub fn start(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            status: RunStatus::Running,
            started_at: Utc::now(),
            ended_at: None,
            cycles: 0,
            accepted: 0,
            rejected: 0,
            reasons: BTreeMap::new(),
        }
    }

    /// Record an accepted cycle.
    pub fn record_accepted(&mut self) {
        self.cycles += 1;
        self.accepted += 1;
    }

    /// Record a rejected cycle.
    pub fn record_rejected(&mut self, rejection: &Rejection) {
        self.cycles += 1;
        self.rejected += 1;
        *self
            .reasons
            .entry(rejection.reason.code().to_string())
            .or_insert(0) += 1;
    }

    /// Finish the run.
    ///
    /// Sets the `ended_at` timestamp to now. A run that accepted nothing is
    /// [`RunStatus::Suspect`].
    pub fn finish(&mut self) {
        self.status = if self.accepted == 0 {
            RunStatus::Suspect
        } else {
            RunStatus::Success
        };
        self.ended_at = Some(Utc::now());
    }

    /// Input the run read.
    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Get the current run status.
    #[must_use]
    pub const fn status(&self) -> RunStatus {
        self.status
    }

    /// Whether the caller should treat the run as suspect.
    #[must_use]
    pub fn is_suspect(&self) -> bool {
        self.status == RunStatus::Suspect
    }

    /// Get the start timestamp.
    #[must_use]
    pub const fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Get the end timestamp, if the run has finished.
    #[must_use]
    pub const fn ended_at(&self) -> Option<DateTime<Utc>> {
        self.ended_at
    }

    /// Segmented cycles.
    #[must_use]
    pub const fn cycles(&self) -> usize {
        self.cycles
    }

    /// Accepted examples.
    #[must_use]
    pub const fn accepted(&self) -> usize {
        self.accepted
    }

    /// Rejected cycles.
    #[must_use]
    pub const fn rejected(&self) -> usize {
        self.rejected
    }

    /// Rejection counts keyed by reason code.
    #[must_use]
    pub const fn reasons(&self) -> &BTreeMap<String, usize> {
        &self.reasons
    }

    /// Serialize as pretty JSON.
    ///
    /// # Errors
    /// Returns error if serialization fails.
    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
