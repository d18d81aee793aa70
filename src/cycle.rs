//! Cycle segmentation
//!
//! A cycle is a maximal contiguous run of rows sharing one cycle-counter
//! value. The segmenter is a single forward pass: it buffers the open cycle,
//! closes it when the counter advances, and stops at the first error.
//!
//! Only the trailing cycle can be cut short. It is complete when its last rows
//! belong to the protocol's terminal step and that step reached one of its
//! stop conditions (`Ewe < 3.0 V`, `t > 60 s`, ...).

use serde::{Deserialize, Serialize};

use crate::record::RawRecord;
use crate::step::Step;
use crate::{Error, Result};

/// Contiguous rows of one cycle, in file order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cycle {
    index: u32,
    records: Vec<RawRecord>,
    complete: bool,
}

impl Cycle {
    /// Create a cycle from its rows.
    #[must_use]
    pub fn new(index: u32, records: Vec<RawRecord>, complete: bool) -> Self {
        Self {
            index,
            records,
            complete,
        }
    }

    /// Cycle counter value.
    #[must_use]
    pub const fn index(&self) -> u32 {
        self.index
    }

    /// Rows of the cycle, in file order.
    #[must_use]
    pub fn records(&self) -> &[RawRecord] {
        &self.records
    }

    /// Take ownership of the rows.
    #[must_use]
    pub fn into_records(self) -> Vec<RawRecord> {
        self.records
    }

    /// `false` for a trailing cycle the file ended in the middle of.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        self.complete
    }

    /// Number of rows.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the cycle has no rows.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Lazy iterator of [`Cycle`]s over a stream of rows.
///
/// Not re-entrant: once the input is exhausted or an error is yielded the
/// segmenter is fused and only a fresh read of the input restarts it.
pub struct CycleSegmenter<I> {
    rows: I,
    pending: Option<RawRecord>,
    terminal_step: Option<Step>,
    finished: bool,
}

impl<I> CycleSegmenter<I>
where
    I: Iterator<Item = Result<RawRecord>>,
{
    /// Segment `rows`.
    ///
    /// `terminal_step` is the last step of the protocol: the trailing cycle is
    /// complete only if it ends inside that step with a stop condition met.
    /// `None` trusts the trailing cycle.
    pub fn new<T>(rows: T, terminal_step: Option<Step>) -> Self
    where
        T: IntoIterator<IntoIter = I>,
    {
        Self {
            rows: rows.into_iter(),
            pending: None,
            terminal_step,
            finished: false,
        }
    }

    fn fail(&mut self, error: Error) -> Option<Result<Cycle>> {
        self.finished = true;
        self.pending = None;
        Some(Err(error))
    }
}

impl<I> Iterator for CycleSegmenter<I>
where
    I: Iterator<Item = Result<RawRecord>>,
{
    type Item = Result<Cycle>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        let first = match self.pending.take() {
            Some(row) => row,
            None => match self.rows.next() {
                None => {
                    self.finished = true;
                    return None;
                }
                Some(Err(e)) => return self.fail(e),
                Some(Ok(row)) => row,
            },
        };

        let index = first.cycle;
        let mut records = vec![first];

        loop {
            match self.rows.next() {
                None => {
                    self.finished = true;
                    let complete = self
                        .terminal_step
                        .as_ref()
                        .map_or(true, |step| ran_to_stop(step, &records));
                    if !complete {
                        tracing::debug!(cycle = index, "trailing cycle ends before its terminal step finished");
                    }
                    return Some(Ok(Cycle::new(index, records, complete)));
                }
                Some(Err(e)) => return self.fail(e),
                Some(Ok(row)) if row.cycle == index => records.push(row),
                Some(Ok(row)) if row.cycle > index => {
                    self.pending = Some(row);
                    return Some(Ok(Cycle::new(index, records, true)));
                }
                Some(Ok(row)) => {
                    return self.fail(Error::NonMonotonicCycle {
                        line: row.line,
                        previous: index,
                        found: row.cycle,
                    });
                }
            }
        }
    }
}

/// Whether `records` end with a run of `step` that reached a stop condition.
fn ran_to_stop(step: &Step, records: &[RawRecord]) -> bool {
    let run = records.iter().rev().take_while(|r| r.step == step.index).count();
    run > 0 && step.reached_stop(&records[records.len() - run..])
}

impl<I> std::iter::FusedIterator for CycleSegmenter<I> where I: Iterator<Item = Result<RawRecord>> {}
