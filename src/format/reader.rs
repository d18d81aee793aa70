//! Streaming body reader

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use csv::StringRecord;

use super::header::ExportHeader;
use super::schema::ColumnMap;
use crate::record::{ImpedancePoint, RawRecord};
use crate::step::StepTable;
use crate::{Error, Result};

/// Single forward pass over the rows of one export.
///
/// Each row is parsed into a [`RawRecord`] and classified against the step
/// table as it is read. The underlying file is closed when the reader is dropped.
pub struct ExportReader<R> {
    header: ExportHeader,
    columns: ColumnMap,
    rows: csv::Reader<BufReader<R>>,
    buffer: StringRecord,
}

impl ExportReader<File> {
    /// Open an export file.
    ///
    /// # Errors
    /// Returns error if the file cannot be opened, or the header or column
    /// row is unusable.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        Self::from_reader(file)
    }
}

impl<R: Read> ExportReader<R> {
    /// Read the header from `reader` and prepare to stream the body.
    ///
    /// # Errors
    /// Returns [`Error::MalformedHeader`] or [`Error::SchemaMismatch`] when the
    /// header or column row is unusable.
    pub fn from_reader(reader: R) -> Result<Self> {
        let mut reader = BufReader::new(reader);
        let header = ExportHeader::read(&mut reader)?;
        let columns = ColumnMap::resolve(&header.columns, header.steps.has_sweeps())?;

        let rows = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .has_headers(false)
            .flexible(true)
            .from_reader(reader);

        Ok(Self {
            header,
            columns,
            rows,
            buffer: StringRecord::new(),
        })
    }

    /// Parsed header.
    #[must_use]
    pub const fn header(&self) -> &ExportHeader {
        &self.header
    }

    /// Step table from the header.
    #[must_use]
    pub const fn steps(&self) -> &StepTable {
        &self.header.steps
    }

    /// Resolved body columns.
    #[must_use]
    pub const fn columns(&self) -> &ColumnMap {
        &self.columns
    }

    fn parse_row(&self, line: u64) -> Result<RawRecord> {
        let row = RowView {
            record: &self.buffer,
            columns: &self.columns,
            line,
        };

        let cycle = row.index(self.columns.cycle)?;
        let step_index = row.index(self.columns.step)?;
        let step = self.header.steps.classify(step_index).map_err(|e| {
            Error::MalformedHeader(format!("line {line}: {}", header_message(&e)))
        })?;

        let impedance = match (step.control.is_sweep(), self.columns.impedance) {
            (true, Some(columns)) => {
                let imag = row.number(columns.imag.index)?;
                Some(ImpedancePoint {
                    frequency_hz: row.number(columns.frequency)?,
                    real_ohm: row.number(columns.real)?,
                    imag_ohm: if columns.imag.negated { -imag } else { imag },
                })
            }
            _ => None,
        };

        Ok(RawRecord {
            line,
            cycle,
            step: step_index,
            control: step.control,
            step_direction: step.direction,
            elapsed_s: row.number(self.columns.time)?,
            voltage_v: row.number(self.columns.voltage)?,
            current_ma: row.number(self.columns.current)?,
            cumulative_charge_mah: row.number(self.columns.charge)?,
            discharge_capacity_mah: self
                .columns
                .discharge_capacity
                .map(|i| row.optional_number(i))
                .transpose()?
                .flatten(),
            impedance,
        })
    }
}

impl<R: Read> Iterator for ExportReader<R> {
    type Item = Result<RawRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.rows.read_record(&mut self.buffer) {
            Ok(false) => None,
            Ok(true) => {
                let body_line = self.buffer.position().map_or(0, csv::Position::line);
                let line = self.header.header_lines as u64 + body_line;
                Some(self.parse_row(line))
            }
            Err(e) => Some(Err(e.into())),
        }
    }
}

fn header_message(error: &Error) -> String {
    match error {
        Error::MalformedHeader(message) => message.clone(),
        other => other.to_string(),
    }
}

/// Typed access to the cells of one body row.
struct RowView<'a> {
    record: &'a StringRecord,
    columns: &'a ColumnMap,
    line: u64,
}

impl RowView<'_> {
    fn cell(&self, index: usize) -> &str {
        self.record.get(index).map_or("", str::trim)
    }

    fn invalid(&self, index: usize) -> Error {
        Error::InvalidValue {
            line: self.line,
            column: self.columns.name(index).to_string(),
            value: self.cell(index).to_string(),
        }
    }

    fn number(&self, index: usize) -> Result<f64> {
        self.cell(index)
            .parse::<f64>()
            .map_err(|_| self.invalid(index))
    }

    fn optional_number(&self, index: usize) -> Result<Option<f64>> {
        if self.cell(index).is_empty() {
            return Ok(None);
        }
        self.number(index).map(Some)
    }

    /// Counter and step columns are exported as floats (`1.000000000000000E+000`).
    #[allow(clippy::cast_possible_truncation)]
    #[allow(clippy::cast_sign_loss)]
    fn index(&self, index: usize) -> Result<u32> {
        let text = self.cell(index);
        if let Ok(value) = text.parse::<u32>() {
            return Ok(value);
        }
        let value = self.number(index)?;
        if value.fract() != 0.0 || value < 0.0 || value > f64::from(u32::MAX) {
            return Err(self.invalid(index));
        }
        Ok(value as u32)
    }
}
