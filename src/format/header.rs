//! Export header: line count, step table, body column row

use std::io::BufRead;

use crate::step::{ControlType, Direction, Step, StepTable};
use crate::{Error, Result};

/// Header line that declares how many header lines precede the body.
const HEADER_COUNT_PREFIX: &str = "Nb header lines";

/// The count line must appear within this many lines of the top of the file.
const MAX_PREAMBLE_LINES: usize = 8;

/// Parsed export header.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportHeader {
    /// First line of the file.
    pub title: String,
    /// Total number of header lines, column row included.
    pub header_lines: usize,
    /// Step definitions.
    pub steps: StepTable,
    /// Body column names, in file order.
    pub columns: Vec<String>,
}

impl ExportHeader {
    /// Read the header from the top of an export, leaving `reader` positioned at the first body row.
    ///
    /// # Errors
    /// Returns [`Error::MalformedHeader`] when the line count is missing or
    /// inconsistent, the step table is missing or unparseable, or the file ends early.
    pub fn read<R: BufRead>(reader: &mut R) -> Result<Self> {
        let mut lines: Vec<String> = Vec::new();
        let mut header_lines = None;

        loop {
            let Some(line) = read_line(reader)? else {
                return Err(Error::MalformedHeader(format!(
                    "file ended after {} header line(s)",
                    lines.len()
                )));
            };
            lines.push(line);

            if header_lines.is_none() {
                header_lines = parse_header_count(lines.last().map_or("", String::as_str))?;
                if header_lines.is_none() && lines.len() >= MAX_PREAMBLE_LINES {
                    return Err(Error::MalformedHeader(format!(
                        "no '{HEADER_COUNT_PREFIX}' line in the first {MAX_PREAMBLE_LINES} lines"
                    )));
                }
            }

            if let Some(count) = header_lines {
                if count < lines.len() {
                    return Err(Error::MalformedHeader(format!(
                        "header declares {count} line(s) but the count appears on line {}",
                        lines.len()
                    )));
                }
                if lines.len() == count {
                    break;
                }
            }
        }

        let header_lines = lines.len();
        let columns = split_fields(&lines[header_lines - 1])
            .into_iter()
            .map(str::to_string)
            .collect::<Vec<_>>();
        let steps = parse_step_table(&lines[..header_lines - 1])?;

        Ok(Self {
            title: lines[0].trim().to_string(),
            header_lines,
            steps,
            columns,
        })
    }
}

fn read_line<R: BufRead>(reader: &mut R) -> Result<Option<String>> {
    let mut line = String::new();
    if reader.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    let trimmed = line.trim_end_matches(['\r', '\n']).len();
    line.truncate(trimmed);
    Ok(Some(line))
}

fn parse_header_count(line: &str) -> Result<Option<usize>> {
    let Some(rest) = line.trim().strip_prefix(HEADER_COUNT_PREFIX) else {
        return Ok(None);
    };
    let value = rest.trim_start().trim_start_matches(':').trim();
    let count = value.parse::<usize>().map_err(|_| {
        Error::MalformedHeader(format!("invalid header line count '{value}'"))
    })?;
    if count < 3 {
        return Err(Error::MalformedHeader(format!(
            "header line count {count} leaves no room for a step table"
        )));
    }
    Ok(Some(count))
}

/// Split a tab-separated line, dropping trailing empty fields.
fn split_fields(line: &str) -> Vec<&str> {
    let mut fields: Vec<&str> = line.split('\t').map(str::trim).collect();
    while fields.last().is_some_and(|f| f.is_empty()) {
        fields.pop();
    }
    fields
}

/// Positions of the step-table columns.
struct StepColumns {
    index: usize,
    control: usize,
    direction: Option<usize>,
    setpoint: Option<usize>,
    setpoint_unit: Option<usize>,
    limits: Vec<usize>,
}

impl StepColumns {
    fn locate(names: &[&str]) -> Result<Self> {
        let find = |name: &str| names.iter().position(|n| n.eq_ignore_ascii_case(name));
        let control = find("ctrl_type").ok_or_else(|| {
            Error::MalformedHeader("step table has no 'ctrl_type' column".to_string())
        })?;
        Ok(Self {
            index: 0,
            control,
            direction: find("charge/discharge"),
            setpoint: find("ctrl1_val"),
            setpoint_unit: find("ctrl1_val_unit"),
            limits: names
                .iter()
                .enumerate()
                .filter(|(_, n)| n.to_ascii_lowercase().starts_with("lim"))
                .map(|(i, _)| i)
                .collect(),
        })
    }
}

fn parse_step_table(lines: &[String]) -> Result<StepTable> {
    let start = lines
        .iter()
        .position(|l| split_fields(l).first() == Some(&"Ns"))
        .ok_or_else(|| Error::MalformedHeader("no step table (row starting with 'Ns')".to_string()))?;

    let names = split_fields(&lines[start]);
    let columns = StepColumns::locate(&names)?;

    let mut steps = Vec::new();
    for line in lines[start + 1..].iter().take_while(|l| !l.trim().is_empty()) {
        let fields = split_fields(line);
        let field = |i: usize| fields.get(i).copied().unwrap_or("");
        let optional = |i: Option<usize>| i.map_or("", field);

        let index_text = field(columns.index);
        let index = index_text.parse::<u32>().map_err(|_| {
            Error::MalformedHeader(format!("invalid step index '{index_text}'"))
        })?;
        let control = ControlType::parse_label(field(columns.control))?;
        let direction = Direction::parse_label(optional(columns.direction))?;

        let setpoint_text = optional(columns.setpoint);
        let setpoint = if setpoint_text.is_empty() {
            None
        } else {
            Some(setpoint_text.parse::<f64>().map_err(|_| {
                Error::MalformedHeader(format!(
                    "step {index}: invalid setpoint '{setpoint_text}'"
                ))
            })?)
        };

        steps.push(Step {
            index,
            control,
            direction,
            setpoint,
            setpoint_unit: optional(columns.setpoint_unit).to_string(),
            limits: columns
                .limits
                .iter()
                .map(|&i| field(i))
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect(),
        });
    }

    StepTable::from_steps(steps)
}
