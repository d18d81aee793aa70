//! Synthetic instrument exports for integration tests

#![allow(dead_code)]

use std::fmt::Write as _;

/// Default protocol: sweep, labelled charge, labelled discharge, loop.
pub const STEP_TABLE: &[&str] = &[
    "0\tPEIS\t-\t0\tV\t",
    "1\tCC\tCharge\t100\tmA\tEwe > 4.2 V",
    "2\tCC\tDischarge\t-50\tmA\tEwe < 3.0 V",
    "3\tLoop\t-\t\t\t",
];

/// Same protocol without charge/discharge labels.
pub const UNLABELLED_STEP_TABLE: &[&str] = &[
    "0\tPEIS\t-\t0\tV\t",
    "1\tCC\t-\t100\tmA\t",
    "2\tCC\t-\t-50\tmA\t",
    "3\tLoop\t-\t\t\t",
];

pub const COLUMNS: &str =
    "cycle number\tNs\ttime/s\tEwe/V\tI/mA\t(Q-Qo)/mA.h\tfreq/Hz\tRe(Z)/Ohm\t-Im(Z)/Ohm";

pub const FREQUENCIES: [f64; 3] = [1.0, 100.0, 10_000.0];

/// Builds EC-Lab style text exports row by row.
pub struct ExportBuilder {
    steps: Vec<String>,
    rows: Vec<String>,
    time: f64,
}

impl Default for ExportBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ExportBuilder {
    pub fn new() -> Self {
        Self::with_steps(STEP_TABLE)
    }

    pub fn with_steps(steps: &[&str]) -> Self {
        Self {
            steps: steps.iter().map(ToString::to_string).collect(),
            rows: Vec::new(),
            time: 0.0,
        }
    }

    /// Impedance sweep rows (step 0), in the order given.
    pub fn sweep(mut self, cycle: u32, frequencies: &[f64]) -> Self {
        for f in frequencies {
            let real = 0.05 + 0.01 / f.sqrt();
            let neg_imag = 0.002 * (1.0 + f.log10());
            self.row(cycle, 0, 3.7, 0.0, 0.0, *f, real, neg_imag);
        }
        self
    }

    /// `rows` samples of constant current on `step`, cumulative charge ramping to `charge_end`.
    ///
    /// The last sample crosses the step's voltage limit (4.2 V up, 3.0 V down).
    pub fn phase(mut self, cycle: u32, step: u32, current_ma: f64, rows: usize, charge_end: f64) -> Self {
        for i in 0..rows {
            let q = charge_end * (i + 1) as f64 / rows as f64;
            let last = i + 1 == rows;
            let voltage = match (current_ma > 0.0, last) {
                (true, false) => 4.0,
                (true, true) => 4.25,
                (false, false) => 3.5,
                (false, true) => 2.95,
            };
            self.row(cycle, step, voltage, current_ma, q, 0.0, 0.0, 0.0);
        }
        self
    }

    /// Drop the last `n` body rows, as if the file was cut off.
    pub fn drop_last(mut self, n: usize) -> Self {
        let keep = self.rows.len().saturating_sub(n);
        self.rows.truncate(keep);
        self
    }

    /// Sweep at `frequencies`, +100 mA charge, -50 mA discharge ending at 3.8 mAh.
    pub fn cycle(self, cycle: u32, frequencies: &[f64]) -> Self {
        self.sweep(cycle, frequencies)
            .phase(cycle, 1, 100.0, 3, 3.8)
            .phase(cycle, 2, -50.0, 3, -3.8)
    }

    #[allow(clippy::too_many_arguments)]
    fn row(&mut self, cycle: u32, step: u32, v: f64, i: f64, q: f64, f: f64, re: f64, neg_im: f64) {
        self.time += 10.0;
        self.rows.push(format!(
            "{cycle}\t{step}\t{:.1}\t{v}\t{i}\t{q}\t{f}\t{re}\t{neg_im}",
            self.time
        ));
    }

    /// Append a verbatim body row.
    pub fn raw(mut self, row: &str) -> Self {
        self.rows.push(row.to_string());
        self
    }

    pub fn build(&self) -> String {
        let header_lines = 6 + self.steps.len();
        let mut text = String::new();
        text.push_str("EC-Lab ASCII FILE\n");
        let _ = writeln!(text, "Nb header lines : {header_lines}");
        text.push('\n');
        text.push_str("Ns\tctrl_type\tcharge/discharge\tctrl1_val\tctrl1_val_unit\tlim1\n");
        for step in &self.steps {
            text.push_str(step);
            text.push('\n');
        }
        text.push('\n');
        text.push_str(COLUMNS);
        text.push('\n');
        for row in &self.rows {
            text.push_str(row);
            text.push('\n');
        }
        text
    }
}
