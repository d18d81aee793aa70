//! Dataset storage (Arrow/Parquet/CSV)
//!
//! **Flat-Record Design** (Append-Only Write Pattern):
//! - One row per accepted example: `source`, `cycle`, state columns, action
//!   columns, phase presence flags, `capacity_mAh`
//! - Write pattern: one batch per processed export, appended to a [`DatasetStore`]
//! - Every batch in a store shares one schema (same frequencies, same policy)
//!
//! Absent phases are written as zeros; `charge_present` / `discharge_present`
//! tell them apart from a measured zero current.

use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use arrow::array::{ArrayRef, BooleanArray, Float64Array, StringArray, UInt32Array};
use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use arrow::record_batch::RecordBatch;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;

use crate::action::ActionVector;
use crate::config::ReductionPolicy;
use crate::pipeline::Dataset;
use crate::state::StateVector;
use crate::{Error, Result};

/// Column names of the flat example record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureLayout {
    state: Vec<String>,
    action: Vec<String>,
}

impl FeatureLayout {
    /// Layout for a frequency list and reduction policy.
    #[must_use]
    pub fn new(frequencies: &[f64], policy: ReductionPolicy) -> Self {
        Self {
            state: StateVector::feature_names(frequencies),
            action: ActionVector::feature_names(policy),
        }
    }

    /// State column names (`Z_re(..)` then `Z_im(..)`).
    #[must_use]
    pub fn state_columns(&self) -> &[String] {
        &self.state
    }

    /// Action column names (`charge_..` then `discharge_..`).
    #[must_use]
    pub fn action_columns(&self) -> &[String] {
        &self.action
    }

    /// Every column name, in record order.
    #[must_use]
    pub fn column_names(&self) -> Vec<String> {
        let mut names = vec!["source".to_string(), "cycle".to_string()];
        names.extend(self.state.iter().cloned());
        names.extend(self.action.iter().cloned());
        names.extend(
            ["charge_present", "discharge_present", "capacity_mAh"]
                .iter()
                .map(ToString::to_string),
        );
        names
    }

    /// Arrow schema of the flat record.
    #[must_use]
    pub fn schema(&self) -> SchemaRef {
        let mut fields = vec![
            Field::new("source", DataType::Utf8, false),
            Field::new("cycle", DataType::UInt32, false),
        ];
        fields.extend(
            self.state
                .iter()
                .chain(&self.action)
                .map(|name| Field::new(name, DataType::Float64, false)),
        );
        fields.push(Field::new("charge_present", DataType::Boolean, false));
        fields.push(Field::new("discharge_present", DataType::Boolean, false));
        fields.push(Field::new("capacity_mAh", DataType::Float64, false));
        Arc::new(Schema::new(fields))
    }
}

/// Flattened features of one example.
struct FlatRow {
    state: Vec<f64>,
    action: Vec<f64>,
}

impl Dataset {
    /// Column layout shared by every example of the dataset.
    #[must_use]
    pub fn layout(&self) -> FeatureLayout {
        FeatureLayout::new(self.frequencies(), self.policy())
    }

    fn flat_rows(&self, layout: &FeatureLayout) -> Result<Vec<FlatRow>> {
        self.examples()
            .iter()
            .map(|example| {
                let row = FlatRow {
                    state: example.state.to_features(),
                    action: example.action.to_features(),
                };
                if row.state.len() != layout.state.len() || row.action.len() != layout.action.len() {
                    return Err(Error::StorageError(format!(
                        "cycle {} has {} state and {} action features, layout expects {} and {}",
                        example.cycle,
                        row.state.len(),
                        row.action.len(),
                        layout.state.len(),
                        layout.action.len()
                    )));
                }
                Ok(row)
            })
            .collect()
    }

    /// Convert the examples to one Arrow record batch.
    ///
    /// # Errors
    /// Returns error if an example does not fit the dataset layout.
    pub fn to_record_batch(&self) -> Result<RecordBatch> {
        let layout = self.layout();
        let rows = self.flat_rows(&layout)?;
        let examples = self.examples();

        let mut columns: Vec<ArrayRef> = vec![
            Arc::new(StringArray::from_iter_values(
                examples.iter().map(|_| self.source()),
            )),
            Arc::new(UInt32Array::from_iter_values(examples.iter().map(|e| e.cycle))),
        ];
        for j in 0..layout.state.len() {
            columns.push(Arc::new(Float64Array::from_iter_values(
                rows.iter().map(|r| r.state[j]),
            )));
        }
        for j in 0..layout.action.len() {
            columns.push(Arc::new(Float64Array::from_iter_values(
                rows.iter().map(|r| r.action[j]),
            )));
        }
        columns.push(Arc::new(
            examples
                .iter()
                .map(|e| Some(e.action.charge().is_present()))
                .collect::<BooleanArray>(),
        ));
        columns.push(Arc::new(
            examples
                .iter()
                .map(|e| Some(e.action.discharge().is_present()))
                .collect::<BooleanArray>(),
        ));
        columns.push(Arc::new(Float64Array::from_iter_values(
            examples.iter().map(|e| e.capacity_mah),
        )));

        Ok(RecordBatch::try_new(layout.schema(), columns)?)
    }

    /// Write the examples as a Parquet file.
    ///
    /// # Errors
    /// Returns error if the file cannot be created or written.
    pub fn write_parquet<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let batch = self.to_record_batch()?;
        write_batches(path.as_ref(), &batch.schema(), std::slice::from_ref(&batch))
    }

    /// Write the examples as CSV with a header row.
    ///
    /// # Errors
    /// Returns error if the file cannot be created or written.
    pub fn write_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let layout = self.layout();
        let rows = self.flat_rows(&layout)?;
        let mut writer = csv::Writer::from_path(path.as_ref())?;
        writer.write_record(layout.column_names())?;

        for (example, row) in self.examples().iter().zip(&rows) {
            let mut record = vec![self.source().to_string(), example.cycle.to_string()];
            record.extend(row.state.iter().chain(&row.action).map(ToString::to_string));
            record.push(example.action.charge().is_present().to_string());
            record.push(example.action.discharge().is_present().to_string());
            record.push(example.capacity_mah.to_string());
            writer.write_record(&record)?;
        }
        writer.flush()?;
        Ok(())
    }

    /// Write the rejection log as CSV: `source, cycle, reason, detail`.
    ///
    /// # Errors
    /// Returns error if the file cannot be created or written.
    pub fn write_rejections_csv<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut writer = csv::Writer::from_path(path.as_ref())?;
        writer.write_record(["source", "cycle", "reason", "detail"])?;
        for rejection in self.rejections() {
            writer.write_record([
                self.source().to_string(),
                rejection.cycle.to_string(),
                rejection.reason.code().to_string(),
                rejection.reason.to_string(),
            ])?;
        }
        writer.flush()?;
        Ok(())
    }
}

fn write_batches(path: &Path, schema: &SchemaRef, batches: &[RecordBatch]) -> Result<()> {
    let file = File::create(path)
        .map_err(|e| Error::StorageError(format!("Failed to create Parquet file: {e}")))?;
    let mut writer = ArrowWriter::try_new(file, Arc::clone(schema), None)?;
    for batch in batches {
        writer.write(batch)?;
    }
    writer.close()?;
    Ok(())
}

/// Append-only collection of example batches sharing one schema.
#[derive(Debug, Default)]
pub struct DatasetStore {
    batches: Vec<RecordBatch>,
}

impl DatasetStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a store from a Parquet file.
    ///
    /// # Errors
    /// Returns error if file cannot be read or parsed
    pub fn load_parquet<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())
            .map_err(|e| Error::StorageError(format!("Failed to open Parquet file: {e}")))?;

        let reader = ParquetRecordBatchReaderBuilder::try_new(file)
            .map_err(|e| Error::StorageError(format!("Failed to parse Parquet file: {e}")))?
            .build()
            .map_err(|e| Error::StorageError(format!("Failed to create Parquet reader: {e}")))?;

        let batches = reader
            .map(|batch| {
                batch.map_err(|e| Error::StorageError(format!("Failed to read record batch: {e}")))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { batches })
    }

    /// Append one dataset's examples.
    ///
    /// # Errors
    /// Returns error if the dataset's layout differs from the stored batches.
    pub fn append_dataset(&mut self, dataset: &Dataset) -> Result<()> {
        self.append_batch(dataset.to_record_batch()?)
    }

    /// Append a batch.
    ///
    /// # Errors
    /// Returns error if batch schema doesn't match existing batches
    pub fn append_batch(&mut self, batch: RecordBatch) -> Result<()> {
        if let Some(first) = self.batches.first() {
            let existing_schema = first.schema();
            if batch.schema() != existing_schema {
                return Err(Error::StorageError(format!(
                    "Schema mismatch: expected {:?}, got {:?}",
                    existing_schema.fields().iter().map(|f| f.name()).collect::<Vec<_>>(),
                    batch.schema().fields().iter().map(|f| f.name()).collect::<Vec<_>>()
                )));
            }
        }

        self.batches.push(batch);
        Ok(())
    }

    /// Stored batches, in append order.
    #[must_use]
    pub fn batches(&self) -> &[RecordBatch] {
        &self.batches
    }

    /// Total example rows.
    #[must_use]
    pub fn num_rows(&self) -> usize {
        self.batches.iter().map(RecordBatch::num_rows).sum()
    }

    /// Write every stored batch to one Parquet file.
    ///
    /// # Errors
    /// Returns error if the store is empty or the file cannot be written.
    pub fn save_parquet<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let first = self
            .batches
            .first()
            .ok_or_else(|| Error::StorageError("Nothing to save: store is empty".to_string()))?;
        write_batches(path.as_ref(), &first.schema(), &self.batches)
    }
}
