use std::{fs::File, sync::Arc};

use arrow::{
    array::{Array, ArrayRef, Float32Array, Float64Array},
    datatypes::{DataType, Field, Schema},
    record_batch::RecordBatch,
};
use indexmap::IndexMap;
use parquet::arrow::{arrow_reader::ParquetRecordBatchReaderBuilder, ArrowWriter};

use super::DataSet;
use crate::{canonicalize_path, expand_output_path, ArborError, ArborResult};

/// The name of the column holding event weights in Parquet files.
pub const WEIGHT_COLUMN: &str = "weight";

/// Load a [`DataSet`] from a Parquet file.
///
/// Every floating-point column becomes a [`DataSet`] column, except for a column named
/// [`WEIGHT_COLUMN`] which is used for the weights. Files without one get unit weights.
pub fn read_parquet(file_path: &str) -> ArborResult<DataSet> {
    let path = canonicalize_path(file_path)?;
    let file = File::open(path)?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
    let names: Vec<String> = builder
        .schema()
        .fields()
        .iter()
        .filter(|field| matches!(field.data_type(), DataType::Float32 | DataType::Float64))
        .map(|field| field.name().clone())
        .collect();
    let total_rows = builder.metadata().file_metadata().num_rows() as usize;
    let mut columns: IndexMap<String, Vec<f64>> = names
        .iter()
        .map(|name| (name.clone(), Vec::with_capacity(total_rows)))
        .collect();
    let reader = builder.build()?;
    for batch in reader {
        let batch = batch?;
        for (name, values) in columns.iter_mut() {
            append_float_column(&batch, name, values)?;
        }
    }
    let weights = columns
        .shift_remove(WEIGHT_COLUMN)
        .unwrap_or_else(|| vec![1.0; total_rows]);
    log::debug!(
        "read {} events with {} columns from {}",
        weights.len(),
        columns.len(),
        file_path
    );
    DataSet::new(columns, weights)
}

fn append_float_column(batch: &RecordBatch, name: &str, values: &mut Vec<f64>) -> ArborResult<()> {
    let column = batch
        .column_by_name(name)
        .ok_or_else(|| ArborError::corrupt(format!("record batch is missing column \"{}\"", name)))?;
    if let Some(array) = column.as_any().downcast_ref::<Float64Array>() {
        values.extend(array.values().iter().copied());
    } else if let Some(array) = column.as_any().downcast_ref::<Float32Array>() {
        values.extend(array.values().iter().map(|v| *v as f64));
    } else {
        return Err(ArborError::corrupt(format!(
            "column \"{}\" is not a floating-point column",
            name
        )));
    }
    Ok(())
}

impl DataSet {
    /// Write the dataset to a Parquet file, one `Float64` column per [`DataSet`] column followed
    /// by a [`WEIGHT_COLUMN`].
    pub fn write_parquet(&self, file_path: &str) -> ArborResult<()> {
        let path = expand_output_path(file_path)?;
        let (names, columns) = self.to_table();
        let fields: Vec<Field> = names
            .iter()
            .map(|name| Field::new(name, DataType::Float64, false))
            .collect();
        let schema = Arc::new(Schema::new(fields));
        let arrays: Vec<ArrayRef> = columns
            .into_iter()
            .map(|column| Arc::new(Float64Array::from(column)) as ArrayRef)
            .collect();
        let batch = RecordBatch::try_new(schema.clone(), arrays)?;
        let file = File::create(&path)?;
        let mut writer = ArrowWriter::try_new(file, schema, None)?;
        writer.write(&batch)?;
        writer.close()?;
        log::debug!("wrote {} events to {}", self.len(), path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parquet_round_trip() {
        let dataset = DataSet::from_columns([("mSq", vec![1.0, 2.0, 3.0]), ("theta", vec![0.1, 0.2, 0.3])])
            .unwrap()
            .with_weights(vec![1.0, 0.5, 2.0])
            .unwrap();
        let path = std::env::temp_dir().join(format!("arbor_io_{}.parquet", std::process::id()));
        let path = path.to_string_lossy().to_string();
        dataset.write_parquet(&path).unwrap();
        let loaded = read_parquet(&path).unwrap();
        std::fs::remove_file(&path).unwrap();
        assert_eq!(loaded, dataset);
        assert_ne!(loaded.id(), dataset.id());
        assert_eq!(loaded.names(), vec!["mSq", "theta"]);
    }
}
