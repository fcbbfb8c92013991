/*!
# Parquet Export

Enable via the `parquet` feature.
*/

use std::error::Error;
use std::fs::File;
use std::path::Path;

use parquet::{arrow::ArrowWriter, file::properties::WriterProperties};

use super::arrow::chain_batch;
use crate::chain::Chain;

/// Saves a chain as a Parquet file with the same columns as the Arrow export.
pub fn save_parquet(chain: &Chain, labels: &[&str], path: impl AsRef<Path>) -> Result<(), Box<dyn Error>> {
    let (schema, batch) = chain_batch(chain, labels)?;
    let file = File::create(path)?;
    let props = WriterProperties::builder().build();
    let mut writer = ArrowWriter::try_new(file, schema, Some(props))?;
    writer.write(&batch)?;
    writer.close()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Step;
    use arrow::array::{Float64Array, UInt32Array};
    use ndarray::array;
    use parquet::arrow::arrow_reader::ParquetRecordBatchReader;
    use tempfile::NamedTempFile;

    #[test]
    fn test_save_parquet_round_trip() -> Result<(), Box<dyn Error>> {
        let steps = [
            Step {
                positions: array![[1.0, 2.0], [3.0, 4.0]],
                log_likelihood: array![-1.0, -2.0],
                log_prior: array![-0.5, -0.5],
                accepted: 2,
            },
            Step {
                positions: array![[5.0, 6.0], [7.0, 8.0]],
                log_likelihood: array![-3.0, -4.0],
                log_prior: array![-0.5, -0.5],
                accepted: 0,
            },
        ];
        let chain = Chain::from_steps(2, 2, &steps)?;
        let file = NamedTempFile::new()?;
        save_parquet(&chain, &["m", "c"], file.path())?;

        let mut reader = ParquetRecordBatchReader::try_new(File::open(file.path())?, 1024)?;
        let batch = reader.next().expect("expected a record batch")?;
        assert!(reader.next().is_none());
        assert_eq!(batch.num_rows(), 4);
        assert_eq!(batch.num_columns(), 6);

        let iteration = batch
            .column(0)
            .as_any()
            .downcast_ref::<UInt32Array>()
            .unwrap();
        let c = batch
            .column(3)
            .as_any()
            .downcast_ref::<Float64Array>()
            .unwrap();
        let log_likelihood = batch
            .column(4)
            .as_any()
            .downcast_ref::<Float64Array>()
            .unwrap();
        assert_eq!(iteration.values().to_vec(), vec![0, 0, 1, 1]);
        assert_eq!(c.values().to_vec(), vec![2.0, 4.0, 6.0, 8.0]);
        assert_eq!(log_likelihood.value(3), -4.0);
        Ok(())
    }
}
