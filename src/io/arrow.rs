/*!
# Arrow Export

Enable via the `arrow` feature.
*/

use std::error::Error;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;

use arrow::{
    array::{ArrayRef, Float64Builder, UInt32Builder},
    datatypes::{DataType, Field, Schema},
    ipc::writer::FileWriter,
    record_batch::RecordBatch,
};
use ndarray::Axis;

use super::{check_labels, BLOB_COLUMNS, INDEX_COLUMNS};
use crate::chain::Chain;

/// Builds the schema and a single record batch holding the whole chain.
pub(crate) fn chain_batch(
    chain: &Chain,
    labels: &[&str],
) -> Result<(Arc<Schema>, RecordBatch), Box<dyn Error>> {
    check_labels(chain, labels)?;

    let mut fields: Vec<Field> = INDEX_COLUMNS
        .iter()
        .map(|name| Field::new(*name, DataType::UInt32, false))
        .collect();
    fields.extend(
        labels
            .iter()
            .chain(BLOB_COLUMNS.iter())
            .map(|name| Field::new(*name, DataType::Float64, false)),
    );
    let schema = Arc::new(Schema::new(fields));

    let mut iteration_builder = UInt32Builder::new();
    let mut walker_builder = UInt32Builder::new();
    let mut value_builders: Vec<Float64Builder> = (0..labels.len() + BLOB_COLUMNS.len())
        .map(|_| Float64Builder::new())
        .collect();

    let blobs = chain.blobs();
    for (iteration, walkers) in chain.positions().axis_iter(Axis(0)).enumerate() {
        for (walker, sample) in walkers.axis_iter(Axis(0)).enumerate() {
            iteration_builder.append_value(iteration as u32);
            walker_builder.append_value(walker as u32);
            let blob = blobs.slice(ndarray::s![iteration, walker, ..]);
            for (builder, value) in value_builders.iter_mut().zip(sample.iter().chain(blob.iter())) {
                builder.append_value(*value);
            }
        }
    }

    let mut arrays: Vec<ArrayRef> = vec![
        Arc::new(iteration_builder.finish()),
        Arc::new(walker_builder.finish()),
    ];
    arrays.extend(
        value_builders
            .iter_mut()
            .map(|builder| Arc::new(builder.finish()) as ArrayRef),
    );
    let batch = RecordBatch::try_new(schema.clone(), arrays)?;
    Ok((schema, batch))
}

/// Saves a chain as an Apache Arrow (IPC) file.
pub fn save_arrow(chain: &Chain, labels: &[&str], path: impl AsRef<Path>) -> Result<(), Box<dyn Error>> {
    let (schema, batch) = chain_batch(chain, labels)?;
    let file = File::create(path)?;
    let mut writer = FileWriter::try_new(file, &schema)?;
    writer.write(&batch)?;
    writer.finish()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Step;
    use arrow::array::{Float64Array, UInt32Array};
    use arrow::ipc::reader::FileReader;
    use ndarray::array;
    use tempfile::NamedTempFile;

    fn chain(n: usize) -> Chain {
        let steps: Vec<Step> = (0..n)
            .map(|i| {
                let x = i as f64;
                Step {
                    positions: array![[x], [x + 0.5], [x + 0.25]],
                    log_likelihood: array![-x, -x, -x],
                    log_prior: array![0.0, 0.0, 0.0],
                    accepted: 3,
                }
            })
            .collect();
        Chain::from_steps(3, 1, &steps).unwrap()
    }

    #[test]
    fn test_save_arrow_empty_chain() -> Result<(), Box<dyn Error>> {
        let file = NamedTempFile::new()?;
        save_arrow(&chain(0), &["theta"], file.path())?;
        let reader = FileReader::try_new(File::open(file.path())?, None)?;
        assert_eq!(reader.schema().fields().len(), 5);
        let rows: usize = reader
            .map(|batch| batch.map(|b| b.num_rows()))
            .sum::<Result<usize, _>>()?;
        assert_eq!(rows, 0);
        Ok(())
    }

    #[test]
    fn test_save_arrow_columns() -> Result<(), Box<dyn Error>> {
        let file = NamedTempFile::new()?;
        save_arrow(&chain(2), &["theta"], file.path())?;
        let mut reader = FileReader::try_new(File::open(file.path())?, None)?;
        let batch = reader.next().expect("expected a record batch")?;
        assert_eq!(batch.num_rows(), 6);
        assert_eq!(batch.schema().field(2).name(), "theta");
        assert_eq!(batch.schema().field(3).name(), "log_likelihood");

        let iteration = batch
            .column(0)
            .as_any()
            .downcast_ref::<UInt32Array>()
            .unwrap();
        let walker = batch
            .column(1)
            .as_any()
            .downcast_ref::<UInt32Array>()
            .unwrap();
        let theta = batch
            .column(2)
            .as_any()
            .downcast_ref::<Float64Array>()
            .unwrap();
        let log_likelihood = batch
            .column(3)
            .as_any()
            .downcast_ref::<Float64Array>()
            .unwrap();

        assert_eq!(iteration.value(4), 1);
        assert_eq!(walker.value(4), 1);
        assert_eq!(theta.value(4), 1.5);
        assert_eq!(log_likelihood.value(4), -1.0);
        Ok(())
    }

    #[test]
    fn test_save_arrow_label_count() {
        let file = NamedTempFile::new().unwrap();
        assert!(save_arrow(&chain(1), &["a", "b"], file.path()).is_err());
    }
}
