/*!
# CSV Export

Enable via the `csv` feature.
*/

use std::error::Error;
use std::fs::File;
use std::path::Path;

use csv::Writer;
use ndarray::Axis;

use super::{check_labels, BLOB_COLUMNS, INDEX_COLUMNS};
use crate::chain::Chain;

/**
Saves a chain as a CSV file.

The header row holds `iteration`, `walker`, the parameter `labels` and the two
blob columns. Each following row is one walker at one iteration.

# Examples

```rust
use mcmc_harness::chain::Chain;
use mcmc_harness::core::Step;
use mcmc_harness::io::csv::save_csv;
use ndarray::array;

let step = Step {
    positions: array![[1.0, 2.0], [3.0, 4.0]],
    log_likelihood: array![-1.0, -2.0],
    log_prior: array![0.0, 0.0],
    accepted: 2,
};
let chain = Chain::from_steps(2, 2, &[step]).unwrap();
let file = tempfile::NamedTempFile::new().unwrap();
save_csv(&chain, &["m", "c"], file.path())?;
# Ok::<(), Box<dyn std::error::Error>>(())
```
*/
pub fn save_csv(chain: &Chain, labels: &[&str], path: impl AsRef<Path>) -> Result<(), Box<dyn Error>> {
    check_labels(chain, labels)?;
    let mut wtr = Writer::from_writer(File::create(path)?);

    let header = INDEX_COLUMNS
        .iter()
        .chain(labels)
        .chain(BLOB_COLUMNS.iter());
    wtr.write_record(header)?;

    let positions = chain.positions();
    let blobs = chain.blobs();
    for (iteration, (walkers, walker_blobs)) in positions
        .axis_iter(Axis(0))
        .zip(blobs.axis_iter(Axis(0)))
        .enumerate()
    {
        for (walker, (sample, blob)) in walkers
            .axis_iter(Axis(0))
            .zip(walker_blobs.axis_iter(Axis(0)))
            .enumerate()
        {
            let mut row = vec![iteration.to_string(), walker.to_string()];
            row.extend(sample.iter().map(|v| v.to_string()));
            row.extend(blob.iter().map(|v| v.to_string()));
            wtr.write_record(&row)?;
        }
    }

    wtr.flush()?;
    Ok(())
}
