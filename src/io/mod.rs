/*!
# Chain Export

Writers for a [`Chain`](crate::chain::Chain) in tabular form, one row per
walker per iteration. Every format uses the same columns: `iteration`,
`walker`, one column per parameter label, then `log_likelihood` and
`log_prior`.

Each format sits behind its own feature: `csv`, `arrow` and `parquet`.
*/

#[cfg(feature = "arrow")]
pub mod arrow;

#[cfg(feature = "csv")]
pub mod csv;

#[cfg(feature = "parquet")]
pub mod parquet;

#[cfg(any(feature = "csv", feature = "arrow"))]
use crate::chain::Chain;

#[cfg(any(feature = "csv", feature = "arrow"))]
pub(crate) const INDEX_COLUMNS: [&str; 2] = ["iteration", "walker"];

#[cfg(any(feature = "csv", feature = "arrow"))]
pub(crate) const BLOB_COLUMNS: [&str; 2] = ["log_likelihood", "log_prior"];

/// Fails unless there is exactly one label per chain dimension.
#[cfg(any(feature = "csv", feature = "arrow"))]
pub(crate) fn check_labels(chain: &Chain, labels: &[&str]) -> Result<(), String> {
    if labels.len() != chain.ndim() {
        return Err(format!(
            "got {} parameter labels for a chain of dimension {}",
            labels.len(),
            chain.ndim()
        ));
    }
    Ok(())
}
