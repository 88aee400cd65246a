pub mod item_io;
pub mod item_meta;

use std::sync::Arc;

use bg_runner::BackgroundRunner;
use tracing::{instrument, warn};

use crate::error::StorageError;

/// Runs `jobs` across the shared background pool, except when there is
/// exactly one job: that one runs inline on the calling thread rather than
/// paying for a spawn, per the "M == 1" optimisation every engine shares.
#[instrument(skip(runner, jobs), fields(job_count = jobs.len()))]
pub(crate) fn dispatch<F, T>(runner: &Arc<BackgroundRunner>, jobs: Vec<F>) -> Vec<Result<T, StorageError>>
where
    F: FnOnce() -> Result<T, StorageError> + Send + 'static,
    T: Send + 'static,
{
    if jobs.len() <= 1 {
        return jobs.into_iter().map(|job| job()).collect();
    }

    let handles: Vec<_> = jobs.into_iter().map(|job| runner.spawn(job)).collect();
    handles
        .into_iter()
        .enumerate()
        .map(|(index, handle)| match handle.wait() {
            Ok(result) => result,
            Err(err) => {
                warn!(worker_index = index, %err, "background worker failed");
                Err(StorageError::Runner(err))
            }
        })
        .collect()
}
