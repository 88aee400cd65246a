use thiserror::Error;

/// Failure modes of waiting on a background operation.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// The worker panicked instead of returning normally.
    #[error("background worker panicked: {0}")]
    Panicked(String),

    /// The worker's result channel was dropped without a value, which only
    /// happens if the runner itself was torn down mid-flight.
    #[error("background worker disconnected before producing a result")]
    Disconnected,
}
