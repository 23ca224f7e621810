//! Stage outcome types for VIRTA processors

use thiserror::Error;

/// Outcome a pipeline stage can produce besides plain success.
///
/// These are classifications, not exceptions: the dispatcher treats each
/// variant differently and none of them crash the process.
///
/// - [`SkipEmptyRecord`](StageError::SkipEmptyRecord): the stage found (or
///   left) the record empty; remaining stages are skipped, nothing is
///   exported, and the record counts as skipped rather than dropped.
/// - [`EndOfPipeline`](StageError::EndOfPipeline): an intentional, non-error
///   stop instruction; remaining stages are skipped, nothing is exported,
///   nothing is counted as an error.
/// - [`Failed`](StageError::Failed): a genuine stage failure; the task is
///   discarded and counted as a drop against the failing stage.
///
/// # Example
///
/// ```
/// use virta_core::StageError;
///
/// fn sample_out() -> Result<(), StageError> {
///     Err(StageError::SkipEmptyRecord)
/// }
///
/// match sample_out() {
///     Err(StageError::SkipEmptyRecord) => { /* skip, not an error */ }
///     Err(e) => println!("stage failed: {e}"),
///     Ok(()) => {}
/// }
/// ```
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StageError {
    /// The record is empty; skip the remaining stages without exporting.
    #[error("skip empty record")]
    SkipEmptyRecord,

    /// Intentional early stop; not an error.
    #[error("end of pipeline")]
    EndOfPipeline,

    /// The stage failed; the task is discarded.
    #[error("{0}")]
    Failed(String),
}

impl StageError {
    /// Shorthand for a generic stage failure.
    pub fn failed(msg: impl Into<String>) -> Self {
        StageError::Failed(msg.into())
    }
}
