use thiserror::Error;

/// Reasons a thumbnail job can fail.
///
/// None of these ever leave the pool as an error value: each one ends in a
/// `success = false` outcome for the caller and a log line.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ThumbError {
    #[error("helper did not answer within {0} seconds")]
    Timeout(u64),

    #[error("unexpected helper response: {0:?}")]
    Protocol(String),

    #[error("helper process exited (code: {0:?})")]
    ProcessDied(Option<i32>),

    #[error("failed to start helper process: {0}")]
    SpawnFailed(String),

    #[error("thumbnail is below the minimum size")]
    BelowMinimumSize,

    #[error("generation failed: {0}")]
    Generation(String),
}
