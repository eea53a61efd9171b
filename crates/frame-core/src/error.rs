use std::time::Duration;

/// Error kinds named in the error-handling design. `PoolExhausted` is
/// deliberately absent here: §7 treats pool exhaustion as a backpressure
/// signal, not a fault, so it is represented by [`frame_pool::PoolOutcome`]
/// instead of a variant of this enum.
#[derive(Debug, thiserror::Error)]
pub enum FanoutError {
    #[error("driver connection failed: {0}")]
    DriverConnection(String),

    #[error("frame acquisition failed: {0}")]
    DriverFrameAcquisition(String),

    #[error("pipeline construction failed: {0}")]
    PipelineConstruction(String),

    #[error("pipeline processing failed: {0}")]
    PipelineProcessing(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("stop timed out after {0:?}")]
    StopTimeout(Duration),
}

pub type FanoutResult<T> = Result<T, FanoutError>;
