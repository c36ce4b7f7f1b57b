//! Engine option validation

use crate::error::{TransferError, TransferResult};
use rangeflow_types::EngineOptions;

/// Reject option combinations the engine cannot run with
pub fn validate_options(options: &EngineOptions) -> TransferResult<()> {
    if options.chunk_size == 0 {
        return Err(TransferError::InvalidOptions("chunk_size must be positive".into()));
    }
    if options.parallel_streams == 0 {
        return Err(TransferError::InvalidOptions(
            "parallel_streams must be positive".into(),
        ));
    }
    if options.retry.attempts == 0 {
        return Err(TransferError::InvalidOptions(
            "retry.attempts must be at least 1".into(),
        ));
    }
    if !(options.retry.factor >= 1.0) {
        return Err(TransferError::InvalidOptions(
            "retry.factor must be at least 1".into(),
        ));
    }
    if options.retry.min_delay_ms > options.retry.max_delay_ms {
        return Err(TransferError::InvalidOptions(
            "retry.min_delay_ms exceeds retry.max_delay_ms".into(),
        ));
    }
    Ok(())
}
