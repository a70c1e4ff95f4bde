//! Driver errors.

use lanefuzz_executor::ExecutorError;
use lanefuzz_jit::JitError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FuzzerError {
    #[error("unsupported lane count {lanes}: only 16 (512-bit vectors of 32-bit words) is recognised")]
    UnsupportedLaneCount { lanes: usize },

    #[error("empty program")]
    EmptyProgram,

    #[error(transparent)]
    Executor(#[from] ExecutorError),

    #[error(transparent)]
    Jit(#[from] JitError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
