//! Executor errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("program counter {pc:#010x} escaped the program image")]
    ProgramEscape { pc: u32 },

    #[error("memory access out of bounds: address {addr:#x}")]
    OutOfBounds { addr: u32 },

    #[error("execution halted: reached max steps ({max_steps})")]
    MaxStepsReached { max_steps: u64 },
}
