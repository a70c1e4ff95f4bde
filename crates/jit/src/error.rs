//! JIT errors.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum JitError {
    #[error("emitted code would exceed the buffer limit ({limit} bytes)")]
    BufferExhausted { limit: usize },

    #[error("label {label} was never bound before finalize")]
    UnboundLabel { label: usize },

    #[error("label {label} bound twice")]
    LabelRebound { label: usize },

    #[error("program has {count} instructions, more than the supported {max}")]
    TooManyInstructions { count: usize, max: usize },

    #[error("basic-block support and PC folding are mutually exclusive")]
    ConflictingModes,

    #[error("lane images of {lane_size} bytes push base offsets past the 32-bit index range")]
    LaneOffsetOverflow { lane_size: usize },
}
