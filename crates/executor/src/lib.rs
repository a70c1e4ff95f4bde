//! lanefuzz-executor: RV32I decoder and scalar reference interpreter.
//!
//! This crate provides:
//! - A total RV32I instruction decoder with per-format immediates
//! - A minimal scalar CPU (no MMU, no privileged modes, no CSRs) used as the
//!   oracle for the vector JIT
//! - A little-endian byte memory with the data-then-program lane layout

pub mod cpu;
pub mod decode;
pub mod error;
pub mod memory;

pub use cpu::{arith_shift_right, Cpu, State, DONE_ADDRESS};
pub use decode::DecodedInstr;
pub use error::ExecutorError;
pub use memory::{Memory, DEFAULT_MEMORY_SIZE};
