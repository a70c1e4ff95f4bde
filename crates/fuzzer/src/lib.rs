//! lanefuzz-fuzzer: the driver tying the engines together.
//!
//! Seeds each lane's memory with a fill strategy, runs the scalar
//! interpreter or the vector JIT to completion, and produces the output
//! dumps.

pub mod driver;
pub mod error;
pub mod strategy;

pub use driver::{
    hex_dump, run_backend, run_jit, run_scalar, write_jit_dump, BackendKind, BackendRun,
    FuzzerConfig, LaneOutcome, ScalarRun, JIT_DUMP_PATH,
};
pub use error::FuzzerError;
pub use strategy::FillStrategy;
