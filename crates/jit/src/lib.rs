//! lanefuzz-jit: AVX-512 vector lowering for lane-parallel RV32I execution.
//!
//! This crate provides:
//! - A small host assembler (labels, buffer limits, EVEX/VEX encodings)
//! - Per-lane guest memory with the base-offset table gathers index by
//! - The vector lowering that advances all 16 lanes per guest instruction
//! - The divergence model for JAL/JALR/branches and basic-block gating
//!
//! The JIT is an emit-and-dump backend: it produces the host code the
//! driver writes out, and never executes it.

pub mod asm;
pub mod divergence;
pub mod error;
pub mod lanes;
pub mod lowering;

pub use asm::{Assembler, EmitterConfig, Gpr, KReg, Label, VReg};
pub use divergence::{branch_compare, BlockLabels, BranchCmp, LaneMask};
pub use error::JitError;
pub use lanes::{LaneMemory, VectorState, LANE_COUNT};
pub use lowering::{Avx512Jit, CompiledProgram, JitOptions, MAX_PROGRAM_INSTRUCTIONS};
