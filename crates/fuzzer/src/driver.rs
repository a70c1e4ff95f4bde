//! The driver: seed the lanes, run a backend to completion, dump output.
//!
//! Completion means every active lane's `pc` equals the sentinel return
//! address. The scalar backend runs each lane's state to the sentinel and
//! dumps lane 0's memory; the JIT backend lowers the whole program and
//! dumps the emitted host code as one hex line.

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use lanefuzz_executor::{Cpu, Memory, State, DONE_ADDRESS};
use lanefuzz_jit::{Avx512Jit, CompiledProgram, JitOptions, LaneMask, LaneMemory, LANE_COUNT};
use tracing::info;

use crate::error::FuzzerError;
use crate::strategy::FillStrategy;

/// Fixed output path for the JIT code dump.
pub const JIT_DUMP_PATH: &str = "jitoutput.dmp";

/// Run configuration. `lane_count` is validated against the vector width;
/// only 16 (512-bit vectors of 32-bit words) is recognised.
#[derive(Clone, Copy, Debug)]
pub struct FuzzerConfig {
    pub lane_count: usize,
    /// Bytes per lane data region.
    pub memory_size: usize,
    pub max_steps: u64,
    pub fill: FillStrategy,
    pub jit: JitOptions,
}

impl Default for FuzzerConfig {
    fn default() -> Self {
        Self {
            lane_count: LANE_COUNT,
            memory_size: lanefuzz_executor::DEFAULT_MEMORY_SIZE,
            max_steps: 1_000_000,
            fill: FillStrategy::Max,
            jit: JitOptions::default(),
        }
    }
}

impl FuzzerConfig {
    fn validate(&self) -> Result<(), FuzzerError> {
        if self.lane_count != LANE_COUNT {
            return Err(FuzzerError::UnsupportedLaneCount { lanes: self.lane_count });
        }
        Ok(())
    }
}

/// Which execution engine drives the run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BackendKind {
    Scalar,
    Jit,
}

/// Final state of one lane after a scalar run.
#[derive(Debug)]
pub struct LaneOutcome {
    pub state: State,
    pub memory: Memory,
    pub steps: u64,
    pub branches_seen: u64,
    pub branches_taken: u64,
}

/// Result of running every lane through the scalar interpreter.
#[derive(Debug)]
pub struct ScalarRun {
    pub lanes: Vec<LaneOutcome>,
}

impl ScalarRun {
    /// Lanes that reached the sentinel (all of them, for a finished run).
    pub fn completed(&self) -> LaneMask {
        let mut mask = LaneMask::default();
        for (lane, outcome) in self.lanes.iter().enumerate() {
            if outcome.state.pc == DONE_ADDRESS {
                mask.set(lane);
            }
        }
        mask
    }

    /// Branch instructions on the longest lane (the scalar counterpart of
    /// the JIT's per-program `jumps_seen`).
    pub fn jumps_seen(&self) -> u64 {
        self.lanes.iter().map(|l| l.branches_seen).max().unwrap_or(0)
    }

    /// Taken branches summed over lanes (the popcount view).
    pub fn jumps_taken(&self) -> u64 {
        self.lanes.iter().map(|l| l.branches_taken).sum()
    }
}

/// Outcome of either backend.
pub enum BackendRun {
    Scalar(ScalarRun),
    Jit(CompiledProgram),
}

/// Dispatch on the chosen backend. The two engines share nothing beyond
/// this entry point.
pub fn run_backend(
    kind: BackendKind,
    config: &FuzzerConfig,
    program: &[u8],
) -> Result<BackendRun, FuzzerError> {
    match kind {
        BackendKind::Scalar => run_scalar(config, program).map(BackendRun::Scalar),
        BackendKind::Jit => run_jit(config, program).map(BackendRun::Jit),
    }
}

/// Run every lane through the scalar interpreter, each against its own
/// seeded image.
pub fn run_scalar(config: &FuzzerConfig, program: &[u8]) -> Result<ScalarRun, FuzzerError> {
    config.validate()?;
    if program.is_empty() {
        return Err(FuzzerError::EmptyProgram);
    }

    let mut lanes = Vec::with_capacity(config.lane_count);
    for lane in 0..config.lane_count {
        let mut memory = Memory::with_image(config.memory_size, program);
        config.fill.apply(lane, memory.data_mut());

        let mut cpu = Cpu::new(memory, State::seeded(config.memory_size as u32));
        cpu.run(config.max_steps)?;
        info!(
            lane,
            steps = cpu.steps,
            branches = cpu.branches_seen,
            taken = cpu.branches_taken,
            "lane reached the sentinel"
        );
        lanes.push(LaneOutcome {
            state: cpu.state,
            memory: cpu.memory,
            steps: cpu.steps,
            branches_seen: cpu.branches_seen,
            branches_taken: cpu.branches_taken,
        });
    }
    Ok(ScalarRun { lanes })
}

/// Seed the lane images and lower the whole program to host code.
pub fn run_jit(config: &FuzzerConfig, program: &[u8]) -> Result<CompiledProgram, FuzzerError> {
    config.validate()?;
    if program.is_empty() {
        return Err(FuzzerError::EmptyProgram);
    }

    let mut lanes = LaneMemory::new(config.memory_size, program);
    for lane in 0..LANE_COUNT {
        config.fill.apply(lane, lanes.lane_data_mut(lane));
    }

    let jit = Avx512Jit::new(lanes, config.jit)?;
    let compiled = jit.compile(program)?;
    info!(
        instructions = compiled.instructions,
        bytes = compiled.code.len(),
        jumps_seen = compiled.jumps_seen(),
        "lowering finished"
    );
    Ok(compiled)
}

/// Hex dump, 16 bytes per line.
pub fn hex_dump<W: Write>(out: &mut W, bytes: &[u8]) -> io::Result<()> {
    const BYTES_PER_LINE: usize = 16;
    for line in bytes.chunks(BYTES_PER_LINE) {
        for (i, byte) in line.iter().enumerate() {
            if i > 0 {
                write!(out, " ")?;
            }
            write!(out, "{byte:02x}")?;
        }
        writeln!(out)?;
    }
    Ok(())
}

/// Write the emitted host code as one long hex-ASCII line, newline
/// terminated, truncating any previous dump.
pub fn write_jit_dump(code: &[u8], path: &Path) -> io::Result<()> {
    let mut out = File::create(path)?;
    let mut text = String::with_capacity(code.len() * 2 + 1);
    for byte in code {
        text.push_str(&format!("{byte:02x}"));
    }
    text.push('\n');
    out.write_all(text.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lanefuzz_executor::cpu::{
        assemble_addi, assemble_beq, assemble_jal, assemble_jalr, assemble_lw,
    };

    fn program_bytes(words: &[u32]) -> Vec<u8> {
        words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    #[test]
    fn test_scalar_run_all_lanes_complete() {
        let program = program_bytes(&[assemble_addi(10, 0, 42), assemble_jalr(0, 1, 0)]);
        let config = FuzzerConfig { fill: FillStrategy::Min, ..Default::default() };
        let run = run_scalar(&config, &program).unwrap();
        assert!(run.completed() == LaneMask::ALL);
        for outcome in &run.lanes {
            assert_eq!(outcome.state.x[10], 42);
            assert_eq!(outcome.steps, 2);
        }
    }

    #[test]
    fn test_divergent_branch_across_lanes() {
        // lw x5, 0(x0) differs per lane under LaneIndex fill; lane 0 loads
        // zero and takes the branch.
        let program = program_bytes(&[
            assemble_lw(5, 0, 0),
            assemble_beq(5, 0, 12),   // taken -> 16
            assemble_addi(6, 0, 10),  // not-taken path
            assemble_jal(0, 8),       // -> 20
            assemble_addi(6, 0, 20),  // taken path
            assemble_jalr(0, 1, 0),
        ]);
        let config = FuzzerConfig { fill: FillStrategy::LaneIndex, ..Default::default() };
        let run = run_scalar(&config, &program).unwrap();

        assert!(run.completed() == LaneMask::ALL);
        assert_eq!(run.lanes[0].state.x[6], 20, "lane 0 loads 0 and takes the branch");
        for lane in 1..LANE_COUNT {
            assert_eq!(run.lanes[lane].state.x[6], 10, "lane {lane} falls through");
        }
        assert_eq!(run.jumps_seen(), 1);
        assert_eq!(run.jumps_taken(), 1);
    }

    #[test]
    fn test_fill_strategy_changes_loaded_values() {
        let program = program_bytes(&[assemble_lw(5, 0, 0), assemble_jalr(0, 1, 0)]);
        let config = FuzzerConfig { fill: FillStrategy::Max, ..Default::default() };
        let run = run_scalar(&config, &program).unwrap();
        assert_eq!(run.lanes[0].state.x[5], 0xFFFF_FFFF);
    }

    #[test]
    fn test_lane_count_validation() {
        let config = FuzzerConfig { lane_count: 8, ..Default::default() };
        let err = run_scalar(&config, &[0x13, 0, 0, 0]).unwrap_err();
        assert!(matches!(err, FuzzerError::UnsupportedLaneCount { lanes: 8 }));
    }

    #[test]
    fn test_empty_program_rejected() {
        let config = FuzzerConfig::default();
        assert!(matches!(
            run_scalar(&config, &[]),
            Err(FuzzerError::EmptyProgram)
        ));
        assert!(matches!(run_jit(&config, &[]), Err(FuzzerError::EmptyProgram)));
    }

    #[test]
    fn test_jit_backend_produces_code() {
        let program = program_bytes(&[assemble_addi(10, 0, 42), assemble_jalr(0, 1, 0)]);
        let config = FuzzerConfig::default();
        let compiled = run_jit(&config, &program).unwrap();
        assert_eq!(compiled.instructions, 2);
        assert!(!compiled.code.is_empty());
    }

    #[test]
    fn test_hex_dump_format() {
        let mut out = Vec::new();
        hex_dump(&mut out, &[0xDE, 0xAD, 0xBE, 0xEF]).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "de ad be ef\n");
    }

    #[test]
    fn test_jit_dump_is_one_hex_line() {
        let dir = std::env::temp_dir().join("lanefuzz-dump-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(JIT_DUMP_PATH);
        write_jit_dump(&[0xC3, 0x90], &path).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text, "c390\n");
    }
}
