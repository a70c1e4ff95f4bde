//! lanefuzz CLI: run an RV32I program across 16 lanes.
//!
//! The single positional argument is a flat binary of little-endian 32-bit
//! RV32I instructions. The scalar backend executes every lane and hex-dumps
//! lane 0's memory to stdout; the JIT backend lowers the program to AVX-512
//! host code and dumps it to `jitoutput.dmp`. Exits 1 on argument or I/O
//! errors.

use anyhow::Context;
use clap::{Parser, ValueEnum};
use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use lanefuzz_fuzzer::{
    hex_dump, run_backend, write_jit_dump, BackendKind, BackendRun, FillStrategy, FuzzerConfig,
    JIT_DUMP_PATH,
};
use lanefuzz_jit::{JitOptions, LANE_COUNT};

#[derive(Clone, Copy, Debug, ValueEnum)]
enum BackendArg {
    Scalar,
    Jit,
}

impl From<BackendArg> for BackendKind {
    fn from(arg: BackendArg) -> Self {
        match arg {
            BackendArg::Scalar => BackendKind::Scalar,
            BackendArg::Jit => BackendKind::Jit,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum FillArg {
    Min,
    Max,
    LaneIndex,
}

impl From<FillArg> for FillStrategy {
    fn from(arg: FillArg) -> Self {
        match arg {
            FillArg::Min => FillStrategy::Min,
            FillArg::Max => FillStrategy::Max,
            FillArg::LaneIndex => FillStrategy::LaneIndex,
        }
    }
}

/// Lane-parallel RV32I fuzzing emulator
#[derive(Parser)]
#[command(name = "lanefuzz")]
#[command(version)]
#[command(about = "Execute an RV32I program across 16 lanes", long_about = None)]
struct Cli {
    /// Path to the program binary (little-endian 32-bit RV32I words)
    program: PathBuf,

    /// Execution engine
    #[arg(long, value_enum, default_value = "scalar")]
    backend: BackendArg,

    /// Lanes per vector (16 for 512-bit vectors of 32-bit words)
    #[arg(long, default_value_t = LANE_COUNT)]
    lanes: usize,

    /// Bytes per lane data region
    #[arg(long, default_value_t = lanefuzz_executor::DEFAULT_MEMORY_SIZE)]
    memory_size: usize,

    /// Maximum instructions per lane
    #[arg(long, default_value_t = 1_000_000)]
    max_steps: u64,

    /// Lane seeding strategy
    #[arg(long, value_enum, default_value = "max")]
    fill: FillArg,

    /// Emit basic-block labels and divergence instrumentation
    #[arg(long)]
    basic_blocks: bool,

    /// Fold PC into compile-time constants (straight-line mode only)
    #[arg(long)]
    fold_pc: bool,

    /// Output path for the JIT code dump
    #[arg(long, default_value = JIT_DUMP_PATH)]
    jit_output: PathBuf,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();
            return ExitCode::from(1);
        }
    };

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::from(1)
        }
    }
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let program = std::fs::read(&cli.program)
        .with_context(|| format!("couldn't open program file \"{}\"", cli.program.display()))?;

    let config = FuzzerConfig {
        lane_count: cli.lanes,
        memory_size: cli.memory_size,
        max_steps: cli.max_steps,
        fill: cli.fill.into(),
        jit: JitOptions {
            basic_blocks: cli.basic_blocks,
            fold_pc: cli.fold_pc,
        },
    };

    match run_backend(cli.backend.into(), &config, &program)? {
        BackendRun::Scalar(run) => {
            let stdout = std::io::stdout();
            let mut out = stdout.lock();
            hex_dump(&mut out, run.lanes[0].memory.data())?;
            out.flush()?;
        }
        BackendRun::Jit(compiled) => {
            write_jit_dump(&compiled.code, &cli.jit_output).with_context(|| {
                format!("could not open {} for writing", cli.jit_output.display())
            })?;
            eprintln!(
                "emitted {} bytes for {} instructions to {}",
                compiled.code.len(),
                compiled.instructions,
                cli.jit_output.display()
            );
        }
    }
    Ok(())
}
