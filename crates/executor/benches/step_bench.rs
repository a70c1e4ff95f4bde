//! Scalar step-loop benchmark.

use criterion::{criterion_group, criterion_main, Criterion};
use lanefuzz_executor::cpu::{assemble_add, assemble_addi, assemble_jalr};
use lanefuzz_executor::{Cpu, Memory, State};

fn bench_step(c: &mut Criterion) {
    // Straight-line arithmetic followed by the sentinel return
    let mut program: Vec<u32> = Vec::new();
    program.push(assemble_addi(5, 0, 1));
    for _ in 0..256 {
        program.push(assemble_add(6, 6, 5));
    }
    program.push(assemble_jalr(0, 1, 0));
    let bytes: Vec<u8> = program.iter().flat_map(|i| i.to_le_bytes()).collect();

    c.bench_function("scalar_run_258_instructions", |b| {
        b.iter(|| {
            let memory = Memory::with_image(256, &bytes);
            let mut cpu = Cpu::new(memory, State::seeded(256));
            cpu.run(1_000).unwrap();
            cpu.get_reg(6)
        })
    });
}

criterion_group!(benches, bench_step);
criterion_main!(benches);
