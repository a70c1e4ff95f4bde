//! RV32I scalar interpreter.
//!
//! This is the reference engine: it executes one guest instruction at a time
//! against a single [`State`] and a single lane image, and serves as the
//! oracle the vector JIT is checked against.
//!
//! # Execution Model
//!
//! - **Deterministic, single-threaded**: no interrupts, no privilege levels,
//!   no CSRs, no MMU.
//! - **Total**: the interpreter never aborts on malformed guest code. An
//!   unknown opcode or funct3 is logged, counted and treated as a no-op that
//!   advances `pc` by 4; an out-of-image data access is logged, counted and
//!   reads as zero / drops the store. This keeps fuzzed inputs moving.
//! - **Register x0**: hardwired to zero; it is re-zeroed at the end of every
//!   step so rd == 0 writes vanish.
//! - **Branches**: a taken branch goes to `pc + imm`, otherwise `pc + 4`.
//! - **Shifts**: shift amounts are masked to 5 bits before use; arithmetic
//!   right shift is computed portably (see [`arith_shift_right`]).
//! - **FENCE / SYSTEM**: no-ops that advance `pc`.
//!
//! The only fatal conditions are the program counter escaping the program
//! image and the driver-imposed step limit.

use crate::decode::{
    branch_funct3, load_funct3, op_funct3, op_imm_funct3, opcode, store_funct3, DecodedInstr,
};
use crate::error::ExecutorError;
use crate::memory::Memory;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Guest address that terminates the run when `pc` reaches it. The driver
/// seeds `x[1]` with this value, so the first `jalr x0, x1, 0` returns into
/// it. 4-byte aligned by construction.
pub const DONE_ADDRESS: u32 = 0xFFFF_FFF0;

/// Architectural state of one lane: the program counter plus the integer
/// register file. `x[0]` reads as zero regardless of writes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct State {
    /// Program counter, as an offset into the program image.
    pub pc: u32,
    /// General-purpose registers x0..x31.
    pub x: [u32; 32],
}

impl State {
    /// Zeroed state with the return-address and stack-pointer seeds applied:
    /// `x[1]` gets the sentinel return address, `x[2]` the top of the data
    /// region.
    pub fn seeded(memory_size: u32) -> Self {
        let mut x = [0u32; 32];
        x[1] = DONE_ADDRESS;
        x[2] = memory_size;
        Self { pc: 0, x }
    }
}

impl Default for State {
    fn default() -> Self {
        Self { pc: 0, x: [0; 32] }
    }
}

/// Portable arithmetic right shift on the two's-complement interpretation.
///
/// Computed as an unsigned shift with the sign bits OR-ed back in, so the
/// result never depends on how the host shifts signed integers. The shift
/// amount is masked to 5 bits; `shamt == 0` returns the operand unchanged
/// (a fill mask of `!0 << 32` would be out of range, so it is special-cased
/// away).
#[inline]
pub fn arith_shift_right(value: u32, shamt: u32) -> u32 {
    let shamt = shamt & 0x1F;
    let mut out = value >> shamt;
    if value & 0x8000_0000 != 0 && shamt != 0 {
        out |= !0u32 << (32 - shamt);
    }
    out
}

/// Scalar RV32I CPU: one [`State`], one lane image, plus instrumentation.
#[derive(Clone)]
pub struct Cpu {
    /// Architectural state.
    pub state: State,
    /// Lane memory image (data region plus program).
    pub memory: Memory,
    /// Executed instruction count.
    pub steps: u64,
    /// Branch instructions executed (scalar counterpart of the JIT's
    /// `jumps_seen`).
    pub branches_seen: u64,
    /// Branches that were taken.
    pub branches_taken: u64,
    /// Decode diagnostics: unknown opcode or funct3 encountered.
    pub decode_faults: u64,
    /// Memory diagnostics: out-of-image data accesses encountered.
    pub mem_faults: u64,
}

impl Cpu {
    /// Create a CPU over the given image and initial state.
    pub fn new(memory: Memory, state: State) -> Self {
        Self {
            state,
            memory,
            steps: 0,
            branches_seen: 0,
            branches_taken: 0,
            decode_faults: 0,
            mem_faults: 0,
        }
    }

    /// Set a register value (x0 writes are ignored).
    #[inline]
    pub fn set_reg(&mut self, rd: u8, val: u32) {
        if rd != 0 {
            self.state.x[rd as usize] = val;
        }
    }

    /// Get a register value (x0 always returns 0).
    #[inline]
    pub fn get_reg(&self, rs: u8) -> u32 {
        if rs == 0 {
            0
        } else {
            self.state.x[rs as usize]
        }
    }

    fn decode_fault(&mut self, instr: &DecodedInstr) {
        self.decode_faults += 1;
        warn!(
            pc = format_args!("{:#010x}", self.state.pc),
            bits = format_args!("{:#010x}", instr.bits),
            "undefined opcode/funct3, treating as no-op"
        );
    }

    fn load_u8(&mut self, addr: u32) -> u8 {
        match self.memory.read_u8(addr) {
            Ok(v) => v,
            Err(e) => {
                self.mem_faults += 1;
                warn!(%e, "load outside image reads as zero");
                0
            }
        }
    }

    fn load_u16(&mut self, addr: u32) -> u16 {
        match self.memory.read_u16(addr) {
            Ok(v) => v,
            Err(e) => {
                self.mem_faults += 1;
                warn!(%e, "load outside image reads as zero");
                0
            }
        }
    }

    fn load_u32(&mut self, addr: u32) -> u32 {
        match self.memory.read_u32(addr) {
            Ok(v) => v,
            Err(e) => {
                self.mem_faults += 1;
                warn!(%e, "load outside image reads as zero");
                0
            }
        }
    }

    fn store(&mut self, res: Result<(), ExecutorError>) {
        if let Err(e) = res {
            self.mem_faults += 1;
            warn!(%e, "store outside image dropped");
        }
    }

    /// Execute the instruction at `pc`.
    ///
    /// The only error is the program counter escaping the program image;
    /// everything else is a diagnostic (see the module docs).
    pub fn step(&mut self) -> Result<(), ExecutorError> {
        let bits = self.memory.fetch(self.state.pc)?;
        let instr = DecodedInstr::decode(bits);

        // Default next_pc (sequential execution)
        let mut next_pc = self.state.pc.wrapping_add(4);

        match instr.opcode {
            opcode::LUI => {
                // rd = imm << 12 (already shifted in the decoder)
                self.set_reg(instr.rd, instr.imm as u32);
            }

            opcode::AUIPC => {
                // rd = pc + (imm << 12)
                self.set_reg(instr.rd, self.state.pc.wrapping_add(instr.imm as u32));
            }

            opcode::JAL => {
                // rd = pc + 4; pc = pc + imm
                self.set_reg(instr.rd, self.state.pc.wrapping_add(4));
                next_pc = self.state.pc.wrapping_add(instr.imm as u32);
            }

            opcode::JALR => {
                // The temporary covers rd == rs1.
                // rd = pc + 4; pc = (rs1 + imm) & !1
                let t = self.state.pc.wrapping_add(4);
                next_pc = self.get_reg(instr.rs1).wrapping_add(instr.imm as u32) & !1;
                self.set_reg(instr.rd, t);
            }

            opcode::BRANCH => {
                self.branches_seen += 1;
                let rs1_val = self.get_reg(instr.rs1);
                let rs2_val = self.get_reg(instr.rs2);

                let taken = match instr.funct3 {
                    branch_funct3::BEQ => Some(rs1_val == rs2_val),
                    branch_funct3::BNE => Some(rs1_val != rs2_val),
                    branch_funct3::BLT => Some((rs1_val as i32) < (rs2_val as i32)),
                    branch_funct3::BGE => Some((rs1_val as i32) >= (rs2_val as i32)),
                    branch_funct3::BLTU => Some(rs1_val < rs2_val),
                    branch_funct3::BGEU => Some(rs1_val >= rs2_val),
                    _ => None,
                };

                match taken {
                    Some(true) => {
                        self.branches_taken += 1;
                        next_pc = self.state.pc.wrapping_add(instr.imm as u32);
                    }
                    Some(false) => {}
                    None => self.decode_fault(&instr),
                }
            }

            opcode::LOAD => {
                let addr = self.get_reg(instr.rs1).wrapping_add(instr.imm as u32);

                match instr.funct3 {
                    load_funct3::LB => {
                        let val = self.load_u8(addr);
                        self.set_reg(instr.rd, val as i8 as i32 as u32);
                    }
                    load_funct3::LH => {
                        let val = self.load_u16(addr);
                        self.set_reg(instr.rd, val as i16 as i32 as u32);
                    }
                    load_funct3::LW => {
                        let val = self.load_u32(addr);
                        self.set_reg(instr.rd, val);
                    }
                    load_funct3::LBU => {
                        let val = self.load_u8(addr);
                        self.set_reg(instr.rd, val as u32);
                    }
                    load_funct3::LHU => {
                        let val = self.load_u16(addr);
                        self.set_reg(instr.rd, val as u32);
                    }
                    _ => self.decode_fault(&instr),
                }
            }

            opcode::STORE => {
                let addr = self.get_reg(instr.rs1).wrapping_add(instr.imm as u32);
                let val = self.get_reg(instr.rs2);

                match instr.funct3 {
                    store_funct3::SB => {
                        let res = self.memory.write_u8(addr, val as u8);
                        self.store(res);
                    }
                    store_funct3::SH => {
                        let res = self.memory.write_u16(addr, val as u16);
                        self.store(res);
                    }
                    store_funct3::SW => {
                        let res = self.memory.write_u32(addr, val);
                        self.store(res);
                    }
                    _ => self.decode_fault(&instr),
                }
            }

            opcode::OP_IMM => {
                let rs1_val = self.get_reg(instr.rs1);
                let imm = instr.imm as u32;

                match instr.funct3 {
                    op_imm_funct3::ADDI => {
                        self.set_reg(instr.rd, rs1_val.wrapping_add(imm));
                    }
                    op_imm_funct3::SLTI => {
                        self.set_reg(instr.rd, ((rs1_val as i32) < instr.imm) as u32);
                    }
                    op_imm_funct3::SLTIU => {
                        self.set_reg(instr.rd, (rs1_val < imm) as u32);
                    }
                    op_imm_funct3::XORI => {
                        self.set_reg(instr.rd, rs1_val ^ imm);
                    }
                    op_imm_funct3::ORI => {
                        self.set_reg(instr.rd, rs1_val | imm);
                    }
                    op_imm_funct3::ANDI => {
                        self.set_reg(instr.rd, rs1_val & imm);
                    }
                    op_imm_funct3::SLLI => {
                        self.set_reg(instr.rd, rs1_val << instr.shamt());
                    }
                    op_imm_funct3::SRLI_SRAI => {
                        // Bit 30 selects SRAI
                        if instr.bits & (1 << 30) != 0 {
                            self.set_reg(instr.rd, arith_shift_right(rs1_val, instr.shamt()));
                        } else {
                            self.set_reg(instr.rd, rs1_val >> instr.shamt());
                        }
                    }
                    _ => unreachable!("funct3 is 3 bits"),
                }
            }

            opcode::OP => {
                let rs1_val = self.get_reg(instr.rs1);
                let rs2_val = self.get_reg(instr.rs2);
                let shamt = rs2_val & 0x1F;

                match instr.funct3 {
                    op_funct3::ADD_SUB => {
                        // Bit 30 selects SUB
                        if instr.bits & (1 << 30) != 0 {
                            self.set_reg(instr.rd, rs1_val.wrapping_sub(rs2_val));
                        } else {
                            self.set_reg(instr.rd, rs1_val.wrapping_add(rs2_val));
                        }
                    }
                    op_funct3::SLL => {
                        self.set_reg(instr.rd, rs1_val << shamt);
                    }
                    op_funct3::SLT => {
                        self.set_reg(instr.rd, ((rs1_val as i32) < (rs2_val as i32)) as u32);
                    }
                    op_funct3::SLTU => {
                        self.set_reg(instr.rd, (rs1_val < rs2_val) as u32);
                    }
                    op_funct3::XOR => {
                        self.set_reg(instr.rd, rs1_val ^ rs2_val);
                    }
                    op_funct3::SRL_SRA => {
                        // Bit 30 selects SRA
                        if instr.bits & (1 << 30) != 0 {
                            self.set_reg(instr.rd, arith_shift_right(rs1_val, shamt));
                        } else {
                            self.set_reg(instr.rd, rs1_val >> shamt);
                        }
                    }
                    op_funct3::OR => {
                        self.set_reg(instr.rd, rs1_val | rs2_val);
                    }
                    op_funct3::AND => {
                        self.set_reg(instr.rd, rs1_val & rs2_val);
                    }
                    _ => unreachable!("funct3 is 3 bits"),
                }
            }

            opcode::MISC_MEM => {
                // FENCE / FENCE.I: single-threaded lanes, nothing to order
            }

            opcode::SYSTEM => {
                // ECALL / EBREAK / CSR*: unimplemented, treated as no-ops
            }

            _ => self.decode_fault(&instr),
        }

        // rd == 0 may have been written through the raw array path above;
        // the zero register always wins.
        self.state.x[0] = 0;
        self.state.pc = next_pc;
        self.steps += 1;
        Ok(())
    }

    /// Run until `pc` reaches [`DONE_ADDRESS`] or the step limit trips.
    pub fn run(&mut self, max_steps: u64) -> Result<(), ExecutorError> {
        while self.state.pc != DONE_ADDRESS {
            if self.steps >= max_steps {
                return Err(ExecutorError::MaxStepsReached { max_steps });
            }
            self.step()?;
        }
        Ok(())
    }
}

// ============================================================================
// Instruction Assembler Helpers (for testing)
// ============================================================================

/// Assemble an R-type instruction.
pub fn assemble_r(opcode: u8, rd: u8, funct3: u8, rs1: u8, rs2: u8, funct7: u8) -> u32 {
    ((funct7 as u32) << 25)
        | ((rs2 as u32) << 20)
        | ((rs1 as u32) << 15)
        | ((funct3 as u32) << 12)
        | ((rd as u32) << 7)
        | (opcode as u32)
}

/// Assemble an I-type instruction.
pub fn assemble_i(opcode: u8, rd: u8, funct3: u8, rs1: u8, imm: i32) -> u32 {
    (((imm as u32) & 0xFFF) << 20)
        | ((rs1 as u32) << 15)
        | ((funct3 as u32) << 12)
        | ((rd as u32) << 7)
        | (opcode as u32)
}

/// Assemble a S-type instruction.
pub fn assemble_s(opcode: u8, funct3: u8, rs1: u8, rs2: u8, imm: i32) -> u32 {
    let imm = imm as u32;
    let imm11_5 = (imm >> 5) & 0x7F;
    let imm4_0 = imm & 0x1F;
    (imm11_5 << 25)
        | ((rs2 as u32) << 20)
        | ((rs1 as u32) << 15)
        | ((funct3 as u32) << 12)
        | (imm4_0 << 7)
        | (opcode as u32)
}

/// Assemble a B-type instruction.
pub fn assemble_b(opcode: u8, funct3: u8, rs1: u8, rs2: u8, imm: i32) -> u32 {
    let imm = imm as u32;
    let imm12 = (imm >> 12) & 1;
    let imm10_5 = (imm >> 5) & 0x3F;
    let imm4_1 = (imm >> 1) & 0xF;
    let imm11 = (imm >> 11) & 1;
    (imm12 << 31)
        | (imm10_5 << 25)
        | ((rs2 as u32) << 20)
        | ((rs1 as u32) << 15)
        | ((funct3 as u32) << 12)
        | (imm4_1 << 8)
        | (imm11 << 7)
        | (opcode as u32)
}

/// Assemble a U-type instruction.
pub fn assemble_u(opcode: u8, rd: u8, imm: u32) -> u32 {
    (imm & 0xFFFF_F000) | ((rd as u32) << 7) | (opcode as u32)
}

/// Assemble a J-type instruction.
pub fn assemble_j(opcode: u8, rd: u8, imm: i32) -> u32 {
    let imm = imm as u32;
    let imm20 = (imm >> 20) & 1;
    let imm10_1 = (imm >> 1) & 0x3FF;
    let imm11 = (imm >> 11) & 1;
    let imm19_12 = (imm >> 12) & 0xFF;
    (imm20 << 31)
        | (imm10_1 << 21)
        | (imm11 << 20)
        | (imm19_12 << 12)
        | ((rd as u32) << 7)
        | (opcode as u32)
}

// Convenience assembler functions
pub fn assemble_add(rd: u8, rs1: u8, rs2: u8) -> u32 {
    assemble_r(opcode::OP, rd, 0b000, rs1, rs2, 0x00)
}

pub fn assemble_sub(rd: u8, rs1: u8, rs2: u8) -> u32 {
    assemble_r(opcode::OP, rd, 0b000, rs1, rs2, 0x20)
}

pub fn assemble_addi(rd: u8, rs1: u8, imm: i32) -> u32 {
    assemble_i(opcode::OP_IMM, rd, 0b000, rs1, imm)
}

pub fn assemble_srai(rd: u8, rs1: u8, shamt: i32) -> u32 {
    assemble_i(opcode::OP_IMM, rd, 0b101, rs1, shamt | (0x20 << 5))
}

pub fn assemble_srli(rd: u8, rs1: u8, shamt: i32) -> u32 {
    assemble_i(opcode::OP_IMM, rd, 0b101, rs1, shamt)
}

pub fn assemble_slli(rd: u8, rs1: u8, shamt: i32) -> u32 {
    assemble_i(opcode::OP_IMM, rd, 0b001, rs1, shamt)
}

pub fn assemble_lui(rd: u8, imm: u32) -> u32 {
    assemble_u(opcode::LUI, rd, imm)
}

pub fn assemble_auipc(rd: u8, imm: u32) -> u32 {
    assemble_u(opcode::AUIPC, rd, imm)
}

pub fn assemble_jal(rd: u8, imm: i32) -> u32 {
    assemble_j(opcode::JAL, rd, imm)
}

pub fn assemble_jalr(rd: u8, rs1: u8, imm: i32) -> u32 {
    assemble_i(opcode::JALR, rd, 0b000, rs1, imm)
}

pub fn assemble_beq(rs1: u8, rs2: u8, imm: i32) -> u32 {
    assemble_b(opcode::BRANCH, 0b000, rs1, rs2, imm)
}

pub fn assemble_bne(rs1: u8, rs2: u8, imm: i32) -> u32 {
    assemble_b(opcode::BRANCH, 0b001, rs1, rs2, imm)
}

pub fn assemble_lw(rd: u8, rs1: u8, imm: i32) -> u32 {
    assemble_i(opcode::LOAD, rd, 0b010, rs1, imm)
}

pub fn assemble_lbu(rd: u8, rs1: u8, imm: i32) -> u32 {
    assemble_i(opcode::LOAD, rd, 0b100, rs1, imm)
}

pub fn assemble_sb(rs1: u8, rs2: u8, imm: i32) -> u32 {
    assemble_s(opcode::STORE, 0b000, rs1, rs2, imm)
}

pub fn assemble_sw(rs1: u8, rs2: u8, imm: i32) -> u32 {
    assemble_s(opcode::STORE, 0b010, rs1, rs2, imm)
}

pub fn assemble_nop() -> u32 {
    assemble_addi(0, 0, 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cpu_with(program: &[u32]) -> Cpu {
        let bytes: Vec<u8> = program.iter().flat_map(|i| i.to_le_bytes()).collect();
        let memory = Memory::with_image(256, &bytes);
        Cpu::new(memory, State::seeded(256))
    }

    #[test]
    fn test_addi() {
        let mut cpu = cpu_with(&[assemble_addi(1, 0, 42)]);
        cpu.step().unwrap();
        assert_eq!(cpu.get_reg(1), 42);
        assert_eq!(cpu.state.pc, 4);
    }

    #[test]
    fn test_addi_negative() {
        let mut cpu = cpu_with(&[assemble_addi(5, 0, -1)]);
        cpu.step().unwrap();
        assert_eq!(cpu.get_reg(5), 0xFFFFFFFF);
    }

    #[test]
    fn test_add() {
        let mut cpu = cpu_with(&[
            assemble_addi(5, 0, 10),
            assemble_addi(6, 0, 20),
            assemble_add(7, 5, 6),
        ]);
        for _ in 0..3 {
            cpu.step().unwrap();
        }
        assert_eq!(cpu.get_reg(7), 30);
    }

    #[test]
    fn test_sub_equal_operands() {
        let mut cpu = cpu_with(&[
            assemble_addi(5, 0, 123),
            assemble_addi(6, 0, 123),
            assemble_sub(7, 5, 6),
        ]);
        for _ in 0..3 {
            cpu.step().unwrap();
        }
        assert_eq!(cpu.get_reg(7), 0);
    }

    #[test]
    fn test_x0_always_zero() {
        let mut cpu = cpu_with(&[assemble_addi(0, 0, 42)]);
        cpu.step().unwrap();
        assert_eq!(cpu.get_reg(0), 0);
        assert_eq!(cpu.state.x[0], 0);
    }

    #[test]
    fn test_lui_addi_builds_constant() {
        let mut cpu = cpu_with(&[assemble_lui(5, 0x12345000), assemble_addi(5, 5, 0x678)]);
        cpu.step().unwrap();
        cpu.step().unwrap();
        assert_eq!(cpu.get_reg(5), 0x12345678);
    }

    #[test]
    fn test_auipc() {
        let mut cpu = cpu_with(&[assemble_nop(), assemble_auipc(5, 0x1000)]);
        cpu.step().unwrap();
        cpu.step().unwrap();
        assert_eq!(cpu.get_reg(5), 0x1004);
    }

    #[test]
    fn test_jal() {
        let mut cpu = cpu_with(&[assemble_jal(1, 8)]);
        cpu.step().unwrap();
        assert_eq!(cpu.get_reg(1), 4); // return address
        assert_eq!(cpu.state.pc, 8); // jump target
    }

    #[test]
    fn test_jalr_clears_low_bit() {
        let mut cpu = cpu_with(&[assemble_addi(5, 0, 0x21), assemble_jalr(6, 5, 0)]);
        cpu.step().unwrap();
        cpu.step().unwrap();
        assert_eq!(cpu.state.pc, 0x20); // odd target, low bit cleared
        assert_eq!(cpu.get_reg(6), 8);
    }

    #[test]
    fn test_jalr_rd_equals_rs1() {
        // The link write must not clobber the jump base.
        let mut cpu = cpu_with(&[assemble_addi(5, 0, 0x40), assemble_jalr(5, 5, 4)]);
        cpu.step().unwrap();
        cpu.step().unwrap();
        assert_eq!(cpu.state.pc, 0x44);
        assert_eq!(cpu.get_reg(5), 8);
    }

    #[test]
    fn test_beq_taken() {
        let mut cpu = cpu_with(&[
            assemble_addi(5, 0, 1),
            assemble_addi(6, 0, 1),
            assemble_beq(5, 6, 8),
        ]);
        for _ in 0..3 {
            cpu.step().unwrap();
        }
        assert_eq!(cpu.state.pc, 16); // 8 + 8
        assert_eq!(cpu.branches_seen, 1);
        assert_eq!(cpu.branches_taken, 1);
    }

    #[test]
    fn test_beq_not_taken() {
        let mut cpu = cpu_with(&[
            assemble_addi(5, 0, 1),
            assemble_addi(6, 0, 2),
            assemble_beq(5, 6, 8),
        ]);
        for _ in 0..3 {
            cpu.step().unwrap();
        }
        assert_eq!(cpu.state.pc, 12); // fall through
        assert_eq!(cpu.branches_seen, 1);
        assert_eq!(cpu.branches_taken, 0);
    }

    #[test]
    fn test_blt_signed_bltu_unsigned() {
        let mut cpu = cpu_with(&[
            assemble_addi(5, 0, -5),
            assemble_addi(6, 0, 5),
            assemble_b(opcode::BRANCH, 0b100, 5, 6, 8), // BLT: -5 < 5, taken
        ]);
        for _ in 0..3 {
            cpu.step().unwrap();
        }
        assert_eq!(cpu.state.pc, 16);

        let mut cpu = cpu_with(&[
            assemble_addi(5, 0, -5),
            assemble_addi(6, 0, 5),
            assemble_b(opcode::BRANCH, 0b110, 5, 6, 8), // BLTU: 0xFFFFFFFB > 5
        ]);
        for _ in 0..3 {
            cpu.step().unwrap();
        }
        assert_eq!(cpu.state.pc, 12);
    }

    #[test]
    fn test_srai_of_minus_one() {
        let mut cpu = cpu_with(&[assemble_addi(5, 0, -1), assemble_srai(6, 5, 20)]);
        cpu.step().unwrap();
        cpu.step().unwrap();
        assert_eq!(cpu.get_reg(6), 0xFFFFFFFF);
    }

    #[test]
    fn test_srai_shamt_zero_identity() {
        let mut cpu = cpu_with(&[assemble_addi(5, 0, -123), assemble_srai(6, 5, 0)]);
        cpu.step().unwrap();
        cpu.step().unwrap();
        assert_eq!(cpu.get_reg(6), (-123i32) as u32);
    }

    #[test]
    fn test_srai_shamt_31_of_negative() {
        let mut cpu = cpu_with(&[assemble_addi(5, 0, -2), assemble_srai(6, 5, 31)]);
        cpu.step().unwrap();
        cpu.step().unwrap();
        assert_eq!(cpu.get_reg(6), 0xFFFFFFFF);
    }

    #[test]
    fn test_srli_is_logical() {
        let mut cpu = cpu_with(&[assemble_addi(5, 0, -1), assemble_srli(6, 5, 28)]);
        cpu.step().unwrap();
        cpu.step().unwrap();
        assert_eq!(cpu.get_reg(6), 0xF);
    }

    #[test]
    fn test_sll_srl_sra_mask_rs2() {
        // rs2 = 33 shifts by 1, not 33
        let mut cpu = cpu_with(&[
            assemble_addi(5, 0, 4),
            assemble_addi(6, 0, 33),
            assemble_r(opcode::OP, 7, 0b001, 5, 6, 0x00), // SLL
        ]);
        for _ in 0..3 {
            cpu.step().unwrap();
        }
        assert_eq!(cpu.get_reg(7), 8);
    }

    #[test]
    fn test_sra_register_form() {
        let mut cpu = cpu_with(&[
            assemble_addi(5, 0, -16),
            assemble_addi(6, 0, 2),
            assemble_r(opcode::OP, 7, 0b101, 5, 6, 0x20), // SRA
        ]);
        for _ in 0..3 {
            cpu.step().unwrap();
        }
        assert_eq!(cpu.get_reg(7), 0xFFFFFFFC);
    }

    #[test]
    fn test_slti_sltiu() {
        let mut cpu = cpu_with(&[
            assemble_addi(5, 0, -1),
            assemble_i(opcode::OP_IMM, 6, 0b010, 5, 0), // SLTI: -1 < 0
            assemble_i(opcode::OP_IMM, 7, 0b011, 5, 0), // SLTIU: 0xFFFFFFFF < 0 is false
        ]);
        for _ in 0..3 {
            cpu.step().unwrap();
        }
        assert_eq!(cpu.get_reg(6), 1);
        assert_eq!(cpu.get_reg(7), 0);
    }

    #[test]
    fn test_store_load_roundtrip_widths() {
        // x2 = 256 (top of data region), store below it, load back zero-extended
        let mut cpu = cpu_with(&[
            assemble_addi(5, 0, 0x7B),
            assemble_sb(2, 5, -4),
            assemble_lbu(6, 2, -4),
            assemble_i(opcode::LOAD, 7, 0b000, 2, -4), // LB (sign-extends)
        ]);
        for _ in 0..4 {
            cpu.step().unwrap();
        }
        assert_eq!(cpu.get_reg(6), 0x7B);
        assert_eq!(cpu.get_reg(7), 0x7B);
    }

    #[test]
    fn test_store_load_word() {
        let mut cpu = cpu_with(&[
            assemble_lui(5, 0xDEAD_B000),
            assemble_sw(2, 5, -8),
            assemble_lw(6, 2, -8),
        ]);
        for _ in 0..3 {
            cpu.step().unwrap();
        }
        assert_eq!(cpu.get_reg(6), 0xDEAD_B000);
    }

    #[test]
    fn test_lb_sign_extends() {
        let mut cpu = cpu_with(&[
            assemble_addi(5, 0, -1), // 0xFF in the low byte
            assemble_sb(2, 5, -4),
            assemble_i(opcode::LOAD, 6, 0b000, 2, -4), // LB
            assemble_lbu(7, 2, -4),
        ]);
        for _ in 0..4 {
            cpu.step().unwrap();
        }
        assert_eq!(cpu.get_reg(6), 0xFFFFFFFF);
        assert_eq!(cpu.get_reg(7), 0xFF);
    }

    #[test]
    fn test_fence_and_system_are_nops() {
        let mut cpu = cpu_with(&[0x0FF0000F, 0x00000073]); // FENCE; ECALL
        cpu.step().unwrap();
        assert_eq!(cpu.state.pc, 4);
        cpu.step().unwrap();
        assert_eq!(cpu.state.pc, 8);
        assert_eq!(cpu.decode_faults, 0);
    }

    #[test]
    fn test_unknown_opcode_is_diagnostic_nop() {
        let mut cpu = cpu_with(&[0x0000002B, assemble_addi(5, 0, 7)]);
        cpu.step().unwrap();
        assert_eq!(cpu.state.pc, 4);
        assert_eq!(cpu.decode_faults, 1);
        cpu.step().unwrap();
        assert_eq!(cpu.get_reg(5), 7);
    }

    #[test]
    fn test_load_outside_image_reads_zero() {
        let mut cpu = cpu_with(&[assemble_lui(5, 0x10000000), assemble_lw(6, 5, 0)]);
        cpu.step().unwrap();
        cpu.step().unwrap();
        assert_eq!(cpu.get_reg(6), 0);
        assert_eq!(cpu.mem_faults, 1);
    }

    #[test]
    fn test_run_terminates_on_sentinel() {
        let mut cpu = cpu_with(&[assemble_addi(10, 0, 42), assemble_jalr(0, 1, 0)]);
        cpu.run(100).unwrap();
        assert_eq!(cpu.get_reg(10), 42);
        assert_eq!(cpu.state.pc, DONE_ADDRESS);
        assert_eq!(cpu.steps, 2);
    }

    #[test]
    fn test_run_step_limit() {
        // Tight infinite loop: jal x0, 0
        let mut cpu = cpu_with(&[assemble_jal(0, 0)]);
        let err = cpu.run(10).unwrap_err();
        assert!(matches!(err, ExecutorError::MaxStepsReached { max_steps: 10 }));
    }

    #[test]
    fn test_pc_escape_is_fatal() {
        let mut cpu = cpu_with(&[assemble_nop()]);
        cpu.step().unwrap();
        let err = cpu.step().unwrap_err();
        assert!(matches!(err, ExecutorError::ProgramEscape { pc: 4 }));
    }

    #[test]
    fn test_arith_shift_right_matches_signed_shift() {
        for &v in &[0u32, 1, 0x7FFF_FFFF, 0x8000_0000, 0xFFFF_FFFF, 0xDEAD_BEEF] {
            for shamt in 0..32 {
                assert_eq!(
                    arith_shift_right(v, shamt),
                    ((v as i32) >> shamt) as u32,
                    "v={v:#x} shamt={shamt}"
                );
            }
        }
    }
}
