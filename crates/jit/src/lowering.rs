//! Vector lowering: one emitted block per guest instruction, operating on
//! all 16 lanes at once.
//!
//! Guest register `x[k]` is backed by host vector register `k`, so most
//! RV32I operations become a broadcast plus one lane-parallel instruction.
//! Loads and stores add the lane base offsets to the per-lane `rs1` values
//! and gather/scatter through lane 0's base pointer. Sub-word stores gather
//! the containing words, blend the low bytes in under a per-lane byte mask,
//! and scatter back.
//!
//! Three emission modes:
//! - plain: the PC vector is advanced by a broadcast 4 after every
//!   non-control instruction;
//! - `basic_blocks`: every block gets an entry-mask refresh against its
//!   guest address and jumps between labelled blocks;
//! - `fold_pc`: PC is the compile-time constant `index * 4` and PC vector
//!   writes are elided for non-control instructions.
//!
//! The backend emits and dumps host code; it does not execute it.

use lanefuzz_executor::decode::{load_funct3, op_funct3, op_imm_funct3, opcode, store_funct3, DecodedInstr};
use tracing::{debug, error, info, warn};

use crate::asm::{Assembler, EmitterConfig, VReg, CC_LT, DEFAULT_CODE_LIMIT};
use crate::divergence::BlockLabels;
use crate::error::JitError;
use crate::lanes::{LaneMemory, VectorState, LANE_COUNT};

/// Label-table limit: programs above this size are rejected up front.
pub const MAX_PROGRAM_INSTRUCTIONS: usize = 4096;

/// Emission-mode switches. The two optimisations are mutually exclusive:
/// PC folding assumes straight-line emission order, which basic-block
/// gating deliberately breaks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct JitOptions {
    /// Emit per-block entry masks, block labels and inter-block jumps.
    pub basic_blocks: bool,
    /// Fold PC into compile-time constants.
    pub fold_pc: bool,
}

impl JitOptions {
    pub fn validate(self) -> Result<(), JitError> {
        if self.basic_blocks && self.fold_pc {
            return Err(JitError::ConflictingModes);
        }
        Ok(())
    }
}

/// The finished artifact: the host code plus the JIT-owned state the code
/// references. Holding the state here keeps the embedded addresses of the
/// PC vector, lane memory and offset table alive as long as the code is.
pub struct CompiledProgram {
    /// Emitted host code, immutable once finalized.
    pub code: Vec<u8>,
    /// Guest instructions lowered.
    pub instructions: usize,
    /// Spilled vector state (PC lanes and divergence counters).
    pub state: Box<VectorState>,
    lanes: LaneMemory,
    #[allow(dead_code)]
    offsets: Box<[u32; LANE_COUNT]>,
}

impl CompiledProgram {
    /// Branch instructions lowered.
    pub fn jumps_seen(&self) -> u64 {
        self.state.jumps_seen
    }

    pub fn lanes(&self) -> &LaneMemory {
        &self.lanes
    }
}

/// Split an effective displacement into a (base, disp32) pair the host
/// addressing mode can encode. Over-range displacements are folded into the
/// base pointer, which is compile-time known.
pub fn split_displacement(base: u64, imm: i64) -> (u64, i32) {
    match i32::try_from(imm) {
        Ok(disp) => (base, disp),
        Err(_) => {
            warn!(imm, "SIMD fastpath: displacement exceeds the host encoding, folding into base");
            (base.wrapping_add(imm as u64), 0)
        }
    }
}

/// AVX-512 JIT over [`LANE_COUNT`] lanes.
#[derive(Debug)]
pub struct Avx512Jit {
    pub(crate) asm: Assembler,
    pub(crate) cfg: EmitterConfig,
    pub(crate) opts: JitOptions,
    pub(crate) state: Box<VectorState>,
    pub(crate) labels: BlockLabels,
    lanes: LaneMemory,
    offsets: Box<[u32; LANE_COUNT]>,
}

impl Avx512Jit {
    pub fn new(lanes: LaneMemory, opts: JitOptions) -> Result<Self, JitError> {
        Self::with_code_limit(lanes, opts, DEFAULT_CODE_LIMIT)
    }

    pub fn with_code_limit(
        lanes: LaneMemory,
        opts: JitOptions,
        limit: usize,
    ) -> Result<Self, JitError> {
        opts.validate()?;
        let mut asm = Assembler::new(limit);
        // Placeholder graph; compile() builds the real one per program.
        let labels = BlockLabels::prepare(&mut asm, 0);
        let offsets = Box::new(lanes.base_offsets()?);
        Ok(Self {
            asm,
            cfg: EmitterConfig::default(),
            opts,
            state: Box::new(VectorState::new()),
            labels,
            lanes,
            offsets,
        })
    }

    /// Mutable view of one lane's data region, for seeding before compile.
    pub fn lane_data_mut(&mut self, lane: usize) -> &mut [u8] {
        self.lanes.lane_data_mut(lane)
    }

    fn offsets_ptr(&self) -> u64 {
        self.offsets.as_ptr() as u64
    }

    /// Lower the whole program and finalize the code buffer.
    pub fn compile(mut self, program: &[u8]) -> Result<CompiledProgram, JitError> {
        if program.len() % 4 != 0 {
            warn!(len = program.len(), "program size not word-aligned, padding with zeros");
        }
        let words: Vec<u32> = program
            .chunks(4)
            .map(|chunk| {
                let mut bytes = [0u8; 4];
                bytes[..chunk.len()].copy_from_slice(chunk);
                u32::from_le_bytes(bytes)
            })
            .collect();
        if words.len() > MAX_PROGRAM_INSTRUCTIONS {
            return Err(JitError::TooManyInstructions {
                count: words.len(),
                max: MAX_PROGRAM_INSTRUCTIONS,
            });
        }

        self.labels = BlockLabels::prepare(&mut self.asm, words.len());
        for (idx, &bits) in words.iter().enumerate() {
            info!(instruction = idx, bits = format_args!("{bits:08x}"), "lowering");
            let instr = DecodedInstr::decode(bits);
            self.emit_block(idx, &instr)?;
        }
        self.asm.bind(self.labels.epilogue())?;
        self.asm.ret()?;

        let instructions = words.len();
        let Self { asm, state, lanes, offsets, .. } = self;
        let code = asm.finalize()?;
        Ok(CompiledProgram {
            code,
            instructions,
            state,
            lanes,
            offsets,
        })
    }

    fn emit_block(&mut self, idx: usize, instr: &DecodedInstr) -> Result<(), JitError> {
        self.asm.bind(self.labels.block(idx))?;
        if self.opts.basic_blocks {
            self.emit_block_entry(idx)?;
        }

        match instr.opcode {
            opcode::LUI => self.emit_lui(instr)?,
            opcode::AUIPC => self.emit_auipc(idx, instr)?,
            opcode::JAL => self.emit_jal(idx, instr)?,
            opcode::JALR => self.emit_jalr(idx, instr)?,
            opcode::BRANCH => self.emit_branch(idx, instr)?,
            opcode::LOAD => self.emit_load(instr)?,
            opcode::STORE => self.emit_store(instr)?,
            opcode::OP_IMM => self.emit_op_imm(instr)?,
            opcode::OP => self.emit_op(instr)?,
            opcode::MISC_MEM => self.asm.mfence()?,
            opcode::SYSTEM => {
                warn!("syscalls are unsupported, lowering to a no-op");
            }
            _ => {
                error!(bits = format_args!("{:08x}", instr.bits), "invalid instruction, lowering to a no-op");
            }
        }

        self.finish_block(instr.is_control())
    }

    /// Always runs at the end of a block: the generic PC advance (unless a
    /// control instruction or the optimizer owns PC), then the zero-register
    /// reset. The scratch vector is x0's backing, so one zeroing restores
    /// both invariants.
    fn finish_block(&mut self, control: bool) -> Result<(), JitError> {
        let cfg = self.cfg;
        if !control && !self.opts.fold_pc {
            self.asm.mov_r64_imm(cfg.addr, self.state.pc_addr())?;
            self.broadcast_imm(cfg.scratch, 4)?;
            self.asm.vpaddd_mem(cfg.scratch, cfg.scratch, cfg.addr, 0)?;
            self.emit_pc_store(cfg.scratch)?;
        }
        self.asm.vpxord(cfg.scratch, cfg.scratch, cfg.scratch)
    }

    /// Write the PC vector at `[addr]`. A PC update is a side effect, so in
    /// basic-block mode it only commits on lanes the execution mask covers.
    pub(crate) fn emit_pc_store(&mut self, src: VReg) -> Result<(), JitError> {
        let cfg = self.cfg;
        if self.opts.basic_blocks {
            self.asm.vmovdqu32_store_masked(cfg.addr, 0, src, cfg.exec_mask)
        } else {
            self.asm.vmovdqu32_store(cfg.addr, 0, src)
        }
    }

    /// Broadcast a lane-invariant immediate through the scalar accumulator.
    pub(crate) fn broadcast_imm(&mut self, dst: VReg, imm: u32) -> Result<(), JitError> {
        self.asm.mov_r32_imm(self.cfg.acc, imm)?;
        self.asm.vpbroadcastd(dst, self.cfg.acc)
    }

    /// Build the per-lane effective-address vector in the scratch register:
    /// lane base offsets plus the per-lane `rs1` values.
    fn emit_address_vector(&mut self, rs1: u8) -> Result<(), JitError> {
        let cfg = self.cfg;
        self.asm.mov_r64_imm(cfg.acc, self.offsets_ptr())?;
        self.asm.vmovdqu32_load(cfg.scratch, cfg.acc, 0)?;
        self.asm.vpaddd(cfg.scratch, cfg.scratch, VReg(rs1))
    }

    /// Scatter mask: all lanes, or the execution-control mask when
    /// basic-block gating is on. Scatters consume the mask, so it is always
    /// staged through the scratch mask register.
    fn emit_store_mask(&mut self) -> Result<(), JitError> {
        let cfg = self.cfg;
        if self.opts.basic_blocks {
            self.asm.kandw(cfg.tmp_mask, cfg.exec_mask, cfg.exec_mask)
        } else {
            self.asm.kxnorw(cfg.tmp_mask, cfg.tmp_mask, cfg.tmp_mask)
        }
    }

    fn emit_lui(&mut self, instr: &DecodedInstr) -> Result<(), JitError> {
        if instr.rd == 0 {
            debug!("skipping LUI into x0");
            return Ok(());
        }
        self.broadcast_imm(VReg(instr.rd), instr.imm as u32)
    }

    fn emit_auipc(&mut self, idx: usize, instr: &DecodedInstr) -> Result<(), JitError> {
        if instr.rd == 0 {
            debug!("skipping AUIPC into x0");
            return Ok(());
        }
        let cfg = self.cfg;
        let rd = VReg(instr.rd);
        if self.opts.fold_pc {
            self.broadcast_imm(rd, (idx as u32 * 4).wrapping_add(instr.imm as u32))
        } else {
            self.asm.mov_r64_imm(cfg.addr, self.state.pc_addr())?;
            self.asm.vmovdqu32_load(rd, cfg.addr, 0)?;
            self.broadcast_imm(cfg.scratch, instr.imm as u32)?;
            self.asm.vpaddd(rd, rd, cfg.scratch)
        }
    }

    fn emit_load(&mut self, instr: &DecodedInstr) -> Result<(), JitError> {
        if instr.rd == 0 {
            debug!("skipping load into x0");
            return Ok(());
        }
        let cfg = self.cfg;
        let rd = VReg(instr.rd);

        self.emit_address_vector(instr.rs1)?;
        let (base, disp) = split_displacement(self.lanes.base_ptr(), instr.imm as i64);
        self.asm.mov_r64_imm(cfg.addr, base)?;
        self.asm.kxnorw(cfg.tmp_mask, cfg.tmp_mask, cfg.tmp_mask)?;
        self.asm.vpgatherdd(rd, cfg.tmp_mask, cfg.addr, cfg.scratch, disp)?;

        match instr.funct3 {
            load_funct3::LB => {
                // Narrow to bytes, then sign-extend back to dword lanes
                self.asm.vpmovdb(rd, rd)?;
                self.asm.vpmovsxbd(rd, rd)
            }
            load_funct3::LH => {
                self.asm.vpmovdw(rd, rd)?;
                self.asm.vpmovsxwd(rd, rd)
            }
            load_funct3::LW => Ok(()),
            load_funct3::LBU => {
                self.broadcast_imm(cfg.scratch, 0xFF)?;
                self.asm.vpandd(rd, rd, cfg.scratch)
            }
            load_funct3::LHU => {
                self.broadcast_imm(cfg.scratch, 0xFFFF)?;
                self.asm.vpandd(rd, rd, cfg.scratch)
            }
            _ => {
                error!(funct3 = instr.funct3, "undefined load funct3, lowering to a no-op");
                Ok(())
            }
        }
    }

    fn emit_store(&mut self, instr: &DecodedInstr) -> Result<(), JitError> {
        let cfg = self.cfg;

        let width_mask: u64 = match instr.funct3 {
            store_funct3::SW => {
                self.emit_address_vector(instr.rs1)?;
                let (base, disp) = split_displacement(self.lanes.base_ptr(), instr.imm as i64);
                self.asm.mov_r64_imm(cfg.addr, base)?;
                if instr.rs2 == 0 {
                    // x0's backing is the scratch register holding the
                    // address vector, so a zero source is materialized in a
                    // borrowed register.
                    let zero = VReg(1);
                    self.asm.mov_r64_imm(cfg.acc, self.state.spill_addr(0))?;
                    self.asm.vmovdqu32_store(cfg.acc, 0, zero)?;
                    self.asm.vpxord(zero, zero, zero)?;
                    self.emit_store_mask()?;
                    self.asm.vpscatterdd(cfg.addr, cfg.scratch, disp, cfg.tmp_mask, zero)?;
                    self.asm.mov_r64_imm(cfg.acc, self.state.spill_addr(0))?;
                    self.asm.vmovdqu32_load(zero, cfg.acc, 0)?;
                } else {
                    self.emit_store_mask()?;
                    self.asm
                        .vpscatterdd(cfg.addr, cfg.scratch, disp, cfg.tmp_mask, VReg(instr.rs2))?;
                }
                return Ok(());
            }
            store_funct3::SB => 0b0001,
            store_funct3::SH => 0b0011,
            _ => {
                error!(funct3 = instr.funct3, "undefined store funct3, lowering to a no-op");
                return Ok(());
            }
        };

        // SB/SH: gather the containing words, blend the low bytes of rs2 in
        // under a per-lane byte mask, scatter back.
        self.emit_address_vector(instr.rs1)?;
        let (base, disp) = split_displacement(self.lanes.base_ptr(), instr.imm as i64);
        self.asm.mov_r64_imm(cfg.addr, base)?;

        let gathered = if instr.rs2 == 1 { VReg(2) } else { VReg(1) };
        self.asm.mov_r64_imm(cfg.acc, self.state.spill_addr(0))?;
        self.asm.vmovdqu32_store(cfg.acc, 0, gathered)?;
        self.asm.kxnorw(cfg.tmp_mask, cfg.tmp_mask, cfg.tmp_mask)?;
        self.asm
            .vpgatherdd(gathered, cfg.tmp_mask, cfg.addr, cfg.scratch, disp)?;

        // A zero source (rs2 == x0) has to be materialized; see SW above.
        let (src, src_borrowed) = if instr.rs2 == 0 {
            let zero = VReg(2);
            self.asm.mov_r64_imm(cfg.acc, self.state.spill_addr(1))?;
            self.asm.vmovdqu32_store(cfg.acc, 0, zero)?;
            self.asm.vpxord(zero, zero, zero)?;
            (zero, true)
        } else {
            (VReg(instr.rs2), false)
        };

        // One blend bit per byte, replicated across the 16 dword lanes
        let mut byte_mask: u64 = 0;
        for _ in 0..LANE_COUNT {
            byte_mask = (byte_mask << 4) | width_mask;
        }
        self.asm.mov_r64_imm(cfg.acc, byte_mask)?;
        self.asm.kmovq_k_r64(cfg.tmp_mask, cfg.acc)?;
        self.asm.vpblendmb(gathered, cfg.tmp_mask, gathered, src)?;

        self.emit_store_mask()?;
        self.asm
            .vpscatterdd(cfg.addr, cfg.scratch, disp, cfg.tmp_mask, gathered)?;

        if src_borrowed {
            self.asm.mov_r64_imm(cfg.acc, self.state.spill_addr(1))?;
            self.asm.vmovdqu32_load(src, cfg.acc, 0)?;
        }
        self.asm.mov_r64_imm(cfg.acc, self.state.spill_addr(0))?;
        self.asm.vmovdqu32_load(gathered, cfg.acc, 0)
    }

    fn emit_op_imm(&mut self, instr: &DecodedInstr) -> Result<(), JitError> {
        if instr.rd == 0 {
            debug!("skipping OP-IMM write to the zero register");
            return Ok(());
        }
        let cfg = self.cfg;
        let rd = VReg(instr.rd);
        let rs1 = VReg(instr.rs1);
        let imm = instr.imm as u32;

        match instr.funct3 {
            op_imm_funct3::ADDI => {
                if instr.rs1 == 0 {
                    // Move of the immediate itself
                    self.broadcast_imm(rd, imm)
                } else {
                    self.broadcast_imm(cfg.scratch, imm)?;
                    self.asm.vpaddd(rd, rs1, cfg.scratch)
                }
            }
            op_imm_funct3::SLTI => {
                self.broadcast_imm(cfg.scratch, imm)?;
                self.asm.vpcmpd(cfg.tmp_mask, rs1, cfg.scratch, CC_LT)?;
                self.emit_mask_to_01(rd)
            }
            op_imm_funct3::SLTIU => {
                self.broadcast_imm(cfg.scratch, imm)?;
                self.asm.vpcmpud(cfg.tmp_mask, rs1, cfg.scratch, CC_LT)?;
                self.emit_mask_to_01(rd)
            }
            op_imm_funct3::XORI => {
                self.broadcast_imm(cfg.scratch, imm)?;
                self.asm.vpxord(rd, rs1, cfg.scratch)
            }
            op_imm_funct3::ORI => {
                self.broadcast_imm(cfg.scratch, imm)?;
                self.asm.vpord(rd, rs1, cfg.scratch)
            }
            op_imm_funct3::ANDI => {
                self.broadcast_imm(cfg.scratch, imm)?;
                self.asm.vpandd(rd, rs1, cfg.scratch)
            }
            op_imm_funct3::SLLI => self.asm.vpslld_imm(rd, rs1, instr.shamt() as u8),
            op_imm_funct3::SRLI_SRAI => {
                if instr.bits & (1 << 30) != 0 {
                    self.asm.vpsrad_imm(rd, rs1, instr.shamt() as u8)
                } else {
                    self.asm.vpsrld_imm(rd, rs1, instr.shamt() as u8)
                }
            }
            _ => unreachable!("funct3 is 3 bits"),
        }
    }

    fn emit_op(&mut self, instr: &DecodedInstr) -> Result<(), JitError> {
        if instr.rd == 0 {
            debug!("skipping OP write to the zero register");
            return Ok(());
        }
        let cfg = self.cfg;
        let rd = VReg(instr.rd);
        let rs1 = VReg(instr.rs1);
        let rs2 = VReg(instr.rs2);

        match instr.funct3 {
            op_funct3::ADD_SUB => {
                // Bit 30 selects SUB
                if instr.bits & (1 << 30) != 0 {
                    self.asm.vpsubd(rd, rs1, rs2)
                } else {
                    self.asm.vpaddd(rd, rs1, rs2)
                }
            }
            op_funct3::SLL => {
                self.emit_masked_shift_counts(rs2)?;
                self.asm.vpsllvd(rd, rs1, cfg.scratch)
            }
            op_funct3::SLT => {
                self.asm.vpcmpd(cfg.tmp_mask, rs1, rs2, CC_LT)?;
                self.emit_mask_to_01(rd)
            }
            op_funct3::SLTU => {
                self.asm.vpcmpud(cfg.tmp_mask, rs1, rs2, CC_LT)?;
                self.emit_mask_to_01(rd)
            }
            op_funct3::XOR => self.asm.vpxord(rd, rs1, rs2),
            op_funct3::SRL_SRA => {
                self.emit_masked_shift_counts(rs2)?;
                // Bit 30 selects SRA
                if instr.bits & (1 << 30) != 0 {
                    self.asm.vpsravd(rd, rs1, cfg.scratch)
                } else {
                    self.asm.vpsrlvd(rd, rs1, cfg.scratch)
                }
            }
            op_funct3::OR => self.asm.vpord(rd, rs1, rs2),
            op_funct3::AND => self.asm.vpandd(rd, rs1, rs2),
            _ => unreachable!("funct3 is 3 bits"),
        }
    }

    /// Per-lane shift counts: `rs2 & 0x1F` in the scratch register.
    fn emit_masked_shift_counts(&mut self, rs2: VReg) -> Result<(), JitError> {
        let cfg = self.cfg;
        self.broadcast_imm(cfg.scratch, 0x1F)?;
        self.asm.vpandd(cfg.scratch, cfg.scratch, rs2)
    }

    /// Expand the compare mask into 0/1 lane words: all-ones lanes from the
    /// mask move, shifted down to a single bit.
    fn emit_mask_to_01(&mut self, rd: VReg) -> Result<(), JitError> {
        self.asm.vpmovm2d(rd, self.cfg.tmp_mask)?;
        self.asm.vpsrld_imm(rd, rd, 31)
    }
}
