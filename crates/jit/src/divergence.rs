//! Divergence model: lane masks, the per-instruction label graph, and the
//! lowering of control transfers.
//!
//! JAL keeps lanes together (the offset is shared). JALR is the principal
//! divergence source: the target is `(x[rs1] + imm) & !1` per lane.
//! Branches split the lanes with a vector compare whose mask gates a masked
//! write into the PC vector; the host control flow itself never diverges,
//! only the mask does.

use lanefuzz_executor::decode::{branch_funct3, DecodedInstr};
use tracing::{debug, error};

use crate::asm::{Assembler, Label, VReg, CC_EQ, CC_LT, CC_NEQ, CC_NLT};
use crate::error::JitError;
use crate::lanes::LANE_COUNT;
use crate::lowering::Avx512Jit;

/// One bit per lane; bit `i` set means lane `i` is live on the current path.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LaneMask(pub u16);

impl LaneMask {
    pub const ALL: LaneMask = LaneMask(u16::MAX);

    #[inline]
    pub fn bit(self, lane: usize) -> bool {
        debug_assert!(lane < LANE_COUNT);
        self.0 & (1 << lane) != 0
    }

    #[inline]
    pub fn set(&mut self, lane: usize) {
        debug_assert!(lane < LANE_COUNT);
        self.0 |= 1 << lane;
    }

    /// Number of live lanes.
    #[inline]
    pub fn popcount(self) -> u32 {
        self.0.count_ones()
    }

    /// The zero mask: no lane executes.
    #[inline]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

/// How a branch compares its operands: the host compare predicate plus
/// whether the unsigned compare form is needed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BranchCmp {
    pub unsigned: bool,
    pub cc: u8,
}

/// Map a BRANCH funct3 onto the host compare. `None` for undefined funct3.
pub fn branch_compare(funct3: u8) -> Option<BranchCmp> {
    match funct3 {
        branch_funct3::BEQ => Some(BranchCmp { unsigned: false, cc: CC_EQ }),
        branch_funct3::BNE => Some(BranchCmp { unsigned: false, cc: CC_NEQ }),
        branch_funct3::BLT => Some(BranchCmp { unsigned: false, cc: CC_LT }),
        branch_funct3::BGE => Some(BranchCmp { unsigned: false, cc: CC_NLT }),
        branch_funct3::BLTU => Some(BranchCmp { unsigned: true, cc: CC_LT }),
        branch_funct3::BGEU => Some(BranchCmp { unsigned: true, cc: CC_NLT }),
        _ => None,
    }
}

/// Labels for the emitted block graph: one per guest instruction, created
/// up front, plus the epilogue.
#[derive(Debug)]
pub struct BlockLabels {
    blocks: Vec<Label>,
    epilogue: Label,
}

impl BlockLabels {
    pub fn prepare(asm: &mut Assembler, instructions: usize) -> Self {
        let blocks = (0..instructions).map(|_| asm.new_label()).collect();
        let epilogue = asm.new_label();
        Self { blocks, epilogue }
    }

    pub fn block(&self, idx: usize) -> Label {
        self.blocks[idx]
    }

    pub fn epilogue(&self) -> Label {
        self.epilogue
    }

    /// Fall-through successor of block `idx`.
    pub fn successor(&self, idx: usize) -> Label {
        self.blocks.get(idx + 1).copied().unwrap_or(self.epilogue)
    }

    /// Branch/jump target `imm` bytes from block `idx`, when it lands inside
    /// the program. Targets outside (the sentinel return among them) resolve
    /// to the epilogue.
    pub fn target(&self, idx: usize, imm: i32) -> Label {
        let target = idx as i64 + (imm as i64) / 4;
        if target >= 0 {
            if let Some(label) = self.blocks.get(target as usize) {
                return *label;
            }
        }
        self.epilogue
    }
}

impl Avx512Jit {
    /// Basic-block entry: refresh the execution-control mask by comparing
    /// the PC vector against this block's guest address, and skip the block
    /// when no lane is at it.
    pub(crate) fn emit_block_entry(&mut self, idx: usize) -> Result<(), JitError> {
        let cfg = self.cfg;
        self.broadcast_imm(cfg.scratch, (idx * 4) as u32)?;
        self.asm.mov_r64_imm(cfg.addr, self.state.pc_addr())?;
        self.asm
            .vpcmpd_mem(cfg.exec_mask, cfg.scratch, cfg.addr, 0, CC_EQ)?;
        self.asm.kortestw(cfg.exec_mask, cfg.exec_mask)?;
        self.asm.jz(self.labels.successor(idx))
    }

    /// JAL: `rd <- pc + 4`, `pc <- pc + imm` on every lane. The immediate is
    /// shared, so the lanes stay converged.
    pub(crate) fn emit_jal(&mut self, idx: usize, instr: &DecodedInstr) -> Result<(), JitError> {
        let cfg = self.cfg;
        let imm = instr.imm;

        if instr.rd != 0 {
            let rd = VReg(instr.rd);
            if self.opts.fold_pc {
                self.broadcast_imm(rd, (idx * 4 + 4) as u32)?;
            } else {
                self.asm.mov_r64_imm(cfg.addr, self.state.pc_addr())?;
                self.asm.vmovdqu32_load(rd, cfg.addr, 0)?;
                self.broadcast_imm(cfg.scratch, 4)?;
                self.asm.vpaddd(rd, rd, cfg.scratch)?;
            }
        } else {
            debug!("skipping JAL link into x0");
        }

        self.asm.mov_r64_imm(cfg.addr, self.state.pc_addr())?;
        if self.opts.fold_pc {
            self.broadcast_imm(cfg.scratch, (idx as u32 * 4).wrapping_add(imm as u32))?;
        } else {
            self.broadcast_imm(cfg.scratch, imm as u32)?;
            self.asm.vpaddd_mem(cfg.scratch, cfg.scratch, cfg.addr, 0)?;
        }
        self.emit_pc_store(cfg.scratch)?;

        if self.opts.basic_blocks {
            let target = self.labels.target(idx, imm);
            self.asm.jmp(target)?;
        }
        Ok(())
    }

    /// JALR: `rd <- pc + 4`, `pc <- (x[rs1] + imm) & !1` per lane. This is
    /// where lanes start to disagree on pc. The target is computed before
    /// the link write so rd == rs1 is safe.
    pub(crate) fn emit_jalr(&mut self, idx: usize, instr: &DecodedInstr) -> Result<(), JitError> {
        let cfg = self.cfg;

        self.broadcast_imm(cfg.scratch, instr.imm as u32)?;
        self.asm.vpaddd(cfg.scratch, cfg.scratch, VReg(instr.rs1))?;
        // Clear the low bit: (x >> 1) << 1
        self.asm.vpsrld_imm(cfg.scratch, cfg.scratch, 1)?;
        self.asm.vpslld_imm(cfg.scratch, cfg.scratch, 1)?;

        self.asm.mov_r64_imm(cfg.addr, self.state.pc_addr())?;
        if instr.rd != 0 && !self.opts.fold_pc {
            self.asm.vmovdqu32_load(VReg(instr.rd), cfg.addr, 0)?;
        }
        self.emit_pc_store(cfg.scratch)?;

        if instr.rd != 0 {
            let rd = VReg(instr.rd);
            if self.opts.fold_pc {
                self.broadcast_imm(rd, (idx * 4 + 4) as u32)?;
            } else {
                self.broadcast_imm(cfg.scratch, 4)?;
                self.asm.vpaddd(rd, rd, cfg.scratch)?;
            }
        }

        // No static successor exists for an indirect jump; in basic-block
        // mode the entry masks of the candidate blocks gate execution.
        Ok(())
    }

    /// Conditional branch: the compare mask picks which lanes get
    /// `pc + imm`; everyone else gets `pc + 4`.
    pub(crate) fn emit_branch(&mut self, idx: usize, instr: &DecodedInstr) -> Result<(), JitError> {
        let cfg = self.cfg;
        let Some(cmp) = branch_compare(instr.funct3) else {
            error!(funct3 = instr.funct3, "undefined branch funct3, lowering to a no-op");
            return Ok(());
        };
        let imm = instr.imm;
        self.state.jumps_seen += 1;

        let rs1 = VReg(instr.rs1);
        let rs2 = VReg(instr.rs2);
        if cmp.unsigned {
            self.asm.vpcmpud(cfg.tmp_mask, rs1, rs2, cmp.cc)?;
        } else {
            self.asm.vpcmpd(cfg.tmp_mask, rs1, rs2, cmp.cc)?;
        }
        if self.opts.basic_blocks {
            // Only lanes that are actually at this block may take the branch.
            self.asm.kandw(cfg.tmp_mask, cfg.tmp_mask, cfg.exec_mask)?;
        }

        // jumps_taken += popcount(mask), in the emitted code
        self.asm.kmovw_r32_k(cfg.acc, cfg.tmp_mask)?;
        self.asm.popcnt_r32(cfg.acc, cfg.acc)?;
        self.asm.mov_r64_imm(cfg.addr, self.state.jumps_taken_addr())?;
        self.asm.add_mem64_r64(cfg.addr, cfg.acc)?;

        self.asm.mov_r64_imm(cfg.addr, self.state.pc_addr())?;
        if self.opts.fold_pc {
            self.broadcast_imm(cfg.scratch, (idx * 4 + 4) as u32)?;
            self.emit_pc_store(cfg.scratch)?;
            self.broadcast_imm(cfg.scratch, (idx as u32 * 4).wrapping_add(imm as u32))?;
        } else {
            // All lanes advance, then the taken lanes are rewritten with
            // pc_old + imm == (pc_now - 4) + imm.
            self.broadcast_imm(cfg.scratch, 4)?;
            self.asm.vpaddd_mem(cfg.scratch, cfg.scratch, cfg.addr, 0)?;
            self.emit_pc_store(cfg.scratch)?;
            self.broadcast_imm(cfg.scratch, (imm as u32).wrapping_sub(4))?;
            self.asm.vpaddd_mem(cfg.scratch, cfg.scratch, cfg.addr, 0)?;
        }
        self.asm
            .vmovdqu32_store_masked(cfg.addr, 0, cfg.scratch, cfg.tmp_mask)?;

        if self.opts.basic_blocks {
            // Both successors are real entry points; the masks decide which
            // lanes commit inside each.
            self.asm.kortestw(cfg.tmp_mask, cfg.tmp_mask)?;
            self.asm.jnz(self.labels.target(idx, imm))?;
            self.asm.jmp(self.labels.successor(idx))?;
        }
        Ok(())
    }
}
