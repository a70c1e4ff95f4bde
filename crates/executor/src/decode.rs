//! RV32I instruction decoding.
//!
//! One pure, total function over a 32-bit word. The register and function
//! fields sit at fixed positions in every format; the immediates are woven
//! through the word per format and come back sign-extended to 32 bits.
//! Extension happens through [`sign_extend`], an arithmetic shift on `i32`
//! with an in-range amount, so nothing here leans on host shift behaviour.

use serde::{Deserialize, Serialize};

/// Major opcodes of the base integer set.
pub mod opcode {
    pub const LUI: u8 = 0x37;
    pub const AUIPC: u8 = 0x17;
    pub const JAL: u8 = 0x6F;
    pub const JALR: u8 = 0x67;
    pub const BRANCH: u8 = 0x63;
    pub const LOAD: u8 = 0x03;
    pub const STORE: u8 = 0x23;
    pub const OP_IMM: u8 = 0x13;
    pub const OP: u8 = 0x33;
    pub const SYSTEM: u8 = 0x73;
    pub const MISC_MEM: u8 = 0x0F; // FENCE
}

/// funct3 values for BRANCH.
pub mod branch_funct3 {
    pub const BEQ: u8 = 0b000;
    pub const BNE: u8 = 0b001;
    pub const BLT: u8 = 0b100;
    pub const BGE: u8 = 0b101;
    pub const BLTU: u8 = 0b110;
    pub const BGEU: u8 = 0b111;
}

/// funct3 values for LOAD.
pub mod load_funct3 {
    pub const LB: u8 = 0b000;
    pub const LH: u8 = 0b001;
    pub const LW: u8 = 0b010;
    pub const LBU: u8 = 0b100;
    pub const LHU: u8 = 0b101;
}

/// funct3 values for STORE.
pub mod store_funct3 {
    pub const SB: u8 = 0b000;
    pub const SH: u8 = 0b001;
    pub const SW: u8 = 0b010;
}

/// funct3 values for OP-IMM.
pub mod op_imm_funct3 {
    pub const ADDI: u8 = 0b000;
    pub const SLLI: u8 = 0b001;
    pub const SLTI: u8 = 0b010;
    pub const SLTIU: u8 = 0b011;
    pub const XORI: u8 = 0b100;
    pub const SRLI_SRAI: u8 = 0b101;
    pub const ORI: u8 = 0b110;
    pub const ANDI: u8 = 0b111;
}

/// funct3 values for OP.
pub mod op_funct3 {
    pub const ADD_SUB: u8 = 0b000;
    pub const SLL: u8 = 0b001;
    pub const SLT: u8 = 0b010;
    pub const SLTU: u8 = 0b011;
    pub const XOR: u8 = 0b100;
    pub const SRL_SRA: u8 = 0b101;
    pub const OR: u8 = 0b110;
    pub const AND: u8 = 0b111;
}

/// Sign-extend the low `width` bits of `value`.
#[inline]
const fn sign_extend(value: u32, width: u32) -> i32 {
    let shift = 32 - width;
    ((value << shift) as i32) >> shift
}

/// Decoded form of one guest instruction word.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecodedInstr {
    /// The word as fetched.
    pub bits: u32,
    /// Major opcode, bits [6:0].
    pub opcode: u8,
    /// Destination register index, bits [11:7]. In B and S formats these
    /// bits carry immediate pieces instead; `imm` accounts for that.
    pub rd: u8,
    /// Minor opcode, bits [14:12].
    pub funct3: u8,
    /// First source register index, bits [19:15].
    pub rs1: u8,
    /// Second source register index, bits [24:20].
    pub rs2: u8,
    /// Function modifier, bits [31:25].
    pub funct7: u8,
    /// Format-specific immediate, sign-extended. Zero for R-format and
    /// unrecognised opcodes.
    pub imm: i32,
}

impl DecodedInstr {
    /// Decode a 32-bit instruction word.
    pub fn decode(bits: u32) -> Self {
        let opcode = (bits & 0x7F) as u8;
        let imm = match opcode {
            // Upper immediate, already sitting in its final position
            opcode::LUI | opcode::AUIPC => (bits & 0xFFFF_F000) as i32,
            opcode::JAL => Self::jump_offset(bits),
            opcode::BRANCH => Self::branch_offset(bits),
            opcode::STORE => Self::store_offset(bits),
            // Plain 12-bit immediate in the top of the word
            opcode::JALR | opcode::LOAD | opcode::OP_IMM | opcode::SYSTEM | opcode::MISC_MEM => {
                sign_extend(bits >> 20, 12)
            }
            _ => 0,
        };

        Self {
            bits,
            opcode,
            rd: ((bits >> 7) & 0x1F) as u8,
            funct3: ((bits >> 12) & 0x7) as u8,
            rs1: ((bits >> 15) & 0x1F) as u8,
            rs2: ((bits >> 20) & 0x1F) as u8,
            funct7: (bits >> 25) as u8,
            imm,
        }
    }

    /// J-format offset, laid out as imm[20|10:1|11|19:12]: bit 31 is the
    /// sign, bits 19:12 stay where they are, bit 20 supplies imm[11], and
    /// bits 30:21 land at imm[10:1]. imm[0] does not exist.
    fn jump_offset(bits: u32) -> i32 {
        let woven = ((bits >> 11) & 0x10_0000)
            | (bits & 0xF_F000)
            | ((bits >> 9) & 0x800)
            | ((bits >> 20) & 0x7FE);
        sign_extend(woven, 21)
    }

    /// B-format offset: imm[12|10:5] ride above rs2 and imm[4:1|11] occupy
    /// the rd slot, so even a "rd = x0" encoding contributes offset bits.
    fn branch_offset(bits: u32) -> i32 {
        let woven = ((bits >> 19) & 0x1000)
            | ((bits << 4) & 0x800)
            | ((bits >> 20) & 0x7E0)
            | ((bits >> 7) & 0x1E);
        sign_extend(woven, 13)
    }

    /// S-format offset: imm[11:5] above rs2, imm[4:0] in the rd slot.
    fn store_offset(bits: u32) -> i32 {
        sign_extend(((bits >> 20) & 0xFE0) | ((bits >> 7) & 0x1F), 12)
    }

    /// Shift amount for SLLI/SRLI/SRAI, masked to 5 bits. Non-zero high
    /// bits of the immediate (beyond the SRAI selector) are ignored.
    #[inline]
    pub fn shamt(&self) -> u32 {
        (self.imm as u32) & 0x1F
    }

    /// Whether this instruction writes `pc` itself (JAL, JALR or a branch).
    #[inline]
    pub fn is_control(&self) -> bool {
        matches!(self.opcode, opcode::JAL | opcode::JALR | opcode::BRANCH)
    }
}
